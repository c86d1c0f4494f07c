//! Engine error types.
//!
//! All errors that can occur while parsing, compiling, serializing, or
//! executing a script are represented as variants of [`EngineError`].

/// Errors produced by the reference engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// The source text is not a valid program.
    #[error("SyntaxError: {message} ({line}:{column})")]
    Syntax {
        /// Description of the problem.
        message: String,
        /// 1-based line of the offending token.
        line: u32,
        /// 1-based column of the offending token.
        column: u32,
    },

    /// A name was read that is not bound in any enclosing scope.
    #[error("ReferenceError: {0} is not defined")]
    Reference(String),

    /// An operation was applied to a value of the wrong type.
    #[error("TypeError: {0}")]
    Type(String),

    /// A lazily compiled function could not recover its body from the script source.
    #[error("function '{name}' cannot be compiled: its source is not available")]
    SourceUnavailable {
        /// The function name, or `<anonymous>`.
        name: String,
    },

    /// A host function failed with an error of its own.
    #[error("{0}")]
    Host(String),

    /// Call depth exceeded the interpreter limit.
    #[error("RangeError: maximum call stack size exceeded")]
    StackOverflow,

    /// Executed bytecode referenced a missing operand or underflowed the stack.
    #[error("invalid bytecode: {0}")]
    InvalidBytecode(String),

    /// Encoding the code cache failed.
    #[error("failed to serialize code cache: {0}")]
    Serialize(String),

    /// The process-wide engine flags were already set to different values.
    #[error("engine flags already initialized")]
    AlreadyInitialized,
}

impl EngineError {
    pub(crate) fn syntax(message: impl Into<String>, source: &str, offset: usize) -> Self {
        let (line, column) = line_col(source, offset);
        Self::Syntax {
            message: message.into(),
            line,
            column,
        }
    }
}

/// Converts a byte offset into a 1-based line and column.
fn line_col(source: &str, offset: usize) -> (u32, u32) {
    let offset = offset.min(source.len());
    let prefix = source.get(..offset).unwrap_or(source);
    let line = prefix.matches('\n').count() as u32 + 1;
    let column = match prefix.rfind('\n') {
        Some(nl) => prefix[nl + 1..].chars().count() as u32 + 1,
        None => prefix.chars().count() as u32 + 1,
    };
    (line, column)
}
