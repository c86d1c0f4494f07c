//! The transient source unit consumed by the compiler adapter.

/// Script source plus the preprocessing it needs before compilation.
///
/// Created from caller input and consumed once per compile call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    text: String,
    /// Wrap the source in the engine's module envelope before compiling.
    pub wrap_as_module: bool,
    /// Remove a leading `#!...` line before compiling.
    pub strip_shebang: bool,
}

impl SourceUnit {
    /// Creates a unit that is compiled as a module with its shebang stripped.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            wrap_as_module: true,
            strip_shebang: true,
        }
    }

    /// Creates a unit that is compiled verbatim, as a plain script.
    pub fn script(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            wrap_as_module: false,
            strip_shebang: false,
        }
    }

    /// Sets whether the source is wrapped as a module.
    pub fn with_module(mut self, wrap: bool) -> Self {
        self.wrap_as_module = wrap;
        self
    }

    /// Sets whether a leading shebang line is removed.
    pub fn with_strip_shebang(mut self, strip: bool) -> Self {
        self.strip_shebang = strip;
        self
    }

    /// The original, unprocessed text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the text after shebang stripping, if enabled.
    ///
    /// Module wrapping is engine-specific and applied by the compiler adapter.
    pub fn prepared_text(&self) -> &str {
        if self.strip_shebang {
            strip_shebang(&self.text)
        } else {
            &self.text
        }
    }
}

/// Removes a leading `#!` line, keeping its terminating newline so that line
/// numbers in the remaining source do not shift.
pub fn strip_shebang(source: &str) -> &str {
    if !source.starts_with("#!") {
        return source;
    }
    match source.find('\n') {
        Some(idx) => &source[idx..],
        None => "",
    }
}
