//! Reference scripting engine for the Kiln toolchain.
//!
//! A small ECMAScript-flavoured language with a bytecode compiler, a stack
//! VM, and a serialized code cache in the Kiln header layout. It stands behind
//! the [`Compile`](kiln_common::Compile) and
//! [`InstantiateWithCache`](kiln_common::InstantiateWithCache) capabilities so
//! the codec, loader, and CLI have a real engine to run against.
//!
//! # Modules
//!
//! - `token`, `lexer`: source text to tokens
//! - `ast`, `parser`, `expr`: recursive descent plus Pratt parsing
//! - `bytecode`, `compiler`: AST lowering to serializable chunks
//! - `value`, `vm`: runtime values and the interpreter loop
//! - `identity`: build identity and process-wide engine flags
//! - `snapshot`: code cache writer and acceptance check
//! - `engine`: the [`Engine`] facade
//!
//! # Usage
//!
//! ```ignore
//! use kiln_engine::{BuildIdentity, Engine};
//!
//! let engine = Engine::new(BuildIdentity::current());
//! let value = engine.eval("console.log('hi'); 43;")?;
//! assert_eq!(value.as_number(), Some(43.0));
//! ```

#![warn(missing_docs)]

pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod engine;
pub mod error;
mod expr;
pub mod identity;
pub mod lexer;
pub mod parser;
pub mod snapshot;
pub mod token;
pub mod value;
mod vm;

pub use engine::{Engine, Script, MODULE_PREFIX, MODULE_SUFFIX};
pub use error::EngineError;
pub use identity::{global_flags, initialize, BuildIdentity, EngineFlags, ENGINE_LINE};
pub use value::{NativeFn, Object, ObjectRef, Value};

/// Counts UTF-16 code units, the unit the engine measures source length in.
pub fn source_length(source: &str) -> u32 {
    source.encode_utf16().count() as u32
}
