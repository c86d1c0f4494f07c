//! Compiling for the current engine or for an alternate runtime.
//!
//! When the environment that will consume a cache blob runs a different
//! engine build than the one doing the compiling, the blob has to come from
//! that build. This crate spawns the alternate runtime as a child process,
//! streams the prepared source to it on stdin, and collects the blob it writes
//! to stdout.

#![warn(missing_docs)]

pub mod file;
pub mod pipeline;
pub mod target;

pub use file::{compile_file, CompileFileParams};
pub use pipeline::{compile_for_target, CHILD_ARGS, RUN_AS_HOST_ENV};
pub use target::{AlternateRuntime, RuntimeTarget};
