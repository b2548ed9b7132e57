#![forbid(unsafe_code)]
//! Driver for the `cjc` Cangjie compiler: argv construction, process
//! invocation, and diagnostics normalization.

pub mod error;
pub mod invoke;

pub use error::CjcError;
pub use invoke::{
    parse_diagnostics, CjcCommand, CjcLocator, CompilationResult, Diagnostic, DiagnosticLevel,
    OutputKind,
};
