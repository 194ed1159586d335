//! Error type for pipeline compilation.

use std::fmt;

use crate::host::HostError;

/// Errors that can occur while lowering a pipeline to native code.
#[derive(Debug)]
pub enum CompileError {
    /// The native ISA could not be detected or configured.
    Isa(String),
    /// Cranelift module-level error during compilation or linking.
    Cranelift(Box<cranelift_module::ModuleError>),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Isa(desc) => write!(f, "native ISA unavailable: {desc}"),
            Self::Cranelift(e) => write!(f, "cranelift error: {e}"),
        }
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Cranelift(e) => Some(e.as_ref()),
            Self::Isa(_) => None,
        }
    }
}

impl From<cranelift_module::ModuleError> for CompileError {
    fn from(e: cranelift_module::ModuleError) -> Self {
        Self::Cranelift(Box::new(e))
    }
}

impl From<CompileError> for HostError {
    fn from(e: CompileError) -> Self {
        Self::Config(e.to_string())
    }
}
