//! Cranelift-based pipeline compiler.
//!
//! Lowers a fused step sequence into a single native pull function that
//! calls the host runtime directly, removing the per-step dispatch of the
//! interpreter. Only the dispatcher in [`crate::stream`] decides when
//! compiling is worth it; the interpreter remains semantically complete
//! on its own.
//!
//! # Components
//!
//! - [`error`]: compile-error type
//! - [`jit`]: Cranelift JIT context management
//! - [`next`]: lowering of the step sequence and the compiled artifact

pub mod error;
pub mod jit;
pub mod next;

pub use error::CompileError;
pub use jit::JitContext;
pub use next::{CompiledNext, NextFn};
