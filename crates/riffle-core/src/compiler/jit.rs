//! Cranelift JIT compilation context.
//!
//! [`JitContext`] owns the Cranelift [`JITModule`] and builder state for
//! one compilation. The host-runtime shims are registered on the builder
//! by symbol name, so emitted code can call straight back into the host
//! for iterator advance, callable invocation, truthiness, and
//! deallocation.

use std::sync::Arc;

use cranelift_codegen::isa::TargetIsa;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_frontend::FunctionBuilderContext;
use cranelift_jit::{JITBuilder, JITModule};

use crate::host::abi;

use super::error::CompileError;

/// Owns the Cranelift JIT module and builder context for one compiled
/// pull function.
///
/// Each compilation gets its own context: the finished module transfers
/// into the compiled artifact, which frees the code memory when dropped.
pub struct JitContext {
    module: JITModule,
    builder_ctx: FunctionBuilderContext,
    func_counter: u32,
}

impl JitContext {
    /// Creates a new JIT context targeting the host CPU with
    /// `opt_level = speed`, with the host-runtime symbols registered.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::Isa`] if the native ISA cannot be detected.
    pub fn new() -> Result<Self, CompileError> {
        let isa = Self::create_isa()?;
        let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        abi::register_symbols(&mut builder);
        let module = JITModule::new(builder);

        Ok(Self {
            module,
            builder_ctx: FunctionBuilderContext::new(),
            func_counter: 0,
        })
    }

    /// Returns a mutable reference to the underlying [`JITModule`].
    pub(crate) fn module(&mut self) -> &mut JITModule {
        &mut self.module
    }

    /// Returns a mutable reference to the shared `FunctionBuilderContext`.
    pub(crate) fn builder_ctx(&mut self) -> &mut FunctionBuilderContext {
        &mut self.builder_ctx
    }

    /// Generates a unique function name with the given prefix.
    pub(crate) fn next_func_name(&mut self, prefix: &str) -> String {
        let id = self.func_counter;
        self.func_counter += 1;
        format!("{prefix}_{id}")
    }

    /// Hands the module over to the finished artifact.
    pub(crate) fn into_module(self) -> JITModule {
        self.module
    }

    /// Creates a host-native ISA with speed optimization.
    fn create_isa() -> Result<Arc<dyn TargetIsa>, CompileError> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("opt_level", "speed")
            .expect("valid opt_level setting");
        let isa_builder =
            cranelift_native::builder().map_err(|e| CompileError::Isa(e.to_string()))?;
        let flags = settings::Flags::new(flag_builder);
        Ok(isa_builder.finish(flags).expect("valid ISA flags"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_module::Module;

    #[test]
    fn jit_context_creation() {
        let mut ctx = JitContext::new().unwrap();
        // Should detect some valid target triple.
        let triple = ctx.module().isa().triple().to_string();
        assert!(!triple.is_empty());
    }

    #[test]
    fn unique_func_names() {
        let mut ctx = JitContext::new().unwrap();
        let n1 = ctx.next_func_name("fused_next");
        let n2 = ctx.next_func_name("fused_next");
        assert_eq!(n1, "fused_next_0");
        assert_eq!(n2, "fused_next_1");
    }

    #[test]
    fn builder_ctx_accessible() {
        let mut ctx = JitContext::new().unwrap();
        let _b = ctx.builder_ctx();
    }
}
