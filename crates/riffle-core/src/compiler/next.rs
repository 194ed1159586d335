//! Lowering of a step sequence to a native pull function.
//!
//! The emitted function has signature
//! `fn(callables: *const *mut RawValue, n_callables: usize, source: *mut RawValue) -> *mut RawValue`
//! and reproduces the interpreter's observable behavior exactly, without
//! the per-step dispatch on the kind tag: the step vector is unrolled into
//! straight-line basic blocks, with a single backward edge for the
//! filter-drop case.
//!
//! ```text
//! next_element:  element = riffle_iter_next(source)
//!                null → return null
//! step i (map):  applied = riffle_call_one(callables[i], element)
//!                null → release element, return null
//!                release element; element = applied; fall through
//! step i (filt): applied = riffle_call_one(callables[i], element)
//!                null → release element, return null
//!                t = riffle_object_not(applied); release applied
//!                t == 0 → fall through (keep)
//!                t == 1 → release element, jump next_element (drop)
//!                else   → release element, return null (error)
//! after last:    return element (caller owns it)
//! ```
//!
//! Releases are emitted inline with the host's exact protocol: decrement
//! the leading reference count, call the imported deallocator only when it
//! reaches zero.

use std::fmt;

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::types::{self as cl_types};
use cranelift_codegen::ir::{
    AbiParam, Block, BlockArg, FuncRef, Function, InstBuilder, MemFlags, UserFuncName, Value,
};
use cranelift_codegen::Context;
use cranelift_frontend::FunctionBuilder;
use cranelift_jit::JITModule;
use cranelift_module::{FuncId, Linkage, Module};

use crate::host::abi;
use crate::host::{error as host_error, HostError, RawValue, ValueRef};
use crate::pipeline::{StepKind, StepNode};

use super::error::CompileError;
use super::jit::JitContext;

/// Pointer type for the target architecture.
const PTR_TYPE: cranelift_codegen::ir::Type = cl_types::I64;

/// A compiled pull function:
/// `fn(callables, n_callables, source) -> element | null`.
///
/// Null means exhaustion, or an error if the pending host error is set.
pub type NextFn =
    unsafe extern "C" fn(*const *mut RawValue, usize, *mut RawValue) -> *mut RawValue;

/// Compiles a snapshot of the step vector into a [`CompiledNext`].
///
/// # Errors
///
/// Returns [`CompileError`] if the native ISA is unavailable or Cranelift
/// fails to define or link the function.
pub(crate) fn compile(steps: &[StepNode]) -> Result<CompiledNext, CompileError> {
    let mut jit = JitContext::new()?;
    let func_id = NextCompiler::new(&mut jit).compile(steps)?;

    let mut module = jit.into_module();
    module.finalize_definitions()?;
    let code_ptr = module.get_finalized_function(func_id);
    // SAFETY: the generated function has the declared ABI signature.
    let func = unsafe { std::mem::transmute::<*const u8, NextFn>(code_ptr) };

    // Pin the callables: the emitted code dereferences them without
    // re-checking, so they must stay alive as long as the code does.
    let pinned: Vec<ValueRef> = steps.iter().map(|step| step.function().clone()).collect();
    let callables = pinned.iter().map(ValueRef::as_ptr).collect();

    Ok(CompiledNext {
        module: Some(module),
        func,
        pinned,
        callables,
    })
}

/// An owned native pull function with its pinned callable handles.
///
/// Move-only: moves transfer the code memory and the pinned references
/// together. Dropping releases the pins and frees the code.
pub struct CompiledNext {
    module: Option<JITModule>,
    func: NextFn,
    pinned: Vec<ValueRef>,
    callables: Vec<*mut RawValue>,
}

impl CompiledNext {
    /// Pulls one element through the compiled pipeline.
    ///
    /// # Errors
    ///
    /// Propagates whatever host error the native code left pending.
    pub(crate) fn call(&self, source: &ValueRef) -> Result<Option<ValueRef>, HostError> {
        debug_assert!(!host_error::occurred());
        // SAFETY: the callable array and the source handle stay alive for
        // the duration of the call; the emitted code touches nothing else.
        let raw = unsafe { (self.func)(self.callables.as_ptr(), self.callables.len(), source.as_ptr()) };
        if raw.is_null() {
            match host_error::take() {
                Some(err) => Err(err),
                None => Ok(None),
            }
        } else {
            // SAFETY: the emitted code returns an owned reference.
            Ok(Some(unsafe { ValueRef::from_raw(raw) }))
        }
    }

    /// Number of steps the function was compiled from.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.pinned.len()
    }
}

impl Drop for CompiledNext {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            // SAFETY: the function pointer is never called again; no
            // other reference into the module's code memory exists.
            unsafe { module.free_memory() };
        }
    }
}

impl fmt::Debug for CompiledNext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledNext")
            .field("steps", &self.step_count())
            .field("func", &"<native fn>")
            .finish_non_exhaustive()
    }
}

/// Imported host primitives, declared once per function.
struct HostImports {
    iter_next: FuncRef,
    call_one: FuncRef,
    object_not: FuncRef,
    dealloc: FuncRef,
}

impl HostImports {
    fn declare(module: &mut JITModule, func: &mut Function) -> Result<Self, CompileError> {
        let mut iter_next_sig = module.make_signature();
        iter_next_sig.params.push(AbiParam::new(PTR_TYPE));
        iter_next_sig.returns.push(AbiParam::new(PTR_TYPE));
        let iter_next =
            module.declare_function(abi::ITER_NEXT_SYMBOL, Linkage::Import, &iter_next_sig)?;

        let mut call_one_sig = module.make_signature();
        call_one_sig.params.push(AbiParam::new(PTR_TYPE));
        call_one_sig.params.push(AbiParam::new(PTR_TYPE));
        call_one_sig.returns.push(AbiParam::new(PTR_TYPE));
        let call_one =
            module.declare_function(abi::CALL_ONE_SYMBOL, Linkage::Import, &call_one_sig)?;

        let mut object_not_sig = module.make_signature();
        object_not_sig.params.push(AbiParam::new(PTR_TYPE));
        object_not_sig.returns.push(AbiParam::new(cl_types::I32));
        let object_not =
            module.declare_function(abi::OBJECT_NOT_SYMBOL, Linkage::Import, &object_not_sig)?;

        let mut dealloc_sig = module.make_signature();
        dealloc_sig.params.push(AbiParam::new(PTR_TYPE));
        let dealloc =
            module.declare_function(abi::DEALLOC_SYMBOL, Linkage::Import, &dealloc_sig)?;

        Ok(Self {
            iter_next: module.declare_func_in_func(iter_next, func),
            call_one: module.declare_func_in_func(call_one, func),
            object_not: module.declare_func_in_func(object_not, func),
            dealloc: module.declare_func_in_func(dealloc, func),
        })
    }
}

/// Compiles step sequences into native pull functions.
struct NextCompiler<'a> {
    jit: &'a mut JitContext,
}

impl<'a> NextCompiler<'a> {
    fn new(jit: &'a mut JitContext) -> Self {
        Self { jit }
    }

    fn compile(&mut self, steps: &[StepNode]) -> Result<FuncId, CompileError> {
        let func_name = self.jit.next_func_name("fused_next");

        let mut sig = self.jit.module().make_signature();
        sig.params.push(AbiParam::new(PTR_TYPE)); // callables
        sig.params.push(AbiParam::new(PTR_TYPE)); // n_callables
        sig.params.push(AbiParam::new(PTR_TYPE)); // source
        sig.returns.push(AbiParam::new(PTR_TYPE)); // element or null

        let func_id =
            self.jit
                .module()
                .declare_function(&func_name, Linkage::Local, &sig)?;

        let mut func = Function::with_name_signature(UserFuncName::testcase(&func_name), sig);
        let imports = HostImports::declare(self.jit.module(), &mut func)?;

        {
            let mut builder = FunctionBuilder::new(&mut func, self.jit.builder_ctx());
            emit_next(&mut builder, &imports, steps);
            builder.seal_all_blocks();
            builder.finalize();
        }

        let mut ctx = Context::for_function(func);
        self.jit
            .module()
            .define_function(func_id, &mut ctx)
            .map_err(|e| CompileError::Cranelift(Box::new(e)))?;

        Ok(func_id)
    }
}

/// Emits the pull function's block graph.
fn emit_next(builder: &mut FunctionBuilder, imports: &HostImports, steps: &[StepNode]) {
    let entry = builder.create_block();
    builder.append_block_params_for_function_params(entry);

    let next_element = builder.create_block();
    let return_null = builder.create_block();

    // The element in flight travels between blocks as a block parameter.
    let fail = builder.create_block();
    let fail_element = builder.append_block_param(fail, PTR_TYPE);
    let drop_element = builder.create_block();
    let dropped_element = builder.append_block_param(drop_element, PTR_TYPE);

    let step_blocks: Vec<Block> = steps
        .iter()
        .map(|_| {
            let block = builder.create_block();
            builder.append_block_param(block, PTR_TYPE);
            block
        })
        .collect();
    let emit = builder.create_block();
    let emit_element = builder.append_block_param(emit, PTR_TYPE);

    builder.switch_to_block(entry);
    let callables = builder.block_params(entry)[0];
    let source = builder.block_params(entry)[2];
    builder.ins().jump(next_element, &[]);

    // Draw from the source; null means exhaustion (or a pending error).
    builder.switch_to_block(next_element);
    let call = builder.ins().call(imports.iter_next, &[source]);
    let element = builder.inst_results(call)[0];
    let first = step_blocks.first().copied().unwrap_or(emit);
    builder
        .ins()
        .brif(element, first, &[BlockArg::Value(element)], return_null, &[]);

    for (index, step) in steps.iter().enumerate() {
        let block = step_blocks[index];
        let next_block = step_blocks.get(index + 1).copied().unwrap_or(emit);

        builder.switch_to_block(block);
        let element = builder.block_params(block)[0];

        let offset = i32::try_from(index * 8).expect("step vector offset fits in i32");
        let callable = builder
            .ins()
            .load(PTR_TYPE, MemFlags::trusted(), callables, offset);
        let call = builder.ins().call(imports.call_one, &[callable, element]);
        let applied = builder.inst_results(call)[0];

        let applied_ok = builder.create_block();
        builder
            .ins()
            .brif(applied, applied_ok, &[], fail, &[BlockArg::Value(element)]);

        builder.switch_to_block(applied_ok);
        match step.kind() {
            StepKind::Map => {
                emit_release(builder, imports, element);
                builder.ins().jump(next_block, &[BlockArg::Value(applied)]);
            }
            StepKind::Filter => {
                let call = builder.ins().call(imports.object_not, &[applied]);
                let not_truthy = builder.inst_results(call)[0];
                emit_release(builder, imports, applied);

                let keep = builder.ins().icmp_imm(IntCC::Equal, not_truthy, 0);
                let check_drop = builder.create_block();
                builder
                    .ins()
                    .brif(keep, next_block, &[BlockArg::Value(element)], check_drop, &[]);

                // 1 means falsy (drop and draw again); anything else is a
                // truthiness error.
                builder.switch_to_block(check_drop);
                let falsy = builder.ins().icmp_imm(IntCC::Equal, not_truthy, 1);
                builder.ins().brif(
                    falsy,
                    drop_element,
                    &[BlockArg::Value(element)],
                    fail,
                    &[BlockArg::Value(element)],
                );
            }
        }
    }

    // Every retained step has run; the caller owns the element.
    builder.switch_to_block(emit);
    builder.ins().return_(&[emit_element]);

    builder.switch_to_block(return_null);
    let null = builder.ins().iconst(PTR_TYPE, 0);
    builder.ins().return_(&[null]);

    builder.switch_to_block(fail);
    emit_release(builder, imports, fail_element);
    let null = builder.ins().iconst(PTR_TYPE, 0);
    builder.ins().return_(&[null]);

    builder.switch_to_block(drop_element);
    emit_release(builder, imports, dropped_element);
    builder.ins().jump(next_element, &[]);
}

/// Emits the host release protocol inline: decrement the leading reference
/// count, call the imported deallocator when it reaches zero.
fn emit_release(builder: &mut FunctionBuilder, imports: &HostImports, value: Value) {
    let count = builder.ins().load(PTR_TYPE, MemFlags::trusted(), value, 0);
    let count = builder.ins().iadd_imm(count, -1);
    builder.ins().store(MemFlags::trusted(), count, value, 0);

    let live = builder.create_block();
    let dead = builder.create_block();
    builder.ins().brif(count, live, &[], dead, &[]);

    builder.switch_to_block(dead);
    builder.ins().call(imports.dealloc, &[value]);
    builder.ins().jump(live, &[]);

    builder.switch_to_block(live);
}
