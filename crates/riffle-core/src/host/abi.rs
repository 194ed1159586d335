//! C-ABI surface imported by compiled pipelines.
//!
//! Emitted native code cannot use `Result`; it speaks the host's raw
//! protocol instead: owned values travel as `*mut RawValue`, failure is a
//! null pointer (or a negative tri-state) with the error stashed in the
//! pending-error slot, and exhaustion is a null pointer with no pending
//! error. These shims translate between that protocol and the safe
//! runtime in [`super::runtime`].
//!
//! The symbols are resolved by registration on the `JITBuilder`, not by
//! linker export, so their names only need to agree with the `*_SYMBOL`
//! constants the compiler declares imports against.

use std::ffi::c_int;
use std::mem::ManuallyDrop;
use std::ptr;

use super::error;
use super::handle::ValueRef;
use super::runtime;
use super::value::{self, RawValue};

/// Symbol name of [`riffle_iter_next`].
pub const ITER_NEXT_SYMBOL: &str = "riffle_iter_next";
/// Symbol name of [`riffle_call_one`].
pub const CALL_ONE_SYMBOL: &str = "riffle_call_one";
/// Symbol name of [`riffle_object_not`].
pub const OBJECT_NOT_SYMBOL: &str = "riffle_object_not";
/// Symbol name of [`riffle_dealloc`].
pub const DEALLOC_SYMBOL: &str = "riffle_dealloc";

/// Wraps a borrowed raw pointer in a handle without taking ownership.
///
/// # Safety
///
/// `ptr` must point to a live host value for the duration of the borrow.
unsafe fn borrowed(ptr: *mut RawValue) -> ManuallyDrop<ValueRef> {
    ManuallyDrop::new(unsafe { ValueRef::from_raw(ptr) })
}

/// Advances an iterator: a new owned value, or null on exhaustion or error
/// (error iff the pending-error slot is set).
///
/// # Safety
///
/// `iterator` must point to a live host iterator.
pub unsafe extern "C" fn riffle_iter_next(iterator: *mut RawValue) -> *mut RawValue {
    let iterator = unsafe { borrowed(iterator) };
    match runtime::iterator_next(&iterator) {
        Ok(Some(value)) => value.into_raw(),
        Ok(None) => ptr::null_mut(),
        Err(err) => {
            error::raise(err);
            ptr::null_mut()
        }
    }
}

/// Invokes `callable(arg)`: a new owned value, or null with the
/// pending-error slot set.
///
/// # Safety
///
/// Both pointers must point to live host values.
pub unsafe extern "C" fn riffle_call_one(
    callable: *mut RawValue,
    arg: *mut RawValue,
) -> *mut RawValue {
    let callable = unsafe { borrowed(callable) };
    let arg = unsafe { borrowed(arg) };
    match runtime::call_one(&callable, &arg) {
        Ok(value) => value.into_raw(),
        Err(err) => {
            error::raise(err);
            ptr::null_mut()
        }
    }
}

/// Boolean negation: `0` if truthy, `1` if falsy, negative on error with
/// the pending-error slot set.
///
/// # Safety
///
/// `value` must point to a live host value.
pub unsafe extern "C" fn riffle_object_not(value: *mut RawValue) -> c_int {
    let value = unsafe { borrowed(value) };
    match runtime::object_not(&value) {
        Ok(true) => 1,
        Ok(false) => 0,
        Err(err) => {
            error::raise(err);
            -1
        }
    }
}

/// Frees a value whose reference count has already been dropped to zero
/// by emitted code.
///
/// # Safety
///
/// `value` must point to a live host value with a reference count of zero
/// and must not be used afterwards.
pub unsafe extern "C" fn riffle_dealloc(value: *mut RawValue) {
    unsafe { value::dealloc(value) };
}

/// Registers every shim on a JIT builder under its import symbol.
pub(crate) fn register_symbols(builder: &mut cranelift_jit::JITBuilder) {
    builder.symbol(ITER_NEXT_SYMBOL, riffle_iter_next as *const u8);
    builder.symbol(CALL_ONE_SYMBOL, riffle_call_one as *const u8);
    builder.symbol(OBJECT_NOT_SYMBOL, riffle_object_not as *const u8);
    builder.symbol(DEALLOC_SYMBOL, riffle_dealloc as *const u8);
}
