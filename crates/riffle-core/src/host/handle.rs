//! Owning handles to host values.
//!
//! [`ValueRef`] is the smart handle every part of the engine trades in:
//! construction acquires a reference, [`Clone`] reacquires, [`Drop`]
//! releases and frees the allocation when the count reaches zero. Crossing
//! the native-code boundary goes through [`ValueRef::into_raw`] /
//! [`ValueRef::from_raw`], which transfer ownership without touching the
//! count.

use std::cell::RefCell;
use std::fmt;
use std::ptr::NonNull;

use super::error::HostError;
use super::value::{
    self, CustomValue, GenIter, NativeFunction, RangeIter, RawValue, SeqIter, ValueKind,
};
use crate::stream::FusedState;

/// An owned reference to a host value.
pub struct ValueRef {
    ptr: NonNull<RawValue>,
}

impl ValueRef {
    fn new(kind: ValueKind) -> Self {
        Self {
            ptr: value::alloc(kind),
        }
    }

    /// The `none` value.
    #[must_use]
    pub fn none() -> Self {
        Self::new(ValueKind::None)
    }

    /// A boolean value.
    #[must_use]
    pub fn boolean(value: bool) -> Self {
        Self::new(ValueKind::Bool(value))
    }

    /// An integer value.
    #[must_use]
    pub fn int(value: i64) -> Self {
        Self::new(ValueKind::Int(value))
    }

    /// A string value.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ValueKind::Str(value.into()))
    }

    /// A list holding the given items.
    #[must_use]
    pub fn list(items: Vec<ValueRef>) -> Self {
        Self::new(ValueKind::List(RefCell::new(items)))
    }

    /// A list of integers. Convenience for tests and benchmarks.
    #[must_use]
    pub fn ints(values: impl IntoIterator<Item = i64>) -> Self {
        Self::list(values.into_iter().map(Self::int).collect())
    }

    /// A named callable backed by a native closure.
    ///
    /// The closure receives the positional arguments and returns a new
    /// owned value or an error, which the engine propagates unchanged.
    #[must_use]
    pub fn function(
        name: impl Into<String>,
        body: impl Fn(&[ValueRef]) -> Result<ValueRef, HostError> + 'static,
    ) -> Self {
        Self::new(ValueKind::Function(NativeFunction::new(name.into(), body)))
    }

    /// A lazy iterator over the half-open integer range `start..end`.
    #[must_use]
    pub fn range(start: i64, end: i64) -> Self {
        Self::new(ValueKind::Range(RefCell::new(RangeIter { next: start, end })))
    }

    /// An iterator driven by a closure, advertising `hint` as its length
    /// hint. Yielding `Some(Err(_))` injects an advance failure.
    #[must_use]
    pub fn generator(
        hint: usize,
        advance: impl FnMut() -> Option<Result<ValueRef, HostError>> + 'static,
    ) -> Self {
        Self::new(ValueKind::GenIter(RefCell::new(GenIter {
            hint,
            advance: Box::new(advance),
        })))
    }

    /// A value whose truthiness runs the given closure and may fail.
    #[must_use]
    pub fn custom(
        type_name: impl Into<String>,
        truthy: impl Fn() -> Result<bool, HostError> + 'static,
    ) -> Self {
        Self::new(ValueKind::Custom(CustomValue::new(type_name.into(), truthy)))
    }

    pub(crate) fn seq_iter(items: Vec<ValueRef>) -> Self {
        Self::new(ValueKind::SeqIter(RefCell::new(SeqIter { items, pos: 0 })))
    }

    pub(crate) fn fused(state: FusedState) -> Self {
        Self::new(ValueKind::Fused(RefCell::new(state)))
    }

    pub(crate) fn kind(&self) -> &ValueKind {
        // SAFETY: the pointer is live for as long as this handle exists.
        unsafe { self.ptr.as_ref() }.kind()
    }

    /// Host-visible type name, as used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.kind().type_name()
    }

    /// Whether the value can be invoked.
    #[must_use]
    pub fn is_callable(&self) -> bool {
        matches!(self.kind(), ValueKind::Function(_))
    }

    /// The integer payload, if this is an integer.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self.kind() {
            ValueKind::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// The boolean payload, if this is a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self.kind() {
            ValueKind::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// The string payload, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self.kind() {
            ValueKind::Str(value) => Some(value),
            _ => None,
        }
    }

    /// The callable's name, if this is a callable.
    #[must_use]
    pub fn function_name(&self) -> Option<&str> {
        match self.kind() {
            ValueKind::Function(function) => Some(&function.name),
            _ => None,
        }
    }

    /// A snapshot of the items, if this is a list.
    #[must_use]
    pub fn list_items(&self) -> Option<Vec<ValueRef>> {
        match self.kind() {
            ValueKind::List(items) => Some(items.borrow().clone()),
            _ => None,
        }
    }

    /// Identity comparison: do both handles refer to the same value?
    #[must_use]
    pub fn is(&self, other: &ValueRef) -> bool {
        self.ptr == other.ptr
    }

    /// Current reference count.
    #[must_use]
    pub fn refcount(&self) -> usize {
        // SAFETY: the pointer is live for as long as this handle exists.
        unsafe { self.ptr.as_ref() }.refcount()
    }

    /// The raw pointer, without transferring ownership.
    #[must_use]
    pub fn as_ptr(&self) -> *mut RawValue {
        self.ptr.as_ptr()
    }

    /// Transfers ownership of one reference to the caller.
    #[must_use]
    pub fn into_raw(self) -> *mut RawValue {
        let ptr = self.ptr.as_ptr();
        std::mem::forget(self);
        ptr
    }

    /// Adopts ownership of one reference from a raw pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live host value and carry a reference that
    /// the caller owns and is transferring to the returned handle.
    #[must_use]
    pub unsafe fn from_raw(ptr: *mut RawValue) -> Self {
        Self {
            // SAFETY: caller guarantees the pointer is live, hence non-null.
            ptr: unsafe { NonNull::new_unchecked(ptr) },
        }
    }
}

impl Clone for ValueRef {
    fn clone(&self) -> Self {
        // SAFETY: the pointer is live for as long as this handle exists.
        unsafe { self.ptr.as_ref() }.acquire();
        Self { ptr: self.ptr }
    }
}

impl Drop for ValueRef {
    fn drop(&mut self) {
        // SAFETY: this handle owns one reference; when the count reaches
        // zero no other handle remains and the allocation can be freed.
        unsafe {
            if self.ptr.as_ref().release() == 0 {
                value::dealloc(self.ptr.as_ptr());
            }
        }
    }
}

impl fmt::Debug for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind().fmt(f)
    }
}
