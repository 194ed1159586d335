//! Host error type and the pending-error slot.
//!
//! Safe Rust code propagates [`HostError`] through `Result`. Native code
//! cannot; the compiled pull signals failure by returning null (or a
//! negative tri-state) after stashing the error in a thread-local slot,
//! the same protocol the host's own C boundary uses. [`raise`], [`take`],
//! [`clear`] and [`occurred`] manage that slot.

use std::cell::RefCell;

/// Errors surfaced by the host runtime and the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// A value was used where another host type was required.
    #[error("type error: {0}")]
    Type(String),

    /// The upstream iterator failed to advance.
    #[error("iterator advance failed: {0}")]
    Source(String),

    /// A user callable raised.
    #[error("callable raised: {0}")]
    Callable(String),

    /// The truthiness protocol failed on a filter's result.
    #[error("truthiness check failed: {0}")]
    Truthiness(String),

    /// A builder entry point received the wrong number of arguments.
    #[error("{callee}() expects {expected} arguments, got {got}")]
    Argument {
        /// Name of the entry point.
        callee: String,
        /// Number of arguments it requires.
        expected: usize,
        /// Number of arguments it received.
        got: usize,
    },

    /// Pipeline compilation failed.
    #[error("pipeline compilation failed: {0}")]
    Config(String),
}

thread_local! {
    static PENDING: RefCell<Option<HostError>> = const { RefCell::new(None) };
}

/// Stores `error` as the pending host error, replacing any previous one.
pub fn raise(error: HostError) {
    PENDING.with(|slot| *slot.borrow_mut() = Some(error));
}

/// Removes and returns the pending host error.
pub fn take() -> Option<HostError> {
    PENDING.with(|slot| slot.borrow_mut().take())
}

/// Discards the pending host error, if any.
pub fn clear() {
    let _ = take();
}

/// Whether a host error is pending.
#[must_use]
pub fn occurred() -> bool {
    PENDING.with(|slot| slot.borrow().is_some())
}
