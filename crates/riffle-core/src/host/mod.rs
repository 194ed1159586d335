//! Minimal single-threaded host runtime the engine executes against.
//!
//! Pipelines operate on opaque, reference-counted host values: callables,
//! iterables, iterators, scalars. This module provides that object model
//! and the primitives the engine consumes.
//!
//! # Components
//!
//! - [`value`]: reference-counted [`RawValue`] heap objects with the count
//!   as the leading field, so native code can release values directly
//! - [`handle`]: the owning [`ValueRef`] smart handle
//! - [`error`]: [`HostError`] plus the thread-local pending-error slot
//!   used across the native-code boundary
//! - [`runtime`]: iterator, call, truthiness, length-hint and list
//!   primitives
//! - [`abi`] (requires the `jit` feature): `extern "C"` shims imported by
//!   compiled pipelines

pub mod error;
pub mod handle;
pub mod runtime;
pub mod value;

#[cfg(feature = "jit")]
pub mod abi;

pub use error::HostError;
pub use handle::ValueRef;
pub use value::{live_values, RawValue};
