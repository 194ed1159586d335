//! Stream-fusion engine for lazy map/filter pipelines over host-runtime
//! values.
//!
//! Chained [`map`] and [`filter`] calls collapse into a single pipeline —
//! one step vector over one source iterator — so pulling an element costs
//! one source advance plus one callable invocation per retained step,
//! instead of a cascade of nested iterator objects. Adjacent map steps are
//! additionally merged into one step by composing their callables.
//!
//! Two execution strategies share the pipeline representation: an
//! interpreter that walks the step vector, and (behind the `jit` cargo
//! feature) a Cranelift backend that lowers the pipeline to a native pull
//! function. The choice is made once, on the first pull, based on a
//! [`CompilePolicy`].
//!
//! ```
//! use riffle_core::host::ValueRef;
//! use riffle_core::{filter, map};
//!
//! let add_one = ValueRef::function("add_one", |args| {
//!     Ok(ValueRef::int(args[0].as_i64().unwrap() + 1))
//! });
//! let big = ValueRef::function("big", |args| {
//!     Ok(ValueRef::boolean(args[0].as_i64().unwrap() > 2))
//! });
//!
//! let filtered = filter(&big, &ValueRef::ints([1, 2, 3, 4]))?;
//! let it = map(&add_one, &filtered)?;
//! let out = it.to_list()?;
//! let out: Vec<i64> = out
//!     .list_items()
//!     .unwrap()
//!     .iter()
//!     .map(|v| v.as_i64().unwrap())
//!     .collect();
//! assert_eq!(out, vec![4, 5]);
//! # Ok::<(), riffle_core::host::HostError>(())
//! ```
//!
//! # Components
//!
//! - [`host`]: the minimal host runtime the engine executes against
//! - [`pipeline`]: the step sequence, its fusion rule, and the interpreter
//! - [`compose`]: the default compose collaborator for map-over-map fusion
//! - [`stream`]: builder entry points, dispatcher, and the public iterator
//! - [`compiler`] (requires the `jit` feature): the Cranelift backend

pub mod compose;
pub mod host;
pub mod pipeline;
pub mod stream;

#[cfg(feature = "jit")]
pub mod compiler;

pub use pipeline::{Pipeline, StepKind, StepNode};
pub use stream::{filter, map, Builder, CompileMode, CompilePolicy, DispatchState, FusedIterator};
