//! Default compose collaborator.
//!
//! Map-over-map fusion delegates the actual merging of two callables to an
//! external compose function; the engine only ever invokes it opaquely and
//! falls back to an unfused step when it fails. This module provides the
//! default collaborator: a wrapper callable equivalent to
//! `x ↦ outer(inner(x))`. Embedders with a cleverer strategy (inlining,
//! specialization) can swap theirs in via
//! [`Builder::with_compose`](crate::stream::Builder::with_compose).

use crate::host::{runtime, HostError, ValueRef};

/// Builds the default compose collaborator.
///
/// The returned callable takes `(outer, inner)` and yields a new callable
/// applying `inner` first. The composition is named after its operands
/// (`"outer_of_inner"`) when both names are known.
#[must_use]
pub fn compose() -> ValueRef {
    ValueRef::function("compose", |args| {
        let [outer, inner] = args else {
            return Err(HostError::Argument {
                callee: "compose".into(),
                expected: 2,
                got: args.len(),
            });
        };
        for operand in [outer, inner] {
            if !operand.is_callable() {
                return Err(HostError::Type(format!(
                    "'{}' object is not callable",
                    operand.type_name()
                )));
            }
        }

        let name = match (outer.function_name(), inner.function_name()) {
            (Some(outer_name), Some(inner_name)) => format!("{outer_name}_of_{inner_name}"),
            _ => "composed".to_owned(),
        };

        let outer = outer.clone();
        let inner = inner.clone();
        Ok(ValueRef::function(name, move |args| {
            let mid = runtime::call(&inner, args)?;
            runtime::call_one(&outer, &mid)
        }))
    })
}
