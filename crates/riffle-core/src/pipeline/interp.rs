//! Interpreted element pull.
//!
//! Walks the step vector for each element drawn from the source: maps
//! replace the element, filters test truthiness and either pass the
//! original element through or drop it and draw again. Each step runs at
//! most once per element that reaches it, and a rejecting filter stops
//! the walk before any downstream step.
//!
//! Handle discipline falls out of ownership: every value this loop holds
//! is an owned local, so any early return — exhaustion, a raising
//! callable, a failing truthiness check — releases exactly what was
//! acquired on the way.

use crate::host::{runtime, HostError, ValueRef};

use super::{Pipeline, StepKind};

/// Pulls one element through the pipeline.
///
/// `Ok(None)` signals source exhaustion. On success the caller owns the
/// returned value.
///
/// # Errors
///
/// Propagates source-advance, callable, and truthiness errors unchanged.
pub(crate) fn next(pipeline: &Pipeline) -> Result<Option<ValueRef>, HostError> {
    'stream: loop {
        let Some(mut element) = runtime::iterator_next(pipeline.source())? else {
            return Ok(None);
        };

        for step in pipeline.steps() {
            let applied = step.apply(&element)?;
            match step.kind() {
                StepKind::Map => {
                    // The pre-map element is released here; the mapped
                    // result becomes the element downstream steps see.
                    element = applied;
                }
                StepKind::Filter => {
                    if runtime::object_not(&applied)? {
                        continue 'stream;
                    }
                }
            }
        }

        return Ok(Some(element));
    }
}
