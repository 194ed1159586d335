//! Pipeline data model: step nodes and the fused step sequence.
//!
//! A [`Pipeline`] is an ordered sequence of [`StepNode`]s applied to every
//! element drawn from an owned source iterator; `steps[0]` runs first.
//! Construction enforces the single rewrite rule the engine performs:
//! two adjacent map steps are merged into one whose callable is their
//! composition, produced by an external compose collaborator. Nothing is
//! ever rewritten across a filter boundary, and filters are never merged
//! with filters.
//!
//! # Components
//!
//! - [`StepKind`]: map or filter
//! - [`StepNode`]: one step with its owned callable
//! - [`Pipeline`]: the step sequence plus the source handle, with
//!   map-over-map fusion applied eagerly on [`Pipeline::extend`]

pub mod interp;

use tracing::{debug, trace};

use crate::host::{error, runtime, HostError, ValueRef};

/// The kind of operation a step performs.
///
/// The discriminants are dense so the tag can index per-kind tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StepKind {
    /// Replace the element with `callable(element)`.
    Map = 0,
    /// Keep the element iff `callable(element)` is truthy.
    Filter = 1,
}

impl StepKind {
    /// The host-visible name of the kind: `"map"` or `"filter"`.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Map => "map",
            Self::Filter => "filter",
        }
    }
}

/// One operation in a pipeline: a kind tag plus an owned callable.
///
/// Cloning a node acquires another reference to its callable; dropping it
/// releases one. Exactly one net acquisition per live copy.
#[derive(Debug, Clone)]
pub struct StepNode {
    function: ValueRef,
    kind: StepKind,
}

impl StepNode {
    /// Creates a step owning a reference to `function`.
    #[must_use]
    pub fn new(function: ValueRef, kind: StepKind) -> Self {
        Self { function, kind }
    }

    /// The step's callable.
    #[must_use]
    pub fn function(&self) -> &ValueRef {
        &self.function
    }

    /// The step's kind.
    #[must_use]
    pub fn kind(&self) -> StepKind {
        self.kind
    }

    /// Applies the step's callable to one element.
    ///
    /// # Errors
    ///
    /// Propagates whatever the callable raises.
    pub fn apply(&self, element: &ValueRef) -> Result<ValueRef, HostError> {
        runtime::call_one(&self.function, element)
    }

    /// Swaps the callable. Only fusion does this.
    fn replace_function(&mut self, function: ValueRef) {
        self.function = function;
    }
}

/// An ordered step sequence over an owned source iterator.
///
/// Invariants after construction: at least one step; the source is a valid
/// iterator handle; no two adjacent map steps remain unless the compose
/// collaborator failed for that pair; the sequence is never mutated again.
#[derive(Debug)]
pub struct Pipeline {
    steps: Vec<StepNode>,
    source: ValueRef,
}

impl Pipeline {
    /// Builds a single-step pipeline over an iterator obtained from
    /// `iterable`.
    ///
    /// # Errors
    ///
    /// Propagates the host error if `iterable` cannot produce an iterator.
    pub fn over(function: ValueRef, kind: StepKind, iterable: &ValueRef) -> Result<Self, HostError> {
        let source = runtime::get_iterator(iterable)?;
        Ok(Self {
            steps: vec![StepNode::new(function, kind)],
            source,
        })
    }

    /// Builds a pipeline that appends one step to `tail`, sharing its
    /// source.
    ///
    /// When both the new step and `tail`'s last step are maps, the two are
    /// fused: `compose(new, last)` replaces the last callable in place and
    /// the step count does not grow. If the compose collaborator fails,
    /// the failure is absorbed — the pending host error is cleared and the
    /// step is appended unfused, so construction always makes progress.
    #[must_use]
    pub fn extend(tail: &Pipeline, function: ValueRef, kind: StepKind, compose: &ValueRef) -> Self {
        let mut steps = tail.steps.clone();
        let source = tail.source.clone();

        if kind == StepKind::Map {
            // `last` is always present: pipelines never have zero steps.
            if let Some(last) = steps.last_mut() {
                if last.kind() == StepKind::Map {
                    let args = [function.clone(), last.function().clone()];
                    match runtime::call(compose, &args) {
                        Ok(composed) => {
                            trace!("fused adjacent map steps");
                            last.replace_function(composed);
                            return Self { steps, source };
                        }
                        Err(err) => {
                            debug!(error = %err, "compose failed; appending unfused map step");
                            error::clear();
                        }
                    }
                }
            }
        }

        steps.push(StepNode::new(function, kind));
        Self { steps, source }
    }

    /// The steps in application order.
    #[must_use]
    pub fn steps(&self) -> &[StepNode] {
        &self.steps
    }

    /// Number of steps.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// The owned source iterator handle.
    #[must_use]
    pub fn source(&self) -> &ValueRef {
        &self.source
    }
}
