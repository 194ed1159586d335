//! Public fused-iterator surface.
//!
//! [`map`] and [`filter`] build or extend pipelines: handing them a value
//! that is already a fused iterator extends its pipeline (applying the
//! fusion rewrite) instead of nesting iterators, so a whole chain of
//! builder calls collapses into one step vector over one source.
//!
//! Each [`FusedIterator`] owns dispatcher state deciding, once, on the
//! first pull, whether elements are produced by the interpreter or by a
//! natively compiled pull function (`jit` feature). Terminal states are
//! sticky: after exhaustion or an error the iterator reports exhaustion
//! without touching its source again.
//!
//! # Components
//!
//! - [`Builder`]: builder entry points bound to a compose collaborator and
//!   a [`CompilePolicy`]
//! - [`FusedIterator`]: the public iterator handle
//! - [`policy`]: the execution-strategy policy

pub mod policy;

use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;

#[cfg(feature = "jit")]
use tracing::debug;

use crate::compose;
use crate::host::value::ValueKind;
use crate::host::{runtime, HostError, ValueRef};
use crate::pipeline::{interp, Pipeline, StepKind};

pub use policy::{CompileMode, CompilePolicy};

#[cfg(feature = "jit")]
use crate::compiler::next::CompiledNext;

/// Lazily applies `function` to every element of `iterable`.
///
/// Uses the default compose collaborator and [`CompilePolicy`]; see
/// [`Builder`] to customize either.
///
/// # Errors
///
/// Propagates the host error if `iterable` cannot produce an iterator.
pub fn map(function: &ValueRef, iterable: &ValueRef) -> Result<FusedIterator, HostError> {
    Builder::default().map(function, iterable)
}

/// Lazily filters `iterable` down to elements where `predicate(element)`
/// is truthy.
///
/// # Errors
///
/// Propagates the host error if `iterable` cannot produce an iterator.
pub fn filter(predicate: &ValueRef, iterable: &ValueRef) -> Result<FusedIterator, HostError> {
    Builder::default().filter(predicate, iterable)
}

/// Builder entry points bound to a compose collaborator and a policy.
///
/// The default wires in [`compose::compose`] and the default
/// [`CompilePolicy`]; tests and embedders can substitute either — a
/// failing compose degrades map-over-map fusion to plain appends without
/// changing results, and [`CompileMode::Always`] forces compilation on
/// streams of any size.
#[derive(Clone)]
pub struct Builder {
    compose: ValueRef,
    policy: CompilePolicy,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            compose: compose::compose(),
            policy: CompilePolicy::default(),
        }
    }
}

impl Builder {
    /// Builder with the default compose collaborator and policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the compose collaborator used for map-over-map fusion.
    #[must_use]
    pub fn with_compose(mut self, compose: ValueRef) -> Self {
        self.compose = compose;
        self
    }

    /// Replaces the execution-strategy policy.
    #[must_use]
    pub fn with_policy(mut self, policy: CompilePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builds or extends a pipeline with a map step.
    ///
    /// # Errors
    ///
    /// Propagates the host error if `iterable` cannot produce an iterator.
    pub fn map(&self, function: &ValueRef, iterable: &ValueRef) -> Result<FusedIterator, HostError> {
        self.build(function, StepKind::Map, iterable)
    }

    /// Builds or extends a pipeline with a filter step.
    ///
    /// # Errors
    ///
    /// Propagates the host error if `iterable` cannot produce an iterator.
    pub fn filter(
        &self,
        predicate: &ValueRef,
        iterable: &ValueRef,
    ) -> Result<FusedIterator, HostError> {
        self.build(predicate, StepKind::Filter, iterable)
    }

    /// Exposes [`Builder::map`] as a host callable taking exactly
    /// `(function, iterable)`.
    #[must_use]
    pub fn map_callable(&self) -> ValueRef {
        self.entry_point("map", StepKind::Map)
    }

    /// Exposes [`Builder::filter`] as a host callable taking exactly
    /// `(predicate, iterable)`.
    #[must_use]
    pub fn filter_callable(&self) -> ValueRef {
        self.entry_point("filter", StepKind::Filter)
    }

    fn entry_point(&self, name: &'static str, kind: StepKind) -> ValueRef {
        let builder = self.clone();
        ValueRef::function(name, move |args| {
            let [function, iterable] = args else {
                return Err(HostError::Argument {
                    callee: name.into(),
                    expected: 2,
                    got: args.len(),
                });
            };
            builder
                .build(function, kind, iterable)
                .map(FusedIterator::into_object)
        })
    }

    fn build(
        &self,
        function: &ValueRef,
        kind: StepKind,
        iterable: &ValueRef,
    ) -> Result<FusedIterator, HostError> {
        let pipeline = match iterable.kind() {
            ValueKind::Fused(state) => {
                let tail = state.borrow();
                Pipeline::extend(&tail.pipeline, function.clone(), kind, &self.compose)
            }
            _ => Pipeline::over(function.clone(), kind, iterable)?,
        };

        Ok(FusedIterator {
            object: ValueRef::fused(FusedState {
                pipeline,
                policy: self.policy.clone(),
                dispatch: Dispatch::Fresh,
            }),
        })
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Where elements come from, and whether the stream has terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// No pull yet; the strategy decision is still pending.
    Fresh,
    /// Elements are produced by the interpreter.
    Interpreted,
    /// Elements are produced by compiled code.
    Compiled,
    /// The source is exhausted.
    Exhausted,
    /// A pull failed; the stream is dead.
    Errored,
}

enum Dispatch {
    Fresh,
    Interpreted,
    #[cfg(feature = "jit")]
    Compiled(CompiledNext),
    Exhausted,
    Errored,
}

/// Dispatcher state behind one fused iterator object.
pub(crate) struct FusedState {
    pipeline: Pipeline,
    policy: CompilePolicy,
    dispatch: Dispatch,
}

impl FusedState {
    pub(crate) fn source(&self) -> &ValueRef {
        self.pipeline.source()
    }

    /// Pulls one element, deciding the execution strategy on first use and
    /// latching terminal states.
    pub(crate) fn pull(&mut self) -> Result<Option<ValueRef>, HostError> {
        let result = loop {
            match &mut self.dispatch {
                Dispatch::Fresh => match self.select_strategy() {
                    Ok(dispatch) => self.dispatch = dispatch,
                    Err(err) => {
                        self.dispatch = Dispatch::Errored;
                        return Err(err);
                    }
                },
                Dispatch::Interpreted => break interp::next(&self.pipeline),
                #[cfg(feature = "jit")]
                Dispatch::Compiled(compiled) => break compiled.call(self.pipeline.source()),
                Dispatch::Exhausted | Dispatch::Errored => return Ok(None),
            }
        };

        match &result {
            Ok(None) => self.dispatch = Dispatch::Exhausted,
            Err(_) => self.dispatch = Dispatch::Errored,
            Ok(Some(_)) => {}
        }
        result
    }

    #[cfg(feature = "jit")]
    fn select_strategy(&self) -> Result<Dispatch, HostError> {
        match self.policy.mode {
            CompileMode::Never => Ok(Dispatch::Interpreted),
            CompileMode::Always => self.compile(),
            CompileMode::Auto => {
                let steps = self.pipeline.step_count();
                let hint = runtime::length_hint(self.pipeline.source());
                if steps < self.policy.min_steps || hint < self.policy.min_source_hint {
                    debug!(steps, hint, "below compile thresholds; interpreting");
                    Ok(Dispatch::Interpreted)
                } else {
                    self.compile()
                }
            }
        }
    }

    #[cfg(feature = "jit")]
    fn compile(&self) -> Result<Dispatch, HostError> {
        match crate::compiler::next::compile(self.pipeline.steps()) {
            Ok(compiled) => {
                debug!(steps = self.pipeline.step_count(), "compiled fused pull");
                Ok(Dispatch::Compiled(compiled))
            }
            Err(err) => Err(HostError::Config(err.to_string())),
        }
    }

    #[cfg(not(feature = "jit"))]
    fn select_strategy(&self) -> Result<Dispatch, HostError> {
        // Policy modes are advisory without a compiler backend.
        _ = self.policy.mode;
        Ok(Dispatch::Interpreted)
    }

    fn dispatch_state(&self) -> DispatchState {
        match self.dispatch {
            Dispatch::Fresh => DispatchState::Fresh,
            Dispatch::Interpreted => DispatchState::Interpreted,
            #[cfg(feature = "jit")]
            Dispatch::Compiled(_) => DispatchState::Compiled,
            Dispatch::Exhausted => DispatchState::Exhausted,
            Dispatch::Errored => DispatchState::Errored,
        }
    }
}

/// A lazy iterator over a fused map/filter pipeline.
///
/// The handle wraps a shared host object — cloning it, or passing it back
/// to a builder, shares the underlying stream rather than restarting it.
/// It dereferences to the host [`ValueRef`] so it can be used anywhere an
/// iterable host value is expected.
#[derive(Clone)]
pub struct FusedIterator {
    object: ValueRef,
}

impl FusedIterator {
    /// Pulls the next element.
    ///
    /// `Ok(None)` signals exhaustion; after exhaustion or an error every
    /// further pull returns `Ok(None)` without touching the source.
    ///
    /// # Errors
    ///
    /// Propagates source, callable, truthiness, and compilation errors.
    ///
    /// # Panics
    ///
    /// Panics if called re-entrantly from a callable currently executing
    /// inside this same iterator.
    pub fn pull(&self) -> Result<Option<ValueRef>, HostError> {
        self.state_cell().borrow_mut().pull()
    }

    /// Drains the stream into a host list.
    ///
    /// Semantically identical to repeated [`pull`](Self::pull) calls; on a
    /// mid-stream error the partial list is released and the error
    /// returned.
    ///
    /// # Errors
    ///
    /// See [`pull`](Self::pull).
    pub fn to_list(&self) -> Result<ValueRef, HostError> {
        let out = runtime::list_new();
        while let Some(element) = self.pull()? {
            runtime::list_append(&out, element)?;
        }
        Ok(out)
    }

    /// Snapshot of the retained steps as `(kind_name, callable)` pairs,
    /// in application order. Kind names are `"map"` and `"filter"`.
    ///
    /// Later chaining does not grow this snapshot: extending a pipeline
    /// builds a new iterator.
    #[must_use]
    pub fn steps(&self) -> Vec<(&'static str, ValueRef)> {
        self.state_cell()
            .borrow()
            .pipeline
            .steps()
            .iter()
            .map(|step| (step.kind().name(), step.function().clone()))
            .collect()
    }

    /// Current dispatcher state.
    #[must_use]
    pub fn state(&self) -> DispatchState {
        self.state_cell().borrow().dispatch_state()
    }

    /// The underlying host object.
    #[must_use]
    pub fn as_object(&self) -> &ValueRef {
        &self.object
    }

    /// Consumes the handle, returning the underlying host object.
    #[must_use]
    pub fn into_object(self) -> ValueRef {
        self.object
    }

    fn state_cell(&self) -> &RefCell<FusedState> {
        match self.object.kind() {
            ValueKind::Fused(state) => state,
            _ => unreachable!("fused iterator handle over a non-fused value"),
        }
    }
}

impl Deref for FusedIterator {
    type Target = ValueRef;

    fn deref(&self) -> &ValueRef {
        &self.object
    }
}

impl Iterator for FusedIterator {
    type Item = Result<ValueRef, HostError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.pull().transpose()
    }
}

impl fmt::Debug for FusedIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FusedIterator")
            .field("steps", &self.state_cell().borrow().pipeline.step_count())
            .field("state", &self.state())
            .finish()
    }
}
