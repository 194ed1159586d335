//! Compiled and interpreted execution must agree element-for-element,
//! including where errors surface — plus the dispatcher heuristics that
//! pick between them.
//!
//! Run with: cargo test --test jit_equivalence --features jit

#![cfg(feature = "jit")]

use riffle_core::host::{live_values, HostError, ValueRef};
use riffle_core::{map, Builder, CompileMode, CompilePolicy, DispatchState, FusedIterator};

const INPUT: [i64; 8] = [-3, -2, -1, 0, 1, 2, 3, 4];

fn compiled_builder() -> Builder {
    Builder::default().with_policy(CompilePolicy::default().with_mode(CompileMode::Always))
}

fn interpreted_builder() -> Builder {
    Builder::default().with_policy(CompilePolicy::default().with_mode(CompileMode::Never))
}

fn map_fn(i: i64) -> ValueRef {
    ValueRef::function(format!("m{i}"), move |args| {
        Ok(ValueRef::int(args[0].as_i64().unwrap() * 2 + i))
    })
}

fn filter_fn(i: i64) -> ValueRef {
    ValueRef::function(format!("p{i}"), move |args| {
        Ok(ValueRef::boolean((args[0].as_i64().unwrap() + i) % 2 == 0))
    })
}

fn build_chain(builder: &Builder, mask: u32, len: usize, seq: &ValueRef) -> FusedIterator {
    let mut chain: Option<FusedIterator> = None;
    for i in 0..len {
        let i_const = i as i64;
        let tail = chain.take();
        let next = {
            let iterable = match &tail {
                Some(prev) => prev.as_object(),
                None => seq,
            };
            if mask & (1 << i) != 0 {
                builder.map(&map_fn(i_const), iterable)
            } else {
                builder.filter(&filter_fn(i_const), iterable)
            }
        };
        chain = Some(next.unwrap());
    }
    chain.unwrap()
}

/// Pulls to completion, recording the values seen and the terminal event.
fn trace(it: &FusedIterator) -> (Vec<i64>, Option<HostError>) {
    let mut values = Vec::new();
    loop {
        match it.pull() {
            Ok(Some(value)) => values.push(value.as_i64().unwrap()),
            Ok(None) => return (values, None),
            Err(err) => return (values, Some(err)),
        }
    }
}

#[test]
fn compiled_matches_interpreted_for_every_interleaving() {
    for len in 1..=6 {
        for mask in 0..(1u32 << len) {
            let compiled = build_chain(&compiled_builder(), mask, len, &ValueRef::ints(INPUT));
            let interpreted =
                build_chain(&interpreted_builder(), mask, len, &ValueRef::ints(INPUT));

            let compiled_trace = trace(&compiled);
            assert_eq!(compiled.state(), DispatchState::Exhausted);
            assert_eq!(
                compiled_trace,
                trace(&interpreted),
                "mask {mask:#b} len {len}"
            );
        }
    }
}

#[test]
fn compiled_and_interpreted_agree_on_error_points() {
    let explode_on = |bad: i64| {
        ValueRef::function("explode", move |args| {
            let value = args[0].as_i64().unwrap();
            if value == bad {
                Err(HostError::Callable(format!("boom on {bad}")))
            } else {
                Ok(ValueRef::int(value + 1))
            }
        })
    };

    for bad in [-3, 0, 4] {
        let compiled = compiled_builder()
            .map(&explode_on(bad), &ValueRef::ints(INPUT))
            .unwrap();
        let interpreted = interpreted_builder()
            .map(&explode_on(bad), &ValueRef::ints(INPUT))
            .unwrap();
        assert_eq!(trace(&compiled), trace(&interpreted), "bad input {bad}");
        assert_eq!(compiled.state(), DispatchState::Errored);
    }
}

#[test]
fn compiled_and_interpreted_agree_on_truthiness_errors() {
    let touchy_over = |threshold: i64| {
        ValueRef::function("touchy_over", move |args| {
            let value = args[0].as_i64().unwrap();
            if value > threshold {
                Ok(ValueRef::custom("touchy", || {
                    Err(HostError::Truthiness("no bool".into()))
                }))
            } else {
                Ok(ValueRef::boolean(value % 2 == 0))
            }
        })
    };

    let compiled = compiled_builder()
        .filter(&touchy_over(1), &ValueRef::ints(INPUT))
        .unwrap();
    let interpreted = interpreted_builder()
        .filter(&touchy_over(1), &ValueRef::ints(INPUT))
        .unwrap();
    assert_eq!(trace(&compiled), trace(&interpreted));
}

#[test]
fn long_pipelines_over_large_sources_compile_under_auto() {
    // Eleven retained steps (compose refused) over a source advertising
    // 10^8 elements: the first pull pays for compilation, later pulls run
    // native code. Only the head of the stream is consumed.
    let refusing = ValueRef::function("compose", |_| {
        Err(HostError::Type("cannot compose".into()))
    });
    let builder = Builder::default().with_compose(refusing);

    let source = ValueRef::range(0, 100_000_000);
    let mut it = builder.map(&map_fn(0), &source).unwrap();
    for i in 1..11 {
        it = builder.map(&map_fn(i), &it).unwrap();
    }
    assert_eq!(it.steps().len(), 11);
    assert_eq!(it.state(), DispatchState::Fresh);

    let reference = |x: i64| (0..11).fold(x, |v, i| v * 2 + i);
    for x in 0..5 {
        assert_eq!(it.pull().unwrap().unwrap().as_i64(), Some(reference(x)));
        assert_eq!(it.state(), DispatchState::Compiled);
    }
}

#[test]
fn short_pipelines_interpret_under_auto() {
    let it = map(&map_fn(0), &ValueRef::range(0, 100_000_000)).unwrap();
    it.pull().unwrap();
    assert_eq!(it.state(), DispatchState::Interpreted);
}

#[test]
fn small_sources_interpret_under_auto() {
    let refusing = ValueRef::function("compose", |_| {
        Err(HostError::Type("cannot compose".into()))
    });
    let builder = Builder::default().with_compose(refusing);

    let mut it = builder.map(&map_fn(0), &ValueRef::ints(INPUT)).unwrap();
    for i in 1..11 {
        it = builder.map(&map_fn(i), &it).unwrap();
    }
    assert_eq!(it.steps().len(), 11);
    it.pull().unwrap();
    assert_eq!(it.state(), DispatchState::Interpreted);
}

#[test]
fn compilation_pins_callables_for_the_iterator_lifetime() {
    let function = map_fn(1);
    let baseline = function.refcount();

    let it = compiled_builder()
        .map(&function, &ValueRef::ints([1, 2, 3]))
        .unwrap();
    // One reference held by the step node.
    assert_eq!(function.refcount(), baseline + 1);

    it.pull().unwrap();
    assert_eq!(it.state(), DispatchState::Compiled);
    // Compilation pinned one more.
    assert_eq!(function.refcount(), baseline + 2);

    drop(it);
    assert_eq!(function.refcount(), baseline);
}

#[test]
fn compiled_paths_do_not_leak() {
    let baseline = live_values();
    {
        let it = build_chain(&compiled_builder(), 0b0101, 4, &ValueRef::ints(INPUT));
        let (_, terminal) = trace(&it);
        assert!(terminal.is_none());
    }
    {
        let explode = ValueRef::function("explode", |args| {
            if args[0].as_i64().unwrap() == 2 {
                Err(HostError::Callable("boom".into()))
            } else {
                Ok(args[0].clone())
            }
        });
        let it = compiled_builder()
            .map(&explode, &ValueRef::ints(INPUT))
            .unwrap();
        let (_, terminal) = trace(&it);
        assert!(terminal.is_some());
    }
    assert_eq!(live_values(), baseline);
}

#[test]
fn to_list_drains_through_the_compiled_path() {
    let it = build_chain(&compiled_builder(), 0b11, 2, &ValueRef::ints(INPUT));
    let interpreted = build_chain(&interpreted_builder(), 0b11, 2, &ValueRef::ints(INPUT));

    let compiled_out: Vec<i64> = it
        .to_list()
        .unwrap()
        .list_items()
        .unwrap()
        .iter()
        .map(|v| v.as_i64().unwrap())
        .collect();
    let (interpreted_out, _) = trace(&interpreted);

    assert_eq!(it.state(), DispatchState::Exhausted);
    assert_eq!(compiled_out, interpreted_out);
}
