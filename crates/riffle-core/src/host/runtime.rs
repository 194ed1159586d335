//! Safe host-runtime primitives.
//!
//! The operations the engine needs from its host: materialize an iterator,
//! advance it, invoke a callable, test truthiness, estimate length, and
//! build lists. The interpreter calls these directly; compiled code reaches
//! the same behavior through the C-ABI shims in [`super::abi`].

use super::error::HostError;
use super::handle::ValueRef;
use super::value::ValueKind;

/// Materializes an iterator from any iterable value.
///
/// Iterators (including fused ones) return themselves; lists return a
/// fresh iterator over a snapshot of their items.
///
/// # Errors
///
/// Returns [`HostError::Type`] if the value is not iterable.
pub fn get_iterator(iterable: &ValueRef) -> Result<ValueRef, HostError> {
    match iterable.kind() {
        ValueKind::List(items) => Ok(ValueRef::seq_iter(items.borrow().clone())),
        ValueKind::SeqIter(_)
        | ValueKind::Range(_)
        | ValueKind::GenIter(_)
        | ValueKind::Fused(_) => Ok(iterable.clone()),
        _ => Err(HostError::Type(format!(
            "'{}' object is not iterable",
            iterable.type_name()
        ))),
    }
}

/// Advances an iterator. `Ok(None)` signals exhaustion.
///
/// # Errors
///
/// Returns [`HostError::Type`] if the value is not an iterator, or
/// whatever error the iterator itself raises while advancing.
pub fn iterator_next(iterator: &ValueRef) -> Result<Option<ValueRef>, HostError> {
    match iterator.kind() {
        ValueKind::SeqIter(state) => {
            let mut state = state.borrow_mut();
            if state.pos < state.items.len() {
                let item = state.items[state.pos].clone();
                state.pos += 1;
                Ok(Some(item))
            } else {
                Ok(None)
            }
        }
        ValueKind::Range(state) => {
            let mut state = state.borrow_mut();
            if state.next < state.end {
                let value = state.next;
                state.next += 1;
                Ok(Some(ValueRef::int(value)))
            } else {
                Ok(None)
            }
        }
        ValueKind::GenIter(state) => (state.borrow_mut().advance)().transpose(),
        ValueKind::Fused(state) => state.borrow_mut().pull(),
        _ => Err(HostError::Type(format!(
            "'{}' object is not an iterator",
            iterator.type_name()
        ))),
    }
}

/// Invokes a callable with positional arguments.
///
/// # Errors
///
/// Returns [`HostError::Type`] if the value is not callable, or whatever
/// error the callable raises.
pub fn call(callable: &ValueRef, args: &[ValueRef]) -> Result<ValueRef, HostError> {
    match callable.kind() {
        ValueKind::Function(function) => function.invoke(args),
        _ => Err(HostError::Type(format!(
            "'{}' object is not callable",
            callable.type_name()
        ))),
    }
}

/// Invokes a callable with a single argument.
///
/// # Errors
///
/// See [`call`].
pub fn call_one(callable: &ValueRef, arg: &ValueRef) -> Result<ValueRef, HostError> {
    call(callable, std::slice::from_ref(arg))
}

/// Truthiness of a host value.
///
/// # Errors
///
/// Only values with a user-defined truthiness protocol can fail here.
pub fn truthy(value: &ValueRef) -> Result<bool, HostError> {
    match value.kind() {
        ValueKind::None => Ok(false),
        ValueKind::Bool(b) => Ok(*b),
        ValueKind::Int(i) => Ok(*i != 0),
        ValueKind::Str(s) => Ok(!s.is_empty()),
        ValueKind::List(items) => Ok(!items.borrow().is_empty()),
        ValueKind::Custom(custom) => custom.truthy(),
        ValueKind::Function(_)
        | ValueKind::SeqIter(_)
        | ValueKind::Range(_)
        | ValueKind::GenIter(_)
        | ValueKind::Fused(_) => Ok(true),
    }
}

/// Boolean negation: `Ok(true)` means the value is falsy.
///
/// # Errors
///
/// See [`truthy`].
pub fn object_not(value: &ValueRef) -> Result<bool, HostError> {
    truthy(value).map(|t| !t)
}

/// Best-effort size estimate for an iterable; `0` when unknown.
#[must_use]
pub fn length_hint(value: &ValueRef) -> usize {
    match value.kind() {
        ValueKind::List(items) => items.borrow().len(),
        ValueKind::SeqIter(state) => {
            let state = state.borrow();
            state.items.len() - state.pos
        }
        ValueKind::Range(state) => {
            let state = state.borrow();
            usize::try_from(state.end - state.next).unwrap_or(0)
        }
        ValueKind::GenIter(state) => state.borrow().hint,
        ValueKind::Fused(state) => {
            let state = state.borrow();
            length_hint(state.source())
        }
        _ => 0,
    }
}

/// A fresh empty host list.
#[must_use]
pub fn list_new() -> ValueRef {
    ValueRef::list(Vec::new())
}

/// Appends an owned value to a host list.
///
/// # Errors
///
/// Returns [`HostError::Type`] if `list` is not a list.
pub fn list_append(list: &ValueRef, value: ValueRef) -> Result<(), HostError> {
    match list.kind() {
        ValueKind::List(items) => {
            items.borrow_mut().push(value);
            Ok(())
        }
        _ => Err(HostError::Type(format!(
            "'{}' object is not a list",
            list.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_iteration_round_trip() {
        let list = ValueRef::ints([1, 2, 3]);
        let iter = get_iterator(&list).unwrap();

        let mut seen = Vec::new();
        while let Some(item) = iterator_next(&iter).unwrap() {
            seen.push(item.as_i64().unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(iterator_next(&iter).unwrap().is_none());
    }

    #[test]
    fn list_iterator_is_a_snapshot() {
        let list = ValueRef::ints([1]);
        let iter = get_iterator(&list).unwrap();
        list_append(&list, ValueRef::int(2)).unwrap();

        let mut count = 0;
        while iterator_next(&iter).unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
        assert_eq!(list.list_items().unwrap().len(), 2);
    }

    #[test]
    fn iterators_return_themselves() {
        let range = ValueRef::range(0, 3);
        let iter = get_iterator(&range).unwrap();
        assert!(iter.is(&range));
    }

    #[test]
    fn non_iterables_are_rejected() {
        let err = get_iterator(&ValueRef::int(5)).unwrap_err();
        assert_eq!(err, HostError::Type("'int' object is not iterable".into()));
    }

    #[test]
    fn range_yields_and_exhausts() {
        let range = ValueRef::range(2, 5);
        assert_eq!(iterator_next(&range).unwrap().unwrap().as_i64(), Some(2));
        assert_eq!(iterator_next(&range).unwrap().unwrap().as_i64(), Some(3));
        assert_eq!(iterator_next(&range).unwrap().unwrap().as_i64(), Some(4));
        assert!(iterator_next(&range).unwrap().is_none());
    }

    #[test]
    fn generator_propagates_advance_errors() {
        let mut emitted = false;
        let gen = ValueRef::generator(0, move || {
            if emitted {
                Some(Err(HostError::Source("stream torn down".into())))
            } else {
                emitted = true;
                Some(Ok(ValueRef::int(1)))
            }
        });
        assert_eq!(iterator_next(&gen).unwrap().unwrap().as_i64(), Some(1));
        assert_eq!(
            iterator_next(&gen).unwrap_err(),
            HostError::Source("stream torn down".into())
        );
    }

    #[test]
    fn call_invokes_and_propagates() {
        let double = ValueRef::function("double", |args| {
            let value = args[0].as_i64().unwrap();
            Ok(ValueRef::int(value * 2))
        });
        let result = call_one(&double, &ValueRef::int(21)).unwrap();
        assert_eq!(result.as_i64(), Some(42));

        let raising = ValueRef::function("raising", |_| Err(HostError::Callable("no".into())));
        assert_eq!(
            call_one(&raising, &ValueRef::int(0)).unwrap_err(),
            HostError::Callable("no".into())
        );

        assert_eq!(
            call_one(&ValueRef::int(1), &ValueRef::int(0)).unwrap_err(),
            HostError::Type("'int' object is not callable".into())
        );
    }

    #[test]
    fn truthiness_by_kind() {
        assert!(!truthy(&ValueRef::none()).unwrap());
        assert!(!truthy(&ValueRef::int(0)).unwrap());
        assert!(truthy(&ValueRef::int(-1)).unwrap());
        assert!(!truthy(&ValueRef::boolean(false)).unwrap());
        assert!(!truthy(&ValueRef::string("")).unwrap());
        assert!(truthy(&ValueRef::string("x")).unwrap());
        assert!(!truthy(&ValueRef::list(vec![])).unwrap());
        assert!(truthy(&ValueRef::ints([1])).unwrap());
        assert!(truthy(&ValueRef::range(0, 0)).unwrap());
    }

    #[test]
    fn custom_truthiness_can_fail() {
        let touchy = ValueRef::custom("touchy", || {
            Err(HostError::Truthiness("refusing to convert".into()))
        });
        assert_eq!(
            object_not(&touchy).unwrap_err(),
            HostError::Truthiness("refusing to convert".into())
        );
    }

    #[test]
    fn object_not_negates() {
        assert!(object_not(&ValueRef::int(0)).unwrap());
        assert!(!object_not(&ValueRef::int(9)).unwrap());
    }

    #[test]
    fn length_hints() {
        assert_eq!(length_hint(&ValueRef::ints([1, 2, 3])), 3);
        assert_eq!(length_hint(&ValueRef::range(0, 50_000_000)), 50_000_000);
        assert_eq!(length_hint(&ValueRef::generator(7, || None)), 7);
        assert_eq!(length_hint(&ValueRef::int(1)), 0);

        let iter = get_iterator(&ValueRef::ints([1, 2, 3])).unwrap();
        iterator_next(&iter).unwrap();
        assert_eq!(length_hint(&iter), 2);
    }
}
