//! Handle Registry Tests
//!
//! - Typed wrap/unwrap for every handle type
//! - Zero handles never produce wrappers
//! - Exactly-once release under concurrent drops

use actor_runtime::Term;
use libp2p_bridge::{BridgeError, HandleRegistry, HandleType, LoopbackLibrary};
use proptest::prelude::*;
use std::sync::Arc;

fn registry() -> (LoopbackLibrary, HandleRegistry) {
    let library = LoopbackLibrary::new();
    let registry = HandleRegistry::new(Arc::new(library.clone()));
    (library, registry)
}

fn any_kind() -> impl Strategy<Value = HandleType> {
    (0..HandleType::ALL.len()).prop_map(|i| HandleType::ALL[i])
}

proptest! {
    #[test]
    fn unwrap_returns_wrapped_handle(kind in any_kind(), other in any_kind(), handle in 1u64..) {
        let (_, registry) = registry();
        let term = registry.wrap(kind, handle).unwrap().to_term();

        prop_assert_eq!(registry.unwrap(&term, kind), Ok(handle));
        if other != kind {
            prop_assert_eq!(
                registry.unwrap(&term, other),
                Err(BridgeError::type_mismatch(other, kind))
            );
        }
    }

    #[test]
    fn zero_handle_never_wraps(kind in any_kind()) {
        let (library, registry) = registry();

        let err = registry.wrap(kind, 0).unwrap_err();
        prop_assert!(matches!(err, BridgeError::InvalidHandle { .. }), "unexpected error {:?}", err);
        prop_assert_eq!(registry.metrics().live(), 0);
        prop_assert_eq!(library.total_releases(), 0);
    }
}

#[test]
fn test_equal_numbers_of_different_types_are_distinct() {
    let (_, registry) = registry();
    let stream = registry.wrap(HandleType::Stream, 7).unwrap().to_term();
    let topic = registry.wrap(HandleType::Topic, 7).unwrap().to_term();

    assert_ne!(stream, topic);
    assert!(registry.unwrap(&stream, HandleType::Topic).is_err());
    assert!(registry.unwrap(&topic, HandleType::Stream).is_err());
}

#[test]
fn test_non_wrapper_values_rejected() {
    let (_, registry) = registry();

    for value in [Term::Int(7), Term::binary("7"), Term::atom("stream"), Term::list(vec![])] {
        let err = registry.unwrap(&value, HandleType::Stream).unwrap_err();
        assert_eq!(err.category(), "argument_decoding", "{value} gave {err:?}");
    }
}

#[test]
fn test_concurrent_drops_release_each_handle_once() {
    const HANDLES: u64 = 2_000;
    const THREADS: usize = 8;

    let (library, registry) = registry();
    let terms: Vec<Term> = (1..=HANDLES)
        .map(|h| registry.wrap(HandleType::Message, h).unwrap().to_term())
        .collect();

    // Every thread holds a clone of every wrapper; the last drop wins
    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let copies = terms.clone();
            std::thread::spawn(move || drop(copies))
        })
        .collect();
    drop(terms);
    for worker in workers {
        worker.join().unwrap();
    }

    for handle in 1..=HANDLES {
        assert_eq!(library.release_count(handle), 1, "handle {handle}");
    }
    assert_eq!(library.total_releases(), HANDLES);
    assert_eq!(registry.metrics().live(), 0);
}

#[test]
fn test_blocking_holder_keeps_handle_alive() {
    let (library, registry) = registry();
    let term = registry.wrap(HandleType::Stream, 3).unwrap().to_term();
    let held = registry.resource(&term, HandleType::Stream).unwrap();

    drop(term);
    assert_eq!(library.release_count(3), 0);
    assert_eq!(held.raw(), 3);

    drop(held);
    assert_eq!(library.release_count(3), 1);
}
