//! Multi-level stack operations: lock ordering, topology checks, removal.

mod common;

use std::thread;

use common::{harness, start_req, wait_until, Harness};
use velocache_core::{EngineError, Error, InitMode};
use velocache_engine::{CacheInstance, Engine};
use velocache_mngt::sync::SyncCall;
use velocache_mngt::Interruptor;

/// Builds the two-member stack `bottom` <- `top`.
fn build_stack(h: &Harness, bottom: &str, top: &str) {
    let intr = Interruptor::new();
    h.manager
        .start_instance(&start_req(bottom, InitMode::New), &intr)
        .unwrap();
    let mut req = start_req(top, InitMode::New);
    req.lower = Some(velocache_core::CacheName::new(bottom).unwrap());
    h.manager.start_instance(&req, &intr).unwrap();
}

#[test]
fn remove_takes_locks_bottom_up_and_releases_top_down() {
    let h = harness();
    build_stack(&h, "lower", "upper");
    h.engine.clear_events();

    h.manager
        .remove_from_stack("upper", &Interruptor::new())
        .unwrap();

    let events = h.engine.events();
    let pos = |needle: &str| {
        events
            .iter()
            .position(|e| e == needle)
            .unwrap_or_else(|| panic!("missing event {needle} in {events:?}"))
    };
    // Bottom locked before top, survivors released before the target stops.
    assert!(pos("lock:lower") < pos("lock:upper"));
    assert!(pos("lock:upper") < pos("unlock:lower"));
    assert!(pos("stop:upper") < pos("unlock:upper"));

    // The removed member is stopped outright; the survivor keeps running.
    assert_eq!(h.engine.cache_count(), 1);
    assert!(h.engine.get_by_name("lower").is_ok());
    assert!(h.engine.get_by_name("upper").is_err());
    let lower = h.engine.sim_cache("lower").unwrap();
    assert_eq!(lower.lock_counts(), (false, 0, 0));
}

#[test]
fn only_the_topmost_member_can_be_removed() {
    let h = harness();
    build_stack(&h, "lower", "upper");

    let err = h
        .manager
        .remove_from_stack("lower", &Interruptor::new())
        .unwrap_err();
    assert!(matches!(err, Error::NotTopmost { .. }));
    assert_eq!(h.engine.cache_count(), 2);
}

#[test]
fn standalone_instance_is_not_a_stack_member() {
    let h = harness();
    let intr = Interruptor::new();
    h.manager
        .start_instance(&start_req("solo", InitMode::New), &intr)
        .unwrap();
    let err = h.manager.remove_from_stack("solo", &intr).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig { .. }));
}

#[test]
fn concurrent_read_lock_blocks_removal_until_released() {
    let h = harness();
    build_stack(&h, "lower", "upper");
    let lower = h.engine.sim_cache("lower").unwrap();

    // A reader (stats scrape, say) holds the bottom member.
    let (grant, completer) = SyncCall::new();
    lower.read_lock(completer.into_callback());
    assert!(grant.wait().is_ok());

    let remover = {
        let manager = h.manager.clone();
        thread::spawn(move || manager.remove_from_stack("upper", &Interruptor::new()))
    };
    // The removal queues behind the reader instead of completing.
    wait_until("writer queued behind reader", || {
        lower.lock_counts().2 > 0
    });
    assert_eq!(h.engine.cache_count(), 2);

    lower.read_unlock();
    remover.join().unwrap().unwrap();
    assert_eq!(h.engine.cache_count(), 1);
}

#[test]
fn topology_change_under_the_locks_is_detected() {
    let h = harness();
    build_stack(&h, "lower", "upper");
    let intr = Interruptor::new();
    h.manager
        .start_instance(&start_req("third", InitMode::New), &intr)
        .unwrap();

    let lower = h.engine.sim_cache("lower").unwrap();

    // Hold the bottom lock so the removal blocks mid lock pass.
    let (grant, completer) = SyncCall::new();
    lower.lock(completer.into_callback());
    assert!(grant.wait().is_ok());

    let remover = {
        let manager = h.manager.clone();
        thread::spawn(move || manager.remove_from_stack("upper", &Interruptor::new()))
    };
    wait_until("removal queued on bottom lock", || {
        lower.lock_counts().2 > 0
    });

    // The stack grows while the removal is still waiting: "third" joins on
    // top of "upper".
    let upper = h.engine.get_by_name("upper").unwrap();
    let third = h.engine.get_by_name("third").unwrap();
    let (joined, completer) = SyncCall::new();
    h.engine
        .ml_add_cache(&upper, &third, completer.into_callback());
    assert!(joined.wait().is_ok());

    lower.unlock();
    let err = remover.join().unwrap().unwrap_err();
    assert!(matches!(err, Error::TopologyChanged { .. }));

    // Everything was released; all three instances are intact and lockable.
    assert_eq!(h.engine.cache_count(), 3);
    for name in ["lower", "upper", "third"] {
        let sim = h.engine.sim_cache(name).unwrap();
        wait_until("all locks released", || sim.lock_counts() == (false, 0, 0));
    }
}

#[test]
fn removal_failure_unlocks_every_member() {
    let h = harness();
    build_stack(&h, "lower", "upper");
    h.engine.fail_next_ml(EngineError::InvalidState);

    let err = h
        .manager
        .remove_from_stack("upper", &Interruptor::new())
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Engine {
            source: EngineError::InvalidState,
            ..
        }
    ));
    // Both members survive and both locks are back.
    assert_eq!(h.engine.cache_count(), 2);
    for name in ["lower", "upper"] {
        let sim = h.engine.sim_cache(name).unwrap();
        wait_until("locks released after failed removal", || {
            sim.lock_counts() == (false, 0, 0)
        });
    }
}
