//! Caller interruption and the abandoned-call ownership race.

mod common;

use std::thread;

use common::{harness, start_req, wait_until};
use velocache_core::{EngineError, Error, InitMode};
use velocache_engine::{CacheInstance, Engine};
use velocache_mngt::Interruptor;

#[test]
fn interrupted_start_with_failing_attach_rolls_back_in_background() {
    let h = harness();
    let intr = Interruptor::new();
    h.engine.stage_hold("c1", "attach");

    let caller = {
        let manager = h.manager.clone();
        let intr = intr.clone();
        thread::spawn(move || manager.start_instance(&start_req("c1", InitMode::New), &intr))
    };

    wait_until("attach held", || {
        h.engine
            .sim_cache("c1")
            .is_some_and(|sim| sim.held_ops().contains(&"attach"))
    });

    // The caller walks away while the attach is still in flight.
    intr.raise();
    let err = caller.join().unwrap().unwrap_err();
    assert!(err.is_interrupted());

    // The instance lingers until the engine completes; nobody has stopped it.
    assert_eq!(h.engine.cache_count(), 1);

    // The attach then fails; the deferred worker stops and unregisters the
    // instance with no caller involved.
    let sim = h.engine.sim_cache("c1").unwrap();
    assert!(sim.abort_held("attach", EngineError::NoMem));
    wait_until("background rollback", || h.engine.cache_count() == 0);
    assert!(h.engine.get_by_name("c1").is_err());
}

#[test]
fn interrupted_start_with_successful_attach_is_also_rolled_back() {
    let h = harness();
    let intr = Interruptor::new();
    h.engine.stage_hold("c1", "attach");

    let caller = {
        let manager = h.manager.clone();
        let intr = intr.clone();
        thread::spawn(move || manager.start_instance(&start_req("c1", InitMode::New), &intr))
    };
    wait_until("attach held", || {
        h.engine
            .sim_cache("c1")
            .is_some_and(|sim| sim.held_ops().contains(&"attach"))
    });
    intr.raise();
    assert!(caller.join().unwrap().unwrap_err().is_interrupted());

    // The attach succeeds, but its caller never saw the instance: the
    // rollback worker stops it anyway.
    assert!(h.engine.sim_cache("c1").unwrap().release("attach"));
    wait_until("background rollback", || h.engine.cache_count() == 0);
}

#[test]
fn interrupted_stop_completes_in_background() {
    let h = harness();
    let intr = Interruptor::new();
    h.manager
        .start_instance(&start_req("c1", InitMode::New), &intr)
        .unwrap();
    let sim = h.engine.sim_cache("c1").unwrap();
    sim.hold_next("stop");

    let caller = {
        let manager = h.manager.clone();
        let stop_intr = intr.clone();
        thread::spawn(move || manager.exit_instance("c1", false, &stop_intr))
    };
    wait_until("stop held", || sim.held_ops().contains(&"stop"));
    intr.raise();
    let err = caller.join().unwrap().unwrap_err();
    assert!(err.is_interrupted());
    assert_eq!(h.engine.cache_count(), 1);

    // The engine finishes the stop; the deferred worker completes teardown.
    // The classifier detach happens after the instance unregisters, so wait
    // for it separately.
    assert!(sim.release("stop"));
    wait_until("background teardown", || h.engine.cache_count() == 0);
    wait_until("classifier detached", || !h.classifier.is_attached("c1"));
}

#[test]
fn interrupt_flushing_cuts_an_interruptible_flush_short() {
    let h = harness();
    let intr = Interruptor::new();
    h.manager
        .start_instance(&start_req("c1", InitMode::New), &intr)
        .unwrap();
    let sim = h.engine.sim_cache("c1").unwrap();
    sim.add_dirty(256);
    sim.hold_next("flush");

    let caller = {
        let manager = h.manager.clone();
        let flush_intr = Interruptor::new();
        thread::spawn(move || manager.flush_instance("c1", &flush_intr))
    };
    wait_until("flush held", || sim.held_ops().contains(&"flush"));

    h.manager.interrupt_flushing("c1").unwrap();
    let err = caller.join().unwrap().unwrap_err();
    assert!(matches!(
        err,
        Error::Engine {
            source: EngineError::FlushingInterrupted,
            ..
        }
    ));
    // Dirty data survives the cut-short flush, and the read lock is gone.
    assert_eq!(sim.dirty_blocks(), 256);
    assert_eq!(sim.lock_counts(), (false, 0, 0));
}

#[test]
fn interrupt_flushing_outside_a_flush_window_is_a_no_op() {
    let h = harness();
    let intr = Interruptor::new();
    h.manager
        .start_instance(&start_req("c1", InitMode::New), &intr)
        .unwrap();
    let sim = h.engine.sim_cache("c1").unwrap();
    sim.add_dirty(16);

    h.manager.interrupt_flushing("c1").unwrap();
    assert_eq!(sim.dirty_blocks(), 16);
}

#[test]
fn interrupted_flush_aborts_the_exit() {
    let h = harness();
    let intr = Interruptor::new();
    h.manager
        .start_instance(&start_req("c1", InitMode::New), &intr)
        .unwrap();
    let sim = h.engine.sim_cache("c1").unwrap();
    sim.add_dirty(32);
    sim.hold_next("flush");

    let caller = {
        let manager = h.manager.clone();
        let exit_intr = Interruptor::new();
        thread::spawn(move || manager.exit_instance("c1", true, &exit_intr))
    };
    wait_until("flush held", || sim.held_ops().contains(&"flush"));
    h.manager.interrupt_flushing("c1").unwrap();

    let err = caller.join().unwrap().unwrap_err();
    assert!(matches!(
        err,
        Error::Engine {
            source: EngineError::FlushingInterrupted,
            ..
        }
    ));
    // The exit never committed: the instance is still running and unlocked.
    assert_eq!(h.engine.cache_count(), 1);
    assert_eq!(sim.lock_counts(), (false, 0, 0));
    assert_eq!(sim.dirty_blocks(), 32);
}

#[test]
fn raised_interruptor_aborts_before_any_engine_call() {
    let h = harness();
    let intr = Interruptor::new();
    h.manager
        .start_instance(&start_req("c1", InitMode::New), &intr)
        .unwrap();

    let raised = Interruptor::new();
    raised.raise();
    let err = h.manager.exit_instance("c1", true, &raised).unwrap_err();
    assert!(err.is_interrupted());
    // The lock wait aborted; the instance is untouched.
    assert_eq!(h.engine.cache_count(), 1);
    let sim = h.engine.sim_cache("c1").unwrap();
    wait_until("abandoned lock released", || {
        sim.lock_counts() == (false, 0, 0)
    });
}
