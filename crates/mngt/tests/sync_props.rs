//! Property tests over the blocking bridge's completion/interruption race.
//!
//! Whatever the interleaving of the completion firing and the interruptor
//! being raised, exactly one of two things happens: the waiter consumes the
//! result, or the call is abandoned and the cleanup closure runs exactly
//! once when the completion lands.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use proptest::prelude::*;
use velocache_core::EngineError;
use velocache_mngt::{Interruptor, SyncCall, WaitOutcome};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn cleanup_runs_exactly_once_under_any_ordering(
        complete_delay_ms in 0u64..4,
        raise_delay_ms in 0u64..4,
        fail in any::<bool>(),
    ) {
        let (call, completer) = SyncCall::<()>::new();
        let intr = Interruptor::new();
        let cleanups = Arc::new(AtomicUsize::new(0));

        let firer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(complete_delay_ms));
            completer.complete(if fail { Err(EngineError::NoMem) } else { Ok(()) });
        });
        let raiser = {
            let intr = intr.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(raise_delay_ms));
                intr.raise();
            })
        };

        let counter = Arc::clone(&cleanups);
        let outcome = call.wait_interruptible(&intr, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        firer.join().unwrap();
        raiser.join().unwrap();

        match outcome {
            WaitOutcome::Completed(status) => {
                // The waiter consumed the result; the cleanup must never run.
                prop_assert_eq!(status.is_err(), fail);
                prop_assert_eq!(cleanups.load(Ordering::SeqCst), 0);
            }
            WaitOutcome::Interrupted => {
                // The completion has fired by now, so the cleanup has run,
                // and only once.
                prop_assert_eq!(cleanups.load(Ordering::SeqCst), 1);
            }
        }
    }
}
