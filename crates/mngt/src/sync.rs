//! Blocking bridge over the engine's completion-callback entry points.
//!
//! Every asynchronous engine operation takes a completion callback that fires
//! exactly once from a queue worker. Management callers want to block until
//! that happens, and some of them want to give up early when the caller is
//! interrupted. [`SyncCall`] and [`Completer`] are the two halves of that
//! rendezvous, and [`Interruptor`] is the shared flag an interruptible wait
//! watches.
//!
//! When a wait is interrupted the engine callback is still in flight and owns
//! resources the caller can no longer release. The caller abandons the call by
//! leaving a cleanup closure behind; whoever completes the call runs it. A
//! given call is therefore finished by exactly one side, never both.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};
use velocache_core::EngineError;

/// Result carried by a completion, generic over the operation's payload.
pub type OpResult<T> = Result<T, EngineError>;

enum State<T> {
    /// No completion yet, a waiter may be blocked on the condvar.
    Pending,
    /// Completion fired while the waiter was away from the lock.
    Done(OpResult<T>),
    /// The waiter gave up. The completion runs this closure instead of
    /// notifying anyone.
    Abandoned(Box<dyn FnOnce(OpResult<T>) + Send>),
    /// Terminal. Reaching `complete` in this state is a double fire.
    Finished,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

/// Type-erased handle an [`Interruptor`] keeps so `raise` can wake waiters of
/// any payload type.
trait Waitable: Send + Sync {
    fn notify(&self);
}

impl<T: Send> Waitable for Shared<T> {
    fn notify(&self) {
        // Taking the state lock before notifying closes the window between a
        // waiter's flag check and its wait.
        let _guard = self.state.lock();
        self.cond.notify_all();
    }
}

/// Outcome of an interruptible wait.
#[must_use]
pub enum WaitOutcome<T> {
    /// The completion fired first.
    Completed(OpResult<T>),
    /// The caller was interrupted and the call was abandoned.
    Interrupted,
}

/// Waiting half of a blocking call into the engine.
pub struct SyncCall<T = ()> {
    shared: Arc<Shared<T>>,
}

/// Completing half. Convert it into the engine's callback type with
/// [`Completer::into_callback`], or fire it directly from a test.
pub struct Completer<T = ()> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> SyncCall<T> {
    /// Creates a fresh call and its completer.
    pub fn new() -> (SyncCall<T>, Completer<T>) {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::Pending),
            cond: Condvar::new(),
        });
        (
            SyncCall {
                shared: Arc::clone(&shared),
            },
            Completer { shared },
        )
    }

    /// Blocks until the completion fires. Not interruptible.
    pub fn wait(self) -> OpResult<T> {
        let mut state = self.shared.state.lock();
        loop {
            match mem::replace(&mut *state, State::Pending) {
                State::Done(result) => {
                    *state = State::Finished;
                    return result;
                }
                State::Pending => {}
                State::Abandoned(_) | State::Finished => {
                    unreachable!("waiter observed a foreign terminal state")
                }
            }
            self.shared.cond.wait(&mut state);
        }
    }

    /// Blocks until the completion fires or `intr` is raised, whichever comes
    /// first. On interruption the call is abandoned and `on_abandon` runs from
    /// whichever thread eventually completes it.
    pub fn wait_interruptible<F>(self, intr: &Interruptor, on_abandon: F) -> WaitOutcome<T>
    where
        F: FnOnce(OpResult<T>) + Send + 'static,
    {
        let waitable: Arc<dyn Waitable> = Arc::clone(&self.shared) as Arc<dyn Waitable>;
        intr.register(Arc::downgrade(&waitable));

        let mut state = self.shared.state.lock();
        loop {
            match mem::replace(&mut *state, State::Pending) {
                State::Done(result) => {
                    *state = State::Finished;
                    return WaitOutcome::Completed(result);
                }
                State::Pending => {}
                State::Abandoned(_) | State::Finished => {
                    unreachable!("waiter observed a foreign terminal state")
                }
            }
            // The flag is checked under the state lock. `raise` takes that
            // lock before notifying, so a raise cannot slip between this
            // check and the wait below.
            if intr.is_raised() {
                *state = State::Abandoned(Box::new(on_abandon));
                return WaitOutcome::Interrupted;
            }
            self.shared.cond.wait(&mut state);
        }
    }
}

impl<T: Send + 'static> Completer<T> {
    /// Fires the completion. Panics if the call was already completed, which
    /// would mean an engine callback fired twice.
    pub fn complete(self, result: OpResult<T>) {
        let mut state = self.shared.state.lock();
        match mem::replace(&mut *state, State::Finished) {
            State::Pending => {
                *state = State::Done(result);
                self.shared.cond.notify_all();
            }
            State::Abandoned(cleanup) => {
                drop(state);
                cleanup(result);
            }
            State::Done(_) | State::Finished => {
                panic!("engine completion fired twice");
            }
        }
    }

    /// Adapts the completer to the engine's boxed callback shape.
    pub fn into_callback(self) -> Box<dyn FnOnce(OpResult<T>) + Send> {
        Box::new(move |result| self.complete(result))
    }
}

/// Shared interrupt flag. One interruptor covers one management operation;
/// every interruptible wait inside that operation registers with it.
///
/// Raising is sticky. A wait entered after the raise aborts on its first
/// flag check without blocking.
#[derive(Clone, Default)]
pub struct Interruptor {
    inner: Arc<InterruptorInner>,
}

struct InterruptorInner {
    raised: AtomicBool,
    waiters: Mutex<Vec<Weak<dyn Waitable>>>,
}

impl Default for InterruptorInner {
    fn default() -> Self {
        InterruptorInner {
            raised: AtomicBool::new(false),
            waiters: Mutex::new(Vec::new()),
        }
    }
}

impl Interruptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::Acquire)
    }

    /// Raises the flag and wakes every registered waiter.
    pub fn raise(&self) {
        self.inner.raised.store(true, Ordering::Release);
        let waiters = mem::take(&mut *self.inner.waiters.lock());
        for waiter in waiters {
            if let Some(waiter) = waiter.upgrade() {
                waiter.notify();
            }
        }
    }

    fn register(&self, waiter: Weak<dyn Waitable>) {
        let mut waiters = self.inner.waiters.lock();
        waiters.retain(|w| w.strong_count() > 0);
        waiters.push(waiter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_returns_result_fired_before_wait() {
        let (call, completer) = SyncCall::<()>::new();
        completer.complete(Ok(()));
        assert!(call.wait().is_ok());
    }

    #[test]
    fn wait_returns_result_fired_after_wait() {
        let (call, completer) = SyncCall::<u32>::new();
        let firer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.complete(Ok(7));
        });
        assert_eq!(call.wait(), Ok(7));
        firer.join().unwrap();
    }

    #[test]
    fn wait_propagates_engine_error() {
        let (call, completer) = SyncCall::<()>::new();
        completer.complete(Err(EngineError::NoMem));
        assert_eq!(call.wait(), Err(EngineError::NoMem));
    }

    #[test]
    #[should_panic(expected = "fired twice")]
    fn double_completion_panics() {
        let (call, completer) = SyncCall::<()>::new();
        completer.complete(Ok(()));
        // A second completer over the same shared state models a callback
        // invoked twice.
        let late = Completer {
            shared: Arc::clone(&call.shared),
        };
        late.complete(Ok(()));
    }

    #[test]
    fn interrupted_wait_abandons_and_cleanup_runs_once() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let (call, completer) = SyncCall::<()>::new();
        let intr = Interruptor::new();

        let waiter = {
            let intr = intr.clone();
            let cleanups = Arc::clone(&cleanups);
            thread::spawn(move || {
                call.wait_interruptible(&intr, move |_| {
                    cleanups.fetch_add(1, Ordering::SeqCst);
                })
            })
        };

        thread::sleep(Duration::from_millis(20));
        intr.raise();
        assert!(matches!(waiter.join().unwrap(), WaitOutcome::Interrupted));

        // Cleanup must not have run before the completion fires.
        assert_eq!(cleanups.load(Ordering::SeqCst), 0);
        completer.complete(Ok(()));
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn raised_interruptor_aborts_wait_immediately() {
        let (call, completer) = SyncCall::<()>::new();
        let intr = Interruptor::new();
        intr.raise();
        let outcome = call.wait_interruptible(&intr, |_| {});
        assert!(matches!(outcome, WaitOutcome::Interrupted));
        completer.complete(Ok(()));
    }

    #[test]
    fn completion_beats_interrupt_when_it_fires_first() {
        let (call, completer) = SyncCall::<()>::new();
        let intr = Interruptor::new();
        completer.complete(Ok(()));
        intr.raise();
        let outcome = call.wait_interruptible(&intr, |_| panic!("must not abandon"));
        assert!(matches!(outcome, WaitOutcome::Completed(Ok(()))));
    }

    #[test]
    fn abandon_closure_sees_completion_result() {
        let seen = Arc::new(Mutex::new(None));
        let (call, completer) = SyncCall::<()>::new();
        let intr = Interruptor::new();
        intr.raise();
        let slot = Arc::clone(&seen);
        let outcome = call.wait_interruptible(&intr, move |result| {
            *slot.lock() = Some(result);
        });
        assert!(matches!(outcome, WaitOutcome::Interrupted));
        completer.complete(Err(EngineError::IncompleteState));
        assert_eq!(*seen.lock(), Some(Err(EngineError::IncompleteState)));
    }

    #[test]
    fn one_interruptor_wakes_multiple_waiters() {
        let intr = Interruptor::new();
        let mut handles = Vec::new();
        let mut completers = Vec::new();
        for _ in 0..4 {
            let (call, completer) = SyncCall::<()>::new();
            completers.push(completer);
            let intr = intr.clone();
            handles.push(thread::spawn(move || call.wait_interruptible(&intr, |_| {})));
        }
        thread::sleep(Duration::from_millis(20));
        intr.raise();
        for handle in handles {
            assert!(matches!(handle.join().unwrap(), WaitOutcome::Interrupted));
        }
        for completer in completers {
            completer.complete(Ok(()));
        }
    }
}
