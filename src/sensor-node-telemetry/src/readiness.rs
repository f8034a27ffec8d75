//! Bounded waits on "the channel can carry a message".

use core::{
    cell::RefCell,
    future::{poll_fn, Future},
    task::Poll,
};

use embassy_sync::{
    blocking_mutex::{raw::CriticalSectionRawMutex, Mutex},
    waitqueue::MultiWakerRegistration,
};
use embassy_time::{with_timeout, Duration};

/// Maximum number of tasks waiting on one [`ReadinessGate`] without being woken spuriously.
pub const MAX_WAITERS: usize = 4;

/// A bounded wait predicate indicating whether a channel can currently accept messages.
///
/// Callers poll it in a loop with a finite timeout rather than awaiting readiness
/// indefinitely, so that a link that never comes up cannot suspend them forever.
pub trait Readiness {
    /// Waits up to `timeout` for the channel to be ready.
    ///
    /// Returns `true` if it is ready, `false` if the timeout elapsed first.
    fn wait_ready(&self, timeout: Duration) -> impl Future<Output = bool>;
}

impl<R: Readiness> Readiness for &R {
    fn wait_ready(&self, timeout: Duration) -> impl Future<Output = bool> {
        (**self).wait_ready(timeout)
    }
}

struct GateState {
    ready: bool,
    waiters: MultiWakerRegistration<MAX_WAITERS>,
}

/// A level-triggered [`Readiness`] implementation, opened and closed by the collaborator that
/// owns the channel (e.g., the transport session events).
pub struct ReadinessGate {
    state: Mutex<CriticalSectionRawMutex, RefCell<GateState>>,
}

impl ReadinessGate {
    /// Creates a closed gate.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(GateState {
                ready: false,
                waiters: MultiWakerRegistration::new(),
            })),
        }
    }

    /// Opens or closes the gate, waking every waiter when opening.
    pub fn set_ready(&self, ready: bool) {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            state.ready = ready;
            if ready {
                state.waiters.wake();
            }
        });
    }

    /// Returns whether the gate is currently open.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.lock(|state| state.borrow().ready)
    }

    /// Waits, without bound, until the gate is open.
    ///
    /// Prefer [`Readiness::wait_ready()`], which bounds the wait.
    pub async fn wait(&self) {
        poll_fn(|cx| {
            self.state.lock(|state| {
                let mut state = state.borrow_mut();
                if state.ready {
                    Poll::Ready(())
                } else {
                    state.waiters.register(cx.waker());
                    Poll::Pending
                }
            })
        })
        .await;
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl Readiness for ReadinessGate {
    async fn wait_ready(&self, timeout: Duration) -> bool {
        with_timeout(timeout, self.wait()).await.is_ok()
    }
}
