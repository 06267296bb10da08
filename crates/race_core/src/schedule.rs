//! Delay-queue seam for self-rescheduling ticks.
//!
//! The scheduler only needs `schedule(after, job) -> CancelHandle`. The tokio
//! implementation spawns a sleeping task; tests use a manual queue driven by a
//! simulated clock.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

pub type Job = BoxFuture<'static, ()>;

pub trait DelayQueue: Send + Sync {
    /// Runs `job` once after `after`, unless the returned handle is cancelled first.
    fn schedule(&self, after: Duration, job: Job) -> CancelHandle;
}

const PENDING: u8 = 0;
const STARTED: u8 = 1;
const CANCELLED: u8 = 2;

#[derive(Debug, Default)]
struct HandleState {
    phase: AtomicU8,
    abort: Mutex<Option<AbortHandle>>,
}

/// Revocation handle for one scheduled job. Cancelling is idempotent and only
/// affects a job that has not started.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    state: Arc<HandleState>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call prevented the job from running.
    pub fn cancel(&self) -> bool {
        let won = self
            .state
            .phase
            .compare_exchange(PENDING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if won {
            if let Some(abort) = self.state.abort.lock().take() {
                abort.abort();
            }
        }
        won
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.phase.load(Ordering::SeqCst) == CANCELLED
    }

    pub fn is_pending(&self) -> bool {
        self.state.phase.load(Ordering::SeqCst) == PENDING
    }

    /// Claims the job for execution. Returns `false` if it was cancelled.
    pub fn start(&self) -> bool {
        self.state
            .phase
            .compare_exchange(PENDING, STARTED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn attach_abort(&self, abort: AbortHandle) {
        *self.state.abort.lock() = Some(abort);
        // Cancelled between spawn and attach.
        if self.is_cancelled() {
            if let Some(abort) = self.state.abort.lock().take() {
                abort.abort();
            }
        }
    }
}

/// Delay queue backed by tokio timers.
#[derive(Clone, Debug)]
pub struct TokioDelayQueue {
    runtime: Handle,
}

impl TokioDelayQueue {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl DelayQueue for TokioDelayQueue {
    fn schedule(&self, after: Duration, job: Job) -> CancelHandle {
        let handle = CancelHandle::new();
        let task_handle = handle.clone();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(after).await;
            if task_handle.start() {
                job.await;
            }
        });
        handle.attach_abort(task.abort_handle());
        handle
    }
}

/// At most one outstanding tick per participant.
#[derive(Debug, Default)]
pub struct TickRegistry {
    handles: DashMap<u64, CancelHandle>,
}

impl TickRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `handle` as the participant's next tick, cancelling any earlier one
    /// that has not started.
    pub fn arm(&self, participant_id: u64, handle: CancelHandle) {
        if let Some(previous) = self.handles.insert(participant_id, handle) {
            previous.cancel();
        }
    }

    /// Cancels and forgets the participant's pending tick. Safe to call repeatedly.
    pub fn revoke(&self, participant_id: u64) -> bool {
        self.handles
            .remove(&participant_id)
            .map(|(_, h)| h.cancel())
            .unwrap_or(false)
    }

    pub fn pending_count(&self) -> usize {
        self.handles.iter().filter(|h| h.is_pending()).count()
    }

    pub fn is_pending(&self, participant_id: u64) -> bool {
        self.handles.get(&participant_id).is_some_and(|h| h.is_pending())
    }
}
