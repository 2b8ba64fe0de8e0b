//! Pause and skip signals
//!
//! Request handlers raise these from any task; the streaming task observes
//! them between block writes.
//!
//! Pause is a single-slot latest-intent primitive: a lock-guarded state plus a
//! replaceable one-shot that wakes the paused stream. Every change completes
//! the current one-shot, and the waiter always re-reads the latest state, so
//! rapid toggles coalesce to the final value instead of stacking resumes.
//!
//! Skip is a take-and-clear flag with a `Notify` so a paused stream wakes up
//! for it too.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::{oneshot, Notify};

#[derive(Debug, Default)]
struct PauseSlot {
    paused: bool,
    waiter: Option<oneshot::Sender<bool>>,
}

/// Control signals shared between request handlers and the streaming task
#[derive(Debug, Default)]
pub struct ControlSignals {
    pause: Mutex<PauseSlot>,
    skip: AtomicBool,
    skip_notify: Notify,
}

impl ControlSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest pause intent and wake a paused stream
    pub fn set_paused(&self, paused: bool) {
        let mut slot = self.slot();
        slot.paused = paused;
        if let Some(waiter) = slot.waiter.take() {
            let _ = waiter.send(paused);
        }
    }

    /// Flip the pause intent; returns the new value
    pub fn toggle_pause(&self) -> bool {
        let mut slot = self.slot();
        slot.paused = !slot.paused;
        let paused = slot.paused;
        if let Some(waiter) = slot.waiter.take() {
            let _ = waiter.send(paused);
        }
        paused
    }

    pub fn is_paused(&self) -> bool {
        self.slot().paused
    }

    /// Resolve once the latest intent is "not paused"
    pub async fn wait_resumed(&self) {
        loop {
            let rx = {
                let mut slot = self.slot();
                if !slot.paused {
                    return;
                }
                let (tx, rx) = oneshot::channel();
                slot.waiter = Some(tx);
                rx
            };
            // Value is advisory; the slot is re-read on the next pass
            let _ = rx.await;
        }
    }

    pub fn request_skip(&self) {
        self.skip.store(true, Ordering::SeqCst);
        self.skip_notify.notify_one();
    }

    /// Consume a pending skip
    pub fn take_skip(&self) -> bool {
        self.skip.swap(false, Ordering::SeqCst)
    }

    pub fn skip_pending(&self) -> bool {
        self.skip.load(Ordering::SeqCst)
    }

    /// Resolve once a skip is pending (does not consume it)
    pub async fn skip_requested(&self) {
        loop {
            let notified = self.skip_notify.notified();
            if self.skip_pending() {
                return;
            }
            notified.await;
        }
    }

    /// Drop stale intents before a new item starts
    pub fn reset(&self) {
        self.skip.store(false, Ordering::SeqCst);
        self.set_paused(false);
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, PauseSlot> {
        self.pause.lock().unwrap_or_else(|e| e.into_inner())
    }
}
