//! # Run Control Context
//!
//! Pause, resume and stop signalling for one batch, passed explicitly to
//! every sequencer so that independent runs can share a process.
//!
//! ## Inter-stage pause
//!
//! The gate pauses the whole batch once per stage boundary:
//!
//! ```text
//! cohort A ends EQ ──► pending = EQ ──► blocks
//! cohort B ends EQ ─────────────────► blocks
//! operator resume() ─► released += EQ ─► A, B continue
//! cohort C ends EQ later ───────────► passes (EQ already released)
//! ```
//!
//! A stop request wakes every waiter; waiting cohorts then skip their
//! remaining stages.

use crate::plan::StageKind;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct Gate {
    pending: Option<StageKind>,
    released: BTreeSet<StageKind>,
}

#[derive(Debug)]
pub struct RunContext {
    inter_stage_pause: bool,
    stop: AtomicBool,
    gate: Mutex<Gate>,
    wake: Condvar,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(false)
    }
}

impl RunContext {
    #[must_use]
    pub fn new(inter_stage_pause: bool) -> Self {
        Self {
            inter_stage_pause,
            stop: AtomicBool::new(false),
            gate: Mutex::new(Gate::default()),
            wake: Condvar::new(),
        }
    }

    #[must_use]
    pub fn inter_stage_pause(&self) -> bool {
        self.inter_stage_pause
    }

    fn lock(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask every sequencer to stop accepting new stages.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        // take the lock so a waiter cannot miss the wakeup
        let _gate = self.lock();
        self.wake.notify_all();
        tracing::info!("Stop requested; in-flight stages will finish and checkpoint");
    }

    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Boundary the batch is currently paused at.
    #[must_use]
    pub fn paused_stage(&self) -> Option<StageKind> {
        self.lock().pending
    }

    /// Release the pending boundary. Returns the released stage.
    pub fn resume(&self) -> Option<StageKind> {
        let mut gate = self.lock();
        let stage = gate.pending.take()?;
        gate.released.insert(stage);
        self.wake.notify_all();
        tracing::info!("Resuming after {}", stage);
        Some(stage)
    }

    /// Block at the end of `stage` until the boundary is released.
    ///
    /// Returns immediately when pausing is off, the boundary was already
    /// released, or a stop was requested.
    pub fn pause_after(&self, stage: StageKind) {
        if !self.inter_stage_pause {
            return;
        }
        let mut gate = self.lock();
        while !gate.released.contains(&stage) && !self.is_stop_requested() {
            if gate.pending.is_none() {
                gate.pending = Some(stage);
                tracing::info!("Paused after {}; waiting for resume", stage);
                self.wake.notify_all();
            }
            gate = self.wake.wait(gate).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Wait until the batch pauses at some boundary, or the timeout passes.
    pub fn wait_for_pause(&self, timeout: Duration) -> Option<StageKind> {
        let gate = self.lock();
        let (gate, _) = self
            .wake
            .wait_timeout_while(gate, timeout, |g| {
                g.pending.is_none() && !self.is_stop_requested()
            })
            .unwrap_or_else(PoisonError::into_inner);
        gate.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn pause_disabled_passes_through() {
        let ctx = RunContext::new(false);
        ctx.pause_after(StageKind::Equilibrium);
        assert_eq!(ctx.paused_stage(), None);
        assert_eq!(ctx.resume(), None);
    }

    #[test]
    fn blocks_until_resume() {
        let ctx = RunContext::new(true);
        let passed = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..3 {
                scope.spawn(|| {
                    ctx.pause_after(StageKind::Equilibrium);
                    passed.fetch_add(1, Ordering::SeqCst);
                });
            }
            assert_eq!(
                ctx.wait_for_pause(Duration::from_secs(5)),
                Some(StageKind::Equilibrium)
            );
            assert_eq!(passed.load(Ordering::SeqCst), 0);
            assert_eq!(ctx.resume(), Some(StageKind::Equilibrium));
        });
        assert_eq!(passed.load(Ordering::SeqCst), 3);

        // released boundary no longer pauses
        ctx.pause_after(StageKind::Equilibrium);
        assert_eq!(ctx.paused_stage(), None);
    }

    #[test]
    fn stop_wakes_waiters() {
        let ctx = RunContext::new(true);
        std::thread::scope(|scope| {
            let waiter = scope.spawn(|| ctx.pause_after(StageKind::SpinUp));
            assert_eq!(
                ctx.wait_for_pause(Duration::from_secs(5)),
                Some(StageKind::SpinUp)
            );
            ctx.request_stop();
            waiter.join().expect("waiter");
        });
        assert!(ctx.is_stop_requested());
    }
}
