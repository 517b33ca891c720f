//! Fixed-cadence repeating task with cancellation.
//!
//! Ticks never overlap: the loop awaits each tick before waiting for the
//! next one, and ticks that come due while one is still running are
//! skipped rather than queued.

use async_trait::async_trait;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Stop,
}

/// Work performed on every tick.
#[async_trait]
pub trait SampleTask: Send + 'static {
    /// `cancel` fires when the sampler is cancelled mid-tick; long awaits
    /// should race against it.
    async fn tick(&mut self, cancel: &CancellationToken) -> TickOutcome;

    /// Runs once after the last tick, whatever ended the loop.
    async fn finish(&mut self) {}
}

pub struct Sampler {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Sampler {
    /// Start ticking `task` every `period`, first tick one period from now.
    pub fn start<T: SampleTask>(period: Duration, mut task: T) -> Self {
        let token = CancellationToken::new();
        let cancel = token.clone();

        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                if task.tick(&cancel).await == TickOutcome::Stop || cancel.is_cancelled() {
                    break;
                }
            }
            task.finish().await;
        });

        Self {
            token,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop future ticks and wait for the task to wind down. Idempotent.
    pub async fn cancel(&mut self) {
        self.token.cancel();
        self.join().await;
    }

    /// Wait for the loop to end on its own.
    ///
    /// Cancel-safe: dropping this future leaves the sampler joinable.
    pub async fn join(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "sampler task ended abnormally");
            }
            self.handle = None;
        }
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
