//! Cancellable timers on the tokio runtime
//!
//! Timers are the only source of scheduled work in a session (recovery
//! backoff, buffer sampling). Dropping or cancelling a handle aborts the
//! task before its callback runs.

use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug)]
pub(crate) struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Run `callback` once after `delay`. Returns `None` outside a runtime.
    pub(crate) fn after<F>(delay: Duration, callback: F) -> Option<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = current_runtime()?;
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        Some(Self { task })
    }

    /// Run `tick` every `period` until it returns false
    pub(crate) fn every<F>(period: Duration, mut tick: F) -> Option<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let handle = current_runtime()?;
        let task = handle.spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if !tick() {
                    break;
                }
            }
        });
        Some(Self { task })
    }

    pub(crate) fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn current_runtime() -> Option<Handle> {
    match Handle::try_current() {
        Ok(handle) => Some(handle),
        Err(_) => {
            debug!("No tokio runtime; timer not scheduled");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_after_fires_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let _timer = TimerHandle::after(Duration::from_millis(500), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_callback() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let timer = TimerHandle::after(Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        timer.cancel();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_stops_when_tick_returns_false() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let _timer = TimerHandle::every(Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst) < 2
        })
        .unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_no_runtime() {
        assert!(TimerHandle::after(Duration::from_millis(1), || {}).is_none());
    }
}
