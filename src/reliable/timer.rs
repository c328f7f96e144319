use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Schedules a single one-shot wake-up; cancellable (spec.md §2 "Timer
/// adapter", §6 `SystemLayer::start_timer`/`cancel_timer`).
///
/// At most one armed timer exists at a time: arming a new deadline
/// implicitly cancels whatever was previously armed, mirroring
/// "at most one armed timer per (callback, ctx) pair". Behind a trait so
/// the manager's own tests can swap in a timer that records arm/cancel
/// calls instead of spawning real sleeps.
#[async_trait]
pub trait TimerSource: Send + Sync {
    async fn start(&self, delay: Duration, callback: Arc<dyn Fn() + Send + Sync>);
    async fn cancel(&self);
}

/// Real implementation: one `tokio::time::sleep` per armed deadline,
/// cancelled through a `CancellationToken`.
pub struct TokioTimer {
    armed: Mutex<Option<CancellationToken>>,
}

impl TokioTimer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { armed: Mutex::new(None) })
    }
}

impl Default for TokioTimer {
    fn default() -> Self {
        Self { armed: Mutex::new(None) }
    }
}

#[async_trait]
impl TimerSource for TokioTimer {
    async fn start(&self, delay: Duration, callback: Arc<dyn Fn() + Send + Sync>) {
        self.cancel().await;

        let token = CancellationToken::new();
        let child = token.clone();
        *self.armed.lock().await = Some(token);

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => callback(),
                _ = child.cancelled() => {}
            }
        });
    }

    async fn cancel(&self) {
        if let Some(token) = self.armed.lock().await.take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Records the last arm/cancel request without spawning anything, so
    /// manager tests can drive `execute_actions`/`start_timer` directly
    /// without a real wake-up racing the test's own assertions.
    pub struct RecordingTimer {
        pub last_delay: Mutex<Option<Duration>>,
        pub cancel_count: Mutex<u32>,
    }

    impl RecordingTimer {
        pub fn new() -> Arc<Self> {
            Arc::new(Self { last_delay: Mutex::new(None), cancel_count: Mutex::new(0) })
        }

        pub async fn armed_delay(&self) -> Option<Duration> {
            *self.last_delay.lock().await
        }
    }

    #[async_trait]
    impl TimerSource for RecordingTimer {
        async fn start(&self, delay: Duration, _callback: Arc<dyn Fn() + Send + Sync>) {
            *self.last_delay.lock().await = Some(delay);
        }

        async fn cancel(&self) {
            *self.last_delay.lock().await = None;
            *self.cancel_count.lock().await += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn fires_once_after_delay() {
        let timer = TokioTimer::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        timer
            .start(Duration::from_millis(20), Arc::new(move || {
                hits2.fetch_add(1, Ordering::SeqCst);
            }))
            .await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_prevents_fire() {
        let timer = TokioTimer::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        timer
            .start(Duration::from_millis(20), Arc::new(move || {
                hits2.fetch_add(1, Ordering::SeqCst);
            }))
            .await;
        timer.cancel().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rearming_cancels_previous() {
        let timer = TokioTimer::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h1 = hits.clone();
        timer
            .start(Duration::from_millis(20), Arc::new(move || {
                h1.fetch_add(1, Ordering::SeqCst);
            }))
            .await;

        let h2 = hits.clone();
        timer
            .start(Duration::from_millis(20), Arc::new(move || {
                h2.fetch_add(10, Ordering::SeqCst);
            }))
            .await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }
}
