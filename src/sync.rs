// src/sync.rs - Cancellation signal and quiescent window
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Level-triggered, idempotent cancellation signal. Once set it stays set;
/// sleepers are woken so the monitor loop reaches its next checkpoint
/// promptly instead of finishing a full poll-interval sleep.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Default)]
struct StopInner {
    flag: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration`, returning early when the signal is set.
    /// Returns whether the signal is set.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_set() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_set(),
            _ = self.inner.notify.notified() => true,
        }
    }

    /// Sleeps for `duration` in `tick`-sized slices, returning early when
    /// the signal is set. Used by waits that must stay responsive to stop
    /// requests at a coarser-than-instant but bounded granularity.
    pub async fn sleep_ticked(&self, duration: Duration, tick: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_set() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return self.is_set();
            }
            let slice = tick.min(deadline - now);
            if self.sleep(slice).await {
                return true;
            }
        }
    }
}

/// Absolute deadline during which printer polls and commands are
/// suppressed, so the host never races the firmware's own pause and
/// bed-raise sequence. Opened on a successful pause, cleared on a
/// successful resume or on lapse.
#[derive(Debug, Default)]
pub struct QuiescentWindow {
    deadline: Option<Instant>,
}

impl QuiescentWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, duration: Duration) {
        self.deadline = Some(Instant::now() + duration);
        tracing::info!("Quiescent window opened for {:.1}s", duration.as_secs_f64());
    }

    pub fn clear(&mut self) {
        self.deadline = None;
    }

    /// True while the deadline has not passed. A lapsed deadline is
    /// dropped on observation.
    pub fn is_open(&mut self) -> bool {
        match self.deadline {
            Some(deadline) if Instant::now() < deadline => true,
            Some(_) => {
                self.deadline = None;
                false
            }
            None => false,
        }
    }

    /// Time left before the window lapses.
    pub fn remaining(&self) -> Duration {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_signal_wakes_sleeper() {
        let signal = StopSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.sleep(Duration::from_secs(30)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.set();
        let interrupted = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sleeper did not wake")
            .expect("task panicked");
        assert!(interrupted);
    }

    #[tokio::test]
    async fn test_stop_signal_is_level_triggered() {
        let signal = StopSignal::new();
        signal.set();
        signal.set(); // idempotent
        assert!(signal.is_set());
        // A sleep started after the signal is set returns immediately.
        assert!(signal.sleep(Duration::from_secs(30)).await);
    }

    #[tokio::test]
    async fn test_ticked_sleep_completes_without_signal() {
        let signal = StopSignal::new();
        let interrupted = signal
            .sleep_ticked(Duration::from_millis(30), Duration::from_millis(10))
            .await;
        assert!(!interrupted);
    }

    #[tokio::test]
    async fn test_quiescent_window_lapses() {
        let mut window = QuiescentWindow::new();
        assert!(!window.is_open());
        window.open(Duration::from_millis(20));
        assert!(window.is_open());
        assert!(window.remaining() > Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!window.is_open());
        assert_eq!(window.remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_quiescent_window_clear() {
        let mut window = QuiescentWindow::new();
        window.open(Duration::from_secs(60));
        window.clear();
        assert!(!window.is_open());
    }
}
