//! Cancellable one-shot timer for use inside `tokio::select!`.

use std::time::Duration;

use tokio::time::Instant;

/// An optional deadline. At most one is pending at a time: scheduling again
/// replaces the previous deadline.
#[derive(Debug, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer to fire `delay` from now.
    pub fn schedule(&mut self, delay: Duration) {
        self.at = Some(Instant::now() + delay);
    }

    /// Disarm the timer. Safe to call when nothing is scheduled.
    pub fn cancel(&mut self) {
        self.at = None;
    }

    pub fn is_scheduled(&self) -> bool {
        self.at.is_some()
    }

    /// Resolve when the deadline passes, then disarm. Pends forever while
    /// nothing is scheduled, so a `select!` branch on it stays dormant.
    ///
    /// Cancel-safe: dropping the future leaves the deadline armed.
    pub async fn fired(&mut self) {
        match self.at {
            Some(at) => {
                tokio::time::sleep_until(at).await;
                self.at = None;
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay_and_disarms() {
        let mut timer = Deadline::new();
        timer.schedule(Duration::from_secs(2));
        let start = Instant::now();
        timer.fired().await;
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert!(!timer.is_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn unscheduled_never_fires() {
        let mut timer = Deadline::new();
        let result = tokio::time::timeout(Duration::from_secs(3600), timer.fired()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_disarms() {
        let mut timer = Deadline::new();
        timer.schedule(Duration::from_millis(10));
        timer.cancel();
        timer.cancel();
        assert!(!timer.is_scheduled());
        let result = tokio::time::timeout(Duration::from_secs(1), timer.fired()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_replaces_previous_deadline() {
        let mut timer = Deadline::new();
        timer.schedule(Duration::from_secs(1));
        timer.schedule(Duration::from_secs(5));
        let start = Instant::now();
        timer.fired().await;
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }
}
