use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep};

/// Deadline used when `now + interval` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// One-shot timer that can be stopped and rearmed from the control loop.
///
/// Stopping discards a deadline that elapsed but was not yet observed, so a
/// rearm never delivers a stale fire from the previous interval.
pub(crate) struct HeartbeatTimer {
    sleep: Pin<Box<Sleep>>,
    armed: bool,
}

impl HeartbeatTimer {
    /// A timer that fires once after `interval`.
    pub(crate) fn armed(interval: Duration) -> Self {
        Self {
            sleep: Box::pin(tokio::time::sleep(interval)),
            armed: true,
        }
    }

    /// A timer that never fires until reset.
    pub(crate) fn disarmed() -> Self {
        Self {
            sleep: Box::pin(tokio::time::sleep(Duration::ZERO)),
            armed: false,
        }
    }

    /// Cancel any pending fire. Returns whether one was pending.
    pub(crate) fn stop(&mut self) -> bool {
        std::mem::replace(&mut self.armed, false)
    }

    /// Rearm to a full interval from now.
    pub(crate) fn reset(&mut self, interval: Duration) {
        let now = Instant::now();
        let deadline = now
            .checked_add(interval)
            .unwrap_or_else(|| now + FAR_FUTURE);
        self.sleep.as_mut().reset(deadline);
        self.armed = true;
    }

    /// Resolve when the armed deadline passes; pend forever while disarmed.
    pub(crate) async fn fired(&mut self) {
        if !self.armed {
            std::future::pending::<()>().await;
        }
        (&mut self.sleep).await;
        self.armed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_interval() {
        let start = Instant::now();
        let mut timer = HeartbeatTimer::armed(Duration::from_secs(10));

        timer.fired().await;
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert!(!timer.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarmed_timer_never_fires() {
        let mut timer = HeartbeatTimer::disarmed();
        let fired = tokio::time::timeout(Duration::from_secs(3600), timer.fired()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_after_elapsed_deadline_waits_full_interval() {
        let mut timer = HeartbeatTimer::armed(Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(15)).await;

        // The deadline elapsed unobserved; stopping must discard it.
        assert!(timer.stop());
        let rearmed_at = Instant::now();
        timer.reset(Duration::from_secs(10));

        timer.fired().await;
        assert_eq!(rearmed_at.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_with_unrepresentable_interval_does_not_fire() {
        let mut timer = HeartbeatTimer::armed(Duration::from_secs(1));
        timer.reset(Duration::MAX);

        let fired = tokio::time::timeout(Duration::from_secs(3600), timer.fired()).await;
        assert!(fired.is_err());
        assert!(timer.stop());
    }
}
