//! Fixed-period timer driving `on_timer`.
//!
//! The scheduler wraps a `crossbeam_channel::tick` receiver so a connection
//! worker can `select!` over it next to its command channel. Missed ticks
//! are dropped by the channel, never queued; the next delivered tick carries
//! the true elapsed time.

use crate::pipeline::PipelineError;
use crossbeam_channel::Receiver;
use std::time::{Duration, Instant};

/// Default `on_timer` period.
pub const DEFAULT_TIMER_PERIOD: Duration = Duration::from_millis(100);

/// Shortest accepted period.
pub const MIN_TIMER_PERIOD: Duration = Duration::from_millis(10);

pub struct TimerScheduler {
    period: Duration,
    start: Instant,
    ticker: Receiver<Instant>,
    last_elapsed_ms: Option<u64>,
}

impl TimerScheduler {
    /// Start ticking from `start` (normally the pipeline start).
    pub fn new(period: Duration, start: Instant) -> Result<Self, PipelineError> {
        if period < MIN_TIMER_PERIOD {
            return Err(PipelineError::InvalidTimerPeriod {
                period_ms: period.as_millis() as u64,
                min_ms: MIN_TIMER_PERIOD.as_millis() as u64,
            });
        }
        Ok(Self {
            period,
            start,
            ticker: crossbeam_channel::tick(period),
            last_elapsed_ms: None,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Channel to wait on; each message is one tick. The instant it carries
    /// is when the tick was scheduled, so take elapsed time from
    /// [`elapsed_now`](Self::elapsed_now) on delivery.
    pub fn receiver(&self) -> &Receiver<Instant> {
        &self.ticker
    }

    /// Elapsed milliseconds for a tick observed at `now`.
    ///
    /// Returns `None` if the value would not be strictly greater than the
    /// previous tick's, so consumers never see a repeated or reversed value.
    pub fn elapsed_at(&mut self, now: Instant) -> Option<u64> {
        let elapsed = now.saturating_duration_since(self.start).as_millis() as u64;
        if self.last_elapsed_ms.is_some_and(|last| elapsed <= last) {
            return None;
        }
        self.last_elapsed_ms = Some(elapsed);
        Some(elapsed)
    }

    /// Elapsed milliseconds for a tick observed right now.
    pub fn elapsed_now(&mut self) -> Option<u64> {
        self.elapsed_at(Instant::now())
    }
}

impl std::fmt::Debug for TimerScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerScheduler")
            .field("period", &self.period)
            .field("last_elapsed_ms", &self.last_elapsed_ms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_short_period() {
        let err = TimerScheduler::new(Duration::from_millis(5), Instant::now()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTimerPeriod { min_ms: 10, .. }));
    }

    #[test]
    fn test_elapsed_strictly_increasing() {
        let start = Instant::now();
        let mut timer = TimerScheduler::new(DEFAULT_TIMER_PERIOD, start).unwrap();
        assert_eq!(timer.elapsed_at(start + Duration::from_millis(100)), Some(100));
        assert_eq!(timer.elapsed_at(start + Duration::from_millis(100)), None);
        assert_eq!(timer.elapsed_at(start + Duration::from_millis(90)), None);
        // delayed host sees the real elapsed time
        assert_eq!(timer.elapsed_at(start + Duration::from_millis(450)), Some(450));
    }

    #[test]
    fn test_ticks_arrive() {
        let mut timer = TimerScheduler::new(MIN_TIMER_PERIOD, Instant::now()).unwrap();
        let mut seen = Vec::new();
        while seen.len() < 3 {
            timer
                .receiver()
                .recv_timeout(Duration::from_secs(1))
                .unwrap();
            if let Some(ms) = timer.elapsed_now() {
                seen.push(ms);
            }
        }
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }
}
