//! # Liveness Monitor
//!
//! Bookkeeping for the two ways a feed can die: the peer stops answering protocol
//! pings (transport dead) or it keeps answering but stops sending samples (data
//! dead). The monitor owns no timers; the realtime connection drives the clock and
//! asks the questions on each heartbeat tick.

/// Heartbeat and data-freshness state of one connection. Times are epoch ms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessMonitor {
    awaiting_pong: bool,
    last_sample_at_epoch: i64,
}

impl LivenessMonitor {
    /// Starts the sample clock at `started_at_epoch`, so a new connection gets a full
    /// staleness window before its first update is due.
    pub fn new(started_at_epoch: i64) -> Self {
        Self {
            awaiting_pong: false,
            last_sample_at_epoch: started_at_epoch,
        }
    }

    pub fn mark_ping_sent(&mut self) {
        self.awaiting_pong = true;
    }

    pub fn mark_pong_received(&mut self) {
        self.awaiting_pong = false;
    }

    pub fn mark_sample_received(&mut self, at_epoch: i64) {
        self.last_sample_at_epoch = self.last_sample_at_epoch.max(at_epoch);
    }

    /// True when the last ping has not been answered yet.
    pub fn is_awaiting_unanswered_pong(&self) -> bool {
        self.awaiting_pong
    }

    /// True iff `now_epoch - last_sample >= threshold_ms`.
    pub fn is_stale(&self, threshold_ms: i64, now_epoch: i64) -> bool {
        now_epoch - self.last_sample_at_epoch >= threshold_ms
    }

    pub fn last_sample_at_epoch(&self) -> i64 {
        self.last_sample_at_epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staleness_boundary() {
        let mut monitor = LivenessMonitor::new(0);
        monitor.mark_sample_received(1_000);

        assert!(!monitor.is_stale(500, 1_000));
        assert!(!monitor.is_stale(500, 1_499));
        assert!(monitor.is_stale(500, 1_500));
        assert!(monitor.is_stale(500, 9_000));
    }

    #[test]
    fn test_fresh_immediately_after_sample() {
        let mut monitor = LivenessMonitor::new(0);
        assert!(monitor.is_stale(120_000, 200_000));

        monitor.mark_sample_received(200_000);
        assert!(!monitor.is_stale(120_000, 200_000));
    }

    #[test]
    fn test_new_connection_is_not_stale() {
        let monitor = LivenessMonitor::new(50_000);
        assert!(!monitor.is_stale(120_000, 50_000));
        assert!(monitor.is_stale(120_000, 170_000));
    }

    #[test]
    fn test_sample_clock_never_goes_back() {
        let mut monitor = LivenessMonitor::new(0);
        monitor.mark_sample_received(5_000);
        monitor.mark_sample_received(4_000);
        assert_eq!(monitor.last_sample_at_epoch(), 5_000);
    }

    #[test]
    fn test_ping_pong_cycle() {
        let mut monitor = LivenessMonitor::new(0);
        assert!(!monitor.is_awaiting_unanswered_pong());

        monitor.mark_ping_sent();
        assert!(monitor.is_awaiting_unanswered_pong());

        monitor.mark_pong_received();
        assert!(!monitor.is_awaiting_unanswered_pong());
    }
}
