//! # Sample Forwarder
//!
//! Turns the connection's current sample into at most one sink call per distinct
//! reading. The realtime feed can deliver many updates per second, while the report
//! timer decides how often anything leaves the process; the forwarder only has to
//! drop what is unusable or already sent.

use std::sync::Arc;

use crate::engine::state_sink::{StateSink, StateUpdate};
use crate::monitors::sense::model::Sample;

/// Outcome of a [`SampleForwarder::forward`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    Posted,
    Failed,
    SkippedNoPower,
    SkippedDuplicate,
}

pub struct SampleForwarder {
    sink: Arc<dyn StateSink>,
    last_forwarded_epoch: Option<i64>,
}

impl SampleForwarder {
    pub fn new(sink: Arc<dyn StateSink>) -> Self {
        Self {
            sink,
            last_forwarded_epoch: None,
        }
    }

    /// Posts `sample` unless it has no wattage or was already posted. A failed post is
    /// logged and not retried; the next tick carries a fresher sample anyway.
    pub async fn forward(&mut self, sample: &Sample) -> ForwardOutcome {
        if self.last_forwarded_epoch == Some(sample.captured_at_epoch) {
            log::trace!("Sample {} already forwarded", sample.captured_at_epoch);
            return ForwardOutcome::SkippedDuplicate;
        }

        let timestamp = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        let Some(update) = StateUpdate::from_sample(sample, timestamp) else {
            return ForwardOutcome::SkippedNoPower;
        };

        self.last_forwarded_epoch = Some(sample.captured_at_epoch);
        match self.sink.post_state(&update).await {
            Ok(()) => {
                log::debug!("Forwarded {} W", update.state);
                ForwardOutcome::Posted
            }
            Err(e) => {
                log::warn!("Failed to post state to sink: {:#}", e);
                ForwardOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state_sink::fakes::RecordingSink;

    fn reading(watts: Option<f64>, at: i64) -> Sample {
        Sample {
            power_watts: watts,
            captured_at_epoch: at,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_missing_power_is_not_forwarded() {
        let sink = Arc::new(RecordingSink::default());
        let mut forwarder = SampleForwarder::new(sink.clone());

        assert_eq!(forwarder.forward(&reading(None, 1)).await, ForwardOutcome::SkippedNoPower);
        assert_eq!(sink.count(), 0);

        // A later reading with the same timestamp but real power still goes out.
        assert_eq!(forwarder.forward(&reading(Some(10.0), 1)).await, ForwardOutcome::Posted);
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_timestamp_is_suppressed() {
        let sink = Arc::new(RecordingSink::default());
        let mut forwarder = SampleForwarder::new(sink.clone());
        let sample = reading(Some(1200.0), 1_000);

        assert_eq!(forwarder.forward(&sample).await, ForwardOutcome::Posted);
        assert_eq!(forwarder.forward(&sample).await, ForwardOutcome::SkippedDuplicate);
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test]
    async fn test_each_distinct_reading_is_posted_once() {
        let sink = Arc::new(RecordingSink::default());
        let mut forwarder = SampleForwarder::new(sink.clone());

        for at in [1, 2, 3] {
            forwarder.forward(&reading(Some(at as f64), at)).await;
        }

        let posted = sink.posted.lock().unwrap();
        assert_eq!(posted.iter().map(|u| u.state).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failed_post_is_dropped() {
        let sink = Arc::new(RecordingSink { fail: true, ..Default::default() });
        let mut forwarder = SampleForwarder::new(sink.clone());
        let sample = reading(Some(5.0), 7);

        assert_eq!(forwarder.forward(&sample).await, ForwardOutcome::Failed);
        assert_eq!(forwarder.forward(&sample).await, ForwardOutcome::SkippedDuplicate);
        assert_eq!(sink.count(), 1);
    }
}
