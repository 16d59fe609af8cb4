//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to specific actors via mpsc
//! 2. **Events**: Readings flow to the evaluation actor over a bounded channel
//! 3. **Immutability**: Events are cloneable

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::{Reading, Sensor};

/// Event published when the poller picks up a newly ingested reading
///
/// Sent over a bounded channel; the poller waits for capacity rather than
/// dropping readings.
#[derive(Debug, Clone)]
pub struct ReadingEvent {
    pub reading: Reading,

    /// The sensor the reading came from
    pub sensor: Sensor,

    /// When the poller picked the reading up
    pub observed_at: DateTime<Utc>,
}

/// Commands that can be sent to a ReadingPollerActor
#[derive(Debug)]
pub enum PollerCommand {
    /// Poll immediately, bypassing the interval timer
    PollNow {
        /// Number of readings published
        respond_to: oneshot::Sender<anyhow::Result<usize>>,
    },

    /// Update the polling interval
    UpdateInterval { interval_secs: u64 },

    /// Gracefully shut down the poller
    Shutdown,
}

/// Commands that can be sent to the EvaluationActor
#[derive(Debug)]
pub enum EvaluationCommand {
    GetStats {
        respond_to: oneshot::Sender<EvaluationStats>,
    },

    /// Stop evaluating incoming readings; they are counted and skipped
    Pause,

    Resume,

    /// Wait for in-flight evaluations, then stop
    Shutdown,
}

/// Counters kept by the EvaluationActor
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationStats {
    pub readings_received: u64,

    /// Received while paused
    pub readings_skipped: u64,

    pub evaluations_completed: u64,

    pub messages_delivered: u64,

    pub messages_failed: u64,

    pub messages_dropped: u64,

    /// Metric pipelines aborted by store failures
    pub metric_errors: u64,

    pub in_flight: usize,

    pub paused: bool,
}
