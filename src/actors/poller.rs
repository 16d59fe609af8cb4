//! ReadingPollerActor - Picks up readings written by the ingestion path
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → readings_after(last_seen) → resolve sensor → send ReadingEvent → EvaluationActor
//!     ↑
//!     └─── Commands (PollNow, UpdateInterval, Shutdown)
//! ```
//!
//! Each poll drains the backlog page by page, so a burst of readings is picked
//! up in one poll rather than one page per interval. The reading channel is
//! bounded: when the evaluation side falls behind, sending waits, and
//! `last_seen` only moves past readings that were handed over.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, error, instrument, trace, warn};

use crate::config::PollConfig;
use crate::storage::ReadingStore;
use crate::{ReadingId, Sensor, SensorId};

use super::messages::{PollerCommand, ReadingEvent};

/// Actor that polls the reading store for new readings
pub struct ReadingPollerActor {
    store: Arc<dyn ReadingStore>,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<PollerCommand>,

    /// Bounded sender towards the evaluation actor
    reading_tx: mpsc::Sender<ReadingEvent>,

    /// Id of the last reading handed over or skipped
    last_seen: ReadingId,

    /// Page size for `readings_after`
    batch_limit: usize,

    /// Current polling interval
    interval_duration: Duration,
}

impl ReadingPollerActor {
    pub fn new(
        store: Arc<dyn ReadingStore>,
        config: &PollConfig,
        start_after: ReadingId,
        command_rx: mpsc::Receiver<PollerCommand>,
        reading_tx: mpsc::Sender<ReadingEvent>,
    ) -> Self {
        Self {
            store,
            command_rx,
            reading_tx,
            last_seen: start_after,
            batch_limit: config.batch_limit.max(1),
            interval_duration: Duration::from_secs(config.interval_secs.max(1)),
        }
    }

    /// Run the actor's main loop
    ///
    /// Runs until a Shutdown command is received or the command channel is
    /// closed.
    #[instrument(skip(self), fields(start_after = self.last_seen))]
    pub async fn run(mut self) {
        debug!("starting reading poller");

        let mut ticker = interval(self.interval_duration);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_readings().await {
                        error!("failed to poll readings: {:#}", e);
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        PollerCommand::PollNow { respond_to } => {
                            debug!("received PollNow command");
                            let result = self.poll_readings().await;
                            let _ = respond_to.send(result);
                        }

                        PollerCommand::UpdateInterval { interval_secs } => {
                            debug!("updating interval to {interval_secs}s");
                            self.interval_duration = Duration::from_secs(interval_secs.max(1));
                            ticker = interval(self.interval_duration);
                        }

                        PollerCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("reading poller stopped at reading {}", self.last_seen);
    }

    /// Hand every reading newer than `last_seen` to the evaluation actor.
    ///
    /// Readings of unknown or inactive sensors are skipped. On a store error
    /// or a closed channel the position stays at the last reading handed
    /// over, so the next poll retries from there.
    #[instrument(skip(self), fields(after = self.last_seen))]
    async fn poll_readings(&mut self) -> Result<usize> {
        let mut sensors: HashMap<SensorId, Option<Sensor>> = HashMap::new();
        let mut published = 0;

        loop {
            let page = self
                .store
                .readings_after(self.last_seen, self.batch_limit)
                .await
                .context("failed to read new readings")?;
            let last_page = page.len() < self.batch_limit;

            for reading in page {
                let sensor = match sensors.get(&reading.sensor_id) {
                    Some(sensor) => sensor.clone(),
                    None => {
                        let sensor = self
                            .store
                            .get_sensor(reading.sensor_id)
                            .await
                            .context("failed to look up sensor")?;
                        sensors.insert(reading.sensor_id, sensor.clone());
                        sensor
                    }
                };

                let Some(sensor) = sensor else {
                    warn!(
                        "reading {} references unknown sensor {}, skipping",
                        reading.id, reading.sensor_id
                    );
                    self.last_seen = reading.id;
                    continue;
                };

                if !sensor.is_active {
                    debug!(
                        "reading {} from inactive sensor {}, skipping",
                        reading.id, sensor.id
                    );
                    self.last_seen = reading.id;
                    continue;
                }

                let reading_id = reading.id;
                let event = ReadingEvent {
                    reading,
                    sensor,
                    observed_at: Utc::now(),
                };

                // Waits while the evaluation actor is at capacity
                self.reading_tx
                    .send(event)
                    .await
                    .context("evaluation channel closed")?;
                trace!("handed over reading {reading_id}");
                self.last_seen = reading_id;
                published += 1;
            }

            if last_page {
                break;
            }
        }

        if published > 0 {
            debug!("handed over {published} reading(s), now at {}", self.last_seen);
        }
        Ok(published)
    }
}

/// Handle for controlling a ReadingPollerActor
#[derive(Clone)]
pub struct PollerHandle {
    sender: mpsc::Sender<PollerCommand>,
}

impl PollerHandle {
    /// Spawn a poller that starts after reading `start_after`
    pub fn spawn(
        store: Arc<dyn ReadingStore>,
        config: &PollConfig,
        start_after: ReadingId,
        reading_tx: mpsc::Sender<ReadingEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = ReadingPollerActor::new(store, config, start_after, cmd_rx, reading_tx);

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Poll immediately; returns the number of readings handed over
    pub async fn poll_now(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PollerCommand::PollNow { respond_to: tx })
            .await
            .context("failed to send PollNow command")?;

        rx.await.context("failed to receive response")?
    }

    pub async fn update_interval(&self, interval_secs: u64) -> Result<()> {
        self.sender
            .send(PollerCommand::UpdateInterval { interval_secs })
            .await
            .context("failed to send UpdateInterval command")?;
        Ok(())
    }

    /// Gracefully shut down the poller
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(PollerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
