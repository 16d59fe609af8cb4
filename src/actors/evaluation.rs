//! EvaluationActor - Runs one evaluation per ingested reading
//!
//! Every `ReadingEvent` is handed to [`Evaluator::on_reading_ingested`], which
//! evaluates in a detached task. The actor keeps the join handles so it can
//! count outcomes and, on shutdown, let in-flight evaluations finish.
//!
//! At most [`MAX_IN_FLIGHT`] evaluations run at once. While at the limit the
//! actor stops receiving, so the bounded reading channel fills up and the
//! poller waits instead of readings being lost.
//!
//! ```text
//! ReadingEvent ──▶ on_reading_ingested ──▶ (task) ──▶ EvaluationSummary ──▶ stats
//!                          ↑
//!                          └─── Commands (GetStats, Pause, Resume, Shutdown)
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, trace, warn};

use crate::evaluator::{EvaluationSummary, Evaluator};

use super::messages::{EvaluationCommand, EvaluationStats, ReadingEvent};

/// Evaluations running concurrently before the actor stops taking readings
pub const MAX_IN_FLIGHT: usize = 64;

pub struct EvaluationActor {
    evaluator: Arc<Evaluator>,

    command_rx: mpsc::Receiver<EvaluationCommand>,

    /// Readings published by the poller
    reading_rx: mpsc::Receiver<ReadingEvent>,

    in_flight: FuturesUnordered<JoinHandle<EvaluationSummary>>,

    stats: EvaluationStats,
}

impl EvaluationActor {
    pub fn new(
        evaluator: Arc<Evaluator>,
        command_rx: mpsc::Receiver<EvaluationCommand>,
        reading_rx: mpsc::Receiver<ReadingEvent>,
    ) -> Self {
        Self {
            evaluator,
            command_rx,
            reading_rx,
            in_flight: FuturesUnordered::new(),
            stats: EvaluationStats::default(),
        }
    }

    /// Run until shutdown; returns the final counters once in-flight
    /// evaluations have finished.
    #[instrument(skip(self))]
    pub async fn run(mut self) -> EvaluationStats {
        debug!("starting evaluation actor");

        loop {
            tokio::select! {
                result = self.reading_rx.recv(), if self.in_flight.len() < MAX_IN_FLIGHT => {
                    match result {
                        Some(event) => self.handle_reading(event),
                        None => {
                            warn!("reading channel closed, shutting down");
                            break;
                        }
                    }
                }

                Some(finished) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    self.record(finished);
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        EvaluationCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.snapshot());
                        }

                        EvaluationCommand::Pause => {
                            debug!("pausing evaluations");
                            self.stats.paused = true;
                        }

                        EvaluationCommand::Resume => {
                            debug!("resuming evaluations");
                            self.stats.paused = false;
                        }

                        EvaluationCommand::Shutdown => {
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

        if !self.in_flight.is_empty() {
            debug!("waiting for {} in-flight evaluation(s)", self.in_flight.len());
        }
        while let Some(finished) = self.in_flight.next().await {
            self.record(finished);
        }

        debug!("evaluation actor stopped");
        self.snapshot()
    }

    fn handle_reading(&mut self, event: ReadingEvent) {
        self.stats.readings_received += 1;

        if self.stats.paused {
            trace!("paused, skipping reading {}", event.reading.id);
            self.stats.readings_skipped += 1;
            return;
        }

        let handle = self
            .evaluator
            .on_reading_ingested(event.reading, event.sensor);
        self.in_flight.push(handle);
    }

    fn record(&mut self, finished: Result<EvaluationSummary, tokio::task::JoinError>) {
        match finished {
            Ok(summary) => {
                let report = summary.report();
                self.stats.evaluations_completed += 1;
                self.stats.messages_delivered += report.delivered as u64;
                self.stats.messages_failed += report.failed as u64;
                self.stats.messages_dropped += report.dropped as u64;
                self.stats.metric_errors += summary.errors() as u64;
            }
            Err(e) => {
                error!("evaluation task failed: {e}");
                self.stats.evaluations_completed += 1;
            }
        }
    }

    fn snapshot(&self) -> EvaluationStats {
        EvaluationStats {
            in_flight: self.in_flight.len(),
            ..self.stats.clone()
        }
    }
}

/// Handle for controlling the EvaluationActor
#[derive(Clone)]
pub struct EvaluationHandle {
    sender: mpsc::Sender<EvaluationCommand>,
}

impl EvaluationHandle {
    /// Spawn the actor; returns the handle and the actor's task, which
    /// resolves to the final counters
    pub fn spawn(
        evaluator: Arc<Evaluator>,
        reading_rx: mpsc::Receiver<ReadingEvent>,
    ) -> (Self, JoinHandle<EvaluationStats>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = EvaluationActor::new(evaluator, cmd_rx, reading_rx);
        let task = tokio::spawn(actor.run());
        (Self { sender: cmd_tx }, task)
    }

    pub async fn get_stats(&self) -> Result<EvaluationStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EvaluationCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;
        rx.await.context("failed to receive stats")
    }

    pub async fn pause(&self) -> Result<()> {
        self.sender
            .send(EvaluationCommand::Pause)
            .await
            .context("failed to send Pause command")
    }

    pub async fn resume(&self) -> Result<()> {
        self.sender
            .send(EvaluationCommand::Resume)
            .await
            .context("failed to send Resume command")
    }

    /// Stop after in-flight evaluations complete
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(EvaluationCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")
    }
}
