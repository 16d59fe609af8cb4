//! Per-reading evaluation pipeline
//!
//! For every monitored metric a reading carries:
//!
//! ```text
//! classify ─▶ match ─▶ compose ─┬─▶ deliver (personal)
//!                               └─▶ fan_out (global)
//! ```
//!
//! Metrics are evaluated independently; a store failure aborts only the
//! pipeline of the metric it happened in. Nothing is returned as an error.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::classifier::{Classification, classify};
use crate::composer::{global_alert, personal_alert};
use crate::dispatcher::{AddressedNotification, DeliveryReport, DispatchConfig, Dispatcher};
use crate::matcher::{MatchResult, ThresholdMatcher};
use crate::push::PushGateway;
use crate::storage::{GlobalBand, RecipientDirectory, StorageError, StorageResult, SubscriptionStore};
use crate::{MetricType, Reading, ReadingId, Sensor, SensorId};

/// Why a metric's pipeline was aborted
#[derive(Debug)]
pub enum EvaluationError {
    Storage(StorageError),

    /// A store call did not answer within the store timeout
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationError::Storage(err) => write!(f, "store failure: {}", err),
            EvaluationError::Timeout { operation, after } => {
                write!(f, "store call {} timed out after {:?}", operation, after)
            }
        }
    }
}

impl std::error::Error for EvaluationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EvaluationError::Storage(err) => Some(err),
            EvaluationError::Timeout { .. } => None,
        }
    }
}

impl From<StorageError> for EvaluationError {
    fn from(err: StorageError) -> Self {
        EvaluationError::Storage(err)
    }
}

/// Run a store call with a deadline.
pub(crate) async fn store_call<T>(
    operation: &'static str,
    after: Duration,
    call: impl Future<Output = StorageResult<T>>,
) -> Result<T, EvaluationError> {
    match tokio::time::timeout(after, call).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(EvaluationError::Timeout { operation, after }),
    }
}

/// What one metric's pipeline did
#[derive(Debug)]
pub struct MetricDispatch {
    pub personal_matches: usize,
    /// The band the value fell into, escalated or not
    pub band: Option<GlobalBand>,
    /// Whether the band warranted a fan-out
    pub escalated: bool,
    pub personal: DeliveryReport,
    pub fan_out: Option<DeliveryReport>,
}

#[derive(Debug)]
pub struct MetricEvaluation {
    pub metric: MetricType,
    pub value: f64,
    pub classification: Classification,
    pub outcome: Result<MetricDispatch, EvaluationError>,
}

/// Result of evaluating one reading
#[derive(Debug)]
pub struct EvaluationSummary {
    pub reading_id: ReadingId,
    pub sensor_id: SensorId,
    pub metrics: Vec<MetricEvaluation>,
}

impl EvaluationSummary {
    pub fn metric(&self, metric: MetricType) -> Option<&MetricEvaluation> {
        self.metrics.iter().find(|m| m.metric == metric)
    }

    /// All delivery reports of this reading merged into one.
    pub fn report(&self) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for dispatch in self.metrics.iter().filter_map(|m| m.outcome.as_ref().ok()) {
            report.merge(dispatch.personal.clone());
            if let Some(fan_out) = &dispatch.fan_out {
                report.merge(fan_out.clone());
            }
        }
        report
    }

    /// Number of metric pipelines aborted by a store failure.
    pub fn errors(&self) -> usize {
        self.metrics.iter().filter(|m| m.outcome.is_err()).count()
    }
}

/// Entry point for ingested readings
pub struct Evaluator {
    matcher: ThresholdMatcher,
    dispatcher: Dispatcher,
}

impl Evaluator {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        directory: Arc<dyn RecipientDirectory>,
        gateway: Arc<dyn PushGateway>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            matcher: ThresholdMatcher::new(subscriptions, config.store_timeout),
            dispatcher: Dispatcher::new(directory, gateway, config),
        }
    }

    /// Evaluate in the background and return immediately.
    pub fn on_reading_ingested(
        self: &Arc<Self>,
        reading: Reading,
        sensor: Sensor,
    ) -> JoinHandle<EvaluationSummary> {
        let evaluator = Arc::clone(self);
        tokio::spawn(async move { evaluator.evaluate(&reading, &sensor).await })
    }

    #[instrument(skip_all, fields(reading_id = reading.id, sensor_id = sensor.id))]
    pub async fn evaluate(&self, reading: &Reading, sensor: &Sensor) -> EvaluationSummary {
        let values = reading.monitored_values();
        if values.is_empty() {
            debug!("reading carries no monitored values");
        }

        let metrics = join_all(
            values
                .into_iter()
                .map(|(metric, value)| self.evaluate_metric(metric, value, sensor)),
        )
        .await;

        let summary = EvaluationSummary {
            reading_id: reading.id,
            sensor_id: sensor.id,
            metrics,
        };

        let report = summary.report();
        info!(
            "reading {} evaluated: {} delivered, {} failed, {} dropped, {} aborted metric(s)",
            reading.id,
            report.delivered,
            report.failed,
            report.dropped,
            summary.errors()
        );
        summary
    }

    #[instrument(skip(self, sensor), fields(sensor_id = sensor.id))]
    async fn evaluate_metric(&self, metric: MetricType, value: f64, sensor: &Sensor) -> MetricEvaluation {
        let classification = classify(metric, value);
        debug!("{metric} {value} classified as {}", classification.level);

        let outcome = match self.matcher.match_reading(metric, value, sensor).await {
            Ok(matched) => Ok(self.dispatch(matched, sensor).await),
            Err(e) => {
                error!("{metric} evaluation of sensor {} aborted: {e}", sensor.id);
                Err(e)
            }
        };

        MetricEvaluation {
            metric,
            value,
            classification,
            outcome,
        }
    }

    async fn dispatch(&self, matched: MatchResult, sensor: &Sensor) -> MetricDispatch {
        let MatchResult {
            metric,
            value,
            personal,
            global,
        } = matched;

        let addressed: Vec<AddressedNotification> = personal
            .iter()
            .map(|threshold| AddressedNotification {
                user_id: threshold.user_id,
                notification: personal_alert(metric, value, sensor, threshold),
            })
            .collect();

        let global_notification = global
            .as_ref()
            .and_then(|band| global_alert(metric, value, sensor, band));
        let escalated = global_notification.is_some();

        if let Some(band) = &global
            && !escalated
        {
            debug!("{metric} band '{}' is below the escalation cutoff", band.level);
        }

        let (personal_report, fan_out) = tokio::join!(
            self.dispatcher.deliver(addressed),
            async {
                match global_notification {
                    Some(notification) => Some(self.dispatcher.fan_out(notification).await),
                    None => None,
                }
            }
        );

        MetricDispatch {
            personal_matches: personal.len(),
            band: global,
            escalated,
            personal: personal_report,
            fan_out,
        }
    }
}
