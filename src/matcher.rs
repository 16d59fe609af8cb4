//! Threshold matching for a single measurement

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::evaluator::{EvaluationError, store_call};
use crate::storage::{GlobalBand, PersonalThreshold, SubscriptionStore};
use crate::{MetricType, Sensor};

/// Everything one measurement triggered
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub metric: MetricType,
    pub value: f64,
    /// Triggered personal thresholds, at most one per user
    pub personal: Vec<PersonalThreshold>,
    /// The band containing the value, regardless of escalation
    pub global: Option<GlobalBand>,
}

/// Finds the personal thresholds and the global band a value falls into.
///
/// Reads the subscription store on every call.
pub struct ThresholdMatcher {
    store: Arc<dyn SubscriptionStore>,
    store_timeout: Duration,
}

impl ThresholdMatcher {
    pub fn new(store: Arc<dyn SubscriptionStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    #[instrument(skip(self, sensor), fields(sensor_id = sensor.id))]
    pub async fn match_reading(
        &self,
        metric: MetricType,
        value: f64,
        sensor: &Sensor,
    ) -> Result<MatchResult, EvaluationError> {
        let (thresholds, band) = tokio::try_join!(
            store_call(
                "list_personal_thresholds",
                self.store_timeout,
                self.store.list_personal_thresholds(metric, value),
            ),
            store_call(
                "find_global_band",
                self.store_timeout,
                self.store.find_global_band(metric, value),
            ),
        )?;

        let mut seen = HashSet::new();
        let personal: Vec<PersonalThreshold> = thresholds
            .into_iter()
            .filter(|threshold| threshold.metric == metric && threshold.triggers(value))
            .filter(|threshold| seen.insert(threshold.user_id))
            .collect();

        let global = band.filter(|band| {
            let matches = band.metric == metric && band.contains(value);
            if !matches {
                warn!(
                    "store returned band '{}' ({}) that does not contain {value}",
                    band.level, band.metric
                );
            }
            matches
        });

        debug!(
            "{metric} {value}: {} personal match(es), band {:?}",
            personal.len(),
            global.as_ref().map(|band| band.level.as_str())
        );

        Ok(MatchResult {
            metric,
            value,
            personal,
            global,
        })
    }
}
