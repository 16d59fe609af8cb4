//! Subscription and recipient records
//!
//! These are the rows the evaluation engine reads fresh on every pass:
//! personal thresholds, global severity bands and recipients.

use serde::{Deserialize, Serialize};

use crate::{MetricType, UserId};

/// A user-chosen "warn me at or above X" trigger for one metric type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalThreshold {
    pub id: i64,
    pub user_id: UserId,
    pub metric: MetricType,
    pub value: f64,
    pub notification_enabled: bool,
}

impl PersonalThreshold {
    /// Whether a reading of `value` should alert the owner.
    pub fn triggers(&self, value: f64) -> bool {
        self.notification_enabled && self.value <= value
    }
}

/// Create-or-update request for a personal threshold.
///
/// There is at most one threshold per `(user_id, metric)`. Upserting an existing
/// pair replaces its value. `notification_enabled: None` keeps the stored flag
/// (or enables notifications when the threshold is new).
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdUpsert {
    pub user_id: UserId,
    pub metric: MetricType,
    pub value: f64,
    pub notification_enabled: Option<bool>,
}

/// An administrator-defined severity range shared by all users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalBand {
    pub id: i64,
    pub metric: MetricType,
    pub level: String,
    /// Inclusive lower bound
    pub min_value: f64,
    /// Inclusive upper bound, `None` is unbounded
    pub max_value: Option<f64>,
    pub color: Option<String>,
    /// Advisory text appended to global alerts
    pub message: Option<String>,
}

impl GlobalBand {
    pub fn contains(&self, value: f64) -> bool {
        self.min_value <= value && self.max_value.is_none_or(|max| max >= value)
    }
}

/// Create-or-update request for a global band, keyed by `(metric, level)`.
///
/// `color` and `message` set to `None` keep whatever is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct BandUpsert {
    pub metric: MetricType,
    pub level: String,
    pub min_value: f64,
    pub max_value: Option<f64>,
    pub color: Option<String>,
    pub message: Option<String>,
}

/// A user as seen by the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub user_id: UserId,
    pub push_token: Option<String>,
    pub enabled: bool,
}

impl Recipient {
    /// Delivery address, if the recipient is reachable at all.
    pub fn address(&self) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        self.push_token.as_deref().filter(|token| !token.is_empty())
    }
}

/// One entry of a fan-out page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReachableRecipient {
    pub user_id: UserId,
    pub address: String,
}

/// A structural problem in the configured bands of one metric type
#[derive(Debug, Clone, PartialEq)]
pub enum BandIssue {
    /// The lowest band does not start at 0
    DoesNotStartAtZero { level: String, min_value: f64 },

    /// `max_value < min_value`
    Inverted { level: String },

    /// Two bands both contain some values
    Overlap { lower: String, upper: String },

    /// Values between two bands match neither
    Gap { lower: String, upper: String },

    /// An unbounded band is followed by another band
    UnboundedNotLast { level: String },

    /// The topmost band has a finite upper bound
    BoundedTop { level: String },
}

/// Check that the bands of one metric type are non-overlapping and cover `[0, ∞)`.
///
/// Adjacent bands may share an endpoint (`[0, 50]`, `[50, 100]`); the shared
/// value belongs to the lower band. The matcher assumes this holds; callers that
/// write bands can use it to reject misconfigurations before they reach evaluation.
pub fn validate_bands(bands: &[GlobalBand]) -> Result<(), Vec<BandIssue>> {
    let mut sorted: Vec<&GlobalBand> = bands.iter().collect();
    sorted.sort_by(|a, b| a.min_value.total_cmp(&b.min_value));

    let mut issues = vec![];

    if let Some(first) = sorted.first()
        && first.min_value > 0.0
    {
        issues.push(BandIssue::DoesNotStartAtZero {
            level: first.level.clone(),
            min_value: first.min_value,
        });
    }

    for band in &sorted {
        if band.max_value.is_some_and(|max| max < band.min_value) {
            issues.push(BandIssue::Inverted {
                level: band.level.clone(),
            });
        }
    }

    for pair in sorted.windows(2) {
        let (lower, upper) = (pair[0], pair[1]);
        match lower.max_value {
            None => issues.push(BandIssue::UnboundedNotLast {
                level: lower.level.clone(),
            }),
            Some(max) if upper.min_value < max => issues.push(BandIssue::Overlap {
                lower: lower.level.clone(),
                upper: upper.level.clone(),
            }),
            Some(max) if upper.min_value > max => issues.push(BandIssue::Gap {
                lower: lower.level.clone(),
                upper: upper.level.clone(),
            }),
            Some(_) => {}
        }
    }

    if let Some(last) = sorted.last()
        && last.max_value.is_some()
    {
        issues.push(BandIssue::BoundedTop {
            level: last.level.clone(),
        });
    }

    if issues.is_empty() { Ok(()) } else { Err(issues) }
}
