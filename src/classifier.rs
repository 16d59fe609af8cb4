//! Severity classification of single measurements
//!
//! Classification is a pure, total function of `(metric, value)`:
//!
//! ```text
//! UV:   0 ──── 2 ──── 5 ──── 7 ────────────▶
//!        Low   Moderate  High   Very High
//!
//! AQI:  0 ─── 50 ─── 100 ─── 150 ─── 200 ──▶
//!        Good  Moderate  USG  Unhealthy  Hazardous
//! ```
//!
//! Cut points are inclusive upper bounds. Anything below the first cut point
//! (including negative sensor glitches) is the lowest level, anything above the
//! last one is the topmost level.

use serde::Serialize;

use crate::MetricType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum UvLevel {
    Low,
    Moderate,
    High,
    VeryHigh,
}

impl UvLevel {
    pub fn evaluate(value: f64) -> UvLevel {
        if value <= 2.0 {
            UvLevel::Low
        } else if value <= 5.0 {
            UvLevel::Moderate
        } else if value <= 7.0 {
            UvLevel::High
        } else {
            UvLevel::VeryHigh
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            UvLevel::Low => "Low",
            UvLevel::Moderate => "Moderate",
            UvLevel::High => "High",
            UvLevel::VeryHigh => "Very High",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            UvLevel::Low => "#4CAF50",
            UvLevel::Moderate => "#FFC107",
            UvLevel::High => "#FF9800",
            UvLevel::VeryHigh => "#F44336",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum AqiLevel {
    Good,
    Moderate,
    UnhealthyForSensitiveGroups,
    Unhealthy,
    Hazardous,
}

impl AqiLevel {
    pub fn evaluate(value: f64) -> AqiLevel {
        if value <= 50.0 {
            AqiLevel::Good
        } else if value <= 100.0 {
            AqiLevel::Moderate
        } else if value <= 150.0 {
            AqiLevel::UnhealthyForSensitiveGroups
        } else if value <= 200.0 {
            AqiLevel::Unhealthy
        } else {
            AqiLevel::Hazardous
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AqiLevel::Good => "Good",
            AqiLevel::Moderate => "Moderate",
            AqiLevel::UnhealthyForSensitiveGroups => "Unhealthy for Sensitive Groups",
            AqiLevel::Unhealthy => "Unhealthy",
            AqiLevel::Hazardous => "Hazardous",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            AqiLevel::Good => "#4CAF50",
            AqiLevel::Moderate => "#FFC107",
            AqiLevel::UnhealthyForSensitiveGroups => "#FF9800",
            AqiLevel::Unhealthy => "#F44336",
            AqiLevel::Hazardous => "#9C27B0",
        }
    }
}

/// Result of classifying one measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub metric: MetricType,
    pub level: &'static str,
    pub color: &'static str,
    /// 0 is the mildest level; higher is more severe
    pub rank: u8,
}

pub fn classify(metric: MetricType, value: f64) -> Classification {
    match metric {
        MetricType::Uv => {
            let level = UvLevel::evaluate(value);
            Classification {
                metric,
                level: level.name(),
                color: level.color(),
                rank: level as u8,
            }
        }
        MetricType::Aqi => {
            let level = AqiLevel::evaluate(value);
            Classification {
                metric,
                level: level.name(),
                color: level.color(),
                rank: level as u8,
            }
        }
    }
}

/// Lowest severity rank that warrants a fan-out to every reachable recipient.
pub fn escalation_cutoff(metric: MetricType) -> u8 {
    match metric {
        MetricType::Uv => UvLevel::High as u8,
        MetricType::Aqi => AqiLevel::Unhealthy as u8,
    }
}

/// Map a configured band level name onto a severity rank.
///
/// Band names come from administrators, so matching ignores case, spaces,
/// `-` and `_`. `critical` is the legacy name of the topmost band.
pub fn level_rank(metric: MetricType, level: &str) -> Option<u8> {
    let normalized: String = level
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .flat_map(char::to_lowercase)
        .collect();

    let rank = match (metric, normalized.as_str()) {
        (MetricType::Uv, "low") => UvLevel::Low as u8,
        (MetricType::Uv, "moderate") => UvLevel::Moderate as u8,
        (MetricType::Uv, "high") => UvLevel::High as u8,
        (MetricType::Uv, "veryhigh" | "critical" | "extreme") => UvLevel::VeryHigh as u8,
        (MetricType::Aqi, "good") => AqiLevel::Good as u8,
        (MetricType::Aqi, "moderate") => AqiLevel::Moderate as u8,
        (MetricType::Aqi, "unhealthyforsensitivegroups" | "sensitive" | "usg") => {
            AqiLevel::UnhealthyForSensitiveGroups as u8
        }
        (MetricType::Aqi, "unhealthy") => AqiLevel::Unhealthy as u8,
        (MetricType::Aqi, "hazardous" | "veryunhealthy" | "critical") => {
            AqiLevel::Hazardous as u8
        }
        _ => return None,
    };

    Some(rank)
}

/// Whether a band with this level name is at or above the escalation cutoff.
///
/// Unknown level names never escalate.
pub fn escalates(metric: MetricType, level: &str) -> bool {
    level_rank(metric, level).is_some_and(|rank| rank >= escalation_cutoff(metric))
}
