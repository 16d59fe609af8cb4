pub mod actors;
pub mod classifier;
pub mod composer;
pub mod config;
pub mod dispatcher;
pub mod evaluator;
pub mod matcher;
pub mod push;
pub mod storage;
pub mod util;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type SensorId = i64;
pub type ReadingId = i64;

/// A monitored quantity that is classified, matched and notified on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricType {
    #[serde(rename = "UV")]
    Uv,
    #[serde(rename = "AQI")]
    Aqi,
}

impl MetricType {
    pub const ALL: [MetricType; 2] = [MetricType::Uv, MetricType::Aqi];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Uv => "UV",
            MetricType::Aqi => "AQI",
        }
    }

    /// Format a measured value with the precision used in user-facing text.
    pub fn format_value(&self, value: f64) -> String {
        match self {
            MetricType::Uv => format!("{value:.1}"),
            MetricType::Aqi => format!("{value:.0}"),
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UV" => Ok(MetricType::Uv),
            "AQI" => Ok(MetricType::Aqi),
            other => Err(format!("unknown metric type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: SensorId,
    pub name: String,
    /// Free text, used in notification bodies
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// One ingested measurement set. Absent values are skipped, never treated as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: ReadingId,
    pub sensor_id: SensorId,
    pub uv_index: Option<f64>,
    pub aqi: Option<f64>,
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn value(&self, metric: MetricType) -> Option<f64> {
        match metric {
            MetricType::Uv => self.uv_index,
            MetricType::Aqi => self.aqi,
        }
    }

    /// All monitored metrics carried by this reading, in evaluation order.
    pub fn monitored_values(&self) -> Vec<(MetricType, f64)> {
        MetricType::ALL
            .iter()
            .filter_map(|metric| self.value(*metric).map(|value| (*metric, value)))
            .filter(|(_, value)| value.is_finite())
            .collect()
    }
}
