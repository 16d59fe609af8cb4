//! Notification text and payloads
//!
//! Everything here is pure: the same match always yields the same message.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::classifier::escalates;
use crate::storage::{GlobalBand, PersonalThreshold};
use crate::{MetricType, Sensor};

/// A message ready to be addressed to one or more recipients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub data: Value,
}

fn personal_title(metric: MetricType) -> &'static str {
    match metric {
        MetricType::Uv => "⚠️ UV Alert",
        MetricType::Aqi => "⚠️ Air Quality Alert",
    }
}

fn global_title(metric: MetricType) -> &'static str {
    match metric {
        MetricType::Uv => "🌞 Global UV Alert",
        MetricType::Aqi => "🏭 Global Air Quality Alert",
    }
}

/// Alert for the owner of a triggered personal threshold.
pub fn personal_alert(
    metric: MetricType,
    value: f64,
    sensor: &Sensor,
    threshold: &PersonalThreshold,
) -> Notification {
    let subject = match metric {
        MetricType::Uv => "UV index",
        MetricType::Aqi => "AQI",
    };

    Notification {
        title: personal_title(metric).to_string(),
        body: format!(
            "The {} at {} is {}, reaching your threshold of {}",
            subject,
            sensor.location,
            metric.format_value(value),
            threshold.value
        ),
        data: json!({
            "type": metric.as_str(),
            "value": value,
            "sensorId": sensor.id,
        }),
    }
}

/// Alert for every reachable recipient, or `None` when the band is below the
/// escalation cutoff of its metric type.
pub fn global_alert(
    metric: MetricType,
    value: f64,
    sensor: &Sensor,
    band: &GlobalBand,
) -> Option<Notification> {
    if !escalates(metric, &band.level) {
        return None;
    }

    let reading = match metric {
        MetricType::Uv => format!("UV radiation level ({})", metric.format_value(value)),
        MetricType::Aqi => format!("air quality level (AQI: {})", metric.format_value(value)),
    };
    let advisory = band.message.as_deref().unwrap_or_default();
    let body = format!(
        "{} {} at {}. {}",
        band.level, reading, sensor.location, advisory
    );

    Some(Notification {
        title: global_title(metric).to_string(),
        body: body.trim_end().to_string(),
        data: json!({
            "type": format!("{}_GLOBAL", metric.as_str()),
            "value": value,
            "level": band.level,
            "sensorId": sensor.id,
        }),
    })
}
