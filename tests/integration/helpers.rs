//! Helper functions for integration tests

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use enviro_notify::{
    MetricType, Reading, Sensor, UserId,
    push::{GatewayError, PushGateway, PushMessage, PushTicket},
    storage::{
        BandUpsert, GlobalBand, MemoryBackend, PersonalThreshold, Recipient, StorageError,
        StorageResult, SubscriptionStore, ThresholdUpsert,
    },
};

pub fn create_test_sensor(id: i64) -> Sensor {
    Sensor {
        id,
        name: format!("Sensor {id}"),
        location: "Plaza 9 de Julio".to_string(),
        latitude: -27.3671,
        longitude: -55.8961,
        is_active: true,
    }
}

pub fn create_test_reading(sensor_id: i64, uv: Option<f64>, aqi: Option<f64>) -> Reading {
    Reading {
        id: 0,
        sensor_id,
        uv_index: uv,
        aqi,
        pm25: Some(12.0),
        pm10: Some(20.0),
        temperature: Some(31.5),
        humidity: Some(48.0),
        timestamp: Utc::now(),
    }
}

pub fn push_token(user_id: UserId) -> String {
    format!("ExponentPushToken[user-{user_id}]")
}

/// Register `count` reachable recipients with ids `1..=count`
pub async fn add_reachable_recipients(backend: &MemoryBackend, count: i64) {
    for user_id in 1..=count {
        backend
            .upsert_recipient(Recipient {
                user_id,
                push_token: Some(push_token(user_id)),
                enabled: true,
            })
            .await;
    }
}

pub fn threshold(user_id: UserId, metric: MetricType, value: f64) -> ThresholdUpsert {
    ThresholdUpsert {
        user_id,
        metric,
        value,
        notification_enabled: Some(true),
    }
}

pub fn band(metric: MetricType, level: &str, min: f64, max: Option<f64>) -> BandUpsert {
    BandUpsert {
        metric,
        level: level.to_string(),
        min_value: min,
        max_value: max,
        color: None,
        message: None,
    }
}

/// Push gateway double that records every submitted batch.
///
/// Calls are numbered from 1 in submission order.
#[derive(Default)]
pub struct MockGateway {
    calls: Mutex<Vec<Vec<PushMessage>>>,
    failing_calls: HashSet<usize>,
    hanging_calls: HashSet<usize>,
    rejected: HashSet<String>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `call`-th submission with a 503
    pub fn failing_call(mut self, call: usize) -> Self {
        self.failing_calls.insert(call);
        self
    }

    /// Never answer the `call`-th submission
    pub fn hanging_call(mut self, call: usize) -> Self {
        self.hanging_calls.insert(call);
        self
    }

    /// Answer messages to `address` with an error ticket
    pub fn rejecting(mut self, address: impl Into<String>) -> Self {
        self.rejected.insert(address.into());
        self
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.calls.lock().unwrap().iter().map(Vec::len).collect()
    }

    pub fn sent(&self) -> Vec<PushMessage> {
        self.calls.lock().unwrap().concat()
    }

    pub fn sent_to(&self, address: &str) -> Vec<PushMessage> {
        self.sent().into_iter().filter(|m| m.to == address).collect()
    }
}

#[async_trait]
impl PushGateway for MockGateway {
    async fn submit_batch(&self, messages: &[PushMessage]) -> Result<Vec<PushTicket>, GatewayError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(messages.to_vec());
            calls.len()
        };

        if self.hanging_calls.contains(&call) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        if self.failing_calls.contains(&call) {
            return Err(GatewayError::Status {
                status: 503,
                body: "service unavailable".to_string(),
            });
        }

        Ok(messages
            .iter()
            .enumerate()
            .map(|(i, message)| {
                if self.rejected.contains(&message.to) {
                    PushTicket::Error {
                        message: format!("{} is not a registered push recipient", message.to),
                        details: None,
                    }
                } else {
                    PushTicket::Ok {
                        id: format!("ticket-{call}-{i}"),
                    }
                }
            })
            .collect())
    }
}

/// Subscription store that fails every query for one metric type
pub struct FailingForMetric {
    pub inner: Arc<MemoryBackend>,
    pub failing: MetricType,
}

impl FailingForMetric {
    fn check(&self, metric: MetricType) -> StorageResult<()> {
        if metric == self.failing {
            Err(StorageError::ConnectionFailed("connection reset".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SubscriptionStore for FailingForMetric {
    async fn list_personal_thresholds(
        &self,
        metric: MetricType,
        value: f64,
    ) -> StorageResult<Vec<PersonalThreshold>> {
        self.check(metric)?;
        self.inner.list_personal_thresholds(metric, value).await
    }

    async fn find_global_band(
        &self,
        metric: MetricType,
        value: f64,
    ) -> StorageResult<Option<GlobalBand>> {
        self.check(metric)?;
        self.inner.find_global_band(metric, value).await
    }

    async fn upsert_personal_threshold(
        &self,
        upsert: ThresholdUpsert,
    ) -> StorageResult<PersonalThreshold> {
        self.inner.upsert_personal_threshold(upsert).await
    }

    async fn delete_personal_threshold(&self, user_id: UserId, id: i64) -> StorageResult<()> {
        self.inner.delete_personal_threshold(user_id, id).await
    }

    async fn list_user_thresholds(&self, user_id: UserId) -> StorageResult<Vec<PersonalThreshold>> {
        self.inner.list_user_thresholds(user_id).await
    }

    async fn list_global_bands(&self, metric: MetricType) -> StorageResult<Vec<GlobalBand>> {
        self.check(metric)?;
        self.inner.list_global_bands(metric).await
    }

    async fn upsert_global_band(&self, upsert: BandUpsert) -> StorageResult<GlobalBand> {
        self.inner.upsert_global_band(upsert).await
    }

    async fn delete_global_band(&self, id: i64) -> StorageResult<()> {
        self.inner.delete_global_band(id).await
    }
}
