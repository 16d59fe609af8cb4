//! In-memory store backend (no persistence)
//!
//! Implements every store trait on top of plain collections behind a single
//! `RwLock`. It's useful for:
//! - Tests without database dependencies
//! - Running the notifier with `"backend": "none"`
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Single lock**: Writers block all readers

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::backend::{ReadingStore, RecipientDirectory, SubscriptionStore};
use super::error::{StorageError, StorageResult};
use super::schema::{
    BandUpsert, GlobalBand, PersonalThreshold, ReachableRecipient, Recipient, ThresholdUpsert,
};
use crate::{MetricType, Reading, ReadingId, Sensor, SensorId, UserId};

#[derive(Default)]
struct Inner {
    sensors: HashMap<SensorId, Sensor>,
    readings: BTreeMap<ReadingId, Reading>,
    recipients: BTreeMap<UserId, Recipient>,
    thresholds: Vec<PersonalThreshold>,
    bands: Vec<GlobalBand>,
    next_reading_id: ReadingId,
    next_threshold_id: i64,
    next_band_id: i64,
}

/// In-memory backend implementing all three stores
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    /// Create a new, empty in-memory backend
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_sensor(&self, sensor: Sensor) {
        self.inner.write().await.sensors.insert(sensor.id, sensor);
    }

    /// Store a reading. An id of `0` is replaced with the next free id.
    pub async fn insert_reading(&self, mut reading: Reading) -> Reading {
        let mut inner = self.inner.write().await;
        if reading.id == 0 {
            inner.next_reading_id += 1;
            reading.id = inner.next_reading_id;
        } else {
            inner.next_reading_id = inner.next_reading_id.max(reading.id);
        }
        inner.readings.insert(reading.id, reading.clone());
        reading
    }

    pub async fn upsert_recipient(&self, recipient: Recipient) {
        self.inner
            .write()
            .await
            .recipients
            .insert(recipient.user_id, recipient);
    }
}

#[async_trait]
impl ReadingStore for MemoryBackend {
    async fn get_reading(&self, id: ReadingId) -> StorageResult<Option<Reading>> {
        Ok(self.inner.read().await.readings.get(&id).cloned())
    }

    async fn get_sensor(&self, id: SensorId) -> StorageResult<Option<Sensor>> {
        Ok(self.inner.read().await.sensors.get(&id).cloned())
    }

    async fn readings_after(&self, after: ReadingId, limit: usize) -> StorageResult<Vec<Reading>> {
        let inner = self.inner.read().await;
        Ok(inner
            .readings
            .range(after.saturating_add(1)..)
            .take(limit)
            .map(|(_, reading)| reading.clone())
            .collect())
    }

    async fn latest_reading_id(&self) -> StorageResult<Option<ReadingId>> {
        Ok(self.inner.read().await.readings.keys().next_back().copied())
    }
}

#[async_trait]
impl SubscriptionStore for MemoryBackend {
    async fn list_personal_thresholds(
        &self,
        metric: MetricType,
        value: f64,
    ) -> StorageResult<Vec<PersonalThreshold>> {
        let inner = self.inner.read().await;
        Ok(inner
            .thresholds
            .iter()
            .filter(|t| t.metric == metric && t.triggers(value))
            .cloned()
            .collect())
    }

    async fn find_global_band(
        &self,
        metric: MetricType,
        value: f64,
    ) -> StorageResult<Option<GlobalBand>> {
        let inner = self.inner.read().await;
        let mut matching: Vec<&GlobalBand> = inner
            .bands
            .iter()
            .filter(|band| band.metric == metric && band.contains(value))
            .collect();
        matching.sort_by(|a, b| a.min_value.total_cmp(&b.min_value));

        if let [lower, upper, ..] = matching.as_slice()
            && lower.max_value.is_none_or(|max| upper.min_value < max)
        {
            warn!(
                "{metric} bands overlap at {value}: {} bands match, using '{}'",
                matching.len(),
                lower.level
            );
        }

        Ok(matching.first().map(|band| (*band).clone()))
    }

    async fn upsert_personal_threshold(
        &self,
        upsert: ThresholdUpsert,
    ) -> StorageResult<PersonalThreshold> {
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner
            .thresholds
            .iter_mut()
            .find(|t| t.user_id == upsert.user_id && t.metric == upsert.metric)
        {
            existing.value = upsert.value;
            if let Some(enabled) = upsert.notification_enabled {
                existing.notification_enabled = enabled;
            }
            debug!("updated {} threshold of user {}", upsert.metric, upsert.user_id);
            return Ok(existing.clone());
        }

        inner.next_threshold_id += 1;
        let threshold = PersonalThreshold {
            id: inner.next_threshold_id,
            user_id: upsert.user_id,
            metric: upsert.metric,
            value: upsert.value,
            notification_enabled: upsert.notification_enabled.unwrap_or(true),
        };
        inner.thresholds.push(threshold.clone());
        debug!("created {} threshold of user {}", upsert.metric, upsert.user_id);
        Ok(threshold)
    }

    async fn delete_personal_threshold(&self, user_id: UserId, id: i64) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        let before = inner.thresholds.len();
        inner
            .thresholds
            .retain(|t| !(t.id == id && t.user_id == user_id));

        if inner.thresholds.len() == before {
            return Err(StorageError::NotFound(format!(
                "threshold {id} of user {user_id}"
            )));
        }
        Ok(())
    }

    async fn list_user_thresholds(&self, user_id: UserId) -> StorageResult<Vec<PersonalThreshold>> {
        let inner = self.inner.read().await;
        Ok(inner
            .thresholds
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_global_bands(&self, metric: MetricType) -> StorageResult<Vec<GlobalBand>> {
        let inner = self.inner.read().await;
        let mut bands: Vec<GlobalBand> = inner
            .bands
            .iter()
            .filter(|band| band.metric == metric)
            .cloned()
            .collect();
        bands.sort_by(|a, b| a.min_value.total_cmp(&b.min_value));
        Ok(bands)
    }

    async fn upsert_global_band(&self, upsert: BandUpsert) -> StorageResult<GlobalBand> {
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner
            .bands
            .iter_mut()
            .find(|band| band.metric == upsert.metric && band.level == upsert.level)
        {
            existing.min_value = upsert.min_value;
            existing.max_value = upsert.max_value;
            if upsert.color.is_some() {
                existing.color = upsert.color;
            }
            if upsert.message.is_some() {
                existing.message = upsert.message;
            }
            return Ok(existing.clone());
        }

        inner.next_band_id += 1;
        let band = GlobalBand {
            id: inner.next_band_id,
            metric: upsert.metric,
            level: upsert.level,
            min_value: upsert.min_value,
            max_value: upsert.max_value,
            color: upsert.color,
            message: upsert.message,
        };
        inner.bands.push(band.clone());
        Ok(band)
    }

    async fn delete_global_band(&self, id: i64) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        let before = inner.bands.len();
        inner.bands.retain(|band| band.id != id);

        if inner.bands.len() == before {
            return Err(StorageError::NotFound(format!("global band {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl RecipientDirectory for MemoryBackend {
    async fn resolve_address(&self, user_id: UserId) -> StorageResult<Option<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .recipients
            .get(&user_id)
            .and_then(|recipient| recipient.address())
            .map(str::to_string))
    }

    async fn list_reachable(
        &self,
        after: Option<UserId>,
        limit: usize,
    ) -> StorageResult<Vec<ReachableRecipient>> {
        let inner = self.inner.read().await;
        let start = after.map_or(UserId::MIN, |id| id.saturating_add(1));
        Ok(inner
            .recipients
            .range(start..)
            .filter_map(|(user_id, recipient)| {
                recipient.address().map(|address| ReachableRecipient {
                    user_id: *user_id,
                    address: address.to_string(),
                })
            })
            .take(limit)
            .collect())
    }
}
