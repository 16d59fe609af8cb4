//! Store trait definitions
//!
//! The evaluation engine only ever talks to these traits. Each call reads the
//! current state of the backend; nothing is cached across evaluations, so a
//! revoked push token or a disabled threshold takes effect on the next reading.
//!
//! ## Thread Safety
//!
//! Implementations must be `Send + Sync`; they are shared across concurrently
//! running evaluations behind an `Arc`.

use async_trait::async_trait;

use super::error::StorageResult;
use super::schema::{
    BandUpsert, GlobalBand, PersonalThreshold, ReachableRecipient, ThresholdUpsert,
};
use crate::{MetricType, Reading, ReadingId, Sensor, SensorId, UserId};

/// Source of ingested readings and their sensors
#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn get_reading(&self, id: ReadingId) -> StorageResult<Option<Reading>>;

    async fn get_sensor(&self, id: SensorId) -> StorageResult<Option<Sensor>>;

    /// Readings with an id greater than `after`, oldest first.
    ///
    /// Used by the poller to pick up readings written by the ingestion path.
    async fn readings_after(&self, after: ReadingId, limit: usize) -> StorageResult<Vec<Reading>>;

    /// Id of the newest stored reading, `None` when there are none.
    async fn latest_reading_id(&self) -> StorageResult<Option<ReadingId>>;
}

/// Personal thresholds and global severity bands
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Enabled thresholds of `metric` whose trigger value is `<= value`.
    ///
    /// Backends should filter at query time; the matcher re-checks the
    /// predicate either way.
    async fn list_personal_thresholds(
        &self,
        metric: MetricType,
        value: f64,
    ) -> StorageResult<Vec<PersonalThreshold>>;

    /// The band of `metric` containing `value`.
    ///
    /// If the configured bands overlap, the one with the lowest `min_value`
    /// wins.
    async fn find_global_band(
        &self,
        metric: MetricType,
        value: f64,
    ) -> StorageResult<Option<GlobalBand>>;

    /// Create or replace the threshold of `(user_id, metric)`.
    async fn upsert_personal_threshold(
        &self,
        upsert: ThresholdUpsert,
    ) -> StorageResult<PersonalThreshold>;

    /// Delete a threshold owned by `user_id`.
    ///
    /// Returns `StorageError::NotFound` if no such threshold belongs to the user.
    async fn delete_personal_threshold(&self, user_id: UserId, id: i64) -> StorageResult<()>;

    /// All thresholds of one user.
    async fn list_user_thresholds(&self, user_id: UserId) -> StorageResult<Vec<PersonalThreshold>>;

    /// Bands of `metric`, ordered by `min_value`.
    async fn list_global_bands(&self, metric: MetricType) -> StorageResult<Vec<GlobalBand>>;

    /// Create or update the band of `(metric, level)`.
    async fn upsert_global_band(&self, upsert: BandUpsert) -> StorageResult<GlobalBand>;

    async fn delete_global_band(&self, id: i64) -> StorageResult<()>;
}

/// Resolution of users to push addresses
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// The push token of `user_id`, or `None` if the user is unknown, disabled
    /// or has no token.
    async fn resolve_address(&self, user_id: UserId) -> StorageResult<Option<String>>;

    /// One page of reachable recipients (enabled, with a token), ordered by
    /// user id, starting after `after`.
    ///
    /// An empty or short page ends the iteration.
    async fn list_reachable(
        &self,
        after: Option<UserId>,
        limit: usize,
    ) -> StorageResult<Vec<ReachableRecipient>>;
}
