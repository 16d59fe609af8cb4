//! SQLite store backend
//!
//! Implements all three store traits on a local SQLite database.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: The ingestion path can write readings while evaluations read
//! - **Migrations**: Schema versioning with sqlx (`migrations/`)
//! - **Upserts**: `ON CONFLICT` on `(user_id, type)` and `(type, level)`

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{ReadingStore, RecipientDirectory, SubscriptionStore};
use super::error::{StorageError, StorageResult};
use super::schema::{
    BandUpsert, GlobalBand, PersonalThreshold, ReachableRecipient, Recipient, ThresholdUpsert,
};
use crate::{MetricType, Reading, ReadingId, Sensor, SensorId, UserId};

const READING_COLUMNS: &str =
    "id, sensor_id, uv_index, aqi, pm25, pm10, temperature, humidity, timestamp";

const THRESHOLD_COLUMNS: &str = "id, user_id, type, value, notification_enabled";

const BAND_COLUMNS: &str = "id, type, level, min_value, max_value, color, message";

/// SQLite store backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Open (or create) the database at `db_path` and run migrations.
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use enviro_notify::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./enviro.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Close the pool, waiting for in-flight queries
    pub async fn close(&self) {
        debug!("closing SQLite backend at {}", self.db_path);
        self.pool.close().await;
    }

    pub async fn insert_sensor(&self, sensor: &Sensor) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sensors (id, name, location, latitude, longitude, is_active)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                location = excluded.location,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                is_active = excluded.is_active
            "#,
        )
        .bind(sensor.id)
        .bind(&sensor.name)
        .bind(&sensor.location)
        .bind(sensor.latitude)
        .bind(sensor.longitude)
        .bind(sensor.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Store a reading; the database assigns the id.
    pub async fn insert_reading(&self, reading: &Reading) -> StorageResult<Reading> {
        let row = sqlx::query(
            r#"
            INSERT INTO sensor_data (
                sensor_id, uv_index, aqi, pm25, pm10, temperature, humidity, timestamp
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(reading.sensor_id)
        .bind(reading.uv_index)
        .bind(reading.aqi)
        .bind(reading.pm25)
        .bind(reading.pm10)
        .bind(reading.temperature)
        .bind(reading.humidity)
        .bind(reading.timestamp.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        Ok(Reading {
            id: row.try_get("id")?,
            ..reading.clone()
        })
    }

    pub async fn upsert_recipient(&self, recipient: &Recipient) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, push_token, is_active)
            VALUES (?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                push_token = excluded.push_token,
                is_active = excluded.is_active
            "#,
        )
        .bind(recipient.user_id)
        .bind(&recipient.push_token)
        .bind(recipient.enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn parse_metric(raw: &str) -> StorageResult<MetricType> {
        MetricType::from_str(raw).map_err(StorageError::InvalidData)
    }

    fn reading_from_row(row: &SqliteRow) -> StorageResult<Reading> {
        Ok(Reading {
            id: row.try_get("id")?,
            sensor_id: row.try_get("sensor_id")?,
            uv_index: row.try_get("uv_index")?,
            aqi: row.try_get("aqi")?,
            pm25: row.try_get("pm25")?,
            pm10: row.try_get("pm10")?,
            temperature: row.try_get("temperature")?,
            humidity: row.try_get("humidity")?,
            timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?),
        })
    }

    fn threshold_from_row(row: &SqliteRow) -> StorageResult<PersonalThreshold> {
        Ok(PersonalThreshold {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            metric: Self::parse_metric(row.try_get("type")?)?,
            value: row.try_get("value")?,
            notification_enabled: row.try_get("notification_enabled")?,
        })
    }

    fn band_from_row(row: &SqliteRow) -> StorageResult<GlobalBand> {
        Ok(GlobalBand {
            id: row.try_get("id")?,
            metric: Self::parse_metric(row.try_get("type")?)?,
            level: row.try_get("level")?,
            min_value: row.try_get("min_value")?,
            max_value: row.try_get("max_value")?,
            color: row.try_get("color")?,
            message: row.try_get("message")?,
        })
    }
}

#[async_trait]
impl ReadingStore for SqliteBackend {
    async fn get_reading(&self, id: ReadingId) -> StorageResult<Option<Reading>> {
        let sql = format!("SELECT {READING_COLUMNS} FROM sensor_data WHERE id = ?");
        sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(Self::reading_from_row)
            .transpose()
    }

    async fn get_sensor(&self, id: SensorId) -> StorageResult<Option<Sensor>> {
        let row = sqlx::query(
            "SELECT id, name, location, latitude, longitude, is_active FROM sensors WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> StorageResult<Sensor> {
            Ok(Sensor {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                location: row.try_get("location")?,
                latitude: row.try_get("latitude")?,
                longitude: row.try_get("longitude")?,
                is_active: row.try_get("is_active")?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self))]
    async fn readings_after(&self, after: ReadingId, limit: usize) -> StorageResult<Vec<Reading>> {
        let sql =
            format!("SELECT {READING_COLUMNS} FROM sensor_data WHERE id > ? ORDER BY id LIMIT ?");
        let rows = sqlx::query(&sql)
            .bind(after)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::reading_from_row).collect()
    }

    async fn latest_reading_id(&self) -> StorageResult<Option<ReadingId>> {
        let latest: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM sensor_data")
            .fetch_one(&self.pool)
            .await?;
        Ok(latest)
    }
}

#[async_trait]
impl SubscriptionStore for SqliteBackend {
    #[instrument(skip(self))]
    async fn list_personal_thresholds(
        &self,
        metric: MetricType,
        value: f64,
    ) -> StorageResult<Vec<PersonalThreshold>> {
        let sql = format!(
            "SELECT {THRESHOLD_COLUMNS} FROM thresholds_user \
             WHERE type = ? AND notification_enabled = 1 AND value <= ? \
             ORDER BY user_id"
        );
        let rows = sqlx::query(&sql)
            .bind(metric.as_str())
            .bind(value)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::threshold_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn find_global_band(
        &self,
        metric: MetricType,
        value: f64,
    ) -> StorageResult<Option<GlobalBand>> {
        // Fetch two rows so overlapping bands can be reported.
        let sql = format!(
            "SELECT {BAND_COLUMNS} FROM thresholds_global \
             WHERE type = ? AND min_value <= ? AND (max_value IS NULL OR max_value >= ?) \
             ORDER BY min_value ASC LIMIT 2"
        );
        let rows = sqlx::query(&sql)
            .bind(metric.as_str())
            .bind(value)
            .bind(value)
            .fetch_all(&self.pool)
            .await?;

        let mut bands = rows
            .iter()
            .map(Self::band_from_row)
            .collect::<StorageResult<Vec<_>>>()?;

        // Adjacent bands share their endpoint; only a real overlap is reported
        if let [lower, upper] = bands.as_slice()
            && lower.max_value.is_none_or(|max| upper.min_value < max)
        {
            warn!(
                "{metric} bands overlap at {value}: '{}' and '{}' match, using '{}'",
                lower.level, upper.level, lower.level
            );
        }

        Ok(if bands.is_empty() {
            None
        } else {
            Some(bands.swap_remove(0))
        })
    }

    #[instrument(skip(self))]
    async fn upsert_personal_threshold(
        &self,
        upsert: ThresholdUpsert,
    ) -> StorageResult<PersonalThreshold> {
        let sql = format!(
            r#"
            INSERT INTO thresholds_user (user_id, type, value, notification_enabled)
            VALUES (?1, ?2, ?3, COALESCE(?4, 1))
            ON CONFLICT (user_id, type) DO UPDATE SET
                value = excluded.value,
                notification_enabled = COALESCE(?4, thresholds_user.notification_enabled)
            RETURNING {THRESHOLD_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(upsert.user_id)
            .bind(upsert.metric.as_str())
            .bind(upsert.value)
            .bind(upsert.notification_enabled)
            .fetch_one(&self.pool)
            .await?;

        Self::threshold_from_row(&row)
    }

    async fn delete_personal_threshold(&self, user_id: UserId, id: i64) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM thresholds_user WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "threshold {id} of user {user_id}"
            )));
        }
        Ok(())
    }

    async fn list_user_thresholds(&self, user_id: UserId) -> StorageResult<Vec<PersonalThreshold>> {
        let sql = format!("SELECT {THRESHOLD_COLUMNS} FROM thresholds_user WHERE user_id = ?");
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::threshold_from_row).collect()
    }

    async fn list_global_bands(&self, metric: MetricType) -> StorageResult<Vec<GlobalBand>> {
        let sql =
            format!("SELECT {BAND_COLUMNS} FROM thresholds_global WHERE type = ? ORDER BY min_value");
        let rows = sqlx::query(&sql)
            .bind(metric.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::band_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn upsert_global_band(&self, upsert: BandUpsert) -> StorageResult<GlobalBand> {
        let sql = format!(
            r#"
            INSERT INTO thresholds_global (type, level, min_value, max_value, color, message)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (type, level) DO UPDATE SET
                min_value = excluded.min_value,
                max_value = excluded.max_value,
                color = COALESCE(excluded.color, thresholds_global.color),
                message = COALESCE(excluded.message, thresholds_global.message)
            RETURNING {BAND_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(upsert.metric.as_str())
            .bind(&upsert.level)
            .bind(upsert.min_value)
            .bind(upsert.max_value)
            .bind(&upsert.color)
            .bind(&upsert.message)
            .fetch_one(&self.pool)
            .await?;

        Self::band_from_row(&row)
    }

    async fn delete_global_band(&self, id: i64) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM thresholds_global WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("global band {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl RecipientDirectory for SqliteBackend {
    async fn resolve_address(&self, user_id: UserId) -> StorageResult<Option<String>> {
        let row = sqlx::query("SELECT id, push_token, is_active FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let recipient = Recipient {
            user_id: row.try_get("id")?,
            push_token: row.try_get("push_token")?,
            enabled: row.try_get("is_active")?,
        };
        Ok(recipient.address().map(str::to_string))
    }

    #[instrument(skip(self))]
    async fn list_reachable(
        &self,
        after: Option<UserId>,
        limit: usize,
    ) -> StorageResult<Vec<ReachableRecipient>> {
        let rows = sqlx::query(
            r#"
            SELECT id, push_token FROM users
            WHERE is_active = 1 AND push_token IS NOT NULL AND push_token != '' AND id > ?
            ORDER BY id
            LIMIT ?
            "#,
        )
        .bind(after.unwrap_or(UserId::MIN))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> StorageResult<ReachableRecipient> {
                Ok(ReachableRecipient {
                    user_id: row.try_get("id")?,
                    address: row.try_get("push_token")?,
                })
            })
            .collect()
    }
}
