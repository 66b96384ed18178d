//! SQLite persistence for candidates and validation history

use crate::error::StoreError;
use crate::proxy::{AnonymityLevel, CandidateKey, ProxyCandidate, ProxyType};
use crate::validate::ValidationResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

/// What the core needs from persistence
#[async_trait]
pub trait ProxyStore: Send + Sync {
    /// Insert or refresh candidates. An existing row is only replaced by a
    /// newer observation. Returns the number of rows written.
    async fn upsert_candidates(&self, candidates: &[ProxyCandidate]) -> Result<u64, StoreError>;

    /// Append results as one batch. Never edits earlier results.
    async fn append_validation_results(
        &self,
        results: &[ValidationResult],
    ) -> Result<Uuid, StoreError>;
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS candidates (
        address TEXT NOT NULL,
        port INTEGER NOT NULL,
        scheme TEXT NOT NULL,
        country TEXT,
        anonymity_claim TEXT,
        source_id TEXT NOT NULL,
        observed_at_ms INTEGER NOT NULL,
        PRIMARY KEY (address, port, scheme)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS validation_results (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        batch_id TEXT NOT NULL,
        address TEXT NOT NULL,
        port INTEGER NOT NULL,
        scheme TEXT NOT NULL,
        preset TEXT NOT NULL,
        connectivity_score REAL NOT NULL,
        speed_score REAL NOT NULL,
        anonymity_score REAL NOT NULL,
        overall_score REAL NOT NULL,
        is_usable INTEGER NOT NULL,
        latency_ms INTEGER,
        anonymity TEXT,
        attempts_made INTEGER NOT NULL,
        successful_attempts INTEGER NOT NULL,
        error TEXT,
        checked_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_validation_results_key ON validation_results (address, port, scheme)",
];

/// [`ProxyStore`] backed by a SQLite database
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and its tables
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// Private in-memory database, mainly for tests
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// Stored candidates, most recently observed first
    pub async fn list_candidates(&self, limit: Option<u32>) -> Result<Vec<ProxyCandidate>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT address, port, scheme, country, anonymity_claim, source_id, observed_at_ms
            FROM candidates
            ORDER BY observed_at_ms DESC, address, port, scheme
            LIMIT ?
            "#,
        )
        .bind(limit.map(i64::from).unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(candidate_from_row).collect()
    }

    /// Every stored result for one candidate, oldest first
    pub async fn validation_history(
        &self,
        key: &CandidateKey,
    ) -> Result<Vec<ValidationResult>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM validation_results
            WHERE address = ? AND port = ? AND scheme = ?
            ORDER BY id
            "#,
        )
        .bind(&key.address)
        .bind(i64::from(key.port))
        .bind(key.scheme.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(result_from_row).collect()
    }
}

#[async_trait]
impl ProxyStore for SqliteStore {
    async fn upsert_candidates(&self, candidates: &[ProxyCandidate]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for candidate in candidates {
            let result = sqlx::query(
                r#"
                INSERT INTO candidates
                    (address, port, scheme, country, anonymity_claim, source_id, observed_at_ms)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (address, port, scheme) DO UPDATE SET
                    country = COALESCE(excluded.country, candidates.country),
                    anonymity_claim = COALESCE(excluded.anonymity_claim, candidates.anonymity_claim),
                    source_id = excluded.source_id,
                    observed_at_ms = excluded.observed_at_ms
                WHERE excluded.observed_at_ms > candidates.observed_at_ms
                "#,
            )
            .bind(&candidate.address)
            .bind(i64::from(candidate.port))
            .bind(candidate.scheme.to_string())
            .bind(&candidate.country)
            .bind(candidate.anonymity_claim.map(|a| a.to_string()))
            .bind(&candidate.source_id)
            .bind(candidate.observed_at.timestamp_millis())
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }

        tx.commit().await?;
        debug!(received = candidates.len(), written, "upserted candidates");
        Ok(written)
    }

    async fn append_validation_results(
        &self,
        results: &[ValidationResult],
    ) -> Result<Uuid, StoreError> {
        let batch_id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        for result in results {
            sqlx::query(
                r#"
                INSERT INTO validation_results
                    (batch_id, address, port, scheme, preset, connectivity_score, speed_score,
                     anonymity_score, overall_score, is_usable, latency_ms, anonymity,
                     attempts_made, successful_attempts, error, checked_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(batch_id.to_string())
            .bind(&result.candidate.address)
            .bind(i64::from(result.candidate.port))
            .bind(result.candidate.scheme.to_string())
            .bind(&result.preset)
            .bind(result.connectivity_score)
            .bind(result.speed_score)
            .bind(result.anonymity_score)
            .bind(result.overall_score)
            .bind(result.is_usable)
            .bind(result.latency_ms.map(|ms| ms as i64))
            .bind(result.anonymity.map(|a| a.to_string()))
            .bind(i64::from(result.attempts_made))
            .bind(i64::from(result.successful_attempts))
            .bind(&result.error)
            .bind(result.checked_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(%batch_id, count = results.len(), "appended validation results");
        Ok(batch_id)
    }
}

fn parse_scheme(value: &str) -> Result<ProxyType, StoreError> {
    value.parse().map_err(StoreError::Corrupt)
}

fn parse_anonymity(value: Option<String>) -> Result<Option<AnonymityLevel>, StoreError> {
    value
        .map(|v| AnonymityLevel::from_label(&v).ok_or_else(|| StoreError::Corrupt(format!("anonymity '{}'", v))))
        .transpose()
}

fn parse_port(value: i64) -> Result<u16, StoreError> {
    u16::try_from(value).map_err(|_| StoreError::Corrupt(format!("port {}", value)))
}

fn candidate_from_row(row: &SqliteRow) -> Result<ProxyCandidate, StoreError> {
    let millis: i64 = row.try_get("observed_at_ms")?;
    let observed_at = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {}", millis)))?;

    Ok(ProxyCandidate {
        address: row.try_get("address")?,
        port: parse_port(row.try_get("port")?)?,
        scheme: parse_scheme(&row.try_get::<String, _>("scheme")?)?,
        country: row.try_get("country")?,
        anonymity_claim: parse_anonymity(row.try_get("anonymity_claim")?)?,
        source_id: row.try_get("source_id")?,
        observed_at,
    })
}

fn result_from_row(row: &SqliteRow) -> Result<ValidationResult, StoreError> {
    let latency_ms: Option<i64> = row.try_get("latency_ms")?;
    let attempts_made: i64 = row.try_get("attempts_made")?;
    let successful_attempts: i64 = row.try_get("successful_attempts")?;

    Ok(ValidationResult {
        candidate: CandidateKey {
            address: row.try_get("address")?,
            port: parse_port(row.try_get("port")?)?,
            scheme: parse_scheme(&row.try_get::<String, _>("scheme")?)?,
        },
        preset: row.try_get("preset")?,
        connectivity_score: row.try_get("connectivity_score")?,
        speed_score: row.try_get("speed_score")?,
        anonymity_score: row.try_get("anonymity_score")?,
        overall_score: row.try_get("overall_score")?,
        is_usable: row.try_get("is_usable")?,
        latency_ms: latency_ms.map(|ms| ms.max(0) as u64),
        anonymity: parse_anonymity(row.try_get("anonymity")?)?,
        attempts_made: attempts_made.max(0) as u32,
        successful_attempts: successful_attempts.max(0) as u32,
        error: row.try_get("error")?,
        checked_at: row.try_get("checked_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn candidate(address: &str, source: &str) -> ProxyCandidate {
        ProxyCandidate::new(address, 3128, ProxyType::Socks5, source).unwrap()
    }

    fn result_for(candidate: &ProxyCandidate, overall: f64) -> ValidationResult {
        ValidationResult {
            candidate: candidate.key(),
            preset: "default".to_string(),
            connectivity_score: 1.0,
            speed_score: 0.5,
            anonymity_score: 0.5,
            overall_score: overall,
            is_usable: overall >= 50.0,
            latency_ms: Some(420),
            anonymity: Some(AnonymityLevel::Anonymous),
            attempts_made: 1,
            successful_attempts: 1,
            error: None,
            checked_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_inserts_and_lists() {
        let store = SqliteStore::in_memory().await.unwrap();
        let a = candidate("10.1.0.1", "a").with_country(Some("de".to_string()));
        let b = candidate("10.1.0.2", "a").with_anonymity_claim(Some(AnonymityLevel::Elite));

        let written = store.upsert_candidates(&[a.clone(), b.clone()]).await.unwrap();
        assert_eq!(written, 2);

        let stored = store.list_candidates(None).await.unwrap();
        assert_eq!(stored.len(), 2);
        let stored_a = stored.iter().find(|c| c.address == "10.1.0.1").unwrap();
        assert_eq!(stored_a.country.as_deref(), Some("DE"));
        assert_eq!(stored_a.scheme, ProxyType::Socks5);
        assert_eq!(
            stored_a.observed_at.timestamp_millis(),
            a.observed_at.timestamp_millis()
        );
        let stored_b = stored.iter().find(|c| c.address == "10.1.0.2").unwrap();
        assert_eq!(stored_b.anonymity_claim, Some(AnonymityLevel::Elite));

        assert_eq!(store.list_candidates(Some(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_keeps_newest_observation() {
        let store = SqliteStore::in_memory().await.unwrap();
        let now = Utc::now();
        let newer = candidate("10.1.1.1", "new").with_observed_at(now);
        let older = candidate("10.1.1.1", "old").with_observed_at(now - Duration::hours(1));

        store.upsert_candidates(&[newer]).await.unwrap();
        let written = store.upsert_candidates(&[older]).await.unwrap();
        assert_eq!(written, 0);

        let stored = store.list_candidates(None).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].source_id, "new");

        let newest = candidate("10.1.1.1", "newest").with_observed_at(now + Duration::minutes(1));
        assert_eq!(store.upsert_candidates(&[newest]).await.unwrap(), 1);
        assert_eq!(store.list_candidates(None).await.unwrap()[0].source_id, "newest");
    }

    #[tokio::test]
    async fn test_results_are_append_only() {
        let store = SqliteStore::in_memory().await.unwrap();
        let c = candidate("10.1.2.1", "a");

        let first = store.append_validation_results(&[result_for(&c, 80.0)]).await.unwrap();
        let second = store.append_validation_results(&[result_for(&c, 20.0)]).await.unwrap();
        assert_ne!(first, second);

        let history = store.validation_history(&c.key()).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].overall_score, 80.0);
        assert!(history[0].is_usable);
        assert_eq!(history[1].overall_score, 20.0);
        assert!(!history[1].is_usable);
        assert_eq!(history[0].latency_ms, Some(420));
        assert_eq!(history[0].anonymity, Some(AnonymityLevel::Anonymous));
        assert_eq!(history[0].candidate, c.key());
    }

    #[tokio::test]
    async fn test_degraded_result_round_trips_nulls() {
        let store = SqliteStore::in_memory().await.unwrap();
        let c = candidate("10.1.3.1", "a");
        let degraded = ValidationResult::degraded(c.key(), "default", "panicked: boom");

        store.append_validation_results(&[degraded]).await.unwrap();

        let history = store.validation_history(&c.key()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].latency_ms.is_none());
        assert!(history[0].anonymity.is_none());
        assert_eq!(history[0].error.as_deref(), Some("panicked: boom"));
    }

    #[tokio::test]
    async fn test_connect_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxies.db");
        let url = format!("sqlite://{}", path.display());

        let store = SqliteStore::connect(&url).await.unwrap();
        store.upsert_candidates(&[candidate("10.1.4.1", "a")]).await.unwrap();
        assert!(path.exists());

        let reopened = SqliteStore::connect(&url).await.unwrap();
        assert_eq!(reopened.list_candidates(None).await.unwrap().len(), 1);
    }
}
