use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use thiserror::Error;
use tokio_rusqlite::Connection;
use vouch_core::Gesture;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("challenge not found")]
    NotFound,
    #[error("challenge expired")]
    Expired,
    #[error("challenge already used")]
    AlreadyUsed,
    #[error("corrupt steps column: {0}")]
    BadSteps(#[from] serde_json::Error),
    #[error("timestamp out of range: {0}")]
    BadTimestamp(i64),
}

/// A one-shot gesture challenge.
///
/// Immutable after creation except for `used`, which flips exactly once
/// via [`Store::consume_challenge`].
#[derive(Debug, Clone)]
pub struct Challenge {
    pub id: String,
    pub steps: Vec<Gesture>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

/// Persisted bearer-token metadata. Only the digest of the token string
/// is stored; the raw value never touches the database.
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub hash: String,
    pub subject: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

/// Outcome of the read-check-mark step inside the consume transaction.
enum RawConsume {
    Missing,
    Used,
    Expired,
    Consumed(ChallengeRow),
}

type ChallengeRow = (String, String, i64, i64, bool);

/// SQLite-backed storage for challenges, token records, and the
/// verification-attempt audit trail.
///
/// All access funnels through one connection actor, so a multi-statement
/// closure executes without interleaving — the consume transaction relies
/// on this for its exactly-once guarantee.
#[derive(Clone)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(db_path.to_path_buf()).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 CREATE TABLE IF NOT EXISTS challenges (
                     id TEXT PRIMARY KEY,
                     steps TEXT NOT NULL,
                     created_at INTEGER NOT NULL,
                     expires_at INTEGER NOT NULL,
                     used INTEGER NOT NULL DEFAULT 0
                 );
                 CREATE TABLE IF NOT EXISTS tokens (
                     hash TEXT PRIMARY KEY,
                     subject TEXT NOT NULL,
                     issued_at INTEGER NOT NULL,
                     expires_at INTEGER NOT NULL,
                     revoked INTEGER NOT NULL DEFAULT 0
                 );
                 CREATE TABLE IF NOT EXISTS attempts (
                     id TEXT PRIMARY KEY,
                     challenge_id TEXT NOT NULL,
                     passed INTEGER NOT NULL,
                     liveness_score REAL NOT NULL,
                     details TEXT,
                     created_at INTEGER NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_attempts_challenge ON attempts(challenge_id);",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // ── Challenges ────────────────────────────────────────────────────────────

    /// Create and persist a new challenge.
    pub async fn create_challenge(
        &self,
        steps: Vec<Gesture>,
        now: DateTime<Utc>,
        ttl_secs: u64,
    ) -> Result<Challenge, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let expires_at = now + chrono::Duration::seconds(ttl_secs as i64);
        let steps_json = serde_json::to_string(&steps)?;

        let id_clone = id.clone();
        let created_ts = now.timestamp();
        let expires_ts = expires_at.timestamp();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO challenges (id, steps, created_at, expires_at, used)
                     VALUES (?1, ?2, ?3, ?4, 0)",
                    rusqlite::params![id_clone, steps_json, created_ts, expires_ts],
                )?;
                Ok(())
            })
            .await?;

        Ok(Challenge {
            id,
            steps,
            created_at: now,
            expires_at,
            used: false,
        })
    }

    /// Atomically read a challenge and mark it used.
    ///
    /// Exactly one of any number of concurrent consumes for the same id
    /// succeeds; the rest see [`StoreError::AlreadyUsed`]. An expired
    /// challenge is reported as [`StoreError::Expired`] without touching
    /// `used`, so the sweeper still reclaims it.
    pub async fn consume_challenge(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Challenge, StoreError> {
        let id_owned = id.to_string();
        let now_ts = now.timestamp();

        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let row: Option<ChallengeRow> = tx
                    .query_row(
                        "SELECT id, steps, created_at, expires_at, used
                         FROM challenges WHERE id = ?1",
                        [&id_owned],
                        |row| {
                            Ok((
                                row.get(0)?,
                                row.get(1)?,
                                row.get(2)?,
                                row.get(3)?,
                                row.get(4)?,
                            ))
                        },
                    )
                    .optional()?;

                let outcome = match row {
                    None => RawConsume::Missing,
                    Some((_, _, _, _, true)) => RawConsume::Used,
                    Some((_, _, _, expires_ts, _)) if now_ts >= expires_ts => RawConsume::Expired,
                    Some(row) => {
                        tx.execute(
                            "UPDATE challenges SET used = 1 WHERE id = ?1 AND used = 0",
                            [&id_owned],
                        )?;
                        RawConsume::Consumed(row)
                    }
                };
                tx.commit()?;
                Ok(outcome)
            })
            .await?;

        match outcome {
            RawConsume::Missing => Err(StoreError::NotFound),
            RawConsume::Used => Err(StoreError::AlreadyUsed),
            RawConsume::Expired => Err(StoreError::Expired),
            RawConsume::Consumed((id, steps_json, created_ts, expires_ts, _)) => Ok(Challenge {
                id,
                steps: serde_json::from_str(&steps_json)?,
                created_at: from_ts(created_ts)?,
                expires_at: from_ts(expires_ts)?,
                used: true,
            }),
        }
    }

    /// Delete challenges whose expiry (plus grace) has passed. Returns the
    /// number of rows removed. Best-effort housekeeping, off the verify path.
    pub async fn sweep_challenges(
        &self,
        now: DateTime<Utc>,
        grace_secs: u64,
    ) -> Result<usize, StoreError> {
        let cutoff = now.timestamp() - grace_secs as i64;
        let removed = self
            .conn
            .call(move |conn| {
                let affected = conn.execute(
                    "DELETE FROM challenges WHERE expires_at < ?1",
                    [cutoff],
                )?;
                Ok(affected)
            })
            .await?;
        Ok(removed)
    }

    // ── Tokens ────────────────────────────────────────────────────────────────

    pub async fn insert_token(&self, record: &TokenRecord) -> Result<(), StoreError> {
        let record = record.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO tokens (hash, subject, issued_at, expires_at, revoked)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        record.hash,
                        record.subject,
                        record.issued_at.timestamp(),
                        record.expires_at.timestamp(),
                        record.revoked,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_token(&self, hash: &str) -> Result<Option<TokenRecord>, StoreError> {
        let hash = hash.to_string();
        let row: Option<(String, String, i64, i64, bool)> = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT hash, subject, issued_at, expires_at, revoked
                         FROM tokens WHERE hash = ?1",
                        [&hash],
                        |row| {
                            Ok((
                                row.get(0)?,
                                row.get(1)?,
                                row.get(2)?,
                                row.get(3)?,
                                row.get(4)?,
                            ))
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        row.map(|(hash, subject, issued_ts, expires_ts, revoked)| {
            Ok(TokenRecord {
                hash,
                subject,
                issued_at: from_ts(issued_ts)?,
                expires_at: from_ts(expires_ts)?,
                revoked,
            })
        })
        .transpose()
    }

    /// Mark a token revoked. Returns false when no such record exists.
    pub async fn revoke_token(&self, hash: &str) -> Result<bool, StoreError> {
        let hash = hash.to_string();
        let affected = self
            .conn
            .call(move |conn| {
                let affected =
                    conn.execute("UPDATE tokens SET revoked = 1 WHERE hash = ?1", [&hash])?;
                Ok(affected)
            })
            .await?;
        Ok(affected > 0)
    }

    // ── Attempt audit ─────────────────────────────────────────────────────────

    /// Record the outcome of a completed verification. Write-only audit;
    /// stores no token material.
    pub async fn record_attempt(
        &self,
        challenge_id: &str,
        passed: bool,
        liveness_score: f64,
        details: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let challenge_id = challenge_id.to_string();
        let details = details.to_string();
        let now_ts = now.timestamp();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO attempts (id, challenge_id, passed, liveness_score, details, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![id, challenge_id, passed, liveness_score, details, now_ts],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn attempt_count(&self, challenge_id: &str) -> Result<u64, StoreError> {
        let challenge_id = challenge_id.to_string();
        let count = self
            .conn
            .call(move |conn| {
                let count: u64 = conn.query_row(
                    "SELECT COUNT(*) FROM attempts WHERE challenge_id = ?1",
                    [&challenge_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }

    #[cfg(test)]
    pub async fn token_count(&self) -> Result<u64, StoreError> {
        let count = self
            .conn
            .call(|conn| {
                let count: u64 =
                    conn.query_row("SELECT COUNT(*) FROM tokens", [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }

    #[cfg(test)]
    pub async fn challenge_count(&self) -> Result<u64, StoreError> {
        let count = self
            .conn
            .call(|conn| {
                let count: u64 =
                    conn.query_row("SELECT COUNT(*) FROM challenges", [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }
}

fn from_ts(secs: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp(secs, 0).ok_or(StoreError::BadTimestamp(secs))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    async fn open_store() -> Store {
        Store::open(Path::new(":memory:")).await.unwrap()
    }

    fn steps() -> Vec<Gesture> {
        vec![Gesture::Blink, Gesture::Smile, Gesture::TurnRight]
    }

    #[tokio::test]
    async fn challenge_roundtrip() {
        let store = open_store().await;
        let created = store.create_challenge(steps(), t0(), 120).await.unwrap();
        assert_eq!(created.steps, steps());
        assert!(!created.used);
        assert_eq!(created.expires_at - created.created_at, chrono::Duration::seconds(120));

        let consumed = store
            .consume_challenge(&created.id, t0() + chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(consumed.id, created.id);
        assert_eq!(consumed.steps, steps());
        assert!(consumed.used);
    }

    #[tokio::test]
    async fn consume_is_one_shot() {
        let store = open_store().await;
        let challenge = store.create_challenge(steps(), t0(), 120).await.unwrap();

        store.consume_challenge(&challenge.id, t0()).await.unwrap();
        let err = store.consume_challenge(&challenge.id, t0()).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyUsed));
    }

    #[tokio::test]
    async fn concurrent_consumes_yield_exactly_one_success() {
        let store = open_store().await;
        let challenge = store.create_challenge(steps(), t0(), 120).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let id = challenge.id.clone();
            handles.push(tokio::spawn(
                async move { store.consume_challenge(&id, t0()).await },
            ));
        }

        let mut successes = 0;
        let mut already_used = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(StoreError::AlreadyUsed) => already_used += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(already_used, 7);
    }

    #[tokio::test]
    async fn unknown_challenge_is_not_found() {
        let store = open_store().await;
        let err = store.consume_challenge("nope", t0()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn expired_challenge_is_rejected_and_stays_unused() {
        let store = open_store().await;
        let challenge = store.create_challenge(steps(), t0(), 120).await.unwrap();

        let late = t0() + chrono::Duration::seconds(121);
        let err = store.consume_challenge(&challenge.id, late).await.unwrap_err();
        assert!(matches!(err, StoreError::Expired));

        // Still expired (not already-used) on a second attempt.
        let err = store.consume_challenge(&challenge.id, late).await.unwrap_err();
        assert!(matches!(err, StoreError::Expired));
    }

    #[tokio::test]
    async fn consume_at_exact_expiry_is_expired() {
        let store = open_store().await;
        let challenge = store.create_challenge(steps(), t0(), 120).await.unwrap();
        let at_expiry = t0() + chrono::Duration::seconds(120);
        let err = store
            .consume_challenge(&challenge.id, at_expiry)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Expired));
    }

    #[tokio::test]
    async fn sweep_removes_only_graced_out_challenges() {
        let store = open_store().await;
        let old = store.create_challenge(steps(), t0(), 120).await.unwrap();
        let fresh = store
            .create_challenge(steps(), t0() + chrono::Duration::seconds(300), 120)
            .await
            .unwrap();

        // Old expires at t0+120; with 60s grace it is reclaimable from t0+180.
        let removed = store
            .sweep_challenges(t0() + chrono::Duration::seconds(200), 60)
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.challenge_count().await.unwrap(), 1);

        // The fresh challenge is still consumable.
        store
            .consume_challenge(&fresh.id, t0() + chrono::Duration::seconds(310))
            .await
            .unwrap();
        let err = store
            .consume_challenge(&old.id, t0() + chrono::Duration::seconds(310))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn token_roundtrip_and_revocation() {
        let store = open_store().await;
        let record = TokenRecord {
            hash: "abc123".to_string(),
            subject: "challenge-1".to_string(),
            issued_at: t0(),
            expires_at: t0() + chrono::Duration::minutes(5),
            revoked: false,
        };
        store.insert_token(&record).await.unwrap();

        let loaded = store.get_token("abc123").await.unwrap().unwrap();
        assert_eq!(loaded.subject, "challenge-1");
        assert_eq!(loaded.issued_at, t0());
        assert!(!loaded.revoked);

        assert!(store.revoke_token("abc123").await.unwrap());
        let loaded = store.get_token("abc123").await.unwrap().unwrap();
        assert!(loaded.revoked);

        assert!(!store.revoke_token("missing").await.unwrap());
        assert!(store.get_token("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn attempts_are_recorded_per_challenge() {
        let store = open_store().await;
        let challenge = store.create_challenge(steps(), t0(), 120).await.unwrap();

        store
            .record_attempt(&challenge.id, false, 38.0, "[]", t0())
            .await
            .unwrap();
        store
            .record_attempt(&challenge.id, true, 98.0, "[]", t0())
            .await
            .unwrap();

        assert_eq!(store.attempt_count(&challenge.id).await.unwrap(), 2);
        assert_eq!(store.attempt_count("other").await.unwrap(), 0);
    }
}
