use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};

use crate::clock::Clock;

/// Key-value cache with per-key time-to-live.
///
/// An expired key stops being returned immediately; its storage is reclaimed by
/// `sweep_expired`.
#[async_trait]
pub trait StagingStore: Send + Sync {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()>;

    /// Writes only when `key` is absent or expired. Returns whether the write happened.
    async fn put_if_vacant(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool>;

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Drops every expired entry and returns how many were removed.
    async fn sweep_expired(&self) -> anyhow::Result<u64>;
}

/// Runs `sweep_expired` every `period` for the lifetime of the process.
pub fn spawn_sweeper(store: Arc<dyn StagingStore>, period: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            match store.sweep_expired().await {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "expired staging entries swept"),
                Err(e) => warn!(error = %e, "staging sweep failed"),
            }
        }
    });
}

pub fn registration_key(email: &str) -> String {
    format!("verify:{email}")
}

pub fn token_key(token: &str) -> String {
    format!("token:{token}")
}

pub fn revoked_key(refresh_token: &str) -> String {
    format!("revoked:{refresh_token}")
}

/// Staging entries kept in an unlogged Postgres table.
#[derive(Clone)]
pub struct PgStagingStore {
    db: PgPool,
}

impl PgStagingStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StagingStore for PgStagingStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO staging_entries (key, value, expires_at)
            VALUES ($1, $2, now() + make_interval(secs => $3))
            ON CONFLICT (key) DO UPDATE
                SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(ttl.as_seconds_f64())
        .execute(&self.db)
        .await
        .context("staging put")?;
        Ok(())
    }

    async fn put_if_vacant(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool> {
        let written = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO staging_entries (key, value, expires_at)
            VALUES ($1, $2, now() + make_interval(secs => $3))
            ON CONFLICT (key) DO UPDATE
                SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
                WHERE staging_entries.expires_at <= now()
            RETURNING key
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(ttl.as_seconds_f64())
        .fetch_optional(&self.db)
        .await
        .context("staging put_if_vacant")?;
        Ok(written.is_some())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(
            r#"SELECT value FROM staging_entries WHERE key = $1 AND expires_at > now()"#,
        )
        .bind(key)
        .fetch_optional(&self.db)
        .await
        .context("staging get")?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        sqlx::query(r#"DELETE FROM staging_entries WHERE key = $1"#)
            .bind(key)
            .execute(&self.db)
            .await
            .context("staging delete")?;
        Ok(())
    }

    async fn sweep_expired(&self) -> anyhow::Result<u64> {
        let res = sqlx::query(r#"DELETE FROM staging_entries WHERE expires_at <= now()"#)
            .execute(&self.db)
            .await
            .context("staging sweep")?;
        Ok(res.rows_affected())
    }
}

/// In-process staging store driven by an injected clock.
pub struct MemoryStagingStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, (String, OffsetDateTime)>>,
    fail_writes: AtomicBool,
}

impl MemoryStagingStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent write fail; reads and deletes keep working.
    #[cfg(test)]
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.lock()
            .get(key)
            .map(|(_, exp)| *exp > now)
            .unwrap_or(false)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (String, OffsetDateTime)>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn check_writable(&self) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("staging store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl StagingStore for MemoryStagingStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        self.check_writable()?;
        let expires = self.clock.now() + ttl;
        self.lock()
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn put_if_vacant(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool> {
        self.check_writable()?;
        let now = self.clock.now();
        let mut entries = self.lock();
        if matches!(entries.get(key), Some((_, exp)) if *exp > now) {
            return Ok(false);
        }
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(true)
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let now = self.clock.now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some((value, exp)) if *exp > now => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.lock().remove(key);
        Ok(())
    }

    async fn sweep_expired(&self) -> anyhow::Result<u64> {
        let now = self.clock.now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, (_, exp)| *exp > now);
        Ok((before - entries.len()) as u64)
    }
}
