//! Redis-backed per-thread message history cache (`thread:{id}:history`).
//!
//! A cache is a cache: correctness of the dialogue never depends on its
//! hit rate. Absent Redis configuration, every `get` cold-loads from the
//! persistence boundary and the cache is skipped on write — callers never
//! see a hard failure from this module.

use async_trait::async_trait;
use ic_domain::error::{Error, Result};
use ic_domain::tool::Message;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// Most recent messages retained per thread.
const MAX_HISTORY_LEN: isize = 200;

/// Cold-load fallback, invoked on a cache miss or when the cache is
/// unconfigured. Backed by the persistence boundary's
/// `messages.get_formatted_messages` operation in a full deployment.
#[async_trait]
pub trait ColdLoader: Send + Sync {
    async fn get_formatted_messages(&self, thread_id: &str) -> Result<Vec<Message>>;
}

/// `thread:{id}:history` list cache.
///
/// `conn` is `None` when no `REDIS_URL` was configured — every operation
/// then degrades to cold-load (`get`) or a no-op (`set`/`append`/`delete`),
/// matching the config layer's documented "absent url is a warning, not an
/// error" posture.
pub struct MessageCache {
    conn: Option<ConnectionManager>,
    ttl_seconds: u64,
}

impl MessageCache {
    /// Connects eagerly if `url` is non-empty; returns a cache that always
    /// cold-loads otherwise. Connection failure is propagated — a
    /// configured-but-unreachable Redis is a startup error, not a silent
    /// degrade.
    pub async fn connect(url: &str, ttl_seconds: u64) -> Result<Self> {
        if url.is_empty() {
            return Ok(Self {
                conn: None,
                ttl_seconds,
            });
        }
        let client = redis::Client::open(url).map_err(|e| Error::Cache(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;
        Ok(Self {
            conn: Some(conn),
            ttl_seconds,
        })
    }

    /// A cache with no Redis backing at all — always cold-loads.
    pub fn disabled() -> Self {
        Self {
            conn: None,
            ttl_seconds: 3600,
        }
    }

    fn history_key(thread_id: &str) -> String {
        format!("thread:{thread_id}:history")
    }

    /// `LRANGE 0 -1`; on an empty (or disabled) cache, cold-loads via
    /// `loader` and writes the result back with [`Self::set`]. A
    /// `force_refresh` bypasses the cache outright — used by the
    /// orchestrator loop after a tool output was just submitted.
    pub async fn get<L: ColdLoader + ?Sized>(
        &self,
        thread_id: &str,
        loader: &L,
        force_refresh: bool,
    ) -> Result<Vec<Message>> {
        let Some(conn) = &self.conn else {
            return loader.get_formatted_messages(thread_id).await;
        };

        if !force_refresh {
            let mut conn = conn.clone();
            let key = Self::history_key(thread_id);
            let raw: Vec<String> = conn
                .lrange(&key, 0, -1)
                .await
                .map_err(|e| Error::Cache(e.to_string()))?;
            if !raw.is_empty() {
                let messages: Vec<Message> = raw
                    .iter()
                    .filter_map(|s| serde_json::from_str(s).ok())
                    .collect();
                if !messages.is_empty() {
                    return Ok(messages);
                }
            }
        }

        let messages = loader.get_formatted_messages(thread_id).await?;
        // Best-effort: cold-load result is authoritative even if the
        // write-back fails.
        if let Err(e) = self.set(thread_id, &messages).await {
            tracing::warn!(thread_id, error = %e, "message cache write-back failed");
        }
        Ok(messages)
    }

    /// Atomic-in-intent `DEL → RPUSH(last 200) → EXPIRE`. Cold-load results
    /// always overwrite a stale cache entry.
    pub async fn set(&self, thread_id: &str, messages: &[Message]) -> Result<()> {
        let Some(conn) = &self.conn else {
            return Ok(());
        };
        let mut conn = conn.clone();
        let key = Self::history_key(thread_id);
        let tail: Vec<String> = messages
            .iter()
            .rev()
            .take(MAX_HISTORY_LEN as usize)
            .rev()
            .map(|m| serde_json::to_string(m).unwrap_or_default())
            .collect();

        let _: () = conn.del(&key).await.map_err(|e| Error::Cache(e.to_string()))?;
        if !tail.is_empty() {
            let _: () = conn
                .rpush(&key, &tail)
                .await
                .map_err(|e| Error::Cache(e.to_string()))?;
            let _: () = conn
                .expire(&key, self.ttl_seconds as i64)
                .await
                .map_err(|e| Error::Cache(e.to_string()))?;
        }
        Ok(())
    }

    /// `RPUSH → LTRIM -200 -1 → EXPIRE`.
    pub async fn append(&self, thread_id: &str, message: &Message) -> Result<()> {
        let Some(conn) = &self.conn else {
            return Ok(());
        };
        let mut conn = conn.clone();
        let key = Self::history_key(thread_id);
        let encoded = serde_json::to_string(message)?;

        let _: () = conn
            .rpush(&key, encoded)
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;
        let _: () = conn
            .ltrim(&key, -MAX_HISTORY_LEN, -1)
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;
        let _: () = conn
            .expire(&key, self.ttl_seconds as i64)
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;
        Ok(())
    }

    pub async fn delete(&self, thread_id: &str) -> Result<()> {
        let Some(conn) = &self.conn else {
            return Ok(());
        };
        let mut conn = conn.clone();
        let key = Self::history_key(thread_id);
        let _: () = conn.del(&key).await.map_err(|e| Error::Cache(e.to_string()))?;
        Ok(())
    }
}
