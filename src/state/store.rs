//! Session state persistence
//!
//! Stores the full merged [`SessionState`] keyed by thread id.
//! In-memory for development; Postgres when a database URL is configured.

use crate::error::OrchestrationError;
use crate::state::SessionState;
use crate::Result;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex, OnceCell, OwnedMutexGuard, RwLock};
use tracing::{debug, info};

/// Trait for session state persistence
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, thread_id: &str) -> Result<Option<SessionState>>;
    /// Replace the stored snapshot in one step
    async fn save(&self, thread_id: &str, state: &SessionState) -> Result<()>;
    async fn delete(&self, thread_id: &str) -> Result<bool>;
}

/// In-memory session store for development
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionState>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, thread_id: &str) -> Result<Option<SessionState>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(thread_id).cloned())
    }

    async fn save(&self, thread_id: &str, state: &SessionState) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(thread_id.to_string(), state.clone());
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(thread_id).is_some())
    }
}

/// Postgres-backed session store.
///
/// One row per thread holding the JSON snapshot.
pub struct PostgresSessionStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresSessionStore {
    /// Build a lazily-connecting pool; nothing is dialled until first use
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| {
                OrchestrationError::DatabaseError(format!(
                    "Failed to configure session store pool: {}",
                    e
                ))
            })?;

        info!("Session store backend: postgres");

        Ok(Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS session_state (
                      thread_id TEXT PRIMARY KEY,
                      snapshot TEXT NOT NULL,
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                OrchestrationError::StoreError(format!(
                    "Failed to initialize session state schema: {}",
                    e
                ))
            })?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl SessionStore for PostgresSessionStore {
    async fn load(&self, thread_id: &str) -> Result<Option<SessionState>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT snapshot FROM session_state WHERE thread_id = $1")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                OrchestrationError::StoreError(format!("Failed to load session state: {}", e))
            })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let snapshot: String = row.try_get("snapshot").map_err(|e| {
            OrchestrationError::StoreError(format!("Corrupt session snapshot row: {}", e))
        })?;

        let state: SessionState = serde_json::from_str(&snapshot)?;
        debug!(thread_id, messages = state.message_history.len(), "Loaded session state");
        Ok(Some(state))
    }

    async fn save(&self, thread_id: &str, state: &SessionState) -> Result<()> {
        self.ensure_schema().await?;

        let snapshot = serde_json::to_string(state)?;

        sqlx::query(
            r#"
            INSERT INTO session_state (thread_id, snapshot, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (thread_id)
            DO UPDATE SET snapshot = EXCLUDED.snapshot, updated_at = NOW()
            "#,
        )
        .bind(thread_id)
        .bind(snapshot)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            OrchestrationError::StoreError(format!("Failed to save session state: {}", e))
        })?;

        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool> {
        self.ensure_schema().await?;

        let result = sqlx::query("DELETE FROM session_state WHERE thread_id = $1")
            .bind(thread_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                OrchestrationError::StoreError(format!("Failed to delete session state: {}", e))
            })?;

        Ok(result.rows_affected() > 0)
    }
}

type LockMap = HashMap<String, Arc<Mutex<()>>>;

/// One async mutex per thread id.
///
/// Holding the guard across load → run → save serializes turns of the same
/// session; distinct sessions never contend. An entry lives only while some
/// guard holds or awaits it.
#[derive(Default)]
pub struct SessionLocks {
    locks: Arc<StdMutex<LockMap>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, thread_id: &str) -> SessionGuard {
        let lock = {
            let mut locks = lock_map(&self.locks);
            locks
                .entry(thread_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let mut session = SessionGuard {
            guard: None,
            lock: Some(lock.clone()),
            thread_id: thread_id.to_string(),
            locks: self.locks.clone(),
        };
        session.guard = Some(lock.lock_owned().await);
        session
    }

    /// Number of thread ids with a held or awaited lock
    pub fn tracked_sessions(&self) -> usize {
        lock_map(&self.locks).len()
    }
}

fn lock_map(locks: &StdMutex<LockMap>) -> MutexGuard<'_, LockMap> {
    locks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive access to one session; releasing it prunes the map entry once
/// no other turn holds or waits on the same lock.
pub struct SessionGuard {
    guard: Option<OwnedMutexGuard<()>>,
    lock: Option<Arc<Mutex<()>>>,
    thread_id: String,
    locks: Arc<StdMutex<LockMap>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.lock.take();

        // clones are only taken under the map lock, so the count is stable here
        let mut locks = lock_map(&self.locks);
        if locks
            .get(&self.thread_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.thread_id);
        }
    }
}
