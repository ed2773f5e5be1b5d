//! Session table: session id -> running [`crate::agent::Agent`], with
//! capacity-bounded LRU eviction and a background idle-TTL sweeper.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::agent::Agent;
use crate::error::CoreResult;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Entry {
    agent: Arc<Mutex<Agent>>,
    last_activity_at: DateTime<Utc>,
}

/// A factory that builds a fresh [`Agent`] for a session id. Boxed so the
/// manager doesn't need to be generic over the agent's own dependencies.
pub type AgentFactory = Arc<dyn Fn(String) -> Agent + Send + Sync>;

/// Owns the set of live agents, enforcing `max_sessions` via LRU eviction
/// and reclaiming sessions idle longer than `session_timeout`.
pub struct SessionManager {
    table: RwLock<HashMap<String, Entry>>,
    max_sessions: usize,
    session_timeout: chrono::Duration,
    factory: AgentFactory,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    #[must_use]
    pub fn new(max_sessions: usize, session_timeout_ms: u64, factory: AgentFactory) -> Arc<Self> {
        let manager = Arc::new(Self {
            table: RwLock::new(HashMap::new()),
            max_sessions,
            session_timeout: chrono::Duration::milliseconds(session_timeout_ms as i64),
            factory,
            sweeper: Mutex::new(None),
        });
        manager.clone().spawn_sweeper();
        manager
    }

    fn spawn_sweeper(self: Arc<Self>) {
        let weak = Arc::downgrade(&self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(manager) => manager.sweep_idle().await,
                    None => return,
                }
            }
        });
        // `new` just constructed this Arc, so nothing else can be holding
        // the sweeper lock yet; try_lock cannot fail in practice here.
        if let Ok(mut guard) = self.sweeper.try_lock() {
            *guard = Some(handle);
        }
    }

    #[instrument(skip(self))]
    async fn sweep_idle(&self) {
        let cutoff = Utc::now() - self.session_timeout;
        let stale: Vec<String> = {
            let table = self.table.read().await;
            table
                .iter()
                .filter(|(_, e)| e.last_activity_at < cutoff)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in stale {
            debug!(session_id = %id, "sweeping idle session");
            self.release(&id).await;
        }
    }

    /// Returns the agent handle for `id`, creating it if unseen, and
    /// refreshing its activity timestamp. May evict the least-recently-used
    /// *other* session if this admission pushes the table over capacity --
    /// the evicted agent is cleaned up exactly as `release` would, with the
    /// same cleanup-error-is-logged-and-swallowed handling.
    #[instrument(skip(self))]
    pub async fn acquire(&self, id: &str) -> CoreResult<Arc<Mutex<Agent>>> {
        let mut table = self.table.write().await;

        if let Some(entry) = table.get_mut(id) {
            entry.last_activity_at = Utc::now();
            return Ok(entry.agent.clone());
        }

        let agent = Arc::new(Mutex::new((self.factory)(id.to_string())));
        table.insert(
            id.to_string(),
            Entry {
                agent: agent.clone(),
                last_activity_at: Utc::now(),
            },
        );

        let evicted = if table.len() > self.max_sessions {
            table
                .iter()
                .filter(|(k, _)| k.as_str() != id)
                .min_by_key(|(_, e)| e.last_activity_at)
                .map(|(k, _)| k.clone())
                .and_then(|evict_id| table.remove(&evict_id).map(|entry| (evict_id, entry)))
        } else {
            None
        };

        // Drop the table lock before awaiting the evicted agent's cleanup
        // so a slow cleanup never blocks other sessions' acquire/release.
        drop(table);

        if let Some((evict_id, entry)) = evicted {
            let mut evicted_agent = entry.agent.lock().await;
            if let Err(err) = evicted_agent.cleanup().await {
                warn!(session_id = %evict_id, error = %err, "session cleanup failed during eviction");
            }
            debug!(session_id = %evict_id, "evicted session over capacity");
        }

        Ok(agent)
    }

    /// Removes and cleans up a session. Unknown ids are a no-op.
    #[instrument(skip(self))]
    pub async fn release(&self, id: &str) {
        let removed = self.table.write().await.remove(id);
        if let Some(entry) = removed {
            let mut agent = entry.agent.lock().await;
            if let Err(err) = agent.cleanup().await {
                warn!(session_id = %id, error = %err, "session cleanup failed during release");
            }
        }
    }

    pub async fn active_sessions(&self) -> Vec<String> {
        self.table.read().await.keys().cloned().collect()
    }

    pub async fn session_count(&self) -> usize {
        self.table.read().await.len()
    }

    /// Stops the sweeper and releases every session. Idempotent.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().await.take() {
            handle.abort();
        }
        let ids: Vec<String> = self.active_sessions().await;
        for id in ids {
            self.release(&id).await;
        }
    }
}
