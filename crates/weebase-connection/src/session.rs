//! Per-session active connection state

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;
use weebase_core::{Connection, Dialect};

/// The live handle bound to one session
#[derive(Clone)]
pub struct ActiveConnection {
    pub id: Uuid,
    /// Driver name as requested
    pub driver: String,
    pub dialect: Dialect,
    pub connection: Arc<dyn Connection>,
    pub last_used_at: DateTime<Utc>,
    /// Database or profile name shown to the user
    pub database: Option<String>,
}

impl ActiveConnection {
    pub fn new(
        driver: impl Into<String>,
        connection: Arc<dyn Connection>,
        database: Option<String>,
    ) -> Self {
        let driver = driver.into();
        Self {
            id: Uuid::new_v4(),
            dialect: Dialect::normalize(&driver),
            driver,
            connection,
            last_used_at: Utc::now(),
            database,
        }
    }
}

impl std::fmt::Debug for ActiveConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveConnection")
            .field("id", &self.id)
            .field("driver", &self.driver)
            .field("last_used_at", &self.last_used_at)
            .field("database", &self.database)
            .finish()
    }
}

/// Maps session ids to their active connection
pub trait SessionStore: Send + Sync {
    fn get(&self, session_id: &str) -> Option<ActiveConnection>;

    /// Bind `active` to the session, returning the connection it replaced
    fn insert(&self, session_id: &str, active: ActiveConnection) -> Option<ActiveConnection>;

    fn remove(&self, session_id: &str) -> Option<ActiveConnection>;

    /// Refresh `last_used_at` and return the updated connection
    fn touch(&self, session_id: &str) -> Option<ActiveConnection>;

    /// Remove every connection unused since `cutoff`
    fn remove_idle(&self, cutoff: DateTime<Utc>) -> Vec<ActiveConnection>;
}

/// Sharded in-process session map
#[derive(Default)]
pub struct DashMapSessionStore {
    sessions: DashMap<String, ActiveConnection>,
}

impl DashMapSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionStore for DashMapSessionStore {
    fn get(&self, session_id: &str) -> Option<ActiveConnection> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    fn insert(&self, session_id: &str, active: ActiveConnection) -> Option<ActiveConnection> {
        self.sessions.insert(session_id.to_string(), active)
    }

    fn remove(&self, session_id: &str) -> Option<ActiveConnection> {
        self.sessions.remove(session_id).map(|(_, active)| active)
    }

    fn touch(&self, session_id: &str) -> Option<ActiveConnection> {
        let mut entry = self.sessions.get_mut(session_id)?;
        entry.last_used_at = Utc::now();
        Some(entry.value().clone())
    }

    fn remove_idle(&self, cutoff: DateTime<Utc>) -> Vec<ActiveConnection> {
        let idle: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.last_used_at < cutoff)
            .map(|entry| entry.key().clone())
            .collect();

        idle.iter()
            // re-check under the shard lock in case the session was used meanwhile
            .filter_map(|id| self.sessions.remove_if(id, |_, active| active.last_used_at < cutoff))
            .map(|(_, active)| active)
            .collect()
    }
}
