//! Connection service
//!
//! Thin layer over `ConnectionManager` that speaks `ServiceError` and hands
//! out serializable connection summaries.

use serde::Serialize;
use uuid::Uuid;
use weebase_connection::{
    ActiveConnection, ConnectRequest, ConnectionManager, ConnectionProfile, NewProfile,
};

use crate::error::{ServiceError, ServiceResult};

/// What a caller may show about an active connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub id: Uuid,
    pub driver: String,
    pub dialect: String,
    pub database: Option<String>,
}

impl From<&ActiveConnection> for ConnectionInfo {
    fn from(active: &ActiveConnection) -> Self {
        Self {
            id: active.id,
            driver: active.driver.clone(),
            dialect: active.dialect.to_string(),
            database: active.database.clone(),
        }
    }
}

/// Service for connection lifecycle and saved profiles
pub struct ConnectionService {
    manager: ConnectionManager,
}

impl ConnectionService {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub async fn connect(
        &self,
        session_id: &str,
        request: &ConnectRequest,
    ) -> ServiceResult<ConnectionInfo> {
        let active = self.manager.connect(session_id, request).await?;
        Ok(ConnectionInfo::from(&active))
    }

    pub async fn disconnect(&self, session_id: &str) -> ServiceResult<()> {
        self.manager
            .disconnect(session_id)
            .await
            .map_err(|e| {
                ServiceError::ConnectionFailed(format!("failed to close connection: {}", e))
            })
    }

    /// The session's live connection
    pub fn active(&self, session_id: &str) -> ServiceResult<ActiveConnection> {
        self.manager.active(session_id).map_err(|_| ServiceError::NotConnected)
    }

    pub fn info(&self, session_id: &str) -> ServiceResult<ConnectionInfo> {
        self.active(session_id).map(|active| ConnectionInfo::from(&active))
    }

    pub async fn list_profiles(&self) -> ServiceResult<Vec<ConnectionProfile>> {
        Ok(self.manager.profiles().list().await?)
    }

    /// Save a new profile. The driver must be enabled.
    pub async fn save_profile(&self, profile: NewProfile) -> ServiceResult<ConnectionProfile> {
        let driver = profile.driver.trim();
        if !driver.is_empty() && !self.manager.drivers().has(driver) {
            return Err(ServiceError::Configuration(format!("unsupported driver: {}", driver)));
        }
        Ok(self.manager.profiles().save(profile).await?)
    }

    pub async fn get_profile(&self, id: Uuid) -> ServiceResult<ConnectionProfile> {
        self.manager
            .profiles()
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("profile {}", id)))
    }
}
