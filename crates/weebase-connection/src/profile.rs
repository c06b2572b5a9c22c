//! Saved connection profiles

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;
use weebase_core::{Dialect, Result, WeebaseError};

/// A saved database connection. Profiles are never edited once stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub id: Uuid,

    /// Display name
    pub name: String,

    /// Driver name as entered (sqlite, postgres, mysql, etc.)
    pub driver: String,

    /// Driver-native connection string
    pub dsn: String,

    pub created_at: DateTime<Utc>,
}

impl ConnectionProfile {
    pub fn dialect(&self) -> Dialect {
        Dialect::normalize(&self.driver)
    }
}

/// Profile fields submitted for saving
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewProfile {
    /// Assigned when missing
    pub id: Option<Uuid>,
    pub name: String,
    pub driver: String,
    pub dsn: String,
}

impl NewProfile {
    pub fn new(name: impl Into<String>, driver: impl Into<String>, dsn: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            driver: driver.into(),
            dsn: dsn.into(),
        }
    }

    /// Trim and check the fields, producing the profile to store
    pub fn into_profile(self) -> Result<ConnectionProfile> {
        let name = self.name.trim();
        let driver = self.driver.trim();
        let dsn = self.dsn.trim();

        if name.is_empty() || driver.is_empty() || dsn.is_empty() {
            return Err(WeebaseError::Validation("name, driver and dsn are required".into()));
        }
        Dialect::normalize(driver).ensure_supported()?;

        Ok(ConnectionProfile {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            name: name.to_string(),
            driver: driver.to_string(),
            dsn: dsn.to_string(),
            created_at: Utc::now(),
        })
    }
}

/// Storage for saved profiles
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn list(&self) -> Result<Vec<ConnectionProfile>>;

    /// Validate and store a new profile
    async fn save(&self, profile: NewProfile) -> Result<ConnectionProfile>;

    async fn get(&self, id: Uuid) -> Result<Option<ConnectionProfile>>;
}

fn ensure_new(profiles: &[ConnectionProfile], id: Uuid) -> Result<()> {
    if profiles.iter().any(|p| p.id == id) {
        return Err(WeebaseError::Validation(format!("profile {} already exists", id)));
    }
    Ok(())
}

/// Profiles kept for the lifetime of the process
#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<Vec<ConnectionProfile>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn list(&self) -> Result<Vec<ConnectionProfile>> {
        Ok(self.profiles.read().clone())
    }

    async fn save(&self, profile: NewProfile) -> Result<ConnectionProfile> {
        let profile = profile.into_profile()?;
        let mut profiles = self.profiles.write();
        ensure_new(&profiles, profile.id)?;
        profiles.push(profile.clone());
        tracing::debug!(profile_id = %profile.id, driver = %profile.driver, "profile saved");
        Ok(profile)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ConnectionProfile>> {
        Ok(self.profiles.read().iter().find(|p| p.id == id).cloned())
    }
}

/// Profiles persisted as a JSON array, rewritten on every save
pub struct JsonProfileStore {
    path: PathBuf,
    profiles: Mutex<Vec<ConnectionProfile>>,
}

impl JsonProfileStore {
    /// Open the store, loading existing profiles when the file exists
    #[tracing::instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let profiles = if tokio::fs::try_exists(&path).await? {
            let content = tokio::fs::read_to_string(&path).await?;
            let profiles: Vec<ConnectionProfile> = serde_json::from_str(&content)?;
            tracing::info!(count = profiles.len(), "profiles loaded from storage");
            profiles
        } else {
            tracing::debug!("profile file doesn't exist yet");
            Vec::new()
        };

        Ok(Self {
            path,
            profiles: Mutex::new(profiles),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, profiles: &[ConnectionProfile]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(profiles)?;
        tokio::fs::write(&self.path, content).await?;
        tracing::info!(count = profiles.len(), path = ?self.path, "profiles saved to storage");
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for JsonProfileStore {
    async fn list(&self) -> Result<Vec<ConnectionProfile>> {
        Ok(self.profiles.lock().await.clone())
    }

    async fn save(&self, profile: NewProfile) -> Result<ConnectionProfile> {
        let profile = profile.into_profile()?;
        let mut profiles = self.profiles.lock().await;
        ensure_new(&profiles, profile.id)?;

        profiles.push(profile.clone());
        if let Err(e) = self.write(&profiles).await {
            profiles.pop();
            return Err(e);
        }
        Ok(profile)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ConnectionProfile>> {
        Ok(self.profiles.lock().await.iter().find(|p| p.id == id).cloned())
    }
}
