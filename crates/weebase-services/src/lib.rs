//! Weebase Services Layer
//!
//! Orchestrates catalog browsing, row mutations and the SQL console on top of
//! a session's active connection. Front ends (HTTP handlers, CLIs) talk to
//! this crate only.
//!
//! # Architecture
//!
//! ```text
//! Front end
//!     ↓
//! Service Layer (weebase-services) ← This crate
//!     ↓
//! Connection Layer (weebase-connection, weebase-settings)
//!     ↓
//! Infrastructure Layer (weebase-core, weebase-drivers)
//! ```
//!
//! # Services
//!
//! - [`ConnectionService`] - Connection lifecycle and saved profiles
//! - [`CatalogService`] - Databases, schemas, tables, columns and views
//! - [`TableService`] - Row browsing and paging
//! - [`MutationService`] - Safety-gated single-row insert, update and delete
//! - [`SqlService`] - Console batches and EXPLAIN
//! - [`DdlService`] - CREATE TABLE
//!
//! Every mutating path takes a [`SafetyPolicy`] snapshot; [`Services`]
//! derives it from the loaded settings.

mod catalog_service;
mod connection_service;
mod ddl_service;
mod error;
mod mutation_service;
mod sql_service;
mod table_service;

use std::sync::Arc;

use weebase_connection::{ConnectionManager, ProfileStore, SessionStore};
use weebase_drivers::DriverRegistry;
use weebase_settings::WeebaseSettings;

pub use catalog_service::CatalogService;
pub use connection_service::{ConnectionInfo, ConnectionService};
pub use ddl_service::DdlService;
pub use error::{ServiceError, ServiceResult};
pub use mutation_service::MutationService;
pub use sql_service::SqlService;
pub use table_service::{DEFAULT_PER_PAGE, MAX_PER_PAGE, TablePage, TableService};

pub use weebase_core::SafetyPolicy;
pub use weebase_core::executor::{MutationOutcome, SqlOutcome};

/// Every service wired from one settings snapshot
pub struct Services {
    pub connections: ConnectionService,
    pub catalog: CatalogService,
    pub tables: TableService,
    pub mutations: MutationService,
    pub sql: SqlService,
    pub ddl: DdlService,
    policy: SafetyPolicy,
}

impl Services {
    /// Build the services from `settings`. Only enabled drivers are
    /// registered.
    pub fn from_settings(
        settings: &WeebaseSettings,
        sessions: Arc<dyn SessionStore>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        let drivers = DriverRegistry::with_enabled(&settings.enabled_drivers);
        let manager = ConnectionManager::new(drivers, sessions, profiles)
            .with_adhoc_connections(settings.allow_adhoc_connections);

        tracing::info!(
            safe_mode = settings.safe_mode_default,
            read_only = settings.read_only_mode,
            max_result_rows = settings.max_result_rows,
            "services initialized"
        );

        Self {
            connections: ConnectionService::new(manager),
            catalog: CatalogService::new(),
            tables: TableService::new(settings.default_page_size),
            mutations: MutationService::new(),
            sql: SqlService::new(settings.max_result_rows),
            ddl: DdlService::new(),
            policy: settings.safety_policy(),
        }
    }

    /// The policy every mutation is checked against
    pub fn policy(&self) -> SafetyPolicy {
        self.policy
    }
}
