//! Weebase Connection - Connection lifecycle management
//!
//! This crate owns the per-session active connection, resolves connect
//! requests against saved profiles and opens handles through the driver
//! registry.

mod manager;
mod profile;
mod session;

pub use manager::{ConnectRequest, ConnectionManager, ResolvedTarget};
pub use profile::{
    ConnectionProfile, InMemoryProfileStore, JsonProfileStore, NewProfile, ProfileStore,
};
pub use session::{ActiveConnection, DashMapSessionStore, SessionStore};
