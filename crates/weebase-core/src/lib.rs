//! Weebase Core - Dialect-aware statement engine and safety-gated executor
//!
//! This crate provides the building blocks every other Weebase crate depends
//! on. It defines:
//!
//! - `Dialect` - Canonical database family resolved from free-form driver names
//! - Identifier validation and per-dialect quoting
//! - `statement` - SQL text builders for DDL, DML, browsing, EXPLAIN and DSNs
//! - `Connection` / `Transaction` / `DatabaseDriver` - Capability traits each
//!   dialect adapter implements once
//! - `SafetyPolicy` and the `executor` that enforces it
//! - Common types like `Value`, `Row`, `ColumnMeta`, etc.

mod connection;
mod dialect;
mod driver;
mod error;
pub mod executor;
mod ident;
mod safety;
pub mod statement;
mod types;

pub use connection::*;
pub use dialect::*;
pub use driver::*;
pub use error::*;
pub use ident::*;
pub use safety::*;
pub use types::*;
