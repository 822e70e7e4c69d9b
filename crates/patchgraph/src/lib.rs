//! Audio topology engine: hardware discovery, desired-state ledgers and
//! reconciliation of the JACK routing graph.

pub mod catalog;
pub mod db;
pub mod engine;
pub mod error;
pub mod identity;
pub mod loader;
pub mod ports;
pub mod probe;
pub mod reconcile;
pub mod routing;
pub mod runner;
pub mod server;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use catalog::{ProbeFailure, RefreshReport};
pub use db::Database;
pub use engine::{Engine, EngineSettings};
pub use error::PatchError;
pub use identity::EnumerationError;
pub use probe::ProbeParseError;
pub use reconcile::ReconcileReport;
pub use runner::{CommandError, CommandOutput, CommandRunner, Invocation, SystemRunner};
pub use server::ServerStatus;
pub use types::*;
