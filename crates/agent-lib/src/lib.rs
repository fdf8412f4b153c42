//! Fleet agent library
//!
//! This crate provides the core functionality for:
//! - Container runtime access behind an adapter trait
//! - Central API synchronization and the ignore list
//! - Reconciliation of runtime state (full scan, events, single sync)
//! - Task execution and host metrics reporting
//! - Health checks and observability

pub mod error;
pub mod health;
pub mod metrics;
pub mod models;
pub mod observability;
pub mod reconcile;
pub mod runtime;
pub mod supervisor;
pub mod sync;
pub mod tasks;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{ReconcileError, RuntimeError, SyncError, TaskError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
pub use supervisor::{Agent, AgentSettings, HostOverrides};
