//! Synchronization with the central API
//!
//! This module provides:
//! - Bearer-authenticated JSON client for the central API
//! - Ignore-list probes and cleanup
//! - The sync transport used by reconciliation, tasks and metrics

mod client;
mod ignore;
mod transport;


pub use client::ApiClient;
pub use ignore::IgnoreList;
pub use transport::{HttpSyncTransport, SyncOutcome, SyncTransport, TransportConfig};
