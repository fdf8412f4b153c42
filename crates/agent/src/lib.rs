//! Fleet agent process surface: configuration and the health/metrics
//! HTTP endpoint

pub mod api;
pub mod config;
