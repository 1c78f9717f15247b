//! # Controller
//!
//! Reconciliation logic and the HTTP server for probes and metrics.

pub mod reconciler;
pub mod server;
