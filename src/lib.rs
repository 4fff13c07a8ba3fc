//! synapse - a per-listener L4 (TCP) reverse proxy and load balancer.
//!
//! synapse accepts client connections on a bound address, optionally
//! terminates TLS (static certificates or ACME), optionally sniffs the TLS
//! ClientHello for an SNI hostname without terminating, selects a healthy
//! backend through a pluggable scheduler, and relays bytes in both
//! directions until either side closes or an idle timeout fires. Per-backend
//! counters (active connections, bytes rx/tx, refusals) and a live
//! client-connection count are pushed to the configured collaborators.
//!
//! # Features
//! - Plain TCP and TLS-terminating listeners
//! - SNI extraction with byte-exact ClientHello replay (route TLS without
//!   terminating it)
//! - ACME certificate management with a directory cache
//! - TLS to backends with optional mutual auth and custom roots
//! - Per-client-IP access rules (ordered CIDR allow/deny)
//! - Pluggable backend discovery, health checking and balancing behind the
//!   `Scheduler` port; a static round-robin/random implementation ships
//!   in-crate
//! - Per-direction idle timeouts and connection caps
//! - Structured tracing and metrics via the `metrics` facade
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use synapse::{
//!     adapters::{MetricsStatsHandler, StaticScheduler},
//!     config::models::ServerConfig,
//!     core::Server,
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let cfg = ServerConfig {
//!     bind: "127.0.0.1:3000".to_string(),
//!     ..ServerConfig::default()
//! };
//! let scheduler = Arc::new(StaticScheduler::new(
//!     "sample",
//!     &cfg.discovery,
//!     &cfg.healthcheck,
//!     cfg.balance,
//! )?);
//! let stats = Arc::new(MetricsStatsHandler::new("sample"));
//! let mut server = Server::new("sample", cfg, scheduler, stats)?;
//! server.start().await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters**
//! (implementations) while keeping business logic inside `core`. The server
//! engine consumes backend selection through the [`ports::Scheduler`] trait
//! and pushes connection-count samples through [`ports::StatsHandler`]; it
//! never reaches into their internals.
//!
//! # Error Handling
//! All fallible APIs return a domain specific error type or
//! `eyre::Result<T>` at the application boundary.

pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

// These modules are implementation details and should not be directly used by users
pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{MetricsStatsHandler, StaticScheduler},
    core::{Server, ServerError, TcpContext},
    ports::{Backend, Scheduler, StatsHandler},
    utils::ShutdownSignal,
};
