//! Lightweight metrics helpers for synapse.
//!
//! This module exposes a small set of convenience functions wrapping the
//! `metrics` crate macros. It intentionally avoids embedding a concrete
//! exporter (the application can initialize any compatible recorder
//! externally) while still documenting and describing synapse-specific
//! metric names.
//!
//! Provided metrics (labels vary by family):
//! * `synapse_active_clients` (gauge per listener)
//! * `synapse_backend_active_connections` (gauge per backend)
//! * `synapse_backend_refused_total` (counter per backend)
//! * `synapse_backend_rx_bytes_total` (counter per backend)
//! * `synapse_backend_tx_bytes_total` (counter per backend)
//! * `synapse_backend_health_status` (gauge per backend)

use metrics::{counter, describe_counter, describe_gauge, gauge, Unit};
use once_cell::sync::Lazy;

pub const SYNAPSE_ACTIVE_CLIENTS: &str = "synapse_active_clients";
pub const SYNAPSE_BACKEND_ACTIVE_CONNECTIONS: &str = "synapse_backend_active_connections";
pub const SYNAPSE_BACKEND_REFUSED_TOTAL: &str = "synapse_backend_refused_total";
pub const SYNAPSE_BACKEND_RX_BYTES_TOTAL: &str = "synapse_backend_rx_bytes_total";
pub const SYNAPSE_BACKEND_TX_BYTES_TOTAL: &str = "synapse_backend_tx_bytes_total";
pub const SYNAPSE_BACKEND_HEALTH_STATUS: &str = "synapse_backend_health_status";

static DESCRIBED: Lazy<()> = Lazy::new(|| {
    describe_gauge!(
        SYNAPSE_ACTIVE_CLIENTS,
        "Number of currently connected clients per listener."
    );
    describe_gauge!(
        SYNAPSE_BACKEND_ACTIVE_CONNECTIONS,
        "Number of live proxy sessions per backend."
    );
    describe_counter!(
        SYNAPSE_BACKEND_REFUSED_TOTAL,
        Unit::Count,
        "Total backend dials that failed."
    );
    describe_counter!(
        SYNAPSE_BACKEND_RX_BYTES_TOTAL,
        Unit::Bytes,
        "Total bytes delivered to backends (client -> backend)."
    );
    describe_counter!(
        SYNAPSE_BACKEND_TX_BYTES_TOTAL,
        Unit::Bytes,
        "Total bytes delivered from backends (backend -> client)."
    );
    describe_gauge!(
        SYNAPSE_BACKEND_HEALTH_STATUS,
        "Health of individual backends (1 healthy, 0 unhealthy)."
    );
});

/// Record the live client count for a listener.
pub fn set_active_clients(listener: &str, count: usize) {
    Lazy::force(&DESCRIBED);
    gauge!(SYNAPSE_ACTIVE_CLIENTS, "listener" => listener.to_string()).set(count as f64);
}

/// Record the live proxy-session count for a backend.
pub fn set_backend_connections(backend: &str, count: u64) {
    Lazy::force(&DESCRIBED);
    gauge!(SYNAPSE_BACKEND_ACTIVE_CONNECTIONS, "backend" => backend.to_string())
        .set(count as f64);
}

/// Count a refused (failed) backend dial.
pub fn increment_backend_refused(backend: &str) {
    Lazy::force(&DESCRIBED);
    counter!(SYNAPSE_BACKEND_REFUSED_TOTAL, "backend" => backend.to_string()).increment(1);
}

/// Count bytes delivered to a backend.
pub fn increment_backend_rx(backend: &str, bytes: u64) {
    Lazy::force(&DESCRIBED);
    counter!(SYNAPSE_BACKEND_RX_BYTES_TOTAL, "backend" => backend.to_string()).increment(bytes);
}

/// Count bytes delivered from a backend.
pub fn increment_backend_tx(backend: &str, bytes: u64) {
    Lazy::force(&DESCRIBED);
    counter!(SYNAPSE_BACKEND_TX_BYTES_TOTAL, "backend" => backend.to_string()).increment(bytes);
}

/// Record the health status gauge for a backend.
pub fn set_backend_health_status(backend: &str, is_healthy: bool) {
    Lazy::force(&DESCRIBED);
    let value = if is_healthy { 1.0 } else { 0.0 };
    gauge!(SYNAPSE_BACKEND_HEALTH_STATUS, "backend" => backend.to_string()).set(value);
}
