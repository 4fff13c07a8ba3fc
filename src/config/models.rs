//! Configuration data structures for synapse.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files.
//! They are intentionally serde-friendly and include defaults so that
//! minimal configs remain concise. Durations are strings ("200ms", "1s");
//! "0" disables the corresponding timeout.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn default_duration_disabled() -> String {
    "0".to_string()
}

fn default_sni_read_timeout() -> String {
    "2s".to_string()
}

fn default_acme_cache_dir() -> String {
    "/tmp".to_string()
}

fn default_true() -> bool {
    true
}

fn default_access_policy() -> String {
    "allow".to_string()
}

fn default_discovery_kind() -> String {
    "static".to_string()
}

fn default_healthcheck_kind() -> String {
    "none".to_string()
}

fn default_healthcheck_interval() -> String {
    "10s".to_string()
}

fn default_healthcheck_timeout() -> String {
    "2s".to_string()
}

fn default_threshold() -> u32 {
    1
}

/// Top-level configuration: a map of named listeners.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub servers: HashMap<String, ServerConfig>,
}

/// Listener protocol on the client side
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Tls,
}

/// Balancing strategy applied by the static scheduler
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum BalanceStrategy {
    #[default]
    #[serde(rename = "roundrobin")]
    RoundRobin,
    #[serde(rename = "random")]
    Random,
}

/// Configuration of a single listener, immutable after construction.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Address to listen on ("host:port")
    pub bind: String,

    /// Client-side protocol: plain tcp or tls termination
    #[serde(default)]
    pub protocol: Protocol,

    /// Maximum concurrent client connections; 0 = unbounded
    #[serde(default)]
    pub max_connections: u32,

    /// Idle window for the backend -> client direction; "0" disables
    #[serde(default = "default_duration_disabled")]
    pub client_idle_timeout: String,

    /// Idle window for the client -> backend direction; "0" disables
    #[serde(default = "default_duration_disabled")]
    pub backend_idle_timeout: String,

    /// Dial timeout for backend connections; "0" disables
    #[serde(default = "default_duration_disabled")]
    pub backend_connection_timeout: String,

    /// ClientHello sniffing; presence enables SNI extraction
    #[serde(default)]
    pub sni: Option<SniConfig>,

    /// Static certificate material for TLS termination
    #[serde(default)]
    pub tls: Option<TlsListenerConfig>,

    /// ACME-issued certificates for TLS termination
    #[serde(default)]
    pub acme: Option<AcmeConfig>,

    /// TLS settings for dialing backends
    #[serde(default)]
    pub backends_tls: Option<BackendsTlsConfig>,

    /// Per-client-IP access rules
    #[serde(default)]
    pub access: Option<AccessConfig>,

    /// Backend discovery settings, consumed by the scheduler
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Health checking settings, consumed by the scheduler
    #[serde(default)]
    pub healthcheck: HealthcheckConfig,

    /// Balancing strategy, consumed by the scheduler
    #[serde(default)]
    pub balance: BalanceStrategy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:0".to_string(),
            protocol: Protocol::Tcp,
            max_connections: 0,
            client_idle_timeout: default_duration_disabled(),
            backend_idle_timeout: default_duration_disabled(),
            backend_connection_timeout: default_duration_disabled(),
            sni: None,
            tls: None,
            acme: None,
            backends_tls: None,
            access: None,
            discovery: DiscoveryConfig::default(),
            healthcheck: HealthcheckConfig::default(),
            balance: BalanceStrategy::RoundRobin,
        }
    }
}

/// SNI sniffing configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SniConfig {
    /// Maximum time to wait for the ClientHello
    pub read_timeout: String,
}

impl Default for SniConfig {
    fn default() -> Self {
        Self {
            read_timeout: default_sni_read_timeout(),
        }
    }
}

/// TLS termination from PEM files
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TlsListenerConfig {
    /// Path to the PEM encoded certificate chain
    pub cert_path: String,
    /// Path to the PEM encoded private key
    pub key_path: String,
    /// Cipher suite names to allow; empty = provider defaults
    #[serde(default)]
    pub ciphers: Vec<String>,
    /// Minimum protocol version ("tls1.2", "tls1.3")
    #[serde(default)]
    pub min_version: Option<String>,
    /// Maximum protocol version
    #[serde(default)]
    pub max_version: Option<String>,
    /// Prefer the server's cipher order (always the case with rustls)
    #[serde(default)]
    pub prefer_server_ciphers: bool,
    /// Whether session tickets may be issued
    #[serde(default = "default_true")]
    pub session_tickets: bool,
}

/// ACME (e.g. Let's Encrypt) certificate management configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AcmeConfig {
    /// Hostname whitelist certificates may be requested for
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Directory cache for issued certificates and account keys
    #[serde(default = "default_acme_cache_dir")]
    pub cache_dir: String,
}

/// TLS settings for dialing backends
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct BackendsTlsConfig {
    /// Optional client certificate chain for mutual TLS
    #[serde(default)]
    pub cert_path: Option<String>,
    /// Optional client private key for mutual TLS
    #[serde(default)]
    pub key_path: Option<String>,
    /// Cipher suite names to allow; empty = provider defaults
    #[serde(default)]
    pub ciphers: Vec<String>,
    #[serde(default)]
    pub min_version: Option<String>,
    #[serde(default)]
    pub max_version: Option<String>,
    #[serde(default)]
    pub prefer_server_ciphers: bool,
    #[serde(default = "default_true")]
    pub session_tickets: bool,
    /// Skip backend certificate verification
    #[serde(default)]
    pub ignore_verify: bool,
    /// PEM file with additional root CAs to trust
    #[serde(default)]
    pub root_ca_cert_path: Option<String>,
}

/// Access filtering configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccessConfig {
    /// Policy when no rule matches: "allow" or "deny"
    #[serde(default = "default_access_policy")]
    pub default: String,
    /// Ordered rules, each "<allow|deny> <ip-or-cidr>"
    #[serde(default)]
    pub rules: Vec<String>,
}

/// Backend discovery configuration (opaque to the server engine)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DiscoveryConfig {
    /// Discovery kind; "static" is provided in-crate
    #[serde(default = "default_discovery_kind")]
    pub kind: String,
    /// Backend endpoints ("host:port") for static discovery
    #[serde(default)]
    pub static_list: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            kind: default_discovery_kind(),
            static_list: Vec::new(),
        }
    }
}

/// Health checking configuration (opaque to the server engine)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HealthcheckConfig {
    /// "none" disables probing; "ping" runs TCP connect probes
    #[serde(default = "default_healthcheck_kind")]
    pub kind: String,
    /// Probe interval
    #[serde(default = "default_healthcheck_interval")]
    pub interval: String,
    /// Probe timeout
    #[serde(default = "default_healthcheck_timeout")]
    pub timeout: String,
    /// Consecutive failures before a backend is marked unhealthy
    #[serde(default = "default_threshold")]
    pub fails: u32,
    /// Consecutive passes before a backend is marked healthy again
    #[serde(default = "default_threshold")]
    pub passes: u32,
}

impl Default for HealthcheckConfig {
    fn default() -> Self {
        Self {
            kind: default_healthcheck_kind(),
            interval: default_healthcheck_interval(),
            timeout: default_healthcheck_timeout(),
            fails: default_threshold(),
            passes: default_threshold(),
        }
    }
}
