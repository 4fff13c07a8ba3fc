use std::{fmt, str::FromStr};

use async_trait::async_trait;
use eyre::Result;
use thiserror::Error;

use crate::core::context::TcpContext;

/// Errors surfaced by a scheduler when asked for a backend
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SchedulerError {
    /// No backend is available for the connection
    #[error("No backend available for {hostname:?}")]
    NoBackend { hostname: Option<String> },

    /// The scheduler itself failed (discovery, routing, internal state)
    #[error("Scheduler failure: {0}")]
    Internal(String),
}

/// Result type alias for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// An upstream endpoint selected to receive proxied bytes.
///
/// Equality and hashing are value-based so a `Backend` can serve as a
/// counter key across scheduler calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Backend {
    host: String,
    port: u16,
}

impl Backend {
    /// Create a backend from a host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host part of the endpoint (name or IP literal)
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port part of the endpoint
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Dialable `host:port` address (IPv6 hosts are bracketed)
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Backend {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| {
            SchedulerError::Internal(format!("Backend '{s}' is not in host:port form"))
        })?;
        let port: u16 = port.parse().map_err(|_| {
            SchedulerError::Internal(format!("Backend '{s}' has an invalid port"))
        })?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(SchedulerError::Internal(format!(
                "Backend '{s}' has an empty host"
            )));
        }
        Ok(Backend::new(host, port))
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address())
    }
}

/// Scheduler defines the port (interface) for backend discovery, health
/// checking and balancing, consumed by the server engine.
///
/// The engine calls `take_backend` once per admitted connection and reports
/// counter deltas as the connection progresses. Implementations must be
/// internally thread-safe; the engine invokes them concurrently from many
/// connection handlers.
#[async_trait]
pub trait Scheduler: Send + Sync + 'static {
    /// Start background work (discovery, health checking)
    async fn start(&self) -> Result<()>;

    /// Stop background work; counters may still be read afterwards
    fn stop(&self);

    /// Select a backend for the given connection context
    async fn take_backend(&self, ctx: &TcpContext) -> SchedulerResult<Backend>;

    /// A proxy session to the backend was established
    fn increment_connection(&self, backend: &Backend);

    /// A proxy session to the backend ended
    fn decrement_connection(&self, backend: &Backend);

    /// A dial to the backend failed
    fn increment_refused(&self, backend: &Backend);

    /// Bytes delivered to the backend (client -> backend direction)
    fn increment_rx(&self, backend: &Backend, bytes: u64);

    /// Bytes delivered from the backend (backend -> client direction)
    fn increment_tx(&self, backend: &Backend, bytes: u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_address() {
        let backend = Backend::new("127.0.0.1", 9001);
        assert_eq!(backend.address(), "127.0.0.1:9001");
    }

    #[test]
    fn test_backend_address_ipv6() {
        let backend = Backend::new("::1", 9001);
        assert_eq!(backend.address(), "[::1]:9001");
    }

    #[test]
    fn test_backend_from_str() {
        let backend: Backend = "10.0.0.1:8080".parse().expect("valid endpoint");
        assert_eq!(backend.host(), "10.0.0.1");
        assert_eq!(backend.port(), 8080);

        let v6: Backend = "[::1]:8080".parse().expect("valid endpoint");
        assert_eq!(v6.host(), "::1");
    }

    #[test]
    fn test_backend_from_str_invalid() {
        assert!("no-port".parse::<Backend>().is_err());
        assert!("host:notaport".parse::<Backend>().is_err());
        assert!(":8080".parse::<Backend>().is_err());
    }

    #[test]
    fn test_backend_equality_as_counter_key() {
        let a: Backend = "127.0.0.1:9001".parse().unwrap();
        let b = Backend::new("127.0.0.1", 9001);
        assert_eq!(a, b);
    }
}
