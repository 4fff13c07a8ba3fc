use std::net::SocketAddr;

use eyre::Result;

use crate::{
    config::models::{AppConfig, Protocol, ServerConfig},
    utils::duration,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid bind address '{address}': {reason}")]
    InvalidBindAddress { address: String, reason: String },

    #[error("Invalid TLS configuration: {message}")]
    InvalidTls { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Listener configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate a whole application config (every listener)
    pub fn validate_app(config: &AppConfig) -> ValidationResult<()> {
        if config.servers.is_empty() {
            return Err(ValidationError::MissingField {
                field: "servers".to_string(),
            });
        }

        let mut errors = Vec::new();
        for (name, server) in &config.servers {
            if let Err(e) = Self::validate(server) {
                errors.push(ValidationError::InvalidField {
                    field: format!("servers.{name}"),
                    message: e.to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate a single listener configuration
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_bind_address(&config.bind) {
            errors.push(e);
        }

        for (field, value) in [
            ("client_idle_timeout", &config.client_idle_timeout),
            ("backend_idle_timeout", &config.backend_idle_timeout),
            (
                "backend_connection_timeout",
                &config.backend_connection_timeout,
            ),
        ] {
            if !duration::is_valid(value) {
                errors.push(ValidationError::InvalidField {
                    field: field.to_string(),
                    message: format!("'{value}' is not a duration (e.g. '200ms', '1s', or '0')"),
                });
            }
        }

        if let Some(sni) = &config.sni {
            if !duration::is_valid(&sni.read_timeout) {
                errors.push(ValidationError::InvalidField {
                    field: "sni.read_timeout".to_string(),
                    message: format!("'{}' is not a duration", sni.read_timeout),
                });
            }
        }

        if let Err(e) = Self::validate_tls(config) {
            errors.push(e);
        }

        if config.discovery.kind == "static" && config.discovery.static_list.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "discovery.static_list".to_string(),
            });
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            }),
        }
    }

    fn validate_bind_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidBindAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g. '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_tls(config: &ServerConfig) -> ValidationResult<()> {
        match config.protocol {
            Protocol::Tls => {
                if config.tls.is_none() && config.acme.is_none() {
                    return Err(ValidationError::InvalidTls {
                        message: "protocol 'tls' requires a [tls] or [acme] section".to_string(),
                    });
                }
            }
            Protocol::Tcp => {
                if config.tls.is_some() || config.acme.is_some() {
                    return Err(ValidationError::InvalidTls {
                        message: "[tls]/[acme] sections require protocol = 'tls'".to_string(),
                    });
                }
            }
        }

        if let Some(tls) = &config.tls {
            if tls.cert_path.is_empty() || tls.key_path.is_empty() {
                return Err(ValidationError::InvalidTls {
                    message: "TLS configuration must specify both cert_path and key_path"
                        .to_string(),
                });
            }
        }

        Ok(())
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::{DiscoveryConfig, SniConfig, TlsListenerConfig};

    fn base_config() -> ServerConfig {
        ServerConfig {
            bind: "127.0.0.1:3000".to_string(),
            discovery: DiscoveryConfig {
                kind: "static".to_string(),
                static_list: vec!["127.0.0.1:8000".to_string()],
            },
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_valid_minimal_config() {
        assert!(ServerConfigValidator::validate(&base_config()).is_ok());
    }

    #[test]
    fn test_invalid_bind_address() {
        let mut cfg = base_config();
        cfg.bind = "not-an-address".to_string();
        assert!(matches!(
            ServerConfigValidator::validate(&cfg),
            Err(ValidationError::InvalidBindAddress { .. })
        ));
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let mut cfg = base_config();
        cfg.client_idle_timeout = "whenever".to_string();
        assert!(ServerConfigValidator::validate(&cfg).is_err());
    }

    #[test]
    fn test_sni_read_timeout_checked() {
        let mut cfg = base_config();
        cfg.sni = Some(SniConfig {
            read_timeout: "bogus".to_string(),
        });
        assert!(ServerConfigValidator::validate(&cfg).is_err());
    }

    #[test]
    fn test_tls_protocol_requires_material() {
        let mut cfg = base_config();
        cfg.protocol = Protocol::Tls;
        assert!(matches!(
            ServerConfigValidator::validate(&cfg),
            Err(ValidationError::InvalidTls { .. })
        ));

        cfg.tls = Some(TlsListenerConfig {
            cert_path: "/tmp/server.crt".to_string(),
            key_path: "/tmp/server.key".to_string(),
            ciphers: vec![],
            min_version: None,
            max_version: None,
            prefer_server_ciphers: false,
            session_tickets: true,
        });
        assert!(ServerConfigValidator::validate(&cfg).is_ok());
    }

    #[test]
    fn test_tls_section_requires_tls_protocol() {
        let mut cfg = base_config();
        cfg.tls = Some(TlsListenerConfig {
            cert_path: "/tmp/server.crt".to_string(),
            key_path: "/tmp/server.key".to_string(),
            ciphers: vec![],
            min_version: None,
            max_version: None,
            prefer_server_ciphers: false,
            session_tickets: true,
        });
        assert!(ServerConfigValidator::validate(&cfg).is_err());
    }

    #[test]
    fn test_static_discovery_needs_backends() {
        let mut cfg = base_config();
        cfg.discovery.static_list.clear();
        assert!(matches!(
            ServerConfigValidator::validate(&cfg),
            Err(ValidationError::MissingField { .. })
        ));
    }

    #[test]
    fn test_app_config_aggregates_errors() {
        let mut app = AppConfig::default();
        assert!(ServerConfigValidator::validate_app(&app).is_err());

        app.servers.insert("ok".to_string(), base_config());
        assert!(ServerConfigValidator::validate_app(&app).is_ok());

        let mut bad = base_config();
        bad.bind = "nope".to_string();
        app.servers.insert("bad".to_string(), bad);
        assert!(ServerConfigValidator::validate_app(&app).is_err());
    }
}
