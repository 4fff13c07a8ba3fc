//! TLS assembly for the listener terminator and the backend dialer.
//!
//! The terminator side produces a `rustls::ServerConfig` either from static
//! PEM files or from an ACME certificate manager backed by a directory
//! cache. The dialer side produces a `rustls::ClientConfig` for connecting
//! to backends, with optional mutual TLS, an optional extra root-CA pool and
//! an optional verification bypass.

use std::{fs::File, io::BufReader, sync::Arc};

use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{aws_lc_rs, CryptoProvider},
    pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime},
    version::{TLS12, TLS13},
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
    SupportedProtocolVersion,
};
use rustls_acme::{caches::DirCache, AcmeConfig as AcmeManager, AcmeState};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::models::{AcmeConfig, BackendsTlsConfig, TlsListenerConfig};

/// Event stream of the ACME certificate manager; must be driven while the
/// listener is running
pub type AcmeEvents = AcmeState<std::io::Error, std::io::Error>;

/// Errors raised while materializing TLS settings
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TlsError {
    #[error("Failed to read {path}: {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    #[error("No certificates found in {0}")]
    NoCertificates(String),

    #[error("No private key found in {0}")]
    NoPrivateKey(String),

    #[error("Unsupported TLS version '{0}' (supported: tls1.2, tls1.3)")]
    UnsupportedVersion(String),

    #[error("TLS setup error: {0}")]
    Setup(#[from] rustls::Error),
}

/// Build a terminator config from a static certificate/key pair.
pub fn terminator_from_files(
    cfg: &TlsListenerConfig,
) -> Result<rustls::ServerConfig, TlsError> {
    let certs = load_certs(&cfg.cert_path)?;
    let key = load_private_key(&cfg.key_path)?;

    let mut config = rustls::ServerConfig::builder_with_provider(provider_with_ciphers(
        &cfg.ciphers,
    ))
    .with_protocol_versions(&protocol_versions(
        cfg.min_version.as_deref(),
        cfg.max_version.as_deref(),
    )?)?
    .with_no_client_auth()
    .with_single_cert(certs, key)?;

    apply_session_tickets(&mut config, cfg.session_tickets)?;
    note_cipher_order_preference(cfg.prefer_server_ciphers);

    Ok(config)
}

/// Build a terminator config backed by an ACME certificate manager.
///
/// Certificates are requested for the configured host whitelist and cached
/// in `cache_dir`. When a static `[tls]` section is also present, its
/// cipher/version/ticket settings apply. The returned [`AcmeEvents`] stream
/// must be polled for the manager to make progress.
pub fn terminator_from_acme(
    acme: &AcmeConfig,
    tls: Option<&TlsListenerConfig>,
) -> Result<(rustls::ServerConfig, AcmeEvents), TlsError> {
    let state = AcmeManager::new(acme.hosts.clone())
        .cache_option(Some(DirCache::new(acme.cache_dir.clone())))
        .directory_lets_encrypt(true)
        .state();
    let resolver = state.resolver();

    let ciphers = tls.map(|t| t.ciphers.as_slice()).unwrap_or(&[]);
    let (min_version, max_version) = match tls {
        Some(t) => (t.min_version.as_deref(), t.max_version.as_deref()),
        None => (None, None),
    };

    let mut config = rustls::ServerConfig::builder_with_provider(provider_with_ciphers(ciphers))
        .with_protocol_versions(&protocol_versions(min_version, max_version)?)?
        .with_no_client_auth()
        .with_cert_resolver(resolver);

    apply_session_tickets(&mut config, tls.map(|t| t.session_tickets).unwrap_or(true))?;
    if let Some(tls) = tls {
        note_cipher_order_preference(tls.prefer_server_ciphers);
    }

    Ok((config, state))
}

/// Build the dialer config for backend TLS connections.
///
/// A missing root-CA file fails construction; a file that parses to nothing
/// logs a warning and proceeds with the bundled roots only.
pub fn dialer_from_config(cfg: &BackendsTlsConfig) -> Result<ClientConfig, TlsError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = &cfg.root_ca_cert_path {
        let file = File::open(path).map_err(|source| TlsError::ReadFile {
            path: path.clone(),
            source,
        })?;
        let mut reader = BufReader::new(file);

        let mut added = 0usize;
        for cert in rustls_pemfile::certs(&mut reader) {
            match cert {
                Ok(cert) => {
                    if roots.add(cert).is_ok() {
                        added += 1;
                    }
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "Unable to parse root CA PEM");
                    break;
                }
            }
        }
        if added == 0 {
            warn!(path = %path, "Root CA file contained no usable certificates");
        }
    }

    let builder = ClientConfig::builder_with_provider(provider_with_ciphers(&cfg.ciphers))
        .with_protocol_versions(&protocol_versions(
            cfg.min_version.as_deref(),
            cfg.max_version.as_deref(),
        )?)?
        .with_root_certificates(roots);

    let mut config = match (&cfg.cert_path, &cfg.key_path) {
        (Some(cert_path), Some(key_path)) => {
            builder.with_client_auth_cert(load_certs(cert_path)?, load_private_key(key_path)?)?
        }
        _ => builder.with_no_client_auth(),
    };

    if cfg.ignore_verify {
        warn!("Backend certificate verification disabled");
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(InsecureVerifier));
    }

    Ok(config)
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::ReadFile {
        path: path.to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .map_err(|source| TlsError::ReadFile {
            path: path.to_string(),
            source,
        })?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_string()));
    }
    Ok(certs)
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::ReadFile {
        path: path.to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::ReadFile {
            path: path.to_string(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_string()))
}

/// Clone the default provider, keeping only the configured cipher suites.
///
/// Names are matched case-insensitively against the rustls suite
/// identifiers (e.g. "TLS13_AES_256_GCM_SHA384",
/// "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256"). An empty list keeps the
/// provider defaults; a list matching nothing falls back to the defaults
/// with a warning.
fn provider_with_ciphers(names: &[String]) -> Arc<CryptoProvider> {
    let mut provider = aws_lc_rs::default_provider();
    if names.is_empty() {
        return Arc::new(provider);
    }

    let wanted: Vec<String> = names.iter().map(|n| n.to_ascii_uppercase()).collect();
    provider
        .cipher_suites
        .retain(|suite| wanted.contains(&format!("{:?}", suite.suite())));

    if provider.cipher_suites.is_empty() {
        warn!(configured = ?names, "No configured cipher suite is supported; using defaults");
        provider = aws_lc_rs::default_provider();
    }
    Arc::new(provider)
}

fn protocol_versions(
    min: Option<&str>,
    max: Option<&str>,
) -> Result<Vec<&'static SupportedProtocolVersion>, TlsError> {
    let min = min.map(version_rank).transpose()?.unwrap_or(2);
    let max = max.map(version_rank).transpose()?.unwrap_or(3);

    let versions: Vec<&'static SupportedProtocolVersion> = [(&TLS12, 2), (&TLS13, 3)]
        .into_iter()
        .filter(|(_, rank)| (min..=max).contains(rank))
        .map(|(version, _)| version)
        .collect();

    if versions.is_empty() {
        return Err(TlsError::UnsupportedVersion(format!(
            "min/max leave no enabled version (min rank {min}, max rank {max})"
        )));
    }
    Ok(versions)
}

fn version_rank(name: &str) -> Result<u8, TlsError> {
    match name.to_ascii_lowercase().replace('_', ".").as_str() {
        "tls1.2" | "tls12" | "1.2" => Ok(2),
        "tls1.3" | "tls13" | "1.3" => Ok(3),
        other => Err(TlsError::UnsupportedVersion(other.to_string())),
    }
}

fn apply_session_tickets(
    config: &mut rustls::ServerConfig,
    enabled: bool,
) -> Result<(), TlsError> {
    if enabled {
        config.ticketer = aws_lc_rs::Ticketer::new()?;
    } else {
        config.send_tls13_tickets = 0;
    }
    Ok(())
}

fn note_cipher_order_preference(prefer_server_ciphers: bool) {
    if !prefer_server_ciphers {
        // rustls always applies the server-side suite order; the flag is
        // accepted for config compatibility.
        debug!("prefer_server_ciphers = false has no effect with rustls");
    }
}

/// Verifier that accepts any backend certificate (ignore_verify = true)
#[derive(Debug)]
struct InsecureVerifier;

impl ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
