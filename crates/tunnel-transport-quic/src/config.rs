//! QUIC transport configuration (spec §4.9).
//!
//! Grounded on `localup-transport-quic/src/config.rs`'s `QuicConfig`
//! (client/server config builders over quinn + rustls, persistent
//! self-signed certificate helper), retargeted to this system's fixed wire
//! requirements: ALPN `frp-quic`, a minimum 300s idle timeout, a 256 MiB
//! per-stream flow window, and a 1 GiB connection-level window.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub const ALPN: &[u8] = b"frp-quic";
pub const MIN_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
pub const STREAM_RECEIVE_WINDOW: u32 = 256 * 1024 * 1024;
pub const CONNECTION_RECEIVE_WINDOW: u32 = 1024 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum QuicConfigError {
    #[error("idle timeout must be at least {min:?}, got {got:?}")]
    IdleTimeoutTooShort { min: Duration, got: Duration },
    #[error("certificate error: {0}")]
    Cert(#[from] tunnel_cert::PersistError),
    #[error("rustls configuration error: {0}")]
    Rustls(#[from] rustls::Error),
    #[error("invalid idle timeout: {0}")]
    InvalidIdleTimeout(#[from] quinn::VarIntBoundsExceeded),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct QuicConfig {
    pub idle_timeout: Duration,
    pub keep_alive_interval: Duration,
}

impl Default for QuicConfig {
    fn default() -> Self {
        Self {
            idle_timeout: MIN_IDLE_TIMEOUT,
            keep_alive_interval: Duration::from_secs(15),
        }
    }
}

impl QuicConfig {
    pub fn validate(&self) -> Result<(), QuicConfigError> {
        if self.idle_timeout < MIN_IDLE_TIMEOUT {
            return Err(QuicConfigError::IdleTimeoutTooShort {
                min: MIN_IDLE_TIMEOUT,
                got: self.idle_timeout,
            });
        }
        Ok(())
    }

    fn transport_config(&self) -> Result<quinn::TransportConfig, QuicConfigError> {
        let mut transport = quinn::TransportConfig::default();
        transport.max_idle_timeout(Some(self.idle_timeout.try_into()?));
        transport.keep_alive_interval(Some(self.keep_alive_interval));
        transport.stream_receive_window(STREAM_RECEIVE_WINDOW.into());
        transport.receive_window(CONNECTION_RECEIVE_WINDOW.into());
        Ok(transport)
    }

    /// Builds a server endpoint config, generating (or reusing) a
    /// self-signed certificate at `cert_path`/`key_path`.
    pub fn server_config(&self, cert_path: &PathBuf, key_path: &PathBuf) -> Result<quinn::ServerConfig, QuicConfigError> {
        self.validate()?;

        let cert = tunnel_cert::load_or_generate(cert_path, key_path)?;

        let mut crypto = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert.cert_der], cert.key_der)?;
        crypto.alpn_protocols = vec![ALPN.to_vec()];

        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(crypto)
                .expect("rustls provider supports TLS 1.3"),
        ));
        server_config.transport_config(Arc::new(self.transport_config()?));
        Ok(server_config)
    }

    /// Builds a client endpoint config that trusts only the Relay's
    /// self-signed certificate, read from `cert_path`. The Agent is handed
    /// this certificate out of band (it is not a public CA issuance, since
    /// ACME is out of scope per spec §1).
    pub fn client_config(&self, cert_path: &PathBuf) -> Result<quinn::ClientConfig, QuicConfigError> {
        self.validate()?;

        let pem = std::fs::read(cert_path).map_err(|e| {
            QuicConfigError::Cert(tunnel_cert::PersistError::Generation(
                tunnel_cert::SelfSignedError::GenerationFailed(e.to_string()),
            ))
        })?;
        let mut roots = rustls::RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
            let cert = cert.map_err(|e| {
                QuicConfigError::Cert(tunnel_cert::PersistError::Generation(
                    tunnel_cert::SelfSignedError::GenerationFailed(e.to_string()),
                ))
            })?;
            roots.add(cert).map_err(QuicConfigError::Rustls)?;
        }

        let mut crypto = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        crypto.alpn_protocols = vec![ALPN.to_vec()];

        let mut client_config = quinn::ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
                .expect("rustls provider supports TLS 1.3"),
        ));
        client_config.transport_config(Arc::new(self.transport_config()?));
        Ok(client_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes_validation() {
        assert!(QuicConfig::default().validate().is_ok());
    }

    #[test]
    fn idle_timeout_below_minimum_is_rejected() {
        let config = QuicConfig {
            idle_timeout: Duration::from_secs(10),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(QuicConfigError::IdleTimeoutTooShort { .. })
        ));
    }
}
