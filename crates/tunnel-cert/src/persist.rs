//! On-disk persistence for the auto-generated self-signed certificate
//! (spec §4.9): written next to the Relay binary on first QUIC startup and
//! reused across restarts so the Agent isn't handed a new certificate (and
//! forced to re-pin trust) every time the Relay is restarted.
//!
//! Grounded on `tunnel-cert/src/storage.rs`'s expiry bookkeeping, adapted
//! from an in-memory `CertificateStore` to a two-file PEM pair on disk —
//! this crate has no database behind it, only a filesystem path supplied on
//! the command line.

use std::path::Path;
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tracing::{debug, info};

use crate::self_signed::{generate_self_signed_cert, SelfSignedCertificate, SelfSignedError};

/// Certificates are regenerated once they're within this margin of their
/// 90-day validity window, mirroring `StoredCertificate::needs_renewal`'s
/// 30-day-before-expiry threshold.
const RENEWAL_MARGIN: Duration = Duration::from_secs(30 * 24 * 60 * 60);
const VALIDITY: Duration = Duration::from_secs(90 * 24 * 60 * 60);

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("certificate generation failed: {0}")]
    Generation(#[from] SelfSignedError),
    #[error("io error reading/writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Loads a previously persisted certificate from `cert_path`/`key_path` if
/// both exist and are still within their renewal margin; otherwise
/// generates a fresh one and writes it to those paths.
pub fn load_or_generate(cert_path: &Path, key_path: &Path) -> Result<SelfSignedCertificate, PersistError> {
    if let Some(cert) = try_load_fresh(cert_path, key_path)? {
        debug!(?cert_path, "reusing persisted certificate");
        return Ok(cert);
    }

    info!(?cert_path, ?key_path, "generating a new self-signed certificate");
    let cert = generate_self_signed_cert()?;
    cert.save_to_files(
        cert_path.to_str().expect("cert path must be valid UTF-8"),
        key_path.to_str().expect("key path must be valid UTF-8"),
    )
    .map_err(|e| PersistError::Io {
        path: cert_path.display().to_string(),
        source: e,
    })?;
    Ok(cert)
}

fn try_load_fresh(cert_path: &Path, key_path: &Path) -> Result<Option<SelfSignedCertificate>, PersistError> {
    if !cert_path.exists() || !key_path.exists() {
        return Ok(None);
    }

    let age = match std::fs::metadata(cert_path).and_then(|m| m.modified()) {
        Ok(modified) => SystemTime::now().duration_since(modified).unwrap_or(Duration::MAX),
        Err(_) => return Ok(None),
    };

    if age >= VALIDITY.saturating_sub(RENEWAL_MARGIN) {
        return Ok(None);
    }

    let pem_cert = std::fs::read_to_string(cert_path).map_err(|e| PersistError::Io {
        path: cert_path.display().to_string(),
        source: e,
    })?;
    let pem_key = std::fs::read_to_string(key_path).map_err(|e| PersistError::Io {
        path: key_path.display().to_string(),
        source: e,
    })?;

    match crate::self_signed::parse_pem_pair(&pem_cert, &pem_key) {
        Ok(cert) => Ok(Some(cert)),
        Err(_) => Ok(None),
    }
}
