//! PEM/DER codec for keys and certificates returned by the signing service
//!
//! - `key`: private and public key handles
//! - `certificate`: X.509 certificate handle and name extraction

pub mod certificate;
pub mod key;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

pub use certificate::{Certificate, SubjectName};
pub use key::{KeyFormat, PrivateKey, PublicKey};

/// Codec failures
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// No private key block found
    #[error("No private key in PEM data")]
    MissingKey,
    /// No certificate block found
    #[error("No certificate in PEM data")]
    MissingCertificate,
    /// PEM framing or encoding was invalid
    #[error("PEM decoding failed: {0}")]
    Pem(String),
    /// Certificate DER did not parse as X.509
    #[error("X.509 parsing failed: {0}")]
    X509(String),
    /// Re-encoding to DER failed
    #[error("DER encoding failed: {0}")]
    Der(String),
    /// Writing key material to disk failed
    #[error("Failed to write key: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse the first private key in `pem`
pub fn parse_key(pem: &str) -> Result<PrivateKey, CodecError> {
    PrivateKey::from_pem(pem)
}

/// Parse the first certificate in `pem`
pub fn parse_certificate(pem: &str) -> Result<Certificate, CodecError> {
    Certificate::from_pem(pem)
}

/// Public key carried by `certificate`
pub fn derive_public_key(certificate: &Certificate) -> Result<PublicKey, CodecError> {
    certificate.public_key()
}

/// Write `key` to `path` as unencrypted PEM, readable by the owner only
///
/// An existing file is truncated; its permissions are tightened first.
pub fn save_key_unencrypted(key: &PrivateKey, path: &Path) -> Result<(), CodecError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(0o600);
        if path.exists() {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
    }

    let mut file = options.open(path)?;
    file.write_all(key.to_unencrypted_pem().as_bytes())?;
    file.sync_all()?;
    Ok(())
}
