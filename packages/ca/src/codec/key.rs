//! Private and public key handles

use std::fmt;

use ephca_common::LoggingTransformer;
use pem::{EncodeConfig, LineEnding, Pem};
use rustls_pki_types::PrivateKeyDer;
use zeroize::Zeroizing;

use super::CodecError;

/// Container format of a private key
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyFormat {
    /// `RSA PRIVATE KEY`
    Pkcs1,
    /// `EC PRIVATE KEY`
    Sec1,
    /// `PRIVATE KEY`
    Pkcs8,
}

impl KeyFormat {
    /// PEM block label for this format
    pub fn pem_label(self) -> &'static str {
        match self {
            Self::Pkcs1 => "RSA PRIVATE KEY",
            Self::Sec1 => "EC PRIVATE KEY",
            Self::Pkcs8 => "PRIVATE KEY",
        }
    }
}

/// Unencrypted private key; the DER bytes are zeroized on drop
#[derive(Clone)]
pub struct PrivateKey {
    format: KeyFormat,
    der: Zeroizing<Vec<u8>>,
}

impl PrivateKey {
    /// Parse the first PKCS#1, SEC1 or PKCS#8 key in `pem`
    pub fn from_pem(pem: &str) -> Result<Self, CodecError> {
        let mut reader = pem.as_bytes();
        let key = rustls_pemfile::private_key(&mut reader)
            .map_err(|e| CodecError::Pem(e.to_string()))?
            .ok_or(CodecError::MissingKey)?;

        let (format, der) = match &key {
            PrivateKeyDer::Pkcs1(k) => (KeyFormat::Pkcs1, k.secret_pkcs1_der()),
            PrivateKeyDer::Sec1(k) => (KeyFormat::Sec1, k.secret_sec1_der()),
            PrivateKeyDer::Pkcs8(k) => (KeyFormat::Pkcs8, k.secret_pkcs8_der()),
            _ => return Err(CodecError::Pem("unsupported private key encoding".to_string())),
        };

        Ok(Self {
            format,
            der: Zeroizing::new(der.to_vec()),
        })
    }

    /// Container format the key was parsed from
    pub fn format(&self) -> KeyFormat {
        self.format
    }

    /// Raw DER key bytes
    pub fn secret_der(&self) -> &[u8] {
        &self.der
    }

    /// Re-encode as an unencrypted PEM block under the original label
    pub fn to_unencrypted_pem(&self) -> Zeroizing<String> {
        let block = Pem::new(self.format.pem_label(), self.der.to_vec());
        Zeroizing::new(pem::encode_config(
            &block,
            EncodeConfig::new().set_line_ending(LineEnding::LF),
        ))
    }

    /// Log-safe identifier of this key
    pub fn fingerprint(&self) -> String {
        LoggingTransformer::fingerprint(&self.der)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("format", &self.format)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// DER-encoded SubjectPublicKeyInfo
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    spki_der: Vec<u8>,
}

impl PublicKey {
    pub(crate) fn from_spki_der(spki_der: Vec<u8>) -> Self {
        Self { spki_der }
    }

    /// SubjectPublicKeyInfo DER
    pub fn der(&self) -> &[u8] {
        &self.spki_der
    }

    /// `PUBLIC KEY` PEM block
    pub fn to_pem(&self) -> String {
        pem::encode_config(
            &Pem::new("PUBLIC KEY", self.spki_der.clone()),
            EncodeConfig::new().set_line_ending(LineEnding::LF),
        )
    }

    /// Log-safe identifier of this key
    pub fn fingerprint(&self) -> String {
        LoggingTransformer::fingerprint(&self.spki_der)
    }
}
