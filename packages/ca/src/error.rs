//! Error types for CA orchestration

use std::path::PathBuf;
use std::time::Duration;

use crate::client::ServiceMessage;
use crate::codec::CodecError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, CaError>;

/// Every failure a CA operation can surface
///
/// Cleanup of the signing-service process and staged secrets has already
/// happened by the time one of these reaches the caller.
#[derive(Debug, thiserror::Error)]
pub enum CaError {
    /// Every connection attempt was refused
    #[error("Signing service unavailable at {endpoint} after {attempts} attempts: {source}")]
    ServiceUnavailable {
        /// Endpoint being called
        endpoint: String,
        /// Attempts made before giving up
        attempts: u32,
        /// Last connection error
        #[source]
        source: reqwest::Error,
    },
    /// The service answered with a status other than 200
    #[error("Unable to issue signing service command {endpoint} (status {status}): {body}")]
    ServiceError {
        /// Endpoint being called
        endpoint: String,
        /// HTTP status code
        status: u16,
        /// Response body as text
        body: String,
    },
    /// Transport failure other than a refused connection
    #[error("Signing service request {endpoint} failed: {source}")]
    Request {
        /// Endpoint being called
        endpoint: String,
        /// Underlying HTTP error
        #[source]
        source: reqwest::Error,
    },
    /// The response body did not have the expected shape
    #[error("Malformed response from {endpoint}: {reason}")]
    MalformedResponse {
        /// Endpoint that answered
        endpoint: String,
        /// Decoder message
        reason: String,
    },
    /// The service binary could not be spawned or exited before readiness
    #[error("Unable to launch {program}: {reason}")]
    ProcessLaunchFailed {
        /// Configured program
        program: String,
        /// Spawn error or exit status
        reason: String,
    },
    /// No readiness marker within the startup timeout
    #[error("{program} did not report readiness within {timeout:?}")]
    StartupTimedOut {
        /// Configured program
        program: String,
        /// Bound that expired
        timeout: Duration,
    },
    /// The service refused to create the CA
    #[error("Unable to create CA: {}", format_messages(.errors))]
    CaInitializationFailed {
        /// Errors reported by the service
        errors: Vec<ServiceMessage>,
    },
    /// The service refused to sign a leaf
    #[error("Unable to create cert for {subject}: {}", format_messages(.errors))]
    CertificateIssuanceFailed {
        /// Requested subject
        subject: String,
        /// Errors reported by the service
        errors: Vec<ServiceMessage>,
    },
    /// The service refused to produce a CRL
    #[error("Unable to create crl for cert serials {serials:?}: {}", format_messages(.errors))]
    CrlGenerationFailed {
        /// Serials that were to be revoked
        serials: Vec<u64>,
        /// Errors reported by the service
        errors: Vec<ServiceMessage>,
    },
    /// Writing or scrubbing a staged secret failed
    #[error("Secret staging failed for {}: {source}", .path.display())]
    Staging {
        /// File or directory involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// The secret mount could not be prepared
    #[error("Secret mount unavailable at {}: {reason}", .path.display())]
    Mount {
        /// Mount directory
        path: PathBuf,
        /// What went wrong
        reason: String,
    },
    /// Key or certificate material did not decode
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),
    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The CRL payload was not valid base64
    #[error("Invalid base64 CRL payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl CaError {
    pub(crate) fn staging(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Staging {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(endpoint: &str, reason: impl std::fmt::Display) -> Self {
        Self::MalformedResponse {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }
}

fn format_messages(errors: &[ServiceMessage]) -> String {
    if errors.is_empty() {
        return "no error detail reported".to_string();
    }
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
