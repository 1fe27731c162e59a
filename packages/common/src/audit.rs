//! Security event audit logging

use log::{info, warn};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Security-relevant events emitted while orchestrating the signing service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    /// Plaintext secret written to the secret mount
    SecretStaged,
    /// Plaintext secret overwritten and unlinked
    SecretScrubbed,
    /// Signing-service subprocess launched and ready
    ServiceStarted,
    /// Signing-service subprocess terminated
    ServiceStopped,
    /// CA certificate created
    CaInitialized,
    /// Leaf certificate signed
    CertificateIssued,
    /// Revocation list produced
    CrlGenerated,
}

impl SecurityEvent {
    /// Stable identifier used in the log line
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SecretStaged => "SECRET_STAGED",
            Self::SecretScrubbed => "SECRET_SCRUBBED",
            Self::ServiceStarted => "SERVICE_STARTED",
            Self::ServiceStopped => "SERVICE_STOPPED",
            Self::CaInitialized => "CA_INITIALIZED",
            Self::CertificateIssued => "CERTIFICATE_ISSUED",
            Self::CrlGenerated => "CRL_GENERATED",
        }
    }
}

impl fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logs a security-relevant event with standardized formatting
///
/// # Parameters
/// * `event` - Type of security event
/// * `details` - Additional details about the event; never key material
/// * `success` - Whether the operation was successful
pub fn log_security_event(event: SecurityEvent, details: &str, success: bool) {
    let line = format_event(event, details, success);
    if success {
        info!("{line}");
    } else {
        warn!("{line}");
    }
}

fn format_event(event: SecurityEvent, details: &str, success: bool) -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let status = if success { "SUCCESS" } else { "FAILURE" };
    format!("[{timestamp}] {status} - {event}: {details}")
}
