//! Configuration snapshot for the CA and its signing service
//!
//! Loaded once from TOML and shared read-only by every operation.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CaError, Result};

/// Port the CRL is served on when the distribution URL is synthesized
pub const DEFAULT_CRL_PORT: u16 = 38080;

/// Complete configuration for one certificate authority
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CaConfig {
    /// `[ca]`: identity and CRL policy
    #[serde(default)]
    pub ca: AuthorityConfig,
    /// `[service]`: subprocess launch
    #[serde(default)]
    pub service: ServiceConfig,
    /// `[client]`: HTTP retry policy
    #[serde(default)]
    pub client: ClientConfig,
    /// `[secrets]`: staging location
    #[serde(default)]
    pub secrets: SecretsConfig,
}

impl CaConfig {
    /// Read and parse a TOML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CaError::Config(format!("Failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| CaError::Config(e.to_string()))
    }
}

/// Identity and policy of the CA itself
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorityConfig {
    /// CA common name
    #[serde(default = "default_ca_name")]
    pub name: String,
    /// Key algorithm requested from the service
    #[serde(default = "default_key_algorithm")]
    pub key_algorithm: String,
    /// Key size in bits
    #[serde(default = "default_key_size")]
    pub key_size: u32,
    /// Subject country
    #[serde(default = "default_country")]
    pub country: String,
    /// Subject locality
    #[serde(default = "default_locality")]
    pub locality: String,
    /// Subject organization
    #[serde(default = "default_organization")]
    pub organization: String,
    /// Subject organizational unit
    #[serde(default = "default_org_unit")]
    pub org_unit: String,
    /// Subject state or province
    #[serde(default = "default_state")]
    pub state: String,
    /// `"default"` or a literal CRL distribution URL
    #[serde(default = "default_crl_distribution")]
    pub crl_distribution: String,
    /// Port in the synthesized CRL URL
    #[serde(default = "default_crl_port")]
    pub crl_port: u16,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            name: default_ca_name(),
            key_algorithm: default_key_algorithm(),
            key_size: default_key_size(),
            country: default_country(),
            locality: default_locality(),
            organization: default_organization(),
            org_unit: default_org_unit(),
            state: default_state(),
            crl_distribution: default_crl_distribution(),
            crl_port: default_crl_port(),
        }
    }
}

fn default_ca_name() -> String {
    "Keylime Certificate Authority".to_string()
}

fn default_key_algorithm() -> String {
    "rsa".to_string()
}

fn default_key_size() -> u32 {
    2048
}

fn default_country() -> String {
    "US".to_string()
}

fn default_locality() -> String {
    "Lexington".to_string()
}

fn default_organization() -> String {
    "MITLL".to_string()
}

fn default_org_unit() -> String {
    "53".to_string()
}

fn default_state() -> String {
    "MA".to_string()
}

fn default_crl_distribution() -> String {
    "default".to_string()
}

fn default_crl_port() -> u16 {
    DEFAULT_CRL_PORT
}

/// How to launch and reach the signing-service subprocess
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service binary
    #[serde(default = "default_program")]
    pub program: PathBuf,
    /// Listen address, also used by the client
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port, also used by the client
    #[serde(default = "default_port")]
    pub port: u16,
    /// `-loglevel` passed to the service
    #[serde(default = "default_log_level")]
    pub log_level: u8,
    /// Text the service prints once it accepts connections
    #[serde(default = "default_readiness_marker")]
    pub readiness_marker: String,
    /// Bound on waiting for the readiness marker
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
    /// Pause after readiness before the first request
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Appended to the inherited `PATH`
    #[serde(default = "default_extra_search_path")]
    pub extra_search_path: String,
    /// CA certificate filename handed to `-ca`
    #[serde(default = "default_ca_certificate")]
    pub ca_certificate: PathBuf,
    /// Working directory of the service; relative paths resolve here
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl ServiceConfig {
    /// [`startup_timeout_ms`](Self::startup_timeout_ms) as a `Duration`
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// [`settle_delay_ms`](Self::settle_delay_ms) as a `Duration`
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            readiness_marker: default_readiness_marker(),
            startup_timeout_ms: default_startup_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            extra_search_path: default_extra_search_path(),
            ca_certificate: default_ca_certificate(),
            working_dir: None,
        }
    }
}

fn default_program() -> PathBuf {
    PathBuf::from("cfssl")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8888
}

fn default_log_level() -> u8 {
    1
}

fn default_readiness_marker() -> String {
    "Now listening on".to_string()
}

fn default_startup_timeout_ms() -> u64 {
    30_000
}

fn default_settle_delay_ms() -> u64 {
    200
}

fn default_extra_search_path() -> String {
    "/usr/local/bin".to_string()
}

fn default_ca_certificate() -> PathBuf {
    PathBuf::from("cacert.crt")
}

/// Retry and timeout policy of the HTTP client
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Connection attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Pause between refused attempts
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Per-attempt request timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl ClientConfig {
    /// Backoff as a `Duration`
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Request timeout as a `Duration`
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    10
}

fn default_retry_backoff_ms() -> u64 {
    50
}

fn default_request_timeout_ms() -> u64 {
    1000
}

/// Location of the secret-backed staging directory
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Directory secrets are staged under
    #[serde(default = "default_mount_dir")]
    pub mount_dir: PathBuf,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            mount_dir: default_mount_dir(),
        }
    }
}

fn default_mount_dir() -> PathBuf {
    PathBuf::from("/var/lib/ephca/secure")
}
