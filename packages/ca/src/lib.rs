//! Local certificate authority driven through an ephemeral signing service
//!
//! [`CertificateAuthority`] creates a CA, issues leaf certificates and
//! produces CRLs by launching a cfssl-compatible `serve` process for each
//! operation. The CA key is staged on a secret mount only for the length of
//! that one request; the process is killed and the staged files scrubbed
//! before the answer is decoded.
//!
//! - [`process`]: subprocess lifecycle and readiness detection
//! - [`client`]: HTTP client with retry while the service comes up
//! - [`staging`] and [`mount`]: secret file staging
//! - [`codec`]: PEM and X.509 handling of the returned material
//! - [`cli`]: the `ephca` command line

pub mod authority;
pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod mount;
pub mod process;
pub mod staging;

// Re-export the public API
pub use authority::{CaCertificateBundle, CertificateAuthority, CrlRequest, SignedCertificate};
pub use client::{ServiceMessage, ServiceResponse, SigningServiceClient};
pub use codec::{save_key_unencrypted, Certificate, CodecError, PrivateKey, PublicKey, SubjectName};
pub use config::CaConfig;
pub use error::{CaError, Result};
pub use mount::{DirectoryMount, SecretMount};
pub use process::{RunningService, ServiceArgs, SigningServiceProcess};
pub use staging::{SecretStage, StagedSecretFile};
