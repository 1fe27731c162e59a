//! CA operations orchestrated over an ephemeral signing service
//!
//! Every operation runs the same sequence: stage secrets, start the service,
//! make one request, stop the service, release staged material, then decode
//! the response or fail. Stopping and releasing happen on every exit path.

pub mod requests;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use base64::Engine;
use ephca_common::{log_security_event, LoggingTransformer, SecurityEvent};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::client::{
    ServiceResponse, SigningServiceClient, GEN_CRL_ENDPOINT, INIT_CA_ENDPOINT, NEW_CERT_ENDPOINT,
};
use crate::codec::{derive_public_key, parse_certificate, parse_key, Certificate, PrivateKey, PublicKey};
use crate::config::CaConfig;
use crate::error::{CaError, Result};
use crate::mount::{DirectoryMount, SecretMount};
use crate::process::{ServiceArgs, SigningServiceProcess};
use crate::staging::SecretStage;

pub use requests::{
    crl_distribution_url, local_fqdn, CertificateRequest, CrlRequest, NewCertRequest,
    SigningPolicy,
};
use requests::KeyAndCertificate;

/// File name of the staged CA private key
pub const CA_KEY_FILE: &str = "ca-key.pem";
/// File name of the staged signing configuration document
pub const SIGNING_CONFIG_FILE: &str = "cfsslconfig.yml";

/// Freshly created CA material
///
/// `private_key_pem` is kept verbatim so later operations can stage it.
pub struct CaCertificateBundle {
    /// CA private key as PEM, as returned by the service
    pub private_key_pem: Zeroizing<String>,
    /// Self-signed CA certificate
    pub certificate: Certificate,
    /// Parsed CA private key
    pub private_key: PrivateKey,
    /// Public key taken from the certificate
    pub public_key: PublicKey,
}

impl std::fmt::Debug for CaCertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaCertificateBundle")
            .field("subject", &self.certificate.subject())
            .field("private_key", &self.private_key)
            .field("public_key", &self.public_key.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Leaf certificate and its private key
#[derive(Debug)]
pub struct SignedCertificate {
    /// Leaf certificate signed by the CA
    pub certificate: Certificate,
    /// Private key generated for the leaf
    pub private_key: PrivateKey,
}

/// Certificate authority backed by an on-demand signing-service process
///
/// Operations are serialized on the owned process, so at most one service
/// instance runs per authority.
pub struct CertificateAuthority<M: SecretMount = DirectoryMount> {
    config: Arc<CaConfig>,
    client: SigningServiceClient,
    process: Mutex<SigningServiceProcess>,
    mount: M,
}

impl CertificateAuthority<DirectoryMount> {
    /// Authority staging secrets under `secrets.mount_dir`
    pub fn new(config: CaConfig) -> Result<Self> {
        let mount = DirectoryMount::new(config.secrets.mount_dir.clone());
        Self::with_mount(config, mount)
    }
}

impl<M: SecretMount> CertificateAuthority<M> {
    /// Authority staging secrets on `mount`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn with_mount(config: impl Into<Arc<CaConfig>>, mount: M) -> Result<Self> {
        let config = config.into();
        let client = SigningServiceClient::new(&config.service, &config.client)?;
        let process = Mutex::new(SigningServiceProcess::new(config.service.clone()));
        Ok(Self {
            config,
            client,
            process,
            mount,
        })
    }

    /// Configuration the authority runs with
    pub fn config(&self) -> &CaConfig {
        &self.config
    }

    /// Create a new self-signed CA
    ///
    /// # Errors
    ///
    /// `CaInitializationFailed` when the service reports failure, or any
    /// process, transport or codec error.
    pub async fn initialize_ca(&self) -> Result<CaCertificateBundle> {
        let started = Instant::now();
        let request = CertificateRequest::for_ca(&self.config.ca);
        info!("Creating CA {}", request.common_name);

        let response = {
            let mut process = self.process.lock().await;
            self.exchange(&mut process, &ServiceArgs::none(), INIT_CA_ENDPOINT, &request)
                .await?
        };

        if !response.success {
            error!("Unable to create CA");
            LoggingTransformer::log_ca_operation("initialize_ca", &request.common_name, false);
            return Err(CaError::CaInitializationFailed {
                errors: response.errors,
            });
        }

        let result: KeyAndCertificate = response.decode_result(INIT_CA_ENDPOINT)?;
        let private_key_pem = result.private_key;
        let private_key = parse_key(&private_key_pem)?;
        let certificate = parse_certificate(&result.certificate)?;
        let public_key = derive_public_key(&certificate)?;

        log_security_event(
            SecurityEvent::CaInitialized,
            &format!(
                "{} key {} in {:?}",
                request.common_name,
                private_key.fingerprint(),
                started.elapsed()
            ),
            true,
        );
        LoggingTransformer::log_ca_operation("initialize_ca", &request.common_name, true);
        Ok(CaCertificateBundle {
            private_key_pem,
            certificate,
            private_key,
            public_key,
        })
    }

    /// Sign a new leaf certificate for `subject`
    ///
    /// The service assigns the certificate serial itself; `serial_number`
    /// is only recorded in the log.
    ///
    /// # Errors
    ///
    /// `CertificateIssuanceFailed` when the service reports failure, or any
    /// staging, process, transport or codec error.
    pub async fn issue_certificate(
        &self,
        ca_certificate: &Certificate,
        ca_private_key: &PrivateKey,
        subject: &str,
        serial_number: u64,
    ) -> Result<SignedCertificate> {
        let request = NewCertRequest {
            request: CertificateRequest::for_subject(&self.config.ca, subject),
        };
        let crl_url = self.resolve_crl_url().await?;
        let policy = Zeroizing::new(serde_json::to_vec(&SigningPolicy::with_crl_url(&crl_url))?);
        debug!(
            "Issuing {subject} (requested serial {serial_number}) under {:?}, CRL at {crl_url}",
            ca_certificate.subject().common_name()
        );

        let response = self
            .staged_exchange(NEW_CERT_ENDPOINT, &request, |stage| {
                stage_signing_material(
                    stage,
                    ca_private_key,
                    &policy,
                    &self.config.service.ca_certificate,
                )
            })
            .await?;

        if !response.success {
            error!("Unable to create cert for {subject}");
            LoggingTransformer::log_ca_operation("issue_certificate", subject, false);
            return Err(CaError::CertificateIssuanceFailed {
                subject: subject.to_string(),
                errors: response.errors,
            });
        }

        let result: KeyAndCertificate = response.decode_result(NEW_CERT_ENDPOINT)?;
        let private_key = parse_key(&result.private_key)?;
        let certificate = parse_certificate(&result.certificate)?;

        log_security_event(
            SecurityEvent::CertificateIssued,
            &format!("{subject} serial {}", hex::encode(certificate.serial_number())),
            true,
        );
        LoggingTransformer::log_ca_operation("issue_certificate", subject, true);
        Ok(SignedCertificate {
            certificate,
            private_key,
        })
    }

    /// Produce a DER-encoded CRL revoking `certificate_serials`
    ///
    /// # Errors
    ///
    /// `CrlGenerationFailed` when the service reports failure, `Base64` when
    /// the returned payload does not decode, or any staging, process or
    /// transport error.
    pub async fn generate_crl(
        &self,
        certificate_serials: &[u64],
        certificate_pem: &str,
        ca_private_key_pem: &str,
    ) -> Result<Vec<u8>> {
        self.generate_crl_for(CrlRequest::new(
            certificate_serials.to_vec(),
            certificate_pem,
            ca_private_key_pem,
        ))
        .await
    }

    /// [`generate_crl`](Self::generate_crl) with a caller-built request
    pub async fn generate_crl_for(&self, request: CrlRequest) -> Result<Vec<u8>> {
        debug!("Generating CRL for serials {:?}", request.certificate_serials);

        let response = self
            .staged_exchange(GEN_CRL_ENDPOINT, &request, |stage| {
                let key = stage.stage_file(CA_KEY_FILE, request.issuing_key_pem.as_bytes())?;
                Ok(ServiceArgs::none().signing_ca(key.path(), &self.config.service.ca_certificate))
            })
            .await?;

        let subject = format!("serials {:?}", request.certificate_serials);
        if !response.success {
            error!("Unable to create crl for cert serials {:?}", request.certificate_serials);
            LoggingTransformer::log_ca_operation("generate_crl", &subject, false);
            return Err(CaError::CrlGenerationFailed {
                serials: request.certificate_serials,
                errors: response.errors,
            });
        }

        let encoded: String = response.decode_result(GEN_CRL_ENDPOINT)?;
        let crl = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;

        log_security_event(
            SecurityEvent::CrlGenerated,
            &format!("{subject}, {} bytes", crl.len()),
            true,
        );
        LoggingTransformer::log_ca_operation("generate_crl", &subject, true);
        Ok(crl)
    }

    /// CRL distribution URL for new leaves, resolved off the async workers
    async fn resolve_crl_url(&self) -> Result<String> {
        let config = Arc::clone(&self.config);
        tokio::task::spawn_blocking(move || crl_distribution_url(&config.ca))
            .await
            .map_err(|e| CaError::Config(format!("CRL distribution URL lookup failed: {e}")))
    }

    /// Stage secrets, then run one service session with them
    ///
    /// The service is only launched once `stage_with` has staged everything.
    /// Staged files are released on every path, including a failure halfway
    /// through staging.
    async fn staged_exchange<B, F>(
        &self,
        endpoint: &str,
        body: &B,
        stage_with: F,
    ) -> Result<ServiceResponse>
    where
        B: Serialize + ?Sized,
        F: FnOnce(&mut SecretStage) -> Result<ServiceArgs>,
    {
        let mut process = self.process.lock().await;
        let mut stage = SecretStage::create(&self.mount.mount()?)?;
        let outcome = match stage_with(&mut stage) {
            Ok(args) => self.exchange(&mut process, &args, endpoint, body).await,
            Err(e) => Err(e),
        };
        finish(outcome, stage.release())
    }

    /// One service session: start, post once, stop
    ///
    /// The service is stopped whether or not the request succeeded.
    async fn exchange<B>(
        &self,
        process: &mut SigningServiceProcess,
        args: &ServiceArgs,
        endpoint: &str,
        body: &B,
    ) -> Result<ServiceResponse>
    where
        B: Serialize + ?Sized,
    {
        let service = process.start(args).await?;
        let response = self.client.post(endpoint, body).await;
        service.stop().await;
        response
    }
}

fn stage_signing_material(
    stage: &mut SecretStage,
    ca_private_key: &PrivateKey,
    policy: &[u8],
    ca_certificate: &Path,
) -> Result<ServiceArgs> {
    let key = stage.stage_file(CA_KEY_FILE, ca_private_key.to_unencrypted_pem().as_bytes())?;
    let config = stage.stage_file(SIGNING_CONFIG_FILE, policy)?;
    Ok(ServiceArgs::none()
        .config_file(config.path())
        .signing_ca(key.path(), ca_certificate))
}

/// Combine the operation outcome with the release of its staged secrets
///
/// An operation error wins over a release error; a release error alone
/// still fails the operation since a secret may be left on disk.
fn finish<T>(outcome: Result<T>, released: Result<()>) -> Result<T> {
    match (outcome, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release_error)) => {
            warn!("Releasing staged secrets also failed: {release_error}");
            Err(e)
        }
        (Ok(_), Err(release_error)) => Err(release_error),
    }
}
