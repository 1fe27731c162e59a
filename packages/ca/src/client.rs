//! HTTP client for the signing-service API
//!
//! Stateless request/response wrapper with bounded retry while the service
//! is still coming up. Only connection-class failures are retried; a response
//! with any status other than 200 means the service is up and rejected the
//! request, so it fails immediately.

use std::fmt;
use std::time::{Duration, Instant};

use ephca_common::LoggingTransformer;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use zeroize::Zeroizing;

use crate::config::{ClientConfig, ServiceConfig};
use crate::error::{CaError, Result};

/// CA initialization endpoint
pub const INIT_CA_ENDPOINT: &str = "api/v1/cfssl/init_ca";
/// Leaf certificate endpoint
pub const NEW_CERT_ENDPOINT: &str = "api/v1/cfssl/newcert";
/// CRL generation endpoint
pub const GEN_CRL_ENDPOINT: &str = "api/v1/cfssl/gencrl";

/// One entry of the service's `errors` or `messages` list
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMessage {
    /// Numeric error or message code
    #[serde(default)]
    pub code: i64,
    /// Human-readable text
    #[serde(default)]
    pub message: String,
}

impl fmt::Display for ServiceMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Envelope every signing-service endpoint answers with
///
/// `result` is left undecoded; callers check `success` before trusting it.
#[derive(Clone, Debug, Deserialize)]
pub struct ServiceResponse {
    /// Whether the service carried out the request
    pub success: bool,
    /// Endpoint-specific payload
    #[serde(default)]
    pub result: serde_json::Value,
    /// Reasons for failure when `success` is false
    #[serde(default, deserialize_with = "null_as_empty")]
    pub errors: Vec<ServiceMessage>,
    /// Informational messages
    #[serde(default, deserialize_with = "null_as_empty")]
    pub messages: Vec<ServiceMessage>,
}

impl ServiceResponse {
    /// Decode `result` into an endpoint-specific type
    ///
    /// Strings in `result` are moved, not copied, into `T`, so a key
    /// decoded into a zeroizing field leaves no second plaintext copy.
    pub fn decode_result<T: serde::de::DeserializeOwned>(self, endpoint: &str) -> Result<T> {
        serde_json::from_value(self.result).map_err(|e| CaError::malformed(endpoint, e))
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<ServiceMessage>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<ServiceMessage>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Client for a signing service listening on `http://<host>:<port>/`
#[derive(Clone, Debug)]
pub struct SigningServiceClient {
    client: Client,
    base_url: String,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl SigningServiceClient {
    /// Build a client for the configured service address
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(service: &ServiceConfig, policy: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(policy.request_timeout())
            .user_agent(concat!("ephca/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CaError::Request {
                endpoint: "<client init>".to_string(),
                source: e,
            })?;

        Ok(Self {
            client,
            base_url: format!("http://{}:{}", service.host, service.port),
            max_attempts: policy.max_attempts.max(1),
            retry_backoff: policy.retry_backoff(),
        })
    }

    /// Full URL for an endpoint
    #[must_use]
    pub fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// POST `body` as JSON and decode the response envelope
    ///
    /// # Errors
    ///
    /// - `ServiceUnavailable` once every attempt was refused
    /// - `ServiceError` on any non-200 status, without retrying
    /// - `Request` on other transport failures such as timeouts
    /// - `MalformedResponse` when the body is not a response envelope
    pub async fn post<B>(&self, endpoint: &str, body: &B) -> Result<ServiceResponse>
    where
        B: Serialize + ?Sized,
    {
        let url = self.url(endpoint);
        let started = Instant::now();
        let mut attempts = 0;

        let response = loop {
            attempts += 1;
            match self.client.post(&url).json(body).send().await {
                Ok(response) => break response,
                Err(e) if e.is_connect() => {
                    if attempts >= self.max_attempts {
                        error!("Quitting after max number of retries to connect to signing service at {url}");
                        return Err(CaError::ServiceUnavailable {
                            endpoint: endpoint.to_string(),
                            attempts,
                            source: e,
                        });
                    }
                    info!(
                        "Connection to signing service refused {attempts}/{} times, trying again in {:?}...",
                        self.max_attempts, self.retry_backoff
                    );
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Err(e) => {
                    return Err(CaError::Request {
                        endpoint: endpoint.to_string(),
                        source: e,
                    });
                }
            }
        };

        let status = response.status();
        // May carry a freshly generated private key
        let text = Zeroizing::new(response.text().await.map_err(|e| CaError::Request {
            endpoint: endpoint.to_string(),
            source: e,
        })?);

        if status != StatusCode::OK {
            return Err(CaError::ServiceError {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body: text.to_string(),
            });
        }

        LoggingTransformer::log_service_call(endpoint, attempts, started.elapsed());
        let parsed: ServiceResponse =
            serde_json::from_str(text.as_str()).map_err(|e| CaError::malformed(endpoint, e))?;
        debug!(
            "{endpoint} answered success={} with {} error(s)",
            parsed.success,
            parsed.errors.len()
        );
        Ok(parsed)
    }
}
