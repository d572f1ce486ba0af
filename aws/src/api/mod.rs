//! Cloud API used by the provider
//!
//! Resources talk to AWS through the [`CloudApi`] trait. [`SdkCloud`] is
//! backed by the AWS SDK; [`MemoryCloud`] keeps everything in process and
//! mimics the EC2, ACM and ACM PCA behaviour the provider relies on.

pub mod error;
pub mod memory;
pub mod sdk;

pub use error::ApiError;
pub use memory::MemoryCloud;
pub use sdk::{SdkCloud, SdkConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

/// Customer gateway states as reported by EC2
pub mod gateway_state {
    pub const PENDING: &str = "pending";
    pub const AVAILABLE: &str = "available";
    pub const DELETING: &str = "deleting";
    pub const DELETED: &str = "deleted";
}

/// Certificate authority statuses as reported by ACM PCA
pub mod authority_status {
    pub const CREATING: &str = "CREATING";
    pub const PENDING_CERTIFICATE: &str = "PENDING_CERTIFICATE";
    pub const ACTIVE: &str = "ACTIVE";
    pub const DISABLED: &str = "DISABLED";
    pub const DELETED: &str = "DELETED";
    pub const FAILED: &str = "FAILED";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerGateway {
    pub id: String,
    pub bgp_asn: String,
    pub ip_address: Option<String>,
    #[serde(rename = "type")]
    pub gateway_type: String,
    pub state: String,
    pub certificate_arn: Option<String>,
    pub device_name: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl CustomerGateway {
    /// Deleted and deleting gateways linger in describe results for a while
    pub fn is_gone(&self) -> bool {
        self.state == gateway_state::DELETED || self.state == gateway_state::DELETING
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCustomerGateway {
    pub bgp_asn: i64,
    pub ip_address: String,
    #[serde(rename = "type")]
    pub gateway_type: String,
    pub certificate_arn: Option<String>,
    pub device_name: Option<String>,
    pub tags: BTreeMap<String, String>,
}

/// An EC2 describe filter such as `tag:Name = [..]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    pub values: Vec<String>,
}

impl Filter {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateAuthority {
    pub arn: String,
    #[serde(rename = "type")]
    pub authority_type: String,
    pub status: String,
    pub key_algorithm: String,
    pub signing_algorithm: String,
    pub common_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCertificateAuthority {
    #[serde(rename = "type")]
    pub authority_type: String,
    pub key_algorithm: String,
    pub signing_algorithm: String,
    pub common_name: String,
    /// Client token so a retried create does not make a second authority
    pub idempotency_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub arn: String,
    pub domain_name: String,
    pub status: String,
    pub certificate_authority_arn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub account_id: String,
    pub arn: String,
    pub user_id: String,
}

#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn caller_identity(&self) -> Result<CallerIdentity, ApiError>;

    async fn create_customer_gateway(
        &self,
        input: &NewCustomerGateway,
    ) -> Result<CustomerGateway, ApiError>;

    /// Unknown ids yield an empty result rather than an error
    async fn describe_customer_gateways(
        &self,
        ids: &[String],
        filters: &[Filter],
    ) -> Result<Vec<CustomerGateway>, ApiError>;

    async fn delete_customer_gateway(&self, id: &str) -> Result<(), ApiError>;

    async fn create_tags(&self, id: &str, tags: &BTreeMap<String, String>)
        -> Result<(), ApiError>;

    async fn delete_tags(&self, id: &str, keys: &[String]) -> Result<(), ApiError>;

    /// Returns the new authority's ARN
    async fn create_certificate_authority(
        &self,
        input: &NewCertificateAuthority,
    ) -> Result<String, ApiError>;

    async fn describe_certificate_authority(
        &self,
        arn: &str,
    ) -> Result<Option<CertificateAuthority>, ApiError>;

    async fn update_certificate_authority_status(
        &self,
        arn: &str,
        status: &str,
    ) -> Result<(), ApiError>;

    async fn delete_certificate_authority(
        &self,
        arn: &str,
        permanent_deletion_time_in_days: i32,
    ) -> Result<(), ApiError>;

    /// Requests a private certificate; returns its ARN
    async fn request_certificate(
        &self,
        domain_name: &str,
        certificate_authority_arn: &str,
    ) -> Result<String, ApiError>;

    async fn describe_certificate(&self, arn: &str) -> Result<Option<Certificate>, ApiError>;

    async fn delete_certificate(&self, arn: &str) -> Result<(), ApiError>;
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5000,
        }
    }
}

impl RetryConfig {
    pub(crate) fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

/// Run `request_fn` again on throttling or transport errors
pub(crate) async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation: &str,
    request_fn: F,
) -> Result<T, ApiError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 0;
    loop {
        if attempt > 0 {
            let backoff = config.backoff(attempt);
            tracing::debug!(
                "Retrying {} after {}ms (attempt {})",
                operation,
                backoff.as_millis(),
                attempt
            );
            tokio::time::sleep(backoff).await;
        }

        match request_fn().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                tracing::debug!("{} failed with retryable error: {}", operation, e);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
