//! Provider data structure passed to resources and data sources

use crate::api::CloudApi;
use std::sync::Arc;
use tfplug::provider::ProviderData;
use tfplug::types::Diagnostic;

/// Account and location the provider is operating in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub account_id: String,
    pub region: String,
    pub partition: String,
}

impl Identity {
    pub fn new(account_id: &str, region: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            region: region.to_string(),
            partition: partition_for_region(region).to_string(),
        }
    }

    /// `arn:<partition>:<service>:<region>:<account>:<resource>`
    pub fn arn(&self, service: &str, resource: &str) -> String {
        format!(
            "arn:{}:{}:{}:{}:{}",
            self.partition, service, self.region, self.account_id, resource
        )
    }
}

pub fn partition_for_region(region: &str) -> &'static str {
    if region.starts_with("cn-") {
        "aws-cn"
    } else if region.starts_with("us-gov-") {
        "aws-us-gov"
    } else if region.starts_with("us-iso-") {
        "aws-iso"
    } else if region.starts_with("us-isob-") {
        "aws-iso-b"
    } else {
        "aws"
    }
}

#[derive(Clone)]
pub struct AwsProviderData {
    pub api: Arc<dyn CloudApi>,
    pub identity: Identity,
}

impl AwsProviderData {
    pub fn new(api: Arc<dyn CloudApi>, identity: Identity) -> Self {
        Self { api, identity }
    }

    /// Recover the provider data handed to a resource or data source's
    /// configure call. `kind` names the receiver in diagnostics.
    pub fn from_provider_data(
        provider_data: Option<ProviderData>,
        kind: &str,
    ) -> Result<Self, Diagnostic> {
        let Some(data) = provider_data else {
            tracing::warn!("No provider data provided to {}", kind);
            return Err(Diagnostic::error(
                "No provider data",
                format!("No provider data was provided to the {}", kind),
            ));
        };

        match data.downcast_ref::<AwsProviderData>() {
            Some(provider_data) => Ok(provider_data.clone()),
            None => {
                tracing::error!("Failed to downcast provider data to AwsProviderData");
                Err(Diagnostic::error(
                    "Invalid provider data",
                    "Failed to extract AwsProviderData from provider data",
                ))
            }
        }
    }
}

/// Error returned by operations called before configure succeeded
pub fn not_configured() -> Diagnostic {
    Diagnostic::error(
        "Provider not configured",
        "Provider data was not properly configured",
    )
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::api::MemoryCloud;

    #[test]
    fn partitions() {
        assert_eq!(partition_for_region("us-west-2"), "aws");
        assert_eq!(partition_for_region("cn-north-1"), "aws-cn");
        assert_eq!(partition_for_region("us-gov-west-1"), "aws-us-gov");
        assert_eq!(partition_for_region("us-isob-east-1"), "aws-iso-b");
    }

    #[test]
    fn customer_gateway_arn() {
        let identity = Identity::new("123456789012", "us-gov-west-1");
        assert_eq!(
            identity.arn("ec2", "customer-gateway/cgw-0123"),
            "arn:aws-us-gov:ec2:us-gov-west-1:123456789012:customer-gateway/cgw-0123"
        );
    }

    #[test]
    fn provider_data_round_trips_through_any() {
        let data = AwsProviderData::new(
            Arc::new(MemoryCloud::default()),
            Identity::new("123456789012", "us-west-2"),
        );
        let erased: ProviderData = Arc::new(data);

        let recovered = AwsProviderData::from_provider_data(Some(erased), "resource").unwrap();
        assert_eq!(recovered.identity.account_id, "123456789012");
    }

    #[test]
    fn foreign_provider_data_is_rejected() {
        let erased: ProviderData = Arc::new("not provider data");
        let err = AwsProviderData::from_provider_data(Some(erased), "resource").unwrap_err();
        assert_eq!(err.summary, "Invalid provider data");

        let err = AwsProviderData::from_provider_data(None, "data source").unwrap_err();
        assert_eq!(err.detail, "No provider data was provided to the data source");
    }
}
