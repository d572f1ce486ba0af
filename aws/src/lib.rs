pub mod api;
pub mod data_sources;
pub mod provider_data;
pub mod resources;

pub use provider_data::{AwsProviderData, Identity};

use api::{CloudApi, RetryConfig, SdkCloud, SdkConfig};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tfplug::context::Context;
use tfplug::provider::{
    ConfigureProviderRequest, ConfigureProviderResponse, DataSourceFactory, Provider,
    ProviderData, ProviderSchemaRequest, ProviderSchemaResponse, ResourceFactory,
};
use tfplug::schema::{AttributeBuilder, AttributeType, SchemaBuilder};
use tfplug::types::{AttributePath, Diagnostic, DynamicValue};

pub const ENV_REGION: &str = "AWS_REGION";
pub const ENV_DEFAULT_REGION: &str = "AWS_DEFAULT_REGION";
pub const ENV_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const ENV_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const ENV_ENDPOINT_URL: &str = "AWS_ENDPOINT_URL";

pub struct AwsProvider {
    /// Injected API, used instead of building an SDK client
    api: Option<Arc<dyn CloudApi>>,
    provider_data: Option<AwsProviderData>,
}

impl Default for AwsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl AwsProvider {
    pub fn new() -> Self {
        Self {
            api: None,
            provider_data: None,
        }
    }

    /// Provider that talks to `api` instead of AWS
    pub fn with_api(api: Arc<dyn CloudApi>) -> Self {
        Self {
            api: Some(api),
            provider_data: None,
        }
    }

    pub fn provider_data(&self) -> Option<&AwsProviderData> {
        self.provider_data.as_ref()
    }
}

/// Config attribute if set and non-empty, otherwise the first non-empty env var
fn config_or_env(config: &DynamicValue, attribute: &str, env_vars: &[&str]) -> Option<String> {
    config
        .get_optional_string(&AttributePath::new(attribute))
        .ok()
        .flatten()
        .filter(|v| !v.is_empty())
        .or_else(|| {
            env_vars
                .iter()
                .filter_map(|name| std::env::var(name).ok())
                .find(|v| !v.is_empty())
        })
}

fn validate_endpoint(endpoint: &str) -> Result<(), String> {
    let url = url::Url::parse(endpoint).map_err(|e| format!("{:?}: {}", endpoint, e))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(format!(
            "{:?}: scheme must be http or https, got {:?}",
            endpoint, scheme
        )),
    }
}

#[async_trait]
impl Provider for AwsProvider {
    fn type_name(&self) -> &str {
        "aws"
    }

    async fn schema(&self, _ctx: Context, _request: ProviderSchemaRequest) -> ProviderSchemaResponse {
        let schema = SchemaBuilder::new()
            .version(0)
            .description("Manages AWS customer gateways and the certificates they reference")
            .attribute(
                AttributeBuilder::new("region", AttributeType::String)
                    .description("AWS region. Falls back to AWS_REGION, then AWS_DEFAULT_REGION")
                    .optional()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("access_key", AttributeType::String)
                    .description("Access key id. Falls back to AWS_ACCESS_KEY_ID")
                    .optional()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("secret_key", AttributeType::String)
                    .description("Secret access key. Falls back to AWS_SECRET_ACCESS_KEY")
                    .optional()
                    .sensitive()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("endpoint", AttributeType::String)
                    .description("Endpoint used for every service. Falls back to AWS_ENDPOINT_URL")
                    .optional()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("max_retries", AttributeType::Number)
                    .description("Retries for throttled or failed API calls, default 3")
                    .optional()
                    .build(),
            )
            .build();

        ProviderSchemaResponse {
            schema,
            diagnostics: vec![],
        }
    }

    async fn configure(
        &mut self,
        _ctx: Context,
        request: ConfigureProviderRequest,
    ) -> ConfigureProviderResponse {
        let mut diagnostics = vec![];
        let config = &request.config;

        let region = config_or_env(config, "region", &[ENV_REGION, ENV_DEFAULT_REGION]);
        let access_key = config_or_env(config, "access_key", &[ENV_ACCESS_KEY_ID]);
        let secret_key = config_or_env(config, "secret_key", &[ENV_SECRET_ACCESS_KEY]);
        let endpoint = config_or_env(config, "endpoint", &[ENV_ENDPOINT_URL]);

        let mut retry = RetryConfig::default();
        if let Ok(max_retries) = config.get_number(&AttributePath::new("max_retries")) {
            if max_retries < 0.0 || max_retries.fract() != 0.0 {
                diagnostics.push(
                    Diagnostic::error(
                        "Invalid max_retries",
                        format!("max_retries must be a non-negative whole number, got {}", max_retries),
                    )
                    .with_attribute(AttributePath::new("max_retries")),
                );
            } else {
                retry.max_retries = max_retries as u32;
            }
        }

        if region.is_none() {
            diagnostics.push(Diagnostic::error(
                "region is required (set in provider config or AWS_REGION env var)",
                "",
            ));
        }
        if access_key.is_some() != secret_key.is_some() {
            diagnostics.push(Diagnostic::error(
                "access_key and secret_key must be set together",
                "Set both in the provider config or both through AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY",
            ));
        }
        if let Some(endpoint) = &endpoint {
            if let Err(e) = validate_endpoint(endpoint) {
                diagnostics.push(
                    Diagnostic::error("Invalid endpoint", e)
                        .with_attribute(AttributePath::new("endpoint")),
                );
            }
        }

        let Some(region) = region.filter(|_| diagnostics.is_empty()) else {
            return ConfigureProviderResponse {
                diagnostics,
                provider_data: None,
            };
        };

        let api = match &self.api {
            Some(api) => api.clone(),
            None => {
                tracing::debug!("Building SDK clients for region {}", region);
                let sdk_config = SdkConfig {
                    region: region.clone(),
                    access_key,
                    secret_key,
                    endpoint,
                    retry,
                };
                Arc::new(SdkCloud::new(&sdk_config).await) as Arc<dyn CloudApi>
            }
        };

        let identity = match api.caller_identity().await {
            Ok(caller) => Identity::new(&caller.account_id, &region),
            Err(e) => {
                diagnostics.push(Diagnostic::error(
                    "Failed to resolve caller identity",
                    format!("API error: {}", e),
                ));
                return ConfigureProviderResponse {
                    diagnostics,
                    provider_data: None,
                };
            }
        };
        tracing::debug!(
            "Configured for account {} in {} ({})",
            identity.account_id,
            identity.region,
            identity.partition
        );

        let provider_data = AwsProviderData::new(api, identity);
        self.provider_data = Some(provider_data.clone());

        ConfigureProviderResponse {
            diagnostics,
            provider_data: Some(Arc::new(provider_data) as ProviderData),
        }
    }

    fn resources(&self) -> HashMap<String, ResourceFactory> {
        let mut resources: HashMap<String, ResourceFactory> = HashMap::new();
        resources.insert(
            "aws_customer_gateway".to_string(),
            Box::new(|| Box::new(resources::CustomerGatewayResource::new())),
        );
        resources.insert(
            "aws_acmpca_certificate_authority".to_string(),
            Box::new(|| Box::new(resources::CertificateAuthorityResource::new())),
        );
        resources.insert(
            "aws_acm_certificate".to_string(),
            Box::new(|| Box::new(resources::AcmCertificateResource::new())),
        );
        resources
    }

    fn data_sources(&self) -> HashMap<String, DataSourceFactory> {
        let mut data_sources: HashMap<String, DataSourceFactory> = HashMap::new();
        data_sources.insert(
            "aws_customer_gateway".to_string(),
            Box::new(|| Box::new(data_sources::CustomerGatewayDataSource::new())),
        );
        data_sources
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::api::MemoryCloud;
    use serial_test::serial;
    use tfplug::DataSource;

    fn clear_env() {
        for name in [
            ENV_REGION,
            ENV_DEFAULT_REGION,
            ENV_ACCESS_KEY_ID,
            ENV_SECRET_ACCESS_KEY,
            ENV_ENDPOINT_URL,
        ] {
            std::env::remove_var(name);
        }
    }

    fn request(config: DynamicValue) -> ConfigureProviderRequest {
        ConfigureProviderRequest {
            terraform_version: "1.9.0".to_string(),
            config,
        }
    }

    fn memory_provider() -> AwsProvider {
        AwsProvider::with_api(Arc::new(MemoryCloud::default()))
    }

    #[tokio::test]
    #[serial]
    async fn provider_configures_from_env_vars() {
        clear_env();
        std::env::set_var(ENV_DEFAULT_REGION, "eu-west-1");

        let mut provider = memory_provider();
        let response = provider
            .configure(Context::new(), request(DynamicValue::object()))
            .await;

        assert!(response.diagnostics.is_empty());
        assert!(response.provider_data.is_some());
        let identity = &provider.provider_data().unwrap().identity;
        assert_eq!(identity.region, "eu-west-1");
        assert_eq!(identity.account_id, "123456789012");
        assert_eq!(identity.partition, "aws");

        clear_env();
    }

    #[tokio::test]
    #[serial]
    async fn config_takes_precedence_over_env() {
        clear_env();
        std::env::set_var(ENV_REGION, "eu-west-1");

        let mut config = DynamicValue::object();
        config
            .set_string(&AttributePath::new("region"), "cn-north-1")
            .unwrap();

        let mut provider = memory_provider();
        provider.configure(Context::new(), request(config)).await;

        let identity = &provider.provider_data().unwrap().identity;
        assert_eq!(identity.region, "cn-north-1");
        assert_eq!(identity.partition, "aws-cn");

        clear_env();
    }

    #[tokio::test]
    #[serial]
    async fn provider_configure_requires_region() {
        clear_env();

        let mut provider = memory_provider();
        let response = provider
            .configure(Context::new(), request(DynamicValue::object()))
            .await;

        assert_eq!(response.diagnostics.len(), 1);
        assert!(response.diagnostics[0].summary.contains("region is required"));
        assert!(response.provider_data.is_none());
    }

    #[tokio::test]
    #[serial]
    async fn provider_configure_rejects_bad_endpoint() {
        clear_env();
        std::env::set_var(ENV_REGION, "us-east-1");
        std::env::set_var(ENV_ENDPOINT_URL, "ftp://localhost:4566");

        let mut provider = memory_provider();
        let response = provider
            .configure(Context::new(), request(DynamicValue::object()))
            .await;

        assert_eq!(response.diagnostics[0].summary, "Invalid endpoint");
        assert!(response.diagnostics[0].detail.contains("scheme must be http or https"));

        clear_env();
    }

    #[tokio::test]
    #[serial]
    async fn provider_configure_requires_key_pair() {
        clear_env();
        std::env::set_var(ENV_REGION, "us-east-1");
        std::env::set_var(ENV_ACCESS_KEY_ID, "AKIAEXAMPLE");

        let mut provider = memory_provider();
        let response = provider
            .configure(Context::new(), request(DynamicValue::object()))
            .await;

        assert!(response.diagnostics[0]
            .summary
            .contains("access_key and secret_key must be set together"));

        clear_env();
    }

    #[tokio::test]
    #[serial]
    async fn identity_failure_is_reported() {
        clear_env();
        std::env::set_var(ENV_REGION, "us-east-1");

        let cloud = Arc::new(MemoryCloud::default());
        cloud.fail_next("GetCallerIdentity", "InvalidClientTokenId");
        let mut provider = AwsProvider::with_api(cloud);
        let response = provider
            .configure(Context::new(), request(DynamicValue::object()))
            .await;

        assert_eq!(response.diagnostics[0].summary, "Failed to resolve caller identity");
        assert!(response.diagnostics[0].detail.contains("InvalidClientTokenId"));

        clear_env();
    }

    #[tokio::test]
    async fn provider_exposes_resources_and_data_sources() {
        let provider = AwsProvider::new();

        let mut resources: Vec<String> = provider.resources().into_keys().collect();
        resources.sort();
        assert_eq!(
            resources,
            vec![
                "aws_acm_certificate",
                "aws_acmpca_certificate_authority",
                "aws_customer_gateway"
            ]
        );

        let data_sources = provider.data_sources();
        let factory = data_sources.get("aws_customer_gateway").unwrap();
        assert_eq!(factory().type_name(), "aws_customer_gateway");
    }
}
