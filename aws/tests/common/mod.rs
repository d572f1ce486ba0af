//! Shared setup for the provider's acceptance tests

#![allow(dead_code)]

use async_trait::async_trait;
use aws::api::MemoryCloud;
use aws::{AwsProvider, AwsProviderData, ENV_ACCESS_KEY_ID, ENV_DEFAULT_REGION, ENV_REGION, ENV_SECRET_ACCESS_KEY};
use std::sync::Arc;
use tfplug::context::Context;
use tfplug::provider::ProviderData;
use tfplug::testing::{DestroyCheck, TestCase, TestState};
use tfplug::types::{AttributePath, DynamicValue};

pub const MEMORY_REGION: &str = "us-west-2";

/// Where a scenario's provider sends its API calls
pub enum AccContext {
    /// Real AWS, configured from the environment
    Aws,
    /// The in-process cloud; every run gets its own
    Memory(Arc<MemoryCloud>),
}

impl AccContext {
    pub fn aws() -> Self {
        AccContext::Aws
    }

    pub fn memory() -> Self {
        AccContext::Memory(Arc::new(MemoryCloud::new(MEMORY_REGION)))
    }

    pub fn cloud(&self) -> Option<&Arc<MemoryCloud>> {
        match self {
            AccContext::Aws => None,
            AccContext::Memory(cloud) => Some(cloud),
        }
    }

    /// A test case wired to this context's provider, with the destroy check installed
    pub fn case(&self) -> TestCase {
        match self {
            AccContext::Aws => TestCase::new(AwsProvider::new)
                .pre_check(pre_check)
                .check_destroy(CustomerGatewayDestroyed),
            AccContext::Memory(cloud) => {
                let cloud = cloud.clone();
                let mut config = DynamicValue::object();
                let _ = config.set_string(&AttributePath::new("region"), MEMORY_REGION);

                TestCase::new(move || AwsProvider::with_api(cloud.clone()))
                    .provider_config(config)
                    .check_destroy(CustomerGatewayDestroyed)
            }
        }
    }
}

/// Region and credentials must be available before touching real AWS
pub fn pre_check() -> Result<(), String> {
    let set = |name: &str| std::env::var(name).map(|v| !v.is_empty()).unwrap_or(false);

    if !set(ENV_REGION) && !set(ENV_DEFAULT_REGION) {
        return Err(format!(
            "{} or {} must be set for acceptance tests",
            ENV_REGION, ENV_DEFAULT_REGION
        ));
    }
    if !(set(ENV_ACCESS_KEY_ID) && set(ENV_SECRET_ACCESS_KEY)) && !set("AWS_PROFILE") {
        return Err(format!(
            "{} and {} (or AWS_PROFILE) must be set for acceptance tests",
            ENV_ACCESS_KEY_ID, ENV_SECRET_ACCESS_KEY
        ));
    }
    Ok(())
}

/// Every customer gateway the test created must be gone or `deleted`
pub struct CustomerGatewayDestroyed;

#[async_trait]
impl DestroyCheck for CustomerGatewayDestroyed {
    async fn check_destroy(
        &self,
        _ctx: Context,
        provider_data: Option<ProviderData>,
        state: &TestState,
    ) -> Result<(), String> {
        let provider_data = AwsProviderData::from_provider_data(provider_data, "destroy check")
            .map_err(|d| d.detail)?;

        for gateway in state.resources_of_type("aws_customer_gateway") {
            let Some(id) = gateway.id() else {
                continue;
            };
            let found = provider_data
                .api
                .describe_customer_gateways(&[id.to_string()], &[])
                .await
                .map_err(|e| e.to_string())?;
            if let Some(remaining) = found.iter().find(|g| g.id == id && !g.is_gone()) {
                return Err(format!(
                    "customer gateway {} still exists in state {}",
                    id, remaining.state
                ));
            }
        }
        Ok(())
    }
}
