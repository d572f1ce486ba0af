//! Customer gateway resource implementation

use crate::api::{gateway_state, CloudApi, CustomerGateway, NewCustomerGateway};
use crate::provider_data::{not_configured, AwsProviderData, Identity};
use crate::resources::wait_for;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;
use tfplug::context::Context;
use tfplug::import::import_state_passthrough_id;
use tfplug::resource::{
    ConfigureResourceRequest, ConfigureResourceResponse, CreateResourceRequest,
    CreateResourceResponse, DeleteResourceRequest, DeleteResourceResponse,
    ImportResourceStateRequest, ImportResourceStateResponse, ReadResourceRequest,
    ReadResourceResponse, Resource, ResourceSchemaRequest, ResourceSchemaResponse,
    ResourceWithConfigure, UpdateResourceRequest, UpdateResourceResponse,
    ValidateResourceConfigRequest, ValidateResourceConfigResponse,
};
use tfplug::schema::{AttributeBuilder, AttributeType, SchemaBuilder};
use tfplug::types::{AttributePath, Diagnostic, DynamicValue};

const CREATE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const DELETE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

pub const GATEWAY_TYPE_IPSEC_1: &str = "ipsec.1";
const MIN_BGP_ASN: i64 = 1;
const MAX_BGP_ASN: i64 = 4_294_967_294;

/// Attributes that cannot change without replacing the gateway
const REPLACE_ATTRIBUTES: [&str; 5] = [
    "bgp_asn",
    "ip_address",
    "type",
    "certificate_arn",
    "device_name",
];

#[derive(Default)]
pub struct CustomerGatewayResource {
    provider_data: Option<AwsProviderData>,
}

impl CustomerGatewayResource {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Write everything EC2 reports about `gateway` into `state`
pub(crate) fn set_gateway_attributes(
    state: &mut DynamicValue,
    gateway: &CustomerGateway,
    identity: &Identity,
) -> tfplug::Result<()> {
    state.set_string(&AttributePath::new("id"), &gateway.id)?;
    state.set_string(
        &AttributePath::new("arn"),
        identity.arn("ec2", &format!("customer-gateway/{}", gateway.id)),
    )?;
    state.set_string(&AttributePath::new("bgp_asn"), &gateway.bgp_asn)?;
    state.set_optional_string(
        &AttributePath::new("ip_address"),
        gateway.ip_address.as_deref(),
    )?;
    state.set_string(&AttributePath::new("type"), &gateway.gateway_type)?;
    state.set_optional_string(
        &AttributePath::new("certificate_arn"),
        gateway.certificate_arn.as_deref(),
    )?;
    state.set_optional_string(
        &AttributePath::new("device_name"),
        gateway.device_name.as_deref(),
    )?;
    state.set_string_map(&AttributePath::new("tags"), &gateway.tags)
}

fn parse_bgp_asn(value: &str) -> Result<i64, String> {
    let asn = value
        .parse::<i64>()
        .map_err(|_| format!("bgp_asn must be a number, got {:?}", value))?;
    if !(MIN_BGP_ASN..=MAX_BGP_ASN).contains(&asn) {
        return Err(format!(
            "bgp_asn must be between {} and {}, got {}",
            MIN_BGP_ASN, MAX_BGP_ASN, asn
        ));
    }
    Ok(asn)
}

#[async_trait]
impl Resource for CustomerGatewayResource {
    fn type_name(&self) -> &str {
        "aws_customer_gateway"
    }

    async fn schema(
        &self,
        _ctx: Context,
        _request: ResourceSchemaRequest,
    ) -> ResourceSchemaResponse {
        let schema = SchemaBuilder::new()
            .version(0)
            .description("Provides a customer gateway inside a VPC")
            .attribute(
                AttributeBuilder::new("id", AttributeType::String)
                    .description("The customer gateway ID")
                    .computed()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("arn", AttributeType::String)
                    .description("The ARN of the customer gateway")
                    .computed()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("bgp_asn", AttributeType::String)
                    .description("The gateway's Border Gateway Protocol (BGP) Autonomous System Number (ASN)")
                    .required()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("ip_address", AttributeType::String)
                    .description("The IPv4 address for the customer gateway device's outside interface")
                    .required()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("type", AttributeType::String)
                    .description("The type of customer gateway. The only type AWS supports is ipsec.1")
                    .required()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("certificate_arn", AttributeType::String)
                    .description("The ARN for the customer gateway certificate")
                    .optional()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("device_name", AttributeType::String)
                    .description("A name for the customer gateway device")
                    .optional()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("tags", AttributeType::Map(Box::new(AttributeType::String)))
                    .description("Tags to apply to the gateway")
                    .optional()
                    .build(),
            )
            .build();

        ResourceSchemaResponse {
            schema,
            diagnostics: vec![],
        }
    }

    async fn validate(
        &self,
        _ctx: Context,
        request: ValidateResourceConfigRequest,
    ) -> ValidateResourceConfigResponse {
        let mut diagnostics = vec![];

        if let Ok(bgp_asn) = request.config.get_string(&AttributePath::new("bgp_asn")) {
            if let Err(message) = parse_bgp_asn(&bgp_asn) {
                diagnostics.push(
                    Diagnostic::error("Invalid bgp_asn", message)
                        .with_attribute(AttributePath::new("bgp_asn")),
                );
            }
        }

        if let Ok(ip_address) = request.config.get_string(&AttributePath::new("ip_address")) {
            if ip_address.parse::<Ipv4Addr>().is_err() {
                diagnostics.push(
                    Diagnostic::error(
                        "Invalid ip_address",
                        format!("{:?} is not a valid IPv4 address", ip_address),
                    )
                    .with_attribute(AttributePath::new("ip_address")),
                );
            }
        }

        if let Ok(gateway_type) = request.config.get_string(&AttributePath::new("type")) {
            if gateway_type != GATEWAY_TYPE_IPSEC_1 {
                diagnostics.push(
                    Diagnostic::error(
                        "Invalid type",
                        format!(
                            "type must be {:?}, got {:?}",
                            GATEWAY_TYPE_IPSEC_1, gateway_type
                        ),
                    )
                    .with_attribute(AttributePath::new("type")),
                );
            }
        }

        ValidateResourceConfigResponse { diagnostics }
    }

    async fn create(&self, ctx: Context, request: CreateResourceRequest) -> CreateResourceResponse {
        let mut diagnostics = vec![];

        let provider_data = match &self.provider_data {
            Some(data) => data,
            None => {
                diagnostics.push(not_configured());
                return CreateResourceResponse {
                    new_state: request.planned_state,
                    diagnostics,
                };
            }
        };

        let input = match self.extract_gateway_config(&request.config) {
            Ok(input) => input,
            Err(diag) => {
                diagnostics.push(diag);
                return CreateResourceResponse {
                    new_state: request.planned_state,
                    diagnostics,
                };
            }
        };

        let created = match provider_data.api.create_customer_gateway(&input).await {
            Ok(gateway) => gateway,
            Err(e) => {
                diagnostics.push(Diagnostic::error(
                    "Failed to create customer gateway",
                    format!("API error: {}", e),
                ));
                return CreateResourceResponse {
                    new_state: request.planned_state,
                    diagnostics,
                };
            }
        };
        tracing::debug!("Created customer gateway {}", created.id);

        let gateway =
            match wait_for_available(&ctx, provider_data.api.as_ref(), &created.id).await {
                Ok(gateway) => gateway,
                Err(message) => {
                    // Keep the id so the gateway is still tracked for destroy
                    let mut new_state = request.planned_state;
                    let _ = new_state.set_string(&AttributePath::new("id"), &created.id);
                    diagnostics.push(Diagnostic::error(
                        "Customer gateway did not become available",
                        message,
                    ));
                    return CreateResourceResponse {
                        new_state,
                        diagnostics,
                    };
                }
            };

        let mut new_state = request.config;
        if let Err(e) = set_gateway_attributes(&mut new_state, &gateway, &provider_data.identity) {
            diagnostics.push(Diagnostic::error(
                "Failed to record customer gateway state",
                e.to_string(),
            ));
        }

        CreateResourceResponse {
            new_state,
            diagnostics,
        }
    }

    async fn read(&self, _ctx: Context, request: ReadResourceRequest) -> ReadResourceResponse {
        let mut diagnostics = vec![];

        let id = match request.current_state.get_string(&AttributePath::new("id")) {
            Ok(id) => id,
            Err(_) => {
                return ReadResourceResponse {
                    new_state: None,
                    diagnostics,
                };
            }
        };

        let provider_data = match &self.provider_data {
            Some(data) => data,
            None => {
                diagnostics.push(not_configured());
                return ReadResourceResponse {
                    new_state: Some(request.current_state),
                    diagnostics,
                };
            }
        };

        match provider_data
            .api
            .describe_customer_gateways(std::slice::from_ref(&id), &[])
            .await
        {
            Ok(gateways) => {
                let Some(gateway) = gateways.into_iter().find(|g| g.id == id && !g.is_gone())
                else {
                    tracing::debug!("Customer gateway {} no longer exists", id);
                    return ReadResourceResponse {
                        new_state: None,
                        diagnostics,
                    };
                };

                let mut new_state = request.current_state.clone();
                if let Err(e) =
                    set_gateway_attributes(&mut new_state, &gateway, &provider_data.identity)
                {
                    diagnostics.push(Diagnostic::error(
                        "Failed to record customer gateway state",
                        e.to_string(),
                    ));
                }

                ReadResourceResponse {
                    new_state: Some(new_state),
                    diagnostics,
                }
            }
            Err(e) => {
                diagnostics.push(Diagnostic::error(
                    "Failed to read customer gateway",
                    format!("API error: {}", e),
                ));
                ReadResourceResponse {
                    new_state: Some(request.current_state),
                    diagnostics,
                }
            }
        }
    }

    async fn update(&self, _ctx: Context, request: UpdateResourceRequest) -> UpdateResourceResponse {
        let mut diagnostics = vec![];

        let provider_data = match &self.provider_data {
            Some(data) => data,
            None => {
                diagnostics.push(not_configured());
                return UpdateResourceResponse {
                    new_state: request.prior_state,
                    diagnostics,
                };
            }
        };

        for attribute in REPLACE_ATTRIBUTES {
            let path = AttributePath::new(attribute);
            let before = request.prior_state.get_optional_string(&path).ok().flatten();
            let after = request.config.get_optional_string(&path).ok().flatten();
            if before != after {
                diagnostics.push(
                    Diagnostic::error(
                        "Cannot update customer gateway",
                        format!(
                            "{} cannot be changed from {:?} to {:?} without replacing the gateway",
                            attribute, before, after
                        ),
                    )
                    .with_attribute(path),
                );
            }
        }
        if !diagnostics.is_empty() {
            return UpdateResourceResponse {
                new_state: request.prior_state,
                diagnostics,
            };
        }

        let id = match request.prior_state.get_string(&AttributePath::new("id")) {
            Ok(id) => id,
            Err(e) => {
                diagnostics.push(Diagnostic::error(
                    "Missing customer gateway id",
                    e.to_string(),
                ));
                return UpdateResourceResponse {
                    new_state: request.prior_state,
                    diagnostics,
                };
            }
        };

        let tags_path = AttributePath::new("tags");
        let old_tags = request
            .prior_state
            .get_string_map(&tags_path)
            .unwrap_or_default();
        let new_tags = request.config.get_string_map(&tags_path).unwrap_or_default();

        if let Err(e) = update_tags(provider_data.api.as_ref(), &id, &old_tags, &new_tags).await {
            diagnostics.push(Diagnostic::error(
                "Failed to update customer gateway tags",
                format!("API error: {}", e),
            ));
            return UpdateResourceResponse {
                new_state: request.prior_state,
                diagnostics,
            };
        }

        let mut new_state = request.planned_state;
        let _ = new_state.set_string_map(&tags_path, &new_tags);

        UpdateResourceResponse {
            new_state,
            diagnostics,
        }
    }

    async fn delete(&self, ctx: Context, request: DeleteResourceRequest) -> DeleteResourceResponse {
        let mut diagnostics = vec![];

        let provider_data = match &self.provider_data {
            Some(data) => data,
            None => {
                diagnostics.push(not_configured());
                return DeleteResourceResponse { diagnostics };
            }
        };

        let id = match request.prior_state.get_string(&AttributePath::new("id")) {
            Ok(id) => id,
            Err(_) => {
                // Nothing was ever created
                return DeleteResourceResponse { diagnostics };
            }
        };

        if let Err(e) = provider_data.api.delete_customer_gateway(&id).await {
            diagnostics.push(Diagnostic::error(
                "Failed to delete customer gateway",
                format!("API error: {}", e),
            ));
            return DeleteResourceResponse { diagnostics };
        }

        let api = provider_data.api.as_ref();
        let waited = wait_for(&ctx, &format!("customer gateway {} deletion", id), DELETE_TIMEOUT, || async {
            let gateways = api
                .describe_customer_gateways(std::slice::from_ref(&id), &[])
                .await?;
            let deleted = gateways
                .iter()
                .all(|g| g.id != id || g.state == gateway_state::DELETED);
            Ok(deleted.then_some(()))
        })
        .await;

        if let Err(message) = waited {
            diagnostics.push(Diagnostic::error(
                "Customer gateway was not deleted",
                message,
            ));
        }

        DeleteResourceResponse { diagnostics }
    }

    async fn import_state(
        &self,
        _ctx: Context,
        request: ImportResourceStateRequest,
    ) -> ImportResourceStateResponse {
        import_state_passthrough_id(AttributePath::new("id"), &request)
    }
}

impl CustomerGatewayResource {
    /// Extract customer gateway configuration from terraform configuration
    fn extract_gateway_config(&self, config: &DynamicValue) -> Result<NewCustomerGateway, Diagnostic> {
        let bgp_asn = config
            .get_string(&AttributePath::new("bgp_asn"))
            .map_err(|_| Diagnostic::error("Missing bgp_asn", "The 'bgp_asn' attribute is required"))?;
        let bgp_asn = parse_bgp_asn(&bgp_asn).map_err(|m| Diagnostic::error("Invalid bgp_asn", m))?;

        let ip_address = config
            .get_string(&AttributePath::new("ip_address"))
            .map_err(|_| {
                Diagnostic::error("Missing ip_address", "The 'ip_address' attribute is required")
            })?;

        let gateway_type = config
            .get_string(&AttributePath::new("type"))
            .map_err(|_| Diagnostic::error("Missing type", "The 'type' attribute is required"))?;

        let certificate_arn = config
            .get_optional_string(&AttributePath::new("certificate_arn"))
            .ok()
            .flatten();
        let device_name = config
            .get_optional_string(&AttributePath::new("device_name"))
            .ok()
            .flatten();
        let tags = config
            .get_string_map(&AttributePath::new("tags"))
            .map_err(|e| Diagnostic::error("Invalid tags", e.to_string()))?;

        Ok(NewCustomerGateway {
            bgp_asn,
            ip_address,
            gateway_type,
            certificate_arn,
            device_name,
            tags,
        })
    }
}

async fn wait_for_available(
    ctx: &Context,
    api: &dyn CloudApi,
    id: &str,
) -> Result<CustomerGateway, String> {
    let ids = [id.to_string()];
    wait_for(ctx, &format!("customer gateway {}", id), CREATE_TIMEOUT, || async {
        let gateways = api.describe_customer_gateways(&ids, &[]).await?;
        match gateways.into_iter().find(|g| g.id == id) {
            Some(gateway) if gateway.state == gateway_state::AVAILABLE => Ok(Some(gateway)),
            Some(gateway) if gateway.is_gone() => Err(crate::api::ApiError::Invalid(format!(
                "customer gateway {} entered state {}",
                id, gateway.state
            ))),
            // Pending, or not visible yet
            _ => Ok(None),
        }
    })
    .await
}

async fn update_tags(
    api: &dyn CloudApi,
    id: &str,
    old_tags: &BTreeMap<String, String>,
    new_tags: &BTreeMap<String, String>,
) -> Result<(), crate::api::ApiError> {
    let removed: Vec<String> = old_tags
        .keys()
        .filter(|k| !new_tags.contains_key(*k))
        .cloned()
        .collect();
    let changed: BTreeMap<String, String> = new_tags
        .iter()
        .filter(|(k, v)| old_tags.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if !removed.is_empty() {
        tracing::debug!("Removing tags {:?} from {}", removed, id);
        api.delete_tags(id, &removed).await?;
    }
    if !changed.is_empty() {
        tracing::debug!("Setting {} tag(s) on {}", changed.len(), id);
        api.create_tags(id, &changed).await?;
    }
    Ok(())
}

#[async_trait]
impl ResourceWithConfigure for CustomerGatewayResource {
    async fn configure(
        &mut self,
        _ctx: Context,
        request: ConfigureResourceRequest,
    ) -> ConfigureResourceResponse {
        let mut diagnostics = vec![];

        match AwsProviderData::from_provider_data(request.provider_data, "resource") {
            Ok(provider_data) => self.provider_data = Some(provider_data),
            Err(diag) => diagnostics.push(diag),
        }

        ConfigureResourceResponse { diagnostics }
    }
}
