//! Customer gateway data source implementation

use crate::api::Filter;
use crate::provider_data::{not_configured, AwsProviderData};
use crate::resources::ec2::set_gateway_attributes;
use async_trait::async_trait;
use tfplug::context::Context;
use tfplug::data_source::{
    ConfigureDataSourceRequest, ConfigureDataSourceResponse, DataSource, DataSourceSchemaRequest,
    DataSourceSchemaResponse, DataSourceWithConfigure, ReadDataSourceRequest,
    ReadDataSourceResponse, ValidateDataSourceConfigRequest, ValidateDataSourceConfigResponse,
};
use tfplug::schema::{AttributeBuilder, AttributeType, NestedBlockBuilder, NestingMode, SchemaBuilder};
use tfplug::types::{AttributePath, Diagnostic, DynamicValue};

#[derive(Default)]
pub struct CustomerGatewayDataSource {
    provider_data: Option<AwsProviderData>,
}

impl CustomerGatewayDataSource {
    pub fn new() -> Self {
        Self::default()
    }
}

/// `filter` blocks followed by one `tag:<key>` filter per entry in `tags`
fn lookup_filters(config: &DynamicValue) -> Result<Vec<Filter>, Diagnostic> {
    let mut filters = vec![];

    let blocks = config
        .get_list(&AttributePath::new("filter"))
        .unwrap_or_default();
    for (idx, block) in blocks.into_iter().enumerate() {
        let block = DynamicValue::new(block);
        let name = block.get_string(&AttributePath::new("name")).map_err(|e| {
            Diagnostic::error("Invalid filter", e.to_string())
                .with_attribute(AttributePath::new("filter").index(idx as i64))
        })?;
        let values = block
            .get_list(&AttributePath::new("values"))
            .map_err(|e| {
                Diagnostic::error("Invalid filter", e.to_string())
                    .with_attribute(AttributePath::new("filter").index(idx as i64))
            })?
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        filters.push(Filter::new(name, values));
    }

    let tags = config
        .get_string_map(&AttributePath::new("tags"))
        .map_err(|e| Diagnostic::error("Invalid tags", e.to_string()))?;
    filters.extend(
        tags.into_iter()
            .map(|(key, value)| Filter::new(format!("tag:{}", key), vec![value])),
    );

    Ok(filters)
}

#[async_trait]
impl DataSource for CustomerGatewayDataSource {
    fn type_name(&self) -> &str {
        "aws_customer_gateway"
    }

    async fn schema(
        &self,
        _ctx: Context,
        _request: DataSourceSchemaRequest,
    ) -> DataSourceSchemaResponse {
        let schema = SchemaBuilder::new()
            .version(0)
            .description("Get an existing AWS customer gateway")
            .attribute(
                AttributeBuilder::new("id", AttributeType::String)
                    .description("The ID of the gateway")
                    .optional()
                    .computed()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("arn", AttributeType::String)
                    .computed()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("bgp_asn", AttributeType::String)
                    .computed()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("certificate_arn", AttributeType::String)
                    .computed()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("device_name", AttributeType::String)
                    .computed()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("ip_address", AttributeType::String)
                    .computed()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("type", AttributeType::String)
                    .computed()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("tags", AttributeType::Map(Box::new(AttributeType::String)))
                    .description("Tags the gateway must have; set to the gateway's tags once read")
                    .optional()
                    .computed()
                    .build(),
            )
            .block(
                NestedBlockBuilder::new("filter", NestingMode::List)
                    .description("One or more EC2 DescribeCustomerGateways filters")
                    .attribute(
                        AttributeBuilder::new("name", AttributeType::String)
                            .required()
                            .build(),
                    )
                    .attribute(
                        AttributeBuilder::new(
                            "values",
                            AttributeType::List(Box::new(AttributeType::String)),
                        )
                        .required()
                        .build(),
                    )
                    .build(),
            )
            .build();

        DataSourceSchemaResponse {
            schema,
            diagnostics: vec![],
        }
    }

    async fn validate(
        &self,
        _ctx: Context,
        request: ValidateDataSourceConfigRequest,
    ) -> ValidateDataSourceConfigResponse {
        let mut diagnostics = vec![];

        if let Err(diag) = lookup_filters(&request.config) {
            diagnostics.push(diag);
        }

        ValidateDataSourceConfigResponse { diagnostics }
    }

    async fn read(&self, _ctx: Context, request: ReadDataSourceRequest) -> ReadDataSourceResponse {
        let mut diagnostics = vec![];

        let provider_data = match &self.provider_data {
            Some(data) => data,
            None => {
                diagnostics.push(not_configured());
                return ReadDataSourceResponse {
                    state: request.config,
                    diagnostics,
                };
            }
        };

        let filters = match lookup_filters(&request.config) {
            Ok(filters) => filters,
            Err(diag) => {
                diagnostics.push(diag);
                return ReadDataSourceResponse {
                    state: request.config,
                    diagnostics,
                };
            }
        };
        let ids: Vec<String> = request
            .config
            .get_optional_string(&AttributePath::new("id"))
            .ok()
            .flatten()
            .into_iter()
            .collect();

        tracing::debug!(
            "Looking up customer gateway, ids: {:?}, filters: {:?}",
            ids,
            filters
        );

        let gateways = match provider_data
            .api
            .describe_customer_gateways(&ids, &filters)
            .await
        {
            Ok(gateways) => gateways,
            Err(e) => {
                diagnostics.push(Diagnostic::error(
                    "Failed to read customer gateways",
                    format!("API error: {}", e),
                ));
                return ReadDataSourceResponse {
                    state: request.config,
                    diagnostics,
                };
            }
        };

        let mut matches: Vec<_> = gateways.into_iter().filter(|g| !g.is_gone()).collect();
        let gateway = match matches.len() {
            1 => matches.remove(0),
            0 => {
                diagnostics.push(Diagnostic::error(
                    "no matching customer gateway found",
                    "Your query returned no results. Please change your search criteria and try again.",
                ));
                return ReadDataSourceResponse {
                    state: request.config,
                    diagnostics,
                };
            }
            n => {
                diagnostics.push(Diagnostic::error(
                    "multiple customer gateways matched",
                    format!(
                        "Your query returned {} results. Please use more specific search criteria to match a single customer gateway.",
                        n
                    ),
                ));
                return ReadDataSourceResponse {
                    state: request.config,
                    diagnostics,
                };
            }
        };

        let mut state = request.config;
        if let Err(e) = set_gateway_attributes(&mut state, &gateway, &provider_data.identity) {
            diagnostics.push(Diagnostic::error(
                "Failed to record customer gateway",
                e.to_string(),
            ));
        }

        ReadDataSourceResponse { state, diagnostics }
    }
}

#[async_trait]
impl DataSourceWithConfigure for CustomerGatewayDataSource {
    async fn configure(
        &mut self,
        _ctx: Context,
        request: ConfigureDataSourceRequest,
    ) -> ConfigureDataSourceResponse {
        let mut diagnostics = vec![];

        match AwsProviderData::from_provider_data(request.provider_data, "data source") {
            Ok(provider_data) => self.provider_data = Some(provider_data),
            Err(diag) => diagnostics.push(diag),
        }

        ConfigureDataSourceResponse { diagnostics }
    }
}
