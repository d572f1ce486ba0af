//! ACM PCA certificate authority resource implementation

use crate::api::{authority_status, CertificateAuthority, NewCertificateAuthority};
use crate::provider_data::{not_configured, AwsProviderData};
use crate::resources::wait_for;
use async_trait::async_trait;
use std::collections::BTreeMap;
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
use tfplug::schema::{AttributeBuilder, AttributeType, NestedBlockBuilder, NestingMode, SchemaBuilder};
use tfplug::types::{AttributePath, Diagnostic, Dynamic, DynamicValue};
use uuid::Uuid;

const CREATE_TIMEOUT: Duration = Duration::from_secs(60);

const DEFAULT_TYPE: &str = "SUBORDINATE";
const AUTHORITY_TYPES: [&str; 2] = ["ROOT", "SUBORDINATE"];
const DEFAULT_DELETION_DAYS: f64 = 30.0;
const MIN_DELETION_DAYS: f64 = 7.0;
const MAX_DELETION_DAYS: f64 = 30.0;

const KEY_ALGORITHMS: [&str; 4] = ["RSA_2048", "RSA_4096", "EC_prime256v1", "EC_secp384r1"];
const SIGNING_ALGORITHMS: [&str; 6] = [
    "SHA256WITHECDSA",
    "SHA384WITHECDSA",
    "SHA512WITHECDSA",
    "SHA256WITHRSA",
    "SHA384WITHRSA",
    "SHA512WITHRSA",
];

const CONFIGURATION: &str = "certificate_authority_configuration";

#[derive(Default)]
pub struct CertificateAuthorityResource {
    provider_data: Option<AwsProviderData>,
}

impl CertificateAuthorityResource {
    pub fn new() -> Self {
        Self::default()
    }
}

fn configuration_path(name: &str) -> AttributePath {
    AttributePath::new(CONFIGURATION).index(0).attribute(name)
}

fn common_name_path() -> AttributePath {
    configuration_path("subject").index(0).attribute("common_name")
}

fn deletion_days(state: &DynamicValue) -> f64 {
    state
        .get_number(&AttributePath::new("permanent_deletion_time_in_days"))
        .unwrap_or(DEFAULT_DELETION_DAYS)
}

fn set_authority_attributes(
    state: &mut DynamicValue,
    authority: &CertificateAuthority,
) -> tfplug::Result<()> {
    state.set_string(&AttributePath::new("id"), &authority.arn)?;
    state.set_string(&AttributePath::new("arn"), &authority.arn)?;
    state.set_string(&AttributePath::new("status"), &authority.status)?;
    state.set_string(&AttributePath::new("type"), &authority.authority_type)?;
    let days = deletion_days(state);
    state.set_number(&AttributePath::new("permanent_deletion_time_in_days"), days)?;

    let subject = BTreeMap::from([(
        "common_name".to_string(),
        authority
            .common_name
            .clone()
            .map(Dynamic::String)
            .unwrap_or(Dynamic::Null),
    )]);
    let configuration = BTreeMap::from([
        (
            "key_algorithm".to_string(),
            Dynamic::String(authority.key_algorithm.clone()),
        ),
        (
            "signing_algorithm".to_string(),
            Dynamic::String(authority.signing_algorithm.clone()),
        ),
        (
            "subject".to_string(),
            Dynamic::List(vec![Dynamic::Map(subject)]),
        ),
    ]);
    state.set_list(
        &AttributePath::new(CONFIGURATION),
        vec![Dynamic::Map(configuration)],
    )
}

fn check_one_of(
    diagnostics: &mut Vec<Diagnostic>,
    config: &DynamicValue,
    path: AttributePath,
    allowed: &[&str],
) {
    if let Ok(value) = config.get_string(&path) {
        if !allowed.contains(&value.as_str()) {
            diagnostics.push(
                Diagnostic::error(
                    "Invalid value",
                    format!("{} must be one of {:?}, got {:?}", path, allowed, value),
                )
                .with_attribute(path),
            );
        }
    }
}

#[async_trait]
impl Resource for CertificateAuthorityResource {
    fn type_name(&self) -> &str {
        "aws_acmpca_certificate_authority"
    }

    async fn schema(
        &self,
        _ctx: Context,
        _request: ResourceSchemaRequest,
    ) -> ResourceSchemaResponse {
        let subject = NestedBlockBuilder::new("subject", NestingMode::List)
            .description("Subject of the certificate authority's certificate")
            .attribute(
                AttributeBuilder::new("common_name", AttributeType::String)
                    .description("Fully qualified domain name (FQDN) associated with the certificate subject")
                    .optional()
                    .build(),
            )
            .min_items(1)
            .max_items(1)
            .build();

        let configuration = NestedBlockBuilder::new(CONFIGURATION, NestingMode::List)
            .description("Nested argument containing algorithms and certificate subject information")
            .attribute(
                AttributeBuilder::new("key_algorithm", AttributeType::String)
                    .description("Type of the public key algorithm and size, in bits, of the key pair")
                    .required()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("signing_algorithm", AttributeType::String)
                    .description("Name of the algorithm your private CA uses to sign certificate requests")
                    .required()
                    .build(),
            )
            .block(subject)
            .min_items(1)
            .max_items(1)
            .build();

        let schema = SchemaBuilder::new()
            .version(0)
            .description("Provides a resource to manage AWS Certificate Manager Private Certificate Authorities")
            .attribute(
                AttributeBuilder::new("id", AttributeType::String)
                    .description("ARN of the certificate authority")
                    .computed()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("arn", AttributeType::String)
                    .description("ARN of the certificate authority")
                    .computed()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("status", AttributeType::String)
                    .description("Status of the certificate authority")
                    .computed()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("type", AttributeType::String)
                    .description("Type of the certificate authority: ROOT or SUBORDINATE (default)")
                    .optional()
                    .computed()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("permanent_deletion_time_in_days", AttributeType::Number)
                    .description("Number of days to keep the authority restorable after deletion, 7 to 30 (default)")
                    .optional()
                    .computed()
                    .build(),
            )
            .block(configuration)
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
        let config = &request.config;

        check_one_of(
            &mut diagnostics,
            config,
            AttributePath::new("type"),
            &AUTHORITY_TYPES,
        );
        check_one_of(
            &mut diagnostics,
            config,
            configuration_path("key_algorithm"),
            &KEY_ALGORITHMS,
        );
        check_one_of(
            &mut diagnostics,
            config,
            configuration_path("signing_algorithm"),
            &SIGNING_ALGORITHMS,
        );

        let days_path = AttributePath::new("permanent_deletion_time_in_days");
        if let Ok(days) = config.get_number(&days_path) {
            if !(MIN_DELETION_DAYS..=MAX_DELETION_DAYS).contains(&days) || days.fract() != 0.0 {
                diagnostics.push(
                    Diagnostic::error(
                        "Invalid value",
                        format!(
                            "permanent_deletion_time_in_days must be a whole number between {} and {}, got {}",
                            MIN_DELETION_DAYS, MAX_DELETION_DAYS, days
                        ),
                    )
                    .with_attribute(days_path),
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

        let input = match self.extract_authority_config(&request.config) {
            Ok(input) => input,
            Err(diag) => {
                diagnostics.push(diag);
                return CreateResourceResponse {
                    new_state: request.planned_state,
                    diagnostics,
                };
            }
        };

        let arn = match provider_data.api.create_certificate_authority(&input).await {
            Ok(arn) => arn,
            Err(e) => {
                diagnostics.push(Diagnostic::error(
                    "Failed to create certificate authority",
                    format!("API error: {}", e),
                ));
                return CreateResourceResponse {
                    new_state: request.planned_state,
                    diagnostics,
                };
            }
        };
        tracing::debug!("Created certificate authority {}", arn);

        let mut new_state = request.config;
        let _ = new_state.set_string(&AttributePath::new("id"), &arn);

        let api = provider_data.api.as_ref();
        let settled = wait_for(&ctx, &format!("certificate authority {}", arn), CREATE_TIMEOUT, || async {
            let authority = api.describe_certificate_authority(&arn).await?;
            Ok(authority.filter(|a| a.status != authority_status::CREATING))
        })
        .await;

        match settled {
            Ok(authority) if authority.status == authority_status::FAILED => {
                diagnostics.push(Diagnostic::error(
                    "Failed to create certificate authority",
                    format!("certificate authority {} failed to create", arn),
                ));
            }
            Ok(authority) => {
                if let Err(e) = set_authority_attributes(&mut new_state, &authority) {
                    diagnostics.push(Diagnostic::error(
                        "Failed to record certificate authority state",
                        e.to_string(),
                    ));
                }
            }
            Err(message) => {
                diagnostics.push(Diagnostic::error(
                    "Certificate authority did not settle",
                    message,
                ));
            }
        }

        CreateResourceResponse {
            new_state,
            diagnostics,
        }
    }

    async fn read(&self, _ctx: Context, request: ReadResourceRequest) -> ReadResourceResponse {
        let mut diagnostics = vec![];

        let arn = match request.current_state.get_string(&AttributePath::new("id")) {
            Ok(arn) => arn,
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

        match provider_data.api.describe_certificate_authority(&arn).await {
            Ok(Some(authority)) if authority.status != authority_status::DELETED => {
                let mut new_state = request.current_state.clone();
                if let Err(e) = set_authority_attributes(&mut new_state, &authority) {
                    diagnostics.push(Diagnostic::error(
                        "Failed to record certificate authority state",
                        e.to_string(),
                    ));
                }
                ReadResourceResponse {
                    new_state: Some(new_state),
                    diagnostics,
                }
            }
            Ok(_) => ReadResourceResponse {
                new_state: None,
                diagnostics,
            },
            Err(e) => {
                diagnostics.push(Diagnostic::error(
                    "Failed to read certificate authority",
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

        // Only the deletion window can change; it is applied when the authority is deleted
        let changed = [
            AttributePath::new("type"),
            configuration_path("key_algorithm"),
            configuration_path("signing_algorithm"),
            common_name_path(),
        ]
        .into_iter()
        .filter(|path| {
            let after = request.config.get_optional_string(path).ok().flatten();
            after.is_some() && after != request.prior_state.get_optional_string(path).ok().flatten()
        });
        for path in changed {
            diagnostics.push(
                Diagnostic::error(
                    "Cannot update certificate authority",
                    format!("{} cannot be changed without replacing the certificate authority", path),
                )
                .with_attribute(path),
            );
        }

        if !diagnostics.is_empty() {
            return UpdateResourceResponse {
                new_state: request.prior_state,
                diagnostics,
            };
        }

        let mut new_state = request.prior_state;
        let _ = new_state.set_number(
            &AttributePath::new("permanent_deletion_time_in_days"),
            deletion_days(&request.config),
        );

        UpdateResourceResponse {
            new_state,
            diagnostics,
        }
    }

    async fn delete(&self, _ctx: Context, request: DeleteResourceRequest) -> DeleteResourceResponse {
        let mut diagnostics = vec![];

        let provider_data = match &self.provider_data {
            Some(data) => data,
            None => {
                diagnostics.push(not_configured());
                return DeleteResourceResponse { diagnostics };
            }
        };

        let arn = match request.prior_state.get_string(&AttributePath::new("id")) {
            Ok(arn) => arn,
            Err(_) => return DeleteResourceResponse { diagnostics },
        };
        let api = &provider_data.api;

        let status = match api.describe_certificate_authority(&arn).await {
            Ok(Some(authority)) => authority.status,
            Ok(None) => return DeleteResourceResponse { diagnostics },
            Err(e) => {
                diagnostics.push(Diagnostic::error(
                    "Failed to read certificate authority",
                    format!("API error: {}", e),
                ));
                return DeleteResourceResponse { diagnostics };
            }
        };

        if status == authority_status::DELETED {
            return DeleteResourceResponse { diagnostics };
        }

        if status == authority_status::ACTIVE {
            tracing::debug!("Disabling certificate authority {} before deletion", arn);
            if let Err(e) = api
                .update_certificate_authority_status(&arn, authority_status::DISABLED)
                .await
            {
                diagnostics.push(Diagnostic::error(
                    "Failed to disable certificate authority",
                    format!("API error: {}", e),
                ));
                return DeleteResourceResponse { diagnostics };
            }
        }

        let days = deletion_days(&request.prior_state) as i32;
        match api.delete_certificate_authority(&arn, days).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => diagnostics.push(Diagnostic::error(
                "Failed to delete certificate authority",
                format!("API error: {}", e),
            )),
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

impl CertificateAuthorityResource {
    /// Extract certificate authority configuration from terraform configuration
    fn extract_authority_config(
        &self,
        config: &DynamicValue,
    ) -> Result<NewCertificateAuthority, Diagnostic> {
        let authority_type = config
            .get_optional_string(&AttributePath::new("type"))
            .ok()
            .flatten()
            .unwrap_or_else(|| DEFAULT_TYPE.to_string());

        let key_algorithm = config
            .get_string(&configuration_path("key_algorithm"))
            .map_err(|_| {
                Diagnostic::error(
                    "Missing key_algorithm",
                    "certificate_authority_configuration.key_algorithm is required",
                )
            })?;
        let signing_algorithm = config
            .get_string(&configuration_path("signing_algorithm"))
            .map_err(|_| {
                Diagnostic::error(
                    "Missing signing_algorithm",
                    "certificate_authority_configuration.signing_algorithm is required",
                )
            })?;
        let common_name = config.get_string(&common_name_path()).map_err(|_| {
            Diagnostic::error(
                "Missing common_name",
                "certificate_authority_configuration.subject.common_name is required",
            )
        })?;

        Ok(NewCertificateAuthority {
            authority_type,
            key_algorithm,
            signing_algorithm,
            common_name,
            idempotency_token: Uuid::new_v4().simple().to_string(),
        })
    }
}

#[async_trait]
impl ResourceWithConfigure for CertificateAuthorityResource {
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
