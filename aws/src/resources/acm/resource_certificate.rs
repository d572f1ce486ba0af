//! ACM certificate resource implementation
//!
//! Only private certificates issued by an ACM PCA certificate authority are
//! supported: the certificate is requested against `certificate_authority_arn`.

use crate::api::Certificate;
use crate::provider_data::{not_configured, AwsProviderData};
use crate::resources::wait_for;
use async_trait::async_trait;
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

/// Certificates stay in use for a while after the gateway using them is deleted
const DELETE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

const REPLACE_ATTRIBUTES: [&str; 2] = ["domain_name", "certificate_authority_arn"];

#[derive(Default)]
pub struct AcmCertificateResource {
    provider_data: Option<AwsProviderData>,
}

impl AcmCertificateResource {
    pub fn new() -> Self {
        Self::default()
    }
}

fn set_certificate_attributes(
    state: &mut DynamicValue,
    certificate: &Certificate,
) -> tfplug::Result<()> {
    state.set_string(&AttributePath::new("id"), &certificate.arn)?;
    state.set_string(&AttributePath::new("arn"), &certificate.arn)?;
    state.set_string(&AttributePath::new("domain_name"), &certificate.domain_name)?;
    state.set_string(&AttributePath::new("status"), &certificate.status)?;
    state.set_optional_string(
        &AttributePath::new("certificate_authority_arn"),
        certificate.certificate_authority_arn.as_deref(),
    )
}

#[async_trait]
impl Resource for AcmCertificateResource {
    fn type_name(&self) -> &str {
        "aws_acm_certificate"
    }

    async fn schema(
        &self,
        _ctx: Context,
        _request: ResourceSchemaRequest,
    ) -> ResourceSchemaResponse {
        let schema = SchemaBuilder::new()
            .version(0)
            .description("Requests a private certificate from AWS Certificate Manager")
            .attribute(
                AttributeBuilder::new("id", AttributeType::String)
                    .description("ARN of the certificate")
                    .computed()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("arn", AttributeType::String)
                    .description("ARN of the certificate")
                    .computed()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("domain_name", AttributeType::String)
                    .description("Fully qualified domain name for the certificate")
                    .required()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("certificate_authority_arn", AttributeType::String)
                    .description("ARN of the ACM PCA authority that issues the certificate")
                    .required()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("status", AttributeType::String)
                    .description("Status of the certificate")
                    .computed()
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

        if let Ok(domain_name) = request.config.get_string(&AttributePath::new("domain_name")) {
            if domain_name.is_empty() || domain_name.len() > 253 || domain_name.ends_with('.') {
                diagnostics.push(
                    Diagnostic::error(
                        "Invalid domain_name",
                        format!("{:?} is not a valid domain name", domain_name),
                    )
                    .with_attribute(AttributePath::new("domain_name")),
                );
            }
        }

        if let Ok(arn) = request
            .config
            .get_string(&AttributePath::new("certificate_authority_arn"))
        {
            if !arn.starts_with("arn:") {
                diagnostics.push(
                    Diagnostic::error(
                        "Invalid certificate_authority_arn",
                        format!("{:?} is not an ARN", arn),
                    )
                    .with_attribute(AttributePath::new("certificate_authority_arn")),
                );
            }
        }

        ValidateResourceConfigResponse { diagnostics }
    }

    async fn create(&self, _ctx: Context, request: CreateResourceRequest) -> CreateResourceResponse {
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

        let domain_name = request.config.get_string(&AttributePath::new("domain_name"));
        let authority_arn = request
            .config
            .get_string(&AttributePath::new("certificate_authority_arn"));
        let (domain_name, authority_arn) = match (domain_name, authority_arn) {
            (Ok(domain_name), Ok(authority_arn)) => (domain_name, authority_arn),
            _ => {
                diagnostics.push(Diagnostic::error(
                    "Missing certificate arguments",
                    "domain_name and certificate_authority_arn are required",
                ));
                return CreateResourceResponse {
                    new_state: request.planned_state,
                    diagnostics,
                };
            }
        };

        let arn = match provider_data
            .api
            .request_certificate(&domain_name, &authority_arn)
            .await
        {
            Ok(arn) => arn,
            Err(e) => {
                diagnostics.push(Diagnostic::error(
                    "Failed to request certificate",
                    format!("API error: {}", e),
                ));
                return CreateResourceResponse {
                    new_state: request.planned_state,
                    diagnostics,
                };
            }
        };
        tracing::debug!("Requested certificate {} for {}", arn, domain_name);

        let mut new_state = request.config;
        let _ = new_state.set_string(&AttributePath::new("id"), &arn);

        match provider_data.api.describe_certificate(&arn).await {
            Ok(Some(certificate)) => {
                if let Err(e) = set_certificate_attributes(&mut new_state, &certificate) {
                    diagnostics.push(Diagnostic::error(
                        "Failed to record certificate state",
                        e.to_string(),
                    ));
                }
            }
            Ok(None) => diagnostics.push(Diagnostic::error(
                "Failed to read certificate",
                format!("certificate {} not found after request", arn),
            )),
            Err(e) => diagnostics.push(Diagnostic::error(
                "Failed to read certificate",
                format!("API error: {}", e),
            )),
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

        match provider_data.api.describe_certificate(&arn).await {
            Ok(Some(certificate)) => {
                let mut new_state = request.current_state.clone();
                if let Err(e) = set_certificate_attributes(&mut new_state, &certificate) {
                    diagnostics.push(Diagnostic::error(
                        "Failed to record certificate state",
                        e.to_string(),
                    ));
                }
                ReadResourceResponse {
                    new_state: Some(new_state),
                    diagnostics,
                }
            }
            Ok(None) => ReadResourceResponse {
                new_state: None,
                diagnostics,
            },
            Err(e) => {
                diagnostics.push(Diagnostic::error(
                    "Failed to read certificate",
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
        let diagnostics: Vec<Diagnostic> = REPLACE_ATTRIBUTES
            .iter()
            .filter(|attribute| {
                let path = AttributePath::new(attribute);
                request.prior_state.get_optional_string(&path).ok().flatten()
                    != request.config.get_optional_string(&path).ok().flatten()
            })
            .map(|attribute| {
                Diagnostic::error(
                    "Cannot update certificate",
                    format!("{} cannot be changed without replacing the certificate", attribute),
                )
                .with_attribute(AttributePath::new(attribute))
            })
            .collect();

        UpdateResourceResponse {
            new_state: request.prior_state,
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

        let arn = match request.prior_state.get_string(&AttributePath::new("id")) {
            Ok(arn) => arn,
            Err(_) => return DeleteResourceResponse { diagnostics },
        };

        let api = provider_data.api.as_ref();
        let deleted = wait_for(&ctx, &format!("certificate {} to be released", arn), DELETE_TIMEOUT, || async {
            match api.delete_certificate(&arn).await {
                Ok(()) => Ok(Some(())),
                Err(e) if e.is_not_found() => Ok(Some(())),
                Err(e) if e.code() == Some("ResourceInUseException") => {
                    tracing::debug!("Certificate {} still in use", arn);
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        })
        .await;

        if let Err(message) = deleted {
            diagnostics.push(Diagnostic::error("Failed to delete certificate", message));
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

#[async_trait]
impl ResourceWithConfigure for AcmCertificateResource {
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

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::api::{
        authority_status, CloudApi, MemoryCloud, NewCertificateAuthority, NewCustomerGateway,
    };
    use crate::provider_data::Identity;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    async fn setup() -> (Arc<MemoryCloud>, AcmCertificateResource, String) {
        let cloud = Arc::new(MemoryCloud::default());
        let authority_arn = cloud
            .create_certificate_authority(&NewCertificateAuthority {
                authority_type: "ROOT".to_string(),
                key_algorithm: "RSA_4096".to_string(),
                signing_algorithm: "SHA512WITHRSA".to_string(),
                common_name: "terraformtesting.com".to_string(),
                idempotency_token: "token".to_string(),
            })
            .await
            .unwrap();

        let mut resource = AcmCertificateResource::new();
        let data = AwsProviderData::new(
            cloud.clone(),
            Identity::new("123456789012", "us-west-2"),
        );
        resource
            .configure(
                Context::new(),
                ConfigureResourceRequest {
                    provider_data: Some(Arc::new(data)),
                },
            )
            .await;
        (cloud, resource, authority_arn)
    }

    fn config(authority_arn: &str) -> DynamicValue {
        let mut config = DynamicValue::object();
        config
            .set_string(
                &AttributePath::new("domain_name"),
                "tf-acc-test-1.terraformtesting.com",
            )
            .unwrap();
        config
            .set_string(&AttributePath::new("certificate_authority_arn"), authority_arn)
            .unwrap();
        config
    }

    async fn create(resource: &AcmCertificateResource, config: DynamicValue) -> CreateResourceResponse {
        resource
            .create(
                Context::new(),
                CreateResourceRequest {
                    type_name: "aws_acm_certificate".to_string(),
                    planned_state: config.clone(),
                    config,
                },
            )
            .await
    }

    #[tokio::test]
    async fn create_reports_issuance_status() {
        let (cloud, resource, authority_arn) = setup().await;

        let pending = create(&resource, config(&authority_arn)).await;
        assert!(pending.diagnostics.is_empty());
        assert_eq!(
            pending.new_state.get_string(&AttributePath::new("status")).unwrap(),
            "FAILED"
        );

        cloud
            .update_certificate_authority_status(&authority_arn, authority_status::ACTIVE)
            .await
            .unwrap();
        let issued = create(&resource, config(&authority_arn)).await;
        assert_eq!(
            issued.new_state.get_string(&AttributePath::new("status")).unwrap(),
            "ISSUED"
        );
        assert!(issued
            .new_state
            .get_string(&AttributePath::new("arn"))
            .unwrap()
            .starts_with("arn:aws:acm:us-west-2:123456789012:certificate/"));
    }

    #[tokio::test]
    async fn create_against_missing_authority_fails() {
        let (_cloud, resource, _) = setup().await;

        let response = create(
            &resource,
            config("arn:aws:acm-pca:us-west-2:123456789012:certificate-authority/missing"),
        )
        .await;

        assert_eq!(response.diagnostics[0].summary, "Failed to request certificate");
        assert!(response.diagnostics[0].detail.contains("ResourceNotFoundException"));
    }

    #[tokio::test]
    async fn delete_waits_while_certificate_is_in_use() {
        let (cloud, resource, authority_arn) = setup().await;
        let state = create(&resource, config(&authority_arn)).await.new_state;
        let arn = state.get_string(&AttributePath::new("arn")).unwrap();

        let gateway = cloud
            .create_customer_gateway(&NewCustomerGateway {
                bgp_asn: 65001,
                ip_address: "50.0.0.77".to_string(),
                gateway_type: "ipsec.1".to_string(),
                certificate_arn: Some(arn.clone()),
                device_name: None,
                tags: BTreeMap::new(),
            })
            .await
            .unwrap();

        let releaser = cloud.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            releaser.delete_customer_gateway(&gateway.id).await.unwrap();
        });

        let response = resource
            .delete(
                Context::new(),
                DeleteResourceRequest {
                    type_name: "aws_acm_certificate".to_string(),
                    prior_state: state,
                },
            )
            .await;

        assert!(response.diagnostics.is_empty(), "{:?}", response.diagnostics);
        assert!(cloud.certificate(&arn).is_none());
        let attempts = cloud
            .calls()
            .iter()
            .filter(|c| c.as_str() == "DeleteCertificate")
            .count();
        assert!(attempts >= 2);
    }

    #[tokio::test]
    async fn update_rejects_any_change() {
        let (_cloud, resource, authority_arn) = setup().await;
        let prior = create(&resource, config(&authority_arn)).await.new_state;

        let mut changed = config(&authority_arn);
        changed
            .set_string(&AttributePath::new("domain_name"), "other.terraformtesting.com")
            .unwrap();
        let response = resource
            .update(
                Context::new(),
                UpdateResourceRequest {
                    type_name: "aws_acm_certificate".to_string(),
                    prior_state: prior,
                    planned_state: changed.clone(),
                    config: changed,
                },
            )
            .await;

        assert_eq!(response.diagnostics.len(), 1);
        assert_eq!(
            response.diagnostics[0].attribute,
            Some(AttributePath::new("domain_name"))
        );
    }
}
