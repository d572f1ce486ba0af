//! AWS SDK backed implementation of [`CloudApi`]

use super::{
    with_retry, ApiError, CallerIdentity, Certificate, CertificateAuthority, CloudApi,
    CustomerGateway, Filter, NewCertificateAuthority, NewCustomerGateway, RetryConfig,
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_acmpca::types::{
    Asn1Subject, CertificateAuthorityConfiguration, CertificateAuthorityStatus,
    CertificateAuthorityType, KeyAlgorithm, SigningAlgorithm,
};
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ec2::types::{GatewayType, ResourceType, Tag, TagSpecification};
use aws_sdk_sts::config::Credentials;
use std::collections::BTreeMap;

const CREDENTIALS_SOURCE: &str = "terraform-provider-aws";

/// Connection settings resolved from the provider block
#[derive(Debug, Clone, Default)]
pub struct SdkConfig {
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Overrides the endpoint of every service (LocalStack, test servers)
    pub endpoint: Option<String>,
    pub retry: RetryConfig,
}

#[derive(Clone)]
pub struct SdkCloud {
    ec2: aws_sdk_ec2::Client,
    acm: aws_sdk_acm::Client,
    pca: aws_sdk_acmpca::Client,
    sts: aws_sdk_sts::Client,
    retry: RetryConfig,
}

impl SdkCloud {
    pub async fn new(config: &SdkConfig) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                CREDENTIALS_SOURCE,
            ));
        }
        let shared_config = loader.load().await;

        Self {
            ec2: aws_sdk_ec2::Client::new(&shared_config),
            acm: aws_sdk_acm::Client::new(&shared_config),
            pca: aws_sdk_acmpca::Client::new(&shared_config),
            sts: aws_sdk_sts::Client::new(&shared_config),
            retry: config.retry.clone(),
        }
    }
}

fn sdk_error<E, R>(operation: &'static str, err: SdkError<E, R>) -> ApiError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::ServiceError(service) => {
            let inner = service.err();
            ApiError::Service {
                operation,
                code: inner.code().unwrap_or("Unknown").to_string(),
                message: inner.message().unwrap_or_default().to_string(),
            }
        }
        _ => ApiError::Transport {
            operation,
            message: DisplayErrorContext(&err).to_string(),
        },
    }
}

fn ec2_tags(tags: &BTreeMap<String, String>) -> Vec<Tag> {
    tags.iter()
        .map(|(k, v)| Tag::builder().key(k).value(v).build())
        .collect()
}

fn from_ec2_gateway(gateway: &aws_sdk_ec2::types::CustomerGateway) -> Result<CustomerGateway, ApiError> {
    let id = gateway
        .customer_gateway_id()
        .ok_or_else(|| ApiError::Invalid("customer gateway without an id".to_string()))?;

    // 4-byte ASNs are only reported in the extended field
    let bgp_asn = gateway
        .bgp_asn_extended()
        .or(gateway.bgp_asn())
        .unwrap_or_default();

    Ok(CustomerGateway {
        id: id.to_string(),
        bgp_asn: bgp_asn.to_string(),
        ip_address: gateway.ip_address().map(str::to_string),
        gateway_type: gateway.r#type().unwrap_or_default().to_string(),
        state: gateway.state().unwrap_or_default().to_string(),
        certificate_arn: gateway.certificate_arn().map(str::to_string),
        device_name: gateway.device_name().map(str::to_string),
        tags: gateway
            .tags()
            .iter()
            .filter_map(|t| Some((t.key()?.to_string(), t.value().unwrap_or_default().to_string())))
            .collect(),
    })
}

#[async_trait]
impl CloudApi for SdkCloud {
    async fn caller_identity(&self) -> Result<CallerIdentity, ApiError> {
        let output = with_retry(&self.retry, "GetCallerIdentity", || async {
            self.sts
                .get_caller_identity()
                .send()
                .await
                .map_err(|e| sdk_error("GetCallerIdentity", e))
        })
        .await?;

        Ok(CallerIdentity {
            account_id: output
                .account()
                .ok_or_else(|| ApiError::Invalid("GetCallerIdentity returned no account".to_string()))?
                .to_string(),
            arn: output.arn().unwrap_or_default().to_string(),
            user_id: output.user_id().unwrap_or_default().to_string(),
        })
    }

    async fn create_customer_gateway(
        &self,
        input: &NewCustomerGateway,
    ) -> Result<CustomerGateway, ApiError> {
        tracing::debug!("CreateCustomerGateway: {}", serde_json::to_string(input).unwrap_or_default());

        let output = with_retry(&self.retry, "CreateCustomerGateway", || async {
            let mut request = self
                .ec2
                .create_customer_gateway()
                .ip_address(&input.ip_address)
                .r#type(GatewayType::from(input.gateway_type.as_str()))
                .set_certificate_arn(input.certificate_arn.clone())
                .set_device_name(input.device_name.clone());
            request = match i32::try_from(input.bgp_asn) {
                Ok(asn) => request.bgp_asn(asn),
                Err(_) => request.bgp_asn_extended(input.bgp_asn),
            };
            if !input.tags.is_empty() {
                request = request.tag_specifications(
                    TagSpecification::builder()
                        .resource_type(ResourceType::CustomerGateway)
                        .set_tags(Some(ec2_tags(&input.tags)))
                        .build(),
                );
            }
            request
                .send()
                .await
                .map_err(|e| sdk_error("CreateCustomerGateway", e))
        })
        .await?;

        let gateway = output
            .customer_gateway()
            .ok_or_else(|| ApiError::Invalid("CreateCustomerGateway returned no gateway".to_string()))?;
        from_ec2_gateway(gateway)
    }

    async fn describe_customer_gateways(
        &self,
        ids: &[String],
        filters: &[Filter],
    ) -> Result<Vec<CustomerGateway>, ApiError> {
        let result = with_retry(&self.retry, "DescribeCustomerGateways", || async {
            let ec2_filters: Vec<aws_sdk_ec2::types::Filter> = filters
                .iter()
                .map(|f| {
                    aws_sdk_ec2::types::Filter::builder()
                        .name(&f.name)
                        .set_values(Some(f.values.clone()))
                        .build()
                })
                .collect();

            self.ec2
                .describe_customer_gateways()
                .set_customer_gateway_ids((!ids.is_empty()).then(|| ids.to_vec()))
                .set_filters((!ec2_filters.is_empty()).then_some(ec2_filters))
                .send()
                .await
                .map_err(|e| sdk_error("DescribeCustomerGateways", e))
        })
        .await;

        let output = match result {
            Ok(output) => output,
            Err(e) if e.code() == Some("InvalidCustomerGatewayID.NotFound") => {
                tracing::debug!("DescribeCustomerGateways: {}", e);
                return Ok(vec![]);
            }
            Err(e) => return Err(e),
        };

        output
            .customer_gateways()
            .iter()
            .map(from_ec2_gateway)
            .collect()
    }

    async fn delete_customer_gateway(&self, id: &str) -> Result<(), ApiError> {
        let result = with_retry(&self.retry, "DeleteCustomerGateway", || async {
            self.ec2
                .delete_customer_gateway()
                .customer_gateway_id(id)
                .send()
                .await
                .map_err(|e| sdk_error("DeleteCustomerGateway", e))
        })
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn create_tags(
        &self,
        id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), ApiError> {
        with_retry(&self.retry, "CreateTags", || async {
            self.ec2
                .create_tags()
                .resources(id)
                .set_tags(Some(ec2_tags(tags)))
                .send()
                .await
                .map_err(|e| sdk_error("CreateTags", e))
        })
        .await?;
        Ok(())
    }

    async fn delete_tags(&self, id: &str, keys: &[String]) -> Result<(), ApiError> {
        with_retry(&self.retry, "DeleteTags", || async {
            self.ec2
                .delete_tags()
                .resources(id)
                .set_tags(Some(keys.iter().map(|k| Tag::builder().key(k).build()).collect()))
                .send()
                .await
                .map_err(|e| sdk_error("DeleteTags", e))
        })
        .await?;
        Ok(())
    }

    async fn create_certificate_authority(
        &self,
        input: &NewCertificateAuthority,
    ) -> Result<String, ApiError> {
        let configuration = CertificateAuthorityConfiguration::builder()
            .key_algorithm(KeyAlgorithm::from(input.key_algorithm.as_str()))
            .signing_algorithm(SigningAlgorithm::from(input.signing_algorithm.as_str()))
            .subject(Asn1Subject::builder().common_name(&input.common_name).build())
            .build()
            .map_err(|e| ApiError::Invalid(e.to_string()))?;

        let output = with_retry(&self.retry, "CreateCertificateAuthority", || async {
            self.pca
                .create_certificate_authority()
                .certificate_authority_type(CertificateAuthorityType::from(
                    input.authority_type.as_str(),
                ))
                .certificate_authority_configuration(configuration.clone())
                .idempotency_token(&input.idempotency_token)
                .send()
                .await
                .map_err(|e| sdk_error("CreateCertificateAuthority", e))
        })
        .await?;

        output
            .certificate_authority_arn()
            .map(str::to_string)
            .ok_or_else(|| ApiError::Invalid("CreateCertificateAuthority returned no ARN".to_string()))
    }

    async fn describe_certificate_authority(
        &self,
        arn: &str,
    ) -> Result<Option<CertificateAuthority>, ApiError> {
        let result = with_retry(&self.retry, "DescribeCertificateAuthority", || async {
            self.pca
                .describe_certificate_authority()
                .certificate_authority_arn(arn)
                .send()
                .await
                .map_err(|e| sdk_error("DescribeCertificateAuthority", e))
        })
        .await;

        let output = match result {
            Ok(output) => output,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let Some(authority) = output.certificate_authority() else {
            return Ok(None);
        };
        let configuration = authority.certificate_authority_configuration();

        Ok(Some(CertificateAuthority {
            arn: authority.arn().unwrap_or(arn).to_string(),
            authority_type: authority
                .r#type()
                .map(|t| t.as_str().to_string())
                .unwrap_or_default(),
            status: authority
                .status()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            key_algorithm: configuration
                .map(|c| c.key_algorithm().as_str().to_string())
                .unwrap_or_default(),
            signing_algorithm: configuration
                .map(|c| c.signing_algorithm().as_str().to_string())
                .unwrap_or_default(),
            common_name: configuration
                .and_then(|c| c.subject())
                .and_then(|s| s.common_name())
                .map(str::to_string),
        }))
    }

    async fn update_certificate_authority_status(
        &self,
        arn: &str,
        status: &str,
    ) -> Result<(), ApiError> {
        with_retry(&self.retry, "UpdateCertificateAuthority", || async {
            self.pca
                .update_certificate_authority()
                .certificate_authority_arn(arn)
                .status(CertificateAuthorityStatus::from(status))
                .send()
                .await
                .map_err(|e| sdk_error("UpdateCertificateAuthority", e))
        })
        .await?;
        Ok(())
    }

    async fn delete_certificate_authority(
        &self,
        arn: &str,
        permanent_deletion_time_in_days: i32,
    ) -> Result<(), ApiError> {
        let result = with_retry(&self.retry, "DeleteCertificateAuthority", || async {
            self.pca
                .delete_certificate_authority()
                .certificate_authority_arn(arn)
                .permanent_deletion_time_in_days(permanent_deletion_time_in_days)
                .send()
                .await
                .map_err(|e| sdk_error("DeleteCertificateAuthority", e))
        })
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn request_certificate(
        &self,
        domain_name: &str,
        certificate_authority_arn: &str,
    ) -> Result<String, ApiError> {
        let output = with_retry(&self.retry, "RequestCertificate", || async {
            self.acm
                .request_certificate()
                .domain_name(domain_name)
                .certificate_authority_arn(certificate_authority_arn)
                .send()
                .await
                .map_err(|e| sdk_error("RequestCertificate", e))
        })
        .await?;

        output
            .certificate_arn()
            .map(str::to_string)
            .ok_or_else(|| ApiError::Invalid("RequestCertificate returned no ARN".to_string()))
    }

    async fn describe_certificate(&self, arn: &str) -> Result<Option<Certificate>, ApiError> {
        let result = with_retry(&self.retry, "DescribeCertificate", || async {
            self.acm
                .describe_certificate()
                .certificate_arn(arn)
                .send()
                .await
                .map_err(|e| sdk_error("DescribeCertificate", e))
        })
        .await;

        let output = match result {
            Ok(output) => output,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(output.certificate().map(|detail| Certificate {
            arn: detail.certificate_arn().unwrap_or(arn).to_string(),
            domain_name: detail.domain_name().unwrap_or_default().to_string(),
            status: detail
                .status()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            certificate_authority_arn: detail.certificate_authority_arn().map(str::to_string),
        }))
    }

    async fn delete_certificate(&self, arn: &str) -> Result<(), ApiError> {
        let result = with_retry(&self.retry, "DeleteCertificate", || async {
            self.acm
                .delete_certificate()
                .certificate_arn(arn)
                .send()
                .await
                .map_err(|e| sdk_error("DeleteCertificate", e))
        })
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
#[path = "./sdk_test.rs"]
mod sdk_test;
