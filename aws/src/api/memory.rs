//! In-process implementation of [`CloudApi`]
//!
//! Objects settle immediately: gateways are `available` as soon as they are
//! created and `deleted` as soon as they are deleted. Deleted gateways stay
//! visible to describe calls, like they do in EC2 for about an hour.

use super::{
    authority_status, gateway_state, ApiError, CallerIdentity, Certificate, CertificateAuthority,
    CloudApi, CustomerGateway, Filter, NewCertificateAuthority, NewCustomerGateway,
};
use async_trait::async_trait;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

pub const ACCOUNT_ID: &str = "123456789012";

#[derive(Default)]
struct Inner {
    gateways: BTreeMap<String, CustomerGateway>,
    authorities: BTreeMap<String, CertificateAuthority>,
    /// Idempotency token to authority ARN
    authority_tokens: HashMap<String, String>,
    certificates: BTreeMap<String, Certificate>,
    /// Operation name to error code, consumed by the next call
    failures: HashMap<String, String>,
    calls: Vec<String>,
}

pub struct MemoryCloud {
    region: String,
    inner: Mutex<Inner>,
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new("us-west-2")
    }
}

fn hex_id(len: usize) -> String {
    Uuid::new_v4().simple().to_string()[..len].to_string()
}

impl MemoryCloud {
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Make the next call of `operation` fail with the service error `code`
    pub fn fail_next(&self, operation: &str, code: &str) {
        self.lock()
            .failures
            .insert(operation.to_string(), code.to_string());
    }

    /// Operation names in the order they were called
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn gateway(&self, id: &str) -> Option<CustomerGateway> {
        self.lock().gateways.get(id).cloned()
    }

    pub fn authority(&self, arn: &str) -> Option<CertificateAuthority> {
        self.lock().authorities.get(arn).cloned()
    }

    pub fn certificate(&self, arn: &str) -> Option<Certificate> {
        self.lock().certificates.get(arn).cloned()
    }

    /// Change a gateway's state out of band, as another client would
    pub fn set_gateway_state(&self, id: &str, state: &str) {
        if let Some(gateway) = self.lock().gateways.get_mut(id) {
            gateway.state = state.to_string();
        }
    }

    /// Record the call and return an injected failure, if any
    fn begin(&self, inner: &mut Inner, operation: &'static str) -> Result<(), ApiError> {
        inner.calls.push(operation.to_string());
        match inner.failures.remove(operation) {
            Some(code) => Err(ApiError::Service {
                operation,
                code,
                message: format!("injected failure for {}", operation),
            }),
            None => Ok(()),
        }
    }

    fn arn(&self, service: &str, resource: &str) -> String {
        format!("arn:aws:{}:{}:{}:{}", service, self.region, ACCOUNT_ID, resource)
    }
}

fn matches_filter(gateway: &CustomerGateway, filter: &Filter) -> bool {
    let candidates: Vec<&str> = match filter.name.as_str() {
        "customer-gateway-id" => vec![gateway.id.as_str()],
        "bgp-asn" => vec![gateway.bgp_asn.as_str()],
        "ip-address" => gateway.ip_address.as_deref().into_iter().collect(),
        "state" => vec![gateway.state.as_str()],
        "type" => vec![gateway.gateway_type.as_str()],
        "tag-key" => gateway.tags.keys().map(String::as_str).collect(),
        name => match name.strip_prefix("tag:") {
            Some(key) => gateway.tags.get(key).map(String::as_str).into_iter().collect(),
            None => vec![],
        },
    };

    filter
        .values
        .iter()
        .any(|wanted| candidates.iter().any(|c| glob_match(wanted, c)))
}

/// EC2 filter values accept `*` and `?` wildcards
fn glob_match(pattern: &str, value: &str) -> bool {
    let translated: String = pattern
        .chars()
        .map(|c| match c {
            '*' => ".*".to_string(),
            '?' => ".".to_string(),
            c => regex::escape(&c.to_string()),
        })
        .collect();

    Regex::new(&format!("(?s)^{}$", translated))
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

#[async_trait]
impl CloudApi for MemoryCloud {
    async fn caller_identity(&self) -> Result<CallerIdentity, ApiError> {
        let mut inner = self.lock();
        self.begin(&mut inner, "GetCallerIdentity")?;
        Ok(CallerIdentity {
            account_id: ACCOUNT_ID.to_string(),
            arn: format!("arn:aws:iam::{}:user/terraform", ACCOUNT_ID),
            user_id: "AIDAEXAMPLE".to_string(),
        })
    }

    async fn create_customer_gateway(
        &self,
        input: &NewCustomerGateway,
    ) -> Result<CustomerGateway, ApiError> {
        let mut inner = self.lock();
        self.begin(&mut inner, "CreateCustomerGateway")?;

        if let Some(arn) = &input.certificate_arn {
            if !inner.certificates.contains_key(arn) {
                return Err(ApiError::Service {
                    operation: "CreateCustomerGateway",
                    code: "InvalidParameterValue".to_string(),
                    message: format!("certificate {} does not exist", arn),
                });
            }
        }

        let gateway = CustomerGateway {
            id: format!("cgw-{}", hex_id(17)),
            bgp_asn: input.bgp_asn.to_string(),
            ip_address: Some(input.ip_address.clone()),
            gateway_type: input.gateway_type.clone(),
            state: gateway_state::AVAILABLE.to_string(),
            certificate_arn: input.certificate_arn.clone(),
            device_name: input.device_name.clone(),
            tags: input.tags.clone(),
        };
        inner.gateways.insert(gateway.id.clone(), gateway.clone());
        Ok(gateway)
    }

    async fn describe_customer_gateways(
        &self,
        ids: &[String],
        filters: &[Filter],
    ) -> Result<Vec<CustomerGateway>, ApiError> {
        let mut inner = self.lock();
        self.begin(&mut inner, "DescribeCustomerGateways")?;

        Ok(inner
            .gateways
            .values()
            .filter(|g| ids.is_empty() || ids.contains(&g.id))
            .filter(|g| filters.iter().all(|f| matches_filter(g, f)))
            .cloned()
            .collect())
    }

    async fn delete_customer_gateway(&self, id: &str) -> Result<(), ApiError> {
        let mut inner = self.lock();
        self.begin(&mut inner, "DeleteCustomerGateway")?;

        match inner.gateways.get_mut(id) {
            Some(gateway) => {
                gateway.state = gateway_state::DELETED.to_string();
                Ok(())
            }
            None => Err(ApiError::Service {
                operation: "DeleteCustomerGateway",
                code: "InvalidCustomerGatewayID.NotFound".to_string(),
                message: format!("The customerGateway ID '{}' does not exist", id),
            }),
        }
    }

    async fn create_tags(
        &self,
        id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), ApiError> {
        let mut inner = self.lock();
        self.begin(&mut inner, "CreateTags")?;

        let gateway = inner
            .gateways
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(format!("customer gateway {}", id)))?;
        gateway
            .tags
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn delete_tags(&self, id: &str, keys: &[String]) -> Result<(), ApiError> {
        let mut inner = self.lock();
        self.begin(&mut inner, "DeleteTags")?;

        let gateway = inner
            .gateways
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(format!("customer gateway {}", id)))?;
        for key in keys {
            gateway.tags.remove(key);
        }
        Ok(())
    }

    async fn create_certificate_authority(
        &self,
        input: &NewCertificateAuthority,
    ) -> Result<String, ApiError> {
        let mut inner = self.lock();
        self.begin(&mut inner, "CreateCertificateAuthority")?;

        if let Some(arn) = inner.authority_tokens.get(&input.idempotency_token) {
            return Ok(arn.clone());
        }

        let arn = self.arn("acm-pca", &format!("certificate-authority/{}", Uuid::new_v4()));
        inner.authorities.insert(
            arn.clone(),
            CertificateAuthority {
                arn: arn.clone(),
                authority_type: input.authority_type.clone(),
                status: authority_status::PENDING_CERTIFICATE.to_string(),
                key_algorithm: input.key_algorithm.clone(),
                signing_algorithm: input.signing_algorithm.clone(),
                common_name: Some(input.common_name.clone()),
            },
        );
        inner
            .authority_tokens
            .insert(input.idempotency_token.clone(), arn.clone());
        Ok(arn)
    }

    async fn describe_certificate_authority(
        &self,
        arn: &str,
    ) -> Result<Option<CertificateAuthority>, ApiError> {
        let mut inner = self.lock();
        self.begin(&mut inner, "DescribeCertificateAuthority")?;
        Ok(inner.authorities.get(arn).cloned())
    }

    async fn update_certificate_authority_status(
        &self,
        arn: &str,
        status: &str,
    ) -> Result<(), ApiError> {
        let mut inner = self.lock();
        self.begin(&mut inner, "UpdateCertificateAuthority")?;

        let authority = inner
            .authorities
            .get_mut(arn)
            .ok_or_else(|| ApiError::NotFound(format!("certificate authority {}", arn)))?;
        authority.status = status.to_string();
        Ok(())
    }

    async fn delete_certificate_authority(
        &self,
        arn: &str,
        permanent_deletion_time_in_days: i32,
    ) -> Result<(), ApiError> {
        let mut inner = self.lock();
        self.begin(&mut inner, "DeleteCertificateAuthority")?;

        if !(7..=30).contains(&permanent_deletion_time_in_days) {
            return Err(ApiError::Service {
                operation: "DeleteCertificateAuthority",
                code: "InvalidArgsException".to_string(),
                message: "PermanentDeletionTimeInDays must be between 7 and 30".to_string(),
            });
        }

        let authority = inner
            .authorities
            .get_mut(arn)
            .ok_or_else(|| ApiError::NotFound(format!("certificate authority {}", arn)))?;
        if authority.status == authority_status::ACTIVE {
            return Err(ApiError::Service {
                operation: "DeleteCertificateAuthority",
                code: "InvalidStateException".to_string(),
                message: "an ACTIVE certificate authority must be disabled first".to_string(),
            });
        }
        authority.status = authority_status::DELETED.to_string();
        Ok(())
    }

    async fn request_certificate(
        &self,
        domain_name: &str,
        certificate_authority_arn: &str,
    ) -> Result<String, ApiError> {
        let mut inner = self.lock();
        self.begin(&mut inner, "RequestCertificate")?;

        let status = match inner.authorities.get(certificate_authority_arn) {
            Some(authority) if authority.status == authority_status::DELETED => None,
            Some(authority) if authority.status == authority_status::ACTIVE => Some("ISSUED"),
            Some(_) => Some("FAILED"),
            None => None,
        };
        let Some(status) = status else {
            return Err(ApiError::Service {
                operation: "RequestCertificate",
                code: "ResourceNotFoundException".to_string(),
                message: format!("certificate authority {} not found", certificate_authority_arn),
            });
        };

        let arn = self.arn("acm", &format!("certificate/{}", Uuid::new_v4()));
        inner.certificates.insert(
            arn.clone(),
            Certificate {
                arn: arn.clone(),
                domain_name: domain_name.to_string(),
                status: status.to_string(),
                certificate_authority_arn: Some(certificate_authority_arn.to_string()),
            },
        );
        Ok(arn)
    }

    async fn describe_certificate(&self, arn: &str) -> Result<Option<Certificate>, ApiError> {
        let mut inner = self.lock();
        self.begin(&mut inner, "DescribeCertificate")?;
        Ok(inner.certificates.get(arn).cloned())
    }

    async fn delete_certificate(&self, arn: &str) -> Result<(), ApiError> {
        let mut inner = self.lock();
        self.begin(&mut inner, "DeleteCertificate")?;

        let in_use = inner
            .gateways
            .values()
            .any(|g| !g.is_gone() && g.certificate_arn.as_deref() == Some(arn));
        if in_use {
            return Err(ApiError::Service {
                operation: "DeleteCertificate",
                code: "ResourceInUseException".to_string(),
                message: format!("certificate {} is in use", arn),
            });
        }

        inner.certificates.remove(arn);
        Ok(())
    }
}
