//! ACM Private CA resources

mod resource_certificate_authority;

pub use resource_certificate_authority::CertificateAuthorityResource;
