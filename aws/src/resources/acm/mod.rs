//! ACM resources

mod resource_certificate;

pub use resource_certificate::AcmCertificateResource;
