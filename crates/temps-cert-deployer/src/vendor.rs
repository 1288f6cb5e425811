//! Narrow vendor capabilities consumed by the deployment pipeline
//!
//! Each adapter exposes its vendor API through these traits. The pipeline only
//! depends on the fields listed here, so a vendor client can be replaced by an
//! in-memory fake in tests.

use async_trait::async_trait;

use crate::errors::DeployError;

/// Certificate identifier returned by a vendor's certificate store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedCertificate {
    pub id: String,
}

/// One domain of the vendor's inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryEntry {
    pub name: String,
    /// Certificate currently served for the domain, when the vendor reports it
    pub bound_certificate_id: Option<String>,
}

impl InventoryEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bound_certificate_id: None,
        }
    }

    pub fn bound_to(name: impl Into<String>, certificate_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bound_certificate_id: Some(certificate_id.into()),
        }
    }

    /// True only when the vendor positively reports `certificate_id` as bound
    pub fn is_bound(&self, certificate_id: &str) -> bool {
        self.bound_certificate_id.as_deref() == Some(certificate_id)
    }
}

/// `UploadCertificate(certPEM, keyPEM) -> certificateID`
#[async_trait]
pub trait CertificateStore: Send + Sync {
    async fn upload_certificate(
        &self,
        certificate_pem: &str,
        private_key_pem: &str,
    ) -> Result<UploadedCertificate, DeployError>;
}

/// `ListDomainInventory(pageOffset, pageSize) -> entries`
#[async_trait]
pub trait DomainInventory: Send + Sync {
    /// Entries requested per page
    fn page_size(&self) -> usize;

    /// Whether entries carry `bound_certificate_id`
    fn reports_bindings(&self) -> bool {
        false
    }

    async fn list_domains(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<InventoryEntry>, DeployError>;
}

/// `BindCertificateToDomain(domain, certificateID)`
#[async_trait]
pub trait DomainBinder: Send + Sync {
    async fn bind(&self, domain: &str, certificate_id: &str) -> Result<(), DeployError>;
}

/// `BindCertificatesBulk(domains[], certificateID)`
#[async_trait]
pub trait BulkDomainBinder: Send + Sync {
    async fn bind_all(&self, domains: &[String], certificate_id: &str) -> Result<(), DeployError>;
}

/// `DescribeDomainBinding(domain) -> boundCertificateID`, optional
#[async_trait]
pub trait BindingInspector: Send + Sync {
    async fn describe_binding(&self, domain: &str) -> Result<Option<String>, DeployError>;
}
