//! Deployment provider trait definitions
//!
//! Every vendor adapter implements [`DeploymentProvider`]: it receives a freshly
//! issued certificate chain and private key (PEM text), performs whatever vendor
//! calls are needed, and reports success or a typed [`DeployError`].
//! Adapters are selected at runtime by [`ProviderType`] through the registry.

use std::borrow::Cow;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::ProviderFactoryOptions;
use crate::errors::DeployError;
use crate::logger::DeployLogger;

/// Opaque provider identifier, the registry key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderType(Cow<'static, str>);

impl ProviderType {
    /// Tencent Cloud EdgeOne acceleration domains
    pub const TENCENTCLOUD_EO: ProviderType = ProviderType::from_static("tencentcloud-eo");
    /// Volcengine video-on-demand play/image domains
    pub const VOLCENGINE_VOD: ProviderType = ProviderType::from_static("volcengine-vod");
    /// Volcengine live streaming push/pull domains
    pub const VOLCENGINE_LIVE: ProviderType = ProviderType::from_static("volcengine-live");
    /// Fly.io application custom certificates
    pub const FLYIO: ProviderType = ProviderType::from_static("flyio");
    /// Synology DiskStation Manager certificate store
    pub const SYNOLOGY_DSM: ProviderType = ProviderType::from_static("synologydsm");

    pub const fn from_static(value: &'static str) -> Self {
        ProviderType(Cow::Borrowed(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProviderType {
    fn from(value: &str) -> Self {
        ProviderType(Cow::Owned(value.to_string()))
    }
}

impl From<String> for ProviderType {
    fn from(value: String) -> Self {
        ProviderType(Cow::Owned(value))
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a successful deployment.
///
/// Currently an empty marker; reserved for vendor-returned metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployResult {}

/// Core deployment provider trait
///
/// Implementations hold only their immutable configuration and HTTP client, so
/// `deploy` may be called repeatedly, including against a partially updated
/// remote state left behind by an earlier failed attempt.
#[async_trait]
pub trait DeploymentProvider: Send + Sync {
    /// Provider type this instance was built for
    fn provider_type(&self) -> ProviderType;

    /// Replace the diagnostic sink. A discard logger silences diagnostics.
    fn set_logger(&mut self, logger: DeployLogger);

    /// Deploy the certificate chain and private key to the vendor
    async fn deploy(
        &self,
        cancel: &CancellationToken,
        certificate_pem: &str,
        private_key_pem: &str,
    ) -> Result<DeployResult, DeployError>;
}

/// Constructor stored in the registry for each provider type
pub type ProviderConstructor =
    fn(&ProviderFactoryOptions) -> Result<Box<dyn DeploymentProvider>, DeployError>;
