//! Volcengine video-on-demand deployment provider
//!
//! Imports the certificate into the Volcengine certificate center, then turns
//! on HTTPS with that certificate for each play or image domain of a VOD
//! space, one `UpdateDomainConfig` call per domain. The VOD API does not
//! report which certificate a domain serves, so every matched domain is
//! updated.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::credentials::VolcengineCredentials;
use super::volcengine::{Endpoint, VolcengineOpenApi};
use crate::config::{get_string, get_string_list, get_string_or, populate, ConfigMap, ProviderFactoryOptions};
use crate::domains::{DomainMatchPattern, DomainSpec, UpdateStrategy};
use crate::errors::{ConfigError, DeployError};
use crate::logger::DeployLogger;
use crate::pipeline::DeployPipeline;
use crate::provider::{DeployResult, DeploymentProvider, ProviderType};
use crate::vendor::{
    CertificateStore, DomainBinder, DomainInventory, InventoryEntry, UploadedCertificate,
};

const VOD: Endpoint = Endpoint {
    host: "vod.volcengineapi.com",
    region: "cn-north-1",
    service: "vod",
};

const LIST_DOMAIN_PAGE_SIZE: usize = 1000;

/// Kind of VOD domain to deploy to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VodDomainType {
    #[default]
    Play,
    Image,
}

impl VodDomainType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VodDomainType::Play => "play",
            VodDomainType::Image => "image",
        }
    }

    fn parse(value: &str) -> Result<Self, DeployError> {
        match value.trim() {
            "" | "play" => Ok(VodDomainType::Play),
            "image" => Ok(VodDomainType::Image),
            other => Err(DeployError::Configuration(format!(
                "unsupported domain type: '{}'",
                other
            ))),
        }
    }
}

/// Extended options of the VOD deployer
#[derive(Debug, Clone)]
pub struct VolcengineVodConfig {
    pub space_name: String,
    pub domain_type: VodDomainType,
    pub match_pattern: DomainMatchPattern,
    pub domains: DomainSpec,
}

impl VolcengineVodConfig {
    pub fn from_extended(extended: &ConfigMap) -> Result<Self, DeployError> {
        let space_name = get_string(extended, "spaceName");
        if space_name.trim().is_empty() {
            return Err(ConfigError::MissingFields {
                provider: ProviderType::VOLCENGINE_VOD.to_string(),
                fields: vec!["spaceName"],
            }
            .into());
        }

        Ok(Self {
            space_name,
            domain_type: VodDomainType::parse(&get_string_or(extended, "domainType", "play"))?,
            match_pattern: get_string(extended, "domainMatchPattern").parse()?,
            domains: DomainSpec::new(get_string_list(extended, "domain")),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListDomainResult {
    play_instance_info: Option<DomainInstanceInfo>,
    image_instance_info: Option<DomainInstanceInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DomainInstanceInfo {
    #[serde(default)]
    byte_instances: Vec<ByteInstance>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ByteInstance {
    #[serde(default)]
    domains: Vec<VodDomain>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VodDomain {
    domain: String,
}

/// Signed client for the VOD and certificate center OpenAPIs
pub struct VolcengineVodClient {
    api: VolcengineOpenApi,
    space_name: String,
    domain_type: VodDomainType,
}

impl VolcengineVodClient {
    pub fn new(
        credentials: &VolcengineCredentials,
        space_name: &str,
        domain_type: VodDomainType,
    ) -> Result<Self, DeployError> {
        Ok(Self {
            api: VolcengineOpenApi::new(
                credentials,
                DeployLogger::tracing(ProviderType::VOLCENGINE_VOD.as_str()),
            )?,
            space_name: space_name.to_string(),
            domain_type,
        })
    }

    /// Send every request to `base_url` instead of the public endpoints (for testing)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api.set_base_url(base_url);
        self
    }
}

#[async_trait]
impl CertificateStore for VolcengineVodClient {
    async fn upload_certificate(
        &self,
        certificate_pem: &str,
        private_key_pem: &str,
    ) -> Result<UploadedCertificate, DeployError> {
        let id = self
            .api
            .import_certificate(certificate_pem, private_key_pem)
            .await?;
        Ok(UploadedCertificate { id })
    }
}

#[async_trait]
impl DomainInventory for VolcengineVodClient {
    fn page_size(&self) -> usize {
        LIST_DOMAIN_PAGE_SIZE
    }

    async fn list_domains(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<InventoryEntry>, DeployError> {
        let offset = offset.to_string();
        let limit = limit.to_string();

        let result: ListDomainResult = self
            .api
            .call(
                Method::GET,
                VOD,
                "ListDomain",
                "2023-01-01",
                &[
                    ("SpaceName", self.space_name.as_str()),
                    ("DomainType", self.domain_type.as_str()),
                    ("SourceStationType", "1"),
                    ("Offset", offset.as_str()),
                    ("Limit", limit.as_str()),
                ],
                None,
            )
            .await?;

        let info = match self.domain_type {
            VodDomainType::Play => result.play_instance_info,
            VodDomainType::Image => result.image_instance_info,
        };

        Ok(info
            .map(|info| info.byte_instances)
            .unwrap_or_default()
            .into_iter()
            .flat_map(|instance| instance.domains)
            .map(|d| InventoryEntry::new(d.domain))
            .collect())
    }
}

#[async_trait]
impl DomainBinder for VolcengineVodClient {
    async fn bind(&self, domain: &str, certificate_id: &str) -> Result<(), DeployError> {
        let _: Value = self
            .api
            .call(
                Method::POST,
                VOD,
                "UpdateDomainConfig",
                "2023-07-01",
                &[],
                Some(serde_json::json!({
                    "SpaceName": self.space_name,
                    "DomainType": self.domain_type.as_str(),
                    "Domain": domain,
                    "Config": {
                        "HTTPS": {
                            "Switch": true,
                            "CertInfo": { "CertId": certificate_id },
                        },
                    },
                })),
            )
            .await?;
        Ok(())
    }
}

/// Volcengine VOD deployer
pub struct VolcengineVodDeployer {
    config: VolcengineVodConfig,
    client: VolcengineVodClient,
    logger: DeployLogger,
}

impl VolcengineVodDeployer {
    pub fn new(
        credentials: VolcengineCredentials,
        config: VolcengineVodConfig,
    ) -> Result<Self, DeployError> {
        let client =
            VolcengineVodClient::new(&credentials, &config.space_name, config.domain_type)?;
        Ok(Self {
            config,
            client,
            logger: DeployLogger::tracing(ProviderType::VOLCENGINE_VOD.as_str()),
        })
    }

    /// Create a deployer talking to `base_url` (for testing)
    pub fn with_base_url(
        credentials: VolcengineCredentials,
        config: VolcengineVodConfig,
        base_url: impl Into<String>,
    ) -> Result<Self, DeployError> {
        let mut deployer = Self::new(credentials, config)?;
        deployer.client = deployer.client.with_base_url(base_url);
        Ok(deployer)
    }
}

#[async_trait]
impl DeploymentProvider for VolcengineVodDeployer {
    fn provider_type(&self) -> ProviderType {
        ProviderType::VOLCENGINE_VOD
    }

    fn set_logger(&mut self, logger: DeployLogger) {
        self.client.api.logger = logger.clone();
        self.logger = logger;
    }

    async fn deploy(
        &self,
        cancel: &CancellationToken,
        certificate_pem: &str,
        private_key_pem: &str,
    ) -> Result<DeployResult, DeployError> {
        DeployPipeline::new(
            &self.client,
            UpdateStrategy::PerDomain(&self.client),
            &self.logger,
        )
        .with_inventory(&self.client)
        .run(
            cancel,
            self.config.match_pattern,
            &self.config.domains,
            certificate_pem,
            private_key_pem,
        )
        .await
    }
}

/// Registry constructor
pub fn create(options: &ProviderFactoryOptions) -> Result<Box<dyn DeploymentProvider>, DeployError> {
    let credentials: VolcengineCredentials = populate(&options.access_config)?;
    let config = VolcengineVodConfig::from_extended(&options.extended_config)?;
    Ok(Box::new(VolcengineVodDeployer::new(credentials, config)?))
}
