//! Volcengine live streaming deployment provider
//!
//! Uploads the certificate to the Live certificate store (`CreateCert`), then
//! binds it to each configured push or pull domain with `BindCert`, one call
//! per domain. A `*.` domain is expanded against `ListDomainDetail`.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::credentials::VolcengineCredentials;
use super::volcengine::{Endpoint, VolcengineOpenApi};
use crate::config::{get_string, get_string_list, populate, ConfigMap, ProviderFactoryOptions};
use crate::domains::{DomainMatchPattern, DomainSpec, UpdateStrategy};
use crate::errors::DeployError;
use crate::logger::DeployLogger;
use crate::pipeline::DeployPipeline;
use crate::provider::{DeployResult, DeploymentProvider, ProviderType};
use crate::vendor::{
    CertificateStore, DomainBinder, DomainInventory, InventoryEntry, UploadedCertificate,
};

const LIVE: Endpoint = Endpoint {
    host: "live.volcengineapi.com",
    region: "cn-north-1",
    service: "live",
};
const LIVE_VERSION: &str = "2023-01-01";

const LIST_DOMAIN_PAGE_SIZE: usize = 1000;

/// Extended options of the Live deployer
#[derive(Debug, Clone)]
pub struct VolcengineLiveConfig {
    pub match_pattern: DomainMatchPattern,
    pub domains: DomainSpec,
}

impl VolcengineLiveConfig {
    /// Without an explicit `domainMatchPattern`, a `*.` entry in `domain`
    /// selects wildcard matching.
    pub fn from_extended(extended: &ConfigMap) -> Result<Self, DeployError> {
        let domains = DomainSpec::new(get_string_list(extended, "domain"));
        let pattern = get_string(extended, "domainMatchPattern");

        let match_pattern = if pattern.trim().is_empty() && domains.has_wildcards() {
            DomainMatchPattern::Wildcard
        } else {
            pattern.parse()?
        };

        Ok(Self {
            match_pattern,
            domains,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateCertResult {
    #[serde(rename = "ChainID", default)]
    chain_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListDomainDetailResult {
    #[serde(default)]
    domain_list: Vec<LiveDomain>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LiveDomain {
    domain: String,
}

/// Signed client for the Live OpenAPI
pub struct VolcengineLiveClient {
    api: VolcengineOpenApi,
}

impl VolcengineLiveClient {
    pub fn new(credentials: &VolcengineCredentials) -> Result<Self, DeployError> {
        Ok(Self {
            api: VolcengineOpenApi::new(
                credentials,
                DeployLogger::tracing(ProviderType::VOLCENGINE_LIVE.as_str()),
            )?,
        })
    }

    /// Send every request to `base_url` instead of the public endpoint (for testing)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api.set_base_url(base_url);
        self
    }
}

#[async_trait]
impl CertificateStore for VolcengineLiveClient {
    async fn upload_certificate(
        &self,
        certificate_pem: &str,
        private_key_pem: &str,
    ) -> Result<UploadedCertificate, DeployError> {
        let cert_name = format!("temps-{}", Utc::now().timestamp_millis());
        let result: CreateCertResult = self
            .api
            .call(
                Method::POST,
                LIVE,
                "CreateCert",
                LIVE_VERSION,
                &[],
                Some(serde_json::json!({
                    "CertName": cert_name,
                    "UseWay": "https",
                    "Rsa": {
                        "Pubkey": certificate_pem,
                        "Prikey": private_key_pem,
                    },
                })),
            )
            .await?;

        if result.chain_id.is_empty() {
            return Err(DeployError::vendor(
                "live.CreateCert",
                "response carries no certificate chain id",
            ));
        }

        Ok(UploadedCertificate {
            id: result.chain_id,
        })
    }
}

#[async_trait]
impl DomainInventory for VolcengineLiveClient {
    fn page_size(&self) -> usize {
        LIST_DOMAIN_PAGE_SIZE
    }

    async fn list_domains(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<InventoryEntry>, DeployError> {
        let page_num = offset / limit + 1;

        let result: ListDomainDetailResult = self
            .api
            .call(
                Method::POST,
                LIVE,
                "ListDomainDetail",
                LIVE_VERSION,
                &[],
                Some(serde_json::json!({
                    "PageNum": page_num,
                    "PageSize": limit,
                })),
            )
            .await?;

        Ok(result
            .domain_list
            .into_iter()
            .map(|d| InventoryEntry::new(d.domain))
            .collect())
    }
}

#[async_trait]
impl DomainBinder for VolcengineLiveClient {
    async fn bind(&self, domain: &str, certificate_id: &str) -> Result<(), DeployError> {
        let _: Value = self
            .api
            .call(
                Method::POST,
                LIVE,
                "BindCert",
                LIVE_VERSION,
                &[],
                Some(serde_json::json!({
                    "ChainID": certificate_id,
                    "Domain": domain,
                    "HTTPS": true,
                })),
            )
            .await?;
        Ok(())
    }
}

/// Volcengine Live deployer
pub struct VolcengineLiveDeployer {
    config: VolcengineLiveConfig,
    client: VolcengineLiveClient,
    logger: DeployLogger,
}

impl VolcengineLiveDeployer {
    pub fn new(
        credentials: VolcengineCredentials,
        config: VolcengineLiveConfig,
    ) -> Result<Self, DeployError> {
        Ok(Self {
            config,
            client: VolcengineLiveClient::new(&credentials)?,
            logger: DeployLogger::tracing(ProviderType::VOLCENGINE_LIVE.as_str()),
        })
    }

    /// Create a deployer talking to `base_url` (for testing)
    pub fn with_base_url(
        credentials: VolcengineCredentials,
        config: VolcengineLiveConfig,
        base_url: impl Into<String>,
    ) -> Result<Self, DeployError> {
        let mut deployer = Self::new(credentials, config)?;
        deployer.client = deployer.client.with_base_url(base_url);
        Ok(deployer)
    }
}

#[async_trait]
impl DeploymentProvider for VolcengineLiveDeployer {
    fn provider_type(&self) -> ProviderType {
        ProviderType::VOLCENGINE_LIVE
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
    let config = VolcengineLiveConfig::from_extended(&options.extended_config)?;
    Ok(Box::new(VolcengineLiveDeployer::new(credentials, config)?))
}
