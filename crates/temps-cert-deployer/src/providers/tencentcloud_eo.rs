//! Tencent Cloud EdgeOne deployment provider
//!
//! Uploads the certificate to Tencent Cloud SSL and assigns it to the zone's
//! acceleration domains in a single `ModifyHostsCertificate` call. The zone's
//! domain listing reports the certificate each domain currently serves, so
//! domains that already use the uploaded certificate are skipped.
//!
//! Credentials: an API key pair with `QcloudSSLFullAccess` and
//! `QcloudTEOFullAccess`, created at https://console.cloud.tencent.com/cam/capi

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::credentials::TencentCloudCredentials;
use crate::config::{get_string, get_string_list, populate, ConfigMap, ProviderFactoryOptions};
use crate::domains::{DomainMatchPattern, DomainSpec, UpdateStrategy};
use crate::errors::{ConfigError, DeployError};
use crate::logger::DeployLogger;
use crate::pipeline::DeployPipeline;
use crate::provider::{DeployResult, DeploymentProvider, ProviderType};
use crate::signing::Tc3Signer;
use crate::vendor::{
    BulkDomainBinder, CertificateStore, DomainInventory, InventoryEntry, UploadedCertificate,
};

const TEO_HOST: &str = "teo.tencentcloudapi.com";
const TEO_VERSION: &str = "2022-09-01";
const SSL_HOST: &str = "ssl.tencentcloudapi.com";
const SSL_INTL_HOST: &str = "ssl.intl.tencentcloudapi.com";
const SSL_VERSION: &str = "2019-12-05";

/// `DescribeAccelerationDomains` accepts at most 200 entries per page
const ACCELERATION_DOMAINS_PAGE_SIZE: usize = 200;

/// Extended options of the EdgeOne deployer
#[derive(Debug, Clone)]
pub struct TencentCloudEoConfig {
    pub zone_id: String,
    pub match_pattern: DomainMatchPattern,
    pub domains: DomainSpec,
}

impl TencentCloudEoConfig {
    pub fn from_extended(extended: &ConfigMap) -> Result<Self, DeployError> {
        let zone_id = get_string(extended, "zoneId");
        if zone_id.trim().is_empty() {
            return Err(ConfigError::MissingFields {
                provider: ProviderType::TENCENTCLOUD_EO.to_string(),
                fields: vec!["zoneId"],
            }
            .into());
        }

        Ok(Self {
            zone_id,
            match_pattern: get_string(extended, "matchPattern").parse()?,
            domains: DomainSpec::new(get_string_list(extended, "domains")),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TcApiError {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UploadCertificateResponse {
    certificate_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeAccelerationDomainsResponse {
    #[serde(default)]
    acceleration_domains: Vec<AccelerationDomain>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AccelerationDomain {
    domain_name: Option<String>,
    certificate: Option<AccelerationDomainCertificate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AccelerationDomainCertificate {
    mode: Option<String>,
    #[serde(default)]
    list: Vec<CertificateInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CertificateInfo {
    cert_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ServerCertInfo<'a> {
    cert_id: &'a str,
}

/// Signed JSON client for the SSL and TEO APIs
pub struct TencentCloudEoClient {
    client: Client,
    signer: Tc3Signer,
    zone_id: String,
    teo_host: String,
    ssl_host: String,
    base_url: Option<String>,
    logger: DeployLogger,
}

impl TencentCloudEoClient {
    pub fn new(credentials: &TencentCloudCredentials, zone_id: &str) -> Result<Self, DeployError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| DeployError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        let endpoint = credentials.endpoint.trim();
        let teo_host = if endpoint.is_empty() {
            TEO_HOST.to_string()
        } else {
            endpoint.to_string()
        };
        // the international site uses its own SSL endpoint
        let ssl_host = if teo_host.ends_with("intl.tencentcloudapi.com") {
            SSL_INTL_HOST.to_string()
        } else {
            SSL_HOST.to_string()
        };

        Ok(Self {
            client,
            signer: Tc3Signer::new(&credentials.secret_id, &credentials.secret_key),
            zone_id: zone_id.to_string(),
            teo_host,
            ssl_host,
            base_url: None,
            logger: DeployLogger::tracing(ProviderType::TENCENTCLOUD_EO.as_str()),
        })
    }

    /// Send every request to `base_url` instead of the public endpoints (for testing)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    fn set_logger(&mut self, logger: DeployLogger) {
        self.logger = logger;
    }

    async fn call<T: DeserializeOwned>(
        &self,
        service: &str,
        version: &str,
        action: &str,
        payload: Value,
    ) -> Result<T, DeployError> {
        let operation = format!("{}.{}", service, action);
        let host = if service == "ssl" {
            self.ssl_host.as_str()
        } else {
            self.teo_host.as_str()
        };
        let url = match &self.base_url {
            Some(base) => format!("{}/", base.trim_end_matches('/')),
            None => format!("https://{}/", host),
        };

        let body = serde_json::to_string(&payload)?;
        let now = Utc::now();
        let authorization = self
            .signer
            .authorization(service, host, action, &body, now)?;

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json; charset=utf-8")
            .header("X-TC-Action", action)
            .header("X-TC-Version", version)
            .header("X-TC-Timestamp", now.timestamp().to_string())
            .header("Authorization", authorization)
            .body(body)
            .send()
            .await
            .map_err(|e| DeployError::vendor(&operation, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DeployError::vendor(&operation, e))?;
        self.logger.sdk_request(&operation, (status.as_u16(), &text));

        if !status.is_success() {
            return Err(DeployError::vendor(
                &operation,
                format!("API returned status {}: {}", status, text),
            ));
        }

        let mut envelope: Value = serde_json::from_str(&text)
            .map_err(|e| DeployError::vendor(&operation, format!("Failed to parse response: {}", e)))?;
        let inner = envelope
            .get_mut("Response")
            .map(Value::take)
            .ok_or_else(|| DeployError::vendor(&operation, "response has no 'Response' field"))?;

        if let Some(error) = inner.get("Error") {
            let error: TcApiError = serde_json::from_value(error.clone())?;
            return Err(DeployError::vendor(
                &operation,
                format!("[{}] {}", error.code, error.message),
            ));
        }

        serde_json::from_value(inner)
            .map_err(|e| DeployError::vendor(&operation, format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl CertificateStore for TencentCloudEoClient {
    async fn upload_certificate(
        &self,
        certificate_pem: &str,
        private_key_pem: &str,
    ) -> Result<UploadedCertificate, DeployError> {
        // Repeatable=false returns the existing id for an identical certificate
        let response: UploadCertificateResponse = self
            .call(
                "ssl",
                SSL_VERSION,
                "UploadCertificate",
                serde_json::json!({
                    "CertificatePublicKey": certificate_pem,
                    "CertificatePrivateKey": private_key_pem,
                    "CertificateType": "SVR",
                    "Repeatable": false,
                }),
            )
            .await?;

        Ok(UploadedCertificate {
            id: response.certificate_id,
        })
    }
}

#[async_trait]
impl DomainInventory for TencentCloudEoClient {
    fn page_size(&self) -> usize {
        ACCELERATION_DOMAINS_PAGE_SIZE
    }

    fn reports_bindings(&self) -> bool {
        true
    }

    async fn list_domains(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<InventoryEntry>, DeployError> {
        let response: DescribeAccelerationDomainsResponse = self
            .call(
                "teo",
                TEO_VERSION,
                "DescribeAccelerationDomains",
                serde_json::json!({
                    "ZoneId": self.zone_id,
                    "Offset": offset,
                    "Limit": limit,
                }),
            )
            .await?;

        Ok(response
            .acceleration_domains
            .into_iter()
            .filter_map(|domain| {
                let name = domain.domain_name?;
                // only a single custom certificate counts as a confirmed binding
                let bound = domain.certificate.and_then(|c| {
                    if c.mode.as_deref() == Some("sslcert") && c.list.len() == 1 {
                        c.list.into_iter().next().map(|info| info.cert_id)
                    } else {
                        None
                    }
                });
                Some(InventoryEntry {
                    name,
                    bound_certificate_id: bound,
                })
            })
            .collect())
    }
}

#[async_trait]
impl BulkDomainBinder for TencentCloudEoClient {
    async fn bind_all(&self, domains: &[String], certificate_id: &str) -> Result<(), DeployError> {
        let _: Value = self
            .call(
                "teo",
                TEO_VERSION,
                "ModifyHostsCertificate",
                serde_json::json!({
                    "ZoneId": self.zone_id,
                    "Hosts": domains,
                    "Mode": "sslcert",
                    "ServerCertInfo": [ServerCertInfo { cert_id: certificate_id }],
                }),
            )
            .await?;
        Ok(())
    }
}

/// Tencent Cloud EdgeOne deployer
pub struct TencentCloudEoDeployer {
    config: TencentCloudEoConfig,
    client: TencentCloudEoClient,
    logger: DeployLogger,
}

impl TencentCloudEoDeployer {
    pub fn new(
        credentials: TencentCloudCredentials,
        config: TencentCloudEoConfig,
    ) -> Result<Self, DeployError> {
        let client = TencentCloudEoClient::new(&credentials, &config.zone_id)?;
        Ok(Self {
            config,
            client,
            logger: DeployLogger::tracing(ProviderType::TENCENTCLOUD_EO.as_str()),
        })
    }

    /// Create a deployer talking to `base_url` (for testing)
    pub fn with_base_url(
        credentials: TencentCloudCredentials,
        config: TencentCloudEoConfig,
        base_url: impl Into<String>,
    ) -> Result<Self, DeployError> {
        let mut deployer = Self::new(credentials, config)?;
        deployer.client = deployer.client.with_base_url(base_url);
        Ok(deployer)
    }
}

#[async_trait]
impl DeploymentProvider for TencentCloudEoDeployer {
    fn provider_type(&self) -> ProviderType {
        ProviderType::TENCENTCLOUD_EO
    }

    fn set_logger(&mut self, logger: DeployLogger) {
        self.client.set_logger(logger.clone());
        self.logger = logger;
    }

    async fn deploy(
        &self,
        cancel: &CancellationToken,
        certificate_pem: &str,
        private_key_pem: &str,
    ) -> Result<DeployResult, DeployError> {
        DeployPipeline::new(&self.client, UpdateStrategy::Bulk(&self.client), &self.logger)
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
    let credentials: TencentCloudCredentials = populate(&options.access_config)?;
    let config = TencentCloudEoConfig::from_extended(&options.extended_config)?;
    Ok(Box::new(TencentCloudEoDeployer::new(credentials, config)?))
}
