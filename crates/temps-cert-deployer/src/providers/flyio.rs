//! Fly.io deployment provider
//!
//! Adds the certificate to an app as a custom certificate for one hostname
//! through the Machines API. Fly.io binds the certificate to the hostname
//! itself, so there is no domain resolution step.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::credentials::FlyioCredentials;
use crate::config::{get_string, populate, ConfigMap, ProviderFactoryOptions};
use crate::errors::{ConfigError, DeployError};
use crate::logger::DeployLogger;
use crate::provider::{DeployResult, DeploymentProvider, ProviderType};

const MACHINES_API_URL: &str = "https://api.machines.dev/v1";
const OPERATION: &str = "flyio.CreateCustomCertificate";

/// Extended options of the Fly.io deployer
#[derive(Debug, Clone)]
pub struct FlyioConfig {
    pub app_name: String,
    pub hostname: String,
}

impl FlyioConfig {
    pub fn from_extended(extended: &ConfigMap) -> Result<Self, DeployError> {
        let app_name = get_string(extended, "appName").trim().to_string();
        let hostname = get_string(extended, "hostname").trim().to_string();

        let mut missing = Vec::new();
        if app_name.is_empty() {
            missing.push("appName");
        }
        if hostname.is_empty() {
            missing.push("hostname");
        }
        if !missing.is_empty() {
            return Err(ConfigError::MissingFields {
                provider: ProviderType::FLYIO.to_string(),
                fields: missing,
            }
            .into());
        }

        Ok(Self { app_name, hostname })
    }
}

#[derive(Serialize)]
struct CreateCustomCertificateRequest<'a> {
    hostname: &'a str,
    fullchain: &'a str,
    private_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateCustomCertificateResponse {
    #[serde(default)]
    hostname: String,
    #[serde(default)]
    configured: bool,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct FlyioErrorResponse {
    error: String,
}

/// Fly.io deployer
pub struct FlyioDeployer {
    config: FlyioConfig,
    api_token: String,
    client: Client,
    base_url: String,
    logger: DeployLogger,
}

impl FlyioDeployer {
    pub fn new(credentials: FlyioCredentials, config: FlyioConfig) -> Result<Self, DeployError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| DeployError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            api_token: credentials.api_token,
            client,
            base_url: MACHINES_API_URL.to_string(),
            logger: DeployLogger::tracing(ProviderType::FLYIO.as_str()),
        })
    }

    /// Create a deployer talking to `base_url` (for testing)
    pub fn with_base_url(
        credentials: FlyioCredentials,
        config: FlyioConfig,
        base_url: impl Into<String>,
    ) -> Result<Self, DeployError> {
        let mut deployer = Self::new(credentials, config)?;
        deployer.base_url = base_url.into();
        Ok(deployer)
    }

    async fn create_custom_certificate(
        &self,
        certificate_pem: &str,
        private_key_pem: &str,
    ) -> Result<CreateCustomCertificateResponse, DeployError> {
        let url = format!(
            "{}/apps/{}/certificates/custom",
            self.base_url.trim_end_matches('/'),
            url::form_urlencoded::byte_serialize(self.config.app_name.as_bytes())
                .collect::<String>()
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&CreateCustomCertificateRequest {
                hostname: &self.config.hostname,
                fullchain: certificate_pem,
                private_key: private_key_pem,
            })
            .send()
            .await
            .map_err(|e| DeployError::vendor(OPERATION, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DeployError::vendor(OPERATION, e))?;
        self.logger.sdk_request(OPERATION, (status.as_u16(), &text));

        if !status.is_success() {
            let message = serde_json::from_str::<FlyioErrorResponse>(&text)
                .map(|e| e.error)
                .unwrap_or(text);
            return Err(DeployError::vendor(
                OPERATION,
                format!("API returned status {}: {}", status, message),
            ));
        }

        serde_json::from_str(&text)
            .map_err(|e| DeployError::vendor(OPERATION, format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl DeploymentProvider for FlyioDeployer {
    fn provider_type(&self) -> ProviderType {
        ProviderType::FLYIO
    }

    fn set_logger(&mut self, logger: DeployLogger) {
        self.logger = logger;
    }

    async fn deploy(
        &self,
        cancel: &CancellationToken,
        certificate_pem: &str,
        private_key_pem: &str,
    ) -> Result<DeployResult, DeployError> {
        if certificate_pem.trim().is_empty() {
            return Err(DeployError::Configuration(
                "certificate PEM is empty".to_string(),
            ));
        }
        if private_key_pem.trim().is_empty() {
            return Err(DeployError::Configuration(
                "private key PEM is empty".to_string(),
            ));
        }
        if cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(DeployError::Cancelled),
            result = self.create_custom_certificate(certificate_pem, private_key_pem) => result?,
        };

        self.logger.info(format!(
            "custom certificate added to app '{}' for '{}' (configured: {}, status: {})",
            self.config.app_name, response.hostname, response.configured, response.status
        ));

        Ok(DeployResult::default())
    }
}

/// Registry constructor
pub fn create(options: &ProviderFactoryOptions) -> Result<Box<dyn DeploymentProvider>, DeployError> {
    let credentials: FlyioCredentials = populate(&options.access_config)?;
    let config = FlyioConfig::from_extended(&options.extended_config)?;
    Ok(Box::new(FlyioDeployer::new(credentials, config)?))
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn deployer(server: &MockServer) -> FlyioDeployer {
        FlyioDeployer::with_base_url(
            FlyioCredentials {
                api_token: "fo1_token".to_string(),
            },
            FlyioConfig {
                app_name: "my-app".to_string(),
                hostname: "www.example.com".to_string(),
            },
            server.uri(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_deploy_posts_custom_certificate() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/apps/my-app/certificates/custom"))
            .and(header("Authorization", "Bearer fo1_token"))
            .and(body_json(json!({
                "hostname": "www.example.com",
                "fullchain": "CERT",
                "private_key": "KEY"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "hostname": "www.example.com",
                "configured": true,
                "status": "Ready",
                "certificates": [{ "source": "custom", "status": "active" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        deployer(&server)
            .deploy(&CancellationToken::new(), "CERT", "KEY")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_api_error_names_operation() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/apps/my-app/certificates/custom"))
            .respond_with(
                ResponseTemplate::new(422).set_body_json(json!({ "error": "hostname not owned by app" })),
            )
            .mount(&server)
            .await;

        let err = deployer(&server)
            .deploy(&CancellationToken::new(), "CERT", "KEY")
            .await
            .unwrap_err();

        let rendered = err.to_string();
        assert!(rendered.contains(OPERATION));
        assert!(rendered.contains("hostname not owned by app"));
    }

    #[tokio::test]
    async fn test_cancelled_before_request() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = deployer(&server)
            .deploy(&cancel, "CERT", "KEY")
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_config_requires_app_and_hostname() {
        let ext = json!({ "appName": "my-app" });
        let err = FlyioConfig::from_extended(ext.as_object().unwrap()).unwrap_err();
        assert!(err.to_string().contains("hostname"));

        let ext = json!({ "appName": "my-app", "hostname": "www.example.com" });
        let config = FlyioConfig::from_extended(ext.as_object().unwrap()).unwrap();
        assert_eq!(config.app_name, "my-app");
    }
}
