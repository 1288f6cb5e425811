//! Signed client shared by the Volcengine adapters
//!
//! Every Volcengine OpenAPI action is a request to `https://{host}/?Action=..&Version=..`
//! signed with HMAC-SHA256. Errors come back in `ResponseMetadata.Error`, often
//! with HTTP 200, so the envelope is checked before the status.

use chrono::Utc;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::credentials::VolcengineCredentials;
use crate::errors::DeployError;
use crate::logger::DeployLogger;
use crate::signing::{canonical_query, VolcengineSigner};

const CERT_CENTER_HOST: &str = "open.volcengineapi.com";
const CERT_CENTER_REGION: &str = "cn-beijing";
const CERT_CENTER_SERVICE: &str = "certificate_service";

/// Where an action is served
#[derive(Debug, Clone, Copy)]
pub(crate) struct Endpoint {
    pub host: &'static str,
    pub region: &'static str,
    pub service: &'static str,
}

impl Endpoint {
    pub const CERT_CENTER: Endpoint = Endpoint {
        host: CERT_CENTER_HOST,
        region: CERT_CENTER_REGION,
        service: CERT_CENTER_SERVICE,
    };
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResponseMetadata {
    #[serde(default)]
    request_id: String,
    error: Option<VolcApiError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VolcApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImportCertificateResult {
    #[serde(default)]
    instance_id: String,
    /// Set when an identical certificate already exists
    #[serde(default)]
    repeat_id: String,
}

pub(crate) struct VolcengineOpenApi {
    client: Client,
    signer: VolcengineSigner,
    base_url: Option<String>,
    pub(crate) logger: DeployLogger,
}

impl VolcengineOpenApi {
    pub fn new(credentials: &VolcengineCredentials, logger: DeployLogger) -> Result<Self, DeployError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| DeployError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            signer: VolcengineSigner::new(
                &credentials.access_key_id,
                &credentials.secret_access_key,
            ),
            base_url: None,
            logger,
        })
    }

    pub fn set_base_url(&mut self, base_url: impl Into<String>) {
        self.base_url = Some(base_url.into());
    }

    /// Call `action` and decode its `Result`; a missing or null `Result`
    /// yields `T::default()`
    pub async fn call<T: DeserializeOwned + Default>(
        &self,
        method: Method,
        endpoint: Endpoint,
        action: &str,
        version: &str,
        extra_query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<T, DeployError> {
        let operation = format!("{}.{}", endpoint.service.trim_end_matches("_service"), action);

        let mut query: Vec<(&str, &str)> = vec![("Action", action), ("Version", version)];
        query.extend_from_slice(extra_query);

        let payload = match &body {
            Some(body) => serde_json::to_vec(body)?,
            None => Vec::new(),
        };
        let content_type = "application/json";
        let signature = self.signer.sign(
            method.as_str(),
            endpoint.host,
            &query,
            content_type,
            &payload,
            endpoint.region,
            endpoint.service,
            Utc::now(),
        )?;

        let base = match &self.base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}", endpoint.host),
        };
        let url = format!("{}/?{}", base, canonical_query(&query));

        let response = self
            .client
            .request(method, &url)
            .header("Content-Type", content_type)
            .header("X-Date", &signature.x_date)
            .header("X-Content-Sha256", &signature.x_content_sha256)
            .header("Authorization", &signature.authorization)
            .body(payload)
            .send()
            .await
            .map_err(|e| DeployError::vendor(&operation, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DeployError::vendor(&operation, e))?;
        self.logger.sdk_request(&operation, (status.as_u16(), &text));

        let envelope: Value = serde_json::from_str(&text).map_err(|e| {
            DeployError::vendor(
                &operation,
                format!("API returned status {}: {} ({})", status, text, e),
            )
        })?;

        let metadata: ResponseMetadata = envelope
            .get("ResponseMetadata")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        if let Some(error) = metadata.error.filter(|e| !e.code.is_empty()) {
            return Err(DeployError::vendor(
                &operation,
                format!("[{}] {} (request {})", error.code, error.message, metadata.request_id),
            ));
        }
        if !status.is_success() {
            return Err(DeployError::vendor(
                &operation,
                format!("API returned status {}: {}", status, text),
            ));
        }

        match envelope.get("Result") {
            Some(result) if !result.is_null() => serde_json::from_value(result.clone())
                .map_err(|e| DeployError::vendor(&operation, format!("Failed to parse response: {}", e))),
            _ => Ok(T::default()),
        }
    }

    /// Import into the certificate center, returning the certificate id.
    /// An identical certificate already stored is reused.
    pub async fn import_certificate(
        &self,
        certificate_pem: &str,
        private_key_pem: &str,
    ) -> Result<String, DeployError> {
        let result: ImportCertificateResult = self
            .call(
                Method::POST,
                Endpoint::CERT_CENTER,
                "ImportCertificate",
                "2024-10-01",
                &[],
                Some(serde_json::json!({
                    "CertificateInfo": {
                        "CertificateChain": certificate_pem,
                        "PrivateKey": private_key_pem,
                    },
                    "Repeatable": false,
                })),
            )
            .await?;

        let id = if !result.repeat_id.is_empty() {
            result.repeat_id
        } else {
            result.instance_id
        };
        if id.is_empty() {
            return Err(DeployError::vendor(
                "certificate.ImportCertificate",
                "response carries no certificate id",
            ));
        }

        Ok(id)
    }
}
