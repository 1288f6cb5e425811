//! Synology DiskStation Manager deployment provider
//!
//! Logs in to the DSM web API, imports the certificate into the certificate
//! store (replacing an existing entry found by id or description) and can make
//! it the default certificate for every DSM service. The session is always
//! logged out, whatever the outcome of the import.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use totp_rs::{Algorithm, Secret, TOTP};
use url::Url;

use super::credentials::SynologyDsmCredentials;
use crate::config::{get_bool, get_string, populate, ConfigMap, ProviderFactoryOptions};
use crate::errors::DeployError;
use crate::logger::DeployLogger;
use crate::provider::{DeployResult, DeploymentProvider, ProviderType};

const AUTH_API: &str = "SYNO.API.Auth";
const DEVICE_NAME: &str = "Temps";

/// Extended options of the DSM deployer
#[derive(Debug, Clone, Default)]
pub struct SynologyDsmConfig {
    /// Certificate to replace
    pub certificate_id: String,
    /// Description used to find the certificate to replace, and given to the
    /// imported one
    pub certificate_name: String,
    pub is_default: bool,
}

impl SynologyDsmConfig {
    pub fn from_extended(extended: &ConfigMap) -> Self {
        Self {
            certificate_id: get_string(extended, "certificateId").trim().to_string(),
            certificate_name: get_string(extended, "certificateName").trim().to_string(),
            is_default: get_bool(extended, "isDefault"),
        }
    }
}

/// Split a server URL into `scheme://host:port`.
///
/// The scheme defaults to `http`; the port to 5000, or 5001 for `https`.
pub fn parse_server_url(server_url: &str) -> Result<String, DeployError> {
    let trimmed = server_url.trim().trim_end_matches('/');
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let url = Url::parse(&with_scheme)
        .map_err(|e| DeployError::Configuration(format!("invalid serverUrl '{}': {}", server_url, e)))?;

    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(DeployError::Configuration(format!(
            "unsupported serverUrl scheme: '{}'",
            scheme
        )));
    }
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| DeployError::Configuration(format!("serverUrl '{}' has no host", server_url)))?;
    let port = url
        .port()
        .unwrap_or(if scheme == "https" { 5001 } else { 5000 });

    Ok(format!("{}://{}:{}", scheme, host, port))
}

/// Current one-time code for a base32 TOTP secret (SHA1, 6 digits, 30s step)
fn generate_otp_code(secret: &str) -> Result<String, DeployError> {
    totp_for(secret)?
        .generate_current()
        .map_err(|e| DeployError::Configuration(format!("Failed to generate TOTP code: {}", e)))
}

fn totp_for(secret: &str) -> Result<TOTP, DeployError> {
    let normalized: String = secret
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();

    let bytes = Secret::Encoded(normalized)
        .to_bytes()
        .map_err(|e| DeployError::Configuration(format!("Invalid TOTP secret: {:?}", e)))?;

    // DSM issues 80-bit secrets, below the RFC minimum `TOTP::new` enforces
    Ok(TOTP::new_unchecked(Algorithm::SHA1, 6, 1, 30, bytes))
}

/// Separate the leaf certificate from the intermediates of a PEM chain
pub fn split_certificate_chain(certificate_pem: &str) -> Result<(String, String), DeployError> {
    let mut blocks = Vec::new();
    for pem in x509_parser::pem::Pem::iter_from_buffer(certificate_pem.as_bytes()) {
        let pem = pem.map_err(|e| DeployError::Certificate(format!("Failed to parse PEM: {}", e)))?;
        if pem.label != "CERTIFICATE" {
            continue;
        }
        pem.parse_x509()
            .map_err(|e| DeployError::Certificate(format!("Failed to parse X509: {}", e)))?;
        blocks.push(encode_pem(&pem.contents));
    }

    let mut blocks = blocks.into_iter();
    let leaf = blocks
        .next()
        .ok_or_else(|| DeployError::Certificate("no certificate found in PEM".to_string()))?;
    let intermediates: String = blocks.collect();

    Ok((leaf, intermediates))
}

fn encode_pem(der: &[u8]) -> String {
    let encoded = STANDARD.encode(der);
    let mut out = String::from("-----BEGIN CERTIFICATE-----\n");
    for line in encoded.as_bytes().chunks(64) {
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
    out.push_str("-----END CERTIFICATE-----\n");
    out
}

/// Human-readable text for `SYNO.API.Auth` error codes
fn auth_error_description(code: i64) -> &'static str {
    match code {
        100 => "Unknown error",
        101 => "Invalid parameters",
        102 => "API does not exist",
        103 => "Method does not exist",
        104 => "This API version is not supported",
        105 => "Insufficient user privilege",
        106 => "Connection time out",
        107 => "Multiple login detected",
        400 => "Invalid password or account does not exist",
        401 => "Guest or disabled account",
        402 => "Permission denied",
        403 => "2-factor authentication code required (OTP)",
        404 => "Failed to authenticate 2-factor authentication code",
        405 => "Server version is too low or not supported",
        406 => "2-factor authentication code expired",
        407 => "Login failed: IP has been blocked",
        408 => "Expired password",
        409 => "Password must be changed (password policy)",
        410 => "Account locked (too many failed login attempts)",
        _ => "Unknown authentication error",
    }
}

#[derive(Debug, Deserialize)]
struct DsmResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<DsmApiError>,
}

#[derive(Debug, Deserialize)]
struct DsmApiError {
    code: i64,
}

#[derive(Debug, Deserialize)]
struct ApiInfo {
    path: String,
    #[serde(rename = "maxVersion")]
    max_version: i64,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    #[serde(default)]
    sid: String,
    #[serde(default)]
    synotoken: String,
}

#[derive(Debug, Deserialize)]
struct CertificateList {
    #[serde(default)]
    certificates: Vec<DsmCertificate>,
}

#[derive(Debug, Deserialize)]
struct DsmCertificate {
    id: String,
    #[serde(default)]
    desc: String,
    #[serde(default)]
    is_default: bool,
    /// Kept as raw JSON, the service objects are echoed back verbatim
    #[serde(default)]
    services: Vec<Value>,
}

#[derive(Debug, Serialize)]
struct ServiceCertificateSetting<'a> {
    service: &'a Value,
    old_id: &'a str,
    id: &'a str,
}

/// An authenticated DSM web API session
#[derive(Debug)]
struct DsmSession {
    api_path: String,
    api_version: i64,
    sid: String,
    synotoken: String,
}

/// Synology DSM deployer
pub struct SynologyDsmDeployer {
    config: SynologyDsmConfig,
    credentials: SynologyDsmCredentials,
    base_url: String,
    client: Client,
    logger: DeployLogger,
}

impl SynologyDsmDeployer {
    pub fn new(
        credentials: SynologyDsmCredentials,
        config: SynologyDsmConfig,
    ) -> Result<Self, DeployError> {
        let base_url = parse_server_url(&credentials.server_url)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(credentials.allow_insecure_connections)
            .build()
            .map_err(|e| DeployError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            credentials,
            base_url,
            client,
            logger: DeployLogger::tracing(ProviderType::SYNOLOGY_DSM.as_str()),
        })
    }

    fn webapi_url(&self, path: &str) -> String {
        format!("{}/webapi/{}", self.base_url, path)
    }

    async fn read_response<T: DeserializeOwned>(
        &self,
        operation: &str,
        response: reqwest::Response,
    ) -> Result<DsmResponse<T>, DeployError> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DeployError::vendor(operation, e))?;
        self.logger.sdk_request(operation, (status.as_u16(), &text));

        if !status.is_success() {
            return Err(DeployError::vendor(
                operation,
                format!("API returned status {}: {}", status, text),
            ));
        }

        serde_json::from_str(&text)
            .map_err(|e| DeployError::vendor(operation, format!("Failed to parse response: {}", e)))
    }

    /// Unwrap `data`, or report the DSM error code
    fn expect_success<T>(operation: &str, response: DsmResponse<T>) -> Result<Option<T>, DeployError> {
        if response.success {
            return Ok(response.data);
        }
        Err(DeployError::vendor(
            operation,
            match response.error {
                Some(error) => format!("failed with error code: {}", error.code),
                None => "failed: unknown error".to_string(),
            },
        ))
    }

    async fn login(&self, otp_code: Option<&str>) -> Result<DsmSession, DeployError> {
        let operation = "SYNO.API.Info.query";
        let response = self
            .client
            .get(self.webapi_url("query.cgi"))
            .query(&[
                ("api", "SYNO.API.Info"),
                ("version", "1"),
                ("method", "query"),
                ("query", AUTH_API),
            ])
            .send()
            .await
            .map_err(|e| DeployError::vendor(operation, e))?;
        let info: DsmResponse<HashMap<String, ApiInfo>> =
            self.read_response(operation, response).await?;
        let auth = Self::expect_success(operation, info)?
            .and_then(|mut apis| apis.remove(AUTH_API))
            .ok_or_else(|| DeployError::vendor(operation, "SYNO.API.Auth not found in API info"))?;

        let operation = "SYNO.API.Auth.login";
        let version = auth.max_version.to_string();
        let mut params = vec![
            ("api", AUTH_API),
            ("version", version.as_str()),
            ("method", "login"),
            ("format", "sid"),
            ("account", self.credentials.username.as_str()),
            ("passwd", self.credentials.password.as_str()),
            ("enable_syno_token", "yes"),
        ];
        if let Some(code) = otp_code {
            params.push(("otp_code", code));
            params.push(("enable_device_token", "yes"));
            params.push(("device_name", DEVICE_NAME));
        }

        let response = self
            .client
            .get(self.webapi_url(&auth.path))
            .query(&params)
            .send()
            .await
            .map_err(|e| DeployError::vendor(operation, e))?;
        let login: DsmResponse<LoginData> = self.read_response(operation, response).await?;

        if !login.success {
            let message = match login.error {
                Some(error) => format!(
                    "login failed: {} (error code: {})",
                    auth_error_description(error.code),
                    error.code
                ),
                None => "login failed: unknown error".to_string(),
            };
            return Err(DeployError::vendor(operation, message));
        }

        let data = login
            .data
            .filter(|d| !d.sid.is_empty() && !d.synotoken.is_empty())
            .ok_or_else(|| {
                DeployError::vendor(operation, "login succeeded but session ID or SynoToken is empty")
            })?;

        Ok(DsmSession {
            api_path: auth.path,
            api_version: auth.max_version,
            sid: data.sid,
            synotoken: data.synotoken,
        })
    }

    async fn logout(&self, session: &DsmSession) -> Result<(), DeployError> {
        let operation = "SYNO.API.Auth.logout";
        let version = session.api_version.to_string();
        let response = self
            .client
            .get(self.webapi_url(&session.api_path))
            .query(&[
                ("api", AUTH_API),
                ("version", version.as_str()),
                ("method", "logout"),
                ("_sid", session.sid.as_str()),
            ])
            .send()
            .await
            .map_err(|e| DeployError::vendor(operation, e))?;
        self.logger
            .sdk_request(operation, response.status().as_u16());
        Ok(())
    }

    async fn list_certificates(&self, session: &DsmSession) -> Result<Vec<DsmCertificate>, DeployError> {
        let operation = "SYNO.Core.Certificate.CRT.list";
        let response = self
            .client
            .post(self.webapi_url("entry.cgi"))
            .header("X-SYNO-TOKEN", &session.synotoken)
            .form(&[
                ("api", "SYNO.Core.Certificate.CRT"),
                ("method", "list"),
                ("version", "1"),
                ("_sid", session.sid.as_str()),
            ])
            .send()
            .await
            .map_err(|e| DeployError::vendor(operation, e))?;
        let list: DsmResponse<CertificateList> = self.read_response(operation, response).await?;

        Ok(Self::expect_success(operation, list)?
            .map(|l| l.certificates)
            .unwrap_or_default())
    }

    async fn import_certificate(
        &self,
        session: &DsmSession,
        server_pem: String,
        private_key_pem: String,
        intermediate_pem: String,
        certificate_id: &str,
    ) -> Result<(), DeployError> {
        let operation = "SYNO.Core.Certificate.import";

        let file_part = |content: String, file_name: &'static str| {
            Part::text(content).file_name(file_name)
        };

        // DSM expects the key first and requires id/desc even when empty
        let mut form = Form::new()
            .part("key", file_part(private_key_pem, "privkey.pem"))
            .part("cert", file_part(server_pem, "cert.pem"))
            .part("inter_cert", file_part(intermediate_pem, "chain.pem"))
            .text("id", certificate_id.to_string())
            .text("desc", self.config.certificate_name.clone());
        if self.config.is_default {
            form = form.text("as_default", "true");
        }

        let response = self
            .client
            .post(self.webapi_url("entry.cgi"))
            .query(&[
                ("api", "SYNO.Core.Certificate"),
                ("method", "import"),
                ("version", "1"),
                ("SynoToken", session.synotoken.as_str()),
                ("_sid", session.sid.as_str()),
            ])
            .header("X-SYNO-TOKEN", &session.synotoken)
            .multipart(form)
            .send()
            .await
            .map_err(|e| DeployError::vendor(operation, e))?;
        let import: DsmResponse<Value> = self.read_response(operation, response).await?;
        Self::expect_success(operation, import)?;
        Ok(())
    }

    /// Point every service that uses another certificate at `new_id`
    async fn assign_to_all_services(&self, session: &DsmSession, new_id: &str) -> Result<(), DeployError> {
        let operation = "SYNO.Core.Certificate.Service.set";

        let certificates = self.list_certificates(session).await?;
        let settings: Vec<ServiceCertificateSetting<'_>> = certificates
            .iter()
            .filter(|c| c.id != new_id)
            .flat_map(|c| {
                c.services.iter().map(move |service| ServiceCertificateSetting {
                    service,
                    old_id: &c.id,
                    id: new_id,
                })
            })
            .collect();

        if settings.is_empty() {
            return Ok(());
        }

        let settings = serde_json::to_string(&settings)?;
        let response = self
            .client
            .post(self.webapi_url("entry.cgi"))
            .query(&[("_sid", session.sid.as_str())])
            .header("X-SYNO-TOKEN", &session.synotoken)
            .form(&[
                ("api", "SYNO.Core.Certificate.Service"),
                ("method", "set"),
                ("version", "1"),
                ("settings", settings.as_str()),
            ])
            .send()
            .await
            .map_err(|e| DeployError::vendor(operation, e))?;
        let set: DsmResponse<Value> = self.read_response(operation, response).await?;
        Self::expect_success(operation, set)?;
        Ok(())
    }

    async fn deploy_in_session(
        &self,
        session: &DsmSession,
        cancel: &CancellationToken,
        server_pem: String,
        intermediate_pem: String,
        private_key_pem: &str,
    ) -> Result<(), DeployError> {
        let mut certificate_id = self.config.certificate_id.clone();

        if certificate_id.is_empty() && !self.config.certificate_name.is_empty() {
            if cancel.is_cancelled() {
                return Err(DeployError::Cancelled);
            }
            self.logger.info(format!(
                "searching for certificate by name '{}'",
                self.config.certificate_name
            ));
            let existing = self
                .list_certificates(session)
                .await?
                .into_iter()
                .find(|c| c.desc == self.config.certificate_name);
            match existing {
                Some(cert) => {
                    self.logger
                        .info(format!("found existing certificate '{}'", cert.id));
                    certificate_id = cert.id;
                }
                None => self
                    .logger
                    .info("certificate not found, a new one will be created"),
            }
        }

        if cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }
        self.logger.info(format!(
            "importing certificate (id: '{}', description: '{}', default: {})",
            certificate_id, self.config.certificate_name, self.config.is_default
        ));
        self.import_certificate(
            session,
            server_pem,
            private_key_pem.to_string(),
            intermediate_pem,
            &certificate_id,
        )
        .await?;

        if self.config.is_default && !cancel.is_cancelled() {
            // the imported certificate is now flagged as the default one
            match self.list_certificates(session).await {
                Ok(certificates) => {
                    if let Some(default) = certificates.into_iter().find(|c| c.is_default) {
                        if let Err(e) = self.assign_to_all_services(session, &default.id).await {
                            self.logger
                                .warn(format!("failed to set certificate for all services: {}", e));
                        }
                    }
                }
                Err(e) => self
                    .logger
                    .warn(format!("failed to list certificates after import: {}", e)),
            }
        }

        Ok(())
    }
}

#[async_trait]
impl DeploymentProvider for SynologyDsmDeployer {
    fn provider_type(&self) -> ProviderType {
        ProviderType::SYNOLOGY_DSM
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
        if private_key_pem.trim().is_empty() {
            return Err(DeployError::Configuration(
                "private key PEM is empty".to_string(),
            ));
        }
        let (server_pem, intermediate_pem) = split_certificate_chain(certificate_pem)?;

        let otp_code = match self.credentials.totp_secret.as_deref().map(str::trim) {
            Some(secret) if !secret.is_empty() => Some(generate_otp_code(secret)?),
            _ => None,
        };

        if cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }
        self.logger
            .info(format!("logging in to Synology DSM at {}", self.base_url));
        let session = self.login(otp_code.as_deref()).await?;

        let result = self
            .deploy_in_session(&session, cancel, server_pem, intermediate_pem, private_key_pem)
            .await;

        if let Err(e) = self.logout(&session).await {
            self.logger
                .warn(format!("failed to logout from Synology DSM: {}", e));
        }

        result?;
        self.logger.info("certificate imported successfully");
        Ok(DeployResult::default())
    }
}

/// Registry constructor
pub fn create(options: &ProviderFactoryOptions) -> Result<Box<dyn DeploymentProvider>, DeployError> {
    let credentials: SynologyDsmCredentials = populate(&options.access_config)?;
    let config = SynologyDsmConfig::from_extended(&options.extended_config);
    Ok(Box::new(SynologyDsmDeployer::new(credentials, config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{generate_simple_self_signed, CertifiedKey};

    fn self_signed(name: &str) -> String {
        let CertifiedKey { cert, .. } = generate_simple_self_signed(vec![name.to_string()]).unwrap();
        cert.pem()
    }

    #[test]
    fn test_parse_server_url_defaults() {
        assert_eq!(parse_server_url("nas.local").unwrap(), "http://nas.local:5000");
        assert_eq!(
            parse_server_url("https://nas.local").unwrap(),
            "https://nas.local:5001"
        );
        assert_eq!(
            parse_server_url("https://192.168.1.10:8443/").unwrap(),
            "https://192.168.1.10:8443"
        );
        assert_eq!(parse_server_url("nas.local:6000").unwrap(), "http://nas.local:6000");
        assert!(parse_server_url("ftp://nas.local").is_err());
    }

    #[test]
    fn test_totp_matches_rfc6238_vector() {
        // "12345678901234567890" in base32, T = 59s
        let totp = totp_for("gezd gnbv gy3t qojq gezd gnbv gy3t qojq").unwrap();
        assert_eq!(totp.generate(59), "287082");
    }

    #[test]
    fn test_short_totp_secret_is_accepted() {
        let code = generate_otp_code("JBSWY3DPEHPK3PXP").unwrap();
        assert_eq!(code.len(), 6);
        assert!(generate_otp_code("not base32 !").is_err());
    }

    #[test]
    fn test_split_certificate_chain() {
        let leaf = self_signed("nas.example.com");
        let intermediate = self_signed("Example Intermediate");
        let chain = format!("{}{}", leaf, intermediate);

        let (server, rest) = split_certificate_chain(&chain).unwrap();
        assert_eq!(server.matches("BEGIN CERTIFICATE").count(), 1);
        assert_eq!(rest.matches("BEGIN CERTIFICATE").count(), 1);
        assert_eq!(
            crate::domains::CertificateHostnames::from_pem(&server)
                .unwrap()
                .dns_names(),
            &["nas.example.com"]
        );

        let (_, rest) = split_certificate_chain(&leaf).unwrap();
        assert!(rest.is_empty());

        assert!(split_certificate_chain("not a pem").is_err());
    }

    #[test]
    fn test_auth_error_descriptions() {
        assert_eq!(
            auth_error_description(403),
            "2-factor authentication code required (OTP)"
        );
        assert_eq!(auth_error_description(999), "Unknown authentication error");
    }
}
