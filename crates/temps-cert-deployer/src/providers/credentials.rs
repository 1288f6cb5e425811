//! Deployment provider access credentials
//!
//! Populated from the workflow's access config map by [`crate::config::populate`].
//! Keys use the camelCase names the workflow layer stores.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{lenient, require, RequiredFields};

/// Tencent Cloud API key pair
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TencentCloudCredentials {
    pub secret_id: String,
    pub secret_key: String,

    /// Optional API endpoint, e.g. `teo.intl.tencentcloudapi.com` for the
    /// international site
    pub endpoint: String,
}

impl RequiredFields for TencentCloudCredentials {
    const NAME: &'static str = "tencentcloud";

    fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        require(&mut missing, "secretId", &self.secret_id);
        require(&mut missing, "secretKey", &self.secret_key);
        missing
    }
}

impl fmt::Debug for TencentCloudCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TencentCloudCredentials")
            .field("secret_id", &self.secret_id)
            .field("secret_key", &"***")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Volcengine access key pair
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VolcengineCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl RequiredFields for VolcengineCredentials {
    const NAME: &'static str = "volcengine";

    fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        require(&mut missing, "accessKeyId", &self.access_key_id);
        require(&mut missing, "secretAccessKey", &self.secret_access_key);
        missing
    }
}

impl fmt::Debug for VolcengineCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolcengineCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .finish()
    }
}

/// Fly.io API token
///
/// Create with `fly tokens create deploy` or in the dashboard.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlyioCredentials {
    pub api_token: String,
}

impl RequiredFields for FlyioCredentials {
    const NAME: &'static str = "flyio";

    fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        require(&mut missing, "apiToken", &self.api_token);
        missing
    }
}

impl fmt::Debug for FlyioCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlyioCredentials")
            .field("api_token", &"***")
            .finish()
    }
}

/// Synology DiskStation Manager login
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SynologyDsmCredentials {
    /// e.g. `https://nas.local:5001`; scheme and port are optional
    pub server_url: String,
    pub username: String,
    pub password: String,

    /// Base32 TOTP secret for accounts with 2-step verification
    pub totp_secret: Option<String>,

    /// Accept self-signed DSM certificates
    #[serde(deserialize_with = "lenient::bool")]
    pub allow_insecure_connections: bool,
}

impl RequiredFields for SynologyDsmCredentials {
    const NAME: &'static str = "synologydsm";

    fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        require(&mut missing, "serverUrl", &self.server_url);
        require(&mut missing, "username", &self.username);
        require(&mut missing, "password", &self.password);
        missing
    }
}

impl fmt::Debug for SynologyDsmCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynologyDsmCredentials")
            .field("server_url", &self.server_url)
            .field("username", &self.username)
            .field("password", &"***")
            .field("totp_secret", &self.totp_secret.as_ref().map(|_| "***"))
            .field(
                "allow_insecure_connections",
                &self.allow_insecure_connections,
            )
            .finish()
    }
}
