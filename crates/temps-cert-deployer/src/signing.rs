//! HMAC-SHA256 request signers for vendor APIs
//!
//! Both schemes derive a signing key from the secret by chaining HMACs over a
//! credential scope, then sign a canonical form of the request.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::errors::DeployError;

type HmacSha256 = Hmac<Sha256>;

fn hmac_sha256(key: &[u8], data: &str) -> Result<Vec<u8>, DeployError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| DeployError::Configuration(format!("invalid signing key: {}", e)))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Tencent Cloud API v3 signer (`TC3-HMAC-SHA256`)
#[derive(Clone)]
pub struct Tc3Signer {
    secret_id: String,
    secret_key: String,
}

impl Tc3Signer {
    pub fn new(secret_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            secret_id: secret_id.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Build the `Authorization` header for a JSON `POST /` request
    pub fn authorization(
        &self,
        service: &str,
        host: &str,
        action: &str,
        payload: &str,
        now: DateTime<Utc>,
    ) -> Result<String, DeployError> {
        let timestamp = now.timestamp();
        let date = now.format("%Y-%m-%d").to_string();

        let signed_headers = "content-type;host;x-tc-action";
        let canonical_headers = format!(
            "content-type:application/json; charset=utf-8\nhost:{}\nx-tc-action:{}\n",
            host,
            action.to_lowercase()
        );
        let canonical_request = format!(
            "POST\n/\n\n{}\n{}\n{}",
            canonical_headers,
            signed_headers,
            sha256_hex(payload.as_bytes())
        );

        let scope = format!("{}/{}/tc3_request", date, service);
        let string_to_sign = format!(
            "TC3-HMAC-SHA256\n{}\n{}\n{}",
            timestamp,
            scope,
            sha256_hex(canonical_request.as_bytes())
        );

        let k_date = hmac_sha256(format!("TC3{}", self.secret_key).as_bytes(), &date)?;
        let k_service = hmac_sha256(&k_date, service)?;
        let k_signing = hmac_sha256(&k_service, "tc3_request")?;
        let signature = hex::encode(hmac_sha256(&k_signing, &string_to_sign)?);

        Ok(format!(
            "TC3-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.secret_id, scope, signed_headers, signature
        ))
    }
}

/// Volcengine OpenAPI signer (`HMAC-SHA256`, V4 style)
#[derive(Clone)]
pub struct VolcengineSigner {
    access_key_id: String,
    secret_access_key: String,
}

/// Headers produced by [`VolcengineSigner::sign`]
#[derive(Debug, Clone)]
pub struct VolcengineSignature {
    pub x_date: String,
    pub x_content_sha256: String,
    pub authorization: String,
}

impl VolcengineSigner {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn sign(
        &self,
        method: &str,
        host: &str,
        query: &[(&str, &str)],
        content_type: &str,
        payload: &[u8],
        region: &str,
        service: &str,
        now: DateTime<Utc>,
    ) -> Result<VolcengineSignature, DeployError> {
        let x_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let short_date = now.format("%Y%m%d").to_string();
        let payload_hash = sha256_hex(payload);

        let signed_headers = "content-type;host;x-content-sha256;x-date";
        let canonical_headers = format!(
            "content-type:{}\nhost:{}\nx-content-sha256:{}\nx-date:{}\n",
            content_type, host, payload_hash, x_date
        );
        let canonical_request = format!(
            "{}\n/\n{}\n{}\n{}\n{}",
            method,
            canonical_query(query),
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let scope = format!("{}/{}/{}/request", short_date, region, service);
        let string_to_sign = format!(
            "HMAC-SHA256\n{}\n{}\n{}",
            x_date,
            scope,
            sha256_hex(canonical_request.as_bytes())
        );

        let k_date = hmac_sha256(self.secret_access_key.as_bytes(), &short_date)?;
        let k_region = hmac_sha256(&k_date, region)?;
        let k_service = hmac_sha256(&k_region, service)?;
        let k_signing = hmac_sha256(&k_service, "request")?;
        let signature = hex::encode(hmac_sha256(&k_signing, &string_to_sign)?);

        Ok(VolcengineSignature {
            x_date,
            x_content_sha256: payload_hash,
            authorization: format!(
                "HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
                self.access_key_id, scope, signed_headers, signature
            ),
        })
    }
}

/// Sorted, RFC 3986 encoded query string
pub fn canonical_query(query: &[(&str, &str)]) -> String {
    let mut pairs: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn percent_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
        .replace('*', "%2A")
        .replace("%7E", "~")
}
