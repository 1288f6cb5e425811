//! Hostname verification against a certificate's subject alternative names
//!
//! Follows the usual TLS client rules: only SAN entries are consulted (the
//! subject common name is ignored), a `*` is honoured only as the entire
//! leftmost label, and IP literals are compared against IP address SANs.

use std::net::IpAddr;

use x509_parser::prelude::*;

use crate::errors::DeployError;

/// Names a leaf certificate is valid for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateHostnames {
    dns_names: Vec<String>,
    ip_addresses: Vec<IpAddr>,
}

impl CertificateHostnames {
    /// Read the SANs of the first certificate in a PEM bundle
    pub fn from_pem(certificate_pem: &str) -> Result<Self, DeployError> {
        let (_, pem) = x509_parser::pem::parse_x509_pem(certificate_pem.as_bytes())
            .map_err(|e| DeployError::Certificate(format!("Failed to parse PEM: {}", e)))?;

        let cert = pem
            .parse_x509()
            .map_err(|e| DeployError::Certificate(format!("Failed to parse X509: {}", e)))?;

        let mut hostnames = CertificateHostnames::default();

        let san = cert
            .subject_alternative_name()
            .map_err(|e| DeployError::Certificate(format!("Invalid SAN extension: {}", e)))?;

        if let Some(san) = san {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => hostnames.dns_names.push(dns.to_ascii_lowercase()),
                    GeneralName::IPAddress(bytes) => {
                        if let Some(ip) = ip_from_bytes(bytes) {
                            hostnames.ip_addresses.push(ip);
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(hostnames)
    }

    pub fn dns_names(&self) -> &[String] {
        &self.dns_names
    }

    pub fn ip_addresses(&self) -> &[IpAddr] {
        &self.ip_addresses
    }

    /// Whether a TLS client would accept this certificate for `host`
    pub fn verify(&self, host: &str) -> bool {
        let candidate = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = candidate.parse::<IpAddr>() {
            return self.ip_addresses.contains(&ip);
        }

        let candidate = candidate.to_ascii_lowercase();
        self.dns_names
            .iter()
            .any(|pattern| match_hostname(pattern, &candidate))
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        _ => None,
    }
}

/// Compare a (lowercase) SAN pattern with a (lowercase) hostname label by label
pub fn match_hostname(pattern: &str, host: &str) -> bool {
    let host = host.strip_suffix('.').unwrap_or(host);
    let pattern = pattern.strip_suffix('.').unwrap_or(pattern);

    if pattern.is_empty() || host.is_empty() {
        return false;
    }

    let pattern_labels: Vec<&str> = pattern.split('.').collect();
    let host_labels: Vec<&str> = host.split('.').collect();

    if pattern_labels.len() != host_labels.len() {
        return false;
    }

    pattern_labels
        .iter()
        .zip(host_labels.iter())
        .enumerate()
        .all(|(i, (p, h))| (i == 0 && *p == "*" && !h.is_empty()) || p == h)
}
