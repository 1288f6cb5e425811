//! Domain match patterns and configured domain specifications

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// How configured domain names are expanded into remote domains
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainMatchPattern {
    /// Configured names are used verbatim
    #[default]
    Exact,
    /// `*.suffix` entries expand to single-label subdomains found in the inventory
    Wildcard,
    /// Every inventory domain the deployed certificate is valid for
    #[serde(rename = "certsan")]
    CertificateSan,
}

impl DomainMatchPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainMatchPattern::Exact => "exact",
            DomainMatchPattern::Wildcard => "wildcard",
            DomainMatchPattern::CertificateSan => "certsan",
        }
    }

    /// Whether resolving with this pattern needs the remote inventory
    pub fn needs_inventory(&self, spec: &DomainSpec) -> bool {
        match self {
            DomainMatchPattern::Exact => false,
            DomainMatchPattern::Wildcard => spec.has_wildcards(),
            DomainMatchPattern::CertificateSan => true,
        }
    }
}

impl FromStr for DomainMatchPattern {
    type Err = DeployError;

    /// An empty value selects [`DomainMatchPattern::Exact`]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "exact" => Ok(DomainMatchPattern::Exact),
            "wildcard" => Ok(DomainMatchPattern::Wildcard),
            "certsan" => Ok(DomainMatchPattern::CertificateSan),
            other => Err(DeployError::Configuration(format!(
                "unsupported domain match pattern: '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for DomainMatchPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configured target domain names, possibly containing `*.` wildcards
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainSpec(Vec<String>);

impl DomainSpec {
    /// Build from a list, dropping blank entries
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        DomainSpec(
            names
                .into_iter()
                .map(|n| n.as_ref().trim().to_string())
                .filter(|n| !n.is_empty())
                .collect(),
        )
    }

    /// Parse a `;`, `,` or newline separated list
    pub fn parse(raw: &str) -> Self {
        Self::new(raw.split(|c| c == ';' || c == ',' || c == '\n'))
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_wildcards(&self) -> bool {
        self.0.iter().any(|n| is_wildcard(n))
    }
}

/// True for names of the form `*.suffix`
pub fn is_wildcard(name: &str) -> bool {
    name.starts_with("*.")
}

/// Single-level wildcard match.
///
/// `*.example.com` matches `a.example.com` but neither `example.com` nor
/// `sub.b.example.com`. Comparison ignores ASCII case.
pub fn wildcard_matches(wildcard: &str, name: &str) -> bool {
    if !is_wildcard(wildcard) {
        return false;
    }

    // keep the leading dot so "badexample.com" never matches "*.example.com"
    let suffix = wildcard[1..].to_ascii_lowercase();
    let name = name.to_ascii_lowercase();

    match name.strip_suffix(suffix.as_str()) {
        Some(prefix) => !prefix.is_empty() && !prefix.contains('.'),
        None => false,
    }
}
