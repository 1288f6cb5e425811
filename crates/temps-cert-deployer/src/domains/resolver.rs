//! Domain resolution
//!
//! Turns a [`DomainMatchPattern`] plus [`DomainSpec`] into the set of remote
//! domains that should receive the certificate. The vendor inventory is only
//! fetched when the pattern needs it, and at most once per resolution.

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;

use crate::domains::hostname::CertificateHostnames;
use crate::domains::pattern::{is_wildcard, wildcard_matches, DomainMatchPattern, DomainSpec};
use crate::errors::DeployError;
use crate::logger::DeployLogger;
use crate::vendor::{DomainInventory, InventoryEntry};

/// Ordered, de-duplicated set of domains selected for update
///
/// Domain names compare case-insensitively; the first spelling inserted is
/// the one kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSet {
    ordered: Vec<String>,
    seen: HashSet<String>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a domain; returns false if it was already present
    pub fn insert(&mut self, domain: impl Into<String>) -> bool {
        let domain = domain.into();
        if !self.seen.insert(domain.to_ascii_lowercase()) {
            return false;
        }
        self.ordered.push(domain);
        true
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.seen.contains(&domain.to_ascii_lowercase())
    }

    /// Keep only the domains for which `keep` returns true
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        let seen = &mut self.seen;
        self.ordered.retain(|domain| {
            let kept = keep(domain);
            if !kept {
                seen.remove(&domain.to_ascii_lowercase());
            }
            kept
        });
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.ordered
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.ordered.iter()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.ordered
    }
}

/// Fetch the complete vendor inventory.
///
/// Pages are requested from offset 0 in steps of the vendor's page size; the
/// loop ends at the first page shorter than requested. Cancellation is checked
/// before every page.
pub async fn fetch_inventory(
    inventory: &dyn DomainInventory,
    cancel: &CancellationToken,
    logger: &DeployLogger,
) -> Result<Vec<InventoryEntry>, DeployError> {
    let limit = inventory.page_size();
    if limit == 0 {
        return Err(DeployError::Resolution(
            "inventory page size must be greater than zero".to_string(),
        ));
    }

    let mut entries = Vec::new();
    let mut offset = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }

        let page = inventory
            .list_domains(offset, limit)
            .await
            .map_err(|e| match e {
                DeployError::Cancelled => DeployError::Cancelled,
                other => DeployError::Resolution(format!(
                    "could not list domain inventory: {}",
                    other
                )),
            })?;

        let fetched = page.len();
        entries.extend(page);

        if fetched < limit {
            break;
        }
        offset += limit;
    }

    logger.debug(format!("fetched {} inventory domains", entries.len()));
    Ok(entries)
}

/// Expands configured domains into concrete remote domains
pub struct DomainResolver<'a> {
    inventory: Option<&'a dyn DomainInventory>,
    logger: &'a DeployLogger,
}

impl<'a> DomainResolver<'a> {
    pub fn new(inventory: Option<&'a dyn DomainInventory>, logger: &'a DeployLogger) -> Self {
        Self { inventory, logger }
    }

    /// Resolve `spec` into `candidates`.
    ///
    /// Returns the inventory when one had to be fetched so later stages can
    /// reuse it instead of listing the vendor's domains again.
    pub async fn resolve(
        &self,
        cancel: &CancellationToken,
        pattern: DomainMatchPattern,
        spec: &DomainSpec,
        certificate_pem: &str,
        candidates: &mut CandidateSet,
    ) -> Result<Option<Vec<InventoryEntry>>, DeployError> {
        match pattern {
            DomainMatchPattern::Exact => {
                for name in spec.names() {
                    candidates.insert(name.as_str());
                }
                Ok(None)
            }
            DomainMatchPattern::Wildcard => self.resolve_wildcard(cancel, spec, candidates).await,
            DomainMatchPattern::CertificateSan => {
                self.resolve_certificate_san(cancel, certificate_pem, candidates)
                    .await
            }
        }
    }

    async fn resolve_wildcard(
        &self,
        cancel: &CancellationToken,
        spec: &DomainSpec,
        candidates: &mut CandidateSet,
    ) -> Result<Option<Vec<InventoryEntry>>, DeployError> {
        let mut fetched: Option<Vec<InventoryEntry>> = None;

        for name in spec.names() {
            if !is_wildcard(name) {
                candidates.insert(name.as_str());
                continue;
            }

            if fetched.is_none() {
                fetched = Some(self.fetch(cancel).await?);
            }
            let entries = fetched.as_deref().unwrap_or_default();

            let mut matched = 0;
            for entry in entries.iter().filter(|e| wildcard_matches(name, &e.name)) {
                candidates.insert(entry.name.as_str());
                matched += 1;
            }

            if matched == 0 {
                return Err(DeployError::Resolution(format!(
                    "could not find any domains matched by wildcard '{}'",
                    name
                )));
            }
            self.logger
                .debug(format!("wildcard '{}' matched {} domains", name, matched));
        }

        Ok(fetched)
    }

    async fn resolve_certificate_san(
        &self,
        cancel: &CancellationToken,
        certificate_pem: &str,
        candidates: &mut CandidateSet,
    ) -> Result<Option<Vec<InventoryEntry>>, DeployError> {
        let hostnames = CertificateHostnames::from_pem(certificate_pem)?;
        let entries = self.fetch(cancel).await?;

        let before = candidates.len();
        for entry in entries.iter().filter(|e| hostnames.verify(&e.name)) {
            candidates.insert(entry.name.as_str());
        }

        if candidates.len() == before {
            return Err(DeployError::Resolution(
                "could not find any domains matched by certificate".to_string(),
            ));
        }

        Ok(Some(entries))
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<InventoryEntry>, DeployError> {
        let inventory = self.inventory.ok_or_else(|| {
            DeployError::NotSupported("this provider cannot list its domains".to_string())
        })?;
        fetch_inventory(inventory, cancel, self.logger).await
    }
}
