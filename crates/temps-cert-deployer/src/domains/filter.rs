//! Idempotency filter
//!
//! Drops candidates the vendor already serves with the certificate about to be
//! deployed. A domain is only dropped on positive confirmation; anything the
//! filter cannot check proceeds to the update stage.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::domains::resolver::{fetch_inventory, CandidateSet};
use crate::errors::DeployError;
use crate::logger::DeployLogger;
use crate::vendor::{BindingInspector, DomainInventory, InventoryEntry};

pub struct IdempotencyFilter<'a> {
    inventory: Option<&'a dyn DomainInventory>,
    inspector: Option<&'a dyn BindingInspector>,
    logger: &'a DeployLogger,
}

impl<'a> IdempotencyFilter<'a> {
    pub fn new(logger: &'a DeployLogger) -> Self {
        Self {
            inventory: None,
            inspector: None,
            logger,
        }
    }

    /// Use inventory entries that report their bound certificate
    pub fn with_inventory(mut self, inventory: Option<&'a dyn DomainInventory>) -> Self {
        self.inventory = inventory.filter(|i| i.reports_bindings());
        self
    }

    /// Fall back to a per-domain binding lookup
    pub fn with_inspector(mut self, inspector: Option<&'a dyn BindingInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    /// Whether this filter can ever remove a domain
    pub fn is_active(&self) -> bool {
        self.inventory.is_some() || self.inspector.is_some()
    }

    /// Remove candidates already bound to `certificate_id`, returning how many
    /// were removed.
    ///
    /// `prefetched` is the inventory pulled during resolution, if any; it is
    /// reused instead of listing the vendor's domains a second time.
    pub async fn apply(
        &self,
        cancel: &CancellationToken,
        certificate_id: &str,
        prefetched: Option<&[InventoryEntry]>,
        candidates: &mut CandidateSet,
    ) -> Result<usize, DeployError> {
        if candidates.is_empty() {
            return Ok(0);
        }

        let before = candidates.len();

        if let Some(inventory) = self.inventory {
            let owned;
            let entries = match prefetched {
                Some(entries) => entries,
                None => match fetch_inventory(inventory, cancel, self.logger).await {
                    Ok(entries) => {
                        owned = entries;
                        owned.as_slice()
                    }
                    Err(DeployError::Cancelled) => return Err(DeployError::Cancelled),
                    Err(e) => {
                        self.logger.warn(format!(
                            "could not list domains to check existing bindings, updating all: {}",
                            e
                        ));
                        return Ok(0);
                    }
                },
            };

            let bound: HashMap<String, &InventoryEntry> = entries
                .iter()
                .map(|e| (e.name.to_ascii_lowercase(), e))
                .collect();

            candidates.retain(|domain| {
                let already = bound
                    .get(&domain.to_ascii_lowercase())
                    .is_some_and(|e| e.is_bound(certificate_id));
                if already {
                    self.logger.info(format!(
                        "domain '{}' already uses certificate '{}', skipping",
                        domain, certificate_id
                    ));
                }
                !already
            });
        } else if let Some(inspector) = self.inspector {
            let mut already_bound = Vec::new();

            for domain in candidates.iter() {
                if cancel.is_cancelled() {
                    return Err(DeployError::Cancelled);
                }

                match inspector.describe_binding(domain).await {
                    Ok(Some(current)) if current == certificate_id => {
                        self.logger.info(format!(
                            "domain '{}' already uses certificate '{}', skipping",
                            domain, certificate_id
                        ));
                        already_bound.push(domain.clone());
                    }
                    Ok(_) => {}
                    Err(DeployError::Cancelled) => return Err(DeployError::Cancelled),
                    Err(e) => {
                        self.logger.warn(format!(
                            "could not inspect certificate binding of domain '{}', updating anyway: {}",
                            domain, e
                        ));
                    }
                }
            }

            candidates.retain(|domain| !already_bound.iter().any(|d| d == domain));
        }

        Ok(before - candidates.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct BindingInventory {
        entries: Vec<InventoryEntry>,
        reports: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DomainInventory for BindingInventory {
        fn page_size(&self) -> usize {
            100
        }

        fn reports_bindings(&self) -> bool {
            self.reports
        }

        async fn list_domains(&self, offset: usize, _: usize) -> Result<Vec<InventoryEntry>, DeployError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.entries.iter().skip(offset).cloned().collect())
        }
    }

    /// Reports bindings but refuses to list anything
    struct DeniedInventory {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DomainInventory for DeniedInventory {
        fn page_size(&self) -> usize {
            100
        }

        fn reports_bindings(&self) -> bool {
            true
        }

        async fn list_domains(&self, _: usize, _: usize) -> Result<Vec<InventoryEntry>, DeployError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(DeployError::vendor(
                "teo.DescribeAccelerationDomains",
                "UnauthorizedOperation",
            ))
        }
    }

    struct MapInspector(HashMap<&'static str, Result<Option<&'static str>, &'static str>>);

    #[async_trait]
    impl BindingInspector for MapInspector {
        async fn describe_binding(&self, domain: &str) -> Result<Option<String>, DeployError> {
            match self.0.get(domain) {
                Some(Ok(id)) => Ok(id.map(str::to_string)),
                Some(Err(msg)) => Err(DeployError::vendor("cdn.DescribeDomain", msg)),
                None => Ok(None),
            }
        }
    }

    fn candidates(names: &[&str]) -> CandidateSet {
        let mut set = CandidateSet::new();
        for n in names {
            set.insert(*n);
        }
        set
    }

    fn inventory(reports: bool) -> BindingInventory {
        BindingInventory {
            entries: vec![
                InventoryEntry::bound_to("a.example.com", "cert-new"),
                InventoryEntry::bound_to("b.example.com", "cert-old"),
                InventoryEntry::new("c.example.com"),
            ],
            reports,
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn test_drops_only_confirmed_bindings_from_prefetched_inventory() {
        let inv = inventory(true);
        let logger = DeployLogger::discard();
        let filter = IdempotencyFilter::new(&logger).with_inventory(Some(&inv));

        let mut set = candidates(&["a.example.com", "b.example.com", "c.example.com", "d.example.com"]);
        let skipped = filter
            .apply(&CancellationToken::new(), "cert-new", Some(inv.entries.as_slice()), &mut set)
            .await
            .unwrap();

        assert_eq!(skipped, 1);
        assert_eq!(
            set.into_vec(),
            vec!["b.example.com", "c.example.com", "d.example.com"]
        );
        assert_eq!(inv.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fetches_inventory_when_not_prefetched() {
        let inv = inventory(true);
        let logger = DeployLogger::discard();
        let filter = IdempotencyFilter::new(&logger).with_inventory(Some(&inv));

        let mut set = candidates(&["a.example.com", "b.example.com"]);
        filter
            .apply(&CancellationToken::new(), "cert-new", None, &mut set)
            .await
            .unwrap();

        assert_eq!(set.into_vec(), vec!["b.example.com"]);
        assert_eq!(inv.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_inventory_listing_keeps_every_candidate() {
        let inv = DeniedInventory {
            calls: AtomicUsize::new(0),
        };
        let logger = DeployLogger::discard();
        let filter = IdempotencyFilter::new(&logger).with_inventory(Some(&inv));

        let mut set = candidates(&["a.example.com", "b.example.com"]);
        let skipped = filter
            .apply(&CancellationToken::new(), "cert-new", None, &mut set)
            .await
            .unwrap();

        assert_eq!(skipped, 0);
        assert_eq!(set.into_vec(), vec!["a.example.com", "b.example.com"]);
        assert_eq!(inv.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_inventory_listing_is_not_swallowed() {
        let inv = inventory(true);
        let logger = DeployLogger::discard();
        let filter = IdempotencyFilter::new(&logger).with_inventory(Some(&inv));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut set = candidates(&["a.example.com"]);
        let result = filter.apply(&cancel, "cert-new", None, &mut set).await;

        assert!(matches!(result, Err(DeployError::Cancelled)));
    }

    #[tokio::test]
    async fn test_inventory_without_bindings_is_noop() {
        let inv = inventory(false);
        let logger = DeployLogger::discard();
        let filter = IdempotencyFilter::new(&logger).with_inventory(Some(&inv));
        assert!(!filter.is_active());

        let mut set = candidates(&["a.example.com"]);
        let skipped = filter
            .apply(&CancellationToken::new(), "cert-new", Some(inv.entries.as_slice()), &mut set)
            .await
            .unwrap();

        assert_eq!(skipped, 0);
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn test_inspector_keeps_domains_it_cannot_confirm() {
        let inspector = MapInspector(HashMap::from([
            ("a.example.com", Ok(Some("cert-new"))),
            ("b.example.com", Ok(Some("cert-old"))),
            ("c.example.com", Err("RequestLimitExceeded")),
        ]));
        let logger = DeployLogger::discard();
        let filter = IdempotencyFilter::new(&logger).with_inspector(Some(&inspector));

        let mut set = candidates(&["a.example.com", "b.example.com", "c.example.com", "d.example.com"]);
        let skipped = filter
            .apply(&CancellationToken::new(), "cert-new", None, &mut set)
            .await
            .unwrap();

        assert_eq!(skipped, 1);
        assert_eq!(
            set.into_vec(),
            vec!["b.example.com", "c.example.com", "d.example.com"]
        );
    }

    #[tokio::test]
    async fn test_without_capabilities_nothing_is_removed() {
        let logger = DeployLogger::discard();
        let filter = IdempotencyFilter::new(&logger);

        let mut set = candidates(&["a.example.com", "b.example.com"]);
        let skipped = filter
            .apply(&CancellationToken::new(), "cert-new", None, &mut set)
            .await
            .unwrap();

        assert_eq!(skipped, 0);
        assert_eq!(set.len(), 2);
    }
}
