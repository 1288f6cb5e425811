//! Deployment pipeline shared by inventory-based providers
//!
//! One `run` walks the stages of a deployment in order. Every stage except
//! the per-domain update is all-or-nothing: its first error ends the run.

use std::fmt;

use tokio_util::sync::CancellationToken;

use crate::domains::{
    execute, CandidateSet, DomainMatchPattern, DomainResolver, DomainSpec, IdempotencyFilter,
    UpdateStrategy,
};
use crate::errors::DeployError;
use crate::logger::DeployLogger;
use crate::provider::DeployResult;
use crate::vendor::{BindingInspector, CertificateStore, DomainInventory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStage {
    ValidatingConfig,
    UploadingCertificate,
    ResolvingDomains,
    FilteringAlreadyBound,
    UpdatingDomains,
    Done,
    Failed,
}

impl fmt::Display for DeployStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeployStage::ValidatingConfig => "validating config",
            DeployStage::UploadingCertificate => "uploading certificate",
            DeployStage::ResolvingDomains => "resolving domains",
            DeployStage::FilteringAlreadyBound => "filtering already bound domains",
            DeployStage::UpdatingDomains => "updating domains",
            DeployStage::Done => "done",
            DeployStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Wires a vendor's capabilities into the deployment stages
pub struct DeployPipeline<'a> {
    store: &'a dyn CertificateStore,
    strategy: UpdateStrategy<'a>,
    inventory: Option<&'a dyn DomainInventory>,
    inspector: Option<&'a dyn BindingInspector>,
    logger: &'a DeployLogger,
}

impl<'a> DeployPipeline<'a> {
    pub fn new(
        store: &'a dyn CertificateStore,
        strategy: UpdateStrategy<'a>,
        logger: &'a DeployLogger,
    ) -> Self {
        Self {
            store,
            strategy,
            inventory: None,
            inspector: None,
            logger,
        }
    }

    pub fn with_inventory(mut self, inventory: &'a dyn DomainInventory) -> Self {
        self.inventory = Some(inventory);
        self
    }

    pub fn with_inspector(mut self, inspector: &'a dyn BindingInspector) -> Self {
        self.inspector = Some(inspector);
        self
    }

    /// Run one deployment
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        pattern: DomainMatchPattern,
        spec: &DomainSpec,
        certificate_pem: &str,
        private_key_pem: &str,
    ) -> Result<DeployResult, DeployError> {
        let mut stage = DeployStage::ValidatingConfig;
        let result = self
            .run_stages(&mut stage, cancel, pattern, spec, certificate_pem, private_key_pem)
            .await;

        match &result {
            Ok(_) => self.logger.debug(format!("deployment {}", DeployStage::Done)),
            Err(e) => self.logger.error(format!(
                "deployment {} while {}: {}",
                DeployStage::Failed,
                stage,
                e
            )),
        }
        result
    }

    async fn run_stages(
        &self,
        stage: &mut DeployStage,
        cancel: &CancellationToken,
        pattern: DomainMatchPattern,
        spec: &DomainSpec,
        certificate_pem: &str,
        private_key_pem: &str,
    ) -> Result<DeployResult, DeployError> {
        self.enter(stage, DeployStage::ValidatingConfig, cancel)?;
        self.validate(pattern, spec, certificate_pem, private_key_pem)?;

        self.enter(stage, DeployStage::UploadingCertificate, cancel)?;
        let uploaded = self
            .store
            .upload_certificate(certificate_pem, private_key_pem)
            .await
            .map_err(|e| match e {
                DeployError::Cancelled => DeployError::Cancelled,
                other => DeployError::upload(other),
            })?;
        self.logger
            .info(format!("ssl certificate uploaded, id '{}'", uploaded.id));

        self.enter(stage, DeployStage::ResolvingDomains, cancel)?;
        let mut candidates = CandidateSet::new();
        let fetched = DomainResolver::new(self.inventory, self.logger)
            .resolve(cancel, pattern, spec, certificate_pem, &mut candidates)
            .await?;
        if candidates.is_empty() {
            return Err(DeployError::Resolution(
                "no domains to deploy to".to_string(),
            ));
        }

        self.enter(stage, DeployStage::FilteringAlreadyBound, cancel)?;
        let skipped = IdempotencyFilter::new(self.logger)
            .with_inventory(self.inventory)
            .with_inspector(self.inspector)
            .apply(cancel, &uploaded.id, fetched.as_deref(), &mut candidates)
            .await?;
        if candidates.is_empty() {
            self.logger.info(format!(
                "all {} domains already use certificate '{}', nothing to update",
                skipped, uploaded.id
            ));
            *stage = DeployStage::Done;
            return Ok(DeployResult::default());
        }

        self.enter(stage, DeployStage::UpdatingDomains, cancel)?;
        self.logger.info(format!(
            "found {} domains to deploy ({}): {}",
            candidates.len(),
            self.strategy.name(),
            candidates.as_slice().join(", ")
        ));
        execute(
            self.strategy,
            cancel,
            candidates.as_slice(),
            &uploaded.id,
            self.logger,
        )
        .await?;

        *stage = DeployStage::Done;
        Ok(DeployResult::default())
    }

    fn enter(
        &self,
        stage: &mut DeployStage,
        next: DeployStage,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        *stage = next;
        if cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }
        self.logger.debug(format!("deployment stage: {}", next));
        Ok(())
    }

    fn validate(
        &self,
        pattern: DomainMatchPattern,
        spec: &DomainSpec,
        certificate_pem: &str,
        private_key_pem: &str,
    ) -> Result<(), DeployError> {
        if certificate_pem.trim().is_empty() {
            return Err(DeployError::Configuration(
                "certificate is empty".to_string(),
            ));
        }
        if private_key_pem.trim().is_empty() {
            return Err(DeployError::Configuration(
                "private key is empty".to_string(),
            ));
        }
        if pattern != DomainMatchPattern::CertificateSan && spec.is_empty() {
            return Err(DeployError::Configuration(
                "config `domains` is required".to_string(),
            ));
        }
        if pattern.needs_inventory(spec) && self.inventory.is_none() {
            return Err(DeployError::Configuration(format!(
                "domain match pattern '{}' is not supported by this provider",
                pattern
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::MemorySink;
    use crate::vendor::{BulkDomainBinder, DomainBinder, InventoryEntry, UploadedCertificate};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeVendor {
        upload_fails: bool,
        uploads: AtomicUsize,
        inventory: Vec<InventoryEntry>,
        reports_bindings: bool,
        bound: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CertificateStore for FakeVendor {
        async fn upload_certificate(&self, _: &str, _: &str) -> Result<UploadedCertificate, DeployError> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            if self.upload_fails {
                return Err(DeployError::vendor("ssl.UploadCertificate", "CertificateInvalid"));
            }
            Ok(UploadedCertificate {
                id: "cert-new".to_string(),
            })
        }
    }

    #[async_trait]
    impl DomainInventory for FakeVendor {
        fn page_size(&self) -> usize {
            2
        }

        fn reports_bindings(&self) -> bool {
            self.reports_bindings
        }

        async fn list_domains(&self, offset: usize, limit: usize) -> Result<Vec<InventoryEntry>, DeployError> {
            Ok(self.inventory.iter().skip(offset).take(limit).cloned().collect())
        }
    }

    #[async_trait]
    impl DomainBinder for FakeVendor {
        async fn bind(&self, domain: &str, _: &str) -> Result<(), DeployError> {
            self.bound.lock().unwrap().push(domain.to_string());
            Ok(())
        }
    }

    #[async_trait]
    impl BulkDomainBinder for FakeVendor {
        async fn bind_all(&self, domains: &[String], _: &str) -> Result<(), DeployError> {
            self.bound.lock().unwrap().extend(domains.iter().cloned());
            Ok(())
        }
    }

    fn zone() -> FakeVendor {
        FakeVendor {
            inventory: vec![
                InventoryEntry::bound_to("a.example.com", "cert-new"),
                InventoryEntry::bound_to("b.example.com", "cert-old"),
                InventoryEntry::new("c.example.com"),
                InventoryEntry::new("deep.c.example.com"),
            ],
            reports_bindings: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_wildcard_with_idempotency_skips_bound_domain() {
        let vendor = zone();
        let logger = DeployLogger::discard();
        let pipeline = DeployPipeline::new(&vendor, UpdateStrategy::Bulk(&vendor), &logger)
            .with_inventory(&vendor);

        pipeline
            .run(
                &CancellationToken::new(),
                DomainMatchPattern::Wildcard,
                &DomainSpec::new(["*.example.com"]),
                "CERT",
                "KEY",
            )
            .await
            .unwrap();

        assert_eq!(
            *vendor.bound.lock().unwrap(),
            vec!["b.example.com", "c.example.com"]
        );
    }

    #[tokio::test]
    async fn test_everything_already_bound_is_success() {
        let vendor = zone();
        let logger = DeployLogger::discard();
        let pipeline = DeployPipeline::new(&vendor, UpdateStrategy::PerDomain(&vendor), &logger)
            .with_inventory(&vendor);

        pipeline
            .run(
                &CancellationToken::new(),
                DomainMatchPattern::Exact,
                &DomainSpec::new(["a.example.com"]),
                "CERT",
                "KEY",
            )
            .await
            .unwrap();

        assert!(vendor.bound.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_failure_touches_no_domain() {
        let vendor = FakeVendor {
            upload_fails: true,
            ..zone()
        };
        let sink = Arc::new(MemorySink::default());
        let logger = DeployLogger::new(sink.clone());
        let pipeline = DeployPipeline::new(&vendor, UpdateStrategy::PerDomain(&vendor), &logger);

        let err = pipeline
            .run(
                &CancellationToken::new(),
                DomainMatchPattern::Exact,
                &DomainSpec::new(["a.example.com"]),
                "CERT",
                "KEY",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Upload(_)));
        assert!(vendor.bound.lock().unwrap().is_empty());

        let lines = sink.lines.lock().unwrap();
        assert!(lines
            .iter()
            .any(|(_, l)| l.contains("while uploading certificate")));
    }

    #[tokio::test]
    async fn test_validation_happens_before_upload() {
        let vendor = zone();
        let logger = DeployLogger::discard();
        let pipeline = DeployPipeline::new(&vendor, UpdateStrategy::PerDomain(&vendor), &logger);

        let err = pipeline
            .run(
                &CancellationToken::new(),
                DomainMatchPattern::Exact,
                &DomainSpec::default(),
                "CERT",
                "KEY",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Configuration(_)));

        // wildcard expansion without an inventory capability
        let err = pipeline
            .run(
                &CancellationToken::new(),
                DomainMatchPattern::Wildcard,
                &DomainSpec::new(["*.example.com"]),
                "CERT",
                "KEY",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Configuration(_)));

        assert_eq!(vendor.uploads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let vendor = zone();
        let logger = DeployLogger::discard();
        let pipeline = DeployPipeline::new(&vendor, UpdateStrategy::PerDomain(&vendor), &logger);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pipeline
            .run(
                &cancel,
                DomainMatchPattern::Exact,
                &DomainSpec::new(["a.example.com"]),
                "CERT",
                "KEY",
            )
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(vendor.uploads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(DeployStage::FilteringAlreadyBound.to_string(), "filtering already bound domains");
    }
}
