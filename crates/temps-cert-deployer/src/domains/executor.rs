//! Update executor
//!
//! Binds the uploaded certificate to the final candidate set, either one
//! domain at a time (failures are collected and the batch continues) or in a
//! single bulk call (all or nothing).

use tokio_util::sync::CancellationToken;

use crate::errors::{AggregatedError, DeployError};
use crate::logger::DeployLogger;
use crate::vendor::{BulkDomainBinder, DomainBinder};

/// How a vendor applies a certificate to its domains
#[derive(Clone, Copy)]
pub enum UpdateStrategy<'a> {
    PerDomain(&'a dyn DomainBinder),
    Bulk(&'a dyn BulkDomainBinder),
}

impl UpdateStrategy<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            UpdateStrategy::PerDomain(_) => "per-domain",
            UpdateStrategy::Bulk(_) => "bulk",
        }
    }
}

/// Apply `certificate_id` to every domain in `domains`.
///
/// Per-domain: cancellation is checked before each domain and returns
/// [`DeployError::Cancelled`] right away, leaving earlier updates in place.
/// Per-domain failures are returned together as [`DeployError::Update`] once
/// every domain has been attempted.
pub async fn execute(
    strategy: UpdateStrategy<'_>,
    cancel: &CancellationToken,
    domains: &[String],
    certificate_id: &str,
    logger: &DeployLogger,
) -> Result<(), DeployError> {
    match strategy {
        UpdateStrategy::PerDomain(binder) => {
            let mut errors = AggregatedError::new();

            for domain in domains {
                if cancel.is_cancelled() {
                    return Err(DeployError::Cancelled);
                }

                match binder.bind(domain, certificate_id).await {
                    Ok(()) => logger.info(format!("domain '{}' updated", domain)),
                    Err(DeployError::Cancelled) => return Err(DeployError::Cancelled),
                    Err(e) => {
                        logger.warn(format!("failed to update domain '{}': {}", domain, e));
                        errors.push(domain.as_str(), e);
                    }
                }
            }

            errors.into_result()
        }
        UpdateStrategy::Bulk(binder) => {
            if cancel.is_cancelled() {
                return Err(DeployError::Cancelled);
            }

            binder.bind_all(domains, certificate_id).await?;
            logger.info(format!("{} domains updated", domains.len()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBinder {
        fail_on: Vec<&'static str>,
        bound: Mutex<Vec<String>>,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    #[async_trait]
    impl DomainBinder for RecordingBinder {
        async fn bind(&self, domain: &str, _certificate_id: &str) -> Result<(), DeployError> {
            let mut bound = self.bound.lock().unwrap();
            bound.push(domain.to_string());
            if let Some((after, token)) = &self.cancel_after {
                if bound.len() == *after {
                    token.cancel();
                }
            }
            if self.fail_on.iter().any(|d| *d == domain) {
                return Err(DeployError::vendor("cdn.UpdateDomainConfig", "InternalError"));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingBulkBinder {
        fail: bool,
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl BulkDomainBinder for RecordingBulkBinder {
        async fn bind_all(&self, domains: &[String], _certificate_id: &str) -> Result<(), DeployError> {
            self.calls.lock().unwrap().push(domains.to_vec());
            if self.fail {
                return Err(DeployError::vendor("teo.ModifyHostsCertificate", "LimitExceeded"));
            }
            Ok(())
        }
    }

    fn domains(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn test_per_domain_continues_after_failure() {
        let binder = RecordingBinder {
            fail_on: vec!["d2"],
            ..Default::default()
        };

        let err = execute(
            UpdateStrategy::PerDomain(&binder),
            &CancellationToken::new(),
            &domains(&["d1", "d2", "d3"]),
            "cert-1",
            &DeployLogger::discard(),
        )
        .await
        .unwrap_err();

        assert_eq!(*binder.bound.lock().unwrap(), vec!["d1", "d2", "d3"]);
        match err {
            DeployError::Update(aggregated) => assert_eq!(aggregated.domains(), vec!["d2"]),
            other => panic!("Expected Update error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_per_domain_success() {
        let binder = RecordingBinder::default();

        execute(
            UpdateStrategy::PerDomain(&binder),
            &CancellationToken::new(),
            &domains(&["d1", "d2"]),
            "cert-1",
            &DeployLogger::discard(),
        )
        .await
        .unwrap();

        assert_eq!(binder.bound.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_per_domain_stops_between_domains_on_cancel() {
        let cancel = CancellationToken::new();
        let binder = RecordingBinder {
            cancel_after: Some((2, cancel.clone())),
            ..Default::default()
        };

        let err = execute(
            UpdateStrategy::PerDomain(&binder),
            &cancel,
            &domains(&["d1", "d2", "d3", "d4"]),
            "cert-1",
            &DeployLogger::discard(),
        )
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
        // the in-flight call completes, the next one never starts
        assert_eq!(*binder.bound.lock().unwrap(), vec!["d1", "d2"]);
    }

    #[tokio::test]
    async fn test_bulk_submits_single_call() {
        let binder = RecordingBulkBinder::default();

        execute(
            UpdateStrategy::Bulk(&binder),
            &CancellationToken::new(),
            &domains(&["a.example.com", "b.example.com"]),
            "cert-1",
            &DeployLogger::discard(),
        )
        .await
        .unwrap();

        let calls = binder.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], vec!["a.example.com", "b.example.com"]);
    }

    #[tokio::test]
    async fn test_bulk_failure_fails_whole_batch() {
        let binder = RecordingBulkBinder {
            fail: true,
            ..Default::default()
        };

        let err = execute(
            UpdateStrategy::Bulk(&binder),
            &CancellationToken::new(),
            &domains(&["a.example.com", "b.example.com"]),
            "cert-1",
            &DeployLogger::discard(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DeployError::Vendor { ref operation, .. } if operation == "teo.ModifyHostsCertificate"));
    }
}
