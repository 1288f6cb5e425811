//! Certificate deployment error types

use std::fmt;

use thiserror::Error;

use crate::provider::ProviderType;

/// Errors returned by a single `deploy` invocation
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to upload certificate: {0}")]
    Upload(Box<DeployError>),

    #[error("Domain resolution failed: {0}")]
    Resolution(String),

    #[error("{0}")]
    Update(AggregatedError),

    #[error("Deployment was cancelled")]
    Cancelled,

    #[error("failed to execute sdk request '{operation}': {message}")]
    Vendor { operation: String, message: String },

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl DeployError {
    /// Wrap a vendor-side failure with the name of the failing operation
    pub fn vendor(operation: impl Into<String>, message: impl fmt::Display) -> Self {
        DeployError::Vendor {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn upload(source: DeployError) -> Self {
        DeployError::Upload(Box::new(source))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DeployError::Cancelled)
    }
}

impl From<ConfigError> for DeployError {
    fn from(err: ConfigError) -> Self {
        DeployError::Configuration(err.to_string())
    }
}

/// A failed update of one remote domain
#[derive(Debug)]
pub struct DomainFailure {
    pub domain: String,
    pub error: DeployError,
}

/// Ordered collection of per-domain failures from one batch.
///
/// An empty value means every domain was updated.
#[derive(Debug, Default)]
pub struct AggregatedError {
    failures: Vec<DomainFailure>,
}

impl AggregatedError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, domain: impl Into<String>, error: DeployError) {
        self.failures.push(DomainFailure {
            domain: domain.into(),
            error,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn failures(&self) -> &[DomainFailure] {
        &self.failures
    }

    /// Names of the domains that failed, in attempt order
    pub fn domains(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.domain.as_str()).collect()
    }

    /// `Ok(())` when nothing failed, the aggregate otherwise
    pub fn into_result(self) -> Result<(), DeployError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(DeployError::Update(self))
        }
    }
}

impl fmt::Display for AggregatedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(
                f,
                "failed to update domain '{}': {}",
                failure.domain, failure.error
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregatedError {}

/// Errors raised while populating typed configuration from untyped maps
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required config for '{provider}': {}", .fields.join(", "))]
    MissingFields {
        provider: String,
        fields: Vec<&'static str>,
    },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("failed to populate config: {0}")]
    Deserialize(#[from] serde_json::Error),
}

/// Provider registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("provider type '{0}' is already registered")]
    Duplicate(ProviderType),

    #[error("provider registry failed to initialize, duplicate provider types: {}", join_types(.0))]
    Startup(Vec<ProviderType>),

    #[error("unsupported provider type: '{0}'")]
    NotFound(ProviderType),

    #[error("provider registry lock poisoned")]
    Poisoned,
}

fn join_types(types: &[ProviderType]) -> String {
    types
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregated_error_empty_is_ok() {
        let errs = AggregatedError::new();
        assert!(errs.is_empty());
        assert!(errs.into_result().is_ok());
    }

    #[test]
    fn test_aggregated_error_names_each_domain() {
        let mut errs = AggregatedError::new();
        errs.push("a.example.com", DeployError::vendor("cdn.Bind", "quota exceeded"));
        errs.push("b.example.com", DeployError::vendor("cdn.Bind", "not found"));

        assert_eq!(errs.domains(), vec!["a.example.com", "b.example.com"]);

        let rendered = errs.to_string();
        assert!(rendered.contains("'a.example.com'"));
        assert!(rendered.contains("quota exceeded"));
        assert!(rendered.contains("'b.example.com'"));
        assert_eq!(rendered.lines().count(), 2);

        match errs.into_result() {
            Err(DeployError::Update(inner)) => assert_eq!(inner.len(), 2),
            other => panic!("Expected Update error, got {:?}", other),
        }
    }

    #[test]
    fn test_vendor_error_carries_operation() {
        let err = DeployError::vendor("teo.ModifyHostsCertificate", "InvalidParameter");
        assert_eq!(
            err.to_string(),
            "failed to execute sdk request 'teo.ModifyHostsCertificate': InvalidParameter"
        );
    }

    #[test]
    fn test_upload_error_wraps_source() {
        let err = DeployError::upload(DeployError::vendor("ssl.UploadCertificate", "denied"));
        assert!(err.to_string().starts_with("Failed to upload certificate"));
        assert!(err.to_string().contains("ssl.UploadCertificate"));
    }

    #[test]
    fn test_missing_fields_message() {
        let err = ConfigError::MissingFields {
            provider: "flyio".to_string(),
            fields: vec!["apiToken", "appName"],
        };
        assert_eq!(
            err.to_string(),
            "missing required config for 'flyio': apiToken, appName"
        );

        let deploy_err: DeployError = err.into();
        assert!(matches!(deploy_err, DeployError::Configuration(_)));
    }

    #[test]
    fn test_startup_error_lists_duplicates() {
        let err = RegistryError::Startup(vec![
            ProviderType::from("flyio"),
            ProviderType::from("synologydsm"),
        ]);
        assert!(err.to_string().ends_with("flyio, synologydsm"));
    }
}
