//! TLS certificate deployment for Temps
//!
//! This crate pushes a freshly issued certificate chain and private key to the
//! remote services that terminate TLS for a user's domains.
//!
//! # Features
//!
//! - **Provider registry**: adapters are looked up by [`ProviderType`] and built
//!   from untyped access/extended config maps
//! - **Domain resolution**: exact names, `*.` wildcards matched against the
//!   vendor inventory, or every inventory domain covered by the certificate SANs
//! - **Idempotent updates**: domains already serving the certificate are skipped
//!   when the vendor reports bindings
//! - **Partial failure reporting**: per-domain failures are collected into one
//!   [`AggregatedError`]
//!
//! # Supported Providers
//!
//! - **tencentcloud-eo**: Tencent Cloud EdgeOne acceleration domains (bulk update)
//! - **volcengine-vod**: Volcengine VOD play/image domains (per-domain update)
//! - **volcengine-live**: Volcengine Live push/pull domains (per-domain update)
//! - **flyio**: Fly.io app custom certificates
//! - **synologydsm**: Synology DSM certificate store
//!
//! # Usage
//!
//! ```ignore
//! use temps_cert_deployer::{registry, ProviderFactoryOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! let registry = registry::global()?;
//! let provider = registry.create(&"flyio".into(), &options)?;
//! provider.deploy(&CancellationToken::new(), &cert_pem, &key_pem).await?;
//! ```

pub mod config;
pub mod domains;
pub mod errors;
pub mod logger;
pub mod pipeline;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod signing;
pub mod vendor;

// Re-export main types
pub use config::{populate, ConfigMap, ProviderFactoryOptions, RequiredFields};
pub use domains::{CandidateSet, DomainMatchPattern, DomainResolver, DomainSpec, UpdateStrategy};
pub use errors::{AggregatedError, ConfigError, DeployError, DomainFailure, RegistryError};
pub use logger::{DeployLogger, LogSink};
pub use pipeline::{DeployPipeline, DeployStage};
pub use provider::{DeployResult, DeploymentProvider, ProviderConstructor, ProviderType};
pub use registry::{ProviderRegistry, RegistryBuilder};
pub use vendor::{
    BindingInspector, BulkDomainBinder, CertificateStore, DomainBinder, DomainInventory,
    InventoryEntry, UploadedCertificate,
};
