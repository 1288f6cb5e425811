//! Provider registry
//!
//! Maps a [`ProviderType`] to the constructor that builds its deployer.
//! Registrations are collected into a [`RegistryBuilder`] at startup and
//! validated in one pass by [`RegistryBuilder::build`]; the resulting
//! [`ProviderRegistry`] is immutable and can be shared freely between tasks.

use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::OnceCell;
use tracing::{debug, error};

use crate::config::ProviderFactoryOptions;
use crate::errors::{DeployError, RegistryError};
use crate::provider::{DeploymentProvider, ProviderConstructor, ProviderType};
use crate::providers;

/// Every adapter compiled into this crate
pub fn builtin_registrations() -> Vec<(ProviderType, ProviderConstructor)> {
    vec![
        (ProviderType::TENCENTCLOUD_EO, providers::tencentcloud_eo::create as ProviderConstructor),
        (ProviderType::VOLCENGINE_VOD, providers::volcengine_vod::create as ProviderConstructor),
        (ProviderType::VOLCENGINE_LIVE, providers::volcengine_live::create as ProviderConstructor),
        (ProviderType::FLYIO, providers::flyio::create as ProviderConstructor),
        (ProviderType::SYNOLOGY_DSM, providers::synology_dsm::create as ProviderConstructor),
    ]
}

/// Collects registrations before the registry is sealed
#[derive(Default)]
pub struct RegistryBuilder {
    inner: Mutex<BuilderState>,
}

#[derive(Default)]
struct BuilderState {
    constructors: HashMap<ProviderType, ProviderConstructor>,
    duplicates: Vec<ProviderType>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pre-populated with [`builtin_registrations`]
    pub fn with_builtins() -> Self {
        let builder = Self::new();
        for (provider_type, constructor) in builtin_registrations() {
            // duplicates are remembered and reported by build()
            let _ = builder.register(provider_type, constructor);
        }
        builder
    }

    /// Register a constructor.
    ///
    /// A second registration for the same type never replaces the first; it
    /// returns [`RegistryError::Duplicate`] and is reported again by
    /// [`RegistryBuilder::build`].
    pub fn register(
        &self,
        provider_type: ProviderType,
        constructor: ProviderConstructor,
    ) -> Result<(), RegistryError> {
        let mut state = self.inner.lock().map_err(|_| RegistryError::Poisoned)?;

        if state.constructors.contains_key(&provider_type) {
            error!("Duplicate deployment provider registration: {}", provider_type);
            state.duplicates.push(provider_type.clone());
            return Err(RegistryError::Duplicate(provider_type));
        }

        debug!("Registering deployment provider: {}", provider_type);
        state.constructors.insert(provider_type, constructor);
        Ok(())
    }

    /// Validate every registration made so far and seal the registry
    pub fn build(self) -> Result<ProviderRegistry, RegistryError> {
        let state = self
            .inner
            .into_inner()
            .map_err(|_| RegistryError::Poisoned)?;

        if !state.duplicates.is_empty() {
            return Err(RegistryError::Startup(state.duplicates));
        }

        Ok(ProviderRegistry {
            constructors: state.constructors,
        })
    }
}

/// Read-only lookup table of deployment provider constructors
pub struct ProviderRegistry {
    constructors: HashMap<ProviderType, ProviderConstructor>,
}

impl ProviderRegistry {
    pub fn lookup(&self, provider_type: &ProviderType) -> Option<ProviderConstructor> {
        self.constructors.get(provider_type).copied()
    }

    pub fn contains(&self, provider_type: &ProviderType) -> bool {
        self.constructors.contains_key(provider_type)
    }

    /// Look up and run the constructor for `provider_type`
    pub fn create(
        &self,
        provider_type: &ProviderType,
        options: &ProviderFactoryOptions,
    ) -> Result<Box<dyn DeploymentProvider>, DeployError> {
        let constructor = self
            .lookup(provider_type)
            .ok_or_else(|| RegistryError::NotFound(provider_type.clone()))?;
        constructor(options)
    }

    /// Registered provider types, sorted
    pub fn types(&self) -> Vec<ProviderType> {
        let mut types: Vec<ProviderType> = self.constructors.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

static GLOBAL: OnceCell<ProviderRegistry> = OnceCell::new();

/// Process-wide registry of the built-in adapters, built on first use
pub fn global() -> Result<&'static ProviderRegistry, RegistryError> {
    GLOBAL.get_or_try_init(|| RegistryBuilder::with_builtins().build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::DeployLogger;
    use crate::provider::DeployResult;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct NoopProvider;

    #[async_trait]
    impl DeploymentProvider for NoopProvider {
        fn provider_type(&self) -> ProviderType {
            ProviderType::from("noop")
        }

        fn set_logger(&mut self, _logger: DeployLogger) {}

        async fn deploy(
            &self,
            _cancel: &CancellationToken,
            _certificate_pem: &str,
            _private_key_pem: &str,
        ) -> Result<DeployResult, DeployError> {
            Ok(DeployResult::default())
        }
    }

    fn noop(_options: &ProviderFactoryOptions) -> Result<Box<dyn DeploymentProvider>, DeployError> {
        Ok(Box::new(NoopProvider))
    }

    fn failing(_options: &ProviderFactoryOptions) -> Result<Box<dyn DeploymentProvider>, DeployError> {
        Err(DeployError::Configuration("always fails".to_string()))
    }

    #[test]
    fn test_register_and_lookup() {
        let builder = RegistryBuilder::new();
        builder.register(ProviderType::from("noop"), noop).unwrap();
        let registry = builder.build().unwrap();

        assert!(registry.contains(&ProviderType::from("noop")));
        assert!(registry.lookup(&ProviderType::from("noop")).is_some());
        assert!(registry.lookup(&ProviderType::from("missing")).is_none());

        let provider = registry
            .create(&ProviderType::from("noop"), &ProviderFactoryOptions::default())
            .unwrap();
        assert_eq!(provider.provider_type().as_str(), "noop");
    }

    #[test]
    fn test_duplicate_registration_keeps_first_and_fails_build() {
        let builder = RegistryBuilder::new();
        builder.register(ProviderType::from("noop"), noop).unwrap();

        let err = builder
            .register(ProviderType::from("noop"), failing)
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(ref t) if t.as_str() == "noop"));

        match builder.build() {
            Err(RegistryError::Startup(types)) => {
                assert_eq!(types, vec![ProviderType::from("noop")]);
            }
            Err(other) => panic!("Expected Startup error, got {:?}", other),
            Ok(_) => panic!("Expected Startup error, registry was built"),
        }
    }

    #[test]
    fn test_build_reports_every_duplicate() {
        let builder = RegistryBuilder::with_builtins();
        let _ = builder.register(ProviderType::FLYIO, noop);
        let _ = builder.register(ProviderType::SYNOLOGY_DSM, noop);

        let err = builder.build().err().unwrap();
        let message = err.to_string();
        assert!(message.contains("flyio"));
        assert!(message.contains("synologydsm"));
    }

    #[test]
    fn test_create_unknown_type() {
        let registry = RegistryBuilder::new().build().unwrap();
        let err = registry
            .create(&ProviderType::from("unknown"), &ProviderFactoryOptions::default())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            DeployError::Registry(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_create_propagates_constructor_error() {
        let builder = RegistryBuilder::new();
        builder.register(ProviderType::from("broken"), failing).unwrap();
        let registry = builder.build().unwrap();

        let err = registry
            .create(&ProviderType::from("broken"), &ProviderFactoryOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, DeployError::Configuration(_)));
    }

    #[test]
    fn test_global_registry_has_builtins_sorted() {
        let registry = global().unwrap();
        assert_eq!(
            registry.types(),
            vec![
                ProviderType::FLYIO,
                ProviderType::SYNOLOGY_DSM,
                ProviderType::TENCENTCLOUD_EO,
                ProviderType::VOLCENGINE_LIVE,
                ProviderType::VOLCENGINE_VOD,
            ]
        );
    }
}
