//! Engine-name to provider-constructor registry.
//!
//! The registry is built once by the embedding application and passed by
//! reference to whatever needs to open providers. Tests register fakes
//! under their own names.

use super::{DatabaseProvider, ProviderSettings};
use crate::Result;
use crate::error::DbTransitError;
use crate::models::DatabaseEngine;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Async constructor producing a ready provider.
pub type ProviderConstructor = Arc<
    dyn Fn(ProviderSettings) -> BoxFuture<'static, Result<Arc<dyn DatabaseProvider>>>
        + Send
        + Sync,
>;

/// Maps engine names to provider constructors.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    constructors: BTreeMap<String, ProviderConstructor>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

/// Normalizes a provider name: engine aliases collapse onto the engine key,
/// anything else is lowercased.
fn normalize(name: &str) -> String {
    DatabaseEngine::from_name(name)
        .map(|engine| engine.key().to_string())
        .unwrap_or_else(|| name.trim().to_ascii_lowercase())
}

/// Cargo feature that compiles an engine's provider in.
fn feature_for(engine: DatabaseEngine) -> &'static str {
    match engine {
        DatabaseEngine::SqlServer => "mssql",
        DatabaseEngine::MySql => "mysql",
        DatabaseEngine::PostgreSql => "postgresql",
        DatabaseEngine::Firebird => "firebird",
    }
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every engine compiled into this build.
    pub fn with_builtin_providers() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();

        #[cfg(feature = "postgresql")]
        registry.register(
            DatabaseEngine::PostgreSql.key(),
            Arc::new(|settings: ProviderSettings| {
                Box::pin(async move {
                    let provider = super::postgres::PostgresProvider::new(
                        settings.connection_string(),
                        settings.config.clone(),
                    )
                    .await?;
                    Ok(Arc::new(provider) as Arc<dyn DatabaseProvider>)
                }) as BoxFuture<'static, Result<Arc<dyn DatabaseProvider>>>
            }),
        );

        #[cfg(feature = "mysql")]
        registry.register(
            DatabaseEngine::MySql.key(),
            Arc::new(|settings: ProviderSettings| {
                Box::pin(async move {
                    let provider =
                        super::mysql::MySqlProvider::new(settings.connection_string(), settings.config.clone())
                            .await?;
                    Ok(Arc::new(provider) as Arc<dyn DatabaseProvider>)
                }) as BoxFuture<'static, Result<Arc<dyn DatabaseProvider>>>
            }),
        );

        #[cfg(feature = "mssql")]
        registry.register(
            DatabaseEngine::SqlServer.key(),
            Arc::new(|settings: ProviderSettings| {
                Box::pin(async move {
                    let provider = super::sqlserver::SqlServerProvider::new(
                        settings.connection_string(),
                        settings.config.clone(),
                    )
                    .await?;
                    Ok(Arc::new(provider) as Arc<dyn DatabaseProvider>)
                }) as BoxFuture<'static, Result<Arc<dyn DatabaseProvider>>>
            }),
        );

        #[cfg(feature = "firebird")]
        registry.register(
            DatabaseEngine::Firebird.key(),
            Arc::new(|settings: ProviderSettings| {
                Box::pin(async move {
                    let provider = super::firebird::FirebirdProvider::new(
                        settings.connection_string(),
                        settings.config.clone(),
                    )
                    .await?;
                    Ok(Arc::new(provider) as Arc<dyn DatabaseProvider>)
                }) as BoxFuture<'static, Result<Arc<dyn DatabaseProvider>>>
            }),
        );

        registry
    }

    /// Registers (or replaces) a constructor under `name`.
    pub fn register(&mut self, name: &str, constructor: ProviderConstructor) {
        let key = normalize(name);
        tracing::debug!("Registering provider '{}'", key);
        self.constructors.insert(key, constructor);
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(&normalize(name))
    }

    /// Builds a provider for `name`.
    ///
    /// # Errors
    /// Returns [`DbTransitError::Configuration`] before any I/O when the name
    /// is unknown or its engine was not compiled in, and whatever the
    /// constructor returns otherwise.
    pub async fn create(&self, name: &str, settings: ProviderSettings) -> Result<Arc<dyn DatabaseProvider>> {
        let key = normalize(name);
        let Some(constructor) = self.constructors.get(&key) else {
            return Err(match DatabaseEngine::from_name(name) {
                Some(engine) => DbTransitError::configuration(format!(
                    "Provider '{}' is not compiled into this build; enable the `{}` feature",
                    engine.key(),
                    feature_for(engine)
                )),
                None => DbTransitError::configuration(format!(
                    "Unknown provider '{}' (available: {})",
                    name.trim(),
                    self.names().join(", ")
                )),
            });
        };

        settings.config.validate()?;
        tracing::info!("Creating {} provider for {}", key, settings.redacted());
        constructor(settings).await
    }
}
