use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cache::{CacheClient, QueryCache};
use crate::catalog::Catalog;
use crate::config::ConsoleConfig;
use crate::credentials::{CredentialStore, Credentials, FileCredentialStore};
use crate::error::{ApiError, CatalogError, StartupError};
use crate::query::EntityQuery;
use crate::screen::EntityScreen;
use crate::transport::{BaseClient, EntityClient, HttpSend, ReqwestSend};

/// The running console: catalog, shared transport and the cache actor.
///
/// Responsible for starting the cache, handing out one query per entity,
/// and shutting everything down.
pub struct AdminSystem {
    config: ConsoleConfig,
    catalog: Arc<Catalog>,
    base: Arc<BaseClient>,
    cache: CacheClient,
    queries: Mutex<HashMap<String, EntityQuery>>,
    handle: JoinHandle<()>,
}

impl AdminSystem {
    /// Wires the system over an arbitrary transport. Must run inside a Tokio runtime.
    pub fn new(
        config: ConsoleConfig,
        catalog: Catalog,
        http: Arc<dyn HttpSend>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let (cache_actor, cache) = QueryCache::new(config.cache_buffer, config.stale_time);
        let handle = tokio::spawn(cache_actor.run());
        info!(entities = catalog.len(), api = %config.api_url, "Admin system started");

        Self {
            base: Arc::new(BaseClient::new(http, credentials)),
            catalog: Arc::new(catalog),
            config,
            cache,
            queries: Mutex::new(HashMap::new()),
            handle,
        }
    }

    /// Production wiring: reqwest transport, credentials file, bundled or
    /// configured catalog.
    pub fn from_config(config: ConsoleConfig) -> Result<Self, StartupError> {
        let catalog = match &config.catalog_path {
            Some(path) => Catalog::load(path)?,
            None => Catalog::builtin()?,
        };
        let http = Arc::new(ReqwestSend::new(&config)?);
        let credentials = Arc::new(FileCredentialStore::new(config.credentials_path.clone()));
        Ok(Self::new(config, catalog, http, credentials))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    /// The shared query for `entity`; every caller sees the same page state.
    pub fn query(&self, entity: &str) -> Result<EntityQuery, CatalogError> {
        let mut queries = self.queries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(query) = queries.get(entity) {
            return Ok(query.clone());
        }
        let descriptor = self.catalog.get(entity)?;
        let client = EntityClient::new(self.base.clone(), descriptor);
        let query = EntityQuery::new(client, self.cache.clone(), &self.config);
        queries.insert(entity.to_string(), query.clone());
        Ok(query)
    }

    pub fn screen(&self, entity: &str) -> Result<EntityScreen, CatalogError> {
        Ok(EntityScreen::new(self.query(entity)?))
    }

    pub fn login(&self, credentials: &Credentials) -> Result<(), ApiError> {
        self.base.credentials().save(credentials)?;
        info!("Credentials stored");
        Ok(())
    }

    /// Forgets the session and everything fetched with it.
    pub async fn logout(&self) -> Result<(), ApiError> {
        self.base.credentials().clear()?;
        self.cache.clear().await?;
        info!("Logged out");
        Ok(())
    }

    pub async fn shutdown(self) -> Result<(), ApiError> {
        info!("Shutting down admin system...");
        self.cache.shutdown().await;

        if let Err(e) = self.handle.await {
            error!("Cache task failed: {:?}", e);
            return Err(ApiError::CacheClosed(format!("cache task failed: {e}")));
        }

        info!("Admin system shutdown complete.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentialStore;
    use crate::mock_framework::FakeBackend;

    fn system() -> (AdminSystem, Arc<MemoryCredentialStore>) {
        let catalog = Catalog::builtin().unwrap();
        let backend = FakeBackend::new(&catalog);
        let store = Arc::new(MemoryCredentialStore::default());
        let system = AdminSystem::new(ConsoleConfig::default(), catalog, backend, store.clone());
        (system, store)
    }

    #[tokio::test]
    async fn queries_are_shared_per_entity() {
        let (system, _) = system();
        let first = system.query("orders").unwrap();
        first.set_page(4);
        assert_eq!(system.query("orders").unwrap().params().page, 4);
        assert!(matches!(
            system.query("nope"),
            Err(CatalogError::UnknownEntity(_))
        ));
        system.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn logout_clears_credentials() {
        let (system, store) = system();
        system
            .login(&Credentials {
                access_token: Some("a".into()),
                csrf_token: Some("c".into()),
                refresh_token: Some("r".into()),
            })
            .unwrap();
        assert_eq!(store.load().unwrap().access_token.as_deref(), Some("a"));

        system.logout().await.unwrap();
        assert_eq!(store.load().unwrap(), Credentials::default());
        system.shutdown().await.unwrap();
    }
}
