//! Wiring for the router's components
//!
//! Opens the database, loads the registries, and hands out the authorizer,
//! router, gateway, replay resolver, and admin surface over one shared
//! registry and one decision log.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::admin::AdminSurface;
use crate::audit::{DecisionLog, ReplayResolver};
use crate::catalog::{Catalog, CatalogStore, ImportSummary, SharedRegistry};
use crate::config::Config;
use crate::error::Result;
use crate::routing::{Authorizer, CapabilityGateway, CapabilityRouter};
use crate::storage::Database;

/// All router components over a single database
#[derive(Debug, Clone)]
pub struct RouterService {
    database: Database,
    store: Arc<CatalogStore>,
    registry: SharedRegistry,
    log: Arc<DecisionLog>,
    call_timeout: Duration,
}

impl RouterService {
    /// Open the configured database and load the registries from it
    pub async fn open(config: &Config) -> Result<Self> {
        let database = Database::new(config.storage.database_config()).await?;
        let service = Self::from_database(database)
            .await?
            .with_call_timeout(config.gateway.call_timeout());
        Ok(service)
    }

    /// Build the components over an already-migrated database
    pub async fn from_database(database: Database) -> Result<Self> {
        let store = Arc::new(CatalogStore::new(database.pool().clone()));
        let registry = SharedRegistry::load(store.clone()).await?;
        let log = Arc::new(DecisionLog::new(database.pool().clone()));

        info!(path = %database.path().display(), "Router service ready");

        Ok(Self {
            database,
            store,
            registry,
            log,
            call_timeout: Duration::from_millis(crate::routing::DEFAULT_CALL_TIMEOUT_MS),
        })
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Import a catalog and refresh the in-memory registries
    pub async fn import_catalog(&self, catalog: &Catalog) -> Result<ImportSummary> {
        let summary = self.store.import(catalog).await?;
        self.registry.reload().await?;
        Ok(summary)
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn decision_log(&self) -> Arc<DecisionLog> {
        self.log.clone()
    }

    pub fn authorizer(&self) -> Authorizer {
        Authorizer::new(self.registry.clone(), self.log.clone())
    }

    pub fn router(&self) -> CapabilityRouter {
        CapabilityRouter::new(self.registry.clone(), self.log.clone())
    }

    pub fn gateway(&self) -> CapabilityGateway {
        CapabilityGateway::new(self.authorizer(), self.router()).with_call_timeout(self.call_timeout)
    }

    pub fn replay(&self) -> ReplayResolver {
        ReplayResolver::new(self.registry.clone(), self.log.clone())
    }

    pub fn admin(&self) -> AdminSurface {
        AdminSurface::new(self.registry.clone(), self.log.clone())
    }
}
