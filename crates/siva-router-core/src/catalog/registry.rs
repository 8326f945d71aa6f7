//! In-memory registries shared by the authorizer, router, and replay resolver
//!
//! All three registries (capabilities, models, persona policies) live in one
//! [`RegistrySnapshot`] behind a single `RwLock`, so a routing pass reads one
//! consistent view and an eligibility toggle is applied atomically.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::info;

use super::store::CatalogStore;
use super::types::{Capability, Model, PersonaPolicy};
use crate::error::{Error, Result};

/// Point-in-time view of the capability, model, and policy registries
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    capabilities: BTreeMap<String, Capability>,
    models: BTreeMap<String, Model>,
    policies: BTreeMap<String, PersonaPolicy>,
}

impl RegistrySnapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability
    pub fn insert_capability(&mut self, capability: Capability) {
        self.capabilities
            .insert(capability.capability_key.clone(), capability);
    }

    /// Register a model
    pub fn insert_model(&mut self, model: Model) {
        self.models.insert(model.model_id.clone(), model);
    }

    /// Register a persona policy
    pub fn insert_policy(&mut self, policy: PersonaPolicy) {
        self.policies.insert(policy.persona_id.clone(), policy);
    }

    pub fn capability(&self, capability_key: &str) -> Option<&Capability> {
        self.capabilities.get(capability_key)
    }

    pub fn model(&self, model_id: &str) -> Option<&Model> {
        self.models.get(model_id)
    }

    pub fn policy(&self, persona_id: &str) -> Option<&PersonaPolicy> {
        self.policies.get(persona_id)
    }

    /// All capabilities, ordered by key
    pub fn capabilities(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.values()
    }

    /// All models, ordered by id
    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.models.values()
    }

    /// All persona policies, ordered by persona id
    pub fn policies(&self) -> impl Iterator<Item = &PersonaPolicy> {
        self.policies.values()
    }

    /// Active, eligible models that support a capability, ordered by id
    pub fn routable_models_for(&self, capability_key: &str) -> Vec<&Model> {
        self.models
            .values()
            .filter(|m| m.is_routable() && m.supports(capability_key))
            .collect()
    }

    /// Flip a model's eligibility flag in place
    pub fn set_model_eligibility(&mut self, model_id: &str, is_eligible: bool) -> Result<&Model> {
        let model = self
            .models
            .get_mut(model_id)
            .ok_or_else(|| Error::ModelNotFound(model_id.to_string()))?;
        model.is_eligible = is_eligible;
        Ok(model)
    }
}

/// Registry handle shared across concurrent callers
///
/// Reads take a shared guard; the only write this subsystem performs
/// (the eligibility toggle) takes the exclusive guard for its whole duration,
/// including the write-through to the catalog store.
#[derive(Clone)]
pub struct SharedRegistry {
    inner: Arc<RwLock<RegistrySnapshot>>,
    store: Option<Arc<CatalogStore>>,
}

impl std::fmt::Debug for SharedRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegistry")
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl SharedRegistry {
    /// Create an in-memory registry
    pub fn new(snapshot: RegistrySnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(snapshot)),
            store: None,
        }
    }

    /// Load the registry from a catalog store and write toggles through to it
    pub async fn load(store: Arc<CatalogStore>) -> Result<Self> {
        let snapshot = store.load_snapshot().await?;
        info!(
            capabilities = snapshot.capabilities.len(),
            models = snapshot.models.len(),
            personas = snapshot.policies.len(),
            "Loaded registries from catalog store"
        );
        Ok(Self {
            inner: Arc::new(RwLock::new(snapshot)),
            store: Some(store),
        })
    }

    /// Acquire a consistent read view
    pub async fn read(&self) -> RwLockReadGuard<'_, RegistrySnapshot> {
        self.inner.read().await
    }

    /// Clone the current snapshot
    pub async fn snapshot(&self) -> RegistrySnapshot {
        self.inner.read().await.clone()
    }

    /// Toggle a model's eligibility
    ///
    /// The in-memory flag and the persisted flag change under the same
    /// exclusive guard, so no routing pass observes a half-applied toggle.
    pub async fn set_model_eligibility(&self, model_id: &str, is_eligible: bool) -> Result<Model> {
        let mut guard = self.inner.write().await;

        if guard.model(model_id).is_none() {
            return Err(Error::ModelNotFound(model_id.to_string()));
        }

        if let Some(store) = &self.store {
            store.set_model_eligibility(model_id, is_eligible).await?;
        }

        let model = guard.set_model_eligibility(model_id, is_eligible)?.clone();

        info!(
            model_id = %model_id,
            is_eligible = is_eligible,
            "Model eligibility changed"
        );

        Ok(model)
    }

    /// Re-read the registries from the catalog store
    ///
    /// Used after an external catalog import; in-memory registries without a
    /// store are left unchanged.
    pub async fn reload(&self) -> Result<()> {
        if let Some(store) = &self.store {
            let snapshot = store.load_snapshot().await?;
            *self.inner.write().await = snapshot;
            info!("Reloaded registries from catalog store");
        }
        Ok(())
    }

    /// Swap in a new snapshot (in-memory registries)
    pub async fn replace(&self, snapshot: RegistrySnapshot) {
        *self.inner.write().await = snapshot;
    }
}
