//! Admin observation surface
//!
//! Read-only listings over the registries and the decision log, plus one
//! write: toggling a model's eligibility. The surface holds no router handle,
//! so nothing here can pick the model for a request.

mod dto;

use std::sync::Arc;

use tracing::{debug, info};

pub use dto::{
    CapabilitySupport, CapabilityView, DecisionQuery, DecisionView, DenialQuery, EligibilityPatch,
    ModelQuery, ModelView, SupportState,
};

use crate::audit::{self, DecisionFilter, DecisionLog, DenialFilter, LogSummary};
use crate::catalog::SharedRegistry;
use crate::error::{Error, Result};
use crate::routing::CapabilityDenial;

/// Fields a PATCH body may carry
const PATCHABLE_FIELDS: [&str; 2] = ["model_id", "is_eligible"];

/// Observer over registries and logs
#[derive(Debug, Clone)]
pub struct AdminSurface {
    registry: SharedRegistry,
    log: Arc<DecisionLog>,
}

impl AdminSurface {
    pub fn new(registry: SharedRegistry, log: Arc<DecisionLog>) -> Self {
        Self { registry, log }
    }

    /// All registered capabilities
    pub async fn list_capabilities(&self) -> Vec<CapabilityView> {
        let snapshot = self.registry.read().await;
        snapshot
            .capabilities()
            .map(|capability| CapabilityView::from_registry(capability, &snapshot))
            .collect()
    }

    /// Models with their capability support matrix
    pub async fn list_models(&self, query: &ModelQuery) -> Vec<ModelView> {
        let snapshot = self.registry.read().await;
        snapshot
            .models()
            .filter(|model| {
                query
                    .capability_key
                    .as_deref()
                    .is_none_or(|key| model.supports(key))
            })
            .map(|model| ModelView::from_registry(model, &snapshot))
            .collect()
    }

    /// One model with its support matrix
    pub async fn get_model(&self, model_id: &str) -> Result<ModelView> {
        let snapshot = self.registry.read().await;
        let model = snapshot
            .model(model_id)
            .ok_or_else(|| Error::ModelNotFound(model_id.to_string()))?;
        Ok(ModelView::from_registry(model, &snapshot))
    }

    /// Logged decisions joined against the live registry
    ///
    /// `replay_status` is computed at query time, so filtering on it reflects
    /// the registry as it is now, not as it was when the decision was made.
    pub async fn list_decisions(&self, query: &DecisionQuery) -> Result<Vec<DecisionView>> {
        let filter = DecisionFilter {
            capability_key: query.capability_key.clone(),
            persona_id: query.persona_id.clone(),
            model_id: None,
            // The status filter runs after the join, so the limit has to as well
            limit: query.replay_status.is_none().then_some(query.limit).flatten(),
        };
        let decisions = self.log.list_decisions(&filter).await?;

        let snapshot = self.registry.read().await;
        let views = decisions
            .into_iter()
            .map(|decision| {
                let (status, reason) = audit::assess(&snapshot, &decision);
                DecisionView::new(decision, status, reason)
            })
            .filter(|view| {
                query
                    .replay_status
                    .is_none_or(|wanted| view.replay_status == wanted)
            })
            .take(query.limit.map_or(usize::MAX, |l| l as usize))
            .collect::<Vec<_>>();

        debug!(count = views.len(), "Listed decisions");
        Ok(views)
    }

    /// Logged denials
    pub async fn list_denials(&self, query: &DenialQuery) -> Result<Vec<CapabilityDenial>> {
        let filter = DenialFilter {
            capability_key: query.capability_key.clone(),
            persona_id: query.persona_id.clone(),
            reason: query.reason,
            limit: query.limit,
        };
        self.log.list_denials(&filter).await
    }

    /// Log totals
    pub async fn summary(&self) -> Result<LogSummary> {
        self.log.summary().await
    }

    /// Toggle a model's eligibility
    pub async fn set_model_eligibility(&self, patch: &EligibilityPatch) -> Result<ModelView> {
        self.registry
            .set_model_eligibility(&patch.model_id, patch.is_eligible)
            .await?;

        info!(
            model_id = %patch.model_id,
            is_eligible = patch.is_eligible,
            "Admin toggled model eligibility"
        );
        self.get_model(&patch.model_id).await
    }

    /// Validate a raw PATCH body
    ///
    /// Any field besides `model_id` and `is_eligible` (`force_model`,
    /// `default_model`, ...) is refused with `METHOD_NOT_ALLOWED`.
    pub fn parse_patch(body: &serde_json::Value) -> Result<EligibilityPatch> {
        let fields = body
            .as_object()
            .ok_or_else(|| Error::InvalidInput("PATCH body must be a JSON object".to_string()))?;

        if let Some(field) = fields
            .keys()
            .find(|key| !PATCHABLE_FIELDS.contains(&key.as_str()))
        {
            return Err(Error::MethodNotAllowed(format!(
                "'{}' cannot be set through the admin surface; only is_eligible is writable",
                field
            )));
        }

        serde_json::from_value(body.clone())
            .map_err(|e| Error::InvalidInput(format!("invalid PATCH body: {}", e)))
    }
}
