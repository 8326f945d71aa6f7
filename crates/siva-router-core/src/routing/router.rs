//! Deterministic capability router
//!
//! Given an authorized (capability, persona) pair, the router:
//! 1. collects active, eligible models that support the capability,
//! 2. drops every model over the persona's cost or latency ceiling,
//! 3. scores the survivors (see [`super::scoring`]) and picks the best,
//! 4. appends the decision to the log before returning it.
//!
//! Budget ceilings are hard: when nothing fits, routing fails with
//! `NoEligibleModel` instead of falling back to an over-budget model.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::authorizer::evaluate_policy;
use super::scoring;
use super::types::{AuthorizationOutcome, RoutingDecision, ScoredCandidate};
use crate::audit::DecisionLog;
use crate::catalog::{RegistrySnapshot, SharedRegistry};
use crate::error::{Error, Result};

/// Selects the backing model for a capability request
#[derive(Debug, Clone)]
pub struct CapabilityRouter {
    registry: SharedRegistry,
    log: Arc<DecisionLog>,
}

impl CapabilityRouter {
    pub fn new(registry: SharedRegistry, log: Arc<DecisionLog>) -> Self {
        Self { registry, log }
    }

    /// Route an authorized request and record the decision
    ///
    /// Routing the same `interaction_id` again returns the decision already
    /// on record; a different capability or persona under a used id, or an
    /// id that was denied, is rejected.
    pub async fn route(
        &self,
        capability_key: &str,
        persona_id: &str,
        interaction_id: &str,
    ) -> Result<RoutingDecision> {
        if interaction_id.trim().is_empty() {
            return Err(Error::InvalidInput(
                "interaction_id must not be empty".to_string(),
            ));
        }
        if let Some(existing) = self.log.get_decision(interaction_id).await? {
            return Self::reuse(existing, capability_key, persona_id);
        }
        if let Some(denial) = self.log.get_denial(interaction_id).await? {
            return Err(Error::InvalidInput(format!(
                "interaction '{}' was already denied ({})",
                interaction_id, denial.reason
            )));
        }

        let candidates = {
            let snapshot = self.registry.read().await;
            Self::ranked_candidates(&snapshot, capability_key, persona_id)?
        };

        let Some(winner) = candidates.first() else {
            warn!(
                capability_key = %capability_key,
                persona_id = %persona_id,
                interaction_id = %interaction_id,
                "No eligible model within budget"
            );
            return Err(Error::NoEligibleModel {
                capability_key: capability_key.to_string(),
                persona_id: persona_id.to_string(),
            });
        };

        let decision = RoutingDecision {
            interaction_id: interaction_id.to_string(),
            capability_key: capability_key.to_string(),
            persona_id: persona_id.to_string(),
            model_id: winner.model_id.clone(),
            score: winner.breakdown.score,
            breakdown: winner.breakdown,
            inputs_digest: scoring::inputs_digest(capability_key, persona_id, &candidates),
            candidates,
            timestamp: Utc::now(),
        };

        let recorded = self.log.record_decision(&decision).await?;
        if recorded != decision {
            // Lost a race with a concurrent route for the same interaction
            return Self::reuse(recorded, capability_key, persona_id);
        }

        info!(
            interaction_id = %recorded.interaction_id,
            capability_key = %capability_key,
            persona_id = %persona_id,
            model_id = %recorded.model_id,
            score = recorded.score,
            candidates = recorded.candidates.len(),
            "Routed capability request"
        );

        Ok(recorded)
    }

    /// Rank candidates without recording anything
    pub async fn preview(&self, capability_key: &str, persona_id: &str) -> Result<Vec<ScoredCandidate>> {
        let snapshot = self.registry.read().await;
        Self::ranked_candidates(&snapshot, capability_key, persona_id)
    }

    /// Candidates that pass eligibility and budget filtering, best first
    fn ranked_candidates(
        snapshot: &RegistrySnapshot,
        capability_key: &str,
        persona_id: &str,
    ) -> Result<Vec<ScoredCandidate>> {
        if let AuthorizationOutcome::Deny(reason) =
            evaluate_policy(snapshot, persona_id, capability_key)
        {
            return Err(Error::NotAuthorized {
                persona_id: persona_id.to_string(),
                capability_key: capability_key.to_string(),
                reason: reason.to_string(),
            });
        }

        let policy = snapshot
            .policy(persona_id)
            .ok_or_else(|| Error::PersonaNotFound(persona_id.to_string()))?;

        let routable = snapshot.routable_models_for(capability_key);
        let total = routable.len();
        let within_budget: Vec<_> = routable
            .into_iter()
            .filter(|model| policy.within_budget(model))
            .collect();

        debug!(
            capability_key = %capability_key,
            persona_id = %persona_id,
            routable = total,
            over_budget = total - within_budget.len(),
            "Filtered candidates"
        );

        Ok(scoring::rank_candidates(&within_budget))
    }

    fn reuse(existing: RoutingDecision, capability_key: &str, persona_id: &str) -> Result<RoutingDecision> {
        if existing.capability_key != capability_key || existing.persona_id != persona_id {
            return Err(Error::InvalidInput(format!(
                "interaction '{}' was already routed for capability '{}' and persona '{}'",
                existing.interaction_id, existing.capability_key, existing.persona_id
            )));
        }

        debug!(
            interaction_id = %existing.interaction_id,
            model_id = %existing.model_id,
            "Returning recorded decision"
        );
        Ok(existing)
    }
}
