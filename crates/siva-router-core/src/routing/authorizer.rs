//! Capability authorization
//!
//! A persona may use a capability only if the capability exists, is not on
//! the persona's forbidden list, and is on its allowed list. Forbidden always
//! wins over allowed. Every denial is written to the decision log before the
//! outcome is returned, so no denied request can reach a model unrecorded.

use std::sync::Arc;

use tracing::{debug, info};

use super::types::{AuthorizationOutcome, CapabilityDenial, DenialReason};
use crate::audit::DecisionLog;
use crate::catalog::{RegistrySnapshot, SharedRegistry};
use crate::error::{Error, Result};

/// Evaluate a persona's policy against a capability
///
/// A persona with no policy on record has nothing allowed and is denied with
/// `NOT_IN_ALLOWED`.
pub fn evaluate_policy(
    snapshot: &RegistrySnapshot,
    persona_id: &str,
    capability_key: &str,
) -> AuthorizationOutcome {
    if snapshot.capability(capability_key).is_none() {
        return AuthorizationOutcome::Deny(DenialReason::CapabilityNotFound);
    }

    let Some(policy) = snapshot.policy(persona_id) else {
        return AuthorizationOutcome::Deny(DenialReason::NotInAllowed);
    };

    if policy.forbidden_capabilities.contains(capability_key) {
        return AuthorizationOutcome::Deny(DenialReason::InForbidden);
    }

    if !policy.allowed_capabilities.contains(capability_key) {
        return AuthorizationOutcome::Deny(DenialReason::NotInAllowed);
    }

    AuthorizationOutcome::Allow
}

/// Gatekeeper for capability requests
#[derive(Debug, Clone)]
pub struct Authorizer {
    registry: SharedRegistry,
    log: Arc<DecisionLog>,
}

impl Authorizer {
    pub fn new(registry: SharedRegistry, log: Arc<DecisionLog>) -> Self {
        Self { registry, log }
    }

    /// Decide whether `persona_id` may use `capability_key`
    ///
    /// A denial is persisted under `interaction_id` before this returns. If
    /// the denial cannot be written the call fails rather than returning an
    /// unrecorded `Deny`. An interaction id belongs to one request: reusing
    /// it for a different request, or denying an id that was already routed,
    /// is `InvalidInput`. Repeating the same denied request is a retry and
    /// returns the recorded outcome.
    pub async fn authorize(
        &self,
        persona_id: &str,
        capability_key: &str,
        interaction_id: &str,
    ) -> Result<AuthorizationOutcome> {
        if interaction_id.trim().is_empty() {
            return Err(Error::InvalidInput(
                "interaction_id must not be empty".to_string(),
            ));
        }

        let outcome = {
            let snapshot = self.registry.read().await;
            evaluate_policy(&snapshot, persona_id, capability_key)
        };

        match outcome {
            AuthorizationOutcome::Allow => {
                if let Some(denial) = self.log.get_denial(interaction_id).await? {
                    return Err(Error::InvalidInput(format!(
                        "interaction '{}' was already denied ({}) for capability '{}' and persona '{}'",
                        interaction_id, denial.reason, denial.capability_key, denial.persona_id
                    )));
                }

                debug!(
                    persona_id = %persona_id,
                    capability_key = %capability_key,
                    interaction_id = %interaction_id,
                    "Capability authorized"
                );
            }
            AuthorizationOutcome::Deny(reason) => {
                if let Some(decision) = self.log.get_decision(interaction_id).await? {
                    return Err(Error::InvalidInput(format!(
                        "interaction '{}' was already routed to '{}'",
                        interaction_id, decision.model_id
                    )));
                }

                let denial =
                    CapabilityDenial::new(interaction_id, capability_key, persona_id, reason);
                if !self.log.record_denial(&denial).await? {
                    return self.reuse_denial(&denial).await;
                }

                info!(
                    persona_id = %persona_id,
                    capability_key = %capability_key,
                    interaction_id = %interaction_id,
                    reason = %reason,
                    "Capability denied"
                );
            }
        }

        Ok(outcome)
    }

    /// Settle a denial that lost to an earlier row for the same interaction
    async fn reuse_denial(&self, denial: &CapabilityDenial) -> Result<AuthorizationOutcome> {
        let existing = self
            .log
            .get_denial(&denial.interaction_id)
            .await?
            .ok_or_else(|| Error::InteractionNotFound(denial.interaction_id.clone()))?;

        if existing.persona_id != denial.persona_id
            || existing.capability_key != denial.capability_key
            || existing.reason != denial.reason
        {
            return Err(Error::InvalidInput(format!(
                "interaction '{}' was already denied ({}) for capability '{}' and persona '{}'",
                existing.interaction_id, existing.reason, existing.capability_key, existing.persona_id
            )));
        }

        debug!(
            interaction_id = %existing.interaction_id,
            reason = %existing.reason,
            "Returning recorded denial"
        );
        Ok(AuthorizationOutcome::Deny(existing.reason))
    }
}
