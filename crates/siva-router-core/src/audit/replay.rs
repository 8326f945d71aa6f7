//! Replay resolution
//!
//! Replay returns the model recorded at decision time, never a re-scored one.
//! The live registry is only consulted to flag deviations: a model that has
//! been retired, toggled ineligible, or no longer serves the capability.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::store::DecisionLog;
use crate::catalog::{RegistrySnapshot, SharedRegistry};
use crate::error::{Error, Result};
use crate::routing::RoutingDecision;

/// Whether the recorded model can still serve a replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplayStatus {
    Replayable,
    /// The model is gone from the registry or has been retired
    ModelDeleted,
    /// The model exists but an operator toggled it ineligible
    ModelIneligible,
    /// The model no longer lists the capability (or the capability is gone)
    CapabilityChanged,
}

impl ReplayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replayable => "REPLAYABLE",
            Self::ModelDeleted => "MODEL_DELETED",
            Self::ModelIneligible => "MODEL_INELIGIBLE",
            Self::CapabilityChanged => "CAPABILITY_CHANGED",
        }
    }

    /// True for every status except `Replayable`
    pub fn is_deviation(&self) -> bool {
        !matches!(self, Self::Replayable)
    }
}

impl std::fmt::Display for ReplayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReplayStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "REPLAYABLE" => Ok(Self::Replayable),
            "MODEL_DELETED" => Ok(Self::ModelDeleted),
            "MODEL_INELIGIBLE" => Ok(Self::ModelIneligible),
            "CAPABILITY_CHANGED" => Ok(Self::CapabilityChanged),
            _ => Err(format!("Unknown replay status: {}", s)),
        }
    }
}

/// What replay of an interaction would use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayResolution {
    pub interaction_id: String,
    /// Always the originally recorded model
    pub model_id: String,
    pub replay_status: ReplayStatus,
    /// Human-readable explanation when the status is a deviation
    pub deviation_reason: Option<String>,
}

/// Compare a recorded decision against the live registry
///
/// Checks run in a fixed order: deleted/retired, then ineligible, then
/// capability support. The first failing check determines the status.
pub fn assess(snapshot: &RegistrySnapshot, decision: &RoutingDecision) -> (ReplayStatus, Option<String>) {
    let model = match snapshot.model(&decision.model_id) {
        Some(model) if model.is_active => model,
        Some(_) => {
            return (
                ReplayStatus::ModelDeleted,
                Some(format!("model '{}' has been retired", decision.model_id)),
            );
        }
        None => {
            return (
                ReplayStatus::ModelDeleted,
                Some(format!(
                    "model '{}' is no longer in the registry",
                    decision.model_id
                )),
            );
        }
    };

    if !model.is_eligible {
        return (
            ReplayStatus::ModelIneligible,
            Some(format!("model '{}' is marked ineligible", decision.model_id)),
        );
    }

    if snapshot.capability(&decision.capability_key).is_none() {
        return (
            ReplayStatus::CapabilityChanged,
            Some(format!(
                "capability '{}' is no longer registered",
                decision.capability_key
            )),
        );
    }

    if !model.supports(&decision.capability_key) {
        return (
            ReplayStatus::CapabilityChanged,
            Some(format!(
                "model '{}' no longer supports capability '{}'",
                decision.model_id, decision.capability_key
            )),
        );
    }

    (ReplayStatus::Replayable, None)
}

/// Resolves which model a replay of a past interaction must use
#[derive(Debug, Clone)]
pub struct ReplayResolver {
    registry: SharedRegistry,
    log: Arc<DecisionLog>,
}

impl ReplayResolver {
    pub fn new(registry: SharedRegistry, log: Arc<DecisionLog>) -> Self {
        Self { registry, log }
    }

    /// Resolve the model for replaying `interaction_id`
    ///
    /// Fails with `InteractionNotFound` when no decision was recorded (a
    /// denied interaction has no decision either).
    pub async fn resolve_for_replay(&self, interaction_id: &str) -> Result<ReplayResolution> {
        let decision = self
            .log
            .get_decision(interaction_id)
            .await?
            .ok_or_else(|| Error::InteractionNotFound(interaction_id.to_string()))?;

        let (replay_status, deviation_reason) = {
            let snapshot = self.registry.read().await;
            assess(&snapshot, &decision)
        };

        if replay_status.is_deviation() {
            info!(
                interaction_id = %interaction_id,
                model_id = %decision.model_id,
                replay_status = %replay_status,
                "Replay deviates from recorded decision"
            );
        } else {
            debug!(
                interaction_id = %interaction_id,
                model_id = %decision.model_id,
                "Replay resolved to recorded model"
            );
        }

        Ok(ReplayResolution {
            interaction_id: decision.interaction_id,
            model_id: decision.model_id,
            replay_status,
            deviation_reason,
        })
    }
}
