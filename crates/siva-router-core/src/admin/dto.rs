//! Admin surface data transfer objects

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::ReplayStatus;
use crate::catalog::{Capability, Model, RegistrySnapshot};
use crate::routing::{DenialReason, RoutingDecision, ScoreBreakdown};

/// Capability listing row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityView {
    pub capability_key: String,
    pub latency_class: String,
    pub risk_class: String,
    pub replay_tolerance: String,
    /// Routable models that serve this capability
    pub routable_models: usize,
}

impl CapabilityView {
    pub fn from_registry(capability: &Capability, snapshot: &RegistrySnapshot) -> Self {
        Self {
            capability_key: capability.capability_key.clone(),
            latency_class: capability.latency_class.to_string(),
            risk_class: capability.risk_class.to_string(),
            replay_tolerance: capability.replay_tolerance.to_string(),
            routable_models: snapshot
                .routable_models_for(&capability.capability_key)
                .len(),
        }
    }
}

/// How a model relates to one registered capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportState {
    /// Declared and currently routable
    Supported,
    /// Declared, but the model is ineligible or retired
    Blocked,
    /// Not declared by the model
    Unsupported,
}

/// One cell of the model × capability support matrix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySupport {
    pub capability_key: String,
    pub state: SupportState,
}

/// Model listing row with its support matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelView {
    pub model_id: String,
    pub model_slug: String,
    pub cost_per_call: f64,
    pub avg_latency_ms: u64,
    pub stability_score: u8,
    pub is_eligible: bool,
    pub is_active: bool,
    pub supported_capabilities: Vec<String>,
    pub blocked_capabilities: Vec<String>,
    pub support: Vec<CapabilitySupport>,
}

impl ModelView {
    pub fn from_registry(model: &Model, snapshot: &RegistrySnapshot) -> Self {
        let support: Vec<CapabilitySupport> = snapshot
            .capabilities()
            .map(|capability| {
                let key = &capability.capability_key;
                let state = if !model.supports(key) {
                    SupportState::Unsupported
                } else if model.is_routable() {
                    SupportState::Supported
                } else {
                    SupportState::Blocked
                };
                CapabilitySupport {
                    capability_key: key.clone(),
                    state,
                }
            })
            .collect();

        let keys_in = |wanted: SupportState| -> Vec<String> {
            support
                .iter()
                .filter(|cell| cell.state == wanted)
                .map(|cell| cell.capability_key.clone())
                .collect()
        };

        Self {
            model_id: model.model_id.clone(),
            model_slug: model.model_slug.clone(),
            cost_per_call: model.cost_per_call,
            avg_latency_ms: model.avg_latency_ms,
            stability_score: model.stability_score,
            is_eligible: model.is_eligible,
            is_active: model.is_active,
            supported_capabilities: keys_in(SupportState::Supported),
            blocked_capabilities: keys_in(SupportState::Blocked),
            support,
        }
    }
}

/// Decision listing row joined with its current replay status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionView {
    pub interaction_id: String,
    pub capability_key: String,
    pub persona_id: String,
    pub model_id: String,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub alternatives: Vec<String>,
    pub inputs_digest: String,
    pub timestamp: DateTime<Utc>,
    pub replay_status: ReplayStatus,
    pub deviation_reason: Option<String>,
}

impl DecisionView {
    pub fn new(
        decision: RoutingDecision,
        replay_status: ReplayStatus,
        deviation_reason: Option<String>,
    ) -> Self {
        let alternatives = decision
            .alternatives()
            .map(|candidate| candidate.model_id.clone())
            .collect();

        Self {
            interaction_id: decision.interaction_id,
            capability_key: decision.capability_key,
            persona_id: decision.persona_id,
            model_id: decision.model_id,
            score: decision.score,
            breakdown: decision.breakdown,
            alternatives,
            inputs_digest: decision.inputs_digest,
            timestamp: decision.timestamp,
            replay_status,
            deviation_reason,
        }
    }
}

/// Query for the decision listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionQuery {
    pub capability_key: Option<String>,
    pub persona_id: Option<String>,
    pub replay_status: Option<ReplayStatus>,
    pub limit: Option<u32>,
}

/// Query for the denial listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenialQuery {
    pub capability_key: Option<String>,
    pub persona_id: Option<String>,
    pub reason: Option<DenialReason>,
    pub limit: Option<u32>,
}

/// Query for the model listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelQuery {
    /// Only models that declare this capability
    pub capability_key: Option<String>,
}

/// The only write the admin surface accepts
///
/// There is deliberately no field for selecting a model: routing outcomes can
/// only change through the eligibility flag the router already reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EligibilityPatch {
    pub model_id: String,
    pub is_eligible: bool,
}

impl EligibilityPatch {
    pub fn new(model_id: impl Into<String>, is_eligible: bool) -> Self {
        Self {
            model_id: model_id.into(),
            is_eligible,
        }
    }
}
