//! Types for capability authorization and model routing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why an authorization attempt was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialReason {
    /// The capability key is not in the capability registry
    CapabilityNotFound,
    /// The capability is on the persona's forbidden list
    InForbidden,
    /// The capability is not on the persona's allowed list
    NotInAllowed,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CapabilityNotFound => "CAPABILITY_NOT_FOUND",
            Self::InForbidden => "IN_FORBIDDEN",
            Self::NotInAllowed => "NOT_IN_ALLOWED",
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DenialReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CAPABILITY_NOT_FOUND" => Ok(Self::CapabilityNotFound),
            "IN_FORBIDDEN" => Ok(Self::InForbidden),
            "NOT_IN_ALLOWED" => Ok(Self::NotInAllowed),
            _ => Err(format!("Unknown denial reason: {}", s)),
        }
    }
}

/// Result of a policy check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorizationOutcome {
    Allow,
    Deny(DenialReason),
}

impl AuthorizationOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// The denial reason, if denied
    pub fn denial_reason(&self) -> Option<DenialReason> {
        match self {
            Self::Allow => None,
            Self::Deny(reason) => Some(*reason),
        }
    }
}

/// Immutable record of a rejected authorization attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDenial {
    pub interaction_id: String,
    pub capability_key: String,
    pub persona_id: String,
    pub reason: DenialReason,
    pub timestamp: DateTime<Utc>,
}

impl CapabilityDenial {
    /// Create a denial stamped with the current time
    pub fn new(
        interaction_id: impl Into<String>,
        capability_key: impl Into<String>,
        persona_id: impl Into<String>,
        reason: DenialReason,
    ) -> Self {
        Self {
            interaction_id: interaction_id.into(),
            capability_key: capability_key.into(),
            persona_id: persona_id.into(),
            reason,
            timestamp: Utc::now(),
        }
    }
}

/// Per-component score of one candidate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// 1-based rank by cost among candidates (1 = cheapest)
    pub cost_rank: u32,
    /// 1-based rank by latency among candidates (1 = fastest)
    pub latency_rank: u32,
    pub stability_component: f64,
    pub cost_component: f64,
    pub latency_component: f64,
    pub score: f64,
}

/// A budget-compliant candidate with the inputs it was scored on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub model_id: String,
    pub cost_per_call: f64,
    pub avg_latency_ms: u64,
    pub stability_score: u8,
    pub breakdown: ScoreBreakdown,
}

/// Immutable record of one routing resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub interaction_id: String,
    pub capability_key: String,
    pub persona_id: String,
    /// The chosen model
    pub model_id: String,
    pub score: f64,
    /// Score breakdown of the chosen model
    pub breakdown: ScoreBreakdown,
    /// Every candidate that passed eligibility and budget filtering, best first
    pub candidates: Vec<ScoredCandidate>,
    /// SHA-256 over the canonical candidate inputs
    pub inputs_digest: String,
    pub timestamp: DateTime<Utc>,
}

impl RoutingDecision {
    /// Alternatives that were considered but not chosen
    pub fn alternatives(&self) -> impl Iterator<Item = &ScoredCandidate> {
        self.candidates
            .iter()
            .filter(move |c| c.model_id != self.model_id)
    }
}

/// A caller's request for a capability on behalf of a persona
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRequest {
    pub persona_id: String,
    pub capability_key: String,
    /// Caller-supplied interaction id; generated when absent
    #[serde(default)]
    pub interaction_id: Option<String>,
}

impl CapabilityRequest {
    pub fn new(persona_id: impl Into<String>, capability_key: impl Into<String>) -> Self {
        Self {
            persona_id: persona_id.into(),
            capability_key: capability_key.into(),
            interaction_id: None,
        }
    }

    /// Pin the interaction id (retries reuse the same id)
    pub fn with_interaction_id(mut self, interaction_id: impl Into<String>) -> Self {
        self.interaction_id = Some(interaction_id.into());
        self
    }

    /// Fill in a generated interaction id if none was supplied
    pub fn ensure_interaction_id(&mut self) -> &str {
        self.interaction_id.get_or_insert_with(new_interaction_id)
    }
}

/// Generate a fresh interaction id
pub fn new_interaction_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denial_reason_codes() {
        assert_eq!(DenialReason::InForbidden.as_str(), "IN_FORBIDDEN");
        assert_eq!(
            "not_in_allowed".parse::<DenialReason>().unwrap(),
            DenialReason::NotInAllowed
        );
        assert!("DENIED".parse::<DenialReason>().is_err());
    }

    #[test]
    fn test_authorization_outcome_wire_shape() {
        let deny = serde_json::to_value(AuthorizationOutcome::Deny(DenialReason::InForbidden)).unwrap();
        assert_eq!(deny["decision"], "DENY");
        assert_eq!(deny["reason"], "IN_FORBIDDEN");

        let allow = serde_json::to_value(AuthorizationOutcome::Allow).unwrap();
        assert_eq!(allow["decision"], "ALLOW");
        assert!(AuthorizationOutcome::Allow.denial_reason().is_none());
    }

    #[test]
    fn test_request_interaction_id_generated_once() {
        let mut request = CapabilityRequest::new("p1", "summarize_fast");
        let first = request.ensure_interaction_id().to_string();
        let second = request.ensure_interaction_id().to_string();
        assert_eq!(first, second);

        let mut pinned = CapabilityRequest::new("p1", "summarize_fast").with_interaction_id("X");
        assert_eq!(pinned.ensure_interaction_id(), "X");
    }
}
