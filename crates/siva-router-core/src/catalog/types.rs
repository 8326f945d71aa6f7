//! Reference data types: capabilities, models, and persona policies

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Expected latency band of a capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyClass {
    Low,
    Medium,
    High,
}

impl LatencyClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for LatencyClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LatencyClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("Unknown latency class: {}", s)),
        }
    }
}

/// Risk band of a capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    Low,
    Medium,
    High,
}

impl RiskClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for RiskClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("Unknown risk class: {}", s)),
        }
    }
}

/// How strictly a capability expects replays to reproduce the original model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayTolerance {
    Strict,
    Relaxed,
}

impl ReplayTolerance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Relaxed => "relaxed",
        }
    }
}

impl std::fmt::Display for ReplayTolerance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReplayTolerance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "relaxed" => Ok(Self::Relaxed),
            _ => Err(format!("Unknown replay tolerance: {}", s)),
        }
    }
}

/// An abstract, model-agnostic unit of AI work (e.g. `summarize_fast`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Unique key; immutable once referenced by a policy or log entry
    pub capability_key: String,
    pub latency_class: LatencyClass,
    pub risk_class: RiskClass,
    pub replay_tolerance: ReplayTolerance,
}

impl Capability {
    /// Create a capability with medium latency, low risk, strict replay
    pub fn new(capability_key: impl Into<String>) -> Self {
        Self {
            capability_key: capability_key.into(),
            latency_class: LatencyClass::Medium,
            risk_class: RiskClass::Low,
            replay_tolerance: ReplayTolerance::Strict,
        }
    }

    /// Set latency class
    pub fn with_latency_class(mut self, class: LatencyClass) -> Self {
        self.latency_class = class;
        self
    }

    /// Set risk class
    pub fn with_risk_class(mut self, class: RiskClass) -> Self {
        self.risk_class = class;
        self
    }

    /// Set replay tolerance
    pub fn with_replay_tolerance(mut self, tolerance: ReplayTolerance) -> Self {
        self.replay_tolerance = tolerance;
        self
    }
}

fn default_true() -> bool {
    true
}

/// A concrete backing model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Stable identifier
    pub model_id: String,
    /// Human-readable name; may change over time
    pub model_slug: String,
    /// Capability keys this model can serve
    #[serde(default)]
    pub supported_capabilities: BTreeSet<String>,
    /// Cost per call in USD
    pub cost_per_call: f64,
    /// Average latency in milliseconds
    pub avg_latency_ms: u64,
    /// Stability score (0-100)
    pub stability_score: u8,
    /// Maintenance toggle, flipped by admins
    #[serde(default = "default_true")]
    pub is_eligible: bool,
    /// False once the model is permanently retired
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Model {
    /// Create an active, eligible model with no capabilities
    pub fn new(model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        Self {
            model_slug: model_id.clone(),
            model_id,
            supported_capabilities: BTreeSet::new(),
            cost_per_call: 0.0,
            avg_latency_ms: 0,
            stability_score: 50,
            is_eligible: true,
            is_active: true,
        }
    }

    /// Set the human-readable slug
    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.model_slug = slug.into();
        self
    }

    /// Set supported capabilities
    pub fn with_capabilities<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_capabilities = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Set cost per call (USD)
    pub fn with_cost(mut self, cost_per_call: f64) -> Self {
        self.cost_per_call = cost_per_call;
        self
    }

    /// Set average latency
    pub fn with_latency_ms(mut self, avg_latency_ms: u64) -> Self {
        self.avg_latency_ms = avg_latency_ms;
        self
    }

    /// Set stability score, capped at 100
    pub fn with_stability(mut self, score: u8) -> Self {
        self.stability_score = score.min(100);
        self
    }

    /// Set the eligibility flag
    pub fn with_eligibility(mut self, is_eligible: bool) -> Self {
        self.is_eligible = is_eligible;
        self
    }

    /// Mark as permanently retired
    pub fn retired(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Whether this model serves the given capability
    pub fn supports(&self, capability_key: &str) -> bool {
        self.supported_capabilities.contains(capability_key)
    }

    /// Active and eligible: the router may consider it at all
    pub fn is_routable(&self) -> bool {
        self.is_active && self.is_eligible
    }
}

/// Capability access control and budget ceilings for one persona
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaPolicy {
    pub persona_id: String,
    #[serde(default)]
    pub allowed_capabilities: BTreeSet<String>,
    /// Wins over `allowed_capabilities` on conflict
    #[serde(default)]
    pub forbidden_capabilities: BTreeSet<String>,
    pub max_cost_per_call: f64,
    pub max_latency_ms: u64,
}

impl PersonaPolicy {
    /// Create a policy that allows nothing, with a zero budget
    pub fn new(persona_id: impl Into<String>) -> Self {
        Self {
            persona_id: persona_id.into(),
            allowed_capabilities: BTreeSet::new(),
            forbidden_capabilities: BTreeSet::new(),
            max_cost_per_call: 0.0,
            max_latency_ms: 0,
        }
    }

    /// Set the allowed capability keys
    pub fn allow<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_capabilities = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Set the forbidden capability keys
    pub fn forbid<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.forbidden_capabilities = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Set budget ceilings
    pub fn with_budget(mut self, max_cost_per_call: f64, max_latency_ms: u64) -> Self {
        self.max_cost_per_call = max_cost_per_call;
        self.max_latency_ms = max_latency_ms;
        self
    }

    /// Whether a model fits within both budget ceilings
    pub fn within_budget(&self, model: &Model) -> bool {
        model.cost_per_call <= self.max_cost_per_call && model.avg_latency_ms <= self.max_latency_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_parse() {
        assert_eq!("LOW".parse::<LatencyClass>().unwrap(), LatencyClass::Low);
        assert_eq!("high".parse::<RiskClass>().unwrap(), RiskClass::High);
        assert_eq!(
            "relaxed".parse::<ReplayTolerance>().unwrap(),
            ReplayTolerance::Relaxed
        );
        assert!("fast".parse::<LatencyClass>().is_err());
    }

    #[test]
    fn test_model_builders() {
        let model = Model::new("m-1")
            .with_slug("Fast Summarizer")
            .with_capabilities(["summarize_fast"])
            .with_cost(0.0002)
            .with_latency_ms(300)
            .with_stability(250);

        assert_eq!(model.stability_score, 100);
        assert!(model.supports("summarize_fast"));
        assert!(!model.supports("reason_deep"));
        assert!(model.is_routable());
        assert!(!model.clone().retired().is_routable());
        assert!(!model.with_eligibility(false).is_routable());
    }

    #[test]
    fn test_policy_budget() {
        let policy = PersonaPolicy::new("p1").with_budget(0.001, 500);
        let cheap = Model::new("a").with_cost(0.0005).with_latency_ms(200);
        let pricey = Model::new("b").with_cost(0.002).with_latency_ms(200);
        let slow = Model::new("c").with_cost(0.0005).with_latency_ms(900);
        let exact = Model::new("d").with_cost(0.001).with_latency_ms(500);

        assert!(policy.within_budget(&cheap));
        assert!(!policy.within_budget(&pricey));
        assert!(!policy.within_budget(&slow));
        assert!(policy.within_budget(&exact));
    }

    #[test]
    fn test_model_toml_defaults() {
        let model: Model = toml::from_str(
            r#"
            model_id = "m-1"
            model_slug = "one"
            supported_capabilities = ["summarize_fast"]
            cost_per_call = 0.0004
            avg_latency_ms = 250
            stability_score = 95
            "#,
        )
        .unwrap();

        assert!(model.is_eligible);
        assert!(model.is_active);
    }
}
