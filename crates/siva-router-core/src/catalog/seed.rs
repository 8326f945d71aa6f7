//! Catalog seed files
//!
//! Platform administration and persona configuration tooling hand the router
//! their reference data as a TOML catalog:
//!
//! ```toml
//! [[capabilities]]
//! capability_key = "summarize_fast"
//! latency_class = "low"
//! risk_class = "low"
//! replay_tolerance = "relaxed"
//!
//! [[models]]
//! model_id = "openai/gpt-4o-mini"
//! model_slug = "GPT-4o mini"
//! supported_capabilities = ["summarize_fast"]
//! cost_per_call = 0.0002
//! avg_latency_ms = 400
//! stability_score = 90
//!
//! [[personas]]
//! persona_id = "siva-analyst"
//! allowed_capabilities = ["summarize_fast"]
//! forbidden_capabilities = []
//! max_cost_per_call = 0.001
//! max_latency_ms = 2000
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::registry::RegistrySnapshot;
use super::types::{Capability, LatencyClass, Model, PersonaPolicy, ReplayTolerance, RiskClass};
use crate::error::{Error, Result};

/// Full set of reference data: capabilities, models, and persona policies
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub models: Vec<Model>,
    #[serde(default)]
    pub personas: Vec<PersonaPolicy>,
}

impl Catalog {
    /// Parse a catalog from TOML text and check its entries
    ///
    /// Capability references are resolved at import time, since a partial
    /// catalog may point at capabilities that are already registered.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let catalog: Catalog = toml::from_str(contents)
            .map_err(|e| Error::CatalogInvalid(format!("failed to parse catalog: {}", e)))?;
        catalog.check_entries()?;
        Ok(catalog)
    }

    /// Load a catalog file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::CatalogInvalid(format!("failed to serialize catalog: {}", e)))
    }

    /// A small built-in catalog for local development
    pub fn with_defaults() -> Self {
        let capabilities = vec![
            Capability::new("summarize_fast")
                .with_latency_class(LatencyClass::Low)
                .with_risk_class(RiskClass::Low)
                .with_replay_tolerance(ReplayTolerance::Relaxed),
            Capability::new("classify_cheap")
                .with_latency_class(LatencyClass::Low)
                .with_risk_class(RiskClass::Low)
                .with_replay_tolerance(ReplayTolerance::Relaxed),
            Capability::new("reason_deep")
                .with_latency_class(LatencyClass::High)
                .with_risk_class(RiskClass::Medium)
                .with_replay_tolerance(ReplayTolerance::Strict),
            Capability::new("draft_outreach")
                .with_latency_class(LatencyClass::Medium)
                .with_risk_class(RiskClass::High)
                .with_replay_tolerance(ReplayTolerance::Strict),
        ];

        let models = vec![
            Model::new("openai/gpt-4o-mini")
                .with_slug("GPT-4o mini")
                .with_capabilities(["summarize_fast", "classify_cheap"])
                .with_cost(0.0002)
                .with_latency_ms(400)
                .with_stability(90),
            Model::new("anthropic/claude-3-5-haiku-latest")
                .with_slug("Claude 3.5 Haiku")
                .with_capabilities(["summarize_fast", "classify_cheap", "draft_outreach"])
                .with_cost(0.0004)
                .with_latency_ms(350)
                .with_stability(95),
            Model::new("anthropic/claude-sonnet-4-20250514")
                .with_slug("Claude Sonnet 4")
                .with_capabilities(["reason_deep", "draft_outreach", "summarize_fast"])
                .with_cost(0.006)
                .with_latency_ms(1800)
                .with_stability(93),
            Model::new("openai/gpt-4o")
                .with_slug("GPT-4o")
                .with_capabilities(["reason_deep", "draft_outreach"])
                .with_cost(0.005)
                .with_latency_ms(1500)
                .with_stability(88),
        ];

        let personas = vec![
            PersonaPolicy::new("siva-analyst")
                .allow(["summarize_fast", "classify_cheap", "reason_deep"])
                .with_budget(0.01, 3000),
            PersonaPolicy::new("siva-outreach")
                .allow(["summarize_fast", "draft_outreach"])
                .forbid(["reason_deep"])
                .with_budget(0.001, 1000),
            PersonaPolicy::new("siva-triage")
                .allow(["summarize_fast", "classify_cheap"])
                .with_budget(0.0003, 500),
        ];

        Self {
            capabilities,
            models,
            personas,
        }
    }

    /// Check value ranges and that every capability reference resolves,
    /// either to a capability in this catalog or to one in `registered`
    pub fn validate(&self, registered: &HashSet<String>) -> Result<()> {
        self.check_entries()?;

        let capability_keys: HashSet<&str> = self
            .capabilities
            .iter()
            .map(|c| c.capability_key.as_str())
            .collect();
        let known = |key: &str| capability_keys.contains(key) || registered.contains(key);

        for model in &self.models {
            if let Some(unknown) = model.supported_capabilities.iter().find(|key| !known(key)) {
                return Err(Error::CatalogInvalid(format!(
                    "model '{}' supports unknown capability '{}'",
                    model.model_id, unknown
                )));
            }
        }

        for policy in &self.personas {
            if let Some(unknown) = policy
                .allowed_capabilities
                .iter()
                .chain(policy.forbidden_capabilities.iter())
                .find(|key| !known(key))
            {
                return Err(Error::CatalogInvalid(format!(
                    "persona '{}' references unknown capability '{}'",
                    policy.persona_id, unknown
                )));
            }
        }

        Ok(())
    }

    // Empty ids, duplicates and out-of-range numbers
    fn check_entries(&self) -> Result<()> {
        let mut capability_keys = HashSet::new();
        for capability in &self.capabilities {
            if capability.capability_key.trim().is_empty() {
                return Err(Error::CatalogInvalid(
                    "capability_key must not be empty".to_string(),
                ));
            }
            if !capability_keys.insert(capability.capability_key.as_str()) {
                return Err(Error::CatalogInvalid(format!(
                    "duplicate capability '{}'",
                    capability.capability_key
                )));
            }
        }

        let mut model_ids = HashSet::new();
        for model in &self.models {
            if model.model_id.trim().is_empty() {
                return Err(Error::CatalogInvalid("model_id must not be empty".to_string()));
            }
            if !model_ids.insert(model.model_id.as_str()) {
                return Err(Error::CatalogInvalid(format!(
                    "duplicate model '{}'",
                    model.model_id
                )));
            }
            if !model.cost_per_call.is_finite() || model.cost_per_call < 0.0 {
                return Err(Error::CatalogInvalid(format!(
                    "model '{}' has invalid cost_per_call {}",
                    model.model_id, model.cost_per_call
                )));
            }
            if model.stability_score > 100 {
                return Err(Error::CatalogInvalid(format!(
                    "model '{}' has stability_score {} outside 0-100",
                    model.model_id, model.stability_score
                )));
            }
        }

        let mut persona_ids = HashSet::new();
        for policy in &self.personas {
            if policy.persona_id.trim().is_empty() {
                return Err(Error::CatalogInvalid(
                    "persona_id must not be empty".to_string(),
                ));
            }
            if !persona_ids.insert(policy.persona_id.as_str()) {
                return Err(Error::CatalogInvalid(format!(
                    "duplicate persona '{}'",
                    policy.persona_id
                )));
            }
            if !policy.max_cost_per_call.is_finite() || policy.max_cost_per_call < 0.0 {
                return Err(Error::CatalogInvalid(format!(
                    "persona '{}' has invalid max_cost_per_call {}",
                    policy.persona_id, policy.max_cost_per_call
                )));
            }
        }

        Ok(())
    }

    /// Build an in-memory registry snapshot
    pub fn into_snapshot(self) -> RegistrySnapshot {
        let mut snapshot = RegistrySnapshot::new();
        for capability in self.capabilities {
            snapshot.insert_capability(capability);
        }
        for model in self.models {
            snapshot.insert_model(model);
        }
        for policy in self.personas {
            snapshot.insert_policy(policy);
        }
        snapshot
    }
}
