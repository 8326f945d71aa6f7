//! Persistent storage for the capability, model, and persona policy registries
//!
//! The router only reads these tables, except for the eligibility flag on
//! models. Catalog imports are how the external owners hand over their data.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

use super::registry::RegistrySnapshot;
use super::seed::Catalog;
use super::types::{Capability, Model, PersonaPolicy};
use crate::error::{Error, Result};

/// Outcome of a catalog import
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub capabilities: usize,
    pub models: usize,
    pub personas: usize,
    /// Models the catalog listed as active that stay retired
    pub retired_preserved: Vec<String>,
}

/// Store for the reference-data tables
#[derive(Debug)]
pub struct CatalogStore {
    pool: SqlitePool,
}

impl CatalogStore {
    /// Create a new store from an existing connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Import a catalog in one transaction
    ///
    /// The catalog may be partial: capability references resolve against
    /// its own capabilities and the ones already stored.
    ///
    /// Existing rows are updated in place. Two flags are never taken from the
    /// file for models already on record: `is_eligible` stays whatever the
    /// admin toggle last set, and a retired model stays retired.
    pub async fn import(&self, catalog: &Catalog) -> Result<ImportSummary> {
        let mut tx = self.pool.begin().await?;

        let registered: HashSet<String> = sqlx::query_scalar("SELECT capability_key FROM capabilities")
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .collect();
        catalog.validate(&registered)?;

        let retired: Vec<String> = sqlx::query_scalar("SELECT model_id FROM models WHERE is_active = 0")
            .fetch_all(&mut *tx)
            .await?;

        for capability in &catalog.capabilities {
            sqlx::query(
                r#"
                INSERT INTO capabilities (capability_key, latency_class, risk_class, replay_tolerance)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(capability_key) DO UPDATE SET
                    latency_class = excluded.latency_class,
                    risk_class = excluded.risk_class,
                    replay_tolerance = excluded.replay_tolerance
                "#,
            )
            .bind(&capability.capability_key)
            .bind(capability.latency_class.as_str())
            .bind(capability.risk_class.as_str())
            .bind(capability.replay_tolerance.as_str())
            .execute(&mut *tx)
            .await?;
        }

        for model in &catalog.models {
            sqlx::query(
                r#"
                INSERT INTO models (
                    model_id, model_slug, cost_per_call, avg_latency_ms,
                    stability_score, is_eligible, is_active
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(model_id) DO UPDATE SET
                    model_slug = excluded.model_slug,
                    cost_per_call = excluded.cost_per_call,
                    avg_latency_ms = excluded.avg_latency_ms,
                    stability_score = excluded.stability_score,
                    is_active = models.is_active AND excluded.is_active,
                    updated_at = CURRENT_TIMESTAMP
                "#,
            )
            .bind(&model.model_id)
            .bind(&model.model_slug)
            .bind(model.cost_per_call)
            .bind(model.avg_latency_ms as i64)
            .bind(model.stability_score as i64)
            .bind(model.is_eligible)
            .bind(model.is_active)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM model_capabilities WHERE model_id = ?")
                .bind(&model.model_id)
                .execute(&mut *tx)
                .await?;

            for key in &model.supported_capabilities {
                sqlx::query("INSERT INTO model_capabilities (model_id, capability_key) VALUES (?, ?)")
                    .bind(&model.model_id)
                    .bind(key)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        for policy in &catalog.personas {
            sqlx::query(
                r#"
                INSERT INTO persona_policies (persona_id, max_cost_per_call, max_latency_ms)
                VALUES (?, ?, ?)
                ON CONFLICT(persona_id) DO UPDATE SET
                    max_cost_per_call = excluded.max_cost_per_call,
                    max_latency_ms = excluded.max_latency_ms,
                    updated_at = CURRENT_TIMESTAMP
                "#,
            )
            .bind(&policy.persona_id)
            .bind(policy.max_cost_per_call)
            .bind(policy.max_latency_ms as i64)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM persona_policy_capabilities WHERE persona_id = ?")
                .bind(&policy.persona_id)
                .execute(&mut *tx)
                .await?;

            let entries = policy
                .allowed_capabilities
                .iter()
                .map(|key| (key, "allowed"))
                .chain(
                    policy
                        .forbidden_capabilities
                        .iter()
                        .map(|key| (key, "forbidden")),
                );

            for (key, access) in entries {
                sqlx::query(
                    "INSERT INTO persona_policy_capabilities (persona_id, capability_key, access) VALUES (?, ?, ?)",
                )
                .bind(&policy.persona_id)
                .bind(key)
                .bind(access)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        let retired_preserved: Vec<String> = catalog
            .models
            .iter()
            .filter(|m| m.is_active && retired.contains(&m.model_id))
            .map(|m| m.model_id.clone())
            .collect();

        for model_id in &retired_preserved {
            warn!(model_id = %model_id, "Catalog lists a retired model as active; it stays retired");
        }

        let summary = ImportSummary {
            capabilities: catalog.capabilities.len(),
            models: catalog.models.len(),
            personas: catalog.personas.len(),
            retired_preserved,
        };

        info!(
            capabilities = summary.capabilities,
            models = summary.models,
            personas = summary.personas,
            "Imported catalog"
        );

        Ok(summary)
    }

    /// Read all three registries into a snapshot
    pub async fn load_snapshot(&self) -> Result<RegistrySnapshot> {
        let mut snapshot = RegistrySnapshot::new();

        let rows = sqlx::query(
            "SELECT capability_key, latency_class, risk_class, replay_tolerance FROM capabilities",
        )
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let capability = Capability {
                capability_key: row.get("capability_key"),
                latency_class: parse_column(row.get::<String, _>("latency_class"))?,
                risk_class: parse_column(row.get::<String, _>("risk_class"))?,
                replay_tolerance: parse_column(row.get::<String, _>("replay_tolerance"))?,
            };
            snapshot.insert_capability(capability);
        }

        let mut supported: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let rows = sqlx::query("SELECT model_id, capability_key FROM model_capabilities")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            supported
                .entry(row.get("model_id"))
                .or_default()
                .push(row.get("capability_key"));
        }

        let rows = sqlx::query(
            r#"
            SELECT model_id, model_slug, cost_per_call, avg_latency_ms,
                   stability_score, is_eligible, is_active
            FROM models
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let model_id: String = row.get("model_id");
            let model = Model {
                supported_capabilities: supported
                    .remove(&model_id)
                    .unwrap_or_default()
                    .into_iter()
                    .collect(),
                model_slug: row.get("model_slug"),
                cost_per_call: row.get("cost_per_call"),
                avg_latency_ms: row.get::<i64, _>("avg_latency_ms") as u64,
                stability_score: row.get::<i64, _>("stability_score").clamp(0, 100) as u8,
                is_eligible: row.get("is_eligible"),
                is_active: row.get("is_active"),
                model_id,
            };
            snapshot.insert_model(model);
        }

        let mut access: BTreeMap<String, (Vec<String>, Vec<String>)> = BTreeMap::new();
        let rows = sqlx::query(
            "SELECT persona_id, capability_key, access FROM persona_policy_capabilities",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let entry = access.entry(row.get("persona_id")).or_default();
            let key: String = row.get("capability_key");
            match row.get::<String, _>("access").as_str() {
                "forbidden" => entry.1.push(key),
                _ => entry.0.push(key),
            }
        }

        let rows = sqlx::query("SELECT persona_id, max_cost_per_call, max_latency_ms FROM persona_policies")
            .fetch_all(&self.pool)
            .await?;

        for row in rows {
            let persona_id: String = row.get("persona_id");
            let (allowed, forbidden) = access.remove(&persona_id).unwrap_or_default();
            let policy = PersonaPolicy::new(persona_id)
                .allow(allowed)
                .forbid(forbidden)
                .with_budget(
                    row.get("max_cost_per_call"),
                    row.get::<i64, _>("max_latency_ms") as u64,
                );
            snapshot.insert_policy(policy);
        }

        debug!("Loaded registry snapshot from database");
        Ok(snapshot)
    }

    /// Persist a model's eligibility flag
    pub async fn set_model_eligibility(&self, model_id: &str, is_eligible: bool) -> Result<()> {
        let result = sqlx::query(
            "UPDATE models SET is_eligible = ?, updated_at = CURRENT_TIMESTAMP WHERE model_id = ?",
        )
        .bind(is_eligible)
        .bind(model_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::ModelNotFound(model_id.to_string()));
        }

        Ok(())
    }
}

fn parse_column<T>(value: String) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value.parse().map_err(Error::Storage)
}
