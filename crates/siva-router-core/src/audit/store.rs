//! Append-only decision log
//!
//! Every routing decision and every capability denial is written exactly once,
//! keyed by interaction id. The schema rejects UPDATE and DELETE on both
//! tables, and the insert paths use `ON CONFLICT DO NOTHING` so a retried
//! interaction never overwrites what was first recorded.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::routing::{CapabilityDenial, DenialReason, RoutingDecision, ScoreBreakdown, ScoredCandidate};

const DECISION_COLUMNS: &str = "interaction_id, capability_key, persona_id, model_id, score, \
     stability_component, cost_component, latency_component, cost_rank, latency_rank, \
     candidates, inputs_digest, decided_at";

const DENIAL_COLUMNS: &str = "interaction_id, capability_key, persona_id, reason, denied_at";

/// Filter for decision listings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionFilter {
    pub capability_key: Option<String>,
    pub persona_id: Option<String>,
    pub model_id: Option<String>,
    pub limit: Option<u32>,
}

impl DecisionFilter {
    pub fn for_capability(mut self, capability_key: impl Into<String>) -> Self {
        self.capability_key = Some(capability_key.into());
        self
    }

    pub fn for_persona(mut self, persona_id: impl Into<String>) -> Self {
        self.persona_id = Some(persona_id.into());
        self
    }

    pub fn for_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Filter for denial listings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenialFilter {
    pub capability_key: Option<String>,
    pub persona_id: Option<String>,
    pub reason: Option<DenialReason>,
    pub limit: Option<u32>,
}

impl DenialFilter {
    pub fn for_capability(mut self, capability_key: impl Into<String>) -> Self {
        self.capability_key = Some(capability_key.into());
        self
    }

    pub fn for_persona(mut self, persona_id: impl Into<String>) -> Self {
        self.persona_id = Some(persona_id.into());
        self
    }

    pub fn with_reason(mut self, reason: DenialReason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Aggregate counts over the whole log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogSummary {
    pub decisions: u64,
    pub denials: u64,
    pub decisions_by_model: BTreeMap<String, u64>,
    pub decisions_by_capability: BTreeMap<String, u64>,
    pub denials_by_reason: BTreeMap<String, u64>,
}

/// SQLite-backed append-only log of routing decisions and denials
#[derive(Debug, Clone)]
pub struct DecisionLog {
    pool: SqlitePool,
}

impl DecisionLog {
    /// Create a log over an existing (migrated) connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a routing decision
    ///
    /// Returns the decision that is durably on record for the interaction:
    /// the one passed in if this call wrote it, otherwise the earlier one.
    pub async fn record_decision(&self, decision: &RoutingDecision) -> Result<RoutingDecision> {
        let candidates = serde_json::to_string(&decision.candidates)?;

        let result = sqlx::query(
            r#"
            INSERT INTO routing_decisions (
                interaction_id, capability_key, persona_id, model_id, score,
                stability_component, cost_component, latency_component,
                cost_rank, latency_rank, candidates, inputs_digest, decided_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(interaction_id) DO NOTHING
            "#,
        )
        .bind(&decision.interaction_id)
        .bind(&decision.capability_key)
        .bind(&decision.persona_id)
        .bind(&decision.model_id)
        .bind(decision.score)
        .bind(decision.breakdown.stability_component)
        .bind(decision.breakdown.cost_component)
        .bind(decision.breakdown.latency_component)
        .bind(i64::from(decision.breakdown.cost_rank))
        .bind(i64::from(decision.breakdown.latency_rank))
        .bind(&candidates)
        .bind(&decision.inputs_digest)
        .bind(decision.timestamp)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(
                interaction_id = %decision.interaction_id,
                "Decision already on record, keeping the original"
            );
            return self
                .get_decision(&decision.interaction_id)
                .await?
                .ok_or_else(|| Error::InteractionNotFound(decision.interaction_id.clone()));
        }

        debug!(
            interaction_id = %decision.interaction_id,
            model_id = %decision.model_id,
            "Recorded routing decision"
        );
        Ok(decision.clone())
    }

    /// Append a capability denial
    ///
    /// Returns `false` if a denial for this interaction was already on record.
    pub async fn record_denial(&self, denial: &CapabilityDenial) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO capability_denials (
                interaction_id, capability_key, persona_id, reason, denied_at
            ) VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(interaction_id) DO NOTHING
            "#,
        )
        .bind(&denial.interaction_id)
        .bind(&denial.capability_key)
        .bind(&denial.persona_id)
        .bind(denial.reason.as_str())
        .bind(denial.timestamp)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() > 0;
        if !inserted {
            debug!(
                interaction_id = %denial.interaction_id,
                "Denial already on record"
            );
        }
        Ok(inserted)
    }

    /// Look up the decision recorded for an interaction
    pub async fn get_decision(&self, interaction_id: &str) -> Result<Option<RoutingDecision>> {
        let sql = format!(
            "SELECT {} FROM routing_decisions WHERE interaction_id = ?",
            DECISION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(interaction_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| decision_from_row(&r)).transpose()
    }

    /// Look up the denial recorded for an interaction
    pub async fn get_denial(&self, interaction_id: &str) -> Result<Option<CapabilityDenial>> {
        let sql = format!(
            "SELECT {} FROM capability_denials WHERE interaction_id = ?",
            DENIAL_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(interaction_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| denial_from_row(&r)).transpose()
    }

    /// List decisions, newest first
    pub async fn list_decisions(&self, filter: &DecisionFilter) -> Result<Vec<RoutingDecision>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM routing_decisions WHERE 1 = 1",
            DECISION_COLUMNS
        ));

        if let Some(capability_key) = &filter.capability_key {
            query.push(" AND capability_key = ").push_bind(capability_key.clone());
        }
        if let Some(persona_id) = &filter.persona_id {
            query.push(" AND persona_id = ").push_bind(persona_id.clone());
        }
        if let Some(model_id) = &filter.model_id {
            query.push(" AND model_id = ").push_bind(model_id.clone());
        }
        query.push(" ORDER BY decided_at DESC, interaction_id ASC");
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(decision_from_row).collect()
    }

    /// List denials, newest first
    pub async fn list_denials(&self, filter: &DenialFilter) -> Result<Vec<CapabilityDenial>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM capability_denials WHERE 1 = 1",
            DENIAL_COLUMNS
        ));

        if let Some(capability_key) = &filter.capability_key {
            query.push(" AND capability_key = ").push_bind(capability_key.clone());
        }
        if let Some(persona_id) = &filter.persona_id {
            query.push(" AND persona_id = ").push_bind(persona_id.clone());
        }
        if let Some(reason) = filter.reason {
            query.push(" AND reason = ").push_bind(reason.as_str());
        }
        query.push(" ORDER BY denied_at DESC, interaction_id ASC");
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(denial_from_row).collect()
    }

    /// Count decisions and denials
    pub async fn summary(&self) -> Result<LogSummary> {
        let decisions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM routing_decisions")
            .fetch_one(&self.pool)
            .await?;
        let denials: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM capability_denials")
            .fetch_one(&self.pool)
            .await?;

        Ok(LogSummary {
            decisions: decisions as u64,
            denials: denials as u64,
            decisions_by_model: self
                .grouped_counts("SELECT model_id, COUNT(*) FROM routing_decisions GROUP BY model_id")
                .await?,
            decisions_by_capability: self
                .grouped_counts(
                    "SELECT capability_key, COUNT(*) FROM routing_decisions GROUP BY capability_key",
                )
                .await?,
            denials_by_reason: self
                .grouped_counts("SELECT reason, COUNT(*) FROM capability_denials GROUP BY reason")
                .await?,
        })
    }

    async fn grouped_counts(&self, sql: &str) -> Result<BTreeMap<String, u64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(sql).fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(key, count)| (key, count as u64))
            .collect())
    }
}

fn decision_from_row(row: &SqliteRow) -> Result<RoutingDecision> {
    let interaction_id: String = row.get("interaction_id");
    let candidates: String = row.get("candidates");
    let candidates: Vec<ScoredCandidate> = serde_json::from_str(&candidates).map_err(|e| {
        warn!(interaction_id = %interaction_id, error = %e, "Unreadable candidate list");
        Error::Storage(format!(
            "decision '{}' has an unreadable candidate list: {}",
            interaction_id, e
        ))
    })?;

    let score: f64 = row.get("score");
    let decided_at: DateTime<Utc> = row.get("decided_at");

    Ok(RoutingDecision {
        capability_key: row.get("capability_key"),
        persona_id: row.get("persona_id"),
        model_id: row.get("model_id"),
        score,
        breakdown: ScoreBreakdown {
            cost_rank: row.get::<i64, _>("cost_rank") as u32,
            latency_rank: row.get::<i64, _>("latency_rank") as u32,
            stability_component: row.get("stability_component"),
            cost_component: row.get("cost_component"),
            latency_component: row.get("latency_component"),
            score,
        },
        candidates,
        inputs_digest: row.get("inputs_digest"),
        timestamp: decided_at,
        interaction_id,
    })
}

fn denial_from_row(row: &SqliteRow) -> Result<CapabilityDenial> {
    let reason: String = row.get("reason");
    let reason = reason.parse::<DenialReason>().map_err(Error::Storage)?;
    let denied_at: DateTime<Utc> = row.get("denied_at");

    Ok(CapabilityDenial {
        interaction_id: row.get("interaction_id"),
        capability_key: row.get("capability_key"),
        persona_id: row.get("persona_id"),
        reason,
        timestamp: denied_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::scoring;
    use crate::storage::Database;
    use crate::catalog::Model;

    fn decision(interaction_id: &str, model_id: &str) -> RoutingDecision {
        let a = Model::new(model_id)
            .with_capabilities(["summarize_fast"])
            .with_cost(0.0002)
            .with_latency_ms(300)
            .with_stability(90);
        let candidates = scoring::rank_candidates(&[&a]);
        RoutingDecision {
            interaction_id: interaction_id.to_string(),
            capability_key: "summarize_fast".to_string(),
            persona_id: "p1".to_string(),
            model_id: model_id.to_string(),
            score: candidates[0].breakdown.score,
            breakdown: candidates[0].breakdown,
            inputs_digest: scoring::inputs_digest("summarize_fast", "p1", &candidates),
            candidates,
            timestamp: Utc::now(),
        }
    }

    async fn log() -> (Database, DecisionLog) {
        let db = Database::in_memory().await.unwrap();
        let log = DecisionLog::new(db.pool().clone());
        (db, log)
    }

    #[tokio::test]
    async fn test_record_and_get_decision() {
        let (_db, log) = log().await;
        let d = decision("i-1", "model-b");

        let recorded = log.record_decision(&d).await.unwrap();
        assert_eq!(recorded.model_id, "model-b");

        let fetched = log.get_decision("i-1").await.unwrap().unwrap();
        assert_eq!(fetched.model_id, d.model_id);
        assert_eq!(fetched.breakdown, d.breakdown);
        assert_eq!(fetched.candidates, d.candidates);
        assert_eq!(fetched.inputs_digest, d.inputs_digest);

        assert!(log.get_decision("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_first_decision_wins() {
        let (_db, log) = log().await;

        log.record_decision(&decision("i-1", "model-b")).await.unwrap();
        let second = log.record_decision(&decision("i-1", "model-a")).await.unwrap();

        assert_eq!(second.model_id, "model-b");
        assert_eq!(log.summary().await.unwrap().decisions, 1);
    }

    #[tokio::test]
    async fn test_log_rejects_update_and_delete() {
        let (db, log) = log().await;
        log.record_decision(&decision("i-1", "model-b")).await.unwrap();
        log.record_denial(&CapabilityDenial::new(
            "i-2",
            "reason_deep",
            "p1",
            DenialReason::InForbidden,
        ))
        .await
        .unwrap();

        let update = sqlx::query("UPDATE routing_decisions SET model_id = 'x'")
            .execute(db.pool())
            .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM capability_denials")
            .execute(db.pool())
            .await;
        assert!(delete.is_err());

        assert_eq!(log.get_decision("i-1").await.unwrap().unwrap().model_id, "model-b");
        assert!(log.get_denial("i-2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_denials_filter_and_summary() {
        let (_db, log) = log().await;

        for (id, cap, reason) in [
            ("d-1", "reason_deep", DenialReason::InForbidden),
            ("d-2", "translate_legal", DenialReason::CapabilityNotFound),
            ("d-3", "classify_cheap", DenialReason::NotInAllowed),
        ] {
            assert!(
                log.record_denial(&CapabilityDenial::new(id, cap, "p1", reason))
                    .await
                    .unwrap()
            );
        }
        assert!(
            !log.record_denial(&CapabilityDenial::new(
                "d-1",
                "reason_deep",
                "p1",
                DenialReason::InForbidden
            ))
            .await
            .unwrap()
        );

        let forbidden = log
            .list_denials(&DenialFilter::default().with_reason(DenialReason::InForbidden))
            .await
            .unwrap();
        assert_eq!(forbidden.len(), 1);
        assert_eq!(forbidden[0].interaction_id, "d-1");

        let limited = log
            .list_denials(&DenialFilter::default().for_persona("p1").limit(2))
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);

        let summary = log.summary().await.unwrap();
        assert_eq!(summary.denials, 3);
        assert_eq!(summary.denials_by_reason.get("IN_FORBIDDEN"), Some(&1));
    }

    #[tokio::test]
    async fn test_list_decisions_filtered() {
        let (_db, log) = log().await;
        log.record_decision(&decision("i-1", "model-a")).await.unwrap();
        log.record_decision(&decision("i-2", "model-b")).await.unwrap();
        log.record_decision(&decision("i-3", "model-b")).await.unwrap();

        let all = log.list_decisions(&DecisionFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let by_model = log
            .list_decisions(&DecisionFilter::default().for_model("model-b"))
            .await
            .unwrap();
        assert_eq!(by_model.len(), 2);

        let summary = log.summary().await.unwrap();
        assert_eq!(summary.decisions_by_model.get("model-b"), Some(&2));
        assert_eq!(summary.decisions_by_capability.get("summarize_fast"), Some(&3));
    }
}
