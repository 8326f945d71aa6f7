//! Database migrations
//!
//! This module manages SQLite schema migrations for the router.
//! Migrations are versioned and applied automatically on database connection.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 2;

/// SQL for creating the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: Reference data (capabilities, models, persona policies)
const MIGRATION_V1: &str = r#"
    -- Capability registry
    CREATE TABLE IF NOT EXISTS capabilities (
        capability_key TEXT PRIMARY KEY NOT NULL,
        latency_class TEXT NOT NULL CHECK (latency_class IN ('low', 'medium', 'high')),
        risk_class TEXT NOT NULL CHECK (risk_class IN ('low', 'medium', 'high')),
        replay_tolerance TEXT NOT NULL CHECK (replay_tolerance IN ('strict', 'relaxed')),
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    -- Capability keys never change once written
    CREATE TRIGGER IF NOT EXISTS capabilities_key_immutable
    BEFORE UPDATE OF capability_key ON capabilities
    WHEN NEW.capability_key <> OLD.capability_key
    BEGIN
        SELECT RAISE(ABORT, 'capability_key is immutable');
    END;

    -- Model registry
    CREATE TABLE IF NOT EXISTS models (
        model_id TEXT PRIMARY KEY NOT NULL,
        model_slug TEXT NOT NULL,
        cost_per_call REAL NOT NULL CHECK (cost_per_call >= 0.0),
        avg_latency_ms INTEGER NOT NULL CHECK (avg_latency_ms >= 0),
        stability_score INTEGER NOT NULL CHECK (stability_score BETWEEN 0 AND 100),
        is_eligible INTEGER NOT NULL DEFAULT 1,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    -- Retirement is one-way
    CREATE TRIGGER IF NOT EXISTS models_retirement_final
    BEFORE UPDATE OF is_active ON models
    WHEN OLD.is_active = 0 AND NEW.is_active = 1
    BEGIN
        SELECT RAISE(ABORT, 'retired models cannot be reactivated');
    END;

    CREATE TABLE IF NOT EXISTS model_capabilities (
        model_id TEXT NOT NULL REFERENCES models(model_id) ON DELETE CASCADE,
        capability_key TEXT NOT NULL REFERENCES capabilities(capability_key),
        PRIMARY KEY (model_id, capability_key)
    );

    CREATE INDEX IF NOT EXISTS idx_model_capabilities_key ON model_capabilities(capability_key);

    -- Persona policy store
    CREATE TABLE IF NOT EXISTS persona_policies (
        persona_id TEXT PRIMARY KEY NOT NULL,
        max_cost_per_call REAL NOT NULL CHECK (max_cost_per_call >= 0.0),
        max_latency_ms INTEGER NOT NULL CHECK (max_latency_ms >= 0),
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS persona_policy_capabilities (
        persona_id TEXT NOT NULL REFERENCES persona_policies(persona_id) ON DELETE CASCADE,
        capability_key TEXT NOT NULL REFERENCES capabilities(capability_key),
        access TEXT NOT NULL CHECK (access IN ('allowed', 'forbidden')),
        PRIMARY KEY (persona_id, capability_key, access)
    );
"#;

/// Migration 2: Append-only decision and denial logs
const MIGRATION_V2: &str = r#"
    CREATE TABLE IF NOT EXISTS routing_decisions (
        interaction_id TEXT PRIMARY KEY NOT NULL,
        capability_key TEXT NOT NULL,
        persona_id TEXT NOT NULL,
        model_id TEXT NOT NULL,
        score REAL NOT NULL,
        stability_component REAL NOT NULL,
        cost_component REAL NOT NULL,
        latency_component REAL NOT NULL,
        cost_rank INTEGER NOT NULL,
        latency_rank INTEGER NOT NULL,
        candidates TEXT NOT NULL,
        inputs_digest TEXT NOT NULL,
        decided_at TIMESTAMP NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_routing_decisions_capability ON routing_decisions(capability_key);
    CREATE INDEX IF NOT EXISTS idx_routing_decisions_persona ON routing_decisions(persona_id);
    CREATE INDEX IF NOT EXISTS idx_routing_decisions_model ON routing_decisions(model_id);
    CREATE INDEX IF NOT EXISTS idx_routing_decisions_decided_at ON routing_decisions(decided_at);

    CREATE TRIGGER IF NOT EXISTS routing_decisions_no_update
    BEFORE UPDATE ON routing_decisions
    BEGIN
        SELECT RAISE(ABORT, 'routing_decisions is append-only');
    END;

    CREATE TRIGGER IF NOT EXISTS routing_decisions_no_delete
    BEFORE DELETE ON routing_decisions
    BEGIN
        SELECT RAISE(ABORT, 'routing_decisions is append-only');
    END;

    CREATE TABLE IF NOT EXISTS capability_denials (
        interaction_id TEXT PRIMARY KEY NOT NULL,
        capability_key TEXT NOT NULL,
        persona_id TEXT NOT NULL,
        reason TEXT NOT NULL CHECK (reason IN ('CAPABILITY_NOT_FOUND', 'IN_FORBIDDEN', 'NOT_IN_ALLOWED')),
        denied_at TIMESTAMP NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_capability_denials_capability ON capability_denials(capability_key);
    CREATE INDEX IF NOT EXISTS idx_capability_denials_persona ON capability_denials(persona_id);
    CREATE INDEX IF NOT EXISTS idx_capability_denials_reason ON capability_denials(reason);

    CREATE TRIGGER IF NOT EXISTS capability_denials_no_update
    BEFORE UPDATE ON capability_denials
    BEGIN
        SELECT RAISE(ABORT, 'capability_denials is append-only');
    END;

    CREATE TRIGGER IF NOT EXISTS capability_denials_no_delete
    BEFORE DELETE ON capability_denials
    BEGIN
        SELECT RAISE(ABORT, 'capability_denials is append-only');
    END;
"#;

/// Get the current schema version from the database
async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    // Ensure migrations table exists
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    let row: Option<(Option<i32>,)> = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_optional(pool)
        .await?;

    Ok(row.and_then(|(v,)| v).unwrap_or(0))
}

/// Record that a migration has been applied
async fn record_migration(pool: &SqlitePool, version: i32) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let current_version = get_current_version(pool).await?;

    tracing::info!(
        current_version = current_version,
        target_version = CURRENT_VERSION,
        "Checking database migrations"
    );

    if current_version >= CURRENT_VERSION {
        tracing::debug!("Database is up to date");
        return Ok(());
    }

    if current_version < 1 {
        tracing::info!("Applying migration v1: Capability, model, and policy registries");
        sqlx::raw_sql(MIGRATION_V1).execute(pool).await?;
        record_migration(pool, 1).await?;
    }

    if current_version < 2 {
        tracing::info!("Applying migration v2: Append-only decision and denial logs");
        sqlx::raw_sql(MIGRATION_V2).execute(pool).await?;
        record_migration(pool, 2).await?;
    }

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Get migration status information
pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = get_current_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Current schema version in the database
    pub current_version: i32,
    /// Target schema version (latest)
    pub target_version: i32,
    /// Whether migrations need to be run
    pub needs_migration: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool")
    }

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = create_test_pool().await;

        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, 0);
        assert!(status.needs_migration);

        run_migrations(&pool).await.unwrap();

        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, CURRENT_VERSION);
        assert!(!status.needs_migration);
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let pool = create_test_pool().await;

        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, CURRENT_VERSION);
    }

    #[tokio::test]
    async fn test_tables_created() {
        let pool = create_test_pool().await;
        run_migrations(&pool).await.unwrap();

        let tables = [
            "capabilities",
            "models",
            "model_capabilities",
            "persona_policies",
            "persona_policy_capabilities",
            "routing_decisions",
            "capability_denials",
        ];

        for table in tables {
            let result: (i32,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&pool)
                .await
                .unwrap_or_else(|_| panic!("Table {} should exist", table));
            assert_eq!(result.0, 0, "Table {} should be empty", table);
        }
    }

    #[tokio::test]
    async fn test_decision_log_rejects_updates_and_deletes() {
        let pool = create_test_pool().await;
        run_migrations(&pool).await.unwrap();

        sqlx::query(
            r#"
            INSERT INTO routing_decisions (
                interaction_id, capability_key, persona_id, model_id, score,
                stability_component, cost_component, latency_component,
                cost_rank, latency_rank, candidates, inputs_digest, decided_at
            ) VALUES ('i-1', 'summarize_fast', 'p1', 'm-a', 90.0, 45.0, 27.0, 18.0, 1, 1, '[]', 'x', CURRENT_TIMESTAMP)
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let update = sqlx::query("UPDATE routing_decisions SET model_id = 'm-b'")
            .execute(&pool)
            .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM routing_decisions")
            .execute(&pool)
            .await;
        assert!(delete.is_err());
    }

    #[tokio::test]
    async fn test_retired_model_cannot_be_reactivated() {
        let pool = create_test_pool().await;
        run_migrations(&pool).await.unwrap();

        sqlx::query(
            "INSERT INTO models (model_id, model_slug, cost_per_call, avg_latency_ms, stability_score, is_active) VALUES ('m', 'm', 0.1, 10, 50, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let revive = sqlx::query("UPDATE models SET is_active = 1 WHERE model_id = 'm'")
            .execute(&pool)
            .await;
        assert!(revive.is_err());
    }
}
