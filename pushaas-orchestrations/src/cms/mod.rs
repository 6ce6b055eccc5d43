//! Postgres-backed instance store and job queue
//!
//! Everything lives in the `pushaas_cms` schema.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

mod instances;
mod jobs;

pub use instances::PgInstanceStore;
pub use jobs::PgJobQueue;

pub const SCHEMA: &str = "pushaas_cms";

const SCHEMA_STATEMENTS: [&str; 4] = [
    "CREATE SCHEMA IF NOT EXISTS pushaas_cms",
    r#"
    CREATE TABLE IF NOT EXISTS pushaas_cms.instances (
        name        TEXT PRIMARY KEY,
        plan        TEXT NOT NULL,
        team        TEXT NOT NULL DEFAULT '',
        user_name   TEXT NOT NULL DEFAULT '',
        status      TEXT NOT NULL,
        variables   JSONB NOT NULL DEFAULT '{}'::jsonb,
        bindings    JSONB NOT NULL DEFAULT '[]'::jsonb,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pushaas_cms.jobs (
        id          UUID PRIMARY KEY,
        kind        TEXT NOT NULL,
        payload     JSONB NOT NULL,
        state       TEXT NOT NULL DEFAULT 'pending',
        reason      TEXT,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_jobs_pending
        ON pushaas_cms.jobs (created_at)
        WHERE state = 'pending'
    "#,
];

pub async fn connect(db_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(db_url)
        .await
}

/// Create the schema and tables if they do not exist yet
pub async fn initialize_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA_STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!(schema = SCHEMA, "CMS schema ready");
    Ok(())
}
