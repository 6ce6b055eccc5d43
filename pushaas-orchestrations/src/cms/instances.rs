use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pushaas_models::{AppBinding, Instance, InstanceStatus};
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::store::InstanceStore;

#[derive(Debug, sqlx::FromRow)]
struct InstanceRow {
    name: String,
    plan: String,
    team: String,
    user_name: String,
    status: String,
    variables: Json<BTreeMap<String, String>>,
    bindings: Json<Vec<AppBinding>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<InstanceRow> for Instance {
    type Error = StoreError;

    fn try_from(row: InstanceRow) -> Result<Self, Self::Error> {
        let status: InstanceStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("instance '{}': {}", row.name, e)))?;
        Ok(Instance {
            name: row.name,
            plan: row.plan,
            team: row.team,
            user: row.user_name,
            status,
            variables: row.variables.0,
            bindings: row.bindings.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_INSTANCE: &str = r#"
    SELECT name, plan, team, user_name, status, variables, bindings, created_at, updated_at
    FROM pushaas_cms.instances
"#;

#[derive(Debug, Clone)]
pub struct PgInstanceStore {
    pool: PgPool,
}

impl PgInstanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InstanceStore for PgInstanceStore {
    async fn get(&self, name: &str) -> Result<Instance, StoreError> {
        let row = sqlx::query_as::<_, InstanceRow>(&format!("{} WHERE name = $1", SELECT_INSTANCE))
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| StoreError::NotFound(name.to_string()))?
            .try_into()
    }

    async fn insert(&self, instance: &Instance) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO pushaas_cms.instances
            (name, plan, team, user_name, status, variables, bindings, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(&instance.name)
        .bind(&instance.plan)
        .bind(&instance.team)
        .bind(&instance.user)
        .bind(instance.status.as_str())
        .bind(Json(&instance.variables))
        .bind(Json(&instance.bindings))
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(instance.name.clone()));
        }
        Ok(())
    }

    async fn save(&self, instance: &Instance) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let previous: Option<(String,)> = sqlx::query_as(
            "SELECT status FROM pushaas_cms.instances WHERE name = $1 FOR UPDATE",
        )
        .bind(&instance.name)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO pushaas_cms.instances
            (name, plan, team, user_name, status, variables, bindings, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            ON CONFLICT (name) DO UPDATE
            SET plan = EXCLUDED.plan,
                team = EXCLUDED.team,
                user_name = EXCLUDED.user_name,
                status = EXCLUDED.status,
                variables = EXCLUDED.variables,
                bindings = EXCLUDED.bindings,
                updated_at = NOW()
            "#,
        )
        .bind(&instance.name)
        .bind(&instance.plan)
        .bind(&instance.team)
        .bind(&instance.user)
        .bind(instance.status.as_str())
        .bind(Json(&instance.variables))
        .bind(Json(&instance.bindings))
        .bind(instance.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if let Some((previous,)) = previous {
            if previous != instance.status.as_str() {
                tracing::debug!(instance = %instance.name, from = %previous, to = %instance.status, "stored status changed");
            }
        }
        Ok(())
    }

    async fn save_bindings(&self, name: &str, bindings: &[AppBinding]) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE pushaas_cms.instances SET bindings = $2, updated_at = NOW() WHERE name = $1",
        )
        .bind(name)
        .bind(Json(bindings))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(name.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM pushaas_cms.instances WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(name.to_string()));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Instance>, StoreError> {
        let rows = sqlx::query_as::<_, InstanceRow>(&format!("{} ORDER BY name", SELECT_INSTANCE))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Instance::try_from).collect()
    }
}
