use anyhow::{Context, Result};
use pushaas_orchestrations::cms::{self, PgInstanceStore, PgJobQueue};
use pushaas_orchestrations::queue::{JobQueue, MemoryJobQueue};
use pushaas_orchestrations::store::{InstanceStore, MemoryInstanceStore};
use std::sync::Arc;

use crate::config::ServerConfig;

/// Instance store and job queue shared by the API and the workers
#[derive(Clone)]
pub struct Storage {
    pub store: Arc<dyn InstanceStore>,
    pub queue: Arc<dyn JobQueue>,
    postgres_queue: Option<PgJobQueue>,
}

impl Storage {
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryInstanceStore::new()),
            queue: Arc::new(MemoryJobQueue::new()),
            postgres_queue: None,
        }
    }

    pub fn is_shared(&self) -> bool {
        self.postgres_queue.is_some()
    }

    /// Put jobs claimed by a previous process back in the queue
    pub async fn recover_jobs(&self) -> Result<()> {
        if let Some(queue) = &self.postgres_queue {
            let requeued = queue
                .requeue_running()
                .await
                .context("Failed to requeue interrupted jobs")?;
            if requeued > 0 {
                tracing::warn!(requeued, "Requeued jobs interrupted by a previous run");
            }
        }
        Ok(())
    }
}

/// Postgres when DATABASE_URL is set, in-memory otherwise
pub async fn open(config: &ServerConfig) -> Result<Storage> {
    let Some(db_url) = &config.database_url else {
        tracing::warn!("DATABASE_URL not set, using in-memory store and queue");
        return Ok(Storage::in_memory());
    };

    let pool = cms::connect(db_url, 10)
        .await
        .context("Failed to connect to database")?;
    cms::initialize_schema(&pool)
        .await
        .context("Failed to initialize CMS schema")?;
    tracing::info!("✓ CMS schema ready");

    let queue = PgJobQueue::new(pool.clone());
    Ok(Storage {
        store: Arc::new(PgInstanceStore::new(pool)),
        queue: Arc::new(queue.clone()),
        postgres_queue: Some(queue),
    })
}
