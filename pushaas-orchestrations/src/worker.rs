//! Task queue worker
//!
//! Job handlers that turn queued provision and deprovision requests into
//! orchestrator runs and reconcile the results into the stored instance.
//! Every handler parses its payload before touching the store, so a
//! malformed job is rejected without mutating anything.

use async_trait::async_trait;
use pushaas_models::{CompletionEffect, CompletionPolicy, InstanceStatus};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{StoreError, WorkerError};
use crate::orchestrator::Orchestrator;
use crate::queue::{enqueue_json, JobHandler, JobKind, JobQueue};
use crate::store::InstanceStore;
use crate::types::{DeprovisionJob, OrchestrationOutcome, ProvisionJob, ProvisionOutcome};

/// Where a provision handler sends its outcome
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompletionRouting {
    /// Apply the outcome to the store directly
    #[default]
    Inline,
    /// Enqueue it as an update-instance job
    Queued,
}

impl FromStr for CompletionRouting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inline" => Ok(CompletionRouting::Inline),
            "queued" => Ok(CompletionRouting::Queued),
            other => Err(format!("unknown completion routing '{}'", other)),
        }
    }
}

/// Apply a provision outcome to the stored instance under `policy`
pub async fn apply_outcome(
    store: &dyn InstanceStore,
    outcome: &ProvisionOutcome,
    policy: CompletionPolicy,
) -> Result<CompletionEffect, WorkerError> {
    let mut instance = store.get(&outcome.instance_name).await?;
    let next = match outcome.status {
        OrchestrationOutcome::Success => InstanceStatus::Running,
        OrchestrationOutcome::Failure => InstanceStatus::Failed,
    };
    let previous = instance.status;

    let effect = instance.apply_completion(next, outcome.variables.clone(), policy)?;
    match effect {
        CompletionEffect::Ignored => {
            tracing::info!(
                instance = %instance.name,
                status = %previous,
                ignored = %next,
                "Instance already completed, ignoring outcome"
            );
            return Ok(effect);
        }
        CompletionEffect::Overwritten => {
            tracing::warn!(instance = %instance.name, from = %previous, to = %next, "Overwriting completed instance");
        }
        CompletionEffect::Applied => {
            tracing::info!(instance = %instance.name, from = %previous, to = %next, "Instance state transition");
        }
    }

    store.save(&instance).await?;
    Ok(effect)
}

// ============================================================================
// Provision
// ============================================================================

pub struct ProvisionHandler {
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn InstanceStore>,
    queue: Arc<dyn JobQueue>,
    routing: CompletionRouting,
    policy: CompletionPolicy,
}

impl ProvisionHandler {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        store: Arc<dyn InstanceStore>,
        queue: Arc<dyn JobQueue>,
        routing: CompletionRouting,
        policy: CompletionPolicy,
    ) -> Self {
        Self {
            orchestrator,
            store,
            queue,
            routing,
            policy,
        }
    }
}

#[async_trait]
impl JobHandler for ProvisionHandler {
    async fn handle(&self, payload: serde_json::Value) -> Result<(), WorkerError> {
        let job: ProvisionJob = serde_json::from_value(payload)?;
        let instance = self.store.get(&job.instance_name).await?;

        // redelivered job for a run that already completed
        if instance.status != InstanceStatus::Pending {
            tracing::info!(instance = %instance.name, status = %instance.status, "Instance not pending, skipping provision");
            return Ok(());
        }

        let result = self.orchestrator.provision(&instance).await;
        if let Some(e) = &result.error {
            tracing::error!(instance = %instance.name, error = %e, "Provision failed");
        }
        let outcome = ProvisionOutcome::from_result(&instance.name, &result);

        match self.routing {
            CompletionRouting::Inline => {
                apply_outcome(self.store.as_ref(), &outcome, self.policy).await?;
            }
            CompletionRouting::Queued => {
                let job_id = enqueue_json(self.queue.as_ref(), JobKind::UpdateInstance, &outcome).await?;
                tracing::debug!(instance = %instance.name, job_id = %job_id, "provision outcome queued");
            }
        }
        Ok(())
    }
}

// ============================================================================
// Update instance
// ============================================================================

pub struct UpdateInstanceHandler {
    store: Arc<dyn InstanceStore>,
    policy: CompletionPolicy,
}

impl UpdateInstanceHandler {
    pub fn new(store: Arc<dyn InstanceStore>, policy: CompletionPolicy) -> Self {
        Self { store, policy }
    }
}

#[async_trait]
impl JobHandler for UpdateInstanceHandler {
    async fn handle(&self, payload: serde_json::Value) -> Result<(), WorkerError> {
        let outcome: ProvisionOutcome = serde_json::from_value(payload)?;
        apply_outcome(self.store.as_ref(), &outcome, self.policy).await?;
        Ok(())
    }
}

// ============================================================================
// Deprovision
// ============================================================================

pub struct DeprovisionHandler {
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn InstanceStore>,
}

impl DeprovisionHandler {
    pub fn new(orchestrator: Arc<Orchestrator>, store: Arc<dyn InstanceStore>) -> Self {
        Self { orchestrator, store }
    }
}

#[async_trait]
impl JobHandler for DeprovisionHandler {
    async fn handle(&self, payload: serde_json::Value) -> Result<(), WorkerError> {
        let job: DeprovisionJob = serde_json::from_value(payload)?;
        let instance = match self.store.get(&job.instance_name).await {
            Ok(instance) => instance,
            Err(StoreError::NotFound(_)) => {
                tracing::info!(instance = %job.instance_name, "Instance record already gone, nothing to deprovision");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let result = self.orchestrator.deprovision(&instance).await;
        if let Some(e) = result.error {
            tracing::error!(instance = %instance.name, status = %instance.status, error = %e, "Deprovision failed, keeping instance record");
            return Err(WorkerError::Orchestration(e));
        }

        match self.store.delete(&instance.name).await {
            Ok(()) | Err(StoreError::NotFound(_)) => {
                tracing::info!(instance = %instance.name, "Instance deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
