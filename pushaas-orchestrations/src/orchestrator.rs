//! Provisioning orchestrator
//!
//! Drives the three stage provisioners for one instance. Provision runs
//! Cache, Stream, Api; Deprovision runs Api, Stream, Cache. Each stage call
//! is spawned on its own task and its result collected through a oneshot
//! channel before the next stage starts.

use pushaas_models::Instance;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, OwnedMutexGuard};

use crate::backend::CloudBackend;
use crate::config::{ProvisionerConfig, RollbackPolicy};
use crate::error::{ConfigError, OrchestrationError, StageError};
use crate::stages::{ApiStage, CacheStage, StageContext, StageProvisioner, StreamStage};
use crate::types::{
    OrchestrationOutcome, OrchestrationResult, Phase, PriorStageOutputs, StageResult, Tier,
};

/// Serializes orchestration runs per instance name
#[derive(Default)]
pub struct InstanceLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl InstanceLocks {
    pub async fn acquire(&self, instance_name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            // drop entries nobody holds or waits for
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(instance_name.to_string())
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Clone, Copy)]
enum StageOp {
    Provision,
    Deprovision,
    RollBack,
}

pub struct Orchestrator {
    backend: Arc<dyn CloudBackend>,
    cache: Arc<dyn StageProvisioner>,
    stream: Arc<dyn StageProvisioner>,
    api: Arc<dyn StageProvisioner>,
    execution_role: String,
    rollback: RollbackPolicy,
    locks: InstanceLocks,
}

impl Orchestrator {
    /// Build the orchestrator with the standard stage provisioners.
    ///
    /// Fails if the static configuration is incomplete.
    pub fn new(backend: Arc<dyn CloudBackend>, config: ProvisionerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let execution_role = config.execution_role.clone();
        let rollback = config.rollback;
        let context = StageContext::new(backend.clone(), Arc::new(config));

        Ok(Self::with_stages(
            backend,
            Arc::new(CacheStage::new(context.clone())),
            Arc::new(StreamStage::new(context.clone())),
            Arc::new(ApiStage::new(context)),
            execution_role,
            rollback,
        ))
    }

    pub fn with_stages(
        backend: Arc<dyn CloudBackend>,
        cache: Arc<dyn StageProvisioner>,
        stream: Arc<dyn StageProvisioner>,
        api: Arc<dyn StageProvisioner>,
        execution_role: impl Into<String>,
        rollback: RollbackPolicy,
    ) -> Self {
        Self {
            backend,
            cache,
            stream,
            api,
            execution_role: execution_role.into(),
            rollback,
            locks: InstanceLocks::default(),
        }
    }

    fn stage(&self, tier: Tier) -> Arc<dyn StageProvisioner> {
        match tier {
            Tier::Cache => self.cache.clone(),
            Tier::Stream => self.stream.clone(),
            Tier::Api => self.api.clone(),
        }
    }

    /// Run one stage operation on its own task and wait for its single result
    async fn run_stage(
        &self,
        tier: Tier,
        op: StageOp,
        instance: &Instance,
        prior: &PriorStageOutputs,
    ) -> Result<StageResult, StageError> {
        let stage = self.stage(tier);
        let instance = instance.clone();
        let prior = prior.clone();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let result = match op {
                StageOp::Provision => stage.provision(&instance, &prior).await,
                StageOp::Deprovision => stage.deprovision(&instance).await,
                StageOp::RollBack => stage.roll_back(&instance).await,
            };
            // the receiver only goes away if the orchestrator itself was dropped
            let _ = tx.send(result);
        });

        rx.await.unwrap_or(Err(StageError::Aborted))
    }

    pub async fn provision(&self, instance: &Instance) -> OrchestrationResult {
        let _guard = self.locks.acquire(&instance.name).await;
        tracing::info!(instance = %instance.name, "Provisioning push service");

        tracing::info!(instance = %instance.name, role = %self.execution_role, "Step 1: Resolving execution role");
        let role = match self.backend.get_execution_role(&self.execution_role).await {
            Ok(role) => role,
            Err(e) => {
                tracing::error!(instance = %instance.name, error = %e, "Failed to resolve execution role");
                return failure(Vec::new(), None, OrchestrationError::RoleResolution(e));
            }
        };
        tracing::debug!(instance = %instance.name, phase = ?Phase::RoleResolved, "phase reached");

        let mut prior = PriorStageOutputs {
            role: Some(role),
            stream_endpoint: None,
        };
        let mut completed: Vec<StageResult> = Vec::new();

        for (step, tier) in Tier::PROVISION_ORDER.into_iter().enumerate() {
            tracing::info!(instance = %instance.name, tier = %tier, "Step {}: Provisioning {}", step + 2, tier);

            match self.run_stage(tier, StageOp::Provision, instance, &prior).await {
                Ok(result) => {
                    if tier == Tier::Stream {
                        prior.stream_endpoint = result.public_endpoint.clone();
                    }
                    completed.push(result);
                    tracing::debug!(instance = %instance.name, phase = ?Phase::after(tier), "phase reached");
                }
                Err(e) => {
                    tracing::error!(instance = %instance.name, tier = %tier, error = %e, "Stage failed, aborting provision");
                    if self.rollback == RollbackPolicy::Teardown {
                        self.roll_back(instance, &completed, tier).await;
                    }
                    return failure(completed, Some(tier), OrchestrationError::Stage { tier, source: e });
                }
            }
        }

        tracing::info!(instance = %instance.name, "Push service provisioned");
        success(completed)
    }

    pub async fn deprovision(&self, instance: &Instance) -> OrchestrationResult {
        let _guard = self.locks.acquire(&instance.name).await;
        tracing::info!(instance = %instance.name, "Deprovisioning push service");

        let mut completed: Vec<StageResult> = Vec::new();
        for (step, tier) in Tier::DEPROVISION_ORDER.into_iter().enumerate() {
            tracing::info!(instance = %instance.name, tier = %tier, "Step {}: Tearing down {}", step + 1, tier);

            match self
                .run_stage(tier, StageOp::Deprovision, instance, &PriorStageOutputs::default())
                .await
            {
                Ok(result) => {
                    tracing::debug!(instance = %instance.name, tier = %tier, outcome = ?result.outcome, "stage torn down");
                    completed.push(result);
                }
                Err(e) => {
                    tracing::error!(instance = %instance.name, tier = %tier, error = %e, "Stage teardown failed, aborting deprovision");
                    return failure(completed, Some(tier), OrchestrationError::Stage { tier, source: e });
                }
            }
        }

        tracing::info!(instance = %instance.name, "Push service deprovisioned");
        success(completed)
    }

    /// Best-effort teardown of the failed stage and every stage before it
    async fn roll_back(&self, instance: &Instance, completed: &[StageResult], failed: Tier) {
        let tiers = completed
            .iter()
            .map(|r| r.tier)
            .chain(std::iter::once(failed))
            .rev();

        for tier in tiers {
            tracing::info!(instance = %instance.name, tier = %tier, "Rolling back {}", tier);
            if let Err(e) = self
                .run_stage(tier, StageOp::RollBack, instance, &PriorStageOutputs::default())
                .await
            {
                tracing::warn!(instance = %instance.name, tier = %tier, error = %e, "Rollback failed");
            }
        }
    }
}

fn collect_variables(stages: &[StageResult]) -> BTreeMap<String, String> {
    stages
        .iter()
        .flat_map(|s| s.variables.iter().map(|(k, v)| (k.clone(), v.clone())))
        .collect()
}

fn success(stages: Vec<StageResult>) -> OrchestrationResult {
    OrchestrationResult {
        outcome: OrchestrationOutcome::Success,
        phase: Phase::Success,
        variables: collect_variables(&stages),
        stages,
        failed_stage: None,
        error: None,
    }
}

fn failure(
    stages: Vec<StageResult>,
    failed_stage: Option<Tier>,
    error: OrchestrationError,
) -> OrchestrationResult {
    OrchestrationResult {
        outcome: OrchestrationOutcome::Failure,
        phase: Phase::Failed,
        variables: BTreeMap::new(),
        stages,
        failed_stage,
        error: Some(error),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::error::BackendError;
    use crate::stages::test_support::instance;
    use crate::types::StageOutcome;
    use std::time::Duration;

    fn stages(calls: &CallLog) -> [RecordingStage; 3] {
        [
            RecordingStage::new(Tier::Cache, calls.clone()),
            RecordingStage::new(Tier::Stream, calls.clone()),
            RecordingStage::new(Tier::Api, calls.clone()),
        ]
    }

    fn entries(calls: &CallLog, prefix: &str) -> Vec<String> {
        calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    #[tokio::test]
    async fn test_provision_runs_stages_in_order_and_collects_variables() {
        let calls = CallLog::default();
        let orchestrator =
            orchestrator_with(Arc::new(MemoryBackend::new("ns")), stages(&calls), RollbackPolicy::Leave);

        let result = orchestrator.provision(&instance("acme")).await;

        assert!(result.is_success());
        assert_eq!(result.phase, Phase::Success);
        assert_eq!(
            entries(&calls, "provision "),
            vec![
                "provision push-redis acme",
                "provision push-stream acme",
                "provision push-api acme"
            ]
        );
        assert_eq!(
            entries(&calls, "api saw"),
            vec![r#"api saw stream endpoint Some("203.0.113.9")"#]
        );
        assert_eq!(result.stages.len(), 3);
        assert_eq!(
            result.variables.get("PUSHAAS_ENDPOINT").map(String::as_str),
            Some("http://api:8080")
        );
    }

    #[tokio::test]
    async fn test_provision_aborts_at_first_failing_stage() {
        let calls = CallLog::default();
        let mut stages = stages(&calls);
        stages[0].fail_provision = Some(backend_failure());
        let orchestrator =
            orchestrator_with(Arc::new(MemoryBackend::new("ns")), stages, RollbackPolicy::Leave);

        let result = orchestrator.provision(&instance("acme")).await;

        assert_eq!(result.outcome, OrchestrationOutcome::Failure);
        assert_eq!(result.phase, Phase::Failed);
        assert_eq!(result.failed_stage, Some(Tier::Cache));
        assert_eq!(entries(&calls, "provision "), vec!["provision push-redis acme"]);
        assert!(entries(&calls, "deprovision").is_empty());
        assert!(result.variables.is_empty());
    }

    #[tokio::test]
    async fn test_role_resolution_failure_runs_no_stage() {
        let calls = CallLog::default();
        let backend = Arc::new(MemoryBackend::new("ns"));
        backend.inject_failure(
            "get_execution_role",
            "ecsTaskExecutionRole",
            BackendError::not_found("role", "ecsTaskExecutionRole"),
        );
        let orchestrator = orchestrator_with(backend, stages(&calls), RollbackPolicy::Teardown);

        let result = orchestrator.provision(&instance("acme")).await;

        assert!(matches!(result.error, Some(OrchestrationError::RoleResolution(_))));
        assert_eq!(result.failed_stage, None);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_leave_policy_does_not_roll_back() {
        let calls = CallLog::default();
        let mut stages = stages(&calls);
        stages[2].fail_provision = Some(backend_failure());
        let orchestrator =
            orchestrator_with(Arc::new(MemoryBackend::new("ns")), stages, RollbackPolicy::Leave);

        let result = orchestrator.provision(&instance("acme")).await;

        assert_eq!(result.failed_stage, Some(Tier::Api));
        assert_eq!(result.stages.len(), 2);
        assert!(entries(&calls, "deprovision").is_empty());
    }

    #[tokio::test]
    async fn test_teardown_policy_rolls_back_in_reverse_order() {
        let calls = CallLog::default();
        let mut stages = stages(&calls);
        stages[2].fail_provision = Some(backend_failure());
        let orchestrator =
            orchestrator_with(Arc::new(MemoryBackend::new("ns")), stages, RollbackPolicy::Teardown);

        let result = orchestrator.provision(&instance("acme")).await;

        assert!(!result.is_success());
        assert_eq!(
            entries(&calls, "deprovision"),
            vec![
                "deprovision push-api acme",
                "deprovision push-stream acme",
                "deprovision push-redis acme"
            ]
        );
    }

    #[tokio::test]
    async fn test_deprovision_order_is_api_stream_cache() {
        let calls = CallLog::default();
        let orchestrator =
            orchestrator_with(Arc::new(MemoryBackend::new("ns")), stages(&calls), RollbackPolicy::Leave);

        let result = orchestrator.deprovision(&instance("acme")).await;

        assert!(result.is_success());
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "deprovision push-api acme",
                "deprovision push-stream acme",
                "deprovision push-redis acme"
            ]
        );
    }

    #[tokio::test]
    async fn test_deprovision_nothing_to_do_is_success() {
        let calls = CallLog::default();
        let mut stages = stages(&calls);
        stages[2].nothing_to_deprovision = true;
        let orchestrator =
            orchestrator_with(Arc::new(MemoryBackend::new("ns")), stages, RollbackPolicy::Leave);

        let result = orchestrator.deprovision(&instance("acme")).await;

        assert!(result.is_success());
        assert_eq!(result.stage(Tier::Api).unwrap().outcome, StageOutcome::NothingToDo);
        assert_eq!(result.stage(Tier::Cache).unwrap().outcome, StageOutcome::TornDown);
    }

    #[tokio::test]
    async fn test_deprovision_failure_stops_remaining_teardown() {
        let calls = CallLog::default();
        let mut stages = stages(&calls);
        stages[1].fail_deprovision = Some(backend_failure());
        let orchestrator =
            orchestrator_with(Arc::new(MemoryBackend::new("ns")), stages, RollbackPolicy::Leave);

        let result = orchestrator.deprovision(&instance("acme")).await;

        assert_eq!(result.failed_stage, Some(Tier::Stream));
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["deprovision push-api acme", "deprovision push-stream acme"]
        );
    }

    #[tokio::test]
    async fn test_crashed_stage_is_reported_as_aborted() {
        let calls = CallLog::default();
        let mut stages = stages(&calls);
        stages[0].panic_on_provision = true;
        let orchestrator =
            orchestrator_with(Arc::new(MemoryBackend::new("ns")), stages, RollbackPolicy::Leave);

        let result = orchestrator.provision(&instance("acme")).await;

        assert!(matches!(
            result.error,
            Some(OrchestrationError::Stage {
                tier: Tier::Cache,
                source: StageError::Aborted
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_for_same_instance_are_serialized() {
        let calls = CallLog::default();
        let mut stages = stages(&calls);
        for stage in stages.iter_mut() {
            stage.delay = Duration::from_secs(1);
        }
        let orchestrator = Arc::new(orchestrator_with(
            Arc::new(MemoryBackend::new("ns")),
            stages,
            RollbackPolicy::Leave,
        ));

        let first = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.provision(&instance("acme")).await }
        });
        let second = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.deprovision(&instance("acme")).await }
        });
        assert!(first.await.unwrap().is_success());
        assert!(second.await.unwrap().is_success());

        // one run's entries never interleave with the other's
        let log = calls.lock().unwrap().clone();
        let is_teardown: Vec<bool> = log.iter().map(|c| c.starts_with("deprovision")).collect();
        let switches = is_teardown.windows(2).filter(|w| w[0] != w[1]).count();
        assert_eq!(switches, 1, "{:?}", log);
    }
}
