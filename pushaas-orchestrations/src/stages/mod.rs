//! Stage provisioners, one per tier
//!
//! Every stage creates the same resource triple (discovery registration,
//! task definition, running service) and tears it down in the same order.
//! The tiers only differ in the containers they define and in what they
//! hand to later stages.

use async_trait::async_trait;
use pushaas_models::Instance;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::{
    CloudBackend, ContainerDefinition, ContainerDependency, DiscoveryServiceSpec, LogConfiguration,
    ServiceSpec, TaskDefinition,
};
use crate::config::ProvisionerConfig;
use crate::error::{BackendError, StageError};
use crate::readiness::wait_until;
use crate::types::{PriorStageOutputs, StageOutcome, StageResources, StageResult, Tier};

pub mod api;
pub mod cache;
pub mod stream;

pub use api::ApiStage;
pub use cache::CacheStage;
pub use stream::StreamStage;

pub const REDIS_PORT: u16 = 6379;
pub const STREAM_PORT: u16 = 9080;
pub const API_PORT: u16 = 8080;

/// Creates and destroys the cloud resources of one tier
#[async_trait]
pub trait StageProvisioner: Send + Sync {
    fn tier(&self) -> Tier;

    /// Create the tier and block until its service has a running task.
    ///
    /// Resources created before a failing step are left in place.
    async fn provision(
        &self,
        instance: &Instance,
        prior: &PriorStageOutputs,
    ) -> Result<StageResult, StageError>;

    /// Tear the tier down; a missing service is reported as nothing to do
    async fn deprovision(&self, instance: &Instance) -> Result<StageResult, StageError>;

    /// Undo a provision that may have stopped before its service existed
    async fn roll_back(&self, instance: &Instance) -> Result<StageResult, StageError> {
        self.deprovision(instance).await
    }
}

/// Backend and configuration shared by the three stages
#[derive(Clone)]
pub struct StageContext {
    pub backend: Arc<dyn CloudBackend>,
    pub config: Arc<ProvisionerConfig>,
}

impl StageContext {
    pub fn new(backend: Arc<dyn CloudBackend>, config: Arc<ProvisionerConfig>) -> Self {
        Self { backend, config }
    }

    /// Address under which another tier of the same instance is reachable
    pub fn host_of(&self, tier: Tier, instance: &Instance) -> String {
        self.backend.discovery_host(&tier.resource_name(&instance.name))
    }

    pub(crate) fn container(
        &self,
        name: &str,
        image: &str,
        ports: &[u16],
        environment: BTreeMap<String, String>,
    ) -> ContainerDefinition {
        ContainerDefinition {
            name: name.to_string(),
            image: image.to_string(),
            essential: true,
            ports: ports.to_vec(),
            environment,
            depends_on: Vec::new(),
            log: LogConfiguration {
                region: self.config.logs.region.clone(),
                group: self.config.logs.group.clone(),
                stream_prefix: self.config.logs.stream_prefix.clone(),
            },
        }
    }

    pub(crate) fn task_definition(
        &self,
        tier: Tier,
        instance: &Instance,
        prior: &PriorStageOutputs,
        (cpu, memory): (u32, u32),
        containers: Vec<ContainerDefinition>,
    ) -> Result<TaskDefinition, StageError> {
        let role = prior
            .role
            .as_ref()
            .ok_or_else(|| StageError::MissingDependency("execution role".to_string()))?;
        Ok(TaskDefinition {
            family: tier.resource_name(&instance.name),
            cpu,
            memory,
            execution_role_arn: role.arn.clone(),
            containers,
        })
    }

    /// Discovery registration, task definition and service, then wait for a running task
    pub(crate) async fn create_tier(
        &self,
        tier: Tier,
        instance: &Instance,
        definition: TaskDefinition,
    ) -> Result<StageResources, StageError> {
        let name = tier.resource_name(&instance.name);

        let discovery = self
            .backend
            .create_discovery_service(&DiscoveryServiceSpec::new(&name, &self.config.dns_namespace))
            .await
            .map_err(StageError::backend("create service discovery"))?;
        tracing::debug!(tier = %tier, instance = %instance.name, "did create service discovery");

        let task_definition = self
            .backend
            .register_task_definition(&definition)
            .await
            .map_err(StageError::backend("register task definition"))?;
        tracing::debug!(tier = %tier, instance = %instance.name, revision = task_definition.revision, "did register task definition");

        let service = self
            .backend
            .create_service(&ServiceSpec {
                name: name.clone(),
                cluster: self.config.cluster.clone(),
                task_definition_arn: task_definition.arn.clone(),
                desired_count: 1,
                discovery_service_arn: discovery.arn.clone(),
                security_group: self.config.security_group.clone(),
                subnet: self.config.subnet.clone(),
                assign_public_ip: tier.has_public_ip(),
            })
            .await
            .map_err(StageError::backend("create service"))?;
        tracing::debug!(tier = %tier, instance = %instance.name, "did create service");

        self.wait_service_up(&name).await?;
        tracing::debug!(tier = %tier, instance = %instance.name, "service is up");

        Ok(StageResources {
            discovery_service_id: Some(discovery.id),
            task_definition_arn: Some(task_definition.arn),
            service_name: Some(service.name),
        })
    }

    async fn wait_service_up(&self, name: &str) -> Result<(), StageError> {
        let backend = &*self.backend;
        let what = format!("{} to have a running task", name);
        let up = wait_until(&what, self.config.readiness, move |_| async move {
            Ok::<_, BackendError>(backend.describe_service(name).await?.is_some_and(|s| s.is_up()))
        })
        .await;
        up.then_some(()).ok_or(StageError::ReadinessTimeout { condition: what })
    }

    async fn wait_tasks_stopped(&self, name: &str) -> Result<(), StageError> {
        let backend = &*self.backend;
        let what = format!("{} to stop all tasks", name);
        let stopped = wait_until(&what, self.config.readiness, move |_| async move {
            Ok::<_, BackendError>(
                backend
                    .describe_service(name)
                    .await?
                    .map_or(true, |s| s.running_count == 0),
            )
        })
        .await;
        stopped.then_some(()).ok_or(StageError::ReadinessTimeout { condition: what })
    }

    async fn wait_service_down(&self, name: &str) -> Result<(), StageError> {
        let backend = &*self.backend;
        let what = format!("{} to go down", name);
        let down = wait_until(&what, self.config.readiness, move |_| async move {
            Ok::<_, BackendError>(
                backend
                    .describe_service(name)
                    .await?
                    .map_or(true, |s| s.status == crate::backend::ServiceStatus::Inactive),
            )
        })
        .await;
        down.then_some(()).ok_or(StageError::ReadinessTimeout { condition: what })
    }

    /// Scale to zero, delete the service, then its discovery registration and task definition
    pub(crate) async fn destroy_tier(
        &self,
        tier: Tier,
        instance: &Instance,
    ) -> Result<StageResult, StageError> {
        let name = tier.resource_name(&instance.name);

        let described = self
            .backend
            .describe_service(&name)
            .await
            .map_err(StageError::backend("describe service"))?;
        let service = match described {
            Some(service) if service.status != crate::backend::ServiceStatus::Inactive => service,
            _ => {
                tracing::info!(tier = %tier, instance = %instance.name, "no service found, nothing to do");
                return Ok(StageResult::nothing_to_do(tier));
            }
        };
        tracing::debug!(tier = %tier, instance = %instance.name, "did locate service");

        benign_if_missing(
            self.backend.scale_service(&name, 0).await,
            "scale service to zero",
        )?;
        tracing::debug!(tier = %tier, instance = %instance.name, "did update service to desired count 0");

        self.wait_tasks_stopped(&name).await?;
        tracing::debug!(tier = %tier, instance = %instance.name, "all tasks stopped");

        benign_if_missing(self.backend.delete_service(&name).await, "delete service")?;
        tracing::debug!(tier = %tier, instance = %instance.name, "did delete service");

        self.wait_service_down(&name).await?;
        tracing::debug!(tier = %tier, instance = %instance.name, "service is down");

        let discovery_service_id = self.remove_discovery(tier, instance).await?;

        benign_if_missing(
            self.backend
                .deregister_task_definition(&service.task_definition_arn)
                .await,
            "deregister task definition",
        )?;
        tracing::debug!(tier = %tier, instance = %instance.name, "did deregister task definition");

        Ok(StageResult::torn_down(
            tier,
            StageResources {
                discovery_service_id,
                task_definition_arn: Some(service.task_definition_arn),
                service_name: Some(service.name),
            },
        ))
    }

    /// Deprovision, then remove the discovery registration and task
    /// definitions a failed provision may have left without a service
    pub(crate) async fn roll_back_tier(
        &self,
        tier: Tier,
        instance: &Instance,
    ) -> Result<StageResult, StageError> {
        let mut result = self.destroy_tier(tier, instance).await?;
        let name = tier.resource_name(&instance.name);

        if let Some(id) = self.remove_discovery(tier, instance).await? {
            result.resources.discovery_service_id.get_or_insert(id);
        }

        let leftovers = self
            .backend
            .list_task_definitions(&name)
            .await
            .map_err(StageError::backend("list task definitions"))?;
        for definition in &leftovers {
            benign_if_missing(
                self.backend.deregister_task_definition(&definition.arn).await,
                "deregister task definition",
            )?;
        }
        if let Some(last) = leftovers.last() {
            tracing::debug!(tier = %tier, instance = %instance.name, revisions = leftovers.len(), "did deregister leftover task definitions");
            result.resources.task_definition_arn.get_or_insert(last.arn.clone());
        }

        if result.outcome == StageOutcome::NothingToDo && !result.resources.is_empty() {
            result.outcome = StageOutcome::TornDown;
        }
        Ok(result)
    }

    /// Deregister the discovery instances, then delete the registration itself
    async fn remove_discovery(
        &self,
        tier: Tier,
        instance: &Instance,
    ) -> Result<Option<String>, StageError> {
        let name = tier.resource_name(&instance.name);
        let discovery = self
            .backend
            .find_discovery_service(&name)
            .await
            .map_err(StageError::backend("find service discovery"))?;
        let Some(discovery) = discovery else {
            tracing::debug!(tier = %tier, instance = %instance.name, "service discovery already gone");
            return Ok(None);
        };

        let instance_ids = self
            .backend
            .list_discovery_instances(&discovery)
            .await
            .map_err(StageError::backend("list service discovery instances"))?;
        for instance_id in &instance_ids {
            benign_if_missing(
                self.backend
                    .deregister_discovery_instance(&discovery, instance_id)
                    .await,
                "deregister service discovery instance",
            )?;
        }
        benign_if_missing(
            self.backend.delete_discovery_service(&discovery).await,
            "delete service discovery",
        )?;
        tracing::debug!(tier = %tier, instance = %instance.name, instances = instance_ids.len(), "did delete service discovery");
        Ok(Some(discovery.id))
    }
}

/// A resource that is already gone during teardown is not an error
fn benign_if_missing(result: Result<(), BackendError>, step: &'static str) -> Result<(), StageError> {
    match result {
        Err(e) if e.is_not_found() => {
            tracing::debug!(step, error = %e, "resource already absent");
            Ok(())
        }
        other => other.map_err(StageError::backend(step)),
    }
}

pub(crate) fn depends_on_start(container: &str) -> ContainerDependency {
    ContainerDependency {
        container_name: container.to_string(),
        condition: "START".to_string(),
    }
}
