//! Cache tier (`push-redis`)

use async_trait::async_trait;
use pushaas_models::Instance;
use std::collections::BTreeMap;

use super::{StageContext, StageProvisioner, REDIS_PORT};
use crate::error::StageError;
use crate::names::tiers;
use crate::types::{PriorStageOutputs, StageResult, Tier};

/// 256 CPU units, 512 MiB
const TASK_SIZE: (u32, u32) = (256, 512);

pub struct CacheStage {
    context: StageContext,
}

impl CacheStage {
    pub fn new(context: StageContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl StageProvisioner for CacheStage {
    fn tier(&self) -> Tier {
        Tier::Cache
    }

    async fn provision(
        &self,
        instance: &Instance,
        prior: &PriorStageOutputs,
    ) -> Result<StageResult, StageError> {
        let redis = self.context.container(
            tiers::PUSH_REDIS,
            &self.context.config.images.push_redis,
            &[REDIS_PORT],
            BTreeMap::new(),
        );
        let definition =
            self.context
                .task_definition(Tier::Cache, instance, prior, TASK_SIZE, vec![redis])?;

        let resources = self.context.create_tier(Tier::Cache, instance, definition).await?;
        Ok(StageResult::provisioned(Tier::Cache, resources))
    }

    async fn deprovision(&self, instance: &Instance) -> Result<StageResult, StageError> {
        self.context.destroy_tier(Tier::Cache, instance).await
    }

    async fn roll_back(&self, instance: &Instance) -> Result<StageResult, StageError> {
        self.context.roll_back_tier(Tier::Cache, instance).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::{context, instance, prior};
    use crate::types::StageOutcome;

    #[tokio::test(start_paused = true)]
    async fn test_provision_creates_resources_in_order() {
        let (backend, context) = context();
        let result = CacheStage::new(context)
            .provision(&instance("acme"), &prior(None))
            .await
            .unwrap();

        assert_eq!(result.outcome, StageOutcome::Provisioned);
        assert_eq!(result.resources.service_name.as_deref(), Some("push-redis-acme"));
        assert_eq!(
            backend.calls()[..3],
            [
                "create_discovery_service push-redis-acme".to_string(),
                "register_task_definition push-redis-acme".to_string(),
                "create_service push-redis-acme".to_string(),
            ]
        );

        let definition = backend.task_definition("push-redis-acme").unwrap();
        assert_eq!((definition.cpu, definition.memory), (256, 512));
        assert_eq!(definition.containers[0].ports, vec![6379]);
        assert_eq!(definition.containers[0].log.group, "/pushaas");
    }

    #[tokio::test(start_paused = true)]
    async fn test_provision_without_role_creates_nothing() {
        let (backend, context) = context();
        let err = CacheStage::new(context)
            .provision(&instance("acme"), &PriorStageOutputs::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::MissingDependency(_)));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_is_not_publicly_exposed() {
        use crate::backend::CloudBackend;

        let (backend, context) = context();
        CacheStage::new(context)
            .provision(&instance("acme"), &prior(None))
            .await
            .unwrap();

        let eni = backend
            .describe_task_network_interface("push-redis-acme")
            .await
            .unwrap()
            .unwrap();
        assert!(eni.private_ip.is_some());
        assert_eq!(eni.public_ip, None);
    }
}
