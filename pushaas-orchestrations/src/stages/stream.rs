//! Stream tier (`push-stream` plus its `push-agent` sidecar)

use async_trait::async_trait;
use pushaas_models::Instance;
use std::collections::BTreeMap;

use super::{depends_on_start, StageContext, StageProvisioner, REDIS_PORT, STREAM_PORT};
use crate::error::{BackendError, StageError};
use crate::names::tiers;
use crate::readiness::wait_until;
use crate::types::{PriorStageOutputs, StageResult, Tier};

/// 512 CPU units, 1024 MiB
const TASK_SIZE: (u32, u32) = (512, 1024);

pub struct StreamStage {
    context: StageContext,
}

impl StreamStage {
    pub fn new(context: StageContext) -> Self {
        Self { context }
    }

    async fn wait_public_ip(&self, name: &str) -> Result<String, StageError> {
        let backend = &*self.context.backend;
        let what = format!("{} to get a public ip", name);
        let assigned = wait_until(&what, self.context.config.readiness, move |_| async move {
            Ok::<_, BackendError>(
                backend
                    .describe_task_network_interface(name)
                    .await?
                    .is_some_and(|eni| eni.public_ip.is_some()),
            )
        })
        .await;
        if !assigned {
            return Err(StageError::ReadinessTimeout { condition: what });
        }

        self.context
            .backend
            .describe_task_network_interface(name)
            .await
            .map_err(StageError::backend("describe task network interface"))?
            .and_then(|eni| eni.public_ip)
            .ok_or_else(|| StageError::MissingDependency(format!("public ip of {}", name)))
    }
}

#[async_trait]
impl StageProvisioner for StreamStage {
    fn tier(&self) -> Tier {
        Tier::Stream
    }

    async fn provision(
        &self,
        instance: &Instance,
        prior: &PriorStageOutputs,
    ) -> Result<StageResult, StageError> {
        let images = &self.context.config.images;
        let redis_host = self.context.host_of(Tier::Cache, instance);
        let stream_host = self.context.host_of(Tier::Stream, instance);

        let stream = self
            .context
            .container(tiers::PUSH_STREAM, &images.push_stream, &[STREAM_PORT], BTreeMap::new());
        let mut agent = self.context.container(
            tiers::PUSH_AGENT,
            &images.push_agent,
            &[],
            BTreeMap::from([
                (
                    "PUSHAGENT_REDIS__URL".to_string(),
                    format!("redis://{}:{}", redis_host, REDIS_PORT),
                ),
                (
                    "PUSHAGENT_PUSH_STREAM__URL".to_string(),
                    format!("http://{}:{}", stream_host, STREAM_PORT),
                ),
            ]),
        );
        agent.depends_on.push(depends_on_start(tiers::PUSH_STREAM));

        let definition = self.context.task_definition(
            Tier::Stream,
            instance,
            prior,
            TASK_SIZE,
            vec![stream, agent],
        )?;
        let resources = self.context.create_tier(Tier::Stream, instance, definition).await?;

        let public_ip = self
            .wait_public_ip(&Tier::Stream.resource_name(&instance.name))
            .await?;
        tracing::debug!(tier = %Tier::Stream, instance = %instance.name, public_ip = %public_ip, "did resolve public ip");

        Ok(StageResult {
            public_endpoint: Some(public_ip),
            ..StageResult::provisioned(Tier::Stream, resources)
        })
    }

    async fn deprovision(&self, instance: &Instance) -> Result<StageResult, StageError> {
        self.context.destroy_tier(Tier::Stream, instance).await
    }

    async fn roll_back(&self, instance: &Instance) -> Result<StageResult, StageError> {
        self.context.roll_back_tier(Tier::Stream, instance).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, MemorySettings};
    use crate::stages::test_support::{context, instance, prior};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_provision_resolves_public_ip() {
        let (backend, context) = context();
        let result = StreamStage::new(context)
            .provision(&instance("acme"), &prior(None))
            .await
            .unwrap();

        assert!(result.public_endpoint.is_some());
        let definition = backend.task_definition("push-stream-acme").unwrap();
        assert_eq!((definition.cpu, definition.memory), (512, 1024));

        let agent = &definition.containers[1];
        assert_eq!(agent.name, "push-agent");
        assert_eq!(agent.depends_on[0].container_name, "push-stream");
        assert_eq!(agent.depends_on[0].condition, "START");
        assert_eq!(
            agent.environment.get("PUSHAGENT_REDIS__URL").map(String::as_str),
            Some("redis://push-redis-acme.pushaas.local:6379")
        );
        assert_eq!(
            agent.environment.get("PUSHAGENT_PUSH_STREAM__URL").map(String::as_str),
            Some("http://push-stream-acme.pushaas.local:9080")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_public_ip_that_never_appears_times_out() {
        let backend = Arc::new(MemoryBackend::with_settings(
            "pushaas.local",
            MemorySettings {
                lookups_until_public_ip: 100,
                ..MemorySettings::default()
            },
        ));
        let (_, base) = context();
        let context = StageContext::new(backend.clone(), base.config.clone());

        let err = StreamStage::new(context)
            .provision(&instance("acme"), &prior(None))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::ReadinessTimeout { .. }));
        // the stage does not roll back what it created
        assert_eq!(backend.service_names(), vec!["push-stream-acme".to_string()]);
    }
}
