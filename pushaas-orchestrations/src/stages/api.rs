//! Api tier (`push-api`), the one tenants' apps talk to

use async_trait::async_trait;
use pushaas_models::{Instance, ENV_VAR_ENDPOINT, ENV_VAR_PASSWORD, ENV_VAR_USERNAME};
use std::collections::BTreeMap;

use super::{StageContext, StageProvisioner, API_PORT, REDIS_PORT, STREAM_PORT};
use crate::error::StageError;
use crate::names::tiers;
use crate::types::{PriorStageOutputs, StageResult, Tier};

/// 256 CPU units, 512 MiB
const TASK_SIZE: (u32, u32) = (256, 512);

pub struct ApiStage {
    context: StageContext,
}

impl ApiStage {
    pub fn new(context: StageContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl StageProvisioner for ApiStage {
    fn tier(&self) -> Tier {
        Tier::Api
    }

    async fn provision(
        &self,
        instance: &Instance,
        prior: &PriorStageOutputs,
    ) -> Result<StageResult, StageError> {
        let stream_ip = prior
            .stream_endpoint
            .as_deref()
            .ok_or_else(|| StageError::MissingDependency("push-stream public address".to_string()))?;

        let username = instance.name.clone();
        let password = uuid::Uuid::new_v4().simple().to_string();

        let api = self.context.container(
            tiers::PUSH_API,
            &self.context.config.images.push_api,
            &[API_PORT],
            BTreeMap::from([
                (
                    "PUSHAPI_REDIS__URL".to_string(),
                    format!(
                        "redis://{}:{}",
                        self.context.host_of(Tier::Cache, instance),
                        REDIS_PORT
                    ),
                ),
                (
                    "PUSHAPI_PUSH_STREAM__URL".to_string(),
                    format!("http://{}:{}", stream_ip, STREAM_PORT),
                ),
                ("PUSHAPI_API__BASIC_AUTH_USER".to_string(), username.clone()),
                ("PUSHAPI_API__BASIC_AUTH_PASSWORD".to_string(), password.clone()),
            ]),
        );
        let definition =
            self.context
                .task_definition(Tier::Api, instance, prior, TASK_SIZE, vec![api])?;
        let resources = self.context.create_tier(Tier::Api, instance, definition).await?;

        let endpoint = format!(
            "http://{}:{}",
            self.context.host_of(Tier::Api, instance),
            API_PORT
        );
        Ok(StageResult {
            variables: BTreeMap::from([
                (ENV_VAR_ENDPOINT.to_string(), endpoint),
                (ENV_VAR_USERNAME.to_string(), username),
                (ENV_VAR_PASSWORD.to_string(), password),
            ]),
            ..StageResult::provisioned(Tier::Api, resources)
        })
    }

    async fn deprovision(&self, instance: &Instance) -> Result<StageResult, StageError> {
        self.context.destroy_tier(Tier::Api, instance).await
    }

    async fn roll_back(&self, instance: &Instance) -> Result<StageResult, StageError> {
        self.context.roll_back_tier(Tier::Api, instance).await
    }
}
