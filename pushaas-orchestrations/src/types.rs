//! Input and output types for stages, orchestration runs and jobs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::backend::ExecutionRole;
use crate::error::OrchestrationError;
use crate::names::tiers;

// ============================================================================
// Tiers
// ============================================================================

/// One of the three workload components of a push service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Cache,
    Stream,
    Api,
}

impl Tier {
    /// Tiers in provision order
    pub const PROVISION_ORDER: [Tier; 3] = [Tier::Cache, Tier::Stream, Tier::Api];

    /// Tiers in teardown order, dependents first
    pub const DEPROVISION_ORDER: [Tier; 3] = [Tier::Api, Tier::Stream, Tier::Cache];

    pub fn prefix(&self) -> &'static str {
        match self {
            Tier::Cache => tiers::PUSH_REDIS,
            Tier::Stream => tiers::PUSH_STREAM,
            Tier::Api => tiers::PUSH_API,
        }
    }

    /// Resource name of this tier for the given instance
    pub fn resource_name(&self, instance_name: &str) -> String {
        crate::names::stage_name(self.prefix(), instance_name)
    }

    /// Only the stream tier is reached from outside; the api tier hands out its stream address
    pub fn has_public_ip(&self) -> bool {
        matches!(self, Tier::Stream)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

// ============================================================================
// Stage results
// ============================================================================

/// Identifiers of the cloud resources one stage created or removed
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageResources {
    pub discovery_service_id: Option<String>,
    pub task_definition_arn: Option<String>,
    pub service_name: Option<String>,
}

impl StageResources {
    pub fn is_empty(&self) -> bool {
        self.discovery_service_id.is_none()
            && self.task_definition_arn.is_none()
            && self.service_name.is_none()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Provisioned,
    TornDown,
    /// Deprovision found no running service for the tier
    NothingToDo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageResult {
    pub tier: Tier,
    pub outcome: StageOutcome,
    pub resources: StageResources,
    /// Publicly reachable address, only resolved by the stream tier
    pub public_endpoint: Option<String>,
    /// Connection variables handed to bound apps, only set by the api tier
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl StageResult {
    pub fn provisioned(tier: Tier, resources: StageResources) -> Self {
        Self {
            tier,
            outcome: StageOutcome::Provisioned,
            resources,
            public_endpoint: None,
            variables: BTreeMap::new(),
        }
    }

    pub fn torn_down(tier: Tier, resources: StageResources) -> Self {
        Self {
            outcome: StageOutcome::TornDown,
            ..Self::provisioned(tier, resources)
        }
    }

    pub fn nothing_to_do(tier: Tier) -> Self {
        Self {
            outcome: StageOutcome::NothingToDo,
            ..Self::provisioned(tier, StageResources::default())
        }
    }
}

/// Outputs of earlier stages a later stage may depend on
#[derive(Debug, Clone, Default)]
pub struct PriorStageOutputs {
    pub role: Option<ExecutionRole>,
    /// Public address of the stream tier, required by the api tier
    pub stream_endpoint: Option<String>,
}

// ============================================================================
// Orchestration runs
// ============================================================================

/// Progress of one orchestration run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Start,
    RoleResolved,
    CacheDone,
    StreamDone,
    ApiDone,
    Success,
    Failed,
}

impl Phase {
    /// Phase reached after the given tier finishes
    pub fn after(tier: Tier) -> Phase {
        match tier {
            Tier::Cache => Phase::CacheDone,
            Tier::Stream => Phase::StreamDone,
            Tier::Api => Phase::ApiDone,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrchestrationOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone)]
pub struct OrchestrationResult {
    pub outcome: OrchestrationOutcome,
    /// Last phase reached; `Failed` when the run aborted
    pub phase: Phase,
    /// Results of the stages that completed, in execution order
    pub stages: Vec<StageResult>,
    pub failed_stage: Option<Tier>,
    pub error: Option<OrchestrationError>,
    /// Connection variables gathered from the stages
    pub variables: BTreeMap<String, String>,
}

impl OrchestrationResult {
    pub fn is_success(&self) -> bool {
        self.outcome == OrchestrationOutcome::Success
    }

    pub fn stage(&self, tier: Tier) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.tier == tier)
    }
}

// ============================================================================
// Job payloads
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvisionJob {
    pub instance_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeprovisionJob {
    pub instance_name: String,
}

/// Result of a provision run, applied to the stored instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvisionOutcome {
    pub instance_name: String,
    pub status: OrchestrationOutcome,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl ProvisionOutcome {
    pub fn from_result(instance_name: impl Into<String>, result: &OrchestrationResult) -> Self {
        Self {
            instance_name: instance_name.into(),
            status: result.outcome,
            variables: result.variables.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_orders() {
        assert_eq!(Tier::PROVISION_ORDER, [Tier::Cache, Tier::Stream, Tier::Api]);
        assert_eq!(Tier::DEPROVISION_ORDER, [Tier::Api, Tier::Stream, Tier::Cache]);
    }

    #[test]
    fn test_tier_resource_names() {
        assert_eq!(Tier::Cache.resource_name("acme"), "push-redis-acme");
        assert_eq!(Tier::Stream.resource_name("acme"), "push-stream-acme");
        assert_eq!(Tier::Api.resource_name("acme"), "push-api-acme");
        assert_eq!(Tier::Api.to_string(), "push-api");
    }

    #[test]
    fn test_provision_outcome_wire_format() {
        let outcome: ProvisionOutcome = serde_json::from_str(
            r#"{"instance_name":"acme","status":"success","variables":{"PUSHAAS_USERNAME":"app"}}"#,
        )
        .unwrap();
        assert_eq!(outcome.status, OrchestrationOutcome::Success);
        assert_eq!(outcome.variables.get("PUSHAAS_USERNAME").map(String::as_str), Some("app"));

        let failed: ProvisionOutcome =
            serde_json::from_str(r#"{"instance_name":"acme","status":"failure"}"#).unwrap();
        assert!(failed.variables.is_empty());
    }
}
