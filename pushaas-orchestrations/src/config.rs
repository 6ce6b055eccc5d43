//! Static provisioner configuration

use pushaas_models::CompletionPolicy;
use std::time::Duration;

use crate::error::ConfigError;
use crate::names::DEFAULT_EXECUTION_ROLE;
use crate::readiness::ReadinessPolicy;

/// What the orchestrator does with earlier stages when a later one fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RollbackPolicy {
    /// Leave created resources in place
    #[default]
    Leave,
    /// Tear down the stages that already succeeded, in reverse order
    Teardown,
}

/// Container images, one per container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Images {
    pub push_redis: String,
    pub push_stream: String,
    pub push_agent: String,
    pub push_api: String,
}

/// Where container logs are shipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSink {
    pub region: String,
    pub group: String,
    pub stream_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerConfig {
    pub images: Images,
    pub region: String,
    pub cluster: String,
    pub logs: LogSink,
    pub security_group: String,
    pub subnet: String,
    pub dns_namespace: String,
    pub execution_role: String,
    pub readiness: ReadinessPolicy,
    pub rollback: RollbackPolicy,
    pub completion_policy: CompletionPolicy,
}

impl ProvisionerConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &'static str| -> Result<String, ConfigError> {
            lookup(var)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(var))
        };

        let max_attempts = parse_or(&lookup, "PUSHAAS_READINESS_ATTEMPTS", 30u32)?;
        let interval_secs = parse_or(&lookup, "PUSHAAS_READINESS_INTERVAL_SECS", 5u64)?;
        let rollback = if parse_or(&lookup, "PUSHAAS_ROLLBACK_ON_FAILURE", false)? {
            RollbackPolicy::Teardown
        } else {
            RollbackPolicy::Leave
        };
        let completion_policy = match lookup("PUSHAAS_COMPLETION_POLICY") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                var: "PUSHAAS_COMPLETION_POLICY",
                reason,
            })?,
            None => CompletionPolicy::default(),
        };

        let config = Self {
            images: Images {
                push_redis: required("PUSHAAS_IMAGE_PUSH_REDIS")?,
                push_stream: required("PUSHAAS_IMAGE_PUSH_STREAM")?,
                push_agent: required("PUSHAAS_IMAGE_PUSH_AGENT")?,
                push_api: required("PUSHAAS_IMAGE_PUSH_API")?,
            },
            region: required("PUSHAAS_REGION")?,
            cluster: required("PUSHAAS_CLUSTER")?,
            logs: LogSink {
                region: required("PUSHAAS_REGION")?,
                group: required("PUSHAAS_LOGS_GROUP")?,
                stream_prefix: required("PUSHAAS_LOGS_STREAM_PREFIX")?,
            },
            security_group: required("PUSHAAS_SECURITY_GROUP")?,
            subnet: required("PUSHAAS_SUBNET")?,
            dns_namespace: required("PUSHAAS_DNS_NAMESPACE")?,
            execution_role: lookup("PUSHAAS_EXECUTION_ROLE")
                .unwrap_or_else(|| DEFAULT_EXECUTION_ROLE.to_string()),
            readiness: ReadinessPolicy {
                max_attempts,
                interval: Duration::from_secs(interval_secs),
            },
            rollback,
            completion_policy,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make every orchestration fail
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("PUSHAAS_IMAGE_PUSH_REDIS", &self.images.push_redis),
            ("PUSHAAS_IMAGE_PUSH_STREAM", &self.images.push_stream),
            ("PUSHAAS_IMAGE_PUSH_AGENT", &self.images.push_agent),
            ("PUSHAAS_IMAGE_PUSH_API", &self.images.push_api),
            ("PUSHAAS_REGION", &self.region),
            ("PUSHAAS_CLUSTER", &self.cluster),
            ("PUSHAAS_LOGS_GROUP", &self.logs.group),
            ("PUSHAAS_LOGS_STREAM_PREFIX", &self.logs.stream_prefix),
            ("PUSHAAS_SECURITY_GROUP", &self.security_group),
            ("PUSHAAS_SUBNET", &self.subnet),
            ("PUSHAAS_DNS_NAMESPACE", &self.dns_namespace),
            ("PUSHAAS_EXECUTION_ROLE", &self.execution_role),
        ];
        if let Some((var, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ConfigError::Missing(*var));
        }
        if self.readiness.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "PUSHAAS_READINESS_ATTEMPTS",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Complete configuration for local runs and tests
    pub fn local() -> Self {
        Self {
            images: Images {
                push_redis: "redis:5-alpine".to_string(),
                push_stream: "pushaas/push-stream:latest".to_string(),
                push_agent: "pushaas/push-agent:latest".to_string(),
                push_api: "pushaas/push-api:latest".to_string(),
            },
            region: "local".to_string(),
            cluster: "pushaas".to_string(),
            logs: LogSink {
                region: "local".to_string(),
                group: "/pushaas".to_string(),
                stream_prefix: "pushaas".to_string(),
            },
            security_group: "sg-local".to_string(),
            subnet: "subnet-local".to_string(),
            dns_namespace: "pushaas.local".to_string(),
            execution_role: DEFAULT_EXECUTION_ROLE.to_string(),
            readiness: ReadinessPolicy::default(),
            rollback: RollbackPolicy::default(),
            completion_policy: CompletionPolicy::default(),
        }
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
