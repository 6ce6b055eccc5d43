use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// The only plan offered by the broker
pub const PLAN_SMALL: &str = "small";

/// Resource-name prefixes owned by the three workload tiers.
///
/// Instance names must not start with one of these followed by `-`, otherwise
/// `push-api-<name>` could collide with another instance's resources.
pub const TIER_PREFIXES: [&str; 3] = ["push-redis", "push-stream", "push-api"];

/// Longest name still valid inside every derived resource name.
///
/// The longest derived name is the stream tier's public service,
/// `push-stream-<name>-public`, and resource names are DNS labels of at most
/// 63 characters.
pub const MAX_INSTANCE_NAME_LEN: usize = 63 - "push-stream-".len() - "-public".len();

/// Client apps read the push-api endpoint from this variable
pub const ENV_VAR_ENDPOINT: &str = "PUSHAAS_ENDPOINT";
/// Client apps authenticate against push-api with this username
pub const ENV_VAR_USERNAME: &str = "PUSHAAS_USERNAME";
/// Client apps authenticate against push-api with this password
pub const ENV_VAR_PASSWORD: &str = "PUSHAAS_PASSWORD";

/// Lifecycle status of a push service instance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Pending,
    Running,
    Failed,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Running => "running",
            InstanceStatus::Failed => "failed",
        }
    }

    /// `Running` and `Failed` are only left by deleting the instance
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InstanceStatus::Pending)
    }

    pub fn can_transition_to(&self, next: InstanceStatus) -> bool {
        matches!(
            (self, next),
            (InstanceStatus::Pending, InstanceStatus::Running)
                | (InstanceStatus::Pending, InstanceStatus::Failed)
        )
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InstanceStatus::Pending),
            "running" => Ok(InstanceStatus::Running),
            "failed" => Ok(InstanceStatus::Failed),
            other => Err(LifecycleError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("invalid instance status transition: {from} -> {to}")]
    InvalidTransition {
        from: InstanceStatus,
        to: InstanceStatus,
    },
    #[error("unknown instance status '{0}'")]
    UnknownStatus(String),
}

/// How a completion message is applied to an instance that already left `Pending`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionPolicy {
    /// Overwrite whatever terminal state is stored (historical behavior)
    #[default]
    LastWriteWins,
    /// Drop the message unless the instance is still `Pending`
    IgnoreUnlessPending,
}

impl FromStr for CompletionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last-write-wins" => Ok(CompletionPolicy::LastWriteWins),
            "ignore-unless-pending" => Ok(CompletionPolicy::IgnoreUnlessPending),
            other => Err(format!("unknown completion policy '{}'", other)),
        }
    }
}

/// What applying a completion did to the stored instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionEffect {
    Applied,
    Overwritten,
    Ignored,
}

/// A bound application and the unit hosts bound under it
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppBinding {
    pub app_name: String,
    pub app_host: String,
    #[serde(default)]
    pub units: BTreeSet<String>,
}

/// One tenant's push service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub name: String,
    pub plan: String,
    pub team: String,
    pub user: String,
    pub status: InstanceStatus,
    /// Connection variables, only populated while `Running`
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub bindings: Vec<AppBinding>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    /// New instances always start in `Pending`
    pub fn from_form(form: &InstanceForm) -> Self {
        let now = Utc::now();
        Self {
            name: form.name.clone(),
            plan: form.plan.clone(),
            team: form.team.clone(),
            user: form.user.clone(),
            status: InstanceStatus::Pending,
            variables: BTreeMap::new(),
            bindings: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Strict transition; only `Pending -> Running | Failed` is accepted
    pub fn transition(&mut self, next: InstanceStatus) -> Result<(), LifecycleError> {
        if !self.status.can_transition_to(next) {
            return Err(LifecycleError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Apply the outcome of an orchestration run.
    ///
    /// `next` must be terminal. A `Failed` outcome clears the connection
    /// variables; a `Running` outcome replaces them.
    pub fn apply_completion(
        &mut self,
        next: InstanceStatus,
        variables: BTreeMap<String, String>,
        policy: CompletionPolicy,
    ) -> Result<CompletionEffect, LifecycleError> {
        if !next.is_terminal() {
            return Err(LifecycleError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let effect = if self.status == InstanceStatus::Pending {
            self.transition(next)?;
            CompletionEffect::Applied
        } else {
            match policy {
                CompletionPolicy::LastWriteWins => {
                    self.status = next;
                    self.updated_at = Utc::now();
                    CompletionEffect::Overwritten
                }
                CompletionPolicy::IgnoreUnlessPending => return Ok(CompletionEffect::Ignored),
            }
        };

        self.variables = match next {
            InstanceStatus::Running => variables,
            _ => BTreeMap::new(),
        };
        Ok(effect)
    }

    pub fn binding(&self, app_name: &str) -> Option<&AppBinding> {
        self.bindings.iter().find(|b| b.app_name == app_name)
    }

    pub fn binding_mut(&mut self, app_name: &str) -> Option<&mut AppBinding> {
        self.bindings.iter_mut().find(|b| b.app_name == app_name)
    }
}

/// Service plan as exposed to the platform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Plan {
    pub name: String,
    pub description: String,
}

impl Plan {
    pub fn small() -> Self {
        Self {
            name: PLAN_SMALL.to_string(),
            description: "The only plan".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("instance name is required")]
    MissingName,
    #[error("unknown plan '{0}'")]
    UnknownPlan(String),
    #[error("instance name '{0}' starts with a reserved tier prefix")]
    ReservedPrefix(String),
    #[error("instance name '{0}' must be lowercase letters, digits and inner hyphens")]
    InvalidName(String),
    #[error("instance name '{name}' is longer than {max} characters")]
    NameTooLong { name: String, max: usize },
}

/// DNS-1123 label; length is checked separately against `MAX_INSTANCE_NAME_LEN`
static INSTANCE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid regex")
});

/// Request to create a new instance
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceForm {
    pub name: String,
    pub plan: String,
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub user: String,
}

impl InstanceForm {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::MissingName);
        }
        if self.plan != PLAN_SMALL {
            return Err(ValidationError::UnknownPlan(self.plan.clone()));
        }
        if !INSTANCE_NAME_RE.is_match(&self.name) {
            return Err(ValidationError::InvalidName(self.name.clone()));
        }
        if self.name.len() > MAX_INSTANCE_NAME_LEN {
            return Err(ValidationError::NameTooLong {
                name: self.name.clone(),
                max: MAX_INSTANCE_NAME_LEN,
            });
        }
        let reserved = TIER_PREFIXES
            .iter()
            .any(|prefix| self.name.starts_with(&format!("{}-", prefix)));
        if reserved {
            return Err(ValidationError::ReservedPrefix(self.name.clone()));
        }
        Ok(())
    }
}

/// Request to bind an app to an instance
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BindAppForm {
    #[serde(rename = "app-name")]
    pub app_name: String,
    #[serde(rename = "app-host", default)]
    pub app_host: String,
}

/// Request to bind one unit of an already bound app
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BindUnitForm {
    #[serde(rename = "app-name")]
    pub app_name: String,
    #[serde(rename = "app-host", default)]
    pub app_host: String,
    #[serde(rename = "unit-host")]
    pub unit_host: String,
}

/// Error body returned by the broker API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}
