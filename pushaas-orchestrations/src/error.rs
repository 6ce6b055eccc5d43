//! Error types for provisioning, persistence and job handling

use thiserror::Error;

use crate::types::Tier;

/// Missing or invalid static configuration, fatal at construction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("required configuration {0} is not set")]
    Missing(&'static str),
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// A single cloud backend call failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("transient backend failure: {0}")]
    Transient(String),
}

impl BackendError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        BackendError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }
}

/// Failure of one stage's provision or deprovision
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error("{step} failed: {source}")]
    Backend {
        step: &'static str,
        #[source]
        source: BackendError,
    },
    #[error("timed out waiting for {condition}")]
    ReadinessTimeout { condition: String },
    #[error("missing dependency: {0}")]
    MissingDependency(String),
    #[error("stage task aborted before reporting a result")]
    Aborted,
}

impl StageError {
    pub fn backend(step: &'static str) -> impl FnOnce(BackendError) -> StageError {
        move |source| StageError::Backend { step, source }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestrationError {
    #[error("failed to resolve execution role: {0}")]
    RoleResolution(#[source] BackendError),
    #[error("stage {tier} failed: {source}")]
    Stage {
        tier: Tier,
        #[source]
        source: StageError,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("instance '{0}' not found")]
    NotFound(String),
    #[error("instance '{0}' already exists")]
    AlreadyExists(String),
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("corrupt instance record: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("unknown job kind '{0}'")]
    UnknownKind(String),
    #[error("job {0} not found")]
    JobNotFound(uuid::Uuid),
    #[error("failed to encode job payload: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("queue backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        QueueError::Backend(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("malformed job payload: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Lifecycle(#[from] pushaas_models::LifecycleError),
}

/// Failure of a broker-facing instance operation
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Invalid(#[from] pushaas_models::ValidationError),
    #[error("instance '{0}' already exists")]
    AlreadyExists(String),
    #[error("instance '{0}' not found")]
    NotFound(String),
    #[error("instance '{0}' is still being provisioned")]
    Pending(String),
    #[error("instance '{0}' failed to provision")]
    Failed(String),
    #[error("app '{app}' is already bound to instance '{instance}'")]
    AlreadyBound { instance: String, app: String },
    #[error("app '{app}' is not bound to instance '{instance}'")]
    NotBound { instance: String, app: String },
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(name) => ServiceError::NotFound(name),
            StoreError::AlreadyExists(name) => ServiceError::AlreadyExists(name),
            other => ServiceError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_names_the_step() {
        let err = StageError::backend("create service")(BackendError::Rejected(
            "quota exceeded".to_string(),
        ));
        assert_eq!(err.to_string(), "create service failed: request rejected: quota exceeded");
    }

    #[test]
    fn test_orchestration_error_names_the_tier() {
        let err = OrchestrationError::Stage {
            tier: Tier::Stream,
            source: StageError::ReadinessTimeout {
                condition: "push-stream-acme running".to_string(),
            },
        };
        assert_eq!(
            err.to_string(),
            "stage push-stream failed: timed out waiting for push-stream-acme running"
        );
    }

    #[test]
    fn test_malformed_payload_is_parse_error() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(matches!(WorkerError::from(parse), WorkerError::Parse(_)));
    }

    #[test]
    fn test_store_not_found_surfaces_as_service_not_found() {
        let err = ServiceError::from(StoreError::NotFound("acme".to_string()));
        assert!(matches!(err, ServiceError::NotFound(name) if name == "acme"));
        let err = ServiceError::from(StoreError::Corrupt("bad json".to_string()));
        assert!(matches!(err, ServiceError::Store(_)));
    }
}
