//! Container backend abstraction used by the stage provisioners
//!
//! The backend is an explicitly constructed client shared as
//! `Arc<dyn CloudBackend>`; stages never reach for global state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::BackendError;

pub mod kubernetes;
pub mod memory;

pub use self::kubernetes::KubeBackend;
pub use self::memory::MemoryBackend;

// ============================================================================
// Identity
// ============================================================================

/// Identity the tier containers run under
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionRole {
    pub name: String,
    pub arn: String,
}

// ============================================================================
// Service discovery
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryServiceSpec {
    pub name: String,
    pub namespace_id: String,
    /// A-record TTL in seconds
    pub dns_ttl: u32,
    pub failure_threshold: u32,
}

impl DiscoveryServiceSpec {
    pub fn new(name: impl Into<String>, namespace_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace_id: namespace_id.into(),
            dns_ttl: 10,
            failure_threshold: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryService {
    pub id: String,
    pub name: String,
    pub arn: String,
}

// ============================================================================
// Task definitions
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfiguration {
    pub region: String,
    pub group: String,
    pub stream_prefix: String,
}

/// Start-order dependency between two containers of one task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerDependency {
    pub container_name: String,
    pub condition: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerDefinition {
    pub name: String,
    pub image: String,
    pub essential: bool,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub depends_on: Vec<ContainerDependency>,
    pub log: LogConfiguration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskDefinition {
    pub family: String,
    /// CPU units, 1024 per vCPU
    pub cpu: u32,
    /// Memory in MiB
    pub memory: u32,
    pub execution_role_arn: String,
    pub containers: Vec<ContainerDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskDefinitionRef {
    pub family: String,
    pub revision: u32,
    pub arn: String,
}

// ============================================================================
// Services
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub cluster: String,
    pub task_definition_arn: String,
    pub desired_count: u32,
    pub discovery_service_arn: String,
    pub security_group: String,
    pub subnet: String,
    pub assign_public_ip: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceStatus {
    Active,
    Draining,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceDescription {
    pub name: String,
    pub task_definition_arn: String,
    pub status: ServiceStatus,
    pub desired_count: u32,
    pub running_count: u32,
}

impl ServiceDescription {
    pub fn is_up(&self) -> bool {
        self.status == ServiceStatus::Active && self.running_count > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkInterface {
    pub id: String,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
}

/// Operations the stage provisioners need from the container platform
#[async_trait]
pub trait CloudBackend: Send + Sync {
    async fn get_execution_role(&self, name: &str) -> Result<ExecutionRole, BackendError>;

    async fn create_discovery_service(
        &self,
        spec: &DiscoveryServiceSpec,
    ) -> Result<DiscoveryService, BackendError>;

    async fn find_discovery_service(
        &self,
        name: &str,
    ) -> Result<Option<DiscoveryService>, BackendError>;

    async fn list_discovery_instances(
        &self,
        service: &DiscoveryService,
    ) -> Result<Vec<String>, BackendError>;

    async fn deregister_discovery_instance(
        &self,
        service: &DiscoveryService,
        instance_id: &str,
    ) -> Result<(), BackendError>;

    async fn delete_discovery_service(&self, service: &DiscoveryService) -> Result<(), BackendError>;

    async fn register_task_definition(
        &self,
        definition: &TaskDefinition,
    ) -> Result<TaskDefinitionRef, BackendError>;

    async fn deregister_task_definition(&self, arn: &str) -> Result<(), BackendError>;

    /// Registered revisions of one family, oldest first
    async fn list_task_definitions(&self, family: &str)
        -> Result<Vec<TaskDefinitionRef>, BackendError>;

    async fn create_service(&self, spec: &ServiceSpec) -> Result<ServiceDescription, BackendError>;

    /// `None` once the service is gone
    async fn describe_service(&self, name: &str)
        -> Result<Option<ServiceDescription>, BackendError>;

    async fn scale_service(&self, name: &str, desired_count: u32) -> Result<(), BackendError>;

    /// Force-delete, regardless of running tasks
    async fn delete_service(&self, name: &str) -> Result<(), BackendError>;

    async fn describe_task_network_interface(
        &self,
        service_name: &str,
    ) -> Result<Option<NetworkInterface>, BackendError>;

    /// DNS name under which a discovery registration is reachable
    fn discovery_host(&self, registration_name: &str) -> String;
}
