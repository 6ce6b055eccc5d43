//! In-process backend simulation
//!
//! Services reach their desired task count after a configurable number of
//! describe calls and get a public IP after a configurable number of network
//! interface lookups. Failures can be injected per operation and target.

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use super::{
    CloudBackend, DiscoveryService, DiscoveryServiceSpec, ExecutionRole, NetworkInterface,
    ServiceDescription, ServiceSpec, ServiceStatus, TaskDefinition, TaskDefinitionRef,
};
use crate::error::BackendError;

/// Timing of the simulated platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySettings {
    /// Describe calls after which a scaled service reports its desired count
    pub describes_until_settled: u32,
    /// Network interface lookups before the public IP is assigned
    pub lookups_until_public_ip: u32,
    /// Most recent calls kept in the call log
    pub call_history: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            describes_until_settled: 1,
            lookups_until_public_ip: 1,
            call_history: 1024,
        }
    }
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    operation: &'static str,
    target: String,
    error: BackendError,
}

#[derive(Debug)]
struct SimulatedService {
    description: ServiceDescription,
    describes_since_scale: u32,
    interface_lookups: u32,
    public_ip: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    discovery: BTreeMap<String, DiscoveryService>,
    discovery_instances: BTreeMap<String, Vec<String>>,
    task_definitions: BTreeMap<String, TaskDefinition>,
    revisions: BTreeMap<String, u32>,
    services: BTreeMap<String, SimulatedService>,
    failures: Vec<InjectedFailure>,
    calls: VecDeque<String>,
    call_history: usize,
    next_id: u32,
}

impl MemoryState {
    fn record(&mut self, operation: &'static str, target: &str) -> Result<(), BackendError> {
        self.calls.push_back(format!("{} {}", operation, target));
        while self.calls.len() > self.call_history {
            self.calls.pop_front();
        }
        match self
            .failures
            .iter()
            .find(|f| f.operation == operation && target.contains(&f.target))
        {
            Some(failure) => Err(failure.error.clone()),
            None => Ok(()),
        }
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

pub struct MemoryBackend {
    dns_namespace: String,
    settings: MemorySettings,
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new(dns_namespace: impl Into<String>) -> Self {
        Self::with_settings(dns_namespace, MemorySettings::default())
    }

    pub fn with_settings(dns_namespace: impl Into<String>, settings: MemorySettings) -> Self {
        Self {
            dns_namespace: dns_namespace.into(),
            settings,
            state: Mutex::new(MemoryState {
                call_history: settings.call_history,
                ..MemoryState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fail every `operation` call whose target name contains `target`
    pub fn inject_failure(&self, operation: &'static str, target: &str, error: BackendError) {
        self.state().failures.push(InjectedFailure {
            operation,
            target: target.to_string(),
            error,
        });
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Most recent calls, oldest first, as `"{operation} {target}"`
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.iter().cloned().collect()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.state().services.keys().cloned().collect()
    }

    pub fn discovery_service_names(&self) -> Vec<String> {
        self.state().discovery.keys().cloned().collect()
    }

    pub fn task_definition(&self, family: &str) -> Option<TaskDefinition> {
        self.state()
            .task_definitions
            .values()
            .find(|d| d.family == family)
            .cloned()
    }

    /// True when no discovery registration, task definition or service is left
    pub fn is_empty(&self) -> bool {
        let state = self.state();
        state.discovery.is_empty() && state.task_definitions.is_empty() && state.services.is_empty()
    }
}

#[async_trait]
impl CloudBackend for MemoryBackend {
    async fn get_execution_role(&self, name: &str) -> Result<ExecutionRole, BackendError> {
        self.state().record("get_execution_role", name)?;
        Ok(ExecutionRole {
            name: name.to_string(),
            arn: format!("arn:memory:iam::role/{}", name),
        })
    }

    async fn create_discovery_service(
        &self,
        spec: &DiscoveryServiceSpec,
    ) -> Result<DiscoveryService, BackendError> {
        let mut state = self.state();
        state.record("create_discovery_service", &spec.name)?;
        if state.discovery.contains_key(&spec.name) {
            return Err(BackendError::Rejected(format!(
                "discovery service {} already exists",
                spec.name
            )));
        }
        let id = format!("srv-{:04}", state.next_id());
        let service = DiscoveryService {
            arn: format!("arn:memory:servicediscovery:{}:service/{}", spec.namespace_id, id),
            id,
            name: spec.name.clone(),
        };
        state.discovery.insert(spec.name.clone(), service.clone());
        Ok(service)
    }

    async fn find_discovery_service(
        &self,
        name: &str,
    ) -> Result<Option<DiscoveryService>, BackendError> {
        let mut state = self.state();
        state.record("find_discovery_service", name)?;
        Ok(state.discovery.get(name).cloned())
    }

    async fn list_discovery_instances(
        &self,
        service: &DiscoveryService,
    ) -> Result<Vec<String>, BackendError> {
        let mut state = self.state();
        state.record("list_discovery_instances", &service.name)?;
        Ok(state
            .discovery_instances
            .get(&service.arn)
            .cloned()
            .unwrap_or_default())
    }

    async fn deregister_discovery_instance(
        &self,
        service: &DiscoveryService,
        instance_id: &str,
    ) -> Result<(), BackendError> {
        let mut state = self.state();
        state.record("deregister_discovery_instance", &service.name)?;
        let instances = state
            .discovery_instances
            .get_mut(&service.arn)
            .ok_or_else(|| BackendError::not_found("discovery instance", instance_id))?;
        let before = instances.len();
        instances.retain(|id| id != instance_id);
        if instances.len() == before {
            return Err(BackendError::not_found("discovery instance", instance_id));
        }
        Ok(())
    }

    async fn delete_discovery_service(&self, service: &DiscoveryService) -> Result<(), BackendError> {
        let mut state = self.state();
        state.record("delete_discovery_service", &service.name)?;
        let has_instances = state
            .discovery_instances
            .get(&service.arn)
            .is_some_and(|instances| !instances.is_empty());
        if has_instances {
            return Err(BackendError::Rejected(format!(
                "discovery service {} still has registered instances",
                service.name
            )));
        }
        state.discovery_instances.remove(&service.arn);
        state
            .discovery
            .remove(&service.name)
            .map(|_| ())
            .ok_or_else(|| BackendError::not_found("discovery service", &service.name))
    }

    async fn register_task_definition(
        &self,
        definition: &TaskDefinition,
    ) -> Result<TaskDefinitionRef, BackendError> {
        let mut state = self.state();
        state.record("register_task_definition", &definition.family)?;
        let revision = {
            let revision = state.revisions.entry(definition.family.clone()).or_insert(0);
            *revision += 1;
            *revision
        };
        let arn = format!("arn:memory:ecs:task-definition/{}:{}", definition.family, revision);
        state.task_definitions.insert(arn.clone(), definition.clone());
        Ok(TaskDefinitionRef {
            family: definition.family.clone(),
            revision,
            arn,
        })
    }

    async fn deregister_task_definition(&self, arn: &str) -> Result<(), BackendError> {
        let mut state = self.state();
        state.record("deregister_task_definition", arn)?;
        state
            .task_definitions
            .remove(arn)
            .map(|_| ())
            .ok_or_else(|| BackendError::not_found("task definition", arn))
    }

    async fn list_task_definitions(
        &self,
        family: &str,
    ) -> Result<Vec<TaskDefinitionRef>, BackendError> {
        let mut state = self.state();
        state.record("list_task_definitions", family)?;
        let mut refs: Vec<TaskDefinitionRef> = state
            .task_definitions
            .iter()
            .filter(|(_, definition)| definition.family == family)
            .map(|(arn, definition)| TaskDefinitionRef {
                family: definition.family.clone(),
                revision: arn
                    .rsplit(':')
                    .next()
                    .and_then(|r| r.parse().ok())
                    .unwrap_or_default(),
                arn: arn.clone(),
            })
            .collect();
        refs.sort_by_key(|r| r.revision);
        Ok(refs)
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<ServiceDescription, BackendError> {
        let mut state = self.state();
        state.record("create_service", &spec.name)?;
        if state.services.contains_key(&spec.name) {
            return Err(BackendError::Rejected(format!("service {} already exists", spec.name)));
        }
        if !state.task_definitions.contains_key(&spec.task_definition_arn) {
            return Err(BackendError::not_found("task definition", &spec.task_definition_arn));
        }
        let id = state.next_id();
        let description = ServiceDescription {
            name: spec.name.clone(),
            task_definition_arn: spec.task_definition_arn.clone(),
            status: ServiceStatus::Active,
            desired_count: spec.desired_count,
            running_count: 0,
        };
        state
            .discovery_instances
            .entry(spec.discovery_service_arn.clone())
            .or_default()
            .push(format!("{}-task-{}", spec.name, id));
        state.services.insert(
            spec.name.clone(),
            SimulatedService {
                description: description.clone(),
                describes_since_scale: 0,
                interface_lookups: 0,
                public_ip: spec
                    .assign_public_ip
                    .then(|| format!("203.0.113.{}", id % 255)),
            },
        );
        Ok(description)
    }

    async fn describe_service(
        &self,
        name: &str,
    ) -> Result<Option<ServiceDescription>, BackendError> {
        let mut state = self.state();
        state.record("describe_service", name)?;
        let settle_after = self.settings.describes_until_settled;

        let Some(service) = state.services.get_mut(name) else {
            return Ok(None);
        };

        if service.description.status == ServiceStatus::Draining {
            service.description.status = ServiceStatus::Inactive;
            service.description.running_count = 0;
            let description = service.description.clone();
            state.services.remove(name);
            return Ok(Some(description));
        }

        service.describes_since_scale += 1;
        if service.describes_since_scale >= settle_after {
            service.description.running_count = service.description.desired_count;
        }
        Ok(Some(service.description.clone()))
    }

    async fn scale_service(&self, name: &str, desired_count: u32) -> Result<(), BackendError> {
        let mut state = self.state();
        state.record("scale_service", name)?;
        let service = state
            .services
            .get_mut(name)
            .ok_or_else(|| BackendError::not_found("service", name))?;
        service.description.desired_count = desired_count;
        service.describes_since_scale = 0;
        Ok(())
    }

    async fn delete_service(&self, name: &str) -> Result<(), BackendError> {
        let mut state = self.state();
        state.record("delete_service", name)?;
        let service = state
            .services
            .get_mut(name)
            .ok_or_else(|| BackendError::not_found("service", name))?;
        service.description.status = ServiceStatus::Draining;
        service.description.desired_count = 0;
        Ok(())
    }

    async fn describe_task_network_interface(
        &self,
        service_name: &str,
    ) -> Result<Option<NetworkInterface>, BackendError> {
        let mut state = self.state();
        state.record("describe_task_network_interface", service_name)?;
        let lookups_needed = self.settings.lookups_until_public_ip;
        let service = state
            .services
            .get_mut(service_name)
            .ok_or_else(|| BackendError::not_found("service", service_name))?;
        if service.description.running_count == 0 {
            return Ok(None);
        }
        service.interface_lookups += 1;
        let public_ip = service
            .public_ip
            .clone()
            .filter(|_| service.interface_lookups >= lookups_needed);
        Ok(Some(NetworkInterface {
            id: format!("eni-{}", service_name),
            private_ip: Some(format!("10.0.0.{}", service.interface_lookups % 255)),
            public_ip,
        }))
    }

    fn discovery_host(&self, registration_name: &str) -> String {
        format!("{}.{}", registration_name, self.dns_namespace)
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("dns_namespace", &self.dns_namespace)
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_definition(family: &str) -> TaskDefinition {
        TaskDefinition {
            family: family.to_string(),
            cpu: 256,
            memory: 512,
            execution_role_arn: "arn:role".to_string(),
            containers: Vec::new(),
        }
    }

    async fn running_service(backend: &MemoryBackend, name: &str) -> DiscoveryService {
        let discovery = backend
            .create_discovery_service(&DiscoveryServiceSpec::new(name, "ns"))
            .await
            .unwrap();
        let definition = backend
            .register_task_definition(&task_definition(name))
            .await
            .unwrap();
        backend
            .create_service(&ServiceSpec {
                name: name.to_string(),
                cluster: "cluster".to_string(),
                task_definition_arn: definition.arn,
                desired_count: 1,
                discovery_service_arn: discovery.arn.clone(),
                security_group: "sg".to_string(),
                subnet: "subnet".to_string(),
                assign_public_ip: true,
            })
            .await
            .unwrap();
        discovery
    }

    #[tokio::test]
    async fn test_service_settles_after_describes() {
        let backend = MemoryBackend::with_settings(
            "ns",
            MemorySettings {
                describes_until_settled: 2,
                ..MemorySettings::default()
            },
        );
        running_service(&backend, "push-redis-acme").await;

        let first = backend.describe_service("push-redis-acme").await.unwrap().unwrap();
        assert_eq!(first.running_count, 0);
        let second = backend.describe_service("push-redis-acme").await.unwrap().unwrap();
        assert!(second.is_up());
    }

    #[tokio::test]
    async fn test_deleted_service_goes_inactive_then_absent() {
        let backend = MemoryBackend::new("ns");
        running_service(&backend, "push-api-acme").await;
        backend.delete_service("push-api-acme").await.unwrap();

        let draining = backend.describe_service("push-api-acme").await.unwrap().unwrap();
        assert_eq!(draining.status, ServiceStatus::Inactive);
        assert!(backend.describe_service("push-api-acme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_discovery_service_with_instances_cannot_be_deleted() {
        let backend = MemoryBackend::new("ns");
        let discovery = running_service(&backend, "push-stream-acme").await;

        let err = backend.delete_discovery_service(&discovery).await.unwrap_err();
        assert!(matches!(err, BackendError::Rejected(_)));

        for id in backend.list_discovery_instances(&discovery).await.unwrap() {
            backend.deregister_discovery_instance(&discovery, &id).await.unwrap();
        }
        backend.delete_discovery_service(&discovery).await.unwrap();
    }

    #[tokio::test]
    async fn test_injected_failure_matches_operation_and_target() {
        let backend = MemoryBackend::new("ns");
        backend.inject_failure(
            "create_discovery_service",
            "push-stream",
            BackendError::Transient("throttled".to_string()),
        );

        assert!(backend
            .create_discovery_service(&DiscoveryServiceSpec::new("push-redis-acme", "ns"))
            .await
            .is_ok());
        assert!(backend
            .create_discovery_service(&DiscoveryServiceSpec::new("push-stream-acme", "ns"))
            .await
            .is_err());
        assert_eq!(backend.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_call_log_keeps_only_recent_calls() {
        let backend = MemoryBackend::with_settings(
            "ns",
            MemorySettings {
                call_history: 2,
                ..MemorySettings::default()
            },
        );
        for name in ["push-redis-a", "push-redis-b", "push-redis-c"] {
            backend.describe_service(name).await.unwrap();
        }
        assert_eq!(
            backend.calls(),
            vec!["describe_service push-redis-b", "describe_service push-redis-c"]
        );
    }

    #[test]
    fn test_discovery_host_uses_namespace() {
        let backend = MemoryBackend::new("tsuru");
        assert_eq!(backend.discovery_host("push-redis-acme"), "push-redis-acme.tsuru");
    }
}
