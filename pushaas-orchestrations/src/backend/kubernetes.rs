//! Kubernetes implementation of the container backend
//!
//! | Backend concept | Kubernetes object |
//! |---|---|
//! | execution role | `ServiceAccount` |
//! | discovery registration | headless `Service` (A records) |
//! | discovery instance | `Pod` labelled `pushaas.io/discovery` |
//! | task definition | `ConfigMap` holding the definition as JSON, one per revision |
//! | running service | `Deployment` |
//! | public IP | `LoadBalancer` `Service` named `<service>-public` |

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde::Serialize;
use std::collections::BTreeMap;
use tera::{Context as TeraContext, Tera};

use super::{
    CloudBackend, DiscoveryService, DiscoveryServiceSpec, ExecutionRole, LogConfiguration,
    NetworkInterface, ServiceDescription, ServiceSpec, ServiceStatus, TaskDefinition,
    TaskDefinitionRef,
};
use crate::error::BackendError;

const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
const LABEL_DISCOVERY: &str = "pushaas.io/discovery";
const LABEL_SERVICE: &str = "pushaas.io/service";
const LABEL_FAMILY: &str = "pushaas.io/family";
const LABEL_REVISION: &str = "pushaas.io/revision";
const ANNOTATION_TASK_DEFINITION: &str = "pushaas.io/task-definition";
const DEFINITION_KEY: &str = "definition.json";

pub struct KubeBackend {
    client: Client,
    namespace: String,
    tera: Tera,
}

impl KubeBackend {
    pub fn new(client: Client, namespace: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client,
            namespace: namespace.into(),
            tera: load_templates()?,
        })
    }

    /// Connect with the ambient kubeconfig or in-cluster credentials
    pub async fn try_default(namespace: impl Into<String>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;
        Self::new(client, namespace)
    }

    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn arn(&self, kind: &str, name: &str) -> String {
        format!("{}/{}/{}", self.namespace, kind, name)
    }

    async fn load_task_definition(&self, arn: &str) -> Result<TaskDefinition, BackendError> {
        let name = last_segment(arn);
        let config_map = self
            .api::<ConfigMap>()
            .get(name)
            .await
            .map_err(map_error("task definition", name))?;
        let raw = config_map
            .data
            .as_ref()
            .and_then(|data| data.get(DEFINITION_KEY))
            .ok_or_else(|| BackendError::Rejected(format!("task definition {} has no body", name)))?;
        serde_json::from_str(raw)
            .map_err(|e| BackendError::Rejected(format!("task definition {} is corrupt: {}", name, e)))
    }

    async fn next_revision(&self, family: &str) -> Result<u32, BackendError> {
        let existing = self
            .api::<ConfigMap>()
            .list(&ListParams::default().labels(&format!("{}={}", LABEL_FAMILY, family)))
            .await
            .map_err(map_error("task definition", family))?;
        let latest = existing
            .items
            .iter()
            .filter_map(|cm| cm.metadata.labels.as_ref()?.get(LABEL_REVISION)?.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        Ok(latest + 1)
    }

    async fn delete_ignoring_missing<K>(&self, kind: &'static str, name: &str) -> Result<(), BackendError>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        match self.api::<K>().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                tracing::debug!(kind, name, "already absent");
                Ok(())
            }
            Err(e) => Err(map_error(kind, name)(e)),
        }
    }
}

#[async_trait]
impl CloudBackend for KubeBackend {
    async fn get_execution_role(&self, name: &str) -> Result<ExecutionRole, BackendError> {
        // ServiceAccount names must be lowercase DNS labels
        let account = name.to_lowercase();
        let service_account = self
            .api::<ServiceAccount>()
            .get(&account)
            .await
            .map_err(map_error("service account", &account))?;
        let account = service_account.metadata.name.unwrap_or(account);
        Ok(ExecutionRole {
            name: name.to_string(),
            arn: self.arn("serviceaccount", &account),
        })
    }

    async fn create_discovery_service(
        &self,
        spec: &DiscoveryServiceSpec,
    ) -> Result<DiscoveryService, BackendError> {
        let service = render_discovery_service(&self.tera, &self.namespace, spec)?;
        let created = self
            .api::<Service>()
            .create(&PostParams::default(), &service)
            .await
            .map_err(map_error("discovery service", &spec.name))?;
        Ok(DiscoveryService {
            id: created.metadata.uid.unwrap_or_else(|| spec.name.clone()),
            name: spec.name.clone(),
            arn: self.arn("service", &spec.name),
        })
    }

    async fn find_discovery_service(
        &self,
        name: &str,
    ) -> Result<Option<DiscoveryService>, BackendError> {
        match self.api::<Service>().get(name).await {
            Ok(service) => Ok(Some(DiscoveryService {
                id: service.metadata.uid.unwrap_or_else(|| name.to_string()),
                name: name.to_string(),
                arn: self.arn("service", name),
            })),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(None),
            Err(e) => Err(map_error("discovery service", name)(e)),
        }
    }

    async fn list_discovery_instances(
        &self,
        service: &DiscoveryService,
    ) -> Result<Vec<String>, BackendError> {
        let pods = self
            .api::<Pod>()
            .list(&ListParams::default().labels(&format!("{}={}", LABEL_DISCOVERY, service.name)))
            .await
            .map_err(map_error("discovery instances", &service.name))?;
        Ok(pods.items.into_iter().filter_map(|pod| pod.metadata.name).collect())
    }

    async fn deregister_discovery_instance(
        &self,
        service: &DiscoveryService,
        instance_id: &str,
    ) -> Result<(), BackendError> {
        tracing::debug!(discovery = %service.name, pod = instance_id, "removing pod from discovery");
        let patch = serde_json::json!({
            "metadata": { "labels": { "pushaas.io/discovery": null } }
        });
        self.api::<Pod>()
            .patch(instance_id, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(map_error("discovery instance", instance_id))?;
        Ok(())
    }

    async fn delete_discovery_service(&self, service: &DiscoveryService) -> Result<(), BackendError> {
        self.api::<Service>()
            .delete(&service.name, &DeleteParams::default())
            .await
            .map_err(map_error("discovery service", &service.name))?;
        Ok(())
    }

    async fn register_task_definition(
        &self,
        definition: &TaskDefinition,
    ) -> Result<TaskDefinitionRef, BackendError> {
        let revision = self.next_revision(&definition.family).await?;
        let name = format!("{}-{}", definition.family, revision);
        let body = serde_json::to_string(definition)
            .map_err(|e| BackendError::Rejected(format!("cannot serialize task definition: {}", e)))?;

        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(BTreeMap::from([
                    (LABEL_MANAGED_BY.to_string(), "pushaas".to_string()),
                    (LABEL_FAMILY.to_string(), definition.family.clone()),
                    (LABEL_REVISION.to_string(), revision.to_string()),
                ])),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(DEFINITION_KEY.to_string(), body)])),
            ..Default::default()
        };

        self.api::<ConfigMap>()
            .create(&PostParams::default(), &config_map)
            .await
            .map_err(map_error("task definition", &name))?;

        Ok(TaskDefinitionRef {
            family: definition.family.clone(),
            revision,
            arn: self.arn("configmap", &name),
        })
    }

    async fn deregister_task_definition(&self, arn: &str) -> Result<(), BackendError> {
        let name = last_segment(arn);
        self.api::<ConfigMap>()
            .delete(name, &DeleteParams::default())
            .await
            .map_err(map_error("task definition", name))?;
        Ok(())
    }

    async fn list_task_definitions(
        &self,
        family: &str,
    ) -> Result<Vec<TaskDefinitionRef>, BackendError> {
        let config_maps = self
            .api::<ConfigMap>()
            .list(&ListParams::default().labels(&format!("{}={}", LABEL_FAMILY, family)))
            .await
            .map_err(map_error("task definition", family))?;
        let mut refs: Vec<TaskDefinitionRef> = config_maps
            .items
            .into_iter()
            .filter_map(|cm| {
                let revision = cm.metadata.labels.as_ref()?.get(LABEL_REVISION)?.parse().ok()?;
                let name = cm.metadata.name?;
                Some(TaskDefinitionRef {
                    family: family.to_string(),
                    revision,
                    arn: self.arn("configmap", &name),
                })
            })
            .collect();
        refs.sort_by_key(|r| r.revision);
        Ok(refs)
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<ServiceDescription, BackendError> {
        let definition = self.load_task_definition(&spec.task_definition_arn).await?;

        let deployment = render_deployment(&self.tera, &self.namespace, spec, &definition)?;
        self.api::<Deployment>()
            .create(&PostParams::default(), &deployment)
            .await
            .map_err(map_error("service", &spec.name))?;

        let ports: Vec<u16> = definition
            .containers
            .iter()
            .flat_map(|c| c.ports.iter().copied())
            .collect();
        if spec.assign_public_ip && !ports.is_empty() {
            let public = render_public_service(&self.tera, &self.namespace, spec, &ports)?;
            self.api::<Service>()
                .create(&PostParams::default(), &public)
                .await
                .map_err(map_error("public service", &spec.name))?;
        }

        Ok(ServiceDescription {
            name: spec.name.clone(),
            task_definition_arn: spec.task_definition_arn.clone(),
            status: ServiceStatus::Active,
            desired_count: spec.desired_count,
            running_count: 0,
        })
    }

    async fn describe_service(
        &self,
        name: &str,
    ) -> Result<Option<ServiceDescription>, BackendError> {
        let deployment = match self.api::<Deployment>().get(name).await {
            Ok(deployment) => deployment,
            Err(kube::Error::Api(response)) if response.code == 404 => return Ok(None),
            Err(e) => return Err(map_error("service", name)(e)),
        };
        Ok(Some(describe_deployment(name, &deployment)))
    }

    async fn scale_service(&self, name: &str, desired_count: u32) -> Result<(), BackendError> {
        let patch = serde_json::json!({ "spec": { "replicas": desired_count } });
        self.api::<Deployment>()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(map_error("service", name))?;
        Ok(())
    }

    async fn delete_service(&self, name: &str) -> Result<(), BackendError> {
        self.delete_ignoring_missing::<Service>("public service", &format!("{}-public", name))
            .await?;
        self.api::<Deployment>()
            .delete(name, &DeleteParams::foreground())
            .await
            .map_err(map_error("service", name))?;
        Ok(())
    }

    async fn describe_task_network_interface(
        &self,
        service_name: &str,
    ) -> Result<Option<NetworkInterface>, BackendError> {
        let pods = self
            .api::<Pod>()
            .list(&ListParams::default().labels(&format!("{}={}", LABEL_SERVICE, service_name)))
            .await
            .map_err(map_error("task", service_name))?;
        let Some(pod) = pods.items.into_iter().next() else {
            return Ok(None);
        };

        let public_name = format!("{}-public", service_name);
        let public_ip = match self.api::<Service>().get(&public_name).await {
            Ok(service) => load_balancer_ip(&service),
            Err(kube::Error::Api(response)) if response.code == 404 => None,
            Err(e) => return Err(map_error("public service", &public_name)(e)),
        };

        Ok(Some(NetworkInterface {
            id: pod.metadata.name.unwrap_or_default(),
            private_ip: pod.status.and_then(|s| s.pod_ip),
            public_ip,
        }))
    }

    fn discovery_host(&self, registration_name: &str) -> String {
        format!("{}.{}.svc.cluster.local", registration_name, self.namespace)
    }
}

/// Map a Kubernetes API failure onto the backend error taxonomy
fn map_error(kind: &'static str, name: &str) -> impl FnOnce(kube::Error) -> BackendError {
    let name = name.to_string();
    move |e| match e {
        kube::Error::Api(response) if response.code == 404 => BackendError::NotFound { kind, name },
        kube::Error::Api(response) if response.code == 409 || response.code == 422 => {
            BackendError::Rejected(format!("{} '{}': {}", kind, name, response.message))
        }
        other => BackendError::Transient(format!("{} '{}': {}", kind, name, other)),
    }
}

fn last_segment(arn: &str) -> &str {
    arn.rsplit('/').next().unwrap_or(arn)
}

fn load_balancer_ip(service: &Service) -> Option<String> {
    service
        .status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?
        .first()?
        .ip
        .clone()
}

fn describe_deployment(name: &str, deployment: &Deployment) -> ServiceDescription {
    let status = if deployment.metadata.deletion_timestamp.is_some() {
        ServiceStatus::Draining
    } else {
        ServiceStatus::Active
    };
    let desired_count = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1)
        .max(0) as u32;
    let running_count = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0)
        .max(0) as u32;
    let task_definition_arn = deployment
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_TASK_DEFINITION))
        .cloned()
        .unwrap_or_default();

    ServiceDescription {
        name: name.to_string(),
        task_definition_arn,
        status,
        desired_count,
        running_count,
    }
}

// ============================================================================
// Templates
// ============================================================================

fn load_templates() -> anyhow::Result<Tera> {
    let mut tera = Tera::default();
    tera.add_raw_template("deployment", include_str!("../templates/deployment.yaml"))?;
    tera.add_raw_template(
        "discovery-service",
        include_str!("../templates/discovery-service.yaml"),
    )?;
    tera.add_raw_template("public-service", include_str!("../templates/public-service.yaml"))?;
    Ok(tera)
}

fn render<T, C>(tera: &Tera, template: &str, context: &C) -> Result<T, BackendError>
where
    T: serde::de::DeserializeOwned,
    C: Serialize,
{
    let context = TeraContext::from_serialize(context)
        .map_err(|e| BackendError::Rejected(format!("bad {} context: {}", template, e)))?;
    let yaml = tera
        .render(template, &context)
        .map_err(|e| BackendError::Rejected(format!("failed to render {}: {}", template, e)))?;
    serde_yaml::from_str(&yaml)
        .map_err(|e| BackendError::Rejected(format!("rendered {} is not valid: {}", template, e)))
}

#[derive(Serialize)]
struct DiscoveryContext<'a> {
    name: &'a str,
    namespace: &'a str,
    namespace_id: &'a str,
    dns_ttl: u32,
    failure_threshold: u32,
}

fn render_discovery_service(
    tera: &Tera,
    namespace: &str,
    spec: &DiscoveryServiceSpec,
) -> Result<Service, BackendError> {
    render(
        tera,
        "discovery-service",
        &DiscoveryContext {
            name: &spec.name,
            namespace,
            namespace_id: &spec.namespace_id,
            dns_ttl: spec.dns_ttl,
            failure_threshold: spec.failure_threshold,
        },
    )
}

#[derive(Serialize)]
struct PublicServiceContext<'a> {
    name: &'a str,
    public_name: String,
    namespace: &'a str,
    security_group: &'a str,
    subnet: &'a str,
    ports: &'a [u16],
}

fn render_public_service(
    tera: &Tera,
    namespace: &str,
    spec: &ServiceSpec,
    ports: &[u16],
) -> Result<Service, BackendError> {
    render(
        tera,
        "public-service",
        &PublicServiceContext {
            name: &spec.name,
            public_name: format!("{}-public", spec.name),
            namespace,
            security_group: &spec.security_group,
            subnet: &spec.subnet,
            ports,
        },
    )
}

#[derive(Serialize)]
struct ContainerContext<'a> {
    name: &'a str,
    image: &'a str,
    cpu_millis: u32,
    memory_mib: u32,
    ports: &'a [u16],
    log: &'a LogConfiguration,
    environment: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
struct DeploymentContext<'a> {
    name: &'a str,
    namespace: &'a str,
    cluster: &'a str,
    task_definition_arn: &'a str,
    security_group: &'a str,
    subnet: &'a str,
    assign_public_ip: bool,
    desired_count: u32,
    discovery_name: &'a str,
    service_account: &'a str,
    start_order: String,
    containers: Vec<ContainerContext<'a>>,
}

fn render_deployment(
    tera: &Tera,
    namespace: &str,
    spec: &ServiceSpec,
    definition: &TaskDefinition,
) -> Result<Deployment, BackendError> {
    let share = definition.containers.len().max(1) as u32;
    let containers = definition
        .containers
        .iter()
        .map(|c| ContainerContext {
            name: &c.name,
            image: &c.image,
            cpu_millis: definition.cpu * 1000 / 1024 / share,
            memory_mib: definition.memory / share,
            ports: &c.ports,
            log: &c.log,
            environment: &c.environment,
        })
        .collect();
    let start_order = definition
        .containers
        .iter()
        .flat_map(|c| {
            c.depends_on
                .iter()
                .map(move |d| format!("{} after {}:{}", c.name, d.container_name, d.condition))
        })
        .collect::<Vec<_>>()
        .join(",");

    render(
        tera,
        "deployment",
        &DeploymentContext {
            name: &spec.name,
            namespace,
            cluster: &spec.cluster,
            task_definition_arn: &spec.task_definition_arn,
            security_group: &spec.security_group,
            subnet: &spec.subnet,
            assign_public_ip: spec.assign_public_ip,
            desired_count: spec.desired_count,
            discovery_name: last_segment(&spec.discovery_service_arn),
            service_account: last_segment(&definition.execution_role_arn),
            start_order,
            containers,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ContainerDefinition, ContainerDependency};

    fn log() -> LogConfiguration {
        LogConfiguration {
            region: "us-east-1".to_string(),
            group: "/pushaas".to_string(),
            stream_prefix: "pushaas".to_string(),
        }
    }

    fn stream_definition() -> TaskDefinition {
        TaskDefinition {
            family: "push-stream-acme".to_string(),
            cpu: 512,
            memory: 1024,
            execution_role_arn: "pushaas/serviceaccount/ecstaskexecutionrole".to_string(),
            containers: vec![
                ContainerDefinition {
                    name: "push-stream".to_string(),
                    image: "pushaas/push-stream:1".to_string(),
                    essential: true,
                    ports: vec![9080],
                    environment: BTreeMap::new(),
                    depends_on: Vec::new(),
                    log: log(),
                },
                ContainerDefinition {
                    name: "push-agent".to_string(),
                    image: "pushaas/push-agent:1".to_string(),
                    essential: true,
                    ports: Vec::new(),
                    environment: BTreeMap::from([(
                        "PUSHAGENT_REDIS__URL".to_string(),
                        "redis://push-redis-acme.pushaas.svc.cluster.local:6379".to_string(),
                    )]),
                    depends_on: vec![ContainerDependency {
                        container_name: "push-stream".to_string(),
                        condition: "START".to_string(),
                    }],
                    log: log(),
                },
            ],
        }
    }

    fn service_spec() -> ServiceSpec {
        ServiceSpec {
            name: "push-stream-acme".to_string(),
            cluster: "pushaas".to_string(),
            task_definition_arn: "pushaas/configmap/push-stream-acme-1".to_string(),
            desired_count: 1,
            discovery_service_arn: "pushaas/service/push-stream-acme".to_string(),
            security_group: "sg-1".to_string(),
            subnet: "subnet-1".to_string(),
            assign_public_ip: true,
        }
    }

    #[test]
    fn test_render_deployment() {
        let tera = load_templates().unwrap();
        let deployment =
            render_deployment(&tera, "pushaas", &service_spec(), &stream_definition()).unwrap();

        assert_eq!(deployment.metadata.name.as_deref(), Some("push-stream-acme"));
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));

        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.service_account_name.as_deref(), Some("ecstaskexecutionrole"));
        assert_eq!(pod.containers.len(), 2);
        assert_eq!(pod.containers[0].ports.as_ref().unwrap()[0].container_port, 9080);

        let agent_env = pod.containers[1].env.as_ref().unwrap();
        let redis_url = agent_env
            .iter()
            .find(|e| e.name == "PUSHAGENT_REDIS__URL")
            .and_then(|e| e.value.clone());
        assert_eq!(
            redis_url.as_deref(),
            Some("redis://push-redis-acme.pushaas.svc.cluster.local:6379")
        );

        let labels = spec.template.metadata.unwrap().labels.unwrap();
        assert_eq!(labels.get(LABEL_DISCOVERY).map(String::as_str), Some("push-stream-acme"));
    }

    #[test]
    fn test_render_discovery_service_is_headless() {
        let tera = load_templates().unwrap();
        let service = render_discovery_service(
            &tera,
            "pushaas",
            &DiscoveryServiceSpec::new("push-redis-acme", "tsuru"),
        )
        .unwrap();
        let spec = service.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        let annotations = service.metadata.annotations.unwrap();
        assert_eq!(annotations.get("pushaas.io/dns-ttl").map(String::as_str), Some("10"));
    }

    #[test]
    fn test_render_public_service_exposes_ports() {
        let tera = load_templates().unwrap();
        let service =
            render_public_service(&tera, "pushaas", &service_spec(), &[9080]).unwrap();
        assert_eq!(service.metadata.name.as_deref(), Some("push-stream-acme-public"));
        let spec = service.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("LoadBalancer"));
        assert_eq!(spec.ports.unwrap()[0].port, 9080);
    }

    #[test]
    fn test_rendered_values_stay_scalar() {
        let tera = load_templates().unwrap();
        let hostile = "push-redis-acme\n  evil: injected";
        let service =
            render_discovery_service(&tera, "pushaas", &DiscoveryServiceSpec::new(hostile, "tsuru"))
                .unwrap();
        assert_eq!(service.metadata.name.as_deref(), Some(hostile));
        let labels = service.metadata.labels.unwrap();
        assert_eq!(labels.get(LABEL_DISCOVERY).map(String::as_str), Some(hostile));
        assert!(!labels.contains_key("evil"));

        let mut definition = stream_definition();
        definition.containers[1]
            .environment
            .insert("PUSHAPI_API__BASIC_AUTH_PASSWORD".to_string(), "a: b\n- c".to_string());
        let deployment =
            render_deployment(&tera, "pushaas", &service_spec(), &definition).unwrap();
        let pod = deployment.spec.unwrap().template.spec.unwrap();
        let password = pod.containers[1]
            .env
            .as_ref()
            .unwrap()
            .iter()
            .find(|e| e.name == "PUSHAPI_API__BASIC_AUTH_PASSWORD")
            .and_then(|e| e.value.clone());
        assert_eq!(password.as_deref(), Some("a: b\n- c"));
    }

    #[test]
    fn test_last_segment() {
        assert_eq!(last_segment("pushaas/configmap/push-api-acme-3"), "push-api-acme-3");
        assert_eq!(last_segment("plain"), "plain");
    }
}
