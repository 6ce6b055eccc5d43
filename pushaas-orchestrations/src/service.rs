//! Instance service
//!
//! The broker-facing operations: create and delete enqueue work for the
//! task queue worker, status and bindings read or annotate the stored record.

use pushaas_models::{
    AppBinding, BindAppForm, BindUnitForm, Instance, InstanceForm, InstanceStatus, Plan,
};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ServiceError;
use crate::queue::{enqueue_json, JobKind, JobQueue};
use crate::store::InstanceStore;
use crate::types::{DeprovisionJob, ProvisionJob};

#[derive(Clone)]
pub struct InstanceService {
    store: Arc<dyn InstanceStore>,
    queue: Arc<dyn JobQueue>,
}

impl InstanceService {
    pub fn new(store: Arc<dyn InstanceStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { store, queue }
    }

    pub fn plans(&self) -> Vec<Plan> {
        vec![Plan::small()]
    }

    /// Save a `Pending` record and enqueue its provision
    pub async fn create(&self, form: &InstanceForm) -> Result<Instance, ServiceError> {
        form.validate()?;

        let instance = Instance::from_form(form);
        self.store.insert(&instance).await?;

        let job = ProvisionJob {
            instance_name: instance.name.clone(),
        };
        let job_id = enqueue_json(self.queue.as_ref(), JobKind::Provision, &job).await?;
        tracing::info!(instance = %instance.name, job_id = %job_id, "Instance creation requested");
        Ok(instance)
    }

    /// Enqueue the teardown of an existing instance
    pub async fn delete(&self, name: &str) -> Result<(), ServiceError> {
        let instance = self.store.get(name).await?;

        let job = DeprovisionJob {
            instance_name: instance.name.clone(),
        };
        let job_id = enqueue_json(self.queue.as_ref(), JobKind::Deprovision, &job).await?;
        tracing::info!(instance = %name, job_id = %job_id, "Instance deletion requested");
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Instance, ServiceError> {
        Ok(self.store.get(name).await?)
    }

    pub async fn list(&self) -> Result<Vec<Instance>, ServiceError> {
        Ok(self.store.list().await?)
    }

    pub async fn status(&self, name: &str) -> Result<InstanceStatus, ServiceError> {
        Ok(self.store.get(name).await?.status)
    }

    /// Bind an app and hand back the connection variables
    pub async fn bind_app(
        &self,
        name: &str,
        form: &BindAppForm,
    ) -> Result<BTreeMap<String, String>, ServiceError> {
        let mut instance = self.store.get(name).await?;
        match instance.status {
            InstanceStatus::Pending => return Err(ServiceError::Pending(instance.name)),
            InstanceStatus::Failed => return Err(ServiceError::Failed(instance.name)),
            InstanceStatus::Running => {}
        }
        if instance.binding(&form.app_name).is_some() {
            return Err(ServiceError::AlreadyBound {
                instance: instance.name,
                app: form.app_name.clone(),
            });
        }

        instance.bindings.push(AppBinding {
            app_name: form.app_name.clone(),
            app_host: form.app_host.clone(),
            ..Default::default()
        });
        self.store.save_bindings(name, &instance.bindings).await?;
        tracing::info!(instance = %name, app = %form.app_name, "App bound");
        Ok(instance.variables)
    }

    pub async fn unbind_app(&self, name: &str, form: &BindAppForm) -> Result<(), ServiceError> {
        let mut instance = self.store.get(name).await?;
        let before = instance.bindings.len();
        instance.bindings.retain(|b| b.app_name != form.app_name);
        if instance.bindings.len() == before {
            return Err(ServiceError::NotBound {
                instance: instance.name,
                app: form.app_name.clone(),
            });
        }

        self.store.save_bindings(name, &instance.bindings).await?;
        tracing::info!(instance = %name, app = %form.app_name, "App unbound");
        Ok(())
    }

    /// Record a unit host under an already bound app
    pub async fn bind_unit(&self, name: &str, form: &BindUnitForm) -> Result<(), ServiceError> {
        let mut instance = self.store.get(name).await?;
        let binding = instance
            .binding_mut(&form.app_name)
            .ok_or_else(|| ServiceError::NotBound {
                instance: name.to_string(),
                app: form.app_name.clone(),
            })?;
        if !binding.units.insert(form.unit_host.clone()) {
            return Ok(());
        }

        self.store.save_bindings(name, &instance.bindings).await?;
        tracing::debug!(instance = %name, app = %form.app_name, unit = %form.unit_host, "unit bound");
        Ok(())
    }

    /// Unknown units are ignored
    pub async fn unbind_unit(&self, name: &str, form: &BindUnitForm) -> Result<(), ServiceError> {
        let mut instance = self.store.get(name).await?;
        let removed = instance
            .binding_mut(&form.app_name)
            .map(|binding| binding.units.remove(&form.unit_host))
            .unwrap_or(false);
        if !removed {
            return Ok(());
        }

        self.store.save_bindings(name, &instance.bindings).await?;
        tracing::debug!(instance = %name, app = %form.app_name, unit = %form.unit_host, "unit unbound");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryJobQueue;
    use crate::store::MemoryInstanceStore;
    use pushaas_models::{CompletionPolicy, ValidationError};

    struct Fixture {
        service: InstanceService,
        store: Arc<MemoryInstanceStore>,
        queue: Arc<MemoryJobQueue>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryInstanceStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        Fixture {
            service: InstanceService::new(store.clone(), queue.clone()),
            store,
            queue,
        }
    }

    fn form(name: &str) -> InstanceForm {
        InstanceForm {
            name: name.to_string(),
            plan: "small".to_string(),
            team: "core".to_string(),
            user: "dev@example.com".to_string(),
        }
    }

    fn app(name: &str) -> BindAppForm {
        BindAppForm {
            app_name: name.to_string(),
            app_host: format!("{}.example.com", name),
        }
    }

    fn unit(app_name: &str, host: &str) -> BindUnitForm {
        BindUnitForm {
            app_name: app_name.to_string(),
            app_host: format!("{}.example.com", app_name),
            unit_host: host.to_string(),
        }
    }

    async fn running(f: &Fixture, name: &str) {
        let mut instance = f.service.create(&form(name)).await.unwrap();
        instance
            .apply_completion(
                InstanceStatus::Running,
                BTreeMap::from([("PUSHAAS_USERNAME".to_string(), name.to_string())]),
                CompletionPolicy::LastWriteWins,
            )
            .unwrap();
        f.store.save(&instance).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_saves_pending_and_enqueues_provision() {
        let f = fixture();
        let instance = f.service.create(&form("acme")).await.unwrap();

        assert_eq!(instance.status, InstanceStatus::Pending);
        assert_eq!(f.service.status("acme").await.unwrap(), InstanceStatus::Pending);

        let queued = f.queue.pending();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].kind, "pushaas::job::provision");
        assert_eq!(queued[0].payload, serde_json::json!({"instance_name": "acme"}));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_and_duplicate() {
        let f = fixture();
        let err = f.service.create(&form("push-redis-acme")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Invalid(ValidationError::ReservedPrefix(_))));

        f.service.create(&form("acme")).await.unwrap();
        let err = f.service.create(&form("acme")).await.unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyExists(_)));
        assert_eq!(f.queue.pending().len(), 1);
    }

    #[tokio::test]
    async fn test_unsafe_names_leave_no_trace() {
        let f = fixture();
        let long = "a".repeat(80);
        for name in ["Acme_Prod", "acme\n  evil: injected", long.as_str()] {
            let err = f.service.create(&form(name)).await.unwrap_err();
            assert!(matches!(err, ServiceError::Invalid(_)), "{:?}", name);
        }
        assert!(f.service.list().await.unwrap().is_empty());
        assert!(f.queue.pending().is_empty());
    }

    #[tokio::test]
    async fn test_delete_requires_existing_instance() {
        let f = fixture();
        assert!(matches!(f.service.delete("acme").await, Err(ServiceError::NotFound(_))));

        f.service.create(&form("acme")).await.unwrap();
        f.service.delete("acme").await.unwrap();
        assert_eq!(f.queue.pending()[1].kind, "pushaas::job::deprovision");
    }

    #[tokio::test]
    async fn test_bind_app_depends_on_status() {
        let f = fixture();
        f.service.create(&form("acme")).await.unwrap();
        assert!(matches!(
            f.service.bind_app("acme", &app("web")).await,
            Err(ServiceError::Pending(_))
        ));

        running(&f, "zeta").await;
        let vars = f.service.bind_app("zeta", &app("web")).await.unwrap();
        assert_eq!(vars["PUSHAAS_USERNAME"], "zeta");
        assert!(matches!(
            f.service.bind_app("zeta", &app("web")).await,
            Err(ServiceError::AlreadyBound { .. })
        ));
    }

    #[tokio::test]
    async fn test_bind_app_on_failed_instance() {
        let f = fixture();
        let mut instance = f.service.create(&form("acme")).await.unwrap();
        instance.transition(InstanceStatus::Failed).unwrap();
        f.store.save(&instance).await.unwrap();

        assert!(matches!(
            f.service.bind_app("acme", &app("web")).await,
            Err(ServiceError::Failed(_))
        ));
    }

    #[tokio::test]
    async fn test_units_are_tracked_per_app() {
        let f = fixture();
        running(&f, "acme").await;
        f.service.bind_app("acme", &app("web")).await.unwrap();

        f.service.bind_unit("acme", &unit("web", "10.0.0.1")).await.unwrap();
        f.service.bind_unit("acme", &unit("web", "10.0.0.2")).await.unwrap();
        f.service.unbind_unit("acme", &unit("web", "10.0.0.1")).await.unwrap();
        f.service.unbind_unit("acme", &unit("web", "10.9.9.9")).await.unwrap();

        let instance = f.service.get("acme").await.unwrap();
        let units: Vec<&String> = instance.binding("web").unwrap().units.iter().collect();
        assert_eq!(units, vec!["10.0.0.2"]);

        assert!(matches!(
            f.service.bind_unit("acme", &unit("api", "10.0.0.3")).await,
            Err(ServiceError::NotBound { .. })
        ));
    }

    #[tokio::test]
    async fn test_unbind_app() {
        let f = fixture();
        running(&f, "acme").await;
        f.service.bind_app("acme", &app("web")).await.unwrap();

        f.service.unbind_app("acme", &app("web")).await.unwrap();
        assert!(f.service.get("acme").await.unwrap().bindings.is_empty());
        assert!(matches!(
            f.service.unbind_app("acme", &app("web")).await,
            Err(ServiceError::NotBound { .. })
        ));
    }

    #[test]
    fn test_single_plan() {
        let f = fixture();
        let plans = f.service.plans();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].name, "small");
    }
}
