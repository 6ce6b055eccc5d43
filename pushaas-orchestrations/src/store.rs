//! Instance persistence
//!
//! The record is written by the task queue worker and the instance service
//! only. `MemoryInstanceStore` backs tests and database-less runs; the
//! Postgres store lives in [`crate::cms`].

use async_trait::async_trait;
use chrono::Utc;
use pushaas_models::{AppBinding, Instance};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::error::StoreError;

#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// `StoreError::NotFound` if no record exists
    async fn get(&self, name: &str) -> Result<Instance, StoreError>;

    /// Store a new record, `StoreError::AlreadyExists` if the name is taken
    async fn insert(&self, instance: &Instance) -> Result<(), StoreError>;

    /// Upsert
    async fn save(&self, instance: &Instance) -> Result<(), StoreError>;

    /// Replace only the app bindings of a record.
    ///
    /// Status and connection variables are left untouched; those belong to
    /// the task queue worker.
    async fn save_bindings(&self, name: &str, bindings: &[AppBinding]) -> Result<(), StoreError>;

    /// `StoreError::NotFound` if no record exists
    async fn delete(&self, name: &str) -> Result<(), StoreError>;

    /// All records ordered by name
    async fn list(&self) -> Result<Vec<Instance>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryInstanceStore {
    instances: RwLock<BTreeMap<String, Instance>>,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceStore for MemoryInstanceStore {
    async fn get(&self, name: &str) -> Result<Instance, StoreError> {
        self.instances
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn insert(&self, instance: &Instance) -> Result<(), StoreError> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(&instance.name) {
            return Err(StoreError::AlreadyExists(instance.name.clone()));
        }
        instances.insert(instance.name.clone(), instance.clone());
        Ok(())
    }

    async fn save(&self, instance: &Instance) -> Result<(), StoreError> {
        self.instances
            .write()
            .await
            .insert(instance.name.clone(), instance.clone());
        Ok(())
    }

    async fn save_bindings(&self, name: &str, bindings: &[AppBinding]) -> Result<(), StoreError> {
        let mut instances = self.instances.write().await;
        let instance = instances
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        instance.bindings = bindings.to_vec();
        instance.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.instances
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn list(&self) -> Result<Vec<Instance>, StoreError> {
        Ok(self.instances.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushaas_models::{InstanceForm, InstanceStatus};

    fn instance(name: &str) -> Instance {
        Instance::from_form(&InstanceForm {
            name: name.to_string(),
            plan: "small".to_string(),
            team: "core".to_string(),
            user: "dev@example.com".to_string(),
        })
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryInstanceStore::new();
        assert!(matches!(store.get("acme").await, Err(StoreError::NotFound(name)) if name == "acme"));
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_names() {
        let store = MemoryInstanceStore::new();
        store.insert(&instance("acme")).await.unwrap();

        let err = store.insert(&instance("acme")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let store = MemoryInstanceStore::new();
        let mut acme = instance("acme");
        store.insert(&acme).await.unwrap();

        acme.transition(InstanceStatus::Running).unwrap();
        store.save(&acme).await.unwrap();

        assert_eq!(store.get("acme").await.unwrap().status, InstanceStatus::Running);
    }

    #[tokio::test]
    async fn test_save_bindings_leaves_lifecycle_fields() {
        let store = MemoryInstanceStore::new();
        let mut acme = instance("acme");
        store.insert(&acme).await.unwrap();

        let binding = AppBinding {
            app_name: "web".to_string(),
            app_host: "web.example.com".to_string(),
            ..Default::default()
        };
        store.save_bindings("acme", &[binding.clone()]).await.unwrap();

        acme = store.get("acme").await.unwrap();
        assert_eq!(acme.bindings, vec![binding]);
        assert_eq!(acme.status, InstanceStatus::Pending);
        assert!(matches!(store.save_bindings("zeta", &[]).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let store = MemoryInstanceStore::new();
        store.insert(&instance("zeta")).await.unwrap();
        store.insert(&instance("acme")).await.unwrap();

        let names: Vec<String> = store.list().await.unwrap().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["acme", "zeta"]);

        store.delete("acme").await.unwrap();
        assert!(matches!(store.delete("acme").await, Err(StoreError::NotFound(_))));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
