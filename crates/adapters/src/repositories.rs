//! In-memory repository implementation
//!
//! Backs the repository port with per-type maps behind an async RwLock.
//! Optimistic concurrency compares the caller's `updated_at` against the
//! stored row; a mismatch is a retriable conflict. Transactions are
//! best-effort: the closure runs against the same store (a SQL adapter would
//! supply real atomicity behind the same port).

use async_trait::async_trait;
use chrono::Utc;
use sm_core::{apply_label_changes, LabelChange, Object, ResourceType};
use sm_ports::{Criterion, Repository, RepositoryError, TransactionalRepository, TxWork};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

type Store = HashMap<ResourceType, HashMap<String, Object>>;

#[derive(Clone, Default)]
pub struct InMemoryRepository {
    store: Arc<RwLock<Store>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches_all(object: &Object, criteria: &[Criterion]) -> bool {
        criteria.iter().all(|criterion| criterion.matches(object))
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get(
        &self,
        resource_type: ResourceType,
        criteria: &[Criterion],
    ) -> Result<Object, RepositoryError> {
        let store = self.store.read().await;
        store
            .get(&resource_type)
            .and_then(|objects| {
                objects
                    .values()
                    .find(|object| Self::matches_all(object, criteria))
            })
            .cloned()
            .ok_or(RepositoryError::NotFound(resource_type))
    }

    async fn list(
        &self,
        resource_type: ResourceType,
        criteria: &[Criterion],
    ) -> Result<Vec<Object>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store
            .get(&resource_type)
            .map(|objects| {
                objects
                    .values()
                    .filter(|object| Self::matches_all(object, criteria))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count(
        &self,
        resource_type: ResourceType,
        criteria: &[Criterion],
    ) -> Result<usize, RepositoryError> {
        let store = self.store.read().await;
        Ok(store
            .get(&resource_type)
            .map(|objects| {
                objects
                    .values()
                    .filter(|object| Self::matches_all(object, criteria))
                    .count()
            })
            .unwrap_or(0))
    }

    async fn create(&self, object: Object) -> Result<Object, RepositoryError> {
        let mut store = self.store.write().await;
        let objects = store.entry(object.resource_type()).or_default();
        let id = object.id().to_string();
        if objects.contains_key(&id) {
            return Err(RepositoryError::AlreadyExists(id));
        }
        debug!(resource_type = %object.resource_type(), id = %id, "created resource");
        objects.insert(id, object.clone());
        Ok(object)
    }

    async fn update(
        &self,
        mut object: Object,
        label_changes: Vec<LabelChange>,
    ) -> Result<Object, RepositoryError> {
        let resource_type = object.resource_type();
        let mut store = self.store.write().await;
        let objects = store
            .get_mut(&resource_type)
            .ok_or(RepositoryError::NotFound(resource_type))?;
        let id = object.id().to_string();
        let stored = objects
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound(resource_type))?;

        if stored.updated_at() != object.updated_at() {
            return Err(RepositoryError::Concurrency { resource_type, id });
        }

        if let Some(labels) = object.labels_mut() {
            apply_label_changes(labels, label_changes);
        }
        object.touch(Utc::now());
        *stored = object.clone();
        debug!(resource_type = %resource_type, id = %id, "updated resource");
        Ok(object)
    }

    async fn delete(
        &self,
        resource_type: ResourceType,
        criteria: &[Criterion],
    ) -> Result<usize, RepositoryError> {
        let mut store = self.store.write().await;
        let Some(objects) = store.get_mut(&resource_type) else {
            return Ok(0);
        };
        let doomed: Vec<String> = objects
            .values()
            .filter(|object| Self::matches_all(object, criteria))
            .map(|object| object.id().to_string())
            .collect();
        for id in &doomed {
            objects.remove(id);
        }
        debug!(resource_type = %resource_type, removed = doomed.len(), "deleted resources");
        Ok(doomed.len())
    }
}

#[async_trait]
impl TransactionalRepository for InMemoryRepository {
    async fn in_transaction(&self, work: TxWork) -> Result<(), RepositoryError> {
        work(Arc::new(self.clone())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sm_core::{Operation, OperationType, ServiceInstance, SERVICE_MANAGER_PLATFORM};

    fn instance(id: &str, plan: &str) -> Object {
        Object::from(ServiceInstance::new(id, id, plan, SERVICE_MANAGER_PLATFORM))
    }

    #[tokio::test]
    async fn get_returns_not_found_sentinel() {
        let repo = InMemoryRepository::new();
        let err = repo
            .get(
                ResourceType::ServiceInstance,
                &[Criterion::by_field("id", "missing")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_and_count_filter_by_criteria() {
        let repo = InMemoryRepository::new();
        repo.create(instance("i-1", "plan-a")).await.unwrap();
        repo.create(instance("i-2", "plan-a")).await.unwrap();
        repo.create(instance("i-3", "plan-b")).await.unwrap();

        let by_plan = [Criterion::by_field("service_plan_id", "plan-a")];
        assert_eq!(
            repo.list(ResourceType::ServiceInstance, &by_plan)
                .await
                .unwrap()
                .len(),
            2
        );
        assert_eq!(
            repo.count(ResourceType::ServiceInstance, &by_plan)
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let repo = InMemoryRepository::new();
        repo.create(instance("i-1", "plan-a")).await.unwrap();
        let err = repo.create(instance("i-1", "plan-a")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn stale_update_returns_concurrency_conflict() {
        let repo = InMemoryRepository::new();
        let op = Operation::new(
            OperationType::Create,
            ResourceType::ServiceInstance,
            "i-1",
        );
        let created = repo.create(Object::from(op)).await.unwrap();

        // First writer wins and advances updated_at.
        let fresh = repo.update(created.clone(), vec![]).await.unwrap();
        assert!(fresh.updated_at() > created.updated_at());

        // Second writer still holds the old version.
        let err = repo.update(created, vec![]).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Concurrency { .. }));
    }

    #[tokio::test]
    async fn delete_returns_removed_count() {
        let repo = InMemoryRepository::new();
        repo.create(instance("i-1", "plan-a")).await.unwrap();
        repo.create(instance("i-2", "plan-a")).await.unwrap();

        let removed = repo
            .delete(
                ResourceType::ServiceInstance,
                &[Criterion::by_field("service_plan_id", "plan-a")],
            )
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(
            repo.count(ResourceType::ServiceInstance, &[]).await.unwrap(),
            0
        );
    }
}
