//! Broker cascade deletion
//!
//! The children of a broker are described by a data-driven table of
//! (child type, criteria) pairs derived from its persisted offerings and
//! plans, evaluated in dependency order. Instances go through the
//! orchestrated delete (so upstream resources are deprovisioned); the
//! remaining children are plain row deletions. Broker deprovisions are
//! bounded by `max_parallel_deletions`.

use crate::controller::ResourceController;
use crate::interceptor::cancellation_pair;
use sm_core::{OperationType, ResourceType, Result, SmError};
use sm_ports::{Criterion, Repository, TransactionalRepository};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info};

pub struct CascadeDescriptor {
    pub resource_type: ResourceType,
    pub criteria: Vec<Criterion>,
}

/// Child criteria for one broker, leaves first.
pub async fn broker_children_criteria(
    repository: &dyn Repository,
    broker_id: &str,
) -> Result<Vec<CascadeDescriptor>> {
    let offerings = repository
        .list(
            ResourceType::ServiceOffering,
            &[Criterion::by_field("broker_id", broker_id)],
        )
        .await
        .map_err(SmError::from)?;
    let offering_ids: Vec<String> = offerings
        .iter()
        .map(|object| object.id().to_string())
        .collect();

    let plans = repository
        .list(
            ResourceType::ServicePlan,
            &[Criterion::by_field_in(
                "service_offering_id",
                offering_ids.clone(),
            )],
        )
        .await
        .map_err(SmError::from)?;
    let plan_ids: Vec<String> = plans.iter().map(|object| object.id().to_string()).collect();

    let instances = repository
        .list(
            ResourceType::ServiceInstance,
            &[Criterion::by_field_in("service_plan_id", plan_ids.clone())],
        )
        .await
        .map_err(SmError::from)?;
    let instance_ids: Vec<String> = instances
        .iter()
        .map(|object| object.id().to_string())
        .collect();

    Ok(vec![
        CascadeDescriptor {
            resource_type: ResourceType::ServiceBinding,
            criteria: vec![Criterion::by_field_in("service_instance_id", instance_ids)],
        },
        CascadeDescriptor {
            resource_type: ResourceType::ServiceInstance,
            criteria: vec![Criterion::by_field_in("service_plan_id", plan_ids.clone())],
        },
        CascadeDescriptor {
            resource_type: ResourceType::Visibility,
            criteria: vec![Criterion::by_field_in("service_plan_id", plan_ids.clone())],
        },
        CascadeDescriptor {
            resource_type: ResourceType::ServicePlan,
            criteria: vec![Criterion::by_field_in("id", plan_ids)],
        },
        CascadeDescriptor {
            resource_type: ResourceType::ServiceOffering,
            criteria: vec![Criterion::by_field_in("id", offering_ids)],
        },
    ])
}

pub struct CascadeDeleter {
    repository: Arc<dyn TransactionalRepository>,
    controller: Arc<ResourceController>,
    max_parallel_deletions: usize,
}

impl CascadeDeleter {
    pub fn new(
        repository: Arc<dyn TransactionalRepository>,
        controller: Arc<ResourceController>,
        max_parallel_deletions: usize,
    ) -> Self {
        Self {
            repository,
            controller,
            max_parallel_deletions,
        }
    }

    pub async fn delete_broker(&self, broker_id: &str) -> Result<()> {
        let descriptors = broker_children_criteria(self.repository.as_ref(), broker_id).await?;

        for descriptor in descriptors {
            match descriptor.resource_type {
                ResourceType::ServiceInstance => {
                    self.delete_instances(&descriptor.criteria).await?;
                }
                other => {
                    self.repository
                        .delete(other, &descriptor.criteria)
                        .await
                        .map_err(SmError::from)?;
                }
            }
        }

        self.repository
            .delete(
                ResourceType::ServiceBroker,
                &[Criterion::by_field("id", broker_id)],
            )
            .await
            .map_err(SmError::from)?;
        info!(broker_id, "cascade deletion finished");
        Ok(())
    }

    /// Deprovision every instance through the orchestrated delete, at most
    /// `max_parallel_deletions` at a time.
    async fn delete_instances(&self, criteria: &[Criterion]) -> Result<()> {
        let instances = self
            .repository
            .list(ResourceType::ServiceInstance, criteria)
            .await
            .map_err(SmError::from)?;

        let semaphore = Arc::new(Semaphore::new(self.max_parallel_deletions));
        let mut tasks = Vec::new();
        for object in instances {
            let id = object.id().to_string();
            let semaphore = semaphore.clone();
            let controller = self.controller.clone();
            tasks.push(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| SmError::Internal(e.to_string()))?;
                let mut operation = controller
                    .claim_operation(
                        OperationType::Delete,
                        ResourceType::ServiceInstance,
                        &id,
                    )
                    .await?;
                let (cancel_guard, cancel) = cancellation_pair();
                let result = controller
                    .delete(
                        ResourceType::ServiceInstance,
                        vec![Criterion::by_field("id", &id)],
                        &mut operation,
                        cancel,
                    )
                    .await;
                drop(cancel_guard);
                if let Err(err) = &result {
                    error!(instance_id = %id, error = %err, "cascade instance deletion failed");
                }
                result.map(|_| ())
            });
        }

        let results = futures::future::join_all(tasks).await;
        for result in results {
            result?;
        }
        Ok(())
    }
}
