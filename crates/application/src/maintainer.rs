//! Operation maintainer
//!
//! Periodic process that finishes what request handlers could not: executes
//! pending orphan mitigations, resumes polling for rescheduled operations
//! whose heartbeat went stale (server restart, dropped request), fails
//! operations that outlived the job timeout and garbage-collects terminal
//! operations past the retention window together with resources that never
//! became ready.

use crate::interceptor::{cancellation_pair, persist_operation, prepare_broker_target, CancelSignal};
use crate::poller::{OperationPoller, PollOutcome, PollTarget};
use crate::references;
use chrono::Utc;
use sm_core::{
    Object, Operation, OperationType, ResourceType, Result, ServiceInstance, SmError,
};
use sm_ports::{
    Criterion, DeprovisionRequest, OsbClientFactory, Repository, RepositoryError,
    TransactionalRepository, UnbindRequest,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct MaintainerSettings {
    /// Sweep cadence.
    pub reconciliation_interval: Duration,
    /// Heartbeats older than this mark an operation as stuck.
    pub stall_threshold: chrono::Duration,
    /// Operations older than this are failed instead of resumed.
    pub job_timeout: chrono::Duration,
    /// Terminal operations are garbage-collected after this window.
    pub operation_retention: chrono::Duration,
}

pub struct OperationMaintainer {
    repository: Arc<dyn TransactionalRepository>,
    clients: Arc<dyn OsbClientFactory>,
    poller: OperationPoller,
    settings: MaintainerSettings,
}

impl OperationMaintainer {
    pub fn new(
        repository: Arc<dyn TransactionalRepository>,
        clients: Arc<dyn OsbClientFactory>,
        polling_interval: Duration,
        settings: MaintainerSettings,
    ) -> Self {
        let poller = OperationPoller::new(repository.clone(), polling_interval);
        Self {
            repository,
            clients,
            poller,
            settings,
        }
    }

    pub async fn run(&self, mut shutdown: CancelSignal) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("maintainer shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.settings.reconciliation_interval) => {
                    if let Err(err) = self.sweep_once().await {
                        error!(error = %err, "maintainer sweep failed");
                    }
                }
            }
        }
    }

    pub async fn sweep_once(&self) -> Result<()> {
        self.mitigate_orphans().await?;
        self.resume_stalled().await?;
        self.collect_garbage().await?;
        Ok(())
    }

    /// Issue the pending deprovision/unbind for every operation carrying a
    /// `deletion_scheduled` timestamp, regardless of its previous type.
    async fn mitigate_orphans(&self) -> Result<()> {
        let operations = self.list_operations().await?;
        for operation in operations {
            if !operation.mitigation_pending() {
                continue;
            }
            let outcome = match operation.resource_type {
                ResourceType::ServiceInstance => self.mitigate_instance(&operation).await,
                ResourceType::ServiceBinding => self.mitigate_binding(&operation).await,
                other => {
                    warn!(resource_type = %other, "no orphan mitigation for resource type");
                    Ok(())
                }
            };
            match outcome {
                Ok(()) => self.complete_mitigation(&operation.id).await?,
                Err(err) => {
                    // Left scheduled; the next sweep retries.
                    warn!(
                        operation_id = %operation.id,
                        error = %err,
                        "orphan mitigation attempt failed"
                    );
                }
            }
        }
        Ok(())
    }

    async fn mitigate_instance(&self, operation: &Operation) -> Result<()> {
        let Some(instance) = self.find_instance(&operation.resource_id).await? else {
            // Nothing persisted locally; nothing to deprovision against.
            return Ok(());
        };
        if !instance.is_sm_platform() || instance.is_reference() {
            self.delete_instance_row(&instance.id).await?;
            return Ok(());
        }

        let target = prepare_broker_target(
            self.repository.as_ref(),
            self.clients.as_ref(),
            &instance.service_plan_id,
        )
        .await?;
        let request = DeprovisionRequest {
            instance_id: instance.id.clone(),
            service_id: target.offering.catalog_id.clone(),
            plan_id: target.plan.catalog_id.clone(),
        };
        info!(instance_id = %instance.id, "issuing orphan mitigation deprovision");
        match target.client.deprovision(&request).await {
            Err(err) if err.is_gone() => {}
            Err(err) => {
                return Err(SmError::broker(format!(
                    "orphan mitigation deprovision failed for instance {}: {err}",
                    instance.id
                )))
            }
            Ok(response) if response.is_async => {
                let mut poll_op = operation.clone();
                poll_op.external_id = response.operation_key;
                let poll_target = PollTarget {
                    instance_id: instance.id.clone(),
                    binding_id: None,
                    service_id: target.offering.catalog_id.clone(),
                    plan_id: target.plan.catalog_id.clone(),
                };
                let (_guard, cancel) = cancellation_pair();
                self.poller
                    .poll(target.client.as_ref(), &poll_target, &mut poll_op, false, cancel)
                    .await?;
            }
            Ok(_) => {}
        }

        self.delete_instance_row(&instance.id).await
    }

    async fn mitigate_binding(&self, operation: &Operation) -> Result<()> {
        let binding = match self
            .repository
            .get(
                ResourceType::ServiceBinding,
                &[Criterion::by_field("id", &operation.resource_id)],
            )
            .await
        {
            Ok(object) => object
                .into_service_binding()
                .ok_or_else(|| SmError::Internal("stored binding has wrong type".to_string()))?,
            Err(RepositoryError::NotFound(_)) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let Some(instance) = self.find_instance(&binding.service_instance_id).await? else {
            return Ok(());
        };
        let effective = references::effective_instance(self.repository.as_ref(), &instance).await?;
        let target = prepare_broker_target(
            self.repository.as_ref(),
            self.clients.as_ref(),
            &effective.service_plan_id,
        )
        .await?;
        let request = UnbindRequest {
            instance_id: effective.id.clone(),
            binding_id: binding.id.clone(),
            service_id: target.offering.catalog_id.clone(),
            plan_id: target.plan.catalog_id.clone(),
        };
        info!(binding_id = %binding.id, "issuing orphan mitigation unbind");
        match target.client.unbind(&request).await {
            Err(err) if err.is_gone() => {}
            Err(err) => {
                return Err(SmError::broker(format!(
                    "orphan mitigation unbind failed for binding {}: {err}",
                    binding.id
                )))
            }
            Ok(_) => {}
        }

        self.repository
            .delete(
                ResourceType::ServiceBinding,
                &[Criterion::by_field("id", &binding.id)],
            )
            .await
            .map_err(SmError::from)?;
        Ok(())
    }

    /// Re-read the row first: the mitigation poll may have advanced it.
    async fn complete_mitigation(&self, operation_id: &str) -> Result<()> {
        let mut operation = self
            .repository
            .get(
                ResourceType::Operation,
                &[Criterion::by_field("id", operation_id)],
            )
            .await
            .map_err(SmError::from)?
            .into_operation()
            .ok_or_else(|| SmError::Internal("stored operation has wrong type".to_string()))?;
        operation.deletion_scheduled = None;
        if !operation.is_terminal() {
            operation.succeed()?;
        }
        persist_operation(self.repository.as_ref(), &mut operation).await
    }

    /// Resume polling for rescheduled operations whose heartbeat is stale.
    async fn resume_stalled(&self) -> Result<()> {
        let now = Utc::now();
        let operations = self.list_operations().await?;
        for mut operation in operations {
            if operation.is_terminal()
                || !operation.reschedule
                || operation.mitigation_pending()
                || now - operation.updated_at < self.settings.stall_threshold
            {
                continue;
            }

            if now - operation.created_at > self.settings.job_timeout {
                info!(operation_id = %operation.id, "operation exceeded job timeout");
                if operation.op_type == OperationType::Create {
                    // The upstream resource may exist; mitigate before giving up.
                    operation.schedule_deletion();
                }
                operation.fail("operation timed out")?;
                persist_operation(self.repository.as_ref(), &mut operation).await?;
                continue;
            }

            if let Err(err) = self.resume_one(&mut operation).await {
                warn!(
                    operation_id = %operation.id,
                    error = %err,
                    "resuming stalled operation failed"
                );
            }
        }
        Ok(())
    }

    async fn resume_one(&self, operation: &mut Operation) -> Result<()> {
        let (instance, binding_id) = match operation.resource_type {
            ResourceType::ServiceInstance => {
                let Some(instance) = self.find_instance(&operation.resource_id).await? else {
                    return Ok(());
                };
                (instance, None)
            }
            ResourceType::ServiceBinding => {
                let binding = self
                    .repository
                    .get(
                        ResourceType::ServiceBinding,
                        &[Criterion::by_field("id", &operation.resource_id)],
                    )
                    .await
                    .map_err(SmError::from)?
                    .into_service_binding()
                    .ok_or_else(|| {
                        SmError::Internal("stored binding has wrong type".to_string())
                    })?;
                let Some(instance) = self.find_instance(&binding.service_instance_id).await?
                else {
                    return Ok(());
                };
                let effective =
                    references::effective_instance(self.repository.as_ref(), &instance).await?;
                (effective, Some(binding.id))
            }
            other => {
                warn!(resource_type = %other, "cannot resume operation for resource type");
                return Ok(());
            }
        };

        let target = prepare_broker_target(
            self.repository.as_ref(),
            self.clients.as_ref(),
            &instance.service_plan_id,
        )
        .await?;
        let poll_target = PollTarget {
            instance_id: instance.id.clone(),
            binding_id: binding_id.clone(),
            service_id: target.offering.catalog_id.clone(),
            plan_id: target.plan.catalog_id.clone(),
        };

        info!(operation_id = %operation.id, "resuming stalled operation");
        let (_guard, cancel) = cancellation_pair();
        let outcome = self
            .poller
            .poll(target.client.as_ref(), &poll_target, operation, true, cancel)
            .await?;
        if outcome != PollOutcome::Done {
            return Ok(());
        }

        match operation.op_type {
            OperationType::Delete => {
                let resource_type = operation.resource_type;
                self.repository
                    .delete(
                        resource_type,
                        &[Criterion::by_field("id", &operation.resource_id)],
                    )
                    .await
                    .map_err(SmError::from)?;
            }
            OperationType::Create | OperationType::Update => {
                let mut stored = self
                    .repository
                    .get(
                        operation.resource_type,
                        &[Criterion::by_field("id", &operation.resource_id)],
                    )
                    .await
                    .map_err(SmError::from)?;
                stored.set_ready(true);
                self.repository
                    .update(stored, vec![])
                    .await
                    .map_err(SmError::from)?;
            }
        }
        operation.succeed()?;
        persist_operation(self.repository.as_ref(), operation).await
    }

    /// Drop terminal operations past the retention window; a create whose
    /// resource never became ready takes the resource row with it.
    async fn collect_garbage(&self) -> Result<()> {
        let now = Utc::now();
        let operations = self.list_operations().await?;
        for operation in operations {
            if !operation.is_terminal()
                || now - operation.updated_at < self.settings.operation_retention
            {
                continue;
            }

            if operation.op_type == OperationType::Create {
                if let Some(instance) = self.find_instance(&operation.resource_id).await? {
                    if !instance.ready {
                        self.delete_instance_row(&instance.id).await?;
                    }
                }
            }

            self.repository
                .delete(
                    ResourceType::Operation,
                    &[Criterion::by_field("id", &operation.id)],
                )
                .await
                .map_err(SmError::from)?;
            info!(operation_id = %operation.id, "garbage-collected operation");
        }
        Ok(())
    }

    async fn list_operations(&self) -> Result<Vec<Operation>> {
        let objects = self
            .repository
            .list(ResourceType::Operation, &[])
            .await
            .map_err(SmError::from)?;
        Ok(objects
            .into_iter()
            .filter_map(Object::into_operation)
            .collect())
    }

    async fn find_instance(&self, id: &str) -> Result<Option<ServiceInstance>> {
        match self
            .repository
            .get(
                ResourceType::ServiceInstance,
                &[Criterion::by_field("id", id)],
            )
            .await
        {
            Ok(object) => Ok(object.into_service_instance()),
            Err(RepositoryError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_instance_row(&self, id: &str) -> Result<()> {
        self.repository
            .delete(
                ResourceType::ServiceInstance,
                &[Criterion::by_field("id", id)],
            )
            .await
            .map_err(SmError::from)?;
        Ok(())
    }
}
