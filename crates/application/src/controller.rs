//! Resource controller
//!
//! Outer handler logic shared by the HTTP surface, the maintainer and the
//! cascade deleter: claims the per-resource operation, runs the registered
//! around-transaction interceptor with a transactional persistence hook and
//! records the terminal outcome. At most one non-terminal operation exists
//! per resource; a second claimer gets a conflict.

use crate::interceptor::{
    persist_operation, CancelSignal, CreateHook, DeleteHook, InterceptorRegistry, UpdateHook,
};
use sm_core::{LabelChange, Object, Operation, OperationType, ResourceType, Result, SmError};
use sm_ports::{Criterion, Repository, RepositoryError, TransactionalRepository};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

pub struct ResourceController {
    repository: Arc<dyn TransactionalRepository>,
    registry: Arc<InterceptorRegistry>,
}

impl ResourceController {
    pub fn new(
        repository: Arc<dyn TransactionalRepository>,
        registry: Arc<InterceptorRegistry>,
    ) -> Self {
        Self {
            repository,
            registry,
        }
    }

    pub fn repository(&self) -> Arc<dyn TransactionalRepository> {
        self.repository.clone()
    }

    /// Bind a new operation to the resource. Fails with
    /// `AsyncOperationInProgress` when a non-terminal operation already
    /// exists for it.
    pub async fn claim_operation(
        &self,
        op_type: OperationType,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<Operation> {
        let existing = self
            .repository
            .list(
                ResourceType::Operation,
                &[
                    Criterion::by_field("resource_id", resource_id),
                    Criterion::by_field("resource_type", resource_type.to_string()),
                ],
            )
            .await
            .map_err(SmError::from)?;
        if existing
            .iter()
            .filter_map(Object::as_operation)
            .any(|op| !op.is_terminal())
        {
            return Err(SmError::async_operation_in_progress(resource_id));
        }

        let operation = Operation::new(op_type, resource_type, resource_id);
        let created = self
            .repository
            .create(Object::from(operation))
            .await
            .map_err(SmError::from)?;
        created
            .into_operation()
            .ok_or_else(|| SmError::Internal("stored operation has wrong type".to_string()))
    }

    pub async fn create(
        &self,
        object: Object,
        operation: &mut Operation,
        cancel: CancelSignal,
    ) -> Result<Object> {
        let fallback = object.clone();
        let hook = self.create_hook();

        let result = match self.registry.create_for(object.resource_type()) {
            Some(interceptor) => {
                interceptor
                    .around_tx_create(object, operation, hook, cancel)
                    .await
            }
            None => hook(object).await,
        };

        match result {
            Ok(created) => {
                if operation.reschedule {
                    // Accepted asynchronously or suspended by cancellation;
                    // the operation stays in progress.
                    return Ok(created);
                }
                operation.succeed()?;
                persist_operation(self.repository.as_ref(), operation).await?;
                self.mark_resource_ready(&created).await
            }
            Err(err) => {
                self.keep_mitigation_target(operation, fallback).await;
                self.record_failure(operation, &err).await;
                Err(err)
            }
        }
    }

    pub async fn update(
        &self,
        object: Object,
        label_changes: Vec<LabelChange>,
        operation: &mut Operation,
        cancel: CancelSignal,
    ) -> Result<Object> {
        let hook = self.update_hook(label_changes);

        let result = match self.registry.update_for(object.resource_type()) {
            Some(interceptor) => {
                interceptor
                    .around_tx_update(object, operation, hook, cancel)
                    .await
            }
            None => hook(object).await,
        };

        match result {
            Ok(updated) => {
                if operation.reschedule {
                    return Ok(updated);
                }
                operation.succeed()?;
                persist_operation(self.repository.as_ref(), operation).await?;
                self.mark_resource_ready(&updated).await
            }
            Err(err) => {
                self.record_failure(operation, &err).await;
                Err(err)
            }
        }
    }

    pub async fn delete(
        &self,
        resource_type: ResourceType,
        criteria: Vec<Criterion>,
        operation: &mut Operation,
        cancel: CancelSignal,
    ) -> Result<usize> {
        let hook = self.delete_hook(resource_type);

        let result = match self.registry.delete_for(resource_type) {
            Some(interceptor) => {
                interceptor
                    .around_tx_delete(criteria, operation, hook, cancel)
                    .await
            }
            None => hook(criteria).await,
        };

        match result {
            Ok(removed) => {
                if operation.reschedule {
                    return Ok(removed);
                }
                operation.succeed()?;
                persist_operation(self.repository.as_ref(), operation).await?;
                Ok(removed)
            }
            Err(err) => {
                self.record_failure(operation, &err).await;
                Err(err)
            }
        }
    }

    fn create_hook(&self) -> CreateHook {
        let repository = self.repository.clone();
        Box::new(move |object| {
            Box::pin(async move {
                let slot = Arc::new(Mutex::new(None));
                let inner_slot = slot.clone();
                repository
                    .in_transaction(Box::new(move |tx| {
                        Box::pin(async move {
                            let created = tx.create(object).await?;
                            *inner_slot.lock().await = Some(created);
                            Ok(())
                        })
                    }))
                    .await
                    .map_err(SmError::from)?;
                let created = slot.lock().await.take();
                created.ok_or_else(|| {
                    SmError::Internal("transaction finished without a created object".to_string())
                })
            })
        })
    }

    fn update_hook(&self, label_changes: Vec<LabelChange>) -> UpdateHook {
        let repository = self.repository.clone();
        Box::new(move |object| {
            Box::pin(async move {
                let slot = Arc::new(Mutex::new(None));
                let inner_slot = slot.clone();
                repository
                    .in_transaction(Box::new(move |tx| {
                        Box::pin(async move {
                            let updated = tx.update(object, label_changes).await?;
                            *inner_slot.lock().await = Some(updated);
                            Ok(())
                        })
                    }))
                    .await
                    .map_err(SmError::from)?;
                let updated = slot.lock().await.take();
                updated.ok_or_else(|| {
                    SmError::Internal("transaction finished without an updated object".to_string())
                })
            })
        })
    }

    fn delete_hook(&self, resource_type: ResourceType) -> DeleteHook {
        let repository = self.repository.clone();
        Box::new(move |criteria| {
            Box::pin(async move {
                let slot = Arc::new(Mutex::new(0));
                let inner_slot = slot.clone();
                repository
                    .in_transaction(Box::new(move |tx| {
                        Box::pin(async move {
                            let removed = tx.delete(resource_type, &criteria).await?;
                            *inner_slot.lock().await = removed;
                            Ok(())
                        })
                    }))
                    .await
                    .map_err(SmError::from)?;
                let removed = *slot.lock().await;
                Ok(removed)
            })
        })
    }

    /// A succeeded operation implies a ready resource.
    async fn mark_resource_ready(&self, object: &Object) -> Result<Object> {
        let mut stored = self
            .repository
            .get(
                object.resource_type(),
                &[Criterion::by_field("id", object.id())],
            )
            .await
            .map_err(SmError::from)?;
        stored.set_ready(true);
        self.repository
            .update(stored, vec![])
            .await
            .map_err(SmError::from)
    }

    /// Orphan-mitigatable create failures keep the resource row around so
    /// the maintainer can later deprovision it.
    async fn keep_mitigation_target(&self, operation: &Operation, fallback: Object) {
        if !operation.mitigation_pending() || operation.op_type != OperationType::Create {
            return;
        }
        let exists = self
            .repository
            .get(
                fallback.resource_type(),
                &[Criterion::by_field("id", fallback.id())],
            )
            .await;
        if matches!(exists, Err(RepositoryError::NotFound(_))) {
            if let Err(err) = self.repository.create(fallback).await {
                warn!(error = %err, "could not persist orphan mitigation target");
            }
        }
    }

    /// Errors after persistence must leave a resumable state: rescheduled or
    /// mitigation-pending operations stay in progress; anything else fails.
    async fn record_failure(&self, operation: &mut Operation, err: &SmError) {
        if operation.is_terminal() || operation.reschedule || operation.mitigation_pending() {
            return;
        }
        if operation.fail(err.to_string()).is_ok() {
            if let Err(persist_err) = persist_operation(self.repository.as_ref(), operation).await {
                warn!(error = %persist_err, "could not persist failed operation");
            }
        }
    }
}
