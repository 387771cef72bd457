//! Service instance orchestration
//!
//! Wraps create/update/delete of instances: talks to the owning broker
//! around the inner persistence hook, drives async polling and schedules
//! orphan mitigation when a broker outcome is indeterminate. Instances of
//! foreign platforms and reference instances never reach a broker.

use crate::interceptor::{
    persist_operation, prepare_broker_target, should_start_orphan_mitigation, BrokerTarget,
    CancelSignal, CreateAroundTxInterceptor, CreateHook, DeleteAroundTxInterceptor, DeleteHook,
    UpdateAroundTxInterceptor, UpdateHook,
};
use crate::poller::{OperationPoller, PollOutcome, PollTarget};
use crate::references;
use async_trait::async_trait;
use sm_core::{Object, Operation, ResourceType, Result, ServiceInstance, SmError};
use sm_ports::{
    ContextSigner, Criterion, DeprovisionRequest, OsbClientFactory, ProvisionRequest, Repository,
    TransactionalRepository,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Outcome of the broker-facing half of a deletion.
enum DeleteFlow {
    /// Broker work finished (or none was needed); the row may be removed.
    Proceed,
    /// Polling was cancelled; the operation stays in progress and the row
    /// must be kept for a later resume.
    Suspended,
}

pub struct ServiceInstanceInterceptor {
    repository: Arc<dyn TransactionalRepository>,
    clients: Arc<dyn OsbClientFactory>,
    signer: Option<Arc<dyn ContextSigner>>,
    tenant_key: String,
    poller: OperationPoller,
}

impl ServiceInstanceInterceptor {
    pub fn new(
        repository: Arc<dyn TransactionalRepository>,
        clients: Arc<dyn OsbClientFactory>,
        signer: Option<Arc<dyn ContextSigner>>,
        tenant_key: String,
        polling_interval: Duration,
    ) -> Self {
        let poller = OperationPoller::new(repository.clone(), polling_interval);
        Self {
            repository,
            clients,
            signer,
            tenant_key,
            poller,
        }
    }

    /// Context document sent with provision/bind requests. Carries the
    /// calling platform, the tenant when one is labelled, and a detached
    /// signature when signing is configured.
    pub(crate) fn build_osb_context(
        &self,
        instance: &ServiceInstance,
    ) -> serde_json::Map<String, serde_json::Value> {
        let mut context = serde_json::Map::new();
        context.insert(
            "platform".to_string(),
            serde_json::Value::String(sm_core::SERVICE_MANAGER_PLATFORM.to_string()),
        );
        if !self.tenant_key.is_empty() {
            if let Some(tenant) = instance.tenant(&self.tenant_key) {
                context.insert(
                    self.tenant_key.clone(),
                    serde_json::Value::String(tenant.to_string()),
                );
            }
        }
        if let Some(signer) = &self.signer {
            if let Some(signature) = signer.sign_context(&context) {
                context.insert(
                    "signature".to_string(),
                    serde_json::Value::String(signature),
                );
            }
        }
        context
    }

    async fn delete_single_instance(
        &self,
        instance: &ServiceInstance,
        operation: &mut Operation,
        cancel: CancelSignal,
    ) -> Result<DeleteFlow> {
        let bindings = self
            .repository
            .count(
                ResourceType::ServiceBinding,
                &[Criterion::by_field("service_instance_id", &instance.id)],
            )
            .await
            .map_err(SmError::from)?;
        if bindings > 0 {
            return Err(SmError::BadRequest(format!(
                "could not delete instance due to {bindings} existing bindings"
            )));
        }

        // References were never provisioned at a broker.
        if instance.is_reference() {
            return Ok(DeleteFlow::Proceed);
        }

        let target =
            prepare_broker_target(self.repository.as_ref(), self.clients.as_ref(), &instance.service_plan_id)
                .await?;

        if !operation.reschedule {
            let request = DeprovisionRequest {
                instance_id: instance.id.clone(),
                service_id: target.offering.catalog_id.clone(),
                plan_id: target.plan.catalog_id.clone(),
            };
            info!(
                broker = %target.broker.name,
                instance_id = %instance.id,
                "sending deprovision request to broker"
            );
            match target.client.deprovision(&request).await {
                Err(err) if err.is_gone() => {
                    info!(
                        broker = %target.broker.name,
                        instance_id = %instance.id,
                        "deprovisioning returned 410 GONE and is considered a success"
                    );
                    return Ok(DeleteFlow::Proceed);
                }
                Err(err) => {
                    let broker_error = SmError::broker(format!(
                        "failed deprovisioning request for instance {}: {err}",
                        instance.id
                    ));
                    if should_start_orphan_mitigation(&err) {
                        operation.schedule_deletion();
                        persist_operation(self.repository.as_ref(), operation).await?;
                    }
                    return Err(broker_error);
                }
                Ok(response) => {
                    if response.is_async {
                        info!(
                            broker = %target.broker.name,
                            instance_id = %instance.id,
                            "broker accepted asynchronous deprovisioning"
                        );
                        operation.mark_rescheduled(response.operation_key)?;
                        persist_operation(self.repository.as_ref(), operation).await?;
                    } else {
                        info!(
                            broker = %target.broker.name,
                            instance_id = %instance.id,
                            "synchronous deprovisioning succeeded"
                        );
                    }
                }
            }
        }

        if operation.reschedule {
            let outcome = self
                .poll_instance(&target, instance, operation, cancel)
                .await?;
            if outcome == PollOutcome::Cancelled {
                return Ok(DeleteFlow::Suspended);
            }
        }

        Ok(DeleteFlow::Proceed)
    }

    async fn poll_instance(
        &self,
        target: &BrokerTarget,
        instance: &ServiceInstance,
        operation: &mut Operation,
        cancel: CancelSignal,
    ) -> Result<PollOutcome> {
        let poll_target = PollTarget {
            instance_id: instance.id.clone(),
            binding_id: None,
            service_id: target.offering.catalog_id.clone(),
            plan_id: target.plan.catalog_id.clone(),
        };
        self.poller
            .poll(target.client.as_ref(), &poll_target, operation, true, cancel)
            .await
    }
}

#[async_trait]
impl CreateAroundTxInterceptor for ServiceInstanceInterceptor {
    async fn around_tx_create(
        &self,
        object: Object,
        operation: &mut Operation,
        f: CreateHook,
        cancel: CancelSignal,
    ) -> Result<Object> {
        let mut instance = object.into_service_instance().ok_or_else(|| {
            SmError::Internal("instance create interceptor invoked with a non-instance".to_string())
        })?;

        // Foreign platforms orchestrate their own brokers.
        if !instance.is_sm_platform() {
            return f(Object::from(instance)).await;
        }

        let target = prepare_broker_target(
            self.repository.as_ref(),
            self.clients.as_ref(),
            &instance.service_plan_id,
        )
        .await?;

        if target.plan.is_reference_plan() {
            references::materialize_reference(
                self.repository.as_ref(),
                &mut instance,
                &self.tenant_key,
            )
            .await?;
            return f(Object::from(instance)).await;
        }

        if !operation.reschedule {
            let request = ProvisionRequest {
                instance_id: instance.id.clone(),
                service_id: target.offering.catalog_id.clone(),
                plan_id: target.plan.catalog_id.clone(),
                organization_guid: "-".to_string(),
                space_guid: "-".to_string(),
                parameters: instance.parameters.clone(),
                context: self.build_osb_context(&instance),
            };
            info!(
                broker = %target.broker.name,
                instance_id = %instance.id,
                "sending provision request to broker"
            );
            match target.client.provision(&request).await {
                Err(err) => {
                    let broker_error = SmError::broker(format!(
                        "failed provisioning request for instance {}: {err}",
                        instance.id
                    ));
                    if should_start_orphan_mitigation(&err) {
                        operation.schedule_deletion();
                        persist_operation(self.repository.as_ref(), operation).await?;
                    }
                    return Err(broker_error);
                }
                Ok(response) => {
                    if let Some(dashboard_url) = &response.dashboard_url {
                        instance.dashboard_url = Some(dashboard_url.clone());
                    }
                    if response.is_async {
                        info!(
                            broker = %target.broker.name,
                            instance_id = %instance.id,
                            operation_key = ?response.operation_key,
                            "broker accepted asynchronous provisioning"
                        );
                        operation.mark_rescheduled(response.operation_key)?;
                        persist_operation(self.repository.as_ref(), operation).await?;
                    } else {
                        info!(
                            broker = %target.broker.name,
                            instance_id = %instance.id,
                            "synchronous provisioning succeeded"
                        );
                    }
                }
            }
        }

        let object = f(Object::from(instance)).await?;
        let instance = object
            .as_service_instance()
            .cloned()
            .ok_or_else(|| SmError::Internal("persistence hook returned a non-instance".to_string()))?;

        if operation.reschedule {
            self.poll_instance(&target, &instance, operation, cancel)
                .await?;
        }

        Ok(object)
    }
}

#[async_trait]
impl UpdateAroundTxInterceptor for ServiceInstanceInterceptor {
    // Updating SM-platform instances at the broker is not implemented yet;
    // the hook runs untouched.
    async fn around_tx_update(
        &self,
        object: Object,
        _operation: &mut Operation,
        f: UpdateHook,
        _cancel: CancelSignal,
    ) -> Result<Object> {
        f(object).await
    }
}

#[async_trait]
impl DeleteAroundTxInterceptor for ServiceInstanceInterceptor {
    async fn around_tx_delete(
        &self,
        criteria: Vec<Criterion>,
        operation: &mut Operation,
        f: DeleteHook,
        cancel: CancelSignal,
    ) -> Result<usize> {
        let instances = self
            .repository
            .list(ResourceType::ServiceInstance, &criteria)
            .await
            .map_err(SmError::from)?;

        if instances.len() > 1 {
            return Err(SmError::BadRequest(
                "deletion of multiple instances is not supported".to_string(),
            ));
        }

        if let Some(object) = instances.into_iter().next() {
            let instance = object.into_service_instance().ok_or_else(|| {
                SmError::Internal("instance delete interceptor listed a non-instance".to_string())
            })?;

            if instance.is_sm_platform() {
                match self
                    .delete_single_instance(&instance, operation, cancel)
                    .await?
                {
                    DeleteFlow::Proceed => {}
                    DeleteFlow::Suspended => return Ok(0),
                }
            }
        }

        f(criteria).await
    }
}
