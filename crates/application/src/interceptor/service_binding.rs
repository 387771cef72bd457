//! Service binding orchestration
//!
//! Structurally the instance flows with two specializations: bind/unbind are
//! issued against the *effective* instance (a reference is re-targeted at
//! the shared instance it points to, re-resolving the broker from that
//! instance's plan, while the binding row keeps the reference id), and
//! deletion has no child-count prerequisite.

use crate::interceptor::{
    persist_operation, prepare_broker_target, should_start_orphan_mitigation, BrokerTarget,
    CancelSignal, CreateAroundTxInterceptor, CreateHook, DeleteAroundTxInterceptor, DeleteHook,
};
use crate::poller::{OperationPoller, PollOutcome, PollTarget};
use crate::references;
use async_trait::async_trait;
use sm_core::{
    is_plan_bindable, Object, Operation, ResourceType, Result, ServiceBinding, ServiceInstance,
    SmError,
};
use sm_ports::{
    BindRequest, ContextSigner, Criterion, GetBindingRequest, OsbClientFactory, Repository,
    TransactionalRepository, UnbindRequest,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct ServiceBindingInterceptor {
    repository: Arc<dyn TransactionalRepository>,
    clients: Arc<dyn OsbClientFactory>,
    signer: Option<Arc<dyn ContextSigner>>,
    tenant_key: String,
    poller: OperationPoller,
}

impl ServiceBindingInterceptor {
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

    async fn instance_for_binding(&self, binding: &ServiceBinding) -> Result<ServiceInstance> {
        let object = self
            .repository
            .get(
                ResourceType::ServiceInstance,
                &[Criterion::by_field("id", &binding.service_instance_id)],
            )
            .await
            .map_err(SmError::from)?;
        object
            .into_service_instance()
            .ok_or_else(|| SmError::Internal("stored instance has wrong type".to_string()))
    }

    fn build_osb_context(
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

    async fn poll_binding(
        &self,
        target: &BrokerTarget,
        effective_instance_id: &str,
        binding_id: &str,
        operation: &mut Operation,
        cancel: CancelSignal,
    ) -> Result<PollOutcome> {
        let poll_target = PollTarget {
            instance_id: effective_instance_id.to_string(),
            binding_id: Some(binding_id.to_string()),
            service_id: target.offering.catalog_id.clone(),
            plan_id: target.plan.catalog_id.clone(),
        };
        self.poller
            .poll(target.client.as_ref(), &poll_target, operation, true, cancel)
            .await
    }
}

#[async_trait]
impl CreateAroundTxInterceptor for ServiceBindingInterceptor {
    async fn around_tx_create(
        &self,
        object: Object,
        operation: &mut Operation,
        f: CreateHook,
        cancel: CancelSignal,
    ) -> Result<Object> {
        let mut binding = object.into_service_binding().ok_or_else(|| {
            SmError::Internal("binding create interceptor invoked with a non-binding".to_string())
        })?;

        let instance = self.instance_for_binding(&binding).await?;
        if !instance.is_sm_platform() {
            return f(Object::from(binding)).await;
        }

        // For a reference the bind goes to the shared instance's broker.
        let effective =
            references::effective_instance(self.repository.as_ref(), &instance).await?;
        let target = prepare_broker_target(
            self.repository.as_ref(),
            self.clients.as_ref(),
            &effective.service_plan_id,
        )
        .await?;

        if !is_plan_bindable(&target.offering, &target.plan) {
            return Err(SmError::BadRequest(format!(
                "plan {} does not support bindings",
                target.plan.name
            )));
        }

        if !operation.reschedule {
            let request = BindRequest {
                instance_id: effective.id.clone(),
                binding_id: binding.id.clone(),
                service_id: target.offering.catalog_id.clone(),
                plan_id: target.plan.catalog_id.clone(),
                parameters: binding.parameters.clone(),
                context: self.build_osb_context(&instance),
            };
            info!(
                broker = %target.broker.name,
                binding_id = %binding.id,
                instance_id = %effective.id,
                "sending bind request to broker"
            );
            match target.client.bind(&request).await {
                Err(err) => {
                    let broker_error = SmError::broker(format!(
                        "failed bind request for binding {}: {err}",
                        binding.id
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
                            binding_id = %binding.id,
                            operation_key = ?response.operation_key,
                            "broker accepted asynchronous bind"
                        );
                        operation.mark_rescheduled(response.operation_key)?;
                        persist_operation(self.repository.as_ref(), operation).await?;
                    } else {
                        binding.credentials = response.credentials;
                        info!(
                            broker = %target.broker.name,
                            binding_id = %binding.id,
                            "synchronous bind succeeded"
                        );
                    }
                }
            }
        }

        let mut object = f(Object::from(binding)).await?;
        let binding = object
            .as_service_binding()
            .cloned()
            .ok_or_else(|| SmError::Internal("persistence hook returned a non-binding".to_string()))?;

        if operation.reschedule {
            let outcome = self
                .poll_binding(&target, &effective.id, &binding.id, operation, cancel)
                .await?;
            if outcome == PollOutcome::Done {
                // Async bind does not return credentials; fetch them now.
                let fetched = target
                    .client
                    .get_binding(&GetBindingRequest {
                        instance_id: effective.id.clone(),
                        binding_id: binding.id.clone(),
                    })
                    .await
                    .map_err(|err| {
                        SmError::broker(format!(
                            "failed to fetch credentials for binding {}: {err}",
                            binding.id
                        ))
                    })?;
                if let Some(stored) = object.as_service_binding() {
                    let mut refreshed = stored.clone();
                    refreshed.credentials = fetched.credentials;
                    object = self
                        .repository
                        .update(Object::from(refreshed), vec![])
                        .await
                        .map_err(SmError::from)?;
                }
            }
        }

        Ok(object)
    }
}

#[async_trait]
impl DeleteAroundTxInterceptor for ServiceBindingInterceptor {
    async fn around_tx_delete(
        &self,
        criteria: Vec<Criterion>,
        operation: &mut Operation,
        f: DeleteHook,
        cancel: CancelSignal,
    ) -> Result<usize> {
        let bindings = self
            .repository
            .list(ResourceType::ServiceBinding, &criteria)
            .await
            .map_err(SmError::from)?;

        if bindings.len() > 1 {
            return Err(SmError::BadRequest(
                "deletion of multiple bindings is not supported".to_string(),
            ));
        }

        if let Some(object) = bindings.into_iter().next() {
            let binding = object.into_service_binding().ok_or_else(|| {
                SmError::Internal("binding delete interceptor listed a non-binding".to_string())
            })?;

            let instance = self.instance_for_binding(&binding).await?;
            if instance.is_sm_platform() {
                let effective =
                    references::effective_instance(self.repository.as_ref(), &instance).await?;
                let target = prepare_broker_target(
                    self.repository.as_ref(),
                    self.clients.as_ref(),
                    &effective.service_plan_id,
                )
                .await?;

                if !operation.reschedule {
                    let request = UnbindRequest {
                        instance_id: effective.id.clone(),
                        binding_id: binding.id.clone(),
                        service_id: target.offering.catalog_id.clone(),
                        plan_id: target.plan.catalog_id.clone(),
                    };
                    info!(
                        broker = %target.broker.name,
                        binding_id = %binding.id,
                        "sending unbind request to broker"
                    );
                    match target.client.unbind(&request).await {
                        Err(err) if err.is_gone() => {
                            info!(
                                broker = %target.broker.name,
                                binding_id = %binding.id,
                                "unbind returned 410 GONE and is considered a success"
                            );
                        }
                        Err(err) => {
                            let broker_error = SmError::broker(format!(
                                "failed unbind request for binding {}: {err}",
                                binding.id
                            ));
                            if should_start_orphan_mitigation(&err) {
                                operation.schedule_deletion();
                                persist_operation(self.repository.as_ref(), operation).await?;
                            }
                            return Err(broker_error);
                        }
                        Ok(response) => {
                            if response.is_async {
                                operation.mark_rescheduled(response.operation_key)?;
                                persist_operation(self.repository.as_ref(), operation).await?;
                            }
                        }
                    }
                }

                if operation.reschedule {
                    let outcome = self
                        .poll_binding(&target, &effective.id, &binding.id, operation, cancel)
                        .await?;
                    if outcome == PollOutcome::Cancelled {
                        return Ok(0);
                    }
                }
            }
        }

        f(criteria).await
    }
}
