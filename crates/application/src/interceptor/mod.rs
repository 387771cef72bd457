//! Around-transaction interception
//!
//! Each transactional CRUD on an instance or binding is wrapped by an
//! interceptor: broker communication happens around the inner persistence
//! hook `f`, and the bound [`Operation`] records progress. Interceptors are
//! looked up in a registry keyed by resource type and operation kind.

pub mod service_binding;
pub mod service_instance;

use async_trait::async_trait;
use futures::future::BoxFuture;
use sm_core::{Object, Operation, Result, ServiceBroker, ServiceOffering, ServicePlan, SmError};
use sm_ports::{Criterion, OsbClient, OsbClientError, OsbClientFactory, Repository};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

pub use service_binding::ServiceBindingInterceptor;
pub use service_instance::ServiceInstanceInterceptor;

/// Inner persistence hook running inside the storage transaction.
pub type CreateHook = Box<dyn FnOnce(Object) -> BoxFuture<'static, Result<Object>> + Send>;
pub type UpdateHook = Box<dyn FnOnce(Object) -> BoxFuture<'static, Result<Object>> + Send>;
pub type DeleteHook = Box<dyn FnOnce(Vec<Criterion>) -> BoxFuture<'static, Result<usize>> + Send>;

/// Receiver signalled when the caller's request context is dropped. Pollers
/// exit without touching operation state so a maintainer can resume.
pub type CancelSignal = watch::Receiver<bool>;

pub fn cancellation_pair() -> (watch::Sender<bool>, CancelSignal) {
    watch::channel(false)
}

#[async_trait]
pub trait CreateAroundTxInterceptor: Send + Sync {
    async fn around_tx_create(
        &self,
        object: Object,
        operation: &mut Operation,
        f: CreateHook,
        cancel: CancelSignal,
    ) -> Result<Object>;
}

#[async_trait]
pub trait UpdateAroundTxInterceptor: Send + Sync {
    async fn around_tx_update(
        &self,
        object: Object,
        operation: &mut Operation,
        f: UpdateHook,
        cancel: CancelSignal,
    ) -> Result<Object>;
}

#[async_trait]
pub trait DeleteAroundTxInterceptor: Send + Sync {
    async fn around_tx_delete(
        &self,
        criteria: Vec<Criterion>,
        operation: &mut Operation,
        f: DeleteHook,
        cancel: CancelSignal,
    ) -> Result<usize>;
}

/// Registry of interceptors, keyed by (resource type, operation kind).
#[derive(Default)]
pub struct InterceptorRegistry {
    creates: HashMap<sm_core::ResourceType, Arc<dyn CreateAroundTxInterceptor>>,
    updates: HashMap<sm_core::ResourceType, Arc<dyn UpdateAroundTxInterceptor>>,
    deletes: HashMap<sm_core::ResourceType, Arc<dyn DeleteAroundTxInterceptor>>,
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_create(
        &mut self,
        resource_type: sm_core::ResourceType,
        interceptor: Arc<dyn CreateAroundTxInterceptor>,
    ) {
        self.creates.insert(resource_type, interceptor);
    }

    pub fn register_update(
        &mut self,
        resource_type: sm_core::ResourceType,
        interceptor: Arc<dyn UpdateAroundTxInterceptor>,
    ) {
        self.updates.insert(resource_type, interceptor);
    }

    pub fn register_delete(
        &mut self,
        resource_type: sm_core::ResourceType,
        interceptor: Arc<dyn DeleteAroundTxInterceptor>,
    ) {
        self.deletes.insert(resource_type, interceptor);
    }

    pub fn create_for(
        &self,
        resource_type: sm_core::ResourceType,
    ) -> Option<Arc<dyn CreateAroundTxInterceptor>> {
        self.creates.get(&resource_type).cloned()
    }

    pub fn update_for(
        &self,
        resource_type: sm_core::ResourceType,
    ) -> Option<Arc<dyn UpdateAroundTxInterceptor>> {
        self.updates.get(&resource_type).cloned()
    }

    pub fn delete_for(
        &self,
        resource_type: sm_core::ResourceType,
    ) -> Option<Arc<dyn DeleteAroundTxInterceptor>> {
        self.deletes.get(&resource_type).cloned()
    }
}

/// Orphan mitigation triggers for exactly: 2xx other than 200, 408, 5xx and
/// request/network timeouts. Other HTTP errors are definite outcomes and do
/// not leak upstream resources.
pub fn should_start_orphan_mitigation(err: &OsbClientError) -> bool {
    match err {
        OsbClientError::Http { status, .. } => {
            let is_2xx = (200..300).contains(status);
            let is_5xx = (500..600).contains(status);
            (is_2xx && *status != 200) || *status == 408 || is_5xx
        }
        OsbClientError::Timeout(_) => true,
        OsbClientError::Network(_) | OsbClientError::MalformedResponse(_) => false,
    }
}

/// Everything needed to talk to the broker owning a plan.
pub struct BrokerTarget {
    pub broker: ServiceBroker,
    pub offering: ServiceOffering,
    pub plan: ServicePlan,
    pub client: Arc<dyn OsbClient>,
}

/// Resolve plan -> offering -> broker and build the broker's client.
pub(crate) async fn prepare_broker_target(
    repository: &dyn Repository,
    clients: &dyn OsbClientFactory,
    service_plan_id: &str,
) -> Result<BrokerTarget> {
    let plan = repository
        .get(
            sm_core::ResourceType::ServicePlan,
            &[Criterion::by_field("id", service_plan_id)],
        )
        .await
        .map_err(SmError::from)?
        .into_service_plan()
        .ok_or_else(|| SmError::Internal("stored plan has wrong type".to_string()))?;

    let offering = repository
        .get(
            sm_core::ResourceType::ServiceOffering,
            &[Criterion::by_field("id", &plan.service_offering_id)],
        )
        .await
        .map_err(SmError::from)?
        .into_service_offering()
        .ok_or_else(|| SmError::Internal("stored offering has wrong type".to_string()))?;

    let broker = repository
        .get(
            sm_core::ResourceType::ServiceBroker,
            &[Criterion::by_field("id", &offering.broker_id)],
        )
        .await
        .map_err(SmError::from)?
        .into_service_broker()
        .ok_or_else(|| SmError::Internal("stored broker has wrong type".to_string()))?;

    let client = clients
        .client_for(&broker)
        .map_err(|e| SmError::broker(format!("could not build client for broker {}: {e}", broker.name)))?;

    Ok(BrokerTarget {
        broker,
        offering,
        plan,
        client,
    })
}

/// Persist the operation and refresh the caller's copy so subsequent
/// optimistic updates carry the current version.
pub(crate) async fn persist_operation(
    repository: &dyn Repository,
    operation: &mut Operation,
) -> Result<()> {
    let updated = repository
        .update(Object::from(operation.clone()), vec![])
        .await
        .map_err(SmError::from)?;
    *operation = updated
        .into_operation()
        .ok_or_else(|| SmError::Internal("stored operation has wrong type".to_string()))?;
    Ok(())
}
