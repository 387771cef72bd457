//! Shared test harness: scripted OSB client and a seeded in-memory store.

use async_trait::async_trait;
use sm_adapters::InMemoryRepository;
use sm_application::{
    InterceptorRegistry, ResourceController, ServiceBindingInterceptor,
    ServiceInstanceInterceptor,
};
use sm_core::{
    BasicCredentials, Object, ServiceBroker, ServiceInstance, ServiceOffering, ServicePlan,
    SERVICE_MANAGER_PLATFORM,
};
use sm_ports::{
    BindRequest, BindResponse, DeprovisionRequest, DeprovisionResponse, GetBindingRequest,
    GetBindingResponse, LastOperationRequest, LastOperationResponse, OsbClient, OsbClientError,
    OsbClientFactory, ProvisionRequest, ProvisionResponse, Repository, TransactionalRepository,
    UnbindRequest, UnbindResponse,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TENANT_KEY: &str = "tenant";
pub const BROKER_ID: &str = "broker-1";
pub const OFFERING_ID: &str = "offering-1";
pub const OFFERING_CATALOG_ID: &str = "svc-cat-1";
pub const PLAN_ID: &str = "plan-1";
pub const PLAN_CATALOG_ID: &str = "plan-cat-1";
pub const NONBINDABLE_PLAN_ID: &str = "plan-nobind-1";
pub const REFERENCE_PLAN_ID: &str = "reference-plan-1";

type Scripted<T> = Mutex<VecDeque<Result<T, OsbClientError>>>;

/// OSB client returning pre-scripted responses in order.
#[derive(Default)]
pub struct MockOsbClient {
    provisions: Scripted<ProvisionResponse>,
    deprovisions: Scripted<DeprovisionResponse>,
    binds: Scripted<BindResponse>,
    unbinds: Scripted<UnbindResponse>,
    get_bindings: Scripted<GetBindingResponse>,
    polls: Scripted<LastOperationResponse>,
    pub provision_calls: AtomicUsize,
    pub deprovision_calls: AtomicUsize,
    pub bind_calls: AtomicUsize,
    pub unbind_calls: AtomicUsize,
    pub poll_calls: AtomicUsize,
    /// instance_id of the last bind request, for re-targeting assertions.
    pub last_bind_instance: Mutex<Option<String>>,
}

impl MockOsbClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_provision(&self, response: Result<ProvisionResponse, OsbClientError>) {
        self.provisions.lock().unwrap().push_back(response);
    }

    pub fn script_deprovision(&self, response: Result<DeprovisionResponse, OsbClientError>) {
        self.deprovisions.lock().unwrap().push_back(response);
    }

    pub fn script_bind(&self, response: Result<BindResponse, OsbClientError>) {
        self.binds.lock().unwrap().push_back(response);
    }

    pub fn script_unbind(&self, response: Result<UnbindResponse, OsbClientError>) {
        self.unbinds.lock().unwrap().push_back(response);
    }

    pub fn script_get_binding(&self, response: Result<GetBindingResponse, OsbClientError>) {
        self.get_bindings.lock().unwrap().push_back(response);
    }

    pub fn script_poll(&self, response: Result<LastOperationResponse, OsbClientError>) {
        self.polls.lock().unwrap().push_back(response);
    }

    fn next<T>(queue: &Scripted<T>) -> Result<T, OsbClientError> {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(OsbClientError::MalformedResponse(
                "no scripted response".to_string(),
            )))
    }
}

#[async_trait]
impl OsbClient for MockOsbClient {
    async fn provision(
        &self,
        _request: &ProvisionRequest,
    ) -> Result<ProvisionResponse, OsbClientError> {
        self.provision_calls.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.provisions)
    }

    async fn deprovision(
        &self,
        _request: &DeprovisionRequest,
    ) -> Result<DeprovisionResponse, OsbClientError> {
        self.deprovision_calls.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.deprovisions)
    }

    async fn bind(&self, request: &BindRequest) -> Result<BindResponse, OsbClientError> {
        self.bind_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_bind_instance.lock().unwrap() = Some(request.instance_id.clone());
        Self::next(&self.binds)
    }

    async fn unbind(&self, _request: &UnbindRequest) -> Result<UnbindResponse, OsbClientError> {
        self.unbind_calls.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.unbinds)
    }

    async fn get_binding(
        &self,
        _request: &GetBindingRequest,
    ) -> Result<GetBindingResponse, OsbClientError> {
        Self::next(&self.get_bindings)
    }

    async fn poll_last_operation(
        &self,
        _request: &LastOperationRequest,
    ) -> Result<LastOperationResponse, OsbClientError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.polls)
    }
}

pub struct MockOsbFactory {
    client: Arc<MockOsbClient>,
}

impl OsbClientFactory for MockOsbFactory {
    fn client_for(&self, _broker: &ServiceBroker) -> Result<Arc<dyn OsbClient>, OsbClientError> {
        Ok(self.client.clone())
    }
}

pub struct TestHarness {
    pub repository: Arc<dyn TransactionalRepository>,
    pub controller: Arc<ResourceController>,
    pub osb: Arc<MockOsbClient>,
    pub clients: Arc<dyn OsbClientFactory>,
}

pub fn harness() -> TestHarness {
    let repository: Arc<dyn TransactionalRepository> = Arc::new(InMemoryRepository::new());
    let osb = Arc::new(MockOsbClient::new());
    let clients: Arc<dyn OsbClientFactory> = Arc::new(MockOsbFactory {
        client: osb.clone(),
    });

    let polling_interval = Duration::from_millis(5);
    let instance_interceptor = Arc::new(ServiceInstanceInterceptor::new(
        repository.clone(),
        clients.clone(),
        None,
        TENANT_KEY.to_string(),
        polling_interval,
    ));
    let binding_interceptor = Arc::new(ServiceBindingInterceptor::new(
        repository.clone(),
        clients.clone(),
        None,
        TENANT_KEY.to_string(),
        polling_interval,
    ));

    let mut registry = InterceptorRegistry::new();
    registry.register_create(
        sm_core::ResourceType::ServiceInstance,
        instance_interceptor.clone(),
    );
    registry.register_update(
        sm_core::ResourceType::ServiceInstance,
        instance_interceptor.clone(),
    );
    registry.register_delete(sm_core::ResourceType::ServiceInstance, instance_interceptor);
    registry.register_create(
        sm_core::ResourceType::ServiceBinding,
        binding_interceptor.clone(),
    );
    registry.register_delete(sm_core::ResourceType::ServiceBinding, binding_interceptor);

    let controller = Arc::new(ResourceController::new(
        repository.clone(),
        Arc::new(registry),
    ));

    TestHarness {
        repository,
        controller,
        osb,
        clients,
    }
}

/// Seed one broker with one offering and a regular plan plus the reserved
/// reference plan.
pub async fn seed_catalog(repository: &dyn TransactionalRepository) {
    let broker = ServiceBroker::new(
        BROKER_ID,
        "test-broker",
        "http://broker.example.com",
        BasicCredentials {
            username: "admin".to_string(),
            password: "secret".to_string(),
        },
    );
    repository.create(Object::from(broker)).await.unwrap();

    let now = chrono::Utc::now();
    repository
        .create(Object::from(ServiceOffering {
            id: OFFERING_ID.to_string(),
            name: "postgres".to_string(),
            description: None,
            catalog_id: OFFERING_CATALOG_ID.to_string(),
            catalog_name: "postgres".to_string(),
            broker_id: BROKER_ID.to_string(),
            bindable: true,
            created_at: now,
            updated_at: now,
        }))
        .await
        .unwrap();

    repository
        .create(Object::from(ServicePlan {
            id: PLAN_ID.to_string(),
            name: "small".to_string(),
            description: None,
            catalog_id: PLAN_CATALOG_ID.to_string(),
            catalog_name: "small".to_string(),
            service_offering_id: OFFERING_ID.to_string(),
            bindable: Some(true),
            metadata: serde_json::json!({ "supportsInstanceSharing": true }),
            created_at: now,
            updated_at: now,
        }))
        .await
        .unwrap();

    repository
        .create(Object::from(ServicePlan {
            id: NONBINDABLE_PLAN_ID.to_string(),
            name: "metrics-only".to_string(),
            description: None,
            catalog_id: "plan-cat-nobind".to_string(),
            catalog_name: "metrics-only".to_string(),
            service_offering_id: OFFERING_ID.to_string(),
            bindable: Some(false),
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }))
        .await
        .unwrap();

    let mut reference = ServicePlan::reference_plan_for_offering(OFFERING_ID);
    reference.id = REFERENCE_PLAN_ID.to_string();
    reference.catalog_id = REFERENCE_PLAN_ID.to_string();
    repository
        .create(Object::from(reference))
        .await
        .unwrap();
}

/// A ready instance row under the seeded plan, labelled with a tenant.
pub fn sm_instance(id: &str, tenant: &str) -> ServiceInstance {
    let mut instance = ServiceInstance::new(id, id, PLAN_ID, SERVICE_MANAGER_PLATFORM);
    instance
        .labels
        .insert(TENANT_KEY.to_string(), vec![tenant.to_string()]);
    instance
}
