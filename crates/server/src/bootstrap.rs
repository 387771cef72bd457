//! Server bootstrap
//!
//! Wires the adapters into the application layer: repository, OSB client
//! factory, optional context signer, interceptor registry, controller,
//! catalog service, cascade deleter and the maintainer.

use crate::api::AppState;
use sm_adapters::{AppConfig, HttpOsbClientFactory, InMemoryRepository, RsaContextSigner};
use sm_application::{
    cancellation_pair, BrokerCatalogService, CascadeDeleter, InterceptorRegistry,
    MaintainerSettings, OperationMaintainer, ResourceController, ServiceBindingInterceptor,
    ServiceInstanceInterceptor,
};
use sm_core::ResourceType;
use sm_ports::{ContextSigner, OsbClientFactory, TransactionalRepository};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

pub struct ServerComponents {
    pub state: AppState,
    pub maintainer: Arc<OperationMaintainer>,
    pub shutdown_tx: watch::Sender<bool>,
}

pub fn initialize_server(config: &AppConfig) -> ServerComponents {
    let repository: Arc<dyn TransactionalRepository> = Arc::new(InMemoryRepository::new());
    let clients: Arc<dyn OsbClientFactory> = Arc::new(HttpOsbClientFactory::new(
        config.orchestrator.broker_timeout(),
    ));
    let signer = build_signer(config);

    let instance_interceptor = Arc::new(ServiceInstanceInterceptor::new(
        repository.clone(),
        clients.clone(),
        signer.clone(),
        config.orchestrator.tenant_key.clone(),
        config.orchestrator.polling_interval(),
    ));
    let binding_interceptor = Arc::new(ServiceBindingInterceptor::new(
        repository.clone(),
        clients.clone(),
        signer,
        config.orchestrator.tenant_key.clone(),
        config.orchestrator.polling_interval(),
    ));

    let mut registry = InterceptorRegistry::new();
    registry.register_create(ResourceType::ServiceInstance, instance_interceptor.clone());
    registry.register_update(ResourceType::ServiceInstance, instance_interceptor.clone());
    registry.register_delete(ResourceType::ServiceInstance, instance_interceptor);
    registry.register_create(ResourceType::ServiceBinding, binding_interceptor.clone());
    registry.register_delete(ResourceType::ServiceBinding, binding_interceptor);

    let controller = Arc::new(ResourceController::new(
        repository.clone(),
        Arc::new(registry),
    ));
    let catalog = Arc::new(BrokerCatalogService::new(repository.clone()));
    let cascade = Arc::new(CascadeDeleter::new(
        repository.clone(),
        controller.clone(),
        config.orchestrator.max_parallel_deletions,
    ));

    let reconciliation = config.maintainer.reconciliation_interval();
    let maintainer = Arc::new(OperationMaintainer::new(
        repository.clone(),
        clients,
        config.orchestrator.polling_interval(),
        MaintainerSettings {
            reconciliation_interval: reconciliation,
            stall_threshold: chrono::Duration::from_std(reconciliation * 2)
                .unwrap_or_else(|_| chrono::Duration::minutes(20)),
            job_timeout: config.maintainer.job_timeout(),
            operation_retention: config.maintainer.operation_retention(),
        },
    ));

    let (shutdown_tx, shutdown) = cancellation_pair();

    info!(
        polling_interval_secs = config.orchestrator.polling_interval_secs,
        max_parallel_deletions = config.orchestrator.max_parallel_deletions,
        tenant_key = %config.orchestrator.tenant_key,
        "service manager components initialized"
    );

    ServerComponents {
        state: AppState {
            repository,
            controller,
            catalog,
            cascade,
            tenant_key: config.orchestrator.tenant_key.clone(),
            disabled_query_parameters: config.server.disabled_query_parameters.clone(),
            shutdown,
        },
        maintainer,
        shutdown_tx,
    }
}

fn build_signer(config: &AppConfig) -> Option<Arc<dyn ContextSigner>> {
    let encoded = config.signature.private_key.as_deref()?;
    match RsaContextSigner::from_base64_pem(encoded) {
        Ok(signer) => Some(Arc::new(signer)),
        Err(err) => {
            // Signing is best-effort; a bad key disables it.
            warn!(error = %err, "context signature key could not be parsed, signing disabled");
            None
        }
    }
}
