//! OSB API surface
//!
//! The inbound broker facade: provision/deprovision, bind/unbind and
//! last_operation, plus the admin endpoints that register brokers (running
//! catalog augmentation) and cascade-delete them. Every OSB route requires
//! the `X-Broker-API-Version` header.

use crate::error::{ApiError, OsbErrorBody};
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post, put};
use axum::Router;
use serde::Deserialize;
use sm_application::{
    BrokerCatalogService, CancelSignal, CascadeDeleter, ResourceController,
};
use sm_core::{
    BasicCredentials, Object, Operation, OperationState, OperationType, ResourceType,
    ServiceBinding, ServiceBroker, ServiceInstance, ServicePlan, SmError,
    SERVICE_MANAGER_PLATFORM,
};
use sm_ports::{Criterion, Repository, RepositoryError, TransactionalRepository};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const BROKER_API_VERSION_HEADER: &str = "x-broker-api-version";

#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn TransactionalRepository>,
    pub controller: Arc<ResourceController>,
    pub catalog: Arc<BrokerCatalogService>,
    pub cascade: Arc<CascadeDeleter>,
    pub tenant_key: String,
    /// Query parameter names answered with 501 Not Implemented.
    pub disabled_query_parameters: Vec<String>,
    pub shutdown: CancelSignal,
}

pub fn api_router(state: AppState) -> Router {
    let osb = Router::new()
        .route(
            "/v2/service_instances/:instance_id",
            put(provision).delete(deprovision),
        )
        .route(
            "/v2/service_instances/:instance_id/last_operation",
            get(instance_last_operation),
        )
        .route(
            "/v2/service_instances/:instance_id/service_bindings/:binding_id",
            put(bind).delete(unbind),
        )
        .route(
            "/v2/service_instances/:instance_id/service_bindings/:binding_id/last_operation",
            get(binding_last_operation),
        )
        .route_layer(middleware::from_fn(require_broker_api_version))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            reject_disabled_query_parameters,
        ));

    Router::new()
        .merge(osb)
        .route("/v1/service_brokers", post(register_broker))
        .route("/v1/service_brokers/:broker_id", delete(delete_broker))
        .with_state(state)
}

async fn require_broker_api_version(request: Request, next: Next) -> Response {
    if request.headers().get(BROKER_API_VERSION_HEADER).is_none() {
        return (
            StatusCode::PRECONDITION_FAILED,
            Json(OsbErrorBody {
                error: "MissingBrokerApiVersion".to_string(),
                description: "X-Broker-API-Version header is required".to_string(),
            }),
        )
            .into_response();
    }
    next.run(request).await
}

/// Requests carrying an administratively disabled query parameter are
/// answered with 501 Not Implemented.
async fn reject_disabled_query_parameters(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(query) = request.uri().query() {
        for pair in query.split('&') {
            let key = pair.split('=').next().unwrap_or(pair);
            if state
                .disabled_query_parameters
                .iter()
                .any(|disabled| disabled == key)
            {
                return (
                    StatusCode::NOT_IMPLEMENTED,
                    Json(OsbErrorBody {
                        error: "QueryParameterDisabled".to_string(),
                        description: format!("query parameter {key} is disabled"),
                    }),
                )
                    .into_response();
            }
        }
    }
    next.run(request).await
}

#[derive(Debug, Deserialize)]
struct ProvisionBody {
    service_id: String,
    plan_id: String,
    #[serde(default)]
    parameters: Option<serde_json::Value>,
    #[serde(default)]
    context: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct BindBody {
    #[allow(dead_code)]
    service_id: String,
    #[allow(dead_code)]
    plan_id: String,
    #[serde(default)]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RegisterBrokerBody {
    name: String,
    broker_url: String,
    credentials: BasicCredentials,
    catalog: serde_json::Value,
}

async fn provision(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    Json(body): Json<ProvisionBody>,
) -> Result<Response, ApiError> {
    let plan = resolve_local_plan(&state, &body.service_id, &body.plan_id).await?;

    // Repeated provision with the same id and plan is idempotent.
    match state
        .repository
        .get(
            ResourceType::ServiceInstance,
            &[Criterion::by_field("id", &instance_id)],
        )
        .await
    {
        Ok(existing) => {
            let same_plan = existing
                .as_service_instance()
                .map(|i| i.service_plan_id == plan.id && i.ready)
                .unwrap_or(false);
            return if same_plan {
                Ok((StatusCode::OK, Json(serde_json::json!({}))).into_response())
            } else {
                Ok((
                    StatusCode::CONFLICT,
                    Json(OsbErrorBody {
                        error: "Conflict".to_string(),
                        description: format!(
                            "service instance {instance_id} already exists with different attributes"
                        ),
                    }),
                )
                    .into_response())
            };
        }
        Err(RepositoryError::NotFound(_)) => {}
        Err(err) => return Err(SmError::from(err).into()),
    }

    let mut instance = ServiceInstance::new(
        &instance_id,
        instance_name(&body.context, &instance_id),
        &plan.id,
        SERVICE_MANAGER_PLATFORM,
    );
    instance.parameters = body.parameters.clone();
    if let Some(tenant) = context_tenant(&body.context, &state.tenant_key) {
        instance
            .labels
            .insert(state.tenant_key.clone(), vec![tenant]);
    }

    let mut operation = state
        .controller
        .claim_operation(
            OperationType::Create,
            ResourceType::ServiceInstance,
            &instance_id,
        )
        .await?;
    info!(instance_id, operation_id = %operation.id, "provisioning service instance");

    let created = state
        .controller
        .create(
            Object::from(instance),
            &mut operation,
            state.shutdown.clone(),
        )
        .await?;

    if operation.reschedule {
        return Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "operation": operation.id })),
        )
            .into_response());
    }

    let dashboard_url = created
        .as_service_instance()
        .and_then(|i| i.dashboard_url.clone());
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "dashboard_url": dashboard_url })),
    )
        .into_response())
}

async fn deprovision(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    Query(_query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    match state
        .repository
        .get(
            ResourceType::ServiceInstance,
            &[Criterion::by_field("id", &instance_id)],
        )
        .await
    {
        Ok(_) => {}
        Err(RepositoryError::NotFound(_)) => {
            return Ok((StatusCode::GONE, Json(serde_json::json!({}))).into_response())
        }
        Err(err) => return Err(SmError::from(err).into()),
    }

    let mut operation = state
        .controller
        .claim_operation(
            OperationType::Delete,
            ResourceType::ServiceInstance,
            &instance_id,
        )
        .await?;
    info!(instance_id, operation_id = %operation.id, "deprovisioning service instance");

    state
        .controller
        .delete(
            ResourceType::ServiceInstance,
            vec![Criterion::by_field("id", &instance_id)],
            &mut operation,
            state.shutdown.clone(),
        )
        .await?;

    if operation.reschedule {
        return Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "operation": operation.id })),
        )
            .into_response());
    }
    Ok((StatusCode::OK, Json(serde_json::json!({}))).into_response())
}

async fn bind(
    State(state): State<AppState>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    Json(body): Json<BindBody>,
) -> Result<Response, ApiError> {
    let instance = state
        .repository
        .get(
            ResourceType::ServiceInstance,
            &[Criterion::by_field("id", &instance_id)],
        )
        .await
        .map_err(SmError::from)?
        .into_service_instance()
        .ok_or_else(|| SmError::Internal("stored instance has wrong type".to_string()))?;

    match state
        .repository
        .get(
            ResourceType::ServiceBinding,
            &[Criterion::by_field("id", &binding_id)],
        )
        .await
    {
        Ok(existing) => {
            let Some(existing) = existing.as_service_binding() else {
                return Err(SmError::Internal("stored binding has wrong type".to_string()).into());
            };
            return if existing.ready && existing.service_instance_id == instance_id {
                Ok((
                    StatusCode::OK,
                    Json(serde_json::json!({ "credentials": existing.credentials })),
                )
                    .into_response())
            } else {
                Ok((
                    StatusCode::CONFLICT,
                    Json(OsbErrorBody {
                        error: "Conflict".to_string(),
                        description: format!("service binding {binding_id} already exists"),
                    }),
                )
                    .into_response())
            };
        }
        Err(RepositoryError::NotFound(_)) => {}
        Err(err) => return Err(SmError::from(err).into()),
    }

    let mut binding = ServiceBinding::new(&binding_id, &binding_id, &instance_id);
    binding.parameters = body.parameters.clone();
    if let Some(tenant) = instance.tenant(&state.tenant_key) {
        binding
            .labels
            .insert(state.tenant_key.clone(), vec![tenant.to_string()]);
    }

    let mut operation = state
        .controller
        .claim_operation(
            OperationType::Create,
            ResourceType::ServiceBinding,
            &binding_id,
        )
        .await?;
    info!(binding_id, instance_id, operation_id = %operation.id, "creating service binding");

    let created = state
        .controller
        .create(
            Object::from(binding),
            &mut operation,
            state.shutdown.clone(),
        )
        .await?;

    if operation.reschedule {
        return Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "operation": operation.id })),
        )
            .into_response());
    }

    let credentials = created
        .as_service_binding()
        .map(|b| b.credentials.clone())
        .unwrap_or(serde_json::Value::Null);
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "credentials": credentials })),
    )
        .into_response())
}

async fn unbind(
    State(state): State<AppState>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    Query(_query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    match state
        .repository
        .get(
            ResourceType::ServiceBinding,
            &[Criterion::by_field("id", &binding_id)],
        )
        .await
    {
        Ok(_) => {}
        Err(RepositoryError::NotFound(_)) => {
            return Ok((StatusCode::GONE, Json(serde_json::json!({}))).into_response())
        }
        Err(err) => return Err(SmError::from(err).into()),
    }

    let mut operation = state
        .controller
        .claim_operation(
            OperationType::Delete,
            ResourceType::ServiceBinding,
            &binding_id,
        )
        .await?;
    info!(binding_id, instance_id, operation_id = %operation.id, "deleting service binding");

    state
        .controller
        .delete(
            ResourceType::ServiceBinding,
            vec![Criterion::by_field("id", &binding_id)],
            &mut operation,
            state.shutdown.clone(),
        )
        .await?;

    if operation.reschedule {
        return Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "operation": operation.id })),
        )
            .into_response());
    }
    Ok((StatusCode::OK, Json(serde_json::json!({}))).into_response())
}

async fn instance_last_operation(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Result<Response, ApiError> {
    last_operation_response(&state, ResourceType::ServiceInstance, &instance_id).await
}

async fn binding_last_operation(
    State(state): State<AppState>,
    Path((_instance_id, binding_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    last_operation_response(&state, ResourceType::ServiceBinding, &binding_id).await
}

async fn last_operation_response(
    state: &AppState,
    resource_type: ResourceType,
    resource_id: &str,
) -> Result<Response, ApiError> {
    let operations = state
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

    let latest: Option<Operation> = operations
        .into_iter()
        .filter_map(Object::into_operation)
        .max_by_key(|op| op.created_at);
    let Some(operation) = latest else {
        return Err(SmError::NotFound(format!("operation for {resource_type} {resource_id}")).into());
    };

    let state_str = match operation.state {
        OperationState::InProgress => "in progress",
        OperationState::Succeeded => "succeeded",
        OperationState::Failed => "failed",
    };
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "state": state_str,
            "description": operation.description,
        })),
    )
        .into_response())
}

async fn register_broker(
    State(state): State<AppState>,
    Json(body): Json<RegisterBrokerBody>,
) -> Result<Response, ApiError> {
    let mut broker = ServiceBroker::new(
        Uuid::new_v4().to_string(),
        &body.name,
        &body.broker_url,
        body.credentials,
    );
    broker.catalog = body.catalog;

    state
        .repository
        .create(Object::from(broker.clone()))
        .await
        .map_err(SmError::from)?;

    if let Err(err) = state.catalog.register_broker_catalog(&broker).await {
        // A rejected catalog leaves no broker behind.
        let _ = state
            .repository
            .delete(
                ResourceType::ServiceBroker,
                &[Criterion::by_field("id", &broker.id)],
            )
            .await;
        return Err(err.into());
    }

    info!(broker_id = %broker.id, broker = %broker.name, "registered service broker");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": broker.id })),
    )
        .into_response())
}

async fn delete_broker(
    State(state): State<AppState>,
    Path(broker_id): Path<String>,
) -> Result<Response, ApiError> {
    state
        .repository
        .get(
            ResourceType::ServiceBroker,
            &[Criterion::by_field("id", &broker_id)],
        )
        .await
        .map_err(SmError::from)?;

    state.cascade.delete_broker(&broker_id).await?;
    Ok((StatusCode::OK, Json(serde_json::json!({}))).into_response())
}

/// Map the wire catalog ids of an OSB request onto the local plan row.
async fn resolve_local_plan(
    state: &AppState,
    service_id: &str,
    plan_id: &str,
) -> Result<ServicePlan, ApiError> {
    let offering = state
        .repository
        .get(
            ResourceType::ServiceOffering,
            &[Criterion::by_field("catalog_id", service_id)],
        )
        .await
        .map_err(|err| match err {
            RepositoryError::NotFound(_) => {
                SmError::BadRequest(format!("unknown service offering {service_id}"))
            }
            other => other.into(),
        })?;

    let plan = state
        .repository
        .get(
            ResourceType::ServicePlan,
            &[
                Criterion::by_field("service_offering_id", offering.id()),
                Criterion::by_field("catalog_id", plan_id),
            ],
        )
        .await
        .map_err(|err| match err {
            RepositoryError::NotFound(_) => {
                SmError::BadRequest(format!("unknown service plan {plan_id}"))
            }
            other => other.into(),
        })?;

    plan.into_service_plan()
        .ok_or_else(|| SmError::Internal("stored plan has wrong type".to_string()).into())
}

fn instance_name(context: &Option<serde_json::Value>, fallback: &str) -> String {
    context
        .as_ref()
        .and_then(|c| c.get("instance_name"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or(fallback)
        .to_string()
}

fn context_tenant(context: &Option<serde_json::Value>, tenant_key: &str) -> Option<String> {
    context
        .as_ref()
        .and_then(|c| c.get(tenant_key))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}
