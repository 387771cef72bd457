//! HTTP surface tests that need no upstream broker: API version gate,
//! catalog registration, idempotent provision and OSB status codes.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use sm_adapters::AppConfig;
use sm_core::{Object, ResourceType, SERVICE_MANAGER_PLATFORM};
use sm_ports::{Criterion, Repository};
use sm_server::{api_router, initialize_server, AppState};
use tower::ServiceExt;

fn test_state() -> AppState {
    initialize_server(&AppConfig::default()).state
}

fn catalog_body(plans: serde_json::Value) -> String {
    serde_json::json!({
        "name": "test-broker",
        "broker_url": "http://broker.example.com",
        "credentials": { "username": "admin", "password": "secret" },
        "catalog": {
            "services": [{
                "id": "svc-1",
                "name": "postgres",
                "bindable": true,
                "plans": plans
            }]
        }
    })
    .to_string()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
}

#[tokio::test]
async fn osb_routes_require_the_broker_api_version_header() {
    let app = api_router(test_state());

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/v2/service_instances/i-1")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"service_id":"svc-1","plan_id":"p-1"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "MissingBrokerApiVersion");
}

#[tokio::test]
async fn catalog_with_reserved_plan_name_is_rejected_with_400() {
    let state = test_state();
    let app = api_router(state.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/service_brokers")
                .header("content-type", "application/json")
                .body(Body::from(catalog_body(serde_json::json!([
                    { "id": "p-1", "name": "reference-plan" }
                ]))))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "CatalogUsesReservedPlanName");

    // No broker or plan rows were left behind.
    assert_eq!(
        state
            .repository
            .count(ResourceType::ServiceBroker, &[])
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        state
            .repository
            .count(ResourceType::ServicePlan, &[])
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn broker_registration_persists_catalog_rows() {
    let state = test_state();
    let app = api_router(state.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/service_brokers")
                .header("content-type", "application/json")
                .body(Body::from(catalog_body(serde_json::json!([
                    { "id": "p-1", "name": "small" },
                    {
                        "id": "p-2",
                        "name": "shared",
                        "metadata": { "supportsInstanceSharing": true }
                    }
                ]))))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        state
            .repository
            .count(ResourceType::ServiceOffering, &[])
            .await
            .unwrap(),
        1
    );
    // small + shared + generated reference plan
    assert_eq!(
        state
            .repository
            .count(ResourceType::ServicePlan, &[])
            .await
            .unwrap(),
        3
    );
}

#[tokio::test]
async fn repeated_provision_of_a_ready_instance_returns_200() {
    let state = test_state();
    let app = api_router(state.clone());

    // Seed the catalog rows and a ready instance under them.
    let now = chrono::Utc::now();
    state
        .repository
        .create(Object::from(sm_core::ServiceOffering {
            id: "offering-1".to_string(),
            name: "postgres".to_string(),
            description: None,
            catalog_id: "svc-1".to_string(),
            catalog_name: "postgres".to_string(),
            broker_id: "broker-1".to_string(),
            bindable: true,
            created_at: now,
            updated_at: now,
        }))
        .await
        .unwrap();
    state
        .repository
        .create(Object::from(sm_core::ServicePlan {
            id: "plan-1".to_string(),
            name: "small".to_string(),
            description: None,
            catalog_id: "p-1".to_string(),
            catalog_name: "small".to_string(),
            service_offering_id: "offering-1".to_string(),
            bindable: Some(true),
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }))
        .await
        .unwrap();
    let mut instance =
        sm_core::ServiceInstance::new("i-1", "i-1", "plan-1", SERVICE_MANAGER_PLATFORM);
    instance.ready = true;
    state
        .repository
        .create(Object::from(instance))
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/v2/service_instances/i-1")
                .header("content-type", "application/json")
                .header("x-broker-api-version", "2.14")
                .body(Body::from(r#"{"service_id":"svc-1","plan_id":"p-1"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    // Still exactly one instance row.
    assert_eq!(
        state
            .repository
            .count(
                ResourceType::ServiceInstance,
                &[Criterion::by_field("id", "i-1")]
            )
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn disabled_query_parameter_is_answered_with_501() {
    let mut config = AppConfig::default();
    config.server.disabled_query_parameters = vec!["environment".to_string()];
    let app = api_router(initialize_server(&config).state);

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/v2/service_instances/i-1?environment=cf&service_id=svc-1")
                .header("x-broker-api-version", "2.14")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "QueryParameterDisabled");
}

#[tokio::test]
async fn unlisted_query_parameters_pass_through() {
    // No parameters disabled: the same request reaches the handler.
    let app = api_router(test_state());

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/v2/service_instances/missing?environment=cf&service_id=svc-1")
                .header("x-broker-api-version", "2.14")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GONE);
}

#[tokio::test]
async fn deprovision_of_unknown_instance_returns_410() {
    let app = api_router(test_state());

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/v2/service_instances/missing?service_id=svc-1&plan_id=p-1")
                .header("x-broker-api-version", "2.14")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GONE);
}

#[tokio::test]
async fn provision_with_unknown_plan_is_a_bad_request() {
    let app = api_router(test_state());

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/v2/service_instances/i-1")
                .header("content-type", "application/json")
                .header("x-broker-api-version", "2.14")
                .body(Body::from(r#"{"service_id":"nope","plan_id":"p-1"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
