//! Instance lifecycle orchestration tests: async provisioning, orphan
//! mitigation, reference validation and delete flows against a scripted
//! broker.

mod support;

use sm_application::cancellation_pair;
use sm_core::{
    ConflictKind, Object, OperationState, OperationType, ResourceType, ServiceInstance, SmError,
    REFERENCED_INSTANCE_ID_PARAM, SERVICE_MANAGER_PLATFORM,
};
use sm_ports::{
    Criterion, LastOperationResponse, LastOperationState, OsbClientError, ProvisionResponse,
    Repository,
};
use support::{harness, seed_catalog, sm_instance, PLAN_ID, REFERENCE_PLAN_ID};

fn http_error(status: u16) -> OsbClientError {
    OsbClientError::Http {
        status,
        error_code: None,
        description: None,
    }
}

fn poll(state: LastOperationState, description: Option<&str>) -> LastOperationResponse {
    LastOperationResponse {
        state,
        description: description.map(str::to_string),
    }
}

async fn get_instance(
    repository: &dyn sm_ports::TransactionalRepository,
    id: &str,
) -> Option<ServiceInstance> {
    match repository
        .get(
            ResourceType::ServiceInstance,
            &[Criterion::by_field("id", id)],
        )
        .await
    {
        Ok(object) => object.into_service_instance(),
        Err(_) => None,
    }
}

#[tokio::test]
async fn async_create_succeeds_after_polling() {
    let h = harness();
    seed_catalog(h.repository.as_ref()).await;

    h.osb.script_provision(Ok(ProvisionResponse {
        is_async: true,
        operation_key: Some("op-1".to_string()),
        dashboard_url: Some("https://dashboard.example.com".to_string()),
    }));
    h.osb
        .script_poll(Ok(poll(LastOperationState::InProgress, None)));
    h.osb
        .script_poll(Ok(poll(LastOperationState::Succeeded, None)));

    let mut operation = h
        .controller
        .claim_operation(OperationType::Create, ResourceType::ServiceInstance, "i-1")
        .await
        .unwrap();
    let (_guard, cancel) = cancellation_pair();
    let created = h
        .controller
        .create(
            Object::from(sm_instance("i-1", "acme")),
            &mut operation,
            cancel,
        )
        .await
        .unwrap();

    assert_eq!(operation.state, OperationState::Succeeded);
    assert!(!operation.reschedule);
    assert_eq!(operation.external_id.as_deref(), Some("op-1"));
    assert_eq!(
        h.osb
            .provision_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
    assert_eq!(
        h.osb.poll_calls.load(std::sync::atomic::Ordering::SeqCst),
        2
    );

    let instance = get_instance(h.repository.as_ref(), "i-1").await.unwrap();
    assert!(instance.ready);
    assert_eq!(
        instance.dashboard_url.as_deref(),
        Some("https://dashboard.example.com")
    );
    assert_eq!(created.id(), "i-1");
}

#[tokio::test]
async fn create_failure_schedules_orphan_mitigation_and_row_survives() {
    let h = harness();
    seed_catalog(h.repository.as_ref()).await;

    h.osb.script_provision(Err(http_error(500)));

    let mut operation = h
        .controller
        .claim_operation(OperationType::Create, ResourceType::ServiceInstance, "i-1")
        .await
        .unwrap();
    let (_guard, cancel) = cancellation_pair();
    let err = h
        .controller
        .create(
            Object::from(sm_instance("i-1", "acme")),
            &mut operation,
            cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SmError::Broker { .. }));
    assert!(operation.deletion_scheduled.is_some());
    assert!(!operation.reschedule);
    assert_eq!(operation.state, OperationState::InProgress);

    // The not-yet-ready row is kept so the mitigation can deprovision it.
    let instance = get_instance(h.repository.as_ref(), "i-1").await.unwrap();
    assert!(!instance.ready);
}

#[tokio::test]
async fn non_mitigatable_create_failure_fails_the_operation() {
    let h = harness();
    seed_catalog(h.repository.as_ref()).await;

    h.osb.script_provision(Err(http_error(400)));

    let mut operation = h
        .controller
        .claim_operation(OperationType::Create, ResourceType::ServiceInstance, "i-1")
        .await
        .unwrap();
    let (_guard, cancel) = cancellation_pair();
    let err = h
        .controller
        .create(
            Object::from(sm_instance("i-1", "acme")),
            &mut operation,
            cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SmError::Broker { .. }));
    assert!(operation.deletion_scheduled.is_none());
    assert_eq!(operation.state, OperationState::Failed);
    assert!(get_instance(h.repository.as_ref(), "i-1").await.is_none());
}

#[tokio::test]
async fn poll_failure_propagates_broker_description() {
    let h = harness();
    seed_catalog(h.repository.as_ref()).await;

    h.osb.script_provision(Ok(ProvisionResponse {
        is_async: true,
        operation_key: Some("op-1".to_string()),
        dashboard_url: None,
    }));
    h.osb
        .script_poll(Ok(poll(LastOperationState::Failed, Some("quota exceeded"))));

    let mut operation = h
        .controller
        .claim_operation(OperationType::Create, ResourceType::ServiceInstance, "i-1")
        .await
        .unwrap();
    let (_guard, cancel) = cancellation_pair();
    let err = h
        .controller
        .create(
            Object::from(sm_instance("i-1", "acme")),
            &mut operation,
            cancel,
        )
        .await
        .unwrap_err();

    assert!(err.to_string().contains("quota exceeded"));
    assert_eq!(operation.state, OperationState::Failed);
    assert_eq!(operation.description.as_deref(), Some("quota exceeded"));
    assert!(operation.deletion_scheduled.is_some());
}

#[tokio::test]
async fn reference_provision_rejects_cross_tenant_target() {
    let h = harness();
    seed_catalog(h.repository.as_ref()).await;

    let mut shared = sm_instance("shared-1", "acme");
    shared.shared = true;
    shared.ready = true;
    h.repository
        .create(Object::from(shared))
        .await
        .unwrap();

    let mut reference = sm_instance("ref-1", "globex");
    reference.service_plan_id = REFERENCE_PLAN_ID.to_string();
    reference.parameters = Some(serde_json::json!({
        REFERENCED_INSTANCE_ID_PARAM: "shared-1"
    }));

    let mut operation = h
        .controller
        .claim_operation(OperationType::Create, ResourceType::ServiceInstance, "ref-1")
        .await
        .unwrap();
    let (_guard, cancel) = cancellation_pair();
    let err = h
        .controller
        .create(Object::from(reference), &mut operation, cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, SmError::BadRequest(_)));
    assert!(get_instance(h.repository.as_ref(), "ref-1").await.is_none());
    // The broker was never involved.
    assert_eq!(
        h.osb
            .provision_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}

#[tokio::test]
async fn reference_provision_rejects_non_shared_target() {
    let h = harness();
    seed_catalog(h.repository.as_ref()).await;

    // Same tenant, but the target was never marked shared.
    let mut target = sm_instance("plain-1", "acme");
    target.shared = false;
    target.ready = true;
    h.repository.create(Object::from(target)).await.unwrap();

    let mut reference = sm_instance("ref-1", "acme");
    reference.service_plan_id = REFERENCE_PLAN_ID.to_string();
    reference.parameters = Some(serde_json::json!({
        REFERENCED_INSTANCE_ID_PARAM: "plain-1"
    }));

    let mut operation = h
        .controller
        .claim_operation(OperationType::Create, ResourceType::ServiceInstance, "ref-1")
        .await
        .unwrap();
    let (_guard, cancel) = cancellation_pair();
    let err = h
        .controller
        .create(Object::from(reference), &mut operation, cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, SmError::BadRequest(_)));
    assert!(err.to_string().contains("not shared"));
    assert!(get_instance(h.repository.as_ref(), "ref-1").await.is_none());
    assert_eq!(
        h.osb
            .provision_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}

#[tokio::test]
async fn reference_provision_is_ready_without_broker_calls() {
    let h = harness();
    seed_catalog(h.repository.as_ref()).await;

    let mut shared = sm_instance("shared-1", "acme");
    shared.shared = true;
    shared.ready = true;
    h.repository.create(Object::from(shared)).await.unwrap();

    let mut reference = sm_instance("ref-1", "acme");
    reference.service_plan_id = REFERENCE_PLAN_ID.to_string();
    reference.parameters = Some(serde_json::json!({
        REFERENCED_INSTANCE_ID_PARAM: "shared-1"
    }));

    let mut operation = h
        .controller
        .claim_operation(OperationType::Create, ResourceType::ServiceInstance, "ref-1")
        .await
        .unwrap();
    let (_guard, cancel) = cancellation_pair();
    h.controller
        .create(Object::from(reference), &mut operation, cancel)
        .await
        .unwrap();

    let stored = get_instance(h.repository.as_ref(), "ref-1").await.unwrap();
    assert_eq!(stored.referenced_instance_id.as_deref(), Some("shared-1"));
    assert!(stored.ready);
    assert_eq!(operation.state, OperationState::Succeeded);
    assert_eq!(
        h.osb
            .provision_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}

#[tokio::test]
async fn deprovision_gone_is_success_and_row_is_removed() {
    let h = harness();
    seed_catalog(h.repository.as_ref()).await;

    let mut instance = sm_instance("i-1", "acme");
    instance.ready = true;
    h.repository.create(Object::from(instance)).await.unwrap();

    h.osb.script_deprovision(Err(http_error(410)));

    let mut operation = h
        .controller
        .claim_operation(OperationType::Delete, ResourceType::ServiceInstance, "i-1")
        .await
        .unwrap();
    let (_guard, cancel) = cancellation_pair();
    let removed = h
        .controller
        .delete(
            ResourceType::ServiceInstance,
            vec![Criterion::by_field("id", "i-1")],
            &mut operation,
            cancel,
        )
        .await
        .unwrap();

    assert_eq!(removed, 1);
    assert_eq!(operation.state, OperationState::Succeeded);
    assert!(get_instance(h.repository.as_ref(), "i-1").await.is_none());
}

#[tokio::test]
async fn deprovision_server_error_schedules_mitigation_and_keeps_row() {
    let h = harness();
    seed_catalog(h.repository.as_ref()).await;

    let mut instance = sm_instance("i-1", "acme");
    instance.ready = true;
    h.repository.create(Object::from(instance)).await.unwrap();

    h.osb.script_deprovision(Err(http_error(503)));

    let mut operation = h
        .controller
        .claim_operation(OperationType::Delete, ResourceType::ServiceInstance, "i-1")
        .await
        .unwrap();
    let (_guard, cancel) = cancellation_pair();
    let err = h
        .controller
        .delete(
            ResourceType::ServiceInstance,
            vec![Criterion::by_field("id", "i-1")],
            &mut operation,
            cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SmError::Broker { .. }));
    assert!(operation.deletion_scheduled.is_some());
    assert!(get_instance(h.repository.as_ref(), "i-1").await.is_some());
}

#[tokio::test]
async fn delete_with_bindings_is_rejected() {
    let h = harness();
    seed_catalog(h.repository.as_ref()).await;

    let mut instance = sm_instance("i-1", "acme");
    instance.ready = true;
    h.repository.create(Object::from(instance)).await.unwrap();
    let mut binding = sm_core::ServiceBinding::new("b-1", "b-1", "i-1");
    binding.ready = true;
    h.repository.create(Object::from(binding)).await.unwrap();

    let mut operation = h
        .controller
        .claim_operation(OperationType::Delete, ResourceType::ServiceInstance, "i-1")
        .await
        .unwrap();
    let (_guard, cancel) = cancellation_pair();
    let err = h
        .controller
        .delete(
            ResourceType::ServiceInstance,
            vec![Criterion::by_field("id", "i-1")],
            &mut operation,
            cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SmError::BadRequest(_)));
    assert!(get_instance(h.repository.as_ref(), "i-1").await.is_some());
    assert_eq!(
        h.osb
            .deprovision_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}

#[tokio::test]
async fn concurrent_delete_claims_conflict() {
    let h = harness();
    seed_catalog(h.repository.as_ref()).await;

    let mut instance = sm_instance("i-1", "acme");
    instance.ready = true;
    h.repository.create(Object::from(instance)).await.unwrap();

    let _first = h
        .controller
        .claim_operation(OperationType::Delete, ResourceType::ServiceInstance, "i-1")
        .await
        .unwrap();
    let second = h
        .controller
        .claim_operation(OperationType::Delete, ResourceType::ServiceInstance, "i-1")
        .await
        .unwrap_err();

    assert!(matches!(
        second,
        SmError::Conflict {
            kind: ConflictKind::AsyncOperationInProgress,
            ..
        }
    ));
}

#[tokio::test]
async fn foreign_platform_create_skips_broker() {
    let h = harness();
    seed_catalog(h.repository.as_ref()).await;

    let mut instance = ServiceInstance::new("i-cf", "i-cf", PLAN_ID, "cf-platform-1");
    instance.ready = false;
    assert_ne!(instance.platform_id, SERVICE_MANAGER_PLATFORM);

    let mut operation = h
        .controller
        .claim_operation(OperationType::Create, ResourceType::ServiceInstance, "i-cf")
        .await
        .unwrap();
    let (_guard, cancel) = cancellation_pair();
    h.controller
        .create(Object::from(instance), &mut operation, cancel)
        .await
        .unwrap();

    assert_eq!(
        h.osb
            .provision_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
    assert!(get_instance(h.repository.as_ref(), "i-cf").await.is_some());
}

#[tokio::test]
async fn cancelled_poll_keeps_operation_resumable() {
    let h = harness();
    seed_catalog(h.repository.as_ref()).await;

    h.osb.script_provision(Ok(ProvisionResponse {
        is_async: true,
        operation_key: Some("op-1".to_string()),
        dashboard_url: None,
    }));

    let mut operation = h
        .controller
        .claim_operation(OperationType::Create, ResourceType::ServiceInstance, "i-1")
        .await
        .unwrap();
    let (guard, cancel) = cancellation_pair();
    // Cancel before the first poll tick fires.
    guard.send(true).unwrap();

    h.controller
        .create(
            Object::from(sm_instance("i-1", "acme")),
            &mut operation,
            cancel,
        )
        .await
        .unwrap();

    assert_eq!(operation.state, OperationState::InProgress);
    assert!(operation.reschedule);
    assert_eq!(
        h.osb.poll_calls.load(std::sync::atomic::Ordering::SeqCst),
        0
    );
    // Row persisted but not ready until the maintainer resumes.
    let instance = get_instance(h.repository.as_ref(), "i-1").await.unwrap();
    assert!(!instance.ready);
}

#[tokio::test]
async fn update_is_a_pass_through_for_sm_instances() {
    let h = harness();
    seed_catalog(h.repository.as_ref()).await;

    let mut instance = sm_instance("i-1", "acme");
    instance.ready = true;
    h.repository.create(Object::from(instance)).await.unwrap();

    let mut stored = get_instance(h.repository.as_ref(), "i-1").await.unwrap();
    stored.name = "renamed".to_string();

    let mut operation = h
        .controller
        .claim_operation(OperationType::Update, ResourceType::ServiceInstance, "i-1")
        .await
        .unwrap();
    let (_guard, cancel) = cancellation_pair();
    h.controller
        .update(Object::from(stored), vec![], &mut operation, cancel)
        .await
        .unwrap();

    // No broker involvement for updates.
    assert_eq!(
        h.osb
            .provision_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
    assert_eq!(operation.state, OperationState::Succeeded);
    let renamed = get_instance(h.repository.as_ref(), "i-1").await.unwrap();
    assert_eq!(renamed.name, "renamed");
}

#[tokio::test]
async fn deprovision_of_unknown_criteria_is_a_noop() {
    let h = harness();
    seed_catalog(h.repository.as_ref()).await;

    let mut operation = h
        .controller
        .claim_operation(OperationType::Delete, ResourceType::ServiceInstance, "ghost")
        .await
        .unwrap();
    let (_guard, cancel) = cancellation_pair();
    let removed = h
        .controller
        .delete(
            ResourceType::ServiceInstance,
            vec![Criterion::by_field("id", "ghost")],
            &mut operation,
            cancel,
        )
        .await
        .unwrap();

    assert_eq!(removed, 0);
    assert_eq!(operation.state, OperationState::Succeeded);
}
