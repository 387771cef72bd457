//! Reference instance resolution
//!
//! A reference instance is a handle, in one platform, onto a shared instance
//! owned by the same tenant. Provisioning one never talks to a broker;
//! binding against one is transparently re-targeted at the referenced
//! instance while the binding row keeps pointing to the reference.

use sm_core::{Result, ServiceInstance, SmError};
use sm_ports::{Criterion, Repository, RepositoryError};

/// Validate and materialize a reference instance: the referenced instance
/// must exist, be marked shared and belong to the caller's tenant. The
/// reference becomes ready immediately.
pub async fn materialize_reference(
    repository: &dyn Repository,
    instance: &mut ServiceInstance,
    tenant_key: &str,
) -> Result<()> {
    let referenced_id = instance
        .referenced_instance_param()
        .ok_or_else(|| {
            SmError::BadRequest(
                "provisioning a reference plan requires a referenced_instance_id parameter"
                    .to_string(),
            )
        })?
        .to_string();

    let referenced = resolve_instance(repository, &referenced_id)
        .await
        .map_err(|err| match err {
            SmError::NotFound(_) => SmError::BadRequest(format!(
                "referenced instance {referenced_id} does not exist"
            )),
            other => other,
        })?;

    if !referenced.shared {
        return Err(SmError::BadRequest(format!(
            "referenced instance {referenced_id} is not shared"
        )));
    }

    if instance.tenant(tenant_key) != referenced.tenant(tenant_key) {
        return Err(SmError::BadRequest(format!(
            "referenced instance {referenced_id} belongs to a different tenant"
        )));
    }

    instance.referenced_instance_id = Some(referenced.id);
    instance.ready = true;
    Ok(())
}

/// The instance OSB calls are actually issued against: for a reference, the
/// shared instance it points at; otherwise the instance itself.
pub async fn effective_instance(
    repository: &dyn Repository,
    instance: &ServiceInstance,
) -> Result<ServiceInstance> {
    match &instance.referenced_instance_id {
        Some(referenced_id) => resolve_instance(repository, referenced_id).await,
        None => Ok(instance.clone()),
    }
}

async fn resolve_instance(repository: &dyn Repository, id: &str) -> Result<ServiceInstance> {
    let object = repository
        .get(
            sm_core::ResourceType::ServiceInstance,
            &[Criterion::by_field("id", id)],
        )
        .await
        .map_err(|err| match err {
            RepositoryError::NotFound(_) => SmError::NotFound(format!("service instance {id}")),
            other => other.into(),
        })?;
    object
        .into_service_instance()
        .ok_or_else(|| SmError::Internal("stored instance has wrong type".to_string()))
}
