//! Broker catalog ingestion and reference-plan augmentation
//!
//! Runs at broker registration and on catalog refresh. Catalogs reusing the
//! reserved reference plan name are rejected before anything is persisted;
//! every offering with a shareable plan gets exactly one synthetic reference
//! plan, reused across refreshes.

use sm_core::{
    Catalog, ConflictKind, Object, ResourceType, Result, ServiceBroker, ServiceOffering,
    ServicePlan, SmError, REFERENCE_PLAN_NAME,
};
use sm_ports::{Criterion, Repository, RepositoryError, TransactionalRepository};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct BrokerCatalogService {
    repository: Arc<dyn TransactionalRepository>,
}

/// Incoming catalogs must not use the reserved reference plan name.
pub fn verify_catalog_does_not_use_reference_plan(catalog: &Catalog) -> Result<()> {
    for service in &catalog.services {
        for plan in &service.plans {
            if plan.name == REFERENCE_PLAN_NAME {
                return Err(SmError::conflict(
                    ConflictKind::CatalogUsesReservedPlanName,
                    format!("catalog of service {} uses the reserved plan name {REFERENCE_PLAN_NAME}", service.name),
                ));
            }
        }
    }
    Ok(())
}

impl BrokerCatalogService {
    pub fn new(repository: Arc<dyn TransactionalRepository>) -> Self {
        Self { repository }
    }

    /// Normalize the broker's catalog document into offering/plan rows,
    /// injecting a reference plan per shareable offering. All validation
    /// happens before the first write, so a rejected catalog leaves no
    /// partial state.
    pub async fn register_broker_catalog(&self, broker: &ServiceBroker) -> Result<()> {
        let catalog = Catalog::parse(&broker.catalog)
            .map_err(|err| SmError::BadRequest(format!("invalid catalog document: {err}")))?;
        verify_catalog_does_not_use_reference_plan(&catalog)?;

        let mut offerings = Vec::new();
        let mut plans = Vec::new();

        for service in &catalog.services {
            let existing_offering = self
                .existing_offering(&broker.id, &service.id)
                .await?;
            let offering_id = existing_offering
                .as_ref()
                .map(|offering| offering.id.clone())
                .unwrap_or_else(|| Uuid::new_v4().to_string());

            let now = chrono::Utc::now();
            offerings.push(ServiceOffering {
                id: offering_id.clone(),
                name: service.name.clone(),
                description: service.description.clone(),
                catalog_id: service.id.clone(),
                catalog_name: service.name.clone(),
                broker_id: broker.id.clone(),
                bindable: service.bindable,
                created_at: existing_offering
                    .map(|offering| offering.created_at)
                    .unwrap_or(now),
                updated_at: now,
            });

            let mut has_shareable = false;
            for plan in &service.plans {
                if plan.is_shareable() {
                    if !plan.bindable.unwrap_or(service.bindable) {
                        return Err(SmError::conflict(
                            ConflictKind::PlanMustBeBindable,
                            format!("shareable plan {} must be bindable", plan.name),
                        ));
                    }
                    has_shareable = true;
                }

                let existing_plan = self
                    .existing_plan(
                        &offering_id,
                        &[Criterion::by_field("catalog_id", &plan.id)],
                    )
                    .await?;
                let plan_id = existing_plan
                    .as_ref()
                    .map(|p| p.id.clone())
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                plans.push(ServicePlan {
                    id: plan_id,
                    name: plan.name.clone(),
                    description: plan.description.clone(),
                    catalog_id: plan.id.clone(),
                    catalog_name: plan.name.clone(),
                    service_offering_id: offering_id.clone(),
                    bindable: plan.bindable,
                    metadata: plan.metadata.clone().unwrap_or(serde_json::Value::Null),
                    created_at: existing_plan.map(|p| p.created_at).unwrap_or(now),
                    updated_at: now,
                });
            }

            if has_shareable {
                let reference = self
                    .existing_plan(
                        &offering_id,
                        &[Criterion::by_field("name", REFERENCE_PLAN_NAME)],
                    )
                    .await?
                    .unwrap_or_else(|| ServicePlan::reference_plan_for_offering(&offering_id));
                info!(
                    broker = %broker.name,
                    offering = %service.name,
                    reference_plan_id = %reference.id,
                    "attaching reference plan to shareable offering"
                );
                plans.push(reference);
            }
        }

        for offering in offerings {
            self.upsert(Object::from(offering)).await?;
        }
        for plan in plans {
            self.upsert(Object::from(plan)).await?;
        }
        Ok(())
    }

    async fn existing_offering(
        &self,
        broker_id: &str,
        catalog_id: &str,
    ) -> Result<Option<ServiceOffering>> {
        match self
            .repository
            .get(
                ResourceType::ServiceOffering,
                &[
                    Criterion::by_field("broker_id", broker_id),
                    Criterion::by_field("catalog_id", catalog_id),
                ],
            )
            .await
        {
            Ok(object) => Ok(object.into_service_offering()),
            Err(RepositoryError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn existing_plan(
        &self,
        offering_id: &str,
        extra: &[Criterion],
    ) -> Result<Option<ServicePlan>> {
        let mut criteria = vec![Criterion::by_field("service_offering_id", offering_id)];
        criteria.extend_from_slice(extra);
        match self
            .repository
            .get(ResourceType::ServicePlan, &criteria)
            .await
        {
            Ok(object) => Ok(object.into_service_plan()),
            Err(RepositoryError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn upsert(&self, object: Object) -> Result<()> {
        let existing = self
            .repository
            .get(
                object.resource_type(),
                &[Criterion::by_field("id", object.id())],
            )
            .await;
        match existing {
            Ok(stored) => {
                // Carry the stored version so the optimistic check passes.
                let mut object = object;
                object.touch(stored.updated_at());
                self.repository
                    .update(object, vec![])
                    .await
                    .map_err(SmError::from)?;
            }
            Err(RepositoryError::NotFound(_)) => {
                self.repository
                    .create(object)
                    .await
                    .map_err(SmError::from)?;
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }
}
