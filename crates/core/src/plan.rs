//! Service plan entity and the reserved reference plan

use crate::offering::ServiceOffering;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserved plan name under which reference instances are provisioned.
/// Incoming catalogs must not use it.
pub const REFERENCE_PLAN_NAME: &str = "reference-plan";

pub const REFERENCE_PLAN_DESCRIPTION: &str =
    "Plan for sharing a service instance between environments";

/// Catalog metadata key marking a plan as shareable.
pub const SUPPORTS_INSTANCE_SHARING_KEY: &str = "supportsInstanceSharing";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicePlan {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub catalog_id: String,
    pub catalog_name: String,
    pub service_offering_id: String,
    /// Plan-level bindability override; falls back to the offering.
    pub bindable: Option<bool>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServicePlan {
    /// A plan is shareable when its catalog metadata carries
    /// `supportsInstanceSharing: true`.
    pub fn is_shareable(&self) -> bool {
        self.metadata
            .get(SUPPORTS_INSTANCE_SHARING_KEY)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    pub fn is_reference_plan(&self) -> bool {
        self.name == REFERENCE_PLAN_NAME
    }

    /// Build the synthetic reference plan attached to a shareable offering.
    pub fn reference_plan_for_offering(service_offering_id: &str) -> Self {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        Self {
            id: id.clone(),
            name: REFERENCE_PLAN_NAME.to_string(),
            description: Some(REFERENCE_PLAN_DESCRIPTION.to_string()),
            catalog_id: id,
            catalog_name: REFERENCE_PLAN_NAME.to_string(),
            service_offering_id: service_offering_id.to_string(),
            bindable: Some(true),
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Effective bindability of a plan: plan-level override wins, otherwise the
/// offering decides.
pub fn is_plan_bindable(offering: &ServiceOffering, plan: &ServicePlan) -> bool {
    plan.bindable.unwrap_or(offering.bindable)
}
