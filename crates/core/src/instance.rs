//! Service instance entity

use crate::labels::{tenant_value, Labels};
use crate::platform::SERVICE_MANAGER_PLATFORM;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provision parameter naming the shared instance a reference points at.
pub const REFERENCED_INSTANCE_ID_PARAM: &str = "referenced_instance_id";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub name: String,
    pub service_plan_id: String,
    pub platform_id: String,
    pub dashboard_url: Option<String>,
    /// Opaque provision parameters forwarded to the broker.
    pub parameters: Option<serde_json::Value>,
    #[serde(default)]
    pub labels: Labels,
    /// Set when this instance is a reference onto a shared instance.
    pub referenced_instance_id: Option<String>,
    /// Set when this instance is marked as a source for references.
    pub shared: bool,
    pub ready: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceInstance {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        service_plan_id: impl Into<String>,
        platform_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            service_plan_id: service_plan_id.into(),
            platform_id: platform_id.into(),
            dashboard_url: None,
            parameters: None,
            labels: Labels::new(),
            referenced_instance_id: None,
            shared: false,
            ready: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Instances created directly against the service manager carry the
    /// reserved platform id; only those are orchestrated against brokers.
    pub fn is_sm_platform(&self) -> bool {
        self.platform_id == SERVICE_MANAGER_PLATFORM
    }

    pub fn is_reference(&self) -> bool {
        self.referenced_instance_id.is_some()
    }

    pub fn tenant<'a>(&'a self, tenant_key: &str) -> Option<&'a str> {
        tenant_value(&self.labels, tenant_key)
    }

    /// The `referenced_instance_id` provision parameter, when present.
    pub fn referenced_instance_param(&self) -> Option<&str> {
        self.parameters
            .as_ref()
            .and_then(|p| p.get(REFERENCED_INSTANCE_ID_PARAM))
            .and_then(serde_json::Value::as_str)
    }
}
