//! Service binding entity

use crate::labels::Labels;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceBinding {
    pub id: String,
    pub name: String,
    /// The instance the consumer bound against. For bindings created through
    /// a reference instance this stays the reference id even though the OSB
    /// call is issued against the referenced shared instance.
    pub service_instance_id: String,
    pub parameters: Option<serde_json::Value>,
    /// Opaque credentials document returned by the broker.
    pub credentials: serde_json::Value,
    #[serde(default)]
    pub labels: Labels,
    pub ready: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceBinding {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        service_instance_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            service_instance_id: service_instance_id.into(),
            parameters: None,
            credentials: serde_json::Value::Null,
            labels: Labels::new(),
            ready: false,
            created_at: now,
            updated_at: now,
        }
    }
}
