//! Service broker entity

use crate::labels::Labels;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Basic credentials used to authenticate against an upstream broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

/// An upstream OSB backend registered with the service manager. The catalog
/// is kept as the opaque JSON document the broker returned; normalized
/// offering/plan rows are derived from it at registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceBroker {
    pub id: String,
    pub name: String,
    pub broker_url: String,
    pub credentials: BasicCredentials,
    pub catalog: serde_json::Value,
    #[serde(default)]
    pub labels: Labels,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceBroker {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        broker_url: impl Into<String>,
        credentials: BasicCredentials,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            broker_url: broker_url.into(),
            credentials,
            catalog: serde_json::Value::Null,
            labels: Labels::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
