//! Service offering entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A service offered by an upstream broker. `catalog_id` is the broker-local
/// id under which the offering appears in the broker's catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceOffering {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub catalog_id: String,
    pub catalog_name: String,
    pub broker_id: String,
    pub bindable: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
