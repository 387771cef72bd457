//! Platform entity

use crate::broker::BasicCredentials;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved platform id for instances created directly against the service
/// manager.
pub const SERVICE_MANAGER_PLATFORM: &str = "service-manager";

/// A platform (e.g. a Cloud Foundry or Kubernetes installation) that issues
/// OSB calls against the service manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platform {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub platform_type: String,
    pub credentials: Option<BasicCredentials>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
