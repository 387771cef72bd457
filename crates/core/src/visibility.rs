//! Plan visibility entity

use crate::labels::Labels;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Controls which platforms (and, via labels, which tenants) may see a plan.
/// A null `platform_id` makes the plan public.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visibility {
    pub id: String,
    pub service_plan_id: String,
    pub platform_id: Option<String>,
    #[serde(default)]
    pub labels: Labels,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
