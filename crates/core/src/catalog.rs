//! Broker catalog wire documents
//!
//! The shape a broker returns from `GET /v2/catalog`. Registration parses
//! this document, runs the reference-plan augmentation and persists the
//! normalized offering/plan rows.

use crate::plan::SUPPORTS_INSTANCE_SHARING_KEY;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub services: Vec<CatalogService>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogService {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub bindable: bool,
    pub plans: Vec<CatalogPlan>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogPlan {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub bindable: Option<bool>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl CatalogPlan {
    pub fn is_shareable(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(SUPPORTS_INSTANCE_SHARING_KEY))
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

impl Catalog {
    pub fn parse(document: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(document.clone())
    }
}
