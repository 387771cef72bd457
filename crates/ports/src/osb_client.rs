//! OSB client facade port
//!
//! Typed calls against one upstream broker. All mutating requests carry
//! `accepts_incomplete=true`; responses expose the async flag and the broker
//! operation key used for subsequent polls. One client is constructed per
//! broker from its basic credentials.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sm_core::ServiceBroker;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub instance_id: String,
    pub service_id: String,
    pub plan_id: String,
    pub organization_guid: String,
    pub space_guid: String,
    pub parameters: Option<serde_json::Value>,
    pub context: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct ProvisionResponse {
    pub is_async: bool,
    pub operation_key: Option<String>,
    pub dashboard_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeprovisionRequest {
    pub instance_id: String,
    pub service_id: String,
    pub plan_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct DeprovisionResponse {
    pub is_async: bool,
    pub operation_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BindRequest {
    pub instance_id: String,
    pub binding_id: String,
    pub service_id: String,
    pub plan_id: String,
    pub parameters: Option<serde_json::Value>,
    pub context: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct BindResponse {
    pub is_async: bool,
    pub operation_key: Option<String>,
    pub credentials: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct UnbindRequest {
    pub instance_id: String,
    pub binding_id: String,
    pub service_id: String,
    pub plan_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct UnbindResponse {
    pub is_async: bool,
    pub operation_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GetBindingRequest {
    pub instance_id: String,
    pub binding_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct GetBindingResponse {
    pub credentials: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct LastOperationRequest {
    pub instance_id: String,
    /// Set when polling a binding operation.
    pub binding_id: Option<String>,
    pub service_id: Option<String>,
    pub plan_id: Option<String>,
    pub operation_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LastOperationState {
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "succeeded")]
    Succeeded,
    #[serde(rename = "failed")]
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastOperationResponse {
    pub state: LastOperationState,
    pub description: Option<String>,
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum OsbClientError {
    #[error("broker returned status {status}: {}", description.as_deref().unwrap_or("no description"))]
    Http {
        status: u16,
        error_code: Option<String>,
        description: Option<String>,
    },

    #[error("request to broker timed out: {0}")]
    Timeout(String),

    #[error("could not reach broker: {0}")]
    Network(String),

    #[error("malformed broker response: {0}")]
    MalformedResponse(String),
}

impl OsbClientError {
    /// Deprovision returning 410 Gone counts as success.
    pub fn is_gone(&self) -> bool {
        matches!(self, OsbClientError::Http { status: 410, .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            OsbClientError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[async_trait]
pub trait OsbClient: Send + Sync {
    async fn provision(&self, request: &ProvisionRequest)
        -> Result<ProvisionResponse, OsbClientError>;

    async fn deprovision(
        &self,
        request: &DeprovisionRequest,
    ) -> Result<DeprovisionResponse, OsbClientError>;

    async fn bind(&self, request: &BindRequest) -> Result<BindResponse, OsbClientError>;

    async fn unbind(&self, request: &UnbindRequest) -> Result<UnbindResponse, OsbClientError>;

    async fn get_binding(
        &self,
        request: &GetBindingRequest,
    ) -> Result<GetBindingResponse, OsbClientError>;

    async fn poll_last_operation(
        &self,
        request: &LastOperationRequest,
    ) -> Result<LastOperationResponse, OsbClientError>;
}

/// Builds one stateless client per broker from its credentials.
pub trait OsbClientFactory: Send + Sync {
    fn client_for(&self, broker: &ServiceBroker) -> Result<Arc<dyn OsbClient>, OsbClientError>;
}
