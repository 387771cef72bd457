//! HTTP implementation of the OSB client facade
//!
//! One stateless client per broker, built from the broker's basic
//! credentials. Every mutating call carries `accepts_incomplete=true`; a 202
//! reply marks the response asynchronous and may carry a broker operation
//! key.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use sm_core::ServiceBroker;
use sm_ports::{
    BindRequest, BindResponse, DeprovisionRequest, DeprovisionResponse, GetBindingRequest,
    GetBindingResponse, LastOperationRequest, LastOperationResponse, OsbClient, OsbClientError,
    OsbClientFactory, ProvisionRequest, ProvisionResponse, UnbindRequest, UnbindResponse,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const BROKER_API_VERSION_HEADER: &str = "X-Broker-API-Version";
const BROKER_API_VERSION: &str = "2.14";

pub struct HttpOsbClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

#[derive(Debug, Deserialize, Default)]
struct ProvisionWire {
    dashboard_url: Option<String>,
    operation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct OperationWire {
    operation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct BindWire {
    credentials: Option<serde_json::Value>,
    operation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ErrorWire {
    error: Option<String>,
    description: Option<String>,
}

impl HttpOsbClient {
    pub fn new(broker: &ServiceBroker, timeout: Duration) -> Result<Self, OsbClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OsbClientError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: broker.broker_url.trim_end_matches('/').to_string(),
            username: broker.credentials.username.clone(),
            password: broker.credentials.password.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .basic_auth(&self.username, Some(&self.password))
            .header(BROKER_API_VERSION_HEADER, BROKER_API_VERSION)
    }

    async fn send(
        &self,
        request: RequestBuilder,
    ) -> Result<(StatusCode, serde_json::Value), OsbClientError> {
        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                OsbClientError::Timeout(err.to_string())
            } else {
                OsbClientError::Network(err.to_string())
            }
        })?;

        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);

        if !status.is_success() {
            let err: ErrorWire = serde_json::from_value(body).unwrap_or_default();
            return Err(OsbClientError::Http {
                status: status.as_u16(),
                error_code: err.error,
                description: err.description,
            });
        }

        debug!(status = status.as_u16(), "broker call succeeded");
        Ok((status, body))
    }

    fn parse<T: serde::de::DeserializeOwned + Default>(
        body: serde_json::Value,
    ) -> Result<T, OsbClientError> {
        if body.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(body).map_err(|e| OsbClientError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl OsbClient for HttpOsbClient {
    async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<ProvisionResponse, OsbClientError> {
        let body = serde_json::json!({
            "service_id": request.service_id,
            "plan_id": request.plan_id,
            "organization_guid": request.organization_guid,
            "space_guid": request.space_guid,
            "parameters": request.parameters,
            "context": request.context,
        });
        let path = format!(
            "/v2/service_instances/{}?accepts_incomplete=true",
            request.instance_id
        );
        let (status, body) = self.send(self.request(Method::PUT, &path).json(&body)).await?;
        let wire: ProvisionWire = Self::parse(body)?;
        Ok(ProvisionResponse {
            is_async: status == StatusCode::ACCEPTED,
            operation_key: wire.operation,
            dashboard_url: wire.dashboard_url,
        })
    }

    async fn deprovision(
        &self,
        request: &DeprovisionRequest,
    ) -> Result<DeprovisionResponse, OsbClientError> {
        let path = format!(
            "/v2/service_instances/{}?accepts_incomplete=true&service_id={}&plan_id={}",
            request.instance_id, request.service_id, request.plan_id
        );
        let (status, body) = self.send(self.request(Method::DELETE, &path)).await?;
        let wire: OperationWire = Self::parse(body)?;
        Ok(DeprovisionResponse {
            is_async: status == StatusCode::ACCEPTED,
            operation_key: wire.operation,
        })
    }

    async fn bind(&self, request: &BindRequest) -> Result<BindResponse, OsbClientError> {
        let body = serde_json::json!({
            "service_id": request.service_id,
            "plan_id": request.plan_id,
            "parameters": request.parameters,
            "context": request.context,
        });
        let path = format!(
            "/v2/service_instances/{}/service_bindings/{}?accepts_incomplete=true",
            request.instance_id, request.binding_id
        );
        let (status, body) = self.send(self.request(Method::PUT, &path).json(&body)).await?;
        let wire: BindWire = Self::parse(body)?;
        Ok(BindResponse {
            is_async: status == StatusCode::ACCEPTED,
            operation_key: wire.operation,
            credentials: wire.credentials.unwrap_or(serde_json::Value::Null),
        })
    }

    async fn unbind(&self, request: &UnbindRequest) -> Result<UnbindResponse, OsbClientError> {
        let path = format!(
            "/v2/service_instances/{}/service_bindings/{}?accepts_incomplete=true&service_id={}&plan_id={}",
            request.instance_id, request.binding_id, request.service_id, request.plan_id
        );
        let (status, body) = self.send(self.request(Method::DELETE, &path)).await?;
        let _: OperationWire = Self::parse(body)?;
        Ok(UnbindResponse {
            is_async: status == StatusCode::ACCEPTED,
            operation_key: None,
        })
    }

    async fn get_binding(
        &self,
        request: &GetBindingRequest,
    ) -> Result<GetBindingResponse, OsbClientError> {
        let path = format!(
            "/v2/service_instances/{}/service_bindings/{}",
            request.instance_id, request.binding_id
        );
        let (_, body) = self.send(self.request(Method::GET, &path)).await?;
        let wire: BindWire = Self::parse(body)?;
        Ok(GetBindingResponse {
            credentials: wire.credentials.unwrap_or(serde_json::Value::Null),
        })
    }

    async fn poll_last_operation(
        &self,
        request: &LastOperationRequest,
    ) -> Result<LastOperationResponse, OsbClientError> {
        let mut path = match &request.binding_id {
            Some(binding_id) => format!(
                "/v2/service_instances/{}/service_bindings/{}/last_operation",
                request.instance_id, binding_id
            ),
            None => format!("/v2/service_instances/{}/last_operation", request.instance_id),
        };
        let mut query = Vec::new();
        if let Some(service_id) = &request.service_id {
            query.push(format!("service_id={service_id}"));
        }
        if let Some(plan_id) = &request.plan_id {
            query.push(format!("plan_id={plan_id}"));
        }
        if let Some(operation_key) = &request.operation_key {
            query.push(format!("operation={operation_key}"));
        }
        if !query.is_empty() {
            path = format!("{path}?{}", query.join("&"));
        }

        let (_, body) = self.send(self.request(Method::GET, &path)).await?;
        serde_json::from_value(body).map_err(|e| OsbClientError::MalformedResponse(e.to_string()))
    }
}

/// Factory wired into the orchestrator; builds one client per broker.
pub struct HttpOsbClientFactory {
    timeout: Duration,
}

impl HttpOsbClientFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl OsbClientFactory for HttpOsbClientFactory {
    fn client_for(&self, broker: &ServiceBroker) -> Result<Arc<dyn OsbClient>, OsbClientError> {
        Ok(Arc::new(HttpOsbClient::new(broker, self.timeout)?))
    }
}
