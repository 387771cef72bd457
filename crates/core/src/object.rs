//! Typed objects and resource types
//!
//! The repository stores heterogeneous resources; `Object` is the closed set
//! of types it understands, with just enough uniform access (id, fields,
//! labels, timestamps) for criteria evaluation and generic storage plumbing.

use crate::binding::ServiceBinding;
use crate::broker::ServiceBroker;
use crate::instance::ServiceInstance;
use crate::labels::Labels;
use crate::offering::ServiceOffering;
use crate::operation::Operation;
use crate::plan::ServicePlan;
use crate::platform::Platform;
use crate::visibility::Visibility;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    ServiceBroker,
    ServiceOffering,
    ServicePlan,
    ServiceInstance,
    ServiceBinding,
    Operation,
    Platform,
    Visibility,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResourceType::ServiceBroker => "service_broker",
            ResourceType::ServiceOffering => "service_offering",
            ResourceType::ServicePlan => "service_plan",
            ResourceType::ServiceInstance => "service_instance",
            ResourceType::ServiceBinding => "service_binding",
            ResourceType::Operation => "operation",
            ResourceType::Platform => "platform",
            ResourceType::Visibility => "visibility",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "resource_type", rename_all = "snake_case")]
pub enum Object {
    ServiceBroker(ServiceBroker),
    ServiceOffering(ServiceOffering),
    ServicePlan(ServicePlan),
    ServiceInstance(ServiceInstance),
    ServiceBinding(ServiceBinding),
    Operation(Operation),
    Platform(Platform),
    Visibility(Visibility),
}

macro_rules! typed_accessors {
    ($variant:ident, $ty:ty, $as_ref:ident, $into:ident) => {
        pub fn $as_ref(&self) -> Option<&$ty> {
            match self {
                Object::$variant(inner) => Some(inner),
                _ => None,
            }
        }

        pub fn $into(self) -> Option<$ty> {
            match self {
                Object::$variant(inner) => Some(inner),
                _ => None,
            }
        }
    };
}

impl Object {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            Object::ServiceBroker(_) => ResourceType::ServiceBroker,
            Object::ServiceOffering(_) => ResourceType::ServiceOffering,
            Object::ServicePlan(_) => ResourceType::ServicePlan,
            Object::ServiceInstance(_) => ResourceType::ServiceInstance,
            Object::ServiceBinding(_) => ResourceType::ServiceBinding,
            Object::Operation(_) => ResourceType::Operation,
            Object::Platform(_) => ResourceType::Platform,
            Object::Visibility(_) => ResourceType::Visibility,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Object::ServiceBroker(o) => &o.id,
            Object::ServiceOffering(o) => &o.id,
            Object::ServicePlan(o) => &o.id,
            Object::ServiceInstance(o) => &o.id,
            Object::ServiceBinding(o) => &o.id,
            Object::Operation(o) => &o.id,
            Object::Platform(o) => &o.id,
            Object::Visibility(o) => &o.id,
        }
    }

    /// Uniform field access used by criteria evaluation. Only the fields the
    /// orchestration flows actually query are exposed.
    pub fn field(&self, name: &str) -> Option<String> {
        match (self, name) {
            (_, "id") => Some(self.id().to_string()),
            (Object::ServiceBroker(o), "name") => Some(o.name.clone()),
            (Object::ServiceOffering(o), "name") => Some(o.name.clone()),
            (Object::ServiceOffering(o), "catalog_id") => Some(o.catalog_id.clone()),
            (Object::ServiceOffering(o), "broker_id") => Some(o.broker_id.clone()),
            (Object::ServicePlan(o), "name") => Some(o.name.clone()),
            (Object::ServicePlan(o), "catalog_id") => Some(o.catalog_id.clone()),
            (Object::ServicePlan(o), "catalog_name") => Some(o.catalog_name.clone()),
            (Object::ServicePlan(o), "service_offering_id") => Some(o.service_offering_id.clone()),
            (Object::ServiceInstance(o), "name") => Some(o.name.clone()),
            (Object::ServiceInstance(o), "service_plan_id") => Some(o.service_plan_id.clone()),
            (Object::ServiceInstance(o), "platform_id") => Some(o.platform_id.clone()),
            (Object::ServiceInstance(o), "referenced_instance_id") => {
                o.referenced_instance_id.clone()
            }
            (Object::ServiceInstance(o), "shared") => Some(o.shared.to_string()),
            (Object::ServiceInstance(o), "ready") => Some(o.ready.to_string()),
            (Object::ServiceBinding(o), "name") => Some(o.name.clone()),
            (Object::ServiceBinding(o), "service_instance_id") => {
                Some(o.service_instance_id.clone())
            }
            (Object::Operation(o), "resource_id") => Some(o.resource_id.clone()),
            (Object::Operation(o), "resource_type") => Some(o.resource_type.to_string()),
            (Object::Operation(o), "state") => {
                Some(serde_json::to_string(&o.state).unwrap_or_default().replace('"', ""))
            }
            (Object::Platform(o), "name") => Some(o.name.clone()),
            (Object::Platform(o), "type") => Some(o.platform_type.clone()),
            (Object::Visibility(o), "service_plan_id") => Some(o.service_plan_id.clone()),
            (Object::Visibility(o), "platform_id") => o.platform_id.clone(),
            _ => None,
        }
    }

    pub fn labels(&self) -> Option<&Labels> {
        match self {
            Object::ServiceBroker(o) => Some(&o.labels),
            Object::ServiceInstance(o) => Some(&o.labels),
            Object::ServiceBinding(o) => Some(&o.labels),
            Object::Visibility(o) => Some(&o.labels),
            _ => None,
        }
    }

    pub fn labels_mut(&mut self) -> Option<&mut Labels> {
        match self {
            Object::ServiceBroker(o) => Some(&mut o.labels),
            Object::ServiceInstance(o) => Some(&mut o.labels),
            Object::ServiceBinding(o) => Some(&mut o.labels),
            Object::Visibility(o) => Some(&mut o.labels),
            _ => None,
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            Object::ServiceBroker(o) => o.updated_at,
            Object::ServiceOffering(o) => o.updated_at,
            Object::ServicePlan(o) => o.updated_at,
            Object::ServiceInstance(o) => o.updated_at,
            Object::ServiceBinding(o) => o.updated_at,
            Object::Operation(o) => o.updated_at,
            Object::Platform(o) => o.updated_at,
            Object::Visibility(o) => o.updated_at,
        }
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        match self {
            Object::ServiceBroker(o) => o.updated_at = at,
            Object::ServiceOffering(o) => o.updated_at = at,
            Object::ServicePlan(o) => o.updated_at = at,
            Object::ServiceInstance(o) => o.updated_at = at,
            Object::ServiceBinding(o) => o.updated_at = at,
            Object::Operation(o) => o.updated_at = at,
            Object::Platform(o) => o.updated_at = at,
            Object::Visibility(o) => o.updated_at = at,
        }
    }

    /// Flip the readiness flag on resources that carry one.
    pub fn set_ready(&mut self, ready: bool) {
        match self {
            Object::ServiceInstance(o) => o.ready = ready,
            Object::ServiceBinding(o) => o.ready = ready,
            _ => {}
        }
    }

    typed_accessors!(ServiceBroker, ServiceBroker, as_service_broker, into_service_broker);
    typed_accessors!(ServiceOffering, ServiceOffering, as_service_offering, into_service_offering);
    typed_accessors!(ServicePlan, ServicePlan, as_service_plan, into_service_plan);
    typed_accessors!(ServiceInstance, ServiceInstance, as_service_instance, into_service_instance);
    typed_accessors!(ServiceBinding, ServiceBinding, as_service_binding, into_service_binding);
    typed_accessors!(Operation, Operation, as_operation, into_operation);
    typed_accessors!(Platform, Platform, as_platform, into_platform);
    typed_accessors!(Visibility, Visibility, as_visibility, into_visibility);
}

impl From<ServiceBroker> for Object {
    fn from(v: ServiceBroker) -> Self {
        Object::ServiceBroker(v)
    }
}

impl From<ServiceOffering> for Object {
    fn from(v: ServiceOffering) -> Self {
        Object::ServiceOffering(v)
    }
}

impl From<ServicePlan> for Object {
    fn from(v: ServicePlan) -> Self {
        Object::ServicePlan(v)
    }
}

impl From<ServiceInstance> for Object {
    fn from(v: ServiceInstance) -> Self {
        Object::ServiceInstance(v)
    }
}

impl From<ServiceBinding> for Object {
    fn from(v: ServiceBinding) -> Self {
        Object::ServiceBinding(v)
    }
}

impl From<Operation> for Object {
    fn from(v: Operation) -> Self {
        Object::Operation(v)
    }
}

impl From<Platform> for Object {
    fn from(v: Platform) -> Self {
        Object::Platform(v)
    }
}

impl From<Visibility> for Object {
    fn from(v: Visibility) -> Self {
        Object::Visibility(v)
    }
}
