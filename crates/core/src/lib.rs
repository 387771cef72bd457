//! Service Manager domain core
//!
//! Entities, the operation state machine and the error taxonomy. This crate
//! stays free of I/O; persistence and broker communication live behind the
//! ports.

pub mod binding;
pub mod broker;
pub mod catalog;
pub mod error;
pub mod instance;
pub mod labels;
pub mod object;
pub mod offering;
pub mod operation;
pub mod plan;
pub mod platform;
pub mod visibility;

pub use crate::binding::ServiceBinding;
pub use crate::broker::{BasicCredentials, ServiceBroker};
pub use crate::catalog::{Catalog, CatalogPlan, CatalogService};
pub use crate::error::{ConflictKind, Result, SmError};
pub use crate::instance::{ServiceInstance, REFERENCED_INSTANCE_ID_PARAM};
pub use crate::labels::{apply_label_changes, tenant_value, LabelChange, Labels};
pub use crate::object::{Object, ResourceType};
pub use crate::offering::ServiceOffering;
pub use crate::operation::{Operation, OperationState, OperationType};
pub use crate::plan::{
    is_plan_bindable, ServicePlan, REFERENCE_PLAN_DESCRIPTION, REFERENCE_PLAN_NAME,
};
pub use crate::platform::{Platform, SERVICE_MANAGER_PLATFORM};
pub use crate::visibility::Visibility;
