//! Service Manager application layer
//!
//! The instance/binding lifecycle orchestrator: around-transaction
//! interceptors, the last-operation poller, reference resolution, catalog
//! augmentation, the resource controller and the maintainer.

pub mod cascade;
pub mod catalog;
pub mod controller;
pub mod interceptor;
pub mod maintainer;
pub mod poller;
pub mod references;

pub use crate::cascade::{broker_children_criteria, CascadeDeleter, CascadeDescriptor};
pub use crate::catalog::{verify_catalog_does_not_use_reference_plan, BrokerCatalogService};
pub use crate::controller::ResourceController;
pub use crate::interceptor::{
    cancellation_pair, should_start_orphan_mitigation, CancelSignal, InterceptorRegistry,
    ServiceBindingInterceptor, ServiceInstanceInterceptor,
};
pub use crate::maintainer::{MaintainerSettings, OperationMaintainer};
pub use crate::poller::{OperationPoller, PollOutcome, PollTarget};
