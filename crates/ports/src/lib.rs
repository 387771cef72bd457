//! Service Manager ports
//!
//! Traits the application layer depends on; implemented by the adapters.

pub mod osb_client;
pub mod repository;
pub mod signature;

pub use crate::osb_client::{
    BindRequest, BindResponse, DeprovisionRequest, DeprovisionResponse, GetBindingRequest,
    GetBindingResponse, LastOperationRequest, LastOperationResponse, LastOperationState, OsbClient,
    OsbClientError, OsbClientFactory, ProvisionRequest, ProvisionResponse, UnbindRequest,
    UnbindResponse,
};
pub use crate::repository::{
    Criterion, Repository, RepositoryError, TransactionalRepository, TxWork,
};
pub use crate::signature::ContextSigner;
