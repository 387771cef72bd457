//! Service Manager server
//!
//! OSB API surface, error mapping and bootstrap wiring.

pub mod api;
pub mod bootstrap;
pub mod error;

pub use crate::api::{api_router, AppState};
pub use crate::bootstrap::{initialize_server, ServerComponents};
