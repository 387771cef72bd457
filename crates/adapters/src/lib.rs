//! Service Manager adapters
//!
//! Implementations of the ports: in-memory transactional repository, OSB
//! HTTP client, context signer and configuration loading.

pub mod config;
pub mod osb_http;
pub mod repositories;
pub mod signature;

pub use crate::config::{
    AppConfig, ConfigError, MaintainerConfig, OrchestratorConfig, ServerConfig, SignatureConfig,
};
pub use crate::osb_http::{HttpOsbClient, HttpOsbClientFactory};
pub use crate::repositories::InMemoryRepository;
pub use crate::signature::{RsaContextSigner, SignatureError, CONTEXT_SIGNATURE_FIELD};
