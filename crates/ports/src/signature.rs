//! Context signing port
//!
//! Enriches outgoing provision/bind contexts with a detached signature.
//! Implementations without key material return `None` and the feature stays
//! silently disabled.

pub trait ContextSigner: Send + Sync {
    fn sign_context(
        &self,
        context: &serde_json::Map<String, serde_json::Value>,
    ) -> Option<String>;
}
