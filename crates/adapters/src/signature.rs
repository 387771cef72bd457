//! RSA context signature
//!
//! When a private key is configured, outgoing provision/bind contexts gain a
//! `signature` field: base64(RSA-SHA256, PKCS#1 v1.5) over the context JSON
//! with lexicographically ordered keys. Without a key the feature is
//! silently disabled.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest, Sha256};
use sm_ports::ContextSigner;
use thiserror::Error;
use tracing::warn;

pub const CONTEXT_SIGNATURE_FIELD: &str = "signature";

#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("failed to base64 decode rsa private key: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("failed to parse rsa private key: {0}")]
    Parse(String),
}

#[derive(Clone, Default)]
pub struct RsaContextSigner {
    key: Option<RsaPrivateKey>,
}

impl RsaContextSigner {
    pub fn disabled() -> Self {
        Self { key: None }
    }

    /// Parse a base64-encoded PKCS#1 PEM private key.
    pub fn from_base64_pem(encoded: &str) -> Result<Self, SignatureError> {
        let pem = STANDARD.decode(encoded)?;
        let pem = String::from_utf8(pem).map_err(|e| SignatureError::Parse(e.to_string()))?;
        let key =
            RsaPrivateKey::from_pkcs1_pem(&pem).map_err(|e| SignatureError::Parse(e.to_string()))?;
        Ok(Self { key: Some(key) })
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }
}

impl ContextSigner for RsaContextSigner {
    /// Sign the context document. serde_json orders object keys
    /// lexicographically at every level, which is exactly what verifiers
    /// recompute.
    fn sign_context(
        &self,
        context: &serde_json::Map<String, serde_json::Value>,
    ) -> Option<String> {
        let key = self.key.as_ref()?;
        let canonical = match serde_json::to_string(&serde_json::Value::Object(context.clone())) {
            Ok(json) => json,
            Err(err) => {
                warn!(error = %err, "could not serialize context for signing");
                return None;
            }
        };
        let digest = Sha256::digest(canonical.as_bytes());
        match key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest) {
            Ok(signature) => Some(STANDARD.encode(signature)),
            Err(err) => {
                warn!(error = %err, "could not sign context");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPublicKey;
    use serde_json::json;

    fn test_key() -> RsaPrivateKey {
        // Small key keeps the test fast.
        let mut rng = rand::rngs::OsRng;
        RsaPrivateKey::new(&mut rng, 1024).unwrap()
    }

    #[test]
    fn disabled_signer_returns_none() {
        let signer = RsaContextSigner::disabled();
        assert!(!signer.is_enabled());
        assert_eq!(signer.sign_context(&serde_json::Map::new()), None);
    }

    #[test]
    fn signature_verifies_against_sorted_context_json() {
        let key = test_key();
        let public: RsaPublicKey = key.to_public_key();
        let signer = RsaContextSigner { key: Some(key) };

        let context = json!({
            "platform": "service-manager",
            "tenant": "acme",
        });
        let serde_json::Value::Object(context) = context else {
            unreachable!()
        };

        let signature = signer.sign_context(&context).unwrap();
        let raw = STANDARD.decode(signature).unwrap();

        let canonical = serde_json::to_string(&serde_json::Value::Object(context)).unwrap();
        let digest = Sha256::digest(canonical.as_bytes());
        public
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &raw)
            .unwrap();
    }
}
