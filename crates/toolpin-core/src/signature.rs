//! Signature verifiers.
//!
//! The verification engine holds exactly one [`SignatureVerifier`], picked
//! when it is constructed. Nothing in the verification path branches on
//! which one it is.
//!
//! | Verifier | Scheme | Use |
//! |----------|--------|-----|
//! | [`EcdsaP256Verifier`] | ECDSA P-256 / SHA-256 | Production (`ecdsa` feature) |
//! | [`LegacyDigestVerifier`] | Keyed SHA-256 digest prefix | Tests and builds without `ecdsa` |

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
#[cfg(not(feature = "ecdsa"))]
use tracing::warn;

#[cfg(feature = "ecdsa")]
use p256::ecdsa::signature::Verifier as _;
#[cfg(feature = "ecdsa")]
use p256::ecdsa::{Signature, VerifyingKey};
#[cfg(feature = "ecdsa")]
use p256::pkcs8::DecodePublicKey;

/// Checks a base64 signature over a canonical payload.
pub trait SignatureVerifier: Send + Sync + fmt::Debug {
    /// Short name for logs and audit context.
    fn name(&self) -> &'static str;

    /// Whether the scheme is fit for production use.
    fn is_production(&self) -> bool;

    /// Returns true if `signature` is valid for `payload` under `public_key_pem`.
    ///
    /// Malformed keys or signatures are reported as `false`, never as errors.
    fn verify(&self, payload: &[u8], signature: &str, public_key_pem: &str) -> bool;
}

/// The verifier this build should use: ECDSA P-256.
#[cfg(feature = "ecdsa")]
pub fn default_verifier() -> Arc<dyn SignatureVerifier> {
    Arc::new(EcdsaP256Verifier)
}

/// The verifier this build should use.
///
/// Built without the `ecdsa` feature, so only the legacy digest verifier
/// is available.
#[cfg(not(feature = "ecdsa"))]
pub fn default_verifier() -> Arc<dyn SignatureVerifier> {
    warn!("built without the ecdsa feature; using the non-production legacy digest verifier");
    Arc::new(LegacyDigestVerifier)
}

/// ECDSA over P-256 with SHA-256.
///
/// Keys are SPKI PEM. Signatures are base64 of either DER or the raw
/// 64-byte `r || s` form.
#[cfg(feature = "ecdsa")]
#[derive(Debug, Clone, Copy, Default)]
pub struct EcdsaP256Verifier;

#[cfg(feature = "ecdsa")]
impl SignatureVerifier for EcdsaP256Verifier {
    fn name(&self) -> &'static str {
        "ecdsa-p256-sha256"
    }

    fn is_production(&self) -> bool {
        true
    }

    fn verify(&self, payload: &[u8], signature: &str, public_key_pem: &str) -> bool {
        let key = match VerifyingKey::from_public_key_pem(public_key_pem.trim()) {
            Ok(key) => key,
            Err(e) => {
                debug!(error = %e, "unusable public key");
                return false;
            }
        };

        let Some(bytes) = decode_signature(signature) else {
            return false;
        };

        let parsed = Signature::from_der(&bytes).or_else(|_| Signature::from_slice(&bytes));
        match parsed {
            Ok(sig) => key.verify(payload, &sig).is_ok(),
            Err(e) => {
                debug!(error = %e, "unparseable ECDSA signature");
                false
            }
        }
    }
}

/// Keyed digest comparison, kept for environments without ECDSA.
///
/// **Not for production.** The "signature" is `SHA-256(SHA-256(payload) ||
/// key)`, so anyone holding the public key can forge one. A signature is
/// accepted when its first 32 decoded bytes equal that value. The key bytes
/// are hashed exactly as given, trailing newline included.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyDigestVerifier;

impl LegacyDigestVerifier {
    /// Produces the signature this verifier accepts for `payload` and `public_key_pem`.
    pub fn sign(payload: &[u8], public_key_pem: &str) -> String {
        STANDARD.encode(legacy_digest(payload, public_key_pem))
    }
}

impl SignatureVerifier for LegacyDigestVerifier {
    fn name(&self) -> &'static str {
        "legacy-sha256-digest"
    }

    fn is_production(&self) -> bool {
        false
    }

    fn verify(&self, payload: &[u8], signature: &str, public_key_pem: &str) -> bool {
        let Some(bytes) = decode_signature(signature) else {
            return false;
        };
        bytes.len() >= 32 && bytes[..32] == legacy_digest(payload, public_key_pem)
    }
}

fn legacy_digest(payload: &[u8], public_key_pem: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(Sha256::digest(payload));
    hasher.update(public_key_pem.as_bytes());
    hasher.finalize().into()
}

fn decode_signature(signature: &str) -> Option<Vec<u8>> {
    match STANDARD.decode(signature.trim()) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            debug!(error = %e, "signature is not valid base64");
            None
        }
    }
}
