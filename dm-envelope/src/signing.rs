//! Signature verification for canonical envelopes.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::pkcs8::DecodePublicKey;
use ed25519_dalek::{Signature, Verifier as _, VerifyingKey};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::{EnvelopeError, EnvelopeResult};

/// Checks a detached signature over a canonical payload.
pub trait SignatureVerifier: Send + Sync {
    /// Returns true if `signature` is valid for `message`.
    fn verify(&self, message: &[u8], signature: &[u8]) -> bool;
}

/// Ed25519 verifier for the licensing authority's public key.
#[derive(Debug, Clone)]
pub struct Ed25519Verifier(VerifyingKey);

impl Ed25519Verifier {
    /// Creates a verifier from a raw 32-byte public key.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid curve point.
    pub fn from_bytes(bytes: &[u8; 32]) -> EnvelopeResult<Self> {
        VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|e| EnvelopeError::InvalidPublicKey(e.to_string()))
    }

    /// Parses a public key given as SPKI PEM, base64 or hex.
    ///
    /// # Errors
    ///
    /// Returns an error if no encoding yields a valid 32-byte key.
    pub fn parse(encoded: &str) -> EnvelopeResult<Self> {
        let encoded = encoded.trim();

        if encoded.starts_with("-----BEGIN") {
            return VerifyingKey::from_public_key_pem(encoded)
                .map(Self)
                .map_err(|e| EnvelopeError::InvalidPublicKey(e.to_string()));
        }

        let raw = if encoded.len() == 64 && encoded.bytes().all(|b| b.is_ascii_hexdigit()) {
            hex::decode(encoded).map_err(|e| EnvelopeError::InvalidPublicKey(e.to_string()))?
        } else {
            BASE64
                .decode(encoded)
                .map_err(|e| EnvelopeError::InvalidPublicKey(e.to_string()))?
        };

        let bytes: [u8; 32] = raw.as_slice().try_into().map_err(|_| {
            EnvelopeError::InvalidPublicKey(format!("expected 32 bytes, got {}", raw.len()))
        })?;
        Self::from_bytes(&bytes)
    }

    /// Returns the raw 32-byte public key.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        self.0.verify(message, &signature).is_ok()
    }
}

/// RSA verifier for PKCS#1 v1.5 signatures over a SHA-256 digest.
#[derive(Debug, Clone)]
pub struct RsaPkcs1Sha256Verifier(RsaPublicKey);

impl RsaPkcs1Sha256Verifier {
    #[must_use]
    pub fn from_public_key(key: RsaPublicKey) -> Self {
        Self(key)
    }

    /// Parses a `PUBLIC KEY` (SPKI) or `RSA PUBLIC KEY` (PKCS#1) PEM block.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM does not hold an RSA public key.
    pub fn parse(pem: &str) -> EnvelopeResult<Self> {
        let pem = pem.trim();
        let key = if pem.starts_with("-----BEGIN RSA PUBLIC KEY") {
            RsaPublicKey::from_pkcs1_pem(pem)
                .map_err(|e| EnvelopeError::InvalidPublicKey(e.to_string()))?
        } else {
            <RsaPublicKey as rsa::pkcs8::DecodePublicKey>::from_public_key_pem(pem)
                .map_err(|e| EnvelopeError::InvalidPublicKey(e.to_string()))?
        };
        Ok(Self(key))
    }
}

impl SignatureVerifier for RsaPkcs1Sha256Verifier {
    fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let digest = Sha256::digest(message);
        self.0
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
            .is_ok()
    }
}

/// Verifier for whichever key type the licensing authority publishes.
#[derive(Debug, Clone)]
pub enum AuthorityVerifier {
    Ed25519(Ed25519Verifier),
    Rsa(RsaPkcs1Sha256Verifier),
}

impl AuthorityVerifier {
    /// Parses an RSA PEM key or an Ed25519 key in any form
    /// [`Ed25519Verifier::parse`] accepts.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is neither.
    pub fn parse(encoded: &str) -> EnvelopeResult<Self> {
        let encoded = encoded.trim();
        if encoded.starts_with("-----BEGIN RSA PUBLIC KEY") {
            return RsaPkcs1Sha256Verifier::parse(encoded).map(Self::Rsa);
        }
        match Ed25519Verifier::parse(encoded) {
            Ok(verifier) => Ok(Self::Ed25519(verifier)),
            Err(ed25519) if encoded.starts_with("-----BEGIN") => {
                RsaPkcs1Sha256Verifier::parse(encoded)
                    .map(Self::Rsa)
                    .map_err(|rsa| {
                        EnvelopeError::InvalidPublicKey(format!(
                            "not an Ed25519 key ({ed25519}) or an RSA key ({rsa})"
                        ))
                    })
            }
            Err(e) => Err(e),
        }
    }
}

impl SignatureVerifier for AuthorityVerifier {
    fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match self {
            Self::Ed25519(v) => v.verify(message, signature),
            Self::Rsa(v) => v.verify(message, signature),
        }
    }
}
