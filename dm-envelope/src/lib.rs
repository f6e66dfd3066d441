//! JSON envelope codec for the DistroMate license client.
//!
//! Responses from the licensing authority and the update service are JSON
//! envelopes. This crate:
//! - Parses them strictly (no duplicate keys, bounded depth)
//! - Normalizes strings to NFC and numbers to a fixed form
//! - Emits the canonical form used for signature checks
//! - Verifies detached Ed25519 or RSA signatures bound to a request nonce
//!
//! # Canonical Form
//!
//! Object keys sorted by code point, no insignificant whitespace, integral
//! numbers written as integers, minimal string escaping. Canonicalization is
//! idempotent: `canonicalize(parse(canonicalize(x))) == canonicalize(x)`.

mod canonical;
mod envelope;
mod error;
mod signing;

pub use canonical::{
    canonicalize, encode_canonical, parse_envelope, to_canonical_string, Document, MAX_DEPTH,
};
pub use envelope::{Envelope, NONCE_FIELD, SIGNATURE_FIELD};
pub use error::{EnvelopeError, EnvelopeResult};
pub use signing::{
    AuthorityVerifier, Ed25519Verifier, RsaPkcs1Sha256Verifier, SignatureVerifier,
};
