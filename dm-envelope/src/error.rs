//! Error types for the envelope codec.

use thiserror::Error;

/// Result type for envelope operations.
pub type EnvelopeResult<T> = Result<T, EnvelopeError>;

/// Errors raised while parsing, validating or verifying an envelope.
///
/// Every variant describes a problem with the payload itself. Transport
/// failures never surface through this type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// The bytes are not well-formed JSON (or not UTF-8).
    #[error("malformed JSON: {0}")]
    Malformed(String),

    /// Two object keys collide, either literally or after NFC normalization.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Nesting exceeds [`MAX_DEPTH`](crate::MAX_DEPTH).
    #[error("document nested deeper than {0} levels")]
    TooDeep(usize),

    /// The top-level value is not a JSON object.
    #[error("envelope must be a JSON object")]
    NotAnObject,

    /// A required envelope field is absent.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// A field is present but its value has the wrong shape.
    #[error("invalid field: {0}")]
    InvalidField(String),

    /// The envelope carries no `signature` field.
    #[error("envelope is not signed")]
    NotSigned,

    /// The signature does not verify against the canonical payload.
    #[error("envelope signature invalid")]
    SignatureInvalid,

    /// The verification key could not be decoded.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
}
