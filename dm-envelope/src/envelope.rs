//! Response envelopes exchanged with the licensing authority and update service.
//!
//! An envelope is a JSON object. A signed envelope carries a base64
//! `signature` over the canonical form of the remaining fields, with the
//! request nonce inserted as `nonce_str`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::canonical::{canonicalize, Document};
use crate::error::{EnvelopeError, EnvelopeResult};
use crate::signing::SignatureVerifier;

/// Field holding the detached signature.
pub const SIGNATURE_FIELD: &str = "signature";

/// Field the request nonce is bound to inside the signed payload.
pub const NONCE_FIELD: &str = "nonce_str";

/// A parsed JSON object envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    document: Document,
}

impl Envelope {
    /// Parses raw response bytes into an envelope.
    ///
    /// # Errors
    ///
    /// Fails for malformed JSON or when the top-level value is not an object.
    pub fn parse(bytes: &[u8]) -> EnvelopeResult<Self> {
        Self::from_document(Document::parse(bytes)?)
    }

    /// Wraps an already-parsed document.
    ///
    /// # Errors
    ///
    /// Fails when the document is not an object.
    pub fn from_document(document: Document) -> EnvelopeResult<Self> {
        if !document.value().is_object() {
            return Err(EnvelopeError::NotAnObject);
        }
        Ok(Self { document })
    }

    /// Returns the underlying document.
    #[must_use]
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Looks up a top-level field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.document.value().get(field)
    }

    /// Returns the base64 signature, if the envelope is signed.
    #[must_use]
    pub fn signature(&self) -> Option<&str> {
        self.get(SIGNATURE_FIELD).and_then(Value::as_str)
    }

    /// Ensures each named top-level field is present and non-null.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::MissingField`] naming the first absent field.
    pub fn require(&self, fields: &[&str]) -> EnvelopeResult<()> {
        match fields
            .iter()
            .find(|f| self.get(f).is_none_or(Value::is_null))
        {
            Some(missing) => Err(EnvelopeError::MissingField((*missing).to_string())),
            None => Ok(()),
        }
    }

    /// Decodes the envelope into a typed structure.
    ///
    /// # Errors
    ///
    /// Missing fields map to [`EnvelopeError::MissingField`]; any other shape
    /// mismatch maps to [`EnvelopeError::InvalidField`].
    pub fn decode<T: DeserializeOwned>(&self) -> EnvelopeResult<T> {
        serde_json::from_value(self.document.value().clone()).map_err(|e| {
            let msg = e.to_string();
            match msg
                .strip_prefix("missing field `")
                .and_then(|rest| rest.split('`').next())
            {
                Some(field) => EnvelopeError::MissingField(field.to_string()),
                None => EnvelopeError::InvalidField(msg),
            }
        })
    }

    /// Builds the exact bytes a signature over this envelope must cover.
    #[must_use]
    pub fn signed_payload(&self, nonce: &str) -> Vec<u8> {
        let mut fields = self
            .document
            .value()
            .as_object()
            .cloned()
            .unwrap_or_default();
        fields.remove(SIGNATURE_FIELD);
        fields.insert(NONCE_FIELD.to_string(), Value::String(nonce.to_string()));

        match Document::from_value(Value::Object(fields)) {
            Ok(doc) => canonicalize(&doc),
            // Fields were normalized on parse, only the nonce is new.
            Err(_) => Vec::new(),
        }
    }

    /// Verifies the envelope signature against the request nonce.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::NotSigned`] when no signature is present and
    /// [`EnvelopeError::SignatureInvalid`] when it does not verify.
    pub fn verify(&self, verifier: &dyn SignatureVerifier, nonce: &str) -> EnvelopeResult<()> {
        let signature = self.signature().ok_or(EnvelopeError::NotSigned)?;
        let sig_bytes = BASE64
            .decode(signature)
            .map_err(|_| EnvelopeError::SignatureInvalid)?;

        let payload = self.signed_payload(nonce);
        if payload.is_empty() || !verifier.verify(&payload, &sig_bytes) {
            return Err(EnvelopeError::SignatureInvalid);
        }
        Ok(())
    }
}
