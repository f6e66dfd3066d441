//! Activation and validation error codes.
//!
//! Codes are stable integers shared with the licensing authority and with
//! application code that branches on them. Name lookup never fails: unknown
//! codes resolve to [`UNKNOWN_ERROR_NAME`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name returned for codes outside the taxonomy.
pub const UNKNOWN_ERROR_NAME: &str = "UnknownError";

/// A stable activation/validation error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ActivationErrorCode {
    /// The license key is not known to the server.
    UnknownLicense = 1,
    /// The license key is malformed or does not belong to this product.
    InvalidLicenseKey = 2,
    /// The license has no activation slots left.
    ActivationLimitReached = 3,
    /// The license was revoked.
    LicenseRevoked = 4,
    /// The licensing authority could not be reached.
    NetworkFailure = 5,
    /// The local clock moved backwards past the last server sync.
    ClockTampering = 6,
    /// The offline grace period has lapsed without a successful sync.
    GracePeriodExpired = 7,
    /// The product data does not match what the server issued.
    ProductDataMismatch = 8,
    /// The server response could not be parsed.
    MalformedResponse = 9,
    /// The license has passed its expiry date.
    LicenseExpired = 10,
    /// The license is temporarily suspended.
    LicenseSuspended = 11,
    /// The server is rate limiting this client.
    RateLimited = 12,
    /// The server failed to process the request.
    ServerError = 13,
    /// The response signature did not verify.
    SignatureInvalid = 14,
}

impl ActivationErrorCode {
    /// Every code in the taxonomy, in numeric order.
    pub const ALL: [Self; 14] = [
        Self::UnknownLicense,
        Self::InvalidLicenseKey,
        Self::ActivationLimitReached,
        Self::LicenseRevoked,
        Self::NetworkFailure,
        Self::ClockTampering,
        Self::GracePeriodExpired,
        Self::ProductDataMismatch,
        Self::MalformedResponse,
        Self::LicenseExpired,
        Self::LicenseSuspended,
        Self::RateLimited,
        Self::ServerError,
        Self::SignatureInvalid,
    ];

    /// Returns the numeric code.
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Returns the stable human-readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::UnknownLicense => "UnknownLicense",
            Self::InvalidLicenseKey => "InvalidLicenseKey",
            Self::ActivationLimitReached => "ActivationLimitReached",
            Self::LicenseRevoked => "LicenseRevoked",
            Self::NetworkFailure => "NetworkFailure",
            Self::ClockTampering => "ClockTampering",
            Self::GracePeriodExpired => "GracePeriodExpired",
            Self::ProductDataMismatch => "ProductDataMismatch",
            Self::MalformedResponse => "MalformedResponse",
            Self::LicenseExpired => "LicenseExpired",
            Self::LicenseSuspended => "LicenseSuspended",
            Self::RateLimited => "RateLimited",
            Self::ServerError => "ServerError",
            Self::SignatureInvalid => "SignatureInvalid",
        }
    }

    /// Looks up a code by its numeric value.
    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Looks up a code by symbol.
    ///
    /// Accepts the canonical name (`ActivationLimitReached`), its wire forms
    /// (`ACTIVATION_LIMIT_REACHED`, `activation_limit_reached`) and a few
    /// server aliases such as `device_limit_exceeded`.
    #[must_use]
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let folded: String = symbol
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .map(|c| c.to_ascii_lowercase())
            .collect();

        if let Some(code) = Self::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(&folded))
        {
            return Some(code);
        }

        match folded.as_str() {
            "notfound" | "licensenotfound" => Some(Self::UnknownLicense),
            "invalidkey" | "badkey" => Some(Self::InvalidLicenseKey),
            "limitreached" | "licenselimitreached" | "devicelimitexceeded" => {
                Some(Self::ActivationLimitReached)
            }
            "revoked" => Some(Self::LicenseRevoked),
            "expired" => Some(Self::LicenseExpired),
            "suspended" => Some(Self::LicenseSuspended),
            "productmismatch" => Some(Self::ProductDataMismatch),
            _ => None,
        }
    }

    /// Maps an HTTP-equivalent rejection status to a code.
    ///
    /// Returns `None` for success statuses.
    #[must_use]
    pub fn from_http_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            400 | 422 => Some(Self::InvalidLicenseKey),
            403 | 410 => Some(Self::LicenseRevoked),
            404 => Some(Self::UnknownLicense),
            409 => Some(Self::ActivationLimitReached),
            412 => Some(Self::ProductDataMismatch),
            429 => Some(Self::RateLimited),
            _ => Some(Self::ServerError),
        }
    }

    /// Returns true for codes that represent a business decision by the
    /// server, as opposed to a local or transport problem.
    #[must_use]
    pub fn is_server_rejection(self) -> bool {
        matches!(
            self,
            Self::UnknownLicense
                | Self::InvalidLicenseKey
                | Self::ActivationLimitReached
                | Self::LicenseRevoked
                | Self::ProductDataMismatch
                | Self::LicenseExpired
                | Self::LicenseSuspended
        )
    }
}

impl fmt::Display for ActivationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returns the name for a numeric code, or [`UNKNOWN_ERROR_NAME`].
#[must_use]
pub fn activation_error_name(code: u32) -> &'static str {
    ActivationErrorCode::from_code(code).map_or(UNKNOWN_ERROR_NAME, ActivationErrorCode::name)
}

/// Returns the canonical name for a symbolic code, or [`UNKNOWN_ERROR_NAME`].
#[must_use]
pub fn activation_error_symbol_name(symbol: &str) -> &'static str {
    ActivationErrorCode::from_symbol(symbol).map_or(UNKNOWN_ERROR_NAME, ActivationErrorCode::name)
}
