//! Error types for the payment subsystem.
//!
//! Two layers: [`PaymentError`] carries the domain taxonomy (membership,
//! provider availability, gateway failures, reconciliation mismatches) and
//! [`TollgateError`] is the HTTP-facing type handlers return. Domain errors
//! convert into HTTP errors via `From`, so `?` works across the boundary.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;

/// The top-level error type returned by route handlers.
#[derive(Debug, thiserror::Error)]
pub enum TollgateError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Request timeout")]
    RequestTimeout,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Error body returned to API clients.
#[derive(Serialize)]
pub struct ErrorResponse {
    error: String,
    error_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl TollgateError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Internal(_) | Self::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
        }
    }

    /// Returns a message safe to expose to clients.
    ///
    /// Client errors (4xx) keep their message. Server errors (5xx) collapse
    /// to a generic message; the full error is logged server-side only.
    fn safe_message(&self) -> String {
        match self {
            Self::NotFound(msg) => format!("Not found: {}", msg),
            Self::BadRequest(msg) => format!("Bad request: {}", msg),
            Self::Forbidden(msg) => format!("Forbidden: {}", msg),
            Self::RequestTimeout => "Request timeout".to_string(),

            Self::Internal(_) | Self::Anyhow(_) => "Internal server error".to_string(),
            Self::ServiceUnavailable(_) => "Service unavailable".to_string(),
        }
    }
}

impl IntoResponse for TollgateError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_id = uuid::Uuid::new_v4().to_string();

        // Full error goes to server logs, never to the client body for 5xx.
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error_id = %error_id, error = %self, "request failed");
        } else {
            tracing::warn!(status = status.as_u16(), error_id = %error_id, error = %self, "request rejected");
        }

        let body = Json(ErrorResponse {
            error: self.safe_message(),
            error_id,
            details: None,
        });

        (status, body).into_response()
    }
}

/// Result type alias for payment operations and route handlers.
pub type Result<T> = std::result::Result<T, TollgateError>;

impl From<serde_json::Error> for TollgateError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            TollgateError::BadRequest(format!("JSON error: {}", err))
        } else {
            TollgateError::Internal(format!("JSON serialization error: {}", err))
        }
    }
}

impl From<reqwest::Error> for TollgateError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TollgateError::RequestTimeout
        } else if err.is_connect() {
            TollgateError::ServiceUnavailable(format!("Connection error: {}", err))
        } else {
            TollgateError::Internal(format!("Request error: {}", err))
        }
    }
}

/// Payment-domain errors.
///
/// These carry enough structure for callers to branch on, and convert to
/// `TollgateError` for HTTP responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    // Authorization
    /// The caller holds no role on the store they are paying for.
    MembershipRequired { caller_id: String, store_id: String },

    // Provider resolution
    /// No active configuration exists for the named provider.
    ProviderUnavailable { provider: String },

    // Pricing
    /// The requested display currency has no conversion rate.
    CurrencyNotSupported { currency: String },

    // Gateway
    /// The external gateway answered with a non-success response.
    Gateway {
        operation: String,
        message: String,
        response_code: Option<String>,
        http_status: Option<u16>,
    },

    // Ledger
    /// A webhook referenced a transaction id this ledger has never issued.
    UnknownTransaction { transaction_id: String },
    /// The provider reference on a transaction is written once, ever.
    ProviderReferenceAlreadySet { transaction_id: String },

    // Webhook decoding
    /// The callback body matched neither the IPN shape nor the legacy shape.
    InvalidPayload { message: String },
    /// The callback carried an integrity hash that does not match.
    InvalidCallbackHash,

    // Configuration
    /// A checkout/return/cancel URL failed validation.
    InvalidRedirectUrl { url: String, reason: String },
    /// The URL's domain is not in the configured allow-list.
    RedirectDomainNotAllowed { domain: String },

    /// An unexpected internal failure.
    Internal { message: String },
}

impl fmt::Display for PaymentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MembershipRequired { caller_id, store_id } => {
                write!(f, "Caller '{}' has no role on store '{}'", caller_id, store_id)
            }
            Self::ProviderUnavailable { provider } => {
                write!(f, "Payment provider '{}' is not available", provider)
            }
            Self::CurrencyNotSupported { currency } => {
                write!(f, "No conversion rate for currency '{}'", currency)
            }
            Self::Gateway { operation, message, response_code, http_status } => {
                write!(f, "Gateway error during '{}': {}", operation, message)?;
                if let Some(code) = response_code {
                    write!(f, " (code: {})", code)?;
                }
                if let Some(status) = http_status {
                    write!(f, " [HTTP {}]", status)?;
                }
                Ok(())
            }
            Self::UnknownTransaction { transaction_id } => {
                write!(f, "Unknown transaction: {}", transaction_id)
            }
            Self::ProviderReferenceAlreadySet { transaction_id } => {
                write!(f, "Provider reference already set on transaction '{}'", transaction_id)
            }
            Self::InvalidPayload { message } => {
                write!(f, "Invalid callback payload: {}", message)
            }
            Self::InvalidCallbackHash => {
                write!(f, "Callback integrity hash mismatch")
            }
            Self::InvalidRedirectUrl { url, reason } => {
                write!(f, "Invalid redirect URL '{}': {}", url, reason)
            }
            Self::RedirectDomainNotAllowed { domain } => {
                write!(f, "Redirect domain '{}' is not allowed", domain)
            }
            Self::Internal { message } => {
                write!(f, "Internal payment error: {}", message)
            }
        }
    }
}

impl std::error::Error for PaymentError {}

impl From<PaymentError> for TollgateError {
    fn from(err: PaymentError) -> Self {
        match &err {
            // Map to Forbidden
            PaymentError::MembershipRequired { .. } => {
                TollgateError::Forbidden(err.to_string())
            }

            // Map to ServiceUnavailable
            PaymentError::ProviderUnavailable { .. } => {
                TollgateError::ServiceUnavailable(err.to_string())
            }

            // Map to BadRequest (client errors)
            PaymentError::CurrencyNotSupported { .. }
            | PaymentError::UnknownTransaction { .. }
            | PaymentError::InvalidPayload { .. }
            | PaymentError::InvalidCallbackHash
            | PaymentError::InvalidRedirectUrl { .. }
            | PaymentError::RedirectDomainNotAllowed { .. } => {
                TollgateError::BadRequest(err.to_string())
            }

            // Map to Internal (server errors)
            PaymentError::ProviderReferenceAlreadySet { .. }
            | PaymentError::Internal { .. } => {
                TollgateError::Internal(err.to_string())
            }

            // Gateway errors map on the upstream HTTP status
            PaymentError::Gateway { http_status, .. } => match http_status {
                Some(400..=499) => TollgateError::BadRequest(err.to_string()),
                _ => TollgateError::Internal(err.to_string()),
            },
        }
    }
}

impl PaymentError {
    /// Check if this is a client error (4xx).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::MembershipRequired { .. }
            | Self::CurrencyNotSupported { .. }
            | Self::UnknownTransaction { .. }
            | Self::InvalidPayload { .. }
            | Self::InvalidCallbackHash
            | Self::InvalidRedirectUrl { .. }
            | Self::RedirectDomainNotAllowed { .. } => true,
            Self::Gateway { http_status, .. } => {
                matches!(http_status, Some(400..=499))
            }
            _ => false,
        }
    }

    /// Check if this is a server error (5xx).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        match self {
            Self::ProviderUnavailable { .. }
            | Self::ProviderReferenceAlreadySet { .. }
            | Self::Internal { .. } => true,
            Self::Gateway { http_status, .. } => {
                matches!(http_status, Some(500..=599) | None)
            }
            _ => false,
        }
    }

    /// Check if a human operator could sensibly retry the operation.
    ///
    /// Gateway failures are never retried automatically by this crate; the
    /// transaction is marked failed instead. This classification exists for
    /// host-side reporting.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ProviderUnavailable { .. } => true,
            Self::Gateway { http_status, .. } => {
                matches!(http_status, Some(429) | Some(500..=599))
            }
            _ => false,
        }
    }
}
