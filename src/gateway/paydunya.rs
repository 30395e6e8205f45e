//! PayDunya gateway implementation.
//!
//! Talks to the PayDunya checkout-invoice API over HTTPS with secure key
//! handling and proper error mapping. Create and confirm calls are made
//! exactly once per invocation; failures surface to the caller instead of
//! being retried here.

use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{CheckoutIntent, ConfirmedStatus, GatewayCheckout, PaymentGateway};

// ============================================================================
// Constants
// ============================================================================

/// Header carrying the merchant master key.
const HEADER_MASTER_KEY: &str = "PAYDUNYA-MASTER-KEY";
/// Header carrying the API private key.
const HEADER_PRIVATE_KEY: &str = "PAYDUNYA-PRIVATE-KEY";
/// Header carrying the API token.
const HEADER_TOKEN: &str = "PAYDUNYA-TOKEN";
/// Response code PayDunya uses for success.
const RESPONSE_CODE_OK: &str = "00";
/// Invoice status string for a settled payment.
const STATUS_COMPLETED: &str = "completed";

// ============================================================================
// Configuration
// ============================================================================

/// Which PayDunya environment to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaydunyaMode {
    /// Production API.
    #[default]
    Live,
    /// Sandbox API for integration testing.
    Sandbox,
}

impl PaydunyaMode {
    /// Base URL for API calls in this mode.
    #[must_use]
    pub fn api_base_url(&self) -> &'static str {
        match self {
            Self::Live => "https://app.paydunya.com/api/v1",
            Self::Sandbox => "https://app.paydunya.com/sandbox-api/v1",
        }
    }

    /// Base URL for hosted checkout pages in this mode, used when the
    /// create response carries a token but no page URL.
    #[must_use]
    pub fn checkout_base_url(&self) -> &'static str {
        match self {
            Self::Live => "https://paydunya.com/checkout/invoice",
            Self::Sandbox => "https://app.paydunya.com/sandbox-checkout/invoice",
        }
    }

    /// Get the string representation of the mode.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Sandbox => "sandbox",
        }
    }
}

impl std::fmt::Display for PaydunyaMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration for the PayDunya client.
#[derive(Debug, Clone)]
pub struct PaydunyaConfig {
    /// Environment to call.
    pub mode: PaydunyaMode,
    /// Merchant name shown on the hosted checkout page.
    pub merchant_name: String,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for PaydunyaConfig {
    fn default() -> Self {
        Self {
            mode: PaydunyaMode::Live,
            merchant_name: String::new(),
            timeout_seconds: 30,
        }
    }
}

impl PaydunyaConfig {
    /// Create a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the environment.
    #[must_use]
    pub fn mode(mut self, mode: PaydunyaMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the merchant name shown on the hosted page.
    #[must_use]
    pub fn merchant_name(mut self, name: impl Into<String>) -> Self {
        self.merchant_name = name.into();
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// The three keys PayDunya issues per merchant integration.
#[derive(Clone)]
pub struct PaydunyaCredentials {
    /// Merchant master key. Also the input to callback hash verification.
    pub master_key: SecretString,
    /// API private key.
    pub private_key: SecretString,
    /// API token.
    pub token: SecretString,
}

impl PaydunyaCredentials {
    /// Create credentials from the three PayDunya keys.
    pub fn new(
        master_key: impl Into<SecretString>,
        private_key: impl Into<SecretString>,
        token: impl Into<SecretString>,
    ) -> Self {
        Self {
            master_key: master_key.into(),
            private_key: private_key.into(),
            token: token.into(),
        }
    }
}

// Debug implementation that doesn't expose key material
impl std::fmt::Debug for PaydunyaCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaydunyaCredentials").finish_non_exhaustive()
    }
}

/// Error returned when credential validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidCredentialsError {
    /// Description of what is missing.
    pub reason: String,
}

impl std::fmt::Display for InvalidCredentialsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid PayDunya credentials: {}", self.reason)
    }
}

impl std::error::Error for InvalidCredentialsError {}

fn validate_credentials(
    credentials: &PaydunyaCredentials,
) -> std::result::Result<(), InvalidCredentialsError> {
    let checks = [
        (credentials.master_key.expose_secret(), "master key"),
        (credentials.private_key.expose_secret(), "private key"),
        (credentials.token.expose_secret(), "token"),
    ];
    for (value, name) in checks {
        if value.trim().is_empty() {
            return Err(InvalidCredentialsError {
                reason: format!("{} cannot be empty", name),
            });
        }
    }
    Ok(())
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct CreateInvoiceRequest {
    invoice: InvoiceBody,
    store: StoreBody,
    custom_data: CustomData,
    actions: ActionsBody,
}

#[derive(Debug, Serialize)]
struct InvoiceBody {
    total_amount: f64,
    description: String,
}

#[derive(Debug, Serialize)]
struct StoreBody {
    name: String,
}

#[derive(Debug, Serialize)]
struct CustomData {
    transaction_id: String,
    store_id: String,
    modules: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ActionsBody {
    callback_url: String,
    return_url: String,
    cancel_url: String,
}

#[derive(Debug, Deserialize)]
struct CreateInvoiceResponse {
    response_code: String,
    #[serde(default)]
    response_text: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    invoice_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConfirmInvoiceResponse {
    response_code: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    response_text: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

/// Live PayDunya client.
///
/// # Example
///
/// ```rust,ignore
/// use tollgate::gateway::paydunya::{
///     PaydunyaClient, PaydunyaConfig, PaydunyaCredentials, PaydunyaMode,
/// };
///
/// let client = PaydunyaClient::new(
///     PaydunyaCredentials::new(master_key, private_key, token),
///     PaydunyaConfig::new()
///         .mode(PaydunyaMode::Sandbox)
///         .merchant_name("Acme Commerce"),
/// )?;
/// ```
#[derive(Clone)]
pub struct PaydunyaClient {
    http: reqwest::Client,
    credentials: PaydunyaCredentials,
    config: PaydunyaConfig,
}

impl PaydunyaClient {
    /// Create a new PayDunya client.
    ///
    /// The keys are stored securely and won't appear in debug output.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the three keys is empty.
    pub fn new(
        credentials: PaydunyaCredentials,
        config: PaydunyaConfig,
    ) -> std::result::Result<Self, InvalidCredentialsError> {
        validate_credentials(&credentials)?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("tollgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Ok(Self {
            http,
            credentials,
            config,
        })
    }

    /// Create a client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the three keys is empty.
    pub fn with_default_config(
        credentials: PaydunyaCredentials,
    ) -> std::result::Result<Self, InvalidCredentialsError> {
        Self::new(credentials, PaydunyaConfig::default())
    }

    /// Check if the client talks to the sandbox environment.
    #[must_use]
    pub fn is_sandbox(&self) -> bool {
        self.config.mode == PaydunyaMode::Sandbox
    }

    /// Get the configured timeout duration.
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_seconds)
    }

    fn create_url(&self) -> String {
        format!("{}/checkout-invoice/create", self.config.mode.api_base_url())
    }

    fn confirm_url(&self, token: &str) -> String {
        format!(
            "{}/checkout-invoice/confirm/{}",
            self.config.mode.api_base_url(),
            token
        )
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header(HEADER_MASTER_KEY, self.credentials.master_key.expose_secret())
            .header(
                HEADER_PRIVATE_KEY,
                self.credentials.private_key.expose_secret(),
            )
            .header(HEADER_TOKEN, self.credentials.token.expose_secret())
    }

    fn invoice_request(&self, intent: &CheckoutIntent) -> Result<CreateInvoiceRequest> {
        let total_amount = intent.amount.to_f64().ok_or_else(|| {
            PaymentError::Internal {
                message: format!("amount {} not representable for the wire", intent.amount),
            }
        })?;

        Ok(CreateInvoiceRequest {
            invoice: InvoiceBody {
                total_amount,
                description: intent.description.clone(),
            },
            store: StoreBody {
                name: self.config.merchant_name.clone(),
            },
            custom_data: CustomData {
                transaction_id: intent.transaction_id.clone(),
                store_id: intent.store_id.clone(),
                modules: intent.module_ids.clone(),
            },
            actions: ActionsBody {
                callback_url: intent.callback_url.clone(),
                return_url: intent.return_url.clone(),
                cancel_url: intent.cancel_url.clone(),
            },
        })
    }
}

// Debug implementation that doesn't expose the keys
impl std::fmt::Debug for PaydunyaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaydunyaClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PaymentGateway for PaydunyaClient {
    fn provider_name(&self) -> &str {
        "paydunya"
    }

    async fn create_checkout(&self, intent: &CheckoutIntent) -> Result<GatewayCheckout> {
        let request = self.invoice_request(intent)?;

        let response = self
            .authed(self.http.post(self.create_url()))
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error("create_checkout", &e))?;

        let http_status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error("create_checkout", body, None, http_status));
        }

        let body: CreateInvoiceResponse = response
            .json()
            .await
            .map_err(|e| transport_error("create_checkout", &e))?;

        let checkout =
            checkout_from_response(body, self.config.mode.checkout_base_url(), http_status)?;

        tracing::info!(
            target: "tollgate::gateway::paydunya",
            transaction_id = %intent.transaction_id,
            store_id = %intent.store_id,
            mode = %self.config.mode,
            "PayDunya checkout invoice created"
        );

        Ok(checkout)
    }

    async fn confirm_status(&self, provider_token: &str) -> Result<ConfirmedStatus> {
        let response = self
            .authed(self.http.get(self.confirm_url(provider_token)))
            .send()
            .await
            .map_err(|e| transport_error("confirm_status", &e))?;

        let http_status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error("confirm_status", body, None, http_status));
        }

        let body: ConfirmInvoiceResponse = response
            .json()
            .await
            .map_err(|e| transport_error("confirm_status", &e))?;

        let status = status_from_response(body);

        tracing::debug!(
            target: "tollgate::gateway::paydunya",
            completed = status.completed,
            status = %status.status,
            "PayDunya invoice status confirmed"
        );

        Ok(status)
    }
}

// ============================================================================
// Error mapping and response interpretation
// ============================================================================

/// Map a transport-level failure to a gateway error.
fn transport_error(operation: &str, error: &reqwest::Error) -> crate::error::TollgateError {
    PaymentError::Gateway {
        operation: operation.to_string(),
        message: error.to_string(),
        response_code: None,
        http_status: error.status().map(|s| s.as_u16()),
    }
    .into()
}

/// Map a non-success API answer to a gateway error.
fn api_error(
    operation: &str,
    message: String,
    response_code: Option<String>,
    http_status: u16,
) -> crate::error::TollgateError {
    PaymentError::Gateway {
        operation: operation.to_string(),
        message,
        response_code,
        http_status: Some(http_status),
    }
    .into()
}

/// Turn a create response into a checkout, or the error it describes.
fn checkout_from_response(
    body: CreateInvoiceResponse,
    checkout_base_url: &str,
    http_status: u16,
) -> Result<GatewayCheckout> {
    if body.response_code != RESPONSE_CODE_OK {
        let message = body
            .response_text
            .unwrap_or_else(|| "checkout invoice creation refused".to_string());
        return Err(api_error(
            "create_checkout",
            message,
            Some(body.response_code),
            http_status,
        ));
    }

    let token = body.token.ok_or_else(|| {
        api_error(
            "create_checkout",
            "create response carried no invoice token".to_string(),
            Some(RESPONSE_CODE_OK.to_string()),
            http_status,
        )
    })?;

    let checkout_url = body
        .invoice_url
        .unwrap_or_else(|| format!("{}/{}", checkout_base_url, token));

    Ok(GatewayCheckout {
        checkout_url,
        provider_token: token,
    })
}

/// Interpret a confirm response.
///
/// A parseable answer is always `Ok`: only `response_code` 00 with status
/// `completed` counts as paid, everything else (pending, cancelled, unknown
/// invoice) is a definitive "not completed".
fn status_from_response(body: ConfirmInvoiceResponse) -> ConfirmedStatus {
    let completed =
        body.response_code == RESPONSE_CODE_OK && body.status.as_deref() == Some(STATUS_COMPLETED);
    let status = body
        .status
        .or(body.response_text)
        .unwrap_or_else(|| "unknown".to_string());
    ConfirmedStatus { completed, status }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn credentials() -> PaydunyaCredentials {
        PaydunyaCredentials::new("mk_test_key", "pk_test_key", "tk_test_token")
    }

    fn intent() -> CheckoutIntent {
        CheckoutIntent {
            transaction_id: "txn_1".to_string(),
            store_id: "store_1".to_string(),
            module_ids: vec!["stock_auto".to_string(), "loyalty".to_string()],
            amount: dec!(11000),
            description: "Modules: stock_auto, loyalty".to_string(),
            callback_url: "https://api.example.com/billing/webhook".to_string(),
            return_url: "https://app.example.com/billing/done".to_string(),
            cancel_url: "https://app.example.com/billing/cancelled".to_string(),
        }
    }

    // ============ configuration ============

    #[test]
    fn test_mode_urls() {
        assert_eq!(
            PaydunyaMode::Live.api_base_url(),
            "https://app.paydunya.com/api/v1"
        );
        assert_eq!(
            PaydunyaMode::Sandbox.api_base_url(),
            "https://app.paydunya.com/sandbox-api/v1"
        );
        assert!(PaydunyaMode::Sandbox
            .checkout_base_url()
            .contains("sandbox-checkout"));
        assert_eq!(PaydunyaMode::Live.to_string(), "live");
    }

    #[test]
    fn test_config_defaults_and_setters() {
        let config = PaydunyaConfig::default();
        assert_eq!(config.mode, PaydunyaMode::Live);
        assert_eq!(config.timeout_seconds, 30);

        let config = PaydunyaConfig::new()
            .mode(PaydunyaMode::Sandbox)
            .merchant_name("Acme Commerce")
            .timeout_seconds(5);
        assert_eq!(config.mode, PaydunyaMode::Sandbox);
        assert_eq!(config.merchant_name, "Acme Commerce");
        assert_eq!(config.timeout_seconds, 5);
    }

    #[test]
    fn test_empty_credentials_are_rejected() {
        let result = PaydunyaClient::with_default_config(PaydunyaCredentials::new(
            "",
            "pk_test_key",
            "tk_test_token",
        ));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("master key"));
    }

    #[test]
    fn test_debug_does_not_expose_keys() {
        let client = PaydunyaClient::with_default_config(credentials()).unwrap();
        let debug = format!("{:?} {:?}", client, PaydunyaCredentials::new("a", "b", "c"));
        assert!(!debug.contains("mk_test_key"));
        assert!(!debug.contains("tk_test_token"));
    }

    #[test]
    fn test_client_urls() {
        let client = PaydunyaClient::new(
            credentials(),
            PaydunyaConfig::new().mode(PaydunyaMode::Sandbox),
        )
        .unwrap();
        assert!(client.is_sandbox());
        assert_eq!(
            client.create_url(),
            "https://app.paydunya.com/sandbox-api/v1/checkout-invoice/create"
        );
        assert_eq!(
            client.confirm_url("tok_1"),
            "https://app.paydunya.com/sandbox-api/v1/checkout-invoice/confirm/tok_1"
        );
        assert_eq!(client.timeout(), Duration::from_secs(30));
    }

    // ============ request building ============

    #[test]
    fn test_invoice_request_shape() {
        let client = PaydunyaClient::new(
            credentials(),
            PaydunyaConfig::new().merchant_name("Acme Commerce"),
        )
        .unwrap();

        let request = client.invoice_request(&intent()).unwrap();
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["invoice"]["total_amount"], 11000.0);
        assert_eq!(json["invoice"]["description"], "Modules: stock_auto, loyalty");
        assert_eq!(json["store"]["name"], "Acme Commerce");
        assert_eq!(json["custom_data"]["transaction_id"], "txn_1");
        assert_eq!(json["custom_data"]["store_id"], "store_1");
        assert_eq!(
            json["custom_data"]["modules"],
            serde_json::json!(["stock_auto", "loyalty"])
        );
        assert_eq!(
            json["actions"]["callback_url"],
            "https://api.example.com/billing/webhook"
        );
    }

    // ============ response interpretation ============

    #[test]
    fn test_create_response_success_with_invoice_url() {
        let body: CreateInvoiceResponse = serde_json::from_str(
            r#"{
                "response_code": "00",
                "response_text": "Checkout invoice created",
                "token": "tok_live_1",
                "invoice_url": "https://paydunya.com/checkout/invoice/tok_live_1"
            }"#,
        )
        .unwrap();

        let checkout =
            checkout_from_response(body, PaydunyaMode::Live.checkout_base_url(), 200).unwrap();
        assert_eq!(checkout.provider_token, "tok_live_1");
        assert_eq!(
            checkout.checkout_url,
            "https://paydunya.com/checkout/invoice/tok_live_1"
        );
    }

    #[test]
    fn test_create_response_url_falls_back_to_token() {
        let body: CreateInvoiceResponse =
            serde_json::from_str(r#"{"response_code": "00", "token": "tok_2"}"#).unwrap();

        let checkout =
            checkout_from_response(body, PaydunyaMode::Sandbox.checkout_base_url(), 200).unwrap();
        assert_eq!(
            checkout.checkout_url,
            "https://app.paydunya.com/sandbox-checkout/invoice/tok_2"
        );
    }

    #[test]
    fn test_create_response_refusal_is_an_error() {
        let body: CreateInvoiceResponse = serde_json::from_str(
            r#"{"response_code": "1001", "response_text": "Invalid master key"}"#,
        )
        .unwrap();

        let err = checkout_from_response(body, PaydunyaMode::Live.checkout_base_url(), 200)
            .unwrap_err();
        assert!(err.to_string().contains("Invalid master key"));
        assert!(err.to_string().contains("1001"));
    }

    #[test]
    fn test_create_response_without_token_is_an_error() {
        let body: CreateInvoiceResponse =
            serde_json::from_str(r#"{"response_code": "00"}"#).unwrap();
        assert!(checkout_from_response(body, PaydunyaMode::Live.checkout_base_url(), 200).is_err());
    }

    #[test]
    fn test_confirm_response_completed() {
        let body: ConfirmInvoiceResponse =
            serde_json::from_str(r#"{"response_code": "00", "status": "completed"}"#).unwrap();
        let status = status_from_response(body);
        assert!(status.completed);
        assert_eq!(status.status, "completed");
    }

    #[test]
    fn test_confirm_response_pending_is_not_completed() {
        let body: ConfirmInvoiceResponse =
            serde_json::from_str(r#"{"response_code": "00", "status": "pending"}"#).unwrap();
        let status = status_from_response(body);
        assert!(!status.completed);
        assert_eq!(status.status, "pending");
    }

    #[test]
    fn test_confirm_response_unknown_invoice_is_not_completed() {
        let body: ConfirmInvoiceResponse = serde_json::from_str(
            r#"{"response_code": "1002", "response_text": "Invoice not found"}"#,
        )
        .unwrap();
        let status = status_from_response(body);
        assert!(!status.completed);
        assert_eq!(status.status, "Invoice not found");
    }
}
