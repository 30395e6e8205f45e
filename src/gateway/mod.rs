//! Payment gateway abstraction.
//!
//! A [`PaymentGateway`] turns a priced checkout into a provider-hosted
//! payment page and re-confirms payment status straight from the provider.
//! The [`paydunya`] module implements it for the PayDunya API; tests use
//! [`test::MockGateway`].

pub mod paydunya;

use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Trait for creating and confirming provider checkouts.
///
/// Confirmation exists because callback payloads are untrusted input: the
/// reconciliation service never activates anything on the payload's say-so,
/// it asks the provider again through [`confirm_status`](Self::confirm_status).
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Name of the provider behind this gateway, as recorded on ledger rows.
    fn provider_name(&self) -> &str;

    /// Create a hosted checkout page for the intent.
    ///
    /// Returns the URL to send the buyer to and the provider's token for
    /// the created checkout. Any failure is surfaced to the caller; this
    /// crate never retries a checkout creation on its own.
    async fn create_checkout(&self, intent: &CheckoutIntent) -> Result<GatewayCheckout>;

    /// Ask the provider for the current status of a checkout.
    async fn confirm_status(&self, provider_token: &str) -> Result<ConfirmedStatus>;
}

/// Everything the gateway needs to create one checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutIntent {
    /// Internal transaction id, echoed back in callback payloads.
    pub transaction_id: String,
    /// The paying store, echoed back in callback payloads.
    pub store_id: String,
    /// Module ids being purchased, echoed back in callback payloads.
    pub module_ids: Vec<String>,
    /// Amount to charge, in the platform base currency.
    pub amount: Decimal,
    /// Line shown to the buyer on the hosted page.
    pub description: String,
    /// Where the provider posts payment notifications.
    pub callback_url: String,
    /// Where the buyer lands after paying.
    pub return_url: String,
    /// Where the buyer lands after abandoning.
    pub cancel_url: String,
}

/// A successfully created provider checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCheckout {
    /// Hosted payment page URL for the buyer.
    pub checkout_url: String,
    /// Provider-assigned token identifying this checkout.
    pub provider_token: String,
}

/// Provider's answer to a status confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedStatus {
    /// True only when the provider reports the payment as completed.
    pub completed: bool,
    /// Raw provider status string, for logging.
    pub status: String,
}

/// Mock gateway for testing.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use crate::error::PaymentError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, RwLock};

    /// Mock payment gateway for testing.
    ///
    /// Hands out predictable tokens, records every intent it sees, and lets
    /// tests script confirmation answers and failures. Wraps state in Arc
    /// for cheap cloning.
    #[derive(Clone)]
    pub struct MockGateway {
        inner: Arc<MockGatewayInner>,
        provider_name: String,
    }

    #[derive(Default)]
    struct MockGatewayInner {
        token_counter: AtomicU64,
        confirm_calls: AtomicU64,
        intents: RwLock<Vec<CheckoutIntent>>,
        confirmed: RwLock<HashMap<String, bool>>,
        create_failure: RwLock<Option<String>>,
        confirm_failure: RwLock<Option<String>>,
    }

    impl Default for MockGateway {
        fn default() -> Self {
            Self {
                inner: Arc::new(MockGatewayInner::default()),
                provider_name: "paydunya".to_string(),
            }
        }
    }

    impl MockGateway {
        /// Create a new mock gateway named "paydunya".
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Create a mock gateway with a specific provider name.
        #[must_use]
        pub fn with_provider_name(name: impl Into<String>) -> Self {
            Self {
                inner: Arc::new(MockGatewayInner::default()),
                provider_name: name.into(),
            }
        }

        /// Make every following `create_checkout` call fail.
        pub fn fail_create_with(&self, message: &str) {
            *self.inner.create_failure.write().unwrap() = Some(message.to_string());
        }

        /// Make every following `confirm_status` call fail.
        pub fn fail_confirm_with(&self, message: &str) {
            *self.inner.confirm_failure.write().unwrap() = Some(message.to_string());
        }

        /// Script the confirmation answer for a token.
        pub fn set_confirmed(&self, token: &str, completed: bool) {
            self.inner
                .confirmed
                .write()
                .unwrap()
                .insert(token.to_string(), completed);
        }

        /// Get every intent passed to `create_checkout` (for testing).
        pub fn created_intents(&self) -> Vec<CheckoutIntent> {
            self.inner.intents.read().unwrap().clone()
        }

        /// Count of `confirm_status` calls made (for testing).
        pub fn confirm_calls(&self) -> u64 {
            self.inner.confirm_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PaymentGateway for MockGateway {
        fn provider_name(&self) -> &str {
            &self.provider_name
        }

        async fn create_checkout(&self, intent: &CheckoutIntent) -> Result<GatewayCheckout> {
            if let Some(message) = self.inner.create_failure.read().unwrap().clone() {
                return Err(PaymentError::Gateway {
                    operation: "create_checkout".to_string(),
                    message,
                    response_code: None,
                    http_status: None,
                }
                .into());
            }

            self.inner.intents.write().unwrap().push(intent.clone());
            let n = self.inner.token_counter.fetch_add(1, Ordering::SeqCst);
            let token = format!("tok_mock_{}", n);
            Ok(GatewayCheckout {
                checkout_url: format!("https://checkout.test/invoice/{}", token),
                provider_token: token,
            })
        }

        async fn confirm_status(&self, provider_token: &str) -> Result<ConfirmedStatus> {
            self.inner.confirm_calls.fetch_add(1, Ordering::SeqCst);

            if let Some(message) = self.inner.confirm_failure.read().unwrap().clone() {
                return Err(PaymentError::Gateway {
                    operation: "confirm_status".to_string(),
                    message,
                    response_code: None,
                    http_status: None,
                }
                .into());
            }

            let completed = self
                .inner
                .confirmed
                .read()
                .unwrap()
                .get(provider_token)
                .copied()
                .unwrap_or(false);
            Ok(ConfirmedStatus {
                completed,
                status: if completed { "completed" } else { "pending" }.to_string(),
            })
        }
    }
}
