//! Webhook reconciliation.
//!
//! Correlates asynchronous provider callbacks with pending transactions,
//! re-confirms payment status with the gateway, and activates entitlements
//! exactly once per transaction.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;

use crate::activation::{ActivationManager, ActivationRequest};
use crate::config::BillingConfig;
use crate::error::{PaymentError, Result};
use crate::gateway::PaymentGateway;
use crate::storage::PaymentStore;

/// Legacy event name announcing a failed renewal payment.
const LEGACY_PAYMENT_FAILED: &str = "payment.failed";

/// A decoded provider callback.
///
/// Decoding tries the structured IPN shape first and falls back to the
/// generic legacy event shape only when the IPN schema does not match.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CallbackPayload {
    /// Structured instant payment notification tied to one invoice.
    Ipn(ProviderIpn),
    /// Generic event from the provider's older callback format.
    Legacy(LegacyEvent),
}

impl CallbackPayload {
    /// Decode a raw callback body.
    ///
    /// # Errors
    /// Returns [`PaymentError::InvalidPayload`] when the body is not JSON or
    /// matches neither supported shape.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw)
            .map_err(|err| {
                PaymentError::InvalidPayload {
                    message: format!("unrecognised callback shape: {err}"),
                }
                .into()
            })
    }
}

/// Structured instant payment notification.
///
/// Everything in here is correlation data. The status fields are echoed in
/// logs but never decide anything; only the gateway confirmation call does.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderIpn {
    /// Provider response code ("00" means success on the wire).
    #[serde(default)]
    pub response_code: Option<String>,
    /// Provider-reported invoice status.
    #[serde(default)]
    pub status: Option<String>,
    /// Integrity hash over the provider's master key, when configured.
    #[serde(default)]
    pub hash: Option<String>,
    /// The invoice this notification is about.
    pub invoice: IpnInvoice,
    /// Correlation block echoed back from checkout creation.
    pub custom_data: IpnCorrelation,
}

/// Invoice block of an IPN.
#[derive(Debug, Clone, Deserialize)]
pub struct IpnInvoice {
    /// Provider-assigned invoice token.
    pub token: String,
    /// Amount as reported by the provider. Untrusted; the ledger row holds
    /// the authoritative amounts.
    #[serde(default)]
    pub total_amount: Option<f64>,
}

/// Correlation block of an IPN, echoed back from checkout creation.
#[derive(Debug, Clone, Deserialize)]
pub struct IpnCorrelation {
    /// Internal transaction id this callback refers to.
    pub transaction_id: String,
    /// Store the payment was made for.
    pub store_id: String,
    /// Module ids that were purchased.
    #[serde(default, deserialize_with = "modules_list")]
    pub modules: Vec<String>,
    /// Display currency at initiation time.
    #[serde(default)]
    pub currency: Option<String>,
    /// Buyer country at initiation time.
    #[serde(default)]
    pub country: Option<String>,
}

/// Generic event from the provider's older callback format.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyEvent {
    /// Event name, e.g. `payment.failed`.
    pub event: String,
    /// Store the event concerns.
    pub store_id: String,
    /// Provider-supplied failure reason, when given.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Module lists round-trip through the provider either as a JSON array or
/// as a JSON-encoded string. Accept both.
fn modules_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Encoded(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::List(modules) => Ok(modules),
        Raw::Encoded(raw) => serde_json::from_str(&raw).map_err(serde::de::Error::custom),
    }
}

/// Outcome of callback processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The payment was confirmed and entitlements were activated.
    Processed,
    /// The referenced transaction was already settled; nothing changed.
    AlreadyProcessed,
    /// The callback reported or revealed an unsuccessful payment.
    Failed,
    /// The callback carried no event this subsystem acts on.
    Ignored,
}

impl WebhookOutcome {
    /// Short name for acknowledgement bodies and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::AlreadyProcessed => "already_processed",
            Self::Failed => "failed",
            Self::Ignored => "ignored",
        }
    }
}

impl std::fmt::Display for WebhookOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Webhook reconciliation handler.
///
/// The callback body is treated as correlation data only; a forged or
/// replayed delivery can never activate anything because the gateway is
/// re-queried before any state changes, and the transaction's conditional
/// completion gate admits exactly one delivery to the activation step.
///
/// The optional master key is held as a [`SecretString`] so it never shows
/// up in debug output.
pub struct WebhookHandler<S: PaymentStore + Clone, G: PaymentGateway> {
    store: S,
    gateway: G,
    activation: ActivationManager<S>,
    master_key: Option<SecretString>,
}

impl<S: PaymentStore + Clone, G: PaymentGateway> WebhookHandler<S, G> {
    /// Create a new webhook handler.
    #[must_use]
    pub fn new(store: S, gateway: G, config: BillingConfig) -> Self {
        let activation = ActivationManager::new(store.clone(), config);
        Self {
            store,
            gateway,
            activation,
            master_key: None,
        }
    }

    /// Verify callback integrity hashes against this master key.
    ///
    /// Without a key, payload hashes are not checked. The gateway
    /// confirmation call remains the authoritative proof either way.
    #[must_use]
    pub fn with_master_key(mut self, master_key: impl Into<SecretString>) -> Self {
        self.master_key = Some(master_key.into());
        self
    }

    /// Process a raw provider callback body.
    ///
    /// # Errors
    /// Returns an error for structurally invalid payloads, callbacks that
    /// reference no known transaction, and infrastructure failures.
    /// Business outcomes such as duplicate deliveries or unconfirmed
    /// payments are acknowledged via [`WebhookOutcome`], not errors, so the
    /// provider stops redelivering.
    pub async fn handle_callback(&self, raw: &[u8]) -> Result<WebhookOutcome> {
        let payload = CallbackPayload::decode(raw).map_err(|err| {
            tracing::warn!(
                target: "tollgate::reconcile",
                error = %err,
                "failed to decode callback payload"
            );
            err
        })?;

        match payload {
            CallbackPayload::Ipn(ipn) => self.reconcile_ipn(ipn).await,
            CallbackPayload::Legacy(event) => self.handle_legacy_event(event).await,
        }
    }

    /// Reconcile a structured IPN against the ledger and the gateway.
    async fn reconcile_ipn(&self, ipn: ProviderIpn) -> Result<WebhookOutcome> {
        if let Some(hash) = ipn.hash.as_deref() {
            self.verify_hash(hash)?;
        }

        let transaction_id = ipn.custom_data.transaction_id.as_str();
        let transaction = self
            .store
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| PaymentError::UnknownTransaction {
                transaction_id: transaction_id.to_string(),
            })?;

        if ipn.custom_data.store_id != transaction.store_id {
            return Err(PaymentError::InvalidPayload {
                message: "correlation store does not match the transaction".to_string(),
            }
            .into());
        }

        if transaction.is_terminal() {
            tracing::info!(
                target: "tollgate::reconcile",
                transaction_id = %transaction.id,
                store_id = %transaction.store_id,
                status = %transaction.status,
                "duplicate callback for a settled transaction"
            );
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        // Confirm against the reference attached at initiation; the token in
        // the callback body is only a fallback for rows that never got one.
        let token = match transaction.provider_reference.as_deref() {
            Some(reference) => reference,
            None => {
                tracing::warn!(
                    target: "tollgate::reconcile",
                    transaction_id = %transaction.id,
                    "transaction has no provider reference, confirming with the callback token"
                );
                ipn.invoice.token.as_str()
            }
        };

        let confirmation = self.gateway.confirm_status(token).await?;
        if !confirmation.completed {
            self.store.mark_failed(transaction_id).await?;
            tracing::info!(
                target: "tollgate::reconcile",
                transaction_id = %transaction.id,
                store_id = %transaction.store_id,
                provider = %transaction.provider,
                status = %confirmation.status,
                "gateway did not confirm the payment, transaction failed"
            );
            return Ok(WebhookOutcome::Failed);
        }

        // Exclusivity gate: only the delivery that flips pending -> completed
        // may activate. Everything else is a duplicate.
        if !self.store.complete_if_pending(transaction_id).await? {
            tracing::info!(
                target: "tollgate::reconcile",
                transaction_id = %transaction.id,
                "transaction settled by a concurrent delivery"
            );
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        let request = ActivationRequest {
            store_id: transaction.store_id.clone(),
            module_ids: ipn.custom_data.modules.clone(),
            amount: transaction.gross_amount,
            currency: transaction.currency.clone(),
            provider: transaction.provider.clone(),
            country: transaction.country.clone(),
        };
        let subscription = self.activation.activate(&request).await?;
        self.store
            .link_subscription(transaction_id, &subscription.id)
            .await?;

        tracing::info!(
            target: "tollgate::reconcile",
            transaction_id = %transaction.id,
            store_id = %transaction.store_id,
            subscription_id = %subscription.id,
            provider = %transaction.provider,
            "payment confirmed and entitlements activated"
        );
        Ok(WebhookOutcome::Processed)
    }

    /// Handle a legacy-format event.
    ///
    /// Only failure notices are acted on: a store with a live subscription
    /// gets a grace window instead of losing access outright.
    async fn handle_legacy_event(&self, event: LegacyEvent) -> Result<WebhookOutcome> {
        if event.event != LEGACY_PAYMENT_FAILED {
            tracing::debug!(
                target: "tollgate::reconcile",
                event = %event.event,
                store_id = %event.store_id,
                "ignoring legacy callback event"
            );
            return Ok(WebhookOutcome::Ignored);
        }

        match self.activation.apply_grace(&event.store_id).await? {
            Some(subscription) => {
                tracing::warn!(
                    target: "tollgate::reconcile",
                    store_id = %event.store_id,
                    reason = event.reason.as_deref().unwrap_or("unspecified"),
                    grace_until = ?subscription.grace_until,
                    "payment failure reported, subscription moved to grace"
                );
                Ok(WebhookOutcome::Failed)
            }
            None => {
                tracing::debug!(
                    target: "tollgate::reconcile",
                    store_id = %event.store_id,
                    "payment failure for a store with no live subscription"
                );
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    /// Check an IPN integrity hash when a master key is configured.
    fn verify_hash(&self, provided: &str) -> Result<()> {
        let Some(master_key) = &self.master_key else {
            return Ok(());
        };

        let expected = hex::encode(Sha512::digest(master_key.expose_secret().as_bytes()));
        if !digests_match(&expected, provided) {
            return Err(PaymentError::InvalidCallbackHash.into());
        }
        Ok(())
    }
}

/// Compare two hex digests in constant time.
///
/// Undecodable input compares unequal rather than erroring.
fn digests_match(expected_hex: &str, provided_hex: &str) -> bool {
    let Ok(expected) = hex::decode(expected_hex) else {
        return false;
    };
    let Ok(provided) = hex::decode(provided_hex) else {
        return false;
    };
    expected.ct_eq(&provided).unwrap_u8() == 1
}
