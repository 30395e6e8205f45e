//! Entitlement activation.
//!
//! The single place a confirmed payment turns into access: one subscription
//! upsert, one grant replacement, one appended invoice. Both the immediate
//! initiation flow and the webhook reconciliation flow end up here, so the
//! effects stay identical no matter which path confirmed the payment.

use crate::config::BillingConfig;
use crate::error::Result;
use crate::storage::{
    InvoiceStatus, PaymentStore, StoredInvoice, StoredSubscription, SubscriptionStatus,
};
use chrono::{DateTime, Duration, Months, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeSet;

/// What a confirmed payment bought.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationRequest {
    /// The store being entitled.
    pub store_id: String,
    /// Module ids to grant. Duplicates are collapsed.
    pub module_ids: Vec<String>,
    /// Amount of the confirming payment.
    pub amount: Decimal,
    /// Currency of the confirming payment.
    pub currency: String,
    /// Provider that confirmed the payment.
    pub provider: String,
    /// Buyer country, when known.
    pub country: Option<String>,
}

/// Activation manager.
///
/// Turns confirmed payments into subscription state, module grants and
/// invoices. Callers are responsible for only invoking [`activate`](Self::activate)
/// after the payment is confirmed and the transaction's completion gate has
/// been won.
pub struct ActivationManager<S: PaymentStore> {
    store: S,
    config: BillingConfig,
}

impl<S: PaymentStore> ActivationManager<S> {
    /// Create a new activation manager.
    #[must_use]
    pub fn new(store: S, config: BillingConfig) -> Self {
        Self { store, config }
    }

    /// Activate entitlements for a confirmed payment.
    ///
    /// Upserts the store's subscription for one month starting now, replaces
    /// the store's module grants with the purchased set, and appends a paid
    /// invoice. The subscription's module list is replaced, never merged:
    /// paying for fewer modules than before shrinks access.
    pub async fn activate(&self, request: &ActivationRequest) -> Result<StoredSubscription> {
        let now = Utc::now();
        let renews_at = now + Months::new(1);
        let modules = normalize_modules(&request.module_ids);

        let subscription = self
            .store
            .upsert_subscription(&StoredSubscription {
                id: uuid::Uuid::new_v4().to_string(),
                store_id: request.store_id.clone(),
                modules: modules.clone(),
                amount: request.amount,
                currency: request.currency.clone(),
                provider: request.provider.clone(),
                country: request.country.clone(),
                status: SubscriptionStatus::Active,
                started_at: now,
                renews_at,
                grace_until: None,
            })
            .await?;

        self.store
            .replace_grants(&request.store_id, &modules)
            .await?;

        self.store
            .append_invoice(&StoredInvoice {
                id: uuid::Uuid::new_v4().to_string(),
                store_id: request.store_id.clone(),
                number: invoice_number(now, &request.store_id),
                amount: request.amount,
                currency: request.currency.clone(),
                modules,
                status: InvoiceStatus::Paid,
                issued_at: now,
                paid_at: Some(now),
                period_start: now,
                period_end: renews_at,
            })
            .await?;

        tracing::info!(
            target: "tollgate::activation",
            store_id = %request.store_id,
            subscription_id = %subscription.id,
            provider = %request.provider,
            amount = %request.amount,
            currency = %request.currency,
            modules = subscription.modules.len(),
            "entitlements activated"
        );

        Ok(subscription)
    }

    /// Give a store breathing room after a failed renewal payment.
    ///
    /// If the store has an active (or already graced) subscription, it moves
    /// to `Grace` with access until now plus the configured grace period.
    /// Returns `None` when there is nothing to grace, which is not an error:
    /// failure notices for stores without subscriptions are simply noted.
    pub async fn apply_grace(&self, store_id: &str) -> Result<Option<StoredSubscription>> {
        let Some(subscription) = self.store.get_subscription(store_id).await? else {
            return Ok(None);
        };
        if !subscription.is_active() {
            return Ok(None);
        }

        let grace_until = Utc::now() + Duration::days(self.config.grace_period_days);
        let updated = self
            .store
            .upsert_subscription(&StoredSubscription {
                status: SubscriptionStatus::Grace,
                grace_until: Some(grace_until),
                ..subscription
            })
            .await?;

        tracing::warn!(
            target: "tollgate::activation",
            store_id = %store_id,
            grace_until = %grace_until,
            "payment failed, subscription moved to grace"
        );

        Ok(Some(updated))
    }
}

/// Collapse duplicates and fix the order of a module list.
fn normalize_modules(module_ids: &[String]) -> Vec<String> {
    module_ids
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Derive the human-facing invoice number.
///
/// `INV-` then year and month of issue, then the first alphanumeric
/// characters of the store id, uppercased: `INV-202608-STORE1`.
fn invoice_number(issued_at: DateTime<Utc>, store_id: &str) -> String {
    let prefix: String = store_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(6)
        .collect::<String>()
        .to_uppercase();
    format!("INV-{}-{}", issued_at.format("%Y%m"), prefix)
}
