//! Storage traits for payment data.
//!
//! Implement [`PaymentStore`] to persist transactions, subscriptions, module
//! grants and invoices to your database. An in-memory implementation is
//! provided for testing.

use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trait for storing payment data.
///
/// Implement this trait to persist payment state to your database.
/// An in-memory implementation is provided for testing.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    // Transaction ledger

    /// Persist a freshly created transaction.
    ///
    /// Transactions are created in `Pending` state before any external call
    /// is made, so a crashed gateway call still leaves an auditable row.
    async fn create_transaction(&self, transaction: &StoredTransaction) -> Result<()>;

    /// Get a transaction by id.
    async fn get_transaction(&self, transaction_id: &str) -> Result<Option<StoredTransaction>>;

    /// Attach the provider-assigned reference to a transaction.
    ///
    /// The reference is written at most once. Re-attaching the same value is
    /// a no-op; attaching a different value is an error.
    async fn attach_provider_reference(&self, transaction_id: &str, reference: &str)
        -> Result<()>;

    /// Move a transaction to `Completed`.
    ///
    /// Idempotent: calling this on an already-terminal transaction is a
    /// no-op, because webhook delivery is at-least-once and duplicate
    /// callbacks are normal. A terminal status never moves backward.
    async fn mark_completed(&self, transaction_id: &str) -> Result<()>;

    /// Move a transaction to `Failed`.
    ///
    /// Idempotent, same contract as [`mark_completed`](Self::mark_completed).
    async fn mark_failed(&self, transaction_id: &str) -> Result<()>;

    /// Complete the transaction only if it is still pending.
    ///
    /// Returns `Ok(true)` if this call performed the transition and
    /// `Ok(false)` if the transaction was already terminal. This is the
    /// exclusivity gate the reconciliation service uses before activating
    /// entitlements, so exactly one of two racing duplicate deliveries wins.
    ///
    /// # Important: implementations must make this atomic
    ///
    /// A read-then-write sequence reintroduces the duplicate-activation
    /// race. Use a single conditional update and inspect the affected-row
    /// count:
    ///
    /// ```sql
    /// UPDATE transactions
    /// SET status = 'completed'
    /// WHERE id = $1 AND status = 'pending'
    /// RETURNING id
    /// ```
    ///
    /// If the query returns a row, this call won the transition.
    async fn complete_if_pending(&self, transaction_id: &str) -> Result<bool>;

    /// Record the subscription a completed transaction activated.
    async fn link_subscription(&self, transaction_id: &str, subscription_id: &str) -> Result<()>;

    // Subscriptions

    /// Get the subscription for a store.
    async fn get_subscription(&self, store_id: &str) -> Result<Option<StoredSubscription>>;

    /// Insert the subscription, or update it if the store already has one.
    ///
    /// One atomic insert-or-update keyed on `store_id` (`ON CONFLICT
    /// (store_id) DO UPDATE` or equivalent). When a row already exists its
    /// id is kept; every other column takes the incoming value. Returns the
    /// row as persisted.
    async fn upsert_subscription(
        &self,
        subscription: &StoredSubscription,
    ) -> Result<StoredSubscription>;

    // Module grants

    /// Replace the store's grant set with the given module ids.
    ///
    /// Delete-and-insert inside one transaction: a crash must never leave a
    /// store with a partial grant set.
    async fn replace_grants(&self, store_id: &str, module_ids: &[String]) -> Result<()>;

    /// Get all grants for a store.
    async fn get_grants(&self, store_id: &str) -> Result<Vec<ModuleGrant>>;

    // Invoices

    /// Append an invoice. Invoices are append-only and never updated.
    async fn append_invoice(&self, invoice: &StoredInvoice) -> Result<()>;

    /// List invoices for a store, oldest first.
    async fn list_invoices(&self, store_id: &str) -> Result<Vec<StoredInvoice>>;
}

/// One payment attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredTransaction {
    /// Internal transaction id.
    pub id: String,
    /// The store this payment belongs to.
    pub store_id: String,
    /// Amount charged to the buyer, in `currency`.
    pub gross_amount: Decimal,
    /// Provider fee portion of the gross amount.
    pub fee_amount: Decimal,
    /// Gross minus fee.
    pub net_amount: Decimal,
    /// Display currency of the amounts above.
    pub currency: String,
    /// Buyer country, when known.
    pub country: Option<String>,
    /// Name of the provider handling this payment.
    pub provider: String,
    /// Provider-assigned reference, set once the gateway responds.
    pub provider_reference: Option<String>,
    /// Current status.
    pub status: TransactionStatus,
    /// Subscription activated by this payment, set on completion.
    pub subscription_id: Option<String>,
    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

impl StoredTransaction {
    /// Check if the transaction has reached a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if the transaction is still awaiting confirmation.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }
}

/// Transaction status.
///
/// Transitions only run `Pending -> Completed` or `Pending -> Failed`,
/// never backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Created, awaiting gateway confirmation.
    Pending,
    /// Payment confirmed and entitlements activated.
    Completed,
    /// Payment definitively not completed.
    Failed,
}

impl TransactionStatus {
    /// Convert to the persisted string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Check if this status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The current entitlement contract for a store. One row per store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredSubscription {
    /// Subscription id. Stable across renewals of the same store.
    pub id: String,
    /// The store this subscription belongs to. Unique.
    pub store_id: String,
    /// Active module ids. Fully replaced on every activation, never merged.
    pub modules: Vec<String>,
    /// Amount of the activating payment.
    pub amount: Decimal,
    /// Currency of the activating payment.
    pub currency: String,
    /// Provider of the activating payment.
    pub provider: String,
    /// Buyer country of the activating payment, when known.
    pub country: Option<String>,
    /// Current status.
    pub status: SubscriptionStatus,
    /// When the current paid period started.
    pub started_at: DateTime<Utc>,
    /// When the next payment is due.
    pub renews_at: DateTime<Utc>,
    /// End of the grace window after a failed payment, if any.
    pub grace_until: Option<DateTime<Utc>>,
}

impl StoredSubscription {
    /// Check if the subscription currently entitles the store (active or
    /// within its grace window).
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::Grace
        )
    }

    /// Check if the subscription is riding out a failed payment.
    #[must_use]
    pub fn in_grace(&self) -> bool {
        self.status == SubscriptionStatus::Grace
    }

    /// Check if a module is part of this subscription.
    #[must_use]
    pub fn has_module(&self, module_id: &str) -> bool {
        self.modules.iter().any(|m| m == module_id)
    }
}

/// Subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Paid and current.
    Active,
    /// A renewal payment failed; access continues until `grace_until`.
    Grace,
    /// No longer entitled.
    Cancelled,
}

impl SubscriptionStatus {
    /// Convert to the persisted string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Grace => "grace",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One (store, module) entitlement row.
///
/// This is the record the rest of the application reads to gate features.
/// The grant set for a store always equals its subscription's module list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModuleGrant {
    /// The entitled store.
    pub store_id: String,
    /// The granted module.
    pub module_id: String,
    /// When the grant was (re)written.
    pub granted_at: DateTime<Utc>,
}

/// An immutable receipt of one activation event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredInvoice {
    /// Invoice id.
    pub id: String,
    /// The store the invoice was issued to.
    pub store_id: String,
    /// Human-facing invoice number, derived from year, month and store id.
    pub number: String,
    /// Invoiced amount.
    pub amount: Decimal,
    /// Currency of the invoiced amount.
    pub currency: String,
    /// Snapshot of the module list at activation time.
    pub modules: Vec<String>,
    /// Invoice status.
    pub status: InvoiceStatus,
    /// When the invoice was issued.
    pub issued_at: DateTime<Utc>,
    /// When the invoice was paid.
    pub paid_at: Option<DateTime<Utc>>,
    /// Billing period start.
    pub period_start: DateTime<Utc>,
    /// Billing period end.
    pub period_end: DateTime<Utc>,
}

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Settled. Activation always writes this.
    Paid,
    /// Awaiting settlement.
    Pending,
}

impl InvoiceStatus {
    /// Convert to the persisted string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paid => "paid",
            Self::Pending => "pending",
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// In-memory payment store for testing.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, RwLock};

    /// In-memory payment store for testing.
    ///
    /// Wraps data in Arc for cheap cloning.
    #[derive(Default, Clone)]
    pub struct InMemoryPaymentStore {
        inner: Arc<InMemoryPaymentStoreInner>,
    }

    #[derive(Default)]
    struct InMemoryPaymentStoreInner {
        transactions: RwLock<HashMap<String, StoredTransaction>>,
        subscriptions: RwLock<HashMap<String, StoredSubscription>>,
        grants: RwLock<HashMap<String, Vec<ModuleGrant>>>,
        invoices: RwLock<Vec<StoredInvoice>>,
    }

    impl InMemoryPaymentStore {
        /// Create a new in-memory store.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Get all transactions (for testing).
        pub fn all_transactions(&self) -> Vec<StoredTransaction> {
            self.inner
                .transactions
                .read()
                .unwrap()
                .values()
                .cloned()
                .collect()
        }

        /// Count transactions for a store (for testing).
        pub fn transaction_count(&self, store_id: &str) -> usize {
            self.inner
                .transactions
                .read()
                .unwrap()
                .values()
                .filter(|t| t.store_id == store_id)
                .count()
        }

        /// Get the granted module ids for a store (for testing).
        pub fn granted_modules(&self, store_id: &str) -> Vec<String> {
            self.inner
                .grants
                .read()
                .unwrap()
                .get(store_id)
                .map(|grants| grants.iter().map(|g| g.module_id.clone()).collect())
                .unwrap_or_default()
        }

        /// Count invoices for a store (for testing).
        pub fn invoice_count(&self, store_id: &str) -> usize {
            self.inner
                .invoices
                .read()
                .unwrap()
                .iter()
                .filter(|i| i.store_id == store_id)
                .count()
        }

        /// Seed a subscription directly (for testing).
        pub fn seed_subscription(&self, subscription: StoredSubscription) {
            self.inner
                .subscriptions
                .write()
                .unwrap()
                .insert(subscription.store_id.clone(), subscription);
        }
    }

    #[async_trait]
    impl PaymentStore for InMemoryPaymentStore {
        async fn create_transaction(&self, transaction: &StoredTransaction) -> Result<()> {
            self.inner
                .transactions
                .write()
                .unwrap()
                .insert(transaction.id.clone(), transaction.clone());
            Ok(())
        }

        async fn get_transaction(
            &self,
            transaction_id: &str,
        ) -> Result<Option<StoredTransaction>> {
            Ok(self
                .inner
                .transactions
                .read()
                .unwrap()
                .get(transaction_id)
                .cloned())
        }

        async fn attach_provider_reference(
            &self,
            transaction_id: &str,
            reference: &str,
        ) -> Result<()> {
            let mut transactions = self.inner.transactions.write().unwrap();
            let transaction = transactions.get_mut(transaction_id).ok_or_else(|| {
                PaymentError::UnknownTransaction {
                    transaction_id: transaction_id.to_string(),
                }
            })?;

            match &transaction.provider_reference {
                None => {
                    transaction.provider_reference = Some(reference.to_string());
                    Ok(())
                }
                Some(existing) if existing == reference => Ok(()),
                Some(_) => Err(PaymentError::ProviderReferenceAlreadySet {
                    transaction_id: transaction_id.to_string(),
                }
                .into()),
            }
        }

        async fn mark_completed(&self, transaction_id: &str) -> Result<()> {
            let mut transactions = self.inner.transactions.write().unwrap();
            let transaction = transactions.get_mut(transaction_id).ok_or_else(|| {
                PaymentError::UnknownTransaction {
                    transaction_id: transaction_id.to_string(),
                }
            })?;

            if !transaction.status.is_terminal() {
                transaction.status = TransactionStatus::Completed;
            }
            Ok(())
        }

        async fn mark_failed(&self, transaction_id: &str) -> Result<()> {
            let mut transactions = self.inner.transactions.write().unwrap();
            let transaction = transactions.get_mut(transaction_id).ok_or_else(|| {
                PaymentError::UnknownTransaction {
                    transaction_id: transaction_id.to_string(),
                }
            })?;

            if !transaction.status.is_terminal() {
                transaction.status = TransactionStatus::Failed;
            }
            Ok(())
        }

        async fn complete_if_pending(&self, transaction_id: &str) -> Result<bool> {
            // One write lock held across check and transition, which is the
            // in-memory equivalent of a conditional UPDATE.
            let mut transactions = self.inner.transactions.write().unwrap();
            let transaction = transactions.get_mut(transaction_id).ok_or_else(|| {
                PaymentError::UnknownTransaction {
                    transaction_id: transaction_id.to_string(),
                }
            })?;

            if transaction.status == TransactionStatus::Pending {
                transaction.status = TransactionStatus::Completed;
                Ok(true)
            } else {
                Ok(false)
            }
        }

        async fn link_subscription(
            &self,
            transaction_id: &str,
            subscription_id: &str,
        ) -> Result<()> {
            let mut transactions = self.inner.transactions.write().unwrap();
            let transaction = transactions.get_mut(transaction_id).ok_or_else(|| {
                PaymentError::UnknownTransaction {
                    transaction_id: transaction_id.to_string(),
                }
            })?;
            transaction.subscription_id = Some(subscription_id.to_string());
            Ok(())
        }

        async fn get_subscription(&self, store_id: &str) -> Result<Option<StoredSubscription>> {
            Ok(self
                .inner
                .subscriptions
                .read()
                .unwrap()
                .get(store_id)
                .cloned())
        }

        async fn upsert_subscription(
            &self,
            subscription: &StoredSubscription,
        ) -> Result<StoredSubscription> {
            let mut subscriptions = self.inner.subscriptions.write().unwrap();

            let persisted = match subscriptions.get(&subscription.store_id) {
                Some(existing) => {
                    // Conflict path: the row keeps its identity, everything
                    // else takes the incoming values.
                    let mut updated = subscription.clone();
                    updated.id = existing.id.clone();
                    updated
                }
                None => subscription.clone(),
            };

            subscriptions.insert(persisted.store_id.clone(), persisted.clone());
            Ok(persisted)
        }

        async fn replace_grants(&self, store_id: &str, module_ids: &[String]) -> Result<()> {
            let now = Utc::now();
            let grants: Vec<ModuleGrant> = module_ids
                .iter()
                .map(|module_id| ModuleGrant {
                    store_id: store_id.to_string(),
                    module_id: module_id.clone(),
                    granted_at: now,
                })
                .collect();

            self.inner
                .grants
                .write()
                .unwrap()
                .insert(store_id.to_string(), grants);
            Ok(())
        }

        async fn get_grants(&self, store_id: &str) -> Result<Vec<ModuleGrant>> {
            Ok(self
                .inner
                .grants
                .read()
                .unwrap()
                .get(store_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn append_invoice(&self, invoice: &StoredInvoice) -> Result<()> {
            self.inner.invoices.write().unwrap().push(invoice.clone());
            Ok(())
        }

        async fn list_invoices(&self, store_id: &str) -> Result<Vec<StoredInvoice>> {
            Ok(self
                .inner
                .invoices
                .read()
                .unwrap()
                .iter()
                .filter(|i| i.store_id == store_id)
                .cloned()
                .collect())
        }
    }
}
