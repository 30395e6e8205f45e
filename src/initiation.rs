//! Payment initiation.
//!
//! [`CheckoutManager`] runs the checkout pipeline: authorize the caller,
//! resolve the provider, price the module list, open a pending ledger row,
//! then either hand the buyer to the provider's hosted page or activate on
//! the spot for providers that settle without a redirect.

use crate::activation::{ActivationManager, ActivationRequest};
use crate::catalog::ModuleConfig;
use crate::config::BillingConfig;
use crate::error::{PaymentError, Result, TollgateError};
use crate::gateway::{CheckoutIntent, PaymentGateway};
use crate::membership::MembershipStore;
use crate::pricing::{PriceQuote, Pricing};
use crate::providers::{ProviderDirectory, ProviderFlow};
use crate::storage::{PaymentStore, StoredSubscription, StoredTransaction, TransactionStatus};
use chrono::Utc;
use serde::Serialize;

/// A caller's request to start a payment.
#[derive(Debug, Clone)]
pub struct InitiateRequest {
    /// Authenticated user starting the payment.
    pub caller_id: String,
    /// Store being paid for. The caller must hold a role on it.
    pub store_id: String,
    /// Provider to charge through.
    pub provider: String,
    /// Module ids being purchased.
    pub module_ids: Vec<String>,
    /// Display currency for the quote.
    pub currency: String,
    /// Buyer country, when known.
    pub country: Option<String>,
}

/// Outcome of a successful initiation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "flow", rename_all = "snake_case")]
pub enum CheckoutResult {
    /// Send the buyer to the provider's hosted payment page. The ledger row
    /// stays pending until the provider's callback is reconciled.
    Redirect {
        transaction_id: String,
        checkout_url: String,
    },
    /// The provider settles without a redirect; entitlements are already
    /// active when this returns.
    Immediate {
        transaction_id: String,
        subscription: StoredSubscription,
    },
}

/// Checkout manager.
///
/// Holds the shared pricing calculator and the provider directory, both
/// injected at construction so every flow prices and resolves identically.
pub struct CheckoutManager<S, M, G>
where
    S: PaymentStore + Clone,
    M: MembershipStore,
    G: PaymentGateway,
{
    store: S,
    membership: M,
    gateway: G,
    pricing: Pricing,
    providers: ProviderDirectory,
    config: BillingConfig,
    activation: ActivationManager<S>,
}

impl<S, M, G> CheckoutManager<S, M, G>
where
    S: PaymentStore + Clone,
    M: MembershipStore,
    G: PaymentGateway,
{
    /// Create a new checkout manager.
    #[must_use]
    pub fn new(
        store: S,
        membership: M,
        gateway: G,
        pricing: Pricing,
        providers: ProviderDirectory,
        config: BillingConfig,
    ) -> Self {
        let activation = ActivationManager::new(store.clone(), config.clone());
        Self {
            store,
            membership,
            gateway,
            pricing,
            providers,
            config,
            activation,
        }
    }

    /// Price a module list without touching the ledger.
    ///
    /// Safe to call repeatedly for previews; nothing is persisted.
    pub fn quote(
        &self,
        module_ids: &[String],
        currency: &str,
        provider_name: &str,
    ) -> Result<PriceQuote> {
        let provider = self.providers.active(provider_name).ok_or_else(|| {
            PaymentError::ProviderUnavailable {
                provider: provider_name.to_string(),
            }
        })?;
        Ok(self
            .pricing
            .quote(module_ids, currency, provider.fee_percentage)?)
    }

    /// Start a payment.
    ///
    /// The pending transaction is written before any external call, so a
    /// gateway failure still leaves an auditable `Failed` row. Gateway
    /// failures surface to the caller; they are never retried here.
    pub async fn initiate(&self, request: InitiateRequest) -> Result<CheckoutResult> {
        if request.module_ids.is_empty() {
            return Err(TollgateError::bad_request("module list cannot be empty"));
        }

        if !self
            .membership
            .is_member(&request.store_id, &request.caller_id)
            .await?
        {
            return Err(PaymentError::MembershipRequired {
                caller_id: request.caller_id.clone(),
                store_id: request.store_id.clone(),
            }
            .into());
        }

        let provider = self
            .providers
            .active(&request.provider)
            .ok_or_else(|| PaymentError::ProviderUnavailable {
                provider: request.provider.clone(),
            })?
            .clone();

        let quote =
            self.pricing
                .quote(&request.module_ids, &request.currency, provider.fee_percentage)?;

        let transaction_id = uuid::Uuid::new_v4().to_string();
        self.store
            .create_transaction(&StoredTransaction {
                id: transaction_id.clone(),
                store_id: request.store_id.clone(),
                gross_amount: quote.gross,
                fee_amount: quote.fee,
                net_amount: quote.net,
                currency: quote.currency.clone(),
                country: request.country.clone(),
                provider: provider.name.clone(),
                provider_reference: None,
                status: TransactionStatus::Pending,
                subscription_id: None,
                created_at: Utc::now(),
            })
            .await?;

        tracing::info!(
            target: "tollgate::initiation",
            transaction_id = %transaction_id,
            store_id = %request.store_id,
            caller_id = %request.caller_id,
            provider = %provider.name,
            flow = %provider.flow,
            gross = %quote.gross,
            currency = %quote.currency,
            "payment initiated"
        );

        match provider.flow {
            ProviderFlow::Redirect => {
                self.redirect_flow(&request, &provider.name, &quote, transaction_id)
                    .await
            }
            ProviderFlow::Immediate => {
                self.immediate_flow(&request, &provider.name, &quote, transaction_id)
                    .await
            }
        }
    }

    async fn redirect_flow(
        &self,
        request: &InitiateRequest,
        provider_name: &str,
        quote: &PriceQuote,
        transaction_id: String,
    ) -> Result<CheckoutResult> {
        let intent = CheckoutIntent {
            transaction_id: transaction_id.clone(),
            store_id: request.store_id.clone(),
            module_ids: quote.modules.clone(),
            amount: quote.base_amount,
            description: self.describe_modules(&quote.modules),
            callback_url: self.config.callback_url.clone(),
            return_url: self.config.return_url.clone(),
            cancel_url: self.config.cancel_url.clone(),
        };

        match self.gateway.create_checkout(&intent).await {
            Ok(checkout) => {
                self.store
                    .attach_provider_reference(&transaction_id, &checkout.provider_token)
                    .await?;
                Ok(CheckoutResult::Redirect {
                    transaction_id,
                    checkout_url: checkout.checkout_url,
                })
            }
            Err(err) => {
                // No checkout exists provider-side; close the ledger row
                // before surfacing the failure.
                if let Err(mark_err) = self.store.mark_failed(&transaction_id).await {
                    tracing::error!(
                        target: "tollgate::initiation",
                        transaction_id = %transaction_id,
                        error = %mark_err,
                        "could not mark transaction failed after gateway error"
                    );
                }
                tracing::warn!(
                    target: "tollgate::initiation",
                    transaction_id = %transaction_id,
                    provider = %provider_name,
                    error = %err,
                    "checkout creation failed"
                );
                Err(err)
            }
        }
    }

    async fn immediate_flow(
        &self,
        request: &InitiateRequest,
        provider_name: &str,
        quote: &PriceQuote,
        transaction_id: String,
    ) -> Result<CheckoutResult> {
        let subscription = self
            .activation
            .activate(&ActivationRequest {
                store_id: request.store_id.clone(),
                module_ids: quote.modules.clone(),
                amount: quote.gross,
                currency: quote.currency.clone(),
                provider: provider_name.to_string(),
                country: request.country.clone(),
            })
            .await?;

        self.store.mark_completed(&transaction_id).await?;
        self.store
            .link_subscription(&transaction_id, &subscription.id)
            .await?;

        Ok(CheckoutResult::Immediate {
            transaction_id,
            subscription,
        })
    }

    fn describe_modules(&self, module_ids: &[String]) -> String {
        let labels: Vec<&str> = module_ids
            .iter()
            .map(|id| {
                self.pricing
                    .catalog()
                    .get(id)
                    .map_or(id.as_str(), ModuleConfig::label)
            })
            .collect();
        format!("Store modules: {}", labels.join(", "))
    }
}
