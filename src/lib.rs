//! Tollgate - payment initiation and webhook reconciliation for modular
//! store subscriptions.
//!
//! Tollgate sells feature modules to tenant stores through an external
//! payment gateway: it prices a module list, opens a pending ledger row,
//! sends the buyer to the provider's hosted checkout page, and later
//! reconciles the provider's webhook into a subscription, module grants and
//! an invoice. Activation happens exactly once per payment, no matter how
//! many times the webhook is delivered.
//!
//! # Features
//!
//! - **Pricing**: deterministic quotes from an injected module catalog and
//!   fx table, safe for previews
//! - **Checkout**: redirect and immediate provider flows behind one pipeline
//! - **Reconciliation**: webhook correlation with gateway re-confirmation
//!   and a conditional-update exclusivity gate
//! - **Entitlements**: subscription upsert, grant replacement, append-only
//!   invoices, grace windows on failed renewals
//! - **HTTP**: an [`axum`] router ready to nest into a host application
//! - **Testing**: in-memory stores and a mock gateway behind the
//!   `test-support` feature
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use rust_decimal_macros::dec;
//! use tollgate::{
//!     billing_routes, BillingConfig, BillingState, CheckoutManager, FxTable,
//!     MembershipStore, ModuleCatalog, PaymentStore, PaydunyaClient,
//!     PaydunyaConfig, PaydunyaCredentials, Pricing, ProviderDirectory,
//!     ProviderFlow, WebhookHandler,
//! };
//!
//! fn billing_router<S, M>(store: S, membership: M) -> axum::Router
//! where
//!     S: PaymentStore + Clone + 'static,
//!     M: MembershipStore + 'static,
//! {
//!     let pricing = Pricing::new(
//!         ModuleCatalog::builder()
//!             .module("stock_auto")
//!             .base_price(dec!(5000))
//!             .display_name("Automatic stock")
//!             .done()
//!             .build(),
//!         FxTable::builder().rate("XOF", dec!(1)).build(),
//!     );
//!     let providers = ProviderDirectory::builder()
//!         .provider("paydunya")
//!         .fee_percentage(dec!(2))
//!         .flow(ProviderFlow::Redirect)
//!         .done()
//!         .build();
//!     let config = BillingConfig::builder()
//!         .with_callback_url("https://api.example.com/billing/webhook")
//!         .with_return_url("https://app.example.com/billing/done")
//!         .with_cancel_url("https://app.example.com/billing/cancelled")
//!         .build()
//!         .expect("static billing urls");
//!
//!     let gateway = PaydunyaClient::new(
//!         PaydunyaCredentials::new("master_key", "private_key", "token"),
//!         PaydunyaConfig::default().merchant_name("Demo Shop"),
//!     )
//!     .expect("paydunya credentials");
//!
//!     let checkout = CheckoutManager::new(
//!         store.clone(),
//!         membership,
//!         gateway.clone(),
//!         pricing,
//!         providers,
//!         config.clone(),
//!     );
//!     let webhook =
//!         WebhookHandler::new(store, gateway, config).with_master_key("master_key");
//!     billing_routes(BillingState::new(checkout, webhook))
//! }
//! ```
//!
//! The host application authenticates its users and inserts a
//! [`Caller`](routes::Caller) into request extensions before the billing
//! routes run; the webhook route needs no caller.

pub mod activation;
pub mod catalog;
pub mod config;
pub mod error;
pub mod gateway;
pub mod initiation;
pub mod membership;
pub mod pricing;
pub mod providers;
pub mod reconcile;
pub mod routes;
pub mod storage;

// Re-exports for the public API
pub use activation::{ActivationManager, ActivationRequest};
pub use catalog::{FxTable, FxTableBuilder, ModuleCatalog, ModuleCatalogBuilder, ModuleConfig};
pub use config::{BillingConfig, BillingConfigBuilder};
pub use error::{PaymentError, Result, TollgateError};
pub use gateway::paydunya::{PaydunyaClient, PaydunyaConfig, PaydunyaCredentials, PaydunyaMode};
pub use gateway::{CheckoutIntent, ConfirmedStatus, GatewayCheckout, PaymentGateway};
pub use initiation::{CheckoutManager, CheckoutResult, InitiateRequest};
pub use membership::{MembershipStore, StoreMembership, StoreRole};
pub use pricing::{PriceQuote, Pricing};
pub use providers::{ProviderConfig, ProviderDirectory, ProviderFlow};
pub use reconcile::{CallbackPayload, WebhookHandler, WebhookOutcome};
pub use routes::{billing_routes, BillingState, Caller};
pub use storage::{
    ModuleGrant, PaymentStore, StoredInvoice, StoredSubscription, StoredTransaction,
    SubscriptionStatus, TransactionStatus,
};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging with sensible defaults
///
/// Call this early in the host application, before serving requests. Library
/// code never installs a subscriber on its own.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "debug", "tollgate=debug")
/// - `TOLLGATE_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("TOLLGATE_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
