//! HTTP surface.
//!
//! An [`axum`] router exposing checkout initiation, quote previews and the
//! provider webhook, meant to be nested into a host application's router.
//! The host authenticates requests and inserts a [`Caller`] into request
//! extensions before these routes run.

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TollgateError};
use crate::gateway::PaymentGateway;
use crate::initiation::{CheckoutManager, CheckoutResult, InitiateRequest};
use crate::membership::MembershipStore;
use crate::pricing::PriceQuote;
use crate::reconcile::WebhookHandler;
use crate::storage::PaymentStore;

/// Authenticated caller identity.
///
/// The host's auth middleware inserts this into request extensions after
/// verifying the bearer token. Routes that need it reject with 403 when it
/// is absent.
#[derive(Debug, Clone)]
pub struct Caller {
    /// Verified user id of the requester.
    pub user_id: String,
}

impl Caller {
    /// Create a caller identity.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

impl<St> FromRequestParts<St> for Caller
where
    St: Send + Sync,
{
    type Rejection = TollgateError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &St,
    ) -> impl Future<Output = std::result::Result<Self, Self::Rejection>> + Send {
        Box::pin(async move {
            parts
                .extensions
                .get::<Caller>()
                .cloned()
                .ok_or_else(|| TollgateError::forbidden("no authenticated caller on the request"))
        })
    }
}

/// Shared state behind the billing routes.
///
/// Holds the two request-flow entry points. Cloning is cheap; the managers
/// themselves are shared.
pub struct BillingState<S, M, G>
where
    S: PaymentStore + Clone,
    M: MembershipStore,
    G: PaymentGateway,
{
    checkout: Arc<CheckoutManager<S, M, G>>,
    webhook: Arc<WebhookHandler<S, G>>,
}

impl<S, M, G> BillingState<S, M, G>
where
    S: PaymentStore + Clone,
    M: MembershipStore,
    G: PaymentGateway,
{
    /// Bundle the checkout manager and webhook handler into route state.
    #[must_use]
    pub fn new(checkout: CheckoutManager<S, M, G>, webhook: WebhookHandler<S, G>) -> Self {
        Self {
            checkout: Arc::new(checkout),
            webhook: Arc::new(webhook),
        }
    }
}

impl<S, M, G> Clone for BillingState<S, M, G>
where
    S: PaymentStore + Clone,
    M: MembershipStore,
    G: PaymentGateway,
{
    fn clone(&self) -> Self {
        Self {
            checkout: Arc::clone(&self.checkout),
            webhook: Arc::clone(&self.webhook),
        }
    }
}

/// Build the billing router.
///
/// Routes:
/// - `POST /billing/checkout`: start a payment (requires a [`Caller`])
/// - `POST /billing/quote`: price a module list, no side effects
/// - `POST /billing/webhook`: provider callback endpoint
pub fn billing_routes<S, M, G>(state: BillingState<S, M, G>) -> Router
where
    S: PaymentStore + Clone + 'static,
    M: MembershipStore + 'static,
    G: PaymentGateway + 'static,
{
    Router::new()
        .route("/billing/checkout", post(checkout::<S, M, G>))
        .route("/billing/quote", post(quote::<S, M, G>))
        .route("/billing/webhook", post(webhook::<S, M, G>))
        .with_state(state)
}

/// Body of `POST /billing/checkout`.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    /// Store being paid for.
    pub store_id: String,
    /// Provider to charge through.
    pub provider: String,
    /// Module ids being purchased.
    pub modules: Vec<String>,
    /// Display currency for the quote.
    pub currency: String,
    /// Buyer country, when known.
    #[serde(default)]
    pub country: Option<String>,
}

/// Body of `POST /billing/quote`.
#[derive(Debug, Clone, Deserialize)]
pub struct QuoteRequest {
    /// Provider whose fee schedule applies.
    pub provider: String,
    /// Module ids to price.
    pub modules: Vec<String>,
    /// Display currency for the quote.
    pub currency: String,
}

/// Response of `POST /billing/checkout`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CheckoutResponse {
    /// The buyer must be redirected to the provider's hosted page.
    Redirect {
        /// Hosted checkout page to send the buyer to.
        payment_url: String,
    },
    /// The payment settled inline and entitlements are already active.
    Immediate {
        /// Always `true`.
        success: bool,
        /// The activated subscription.
        subscription_id: String,
        /// Amount charged.
        amount: Decimal,
        /// Currency of `amount`.
        currency: String,
        /// When the next payment is due.
        renewal_date: DateTime<Utc>,
    },
}

impl From<CheckoutResult> for CheckoutResponse {
    fn from(result: CheckoutResult) -> Self {
        match result {
            CheckoutResult::Redirect { checkout_url, .. } => Self::Redirect {
                payment_url: checkout_url,
            },
            CheckoutResult::Immediate { subscription, .. } => Self::Immediate {
                success: true,
                subscription_id: subscription.id,
                amount: subscription.amount,
                currency: subscription.currency,
                renewal_date: subscription.renews_at,
            },
        }
    }
}

/// Acknowledgement body for the webhook endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    /// Always `true` for structurally valid payloads.
    pub received: bool,
    /// What the callback amounted to.
    pub status: &'static str,
}

async fn checkout<S, M, G>(
    State(state): State<BillingState<S, M, G>>,
    caller: Caller,
    Json(body): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>>
where
    S: PaymentStore + Clone + 'static,
    M: MembershipStore + 'static,
    G: PaymentGateway + 'static,
{
    let request = InitiateRequest {
        caller_id: caller.user_id,
        store_id: body.store_id,
        provider: body.provider,
        module_ids: body.modules,
        currency: body.currency,
        country: body.country,
    };
    let result = state.checkout.initiate(request).await?;
    Ok(Json(result.into()))
}

async fn quote<S, M, G>(
    State(state): State<BillingState<S, M, G>>,
    Json(body): Json<QuoteRequest>,
) -> Result<Json<PriceQuote>>
where
    S: PaymentStore + Clone + 'static,
    M: MembershipStore + 'static,
    G: PaymentGateway + 'static,
{
    let quote = state
        .checkout
        .quote(&body.modules, &body.currency, &body.provider)?;
    Ok(Json(quote))
}

async fn webhook<S, M, G>(
    State(state): State<BillingState<S, M, G>>,
    body: Bytes,
) -> Result<Json<WebhookAck>>
where
    S: PaymentStore + Clone + 'static,
    M: MembershipStore + 'static,
    G: PaymentGateway + 'static,
{
    let outcome = state.webhook.handle_callback(&body).await?;
    Ok(Json(WebhookAck {
        received: true,
        status: outcome.as_str(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FxTable, ModuleCatalog};
    use crate::config::BillingConfig;
    use crate::gateway::test::MockGateway;
    use crate::membership::test::InMemoryMembershipStore;
    use crate::membership::StoreRole;
    use crate::pricing::Pricing;
    use crate::providers::{ProviderDirectory, ProviderFlow};
    use crate::storage::test::InMemoryPaymentStore;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use rust_decimal_macros::dec;
    use tower::ServiceExt;

    struct Fixture {
        app: Router,
        store: InMemoryPaymentStore,
        gateway: MockGateway,
    }

    fn fixture() -> Fixture {
        let store = InMemoryPaymentStore::new();
        let gateway = MockGateway::new();

        let membership = InMemoryMembershipStore::new();
        membership.add_member("store_1", "user_1", StoreRole::Staff);

        let catalog = ModuleCatalog::builder()
            .module("stock_auto")
            .base_price(dec!(5000))
            .display_name("Automatic stock")
            .done()
            .module("loyalty")
            .base_price(dec!(6000))
            .done()
            .build();
        let fx = FxTable::builder()
            .rate("XOF", dec!(1))
            .rate("GHS", dec!(0.022))
            .build();
        let providers = ProviderDirectory::builder()
            .provider("paydunya")
            .fee_percentage(dec!(2))
            .flow(ProviderFlow::Redirect)
            .done()
            .provider("credits")
            .flow(ProviderFlow::Immediate)
            .done()
            .build();

        let config = BillingConfig::builder()
            .with_callback_url("https://api.example.com/billing/webhook")
            .with_return_url("https://app.example.com/billing/done")
            .with_cancel_url("https://app.example.com/billing/cancelled")
            .build()
            .unwrap();

        let checkout = CheckoutManager::new(
            store.clone(),
            membership,
            gateway.clone(),
            Pricing::new(catalog, fx),
            providers,
            config.clone(),
        );
        let webhook = WebhookHandler::new(store.clone(), gateway.clone(), config);
        let app = billing_routes(BillingState::new(checkout, webhook));

        Fixture {
            app,
            store,
            gateway,
        }
    }

    fn post_json(uri: &str, body: serde_json::Value, caller: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(user_id) = caller {
            builder = builder.extension(Caller::new(user_id));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    // ============ checkout route ============

    #[tokio::test]
    async fn test_checkout_redirect_flow() {
        let fixture = fixture();

        let request = post_json(
            "/billing/checkout",
            serde_json::json!({
                "store_id": "store_1",
                "provider": "paydunya",
                "modules": ["stock_auto", "loyalty"],
                "currency": "XOF",
                "country": "SN"
            }),
            Some("user_1"),
        );
        let response = fixture.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(
            json["payment_url"],
            "https://checkout.test/invoice/tok_mock_0"
        );

        let transactions = fixture.store.all_transactions();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].gross_amount, dec!(11000));
    }

    #[tokio::test]
    async fn test_checkout_immediate_flow() {
        let fixture = fixture();

        let request = post_json(
            "/billing/checkout",
            serde_json::json!({
                "store_id": "store_1",
                "provider": "credits",
                "modules": ["stock_auto", "loyalty"],
                "currency": "XOF"
            }),
            Some("user_1"),
        );
        let response = fixture.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert!(json["subscription_id"].is_string());
        assert_eq!(json["currency"], "XOF");
        assert!(json["renewal_date"].is_string());
    }

    #[tokio::test]
    async fn test_checkout_without_caller_rejected() {
        let fixture = fixture();

        let request = post_json(
            "/billing/checkout",
            serde_json::json!({
                "store_id": "store_1",
                "provider": "paydunya",
                "modules": ["stock_auto"],
                "currency": "XOF"
            }),
            None,
        );
        let response = fixture.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(fixture.store.all_transactions().is_empty());
    }

    #[tokio::test]
    async fn test_checkout_non_member_rejected() {
        let fixture = fixture();

        let request = post_json(
            "/billing/checkout",
            serde_json::json!({
                "store_id": "store_1",
                "provider": "paydunya",
                "modules": ["stock_auto"],
                "currency": "XOF"
            }),
            Some("intruder"),
        );
        let response = fixture.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let json = body_json(response).await;
        assert!(json["error"].is_string());
        assert!(json["error_id"].is_string());
        assert!(fixture.store.all_transactions().is_empty());
    }

    // ============ quote route ============

    #[tokio::test]
    async fn test_quote_preview() {
        let fixture = fixture();

        let request = post_json(
            "/billing/quote",
            serde_json::json!({
                "provider": "paydunya",
                "modules": ["stock_auto", "loyalty", "stock_auto"],
                "currency": "XOF"
            }),
            None,
        );
        let response = fixture.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["gross"], "11000");
        assert_eq!(json["fee"], "220");
        assert_eq!(json["net"], "10780");
        assert_eq!(json["modules"], serde_json::json!(["loyalty", "stock_auto"]));
        // No ledger row for a preview.
        assert!(fixture.store.all_transactions().is_empty());
    }

    #[tokio::test]
    async fn test_quote_unknown_provider_rejected() {
        let fixture = fixture();

        let request = post_json(
            "/billing/quote",
            serde_json::json!({
                "provider": "legacypay",
                "modules": ["stock_auto"],
                "currency": "XOF"
            }),
            None,
        );
        let response = fixture.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    // ============ webhook route ============

    #[tokio::test]
    async fn test_webhook_completes_checkout() {
        let fixture = fixture();

        // Start a redirect checkout to get a pending transaction.
        let request = post_json(
            "/billing/checkout",
            serde_json::json!({
                "store_id": "store_1",
                "provider": "paydunya",
                "modules": ["stock_auto", "loyalty"],
                "currency": "XOF"
            }),
            Some("user_1"),
        );
        let response = fixture.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let transaction = fixture.store.all_transactions().remove(0);
        let token = transaction.provider_reference.clone().unwrap();
        fixture.gateway.set_confirmed(&token, true);

        let callback = post_json(
            "/billing/webhook",
            serde_json::json!({
                "response_code": "00",
                "status": "completed",
                "invoice": {"token": token},
                "custom_data": {
                    "transaction_id": transaction.id,
                    "store_id": "store_1",
                    "modules": ["stock_auto", "loyalty"]
                }
            }),
            None,
        );
        let response = fixture.app.clone().oneshot(callback).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["received"], true);
        assert_eq!(json["status"], "processed");

        let subscription = fixture
            .store
            .get_subscription("store_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(subscription.modules, vec!["loyalty", "stock_auto"]);
    }

    #[tokio::test]
    async fn test_webhook_unknown_transaction_is_bad_request() {
        let fixture = fixture();

        let callback = post_json(
            "/billing/webhook",
            serde_json::json!({
                "invoice": {"token": "tok_1"},
                "custom_data": {
                    "transaction_id": "txn_unknown",
                    "store_id": "store_1",
                    "modules": []
                }
            }),
            None,
        );
        let response = fixture.app.clone().oneshot(callback).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn test_webhook_malformed_payload_is_bad_request() {
        let fixture = fixture();

        let callback = Request::builder()
            .method(Method::POST)
            .uri("/billing/webhook")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"neither\": \"shape\"}"))
            .unwrap();
        let response = fixture.app.clone().oneshot(callback).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
