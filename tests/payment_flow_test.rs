//! End-to-end payment flow tests.
//!
//! Drives the public API the way a host application would: initiate a
//! checkout, then reconcile the provider's callback into entitlements.

use rust_decimal_macros::dec;
use tollgate::gateway::test::MockGateway;
use tollgate::membership::test::InMemoryMembershipStore;
use tollgate::storage::test::InMemoryPaymentStore;
use tollgate::{
    BillingConfig, CheckoutManager, CheckoutResult, FxTable, InitiateRequest, ModuleCatalog,
    PaymentStore, Pricing, ProviderDirectory, ProviderFlow, StoreRole, SubscriptionStatus,
    TollgateError, TransactionStatus, WebhookHandler, WebhookOutcome,
};

fn pricing() -> Pricing {
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
    Pricing::new(catalog, fx)
}

fn providers() -> ProviderDirectory {
    ProviderDirectory::builder()
        .provider("paydunya")
        .fee_percentage(dec!(2))
        .flow(ProviderFlow::Redirect)
        .done()
        .provider("credits")
        .flow(ProviderFlow::Immediate)
        .done()
        .build()
}

fn config() -> BillingConfig {
    BillingConfig::builder()
        .with_callback_url("https://api.example.com/billing/webhook")
        .with_return_url("https://app.example.com/billing/done")
        .with_cancel_url("https://app.example.com/billing/cancelled")
        .build()
        .unwrap()
}

struct Billing {
    checkout: CheckoutManager<InMemoryPaymentStore, InMemoryMembershipStore, MockGateway>,
    webhook: WebhookHandler<InMemoryPaymentStore, MockGateway>,
    store: InMemoryPaymentStore,
    gateway: MockGateway,
}

fn billing() -> Billing {
    let store = InMemoryPaymentStore::new();
    let gateway = MockGateway::new();
    let membership = InMemoryMembershipStore::new();
    membership.add_member("store_1", "user_1", StoreRole::Owner);

    let checkout = CheckoutManager::new(
        store.clone(),
        membership,
        gateway.clone(),
        pricing(),
        providers(),
        config(),
    );
    let webhook = WebhookHandler::new(store.clone(), gateway.clone(), config());

    Billing {
        checkout,
        webhook,
        store,
        gateway,
    }
}

fn initiate_request(provider: &str, modules: &[&str], currency: &str) -> InitiateRequest {
    InitiateRequest {
        caller_id: "user_1".to_string(),
        store_id: "store_1".to_string(),
        provider: provider.to_string(),
        module_ids: modules.iter().map(|m| m.to_string()).collect(),
        currency: currency.to_string(),
        country: Some("SN".to_string()),
    }
}

fn ipn_body(transaction_id: &str, token: &str, modules: &[&str]) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "response_code": "00",
        "status": "completed",
        "invoice": {"token": token},
        "custom_data": {
            "transaction_id": transaction_id,
            "store_id": "store_1",
            "modules": modules
        }
    }))
    .unwrap()
}

/// Play the provider's side: confirm the stored checkout token and deliver
/// the matching callback.
async fn settle(billing: &Billing, transaction_id: &str, modules: &[&str]) -> WebhookOutcome {
    let token = billing
        .store
        .get_transaction(transaction_id)
        .await
        .unwrap()
        .unwrap()
        .provider_reference
        .unwrap();
    billing.gateway.set_confirmed(&token, true);
    billing
        .webhook
        .handle_callback(&ipn_body(transaction_id, &token, modules))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_redirect_checkout_then_webhook_activates() {
    let billing = billing();

    let result = billing
        .checkout
        .initiate(initiate_request(
            "paydunya",
            &["stock_auto", "loyalty"],
            "XOF",
        ))
        .await
        .unwrap();
    let CheckoutResult::Redirect {
        transaction_id,
        checkout_url,
    } = result
    else {
        panic!("expected a redirect flow");
    };
    assert!(checkout_url.starts_with("https://checkout.test/invoice/"));

    // The buyer is away on the hosted page; the ledger row waits.
    let transaction = billing
        .store
        .get_transaction(&transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transaction.status, TransactionStatus::Pending);
    assert_eq!(transaction.gross_amount, dec!(11000));
    assert_eq!(transaction.fee_amount, dec!(220));
    assert_eq!(transaction.net_amount, dec!(10780));
    assert!(billing
        .store
        .get_subscription("store_1")
        .await
        .unwrap()
        .is_none());

    let outcome = settle(&billing, &transaction_id, &["stock_auto", "loyalty"]).await;
    assert_eq!(outcome, WebhookOutcome::Processed);

    let transaction = billing
        .store
        .get_transaction(&transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transaction.status, TransactionStatus::Completed);

    let subscription = billing
        .store
        .get_subscription("store_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subscription.status, SubscriptionStatus::Active);
    assert_eq!(subscription.modules, vec!["loyalty", "stock_auto"]);
    assert_eq!(subscription.amount, dec!(11000));
    assert_eq!(
        transaction.subscription_id.as_deref(),
        Some(subscription.id.as_str())
    );
    assert_eq!(
        billing.store.granted_modules("store_1"),
        vec!["loyalty", "stock_auto"]
    );
    assert_eq!(billing.store.invoice_count("store_1"), 1);
}

#[tokio::test]
async fn test_immediate_provider_activates_inline() {
    let billing = billing();

    let result = billing
        .checkout
        .initiate(initiate_request(
            "credits",
            &["stock_auto", "loyalty"],
            "XOF",
        ))
        .await
        .unwrap();
    let CheckoutResult::Immediate {
        transaction_id,
        subscription,
    } = result
    else {
        panic!("expected an immediate flow");
    };

    assert_eq!(subscription.status, SubscriptionStatus::Active);
    assert_eq!(subscription.amount, dec!(11000));

    let transaction = billing
        .store
        .get_transaction(&transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transaction.status, TransactionStatus::Completed);
    // Zero-fee provider keeps the whole gross.
    assert_eq!(transaction.fee_amount, dec!(0));
    assert_eq!(transaction.net_amount, dec!(11000));

    // The hosted-page gateway was never involved.
    assert!(billing.gateway.created_intents().is_empty());
    assert_eq!(billing.store.invoice_count("store_1"), 1);
}

#[tokio::test]
async fn test_display_currency_survives_the_full_loop() {
    let billing = billing();

    let result = billing
        .checkout
        .initiate(initiate_request("paydunya", &["stock_auto"], "GHS"))
        .await
        .unwrap();
    let CheckoutResult::Redirect { transaction_id, .. } = result else {
        panic!("expected a redirect flow");
    };

    // The buyer sees GHS; the provider is charged the base amount.
    let transaction = billing
        .store
        .get_transaction(&transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transaction.currency, "GHS");
    assert_eq!(transaction.gross_amount, dec!(110));
    assert_eq!(billing.gateway.created_intents()[0].amount, dec!(5000));

    let outcome = settle(&billing, &transaction_id, &["stock_auto"]).await;
    assert_eq!(outcome, WebhookOutcome::Processed);

    // Activation reads the ledger row, so the subscription keeps the
    // display-currency amounts the buyer agreed to.
    let subscription = billing
        .store
        .get_subscription("store_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subscription.currency, "GHS");
    assert_eq!(subscription.amount, dec!(110));
}

#[tokio::test]
async fn test_renewal_replaces_module_set() {
    let billing = billing();

    // First period buys two modules.
    let result = billing
        .checkout
        .initiate(initiate_request(
            "paydunya",
            &["stock_auto", "loyalty"],
            "XOF",
        ))
        .await
        .unwrap();
    let CheckoutResult::Redirect { transaction_id, .. } = result else {
        panic!("expected a redirect flow");
    };
    settle(&billing, &transaction_id, &["stock_auto", "loyalty"]).await;
    let first = billing
        .store
        .get_subscription("store_1")
        .await
        .unwrap()
        .unwrap();

    // Next period pays for just one.
    let result = billing
        .checkout
        .initiate(initiate_request("paydunya", &["stock_auto"], "XOF"))
        .await
        .unwrap();
    let CheckoutResult::Redirect { transaction_id, .. } = result else {
        panic!("expected a redirect flow");
    };
    settle(&billing, &transaction_id, &["stock_auto"]).await;

    // Same subscription row, replaced content; loyalty is gone everywhere.
    let second = billing
        .store
        .get_subscription("store_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.modules, vec!["stock_auto"]);
    assert_eq!(billing.store.granted_modules("store_1"), vec!["stock_auto"]);
    // Each paid period leaves its own invoice.
    assert_eq!(billing.store.invoice_count("store_1"), 2);
}

#[tokio::test]
async fn test_foreign_caller_cannot_initiate() {
    let billing = billing();

    let mut request = initiate_request("paydunya", &["stock_auto"], "XOF");
    request.caller_id = "stranger".to_string();

    let err = billing.checkout.initiate(request).await.unwrap_err();
    assert!(matches!(err, TollgateError::Forbidden(_)));
    assert!(billing.store.all_transactions().is_empty());
}
