/// Subscription billing
///
/// Stripe is the source of truth for subscription state. Checkout and the
/// billing portal are hosted by Stripe; the webhook mirrors the resulting
/// subscription into our `subscriptions` table, which the quota gate reads.
///
/// # Webhook flow
///
/// 1. Verify `Stripe-Signature` against the raw body
/// 2. For `customer.subscription.{created,updated,deleted}`: resolve the
///    user from `metadata.userId`, the tier and post limit from the price's
///    product metadata
/// 3. Upsert the subscription row
///
/// Other event types are acknowledged and ignored.

pub mod quota;
pub mod stripe;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::subscription::{Subscription, SubscriptionTier, UpsertSubscription};
use crate::store::{CredentialStore, StoreError, SubscriptionStore};
use stripe::{CheckoutRequest, PaymentProvider, StripeError};

/// Error type for billing operations
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Stripe keys are not configured
    #[error("Billing is not configured")]
    NotConfigured,

    #[error("priceId is required")]
    MissingPriceId,

    #[error("User not found")]
    UserNotFound,

    #[error("No subscription found")]
    NoSubscription,

    #[error("Missing Stripe-Signature header")]
    MissingSignature,

    #[error("Webhook signature verification failed")]
    InvalidSignature(#[source] StripeError),

    /// Body is not a Stripe event, or a subscription event lacks data we need
    #[error("Invalid webhook event: {0}")]
    InvalidEvent(String),

    #[error(transparent)]
    Stripe(StripeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<StripeError> for BillingError {
    fn from(err: StripeError) -> Self {
        match err {
            StripeError::Signature(_) => BillingError::InvalidSignature(err),
            other => BillingError::Stripe(other),
        }
    }
}

/// Billing settings
#[derive(Clone)]
pub struct BillingConfig {
    /// `whsec_...` secret for webhook signatures
    pub webhook_secret: Option<String>,

    /// Frontend origin for checkout and portal redirects
    pub app_base_url: String,
}

impl std::fmt::Debug for BillingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingConfig")
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "[REDACTED]"))
            .field("app_base_url", &self.app_base_url)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutOutcome {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortalOutcome {
    pub url: String,
}

/// What the webhook did with an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Synced { user_id: Uuid, status: String },
    Ignored { event_type: String },
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StripeSubscription {
    id: String,
    customer: String,
    status: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    current_period_end: Option<i64>,
    items: SubscriptionItems,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItems {
    data: Vec<SubscriptionItem>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItem {
    price: PriceRef,
    /// Newer API versions report the period per item
    #[serde(default)]
    current_period_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PriceRef {
    id: String,
}

const SUBSCRIPTION_EVENTS: [&str; 3] = [
    "customer.subscription.created",
    "customer.subscription.updated",
    "customer.subscription.deleted",
];

/// Parses the product's `post_limit` metadata; `"unlimited"` is `None`
pub fn parse_post_limit(raw: &str) -> Result<Option<i32>, String> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("unlimited") {
        return Ok(None);
    }
    raw.parse::<i32>()
        .ok()
        .filter(|limit| *limit >= 0)
        .map(Some)
        .ok_or_else(|| format!("Invalid post_limit: {}", raw))
}

/// Checkout, portal and webhook handling
#[derive(Clone)]
pub struct BillingService {
    provider: Option<Arc<dyn PaymentProvider>>,
    users: Arc<dyn CredentialStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    config: BillingConfig,
}

impl BillingService {
    pub fn new(
        provider: Option<Arc<dyn PaymentProvider>>,
        users: Arc<dyn CredentialStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        config: BillingConfig,
    ) -> Self {
        Self {
            provider,
            users,
            subscriptions,
            config,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    fn provider(&self) -> Result<&Arc<dyn PaymentProvider>, BillingError> {
        self.provider.as_ref().ok_or(BillingError::NotConfigured)
    }

    fn settings_url(&self) -> String {
        format!("{}/settings", self.config.app_base_url.trim_end_matches('/'))
    }

    /// Starts a Stripe checkout for `price_id`, creating the customer on first use
    pub async fn create_checkout_session(
        &self,
        user_id: Uuid,
        price_id: &str,
    ) -> Result<CheckoutOutcome, BillingError> {
        let provider = self.provider()?;
        let price_id = price_id.trim();
        if price_id.is_empty() {
            return Err(BillingError::MissingPriceId);
        }

        let user = self
            .users
            .find_user_by_id(user_id)
            .await?
            .ok_or(BillingError::UserNotFound)?;

        let user_ref = user.id.to_string();
        let customer_id = match self.subscriptions.find_subscription(user.id).await? {
            Some(existing) => existing.stripe_customer_id,
            None => provider.create_customer(&user.email, &user_ref).await?.id,
        };

        let settings_url = self.settings_url();
        let success_url = format!("{}?session_id={{CHECKOUT_SESSION_ID}}", settings_url);

        let session = provider
            .create_checkout_session(CheckoutRequest {
                customer_id: &customer_id,
                price_id,
                user_id: &user_ref,
                success_url: &success_url,
                cancel_url: &settings_url,
            })
            .await?;

        info!(user_id = %user.id, session_id = %session.id, "Created checkout session");

        Ok(CheckoutOutcome {
            session_id: session.id,
            url: session.url,
        })
    }

    /// Opens the Stripe billing portal for an existing customer
    pub async fn create_portal_session(&self, user_id: Uuid) -> Result<PortalOutcome, BillingError> {
        let provider = self.provider()?;
        let subscription = self
            .subscriptions
            .find_subscription(user_id)
            .await?
            .ok_or(BillingError::NoSubscription)?;

        let portal = provider
            .create_portal_session(&subscription.stripe_customer_id, &self.settings_url())
            .await?;

        Ok(PortalOutcome { url: portal.url })
    }

    /// The user's subscription row, whatever its status
    pub async fn get_active_subscription(
        &self,
        user_id: Uuid,
    ) -> Result<Option<Subscription>, BillingError> {
        Ok(self.subscriptions.find_subscription(user_id).await?)
    }

    /// Verifies and applies a Stripe webhook delivery
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, BillingError> {
        let secret = self
            .config
            .webhook_secret
            .as_deref()
            .ok_or(BillingError::NotConfigured)?;
        let signature = signature.ok_or(BillingError::MissingSignature)?;
        stripe::verify_webhook_signature(payload, signature, secret)?;

        let event: WebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| BillingError::InvalidEvent(e.to_string()))?;

        if !SUBSCRIPTION_EVENTS.contains(&event.event_type.as_str()) {
            info!(event_id = %event.id, event_type = %event.event_type, "Ignoring webhook event");
            return Ok(WebhookOutcome::Ignored {
                event_type: event.event_type,
            });
        }

        let subscription: StripeSubscription = serde_json::from_value(event.data.object)
            .map_err(|e| BillingError::InvalidEvent(e.to_string()))?;

        match self.sync_subscription(subscription).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                warn!(event_id = %event.id, event_type = %event.event_type, error = %err, "Webhook handling failed");
                Err(err)
            }
        }
    }

    async fn sync_subscription(
        &self,
        subscription: StripeSubscription,
    ) -> Result<WebhookOutcome, BillingError> {
        let provider = self.provider()?;

        let user_id = subscription
            .metadata
            .get("userId")
            .ok_or_else(|| BillingError::InvalidEvent("Subscription metadata userId is missing".to_string()))?
            .parse::<Uuid>()
            .map_err(|_| BillingError::InvalidEvent("Invalid userId in subscription metadata".to_string()))?;

        if self.users.find_user_by_id(user_id).await?.is_none() {
            return Err(BillingError::InvalidEvent(format!("Unknown user {}", user_id)));
        }

        let item = subscription
            .items
            .data
            .first()
            .ok_or_else(|| BillingError::InvalidEvent("No price ID in subscription items".to_string()))?;

        let current_period_end = subscription
            .current_period_end
            .or(item.current_period_end)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .ok_or_else(|| {
                BillingError::InvalidEvent("Subscription current_period_end is missing".to_string())
            })?;

        let price = provider.retrieve_price(&item.price.id).await?;
        let product = provider.retrieve_product(&price.product).await?;

        let tier = product
            .metadata
            .get("tier")
            .ok_or_else(|| BillingError::InvalidEvent("Product metadata tier is missing".to_string()))?
            .parse::<SubscriptionTier>()
            .map_err(BillingError::InvalidEvent)?;

        let post_limit = product
            .metadata
            .get("post_limit")
            .ok_or_else(|| BillingError::InvalidEvent("Product metadata post_limit is missing".to_string()))
            .and_then(|raw| parse_post_limit(raw).map_err(BillingError::InvalidEvent))?;

        let interval = price
            .recurring
            .map(|recurring| recurring.interval)
            .unwrap_or_else(|| "month".to_string());

        let stored = self
            .subscriptions
            .upsert_subscription(UpsertSubscription {
                user_id,
                stripe_customer_id: subscription.customer,
                stripe_subscription_id: subscription.id,
                status: subscription.status,
                tier,
                post_limit,
                interval,
                current_period_end,
            })
            .await?;

        info!(
            user_id = %user_id,
            tier = stored.tier.as_str(),
            status = %stored.status,
            "Subscription synced"
        );

        Ok(WebhookOutcome::Synced {
            user_id,
            status: stored.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::stripe::{compute_signature, CheckoutSession, Customer, PortalSession, Price, Product, Recurring};
    use super::*;
    use crate::models::user::CreateUser;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const WEBHOOK_SECRET: &str = "whsec_unit";

    #[derive(Default)]
    struct FakeStripe {
        customers_created: AtomicUsize,
        last_checkout: Mutex<Option<(String, String, String)>>,
        post_limit: String,
    }

    #[async_trait]
    impl PaymentProvider for FakeStripe {
        async fn create_customer(&self, _email: &str, user_id: &str) -> Result<Customer, StripeError> {
            self.customers_created.fetch_add(1, Ordering::SeqCst);
            Ok(Customer {
                id: format!("cus_{}", user_id),
            })
        }

        async fn create_checkout_session(
            &self,
            request: CheckoutRequest<'_>,
        ) -> Result<CheckoutSession, StripeError> {
            *self.last_checkout.lock().unwrap() = Some((
                request.customer_id.to_string(),
                request.success_url.to_string(),
                request.cancel_url.to_string(),
            ));
            Ok(CheckoutSession {
                id: "cs_test_1".to_string(),
                url: Some("https://checkout.stripe.com/c/cs_test_1".to_string()),
            })
        }

        async fn create_portal_session(
            &self,
            customer_id: &str,
            _return_url: &str,
        ) -> Result<PortalSession, StripeError> {
            Ok(PortalSession {
                url: format!("https://billing.stripe.com/p/{}", customer_id),
            })
        }

        async fn retrieve_price(&self, price_id: &str) -> Result<Price, StripeError> {
            Ok(Price {
                id: price_id.to_string(),
                product: "prod_basic".to_string(),
                recurring: Some(Recurring {
                    interval: "year".to_string(),
                }),
            })
        }

        async fn retrieve_product(&self, product_id: &str) -> Result<Product, StripeError> {
            let mut metadata = HashMap::new();
            metadata.insert("tier".to_string(), "basic".to_string());
            metadata.insert("post_limit".to_string(), self.post_limit.clone());
            Ok(Product {
                id: product_id.to_string(),
                metadata,
            })
        }
    }

    async fn setup(post_limit: &str) -> (BillingService, Arc<FakeStripe>, Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let user = store
            .create_user(CreateUser {
                email: "payer@example.com".to_string(),
                name: "Payer".to_string(),
                password_hash: "hash".to_string(),
            })
            .await
            .unwrap();

        let fake = Arc::new(FakeStripe {
            post_limit: post_limit.to_string(),
            ..Default::default()
        });
        let service = BillingService::new(
            Some(fake.clone()),
            store.clone(),
            store.clone(),
            BillingConfig {
                webhook_secret: Some(WEBHOOK_SECRET.to_string()),
                app_base_url: "http://localhost:3000/".to_string(),
            },
        );
        (service, fake, store, user.id)
    }

    fn subscription_event(event_type: &str, user_id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_1",
            "type": event_type,
            "data": {
                "object": {
                    "id": "sub_1",
                    "object": "subscription",
                    "customer": "cus_1",
                    "status": "active",
                    "metadata": { "userId": user_id },
                    "items": {
                        "data": [
                            { "price": { "id": "price_basic" }, "current_period_end": 1_900_000_000 }
                        ]
                    }
                }
            }
        }))
        .unwrap()
    }

    fn sign(payload: &[u8]) -> String {
        let t = Utc::now().timestamp();
        format!("t={},v1={}", t, compute_signature(WEBHOOK_SECRET, t, payload))
    }

    #[test]
    fn test_parse_post_limit() {
        assert_eq!(parse_post_limit("unlimited"), Ok(None));
        assert_eq!(parse_post_limit("Unlimited"), Ok(None));
        assert_eq!(parse_post_limit("20"), Ok(Some(20)));
        assert!(parse_post_limit("-1").is_err());
        assert!(parse_post_limit("lots").is_err());
    }

    #[tokio::test]
    async fn test_checkout_creates_customer_once() {
        let (service, fake, _store, user_id) = setup("20").await;

        let outcome = service
            .create_checkout_session(user_id, "price_basic")
            .await
            .unwrap();
        assert_eq!(outcome.session_id, "cs_test_1");
        assert_eq!(fake.customers_created.load(Ordering::SeqCst), 1);

        let (customer, success, cancel) = fake.last_checkout.lock().unwrap().clone().unwrap();
        assert_eq!(customer, format!("cus_{}", user_id));
        assert_eq!(
            success,
            "http://localhost:3000/settings?session_id={CHECKOUT_SESSION_ID}"
        );
        assert_eq!(cancel, "http://localhost:3000/settings");
    }

    #[tokio::test]
    async fn test_checkout_validation() {
        let (service, _fake, _store, _user_id) = setup("20").await;

        assert!(matches!(
            service.create_checkout_session(Uuid::new_v4(), " ").await,
            Err(BillingError::MissingPriceId)
        ));
        assert!(matches!(
            service.create_checkout_session(Uuid::new_v4(), "price_1").await,
            Err(BillingError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn test_unconfigured_billing() {
        let store = Arc::new(MemoryStore::new());
        let service = BillingService::new(
            None,
            store.clone(),
            store,
            BillingConfig {
                webhook_secret: None,
                app_base_url: "http://localhost:3000".to_string(),
            },
        );

        assert!(!service.is_configured());
        assert!(matches!(
            service.create_portal_session(Uuid::new_v4()).await,
            Err(BillingError::NotConfigured)
        ));
        assert!(matches!(
            service.handle_webhook(b"{}", Some("t=1,v1=00")).await,
            Err(BillingError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_webhook_upserts_subscription() {
        let (service, _fake, store, user_id) = setup("20").await;
        let payload = subscription_event("customer.subscription.created", &user_id.to_string());

        let outcome = service
            .handle_webhook(&payload, Some(&sign(&payload)))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Synced {
                user_id,
                status: "active".to_string()
            }
        );

        let sub = store.find_subscription(user_id).await.unwrap().unwrap();
        assert_eq!(sub.tier, SubscriptionTier::Basic);
        assert_eq!(sub.post_limit, Some(20));
        assert_eq!(sub.interval, "year");
        assert_eq!(sub.stripe_customer_id, "cus_1");
        assert_eq!(sub.current_period_end.timestamp(), 1_900_000_000);

        // Portal now works for the stored customer
        let portal = service.create_portal_session(user_id).await.unwrap();
        assert_eq!(portal.url, "https://billing.stripe.com/p/cus_1");
    }

    #[tokio::test]
    async fn test_webhook_unlimited_tier() {
        let (service, _fake, store, user_id) = setup("unlimited").await;
        let payload = subscription_event("customer.subscription.updated", &user_id.to_string());

        service
            .handle_webhook(&payload, Some(&sign(&payload)))
            .await
            .unwrap();

        let sub = store.find_subscription(user_id).await.unwrap().unwrap();
        assert_eq!(sub.post_limit, None);
    }

    #[tokio::test]
    async fn test_webhook_rejects_bad_signature() {
        let (service, _fake, _store, user_id) = setup("20").await;
        let payload = subscription_event("customer.subscription.created", &user_id.to_string());

        assert!(matches!(
            service.handle_webhook(&payload, None).await,
            Err(BillingError::MissingSignature)
        ));
        assert!(matches!(
            service.handle_webhook(&payload, Some("t=1,v1=deadbeef")).await,
            Err(BillingError::InvalidSignature(_))
        ));
    }

    #[tokio::test]
    async fn test_webhook_ignores_other_events() {
        let (service, _fake, _store, _user_id) = setup("20").await;
        let payload = br#"{"id":"evt_2","type":"invoice.paid","data":{"object":{}}}"#;

        let outcome = service.handle_webhook(payload, Some(&sign(payload))).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Ignored {
                event_type: "invoice.paid".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_webhook_requires_user_metadata() {
        let (service, _fake, _store, _user_id) = setup("20").await;

        let payload = subscription_event("customer.subscription.created", "not-a-uuid");
        assert!(matches!(
            service.handle_webhook(&payload, Some(&sign(&payload))).await,
            Err(BillingError::InvalidEvent(_))
        ));

        let payload = subscription_event("customer.subscription.created", &Uuid::new_v4().to_string());
        assert!(matches!(
            service.handle_webhook(&payload, Some(&sign(&payload))).await,
            Err(BillingError::InvalidEvent(_))
        ));
    }
}
