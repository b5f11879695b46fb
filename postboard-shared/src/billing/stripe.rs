/// Minimal Stripe REST client and webhook signature verification
///
/// Requests are form-encoded with the secret key as bearer credential, the
/// way Stripe's HTTP API expects. Only the calls the billing flow needs are
/// implemented; responses are deserialized into the few fields we read.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Maximum age of a signed webhook, in seconds
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

/// Error type for Stripe calls and webhook verification
#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    #[error("Stripe request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Stripe returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid webhook signature: {0}")]
    Signature(&'static str),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalSession {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Recurring {
    pub interval: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    pub id: String,
    /// Product id; expanded products are not requested
    pub product: String,
    #[serde(default)]
    pub recurring: Option<Recurring>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Product {
    pub id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Parameters for a subscription checkout
#[derive(Debug, Clone)]
pub struct CheckoutRequest<'a> {
    pub customer_id: &'a str,
    pub price_id: &'a str,
    pub user_id: &'a str,
    pub success_url: &'a str,
    pub cancel_url: &'a str,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Stripe client
#[derive(Clone)]
pub struct StripeClient {
    secret_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("secret_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl StripeClient {
    pub fn new(secret_key: impl Into<String>) -> Result<Self, StripeError> {
        Self::with_base_url(secret_key, STRIPE_API_BASE)
    }

    /// Points the client at another API base, e.g. stripe-mock
    pub fn with_base_url(
        secret_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, StripeError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            secret_key: secret_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<T, StripeError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, StripeError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, StripeError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|envelope| envelope.error.message)
            .unwrap_or(body);

        Err(StripeError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// The Stripe calls the billing flow makes
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_customer(&self, email: &str, user_id: &str) -> Result<Customer, StripeError>;

    async fn create_checkout_session(
        &self,
        request: CheckoutRequest<'_>,
    ) -> Result<CheckoutSession, StripeError>;

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, StripeError>;

    async fn retrieve_price(&self, price_id: &str) -> Result<Price, StripeError>;

    async fn retrieve_product(&self, product_id: &str) -> Result<Product, StripeError>;
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_customer(&self, email: &str, user_id: &str) -> Result<Customer, StripeError> {
        let customer: Customer = self
            .post_form(
                "/customers",
                &[("email", email), ("metadata[userId]", user_id)],
            )
            .await?;
        debug!(customer_id = %customer.id, "Created Stripe customer");
        Ok(customer)
    }

    /// `userId` metadata lands on the subscription so webhooks can find the user
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest<'_>,
    ) -> Result<CheckoutSession, StripeError> {
        self.post_form(
            "/checkout/sessions",
            &[
                ("customer", request.customer_id),
                ("mode", "subscription"),
                ("payment_method_types[0]", "card"),
                ("line_items[0][price]", request.price_id),
                ("line_items[0][quantity]", "1"),
                ("success_url", request.success_url),
                ("cancel_url", request.cancel_url),
                ("metadata[userId]", request.user_id),
                ("subscription_data[metadata][userId]", request.user_id),
            ],
        )
        .await
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, StripeError> {
        self.post_form(
            "/billing_portal/sessions",
            &[("customer", customer_id), ("return_url", return_url)],
        )
        .await
    }

    async fn retrieve_price(&self, price_id: &str) -> Result<Price, StripeError> {
        self.get(&format!("/prices/{}", price_id)).await
    }

    async fn retrieve_product(&self, product_id: &str) -> Result<Product, StripeError> {
        self.get(&format!("/products/{}", product_id)).await
    }
}

/// Computes the hex `v1` signature Stripe sends for `payload` at `timestamp`
pub fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    hex::encode(signature_mac(secret, timestamp, payload).finalize().into_bytes())
}

fn signature_mac(secret: &str, timestamp: i64, payload: &[u8]) -> Hmac<Sha256> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac
}

/// Verifies a `Stripe-Signature` header (`t=...,v1=...[,v1=...]`)
///
/// Any matching `v1` entry is accepted; the comparison is constant-time.
pub fn verify_webhook_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
) -> Result<(), StripeError> {
    verify_webhook_signature_at(payload, header, secret, Utc::now().timestamp())
}

/// [`verify_webhook_signature`] against an explicit clock
pub fn verify_webhook_signature_at(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), StripeError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(StripeError::Signature("missing timestamp"))?;
    if signatures.is_empty() {
        return Err(StripeError::Signature("no v1 signature"));
    }
    let skew = now.checked_sub(timestamp).map(i64::unsigned_abs);
    if !matches!(skew, Some(secs) if secs <= WEBHOOK_TOLERANCE_SECS.unsigned_abs()) {
        return Err(StripeError::Signature("timestamp outside tolerance"));
    }

    let matched = signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| signature_mac(secret, timestamp, payload).verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });

    if matched {
        Ok(())
    } else {
        Err(StripeError::Signature("no matching signature"))
    }
}
