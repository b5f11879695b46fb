/// Subscription endpoints
///
/// Checkout, portal and lookup act for the bearer token's subject. The
/// webhook is unauthenticated; the `Stripe-Signature` header over the raw
/// body is its credential, so the handler takes `Bytes` rather than `Json`.

use crate::{app::AppState, error::ApiResult, extract::AppJson, response::ApiResponse};
use axum::{
    extract::State,
    http::HeaderMap,
    Extension,
};
use bytes::Bytes;
use postboard_shared::{
    auth::middleware::AuthContext,
    billing::{CheckoutOutcome, PortalOutcome, WebhookOutcome},
    models::subscription::Subscription,
};
use serde::{Deserialize, Serialize};
use tracing::info;

const SIGNATURE_HEADER: &str = "stripe-signature";

/// Request body for `POST /subscriptions/checkout`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub price_id: Option<String>,
}

/// Webhook acknowledgement
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

/// Start a Stripe checkout for a price
///
/// # Errors
///
/// - `400 Bad Request`: `priceId` missing or blank
/// - `503 Service Unavailable`: Stripe is not configured
pub async fn create_checkout_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    AppJson(req): AppJson<CheckoutRequest>,
) -> ApiResult<ApiResponse<CheckoutOutcome>> {
    let price_id = req.price_id.unwrap_or_default();
    let outcome = state
        .billing
        .create_checkout_session(auth.user_id, &price_id)
        .await?;
    Ok(ApiResponse::created(outcome))
}

/// Open the Stripe billing portal for the caller's customer
///
/// # Errors
///
/// - `404 Not Found`: The caller has no subscription yet
/// - `503 Service Unavailable`: Stripe is not configured
pub async fn create_portal_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<ApiResponse<PortalOutcome>> {
    let outcome = state.billing.create_portal_session(auth.user_id).await?;
    Ok(ApiResponse::created(outcome))
}

/// The caller's subscription, `null` when there is none
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<ApiResponse<Option<Subscription>>> {
    let subscription = state.billing.get_active_subscription(auth.user_id).await?;
    Ok(ApiResponse::ok(subscription))
}

/// Stripe webhook receiver
///
/// # Errors
///
/// - `400 Bad Request`: Missing or bad signature, malformed event
/// - `503 Service Unavailable`: No webhook secret configured
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<ApiResponse<WebhookAck>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    match state.billing.handle_webhook(&body, signature).await? {
        WebhookOutcome::Synced { user_id, status } => {
            info!(user_id = %user_id, status = %status, "Subscription synced from webhook");
        }
        WebhookOutcome::Ignored { event_type } => {
            info!(event_type = %event_type, "Webhook event acknowledged without action");
        }
    }

    Ok(ApiResponse::ok(WebhookAck { received: true }))
}
