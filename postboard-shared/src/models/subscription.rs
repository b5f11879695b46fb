/// Subscription model and database operations
///
/// One row per user, written by the Stripe webhook handler and read by the
/// post-creation quota gate.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE subscription_tier AS ENUM ('LITE', 'BASIC', 'PRO');
///
/// CREATE TABLE subscriptions (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     user_id UUID NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
///     stripe_customer_id VARCHAR(255) NOT NULL,
///     stripe_subscription_id VARCHAR(255) NOT NULL UNIQUE,
///     status VARCHAR(50) NOT NULL,
///     tier subscription_tier NOT NULL,
///     post_limit INTEGER,
///     interval VARCHAR(20) NOT NULL DEFAULT 'month',
///     current_period_end TIMESTAMPTZ NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

/// Billing tier, read from the Stripe product's `tier` metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_tier", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionTier {
    Lite,
    Basic,
    Pro,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Lite => "LITE",
            SubscriptionTier::Basic => "BASIC",
            SubscriptionTier::Pro => "PRO",
        }
    }
}

impl FromStr for SubscriptionTier {
    type Err = String;

    /// Case-insensitive: Stripe metadata is usually lowercase
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LITE" => Ok(SubscriptionTier::Lite),
            "BASIC" => Ok(SubscriptionTier::Basic),
            "PRO" => Ok(SubscriptionTier::Pro),
            other => Err(format!("Unknown subscription tier: {}", other)),
        }
    }
}

/// Stored subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing)]
    pub stripe_customer_id: String,
    #[serde(skip_serializing)]
    pub stripe_subscription_id: String,

    /// Stripe status string (`active`, `past_due`, `canceled`, ...)
    pub status: String,

    pub tier: SubscriptionTier,

    /// Maximum posts per subscription period; `None` means unlimited
    pub post_limit: Option<i32>,

    /// Billing interval (`month`, `year`)
    pub interval: String,

    pub current_period_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub const ACTIVE: &'static str = "active";

    pub fn is_active(&self) -> bool {
        self.status == Self::ACTIVE
    }
}

/// Input for the webhook upsert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertSubscription {
    pub user_id: Uuid,
    pub stripe_customer_id: String,
    pub stripe_subscription_id: String,
    pub status: String,
    pub tier: SubscriptionTier,
    pub post_limit: Option<i32>,
    pub interval: String,
    pub current_period_end: DateTime<Utc>,
}

impl Subscription {
    /// Inserts or updates the user's subscription
    ///
    /// On conflict the customer id and creation time are kept.
    pub async fn upsert(pool: &PgPool, data: UpsertSubscription) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (
                user_id, stripe_customer_id, stripe_subscription_id, status,
                tier, post_limit, interval, current_period_end
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id) DO UPDATE SET
                stripe_subscription_id = EXCLUDED.stripe_subscription_id,
                status = EXCLUDED.status,
                tier = EXCLUDED.tier,
                post_limit = EXCLUDED.post_limit,
                interval = EXCLUDED.interval,
                current_period_end = EXCLUDED.current_period_end,
                updated_at = NOW()
            RETURNING id, user_id, stripe_customer_id, stripe_subscription_id, status,
                      tier, post_limit, interval, current_period_end, created_at, updated_at
            "#,
        )
        .bind(data.user_id)
        .bind(data.stripe_customer_id)
        .bind(data.stripe_subscription_id)
        .bind(data.status)
        .bind(data.tier)
        .bind(data.post_limit)
        .bind(data.interval)
        .bind(data.current_period_end)
        .fetch_one(pool)
        .await
    }

    /// Finds the subscription for a user
    pub async fn find_by_user(pool: &PgPool, user_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, user_id, stripe_customer_id, stripe_subscription_id, status,
                   tier, post_limit, interval, current_period_end, created_at, updated_at
            FROM subscriptions
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }
}
