/// Post-creation quota
///
/// A user may create posts only while their subscription is `active`. Tiers
/// with a `post_limit` cap the number of posts created since the
/// subscription row was first written; a `None` limit is unlimited.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use postboard_shared::billing::quota::{QuotaEnforcer, QuotaError};
/// use postboard_shared::store::MemoryStore;
/// use uuid::Uuid;
///
/// # async fn example() {
/// let store = Arc::new(MemoryStore::new());
/// let enforcer = QuotaEnforcer::new(store.clone(), store);
///
/// let err = enforcer.enforce_post_quota(Uuid::new_v4()).await.unwrap_err();
/// assert!(matches!(err, QuotaError::NoActiveSubscription));
/// # }
/// ```

use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::models::subscription::SubscriptionTier;
use crate::store::{PostStore, StoreError, SubscriptionStore};

/// Quota enforcement error
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    /// Missing subscription, or Stripe status other than `active`
    #[error("No active subscription")]
    NoActiveSubscription,

    #[error("Post limit of {limit} reached for {} tier", tier.as_str())]
    LimitExceeded {
        limit: i32,
        tier: SubscriptionTier,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a quota check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaCheckResult {
    /// Whether another post may be created
    pub allowed: bool,

    /// Tier of the active subscription, if any
    pub tier: Option<SubscriptionTier>,

    /// Posts counted against the limit
    pub current: i64,

    /// `None` with an active subscription means unlimited
    pub limit: Option<i32>,
}

impl QuotaCheckResult {
    fn inactive() -> Self {
        Self {
            allowed: false,
            tier: None,
            current: 0,
            limit: None,
        }
    }

    fn unlimited(tier: SubscriptionTier) -> Self {
        Self {
            allowed: true,
            tier: Some(tier),
            current: 0,
            limit: None,
        }
    }

    fn limited(tier: SubscriptionTier, current: i64, limit: i32) -> Self {
        Self {
            allowed: current < i64::from(limit),
            tier: Some(tier),
            current,
            limit: Some(limit),
        }
    }

    /// Posts left before the limit; `None` when unlimited or inactive
    pub fn remaining(&self) -> Option<i64> {
        self.limit
            .map(|limit| (i64::from(limit) - self.current).max(0))
    }

    fn into_error(self) -> Option<QuotaError> {
        if self.allowed {
            return None;
        }
        match (self.tier, self.limit) {
            (Some(tier), Some(limit)) => Some(QuotaError::LimitExceeded { limit, tier }),
            _ => Some(QuotaError::NoActiveSubscription),
        }
    }
}

/// Checks subscription state against post counts
#[derive(Clone)]
pub struct QuotaEnforcer {
    subscriptions: Arc<dyn SubscriptionStore>,
    posts: Arc<dyn PostStore>,
}

impl QuotaEnforcer {
    pub fn new(subscriptions: Arc<dyn SubscriptionStore>, posts: Arc<dyn PostStore>) -> Self {
        Self {
            subscriptions,
            posts,
        }
    }

    /// Reports whether `user_id` may create another post
    pub async fn check_post_quota(&self, user_id: Uuid) -> Result<QuotaCheckResult, QuotaError> {
        let subscription = match self.subscriptions.find_subscription(user_id).await? {
            Some(sub) if sub.is_active() => sub,
            _ => return Ok(QuotaCheckResult::inactive()),
        };

        let Some(limit) = subscription.post_limit else {
            return Ok(QuotaCheckResult::unlimited(subscription.tier));
        };

        let current = self
            .posts
            .count_posts_since(user_id, subscription.created_at)
            .await?;

        debug!(
            user_id = %user_id,
            tier = subscription.tier.as_str(),
            current,
            limit,
            "Post quota check"
        );

        Ok(QuotaCheckResult::limited(subscription.tier, current, limit))
    }

    /// Like [`check_post_quota`](Self::check_post_quota), but a denial is an error
    pub async fn enforce_post_quota(&self, user_id: Uuid) -> Result<(), QuotaError> {
        match self.check_post_quota(user_id).await?.into_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
