use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::webhook::{EventType, PeriodType, WebhookEvent};

/// Days of grace after a failed renewal payment before access lapses.
pub const BILLING_GRACE_PERIOD_DAYS: i64 = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "subscription_tier", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    None,
    Trial,
    Monthly,
    Yearly,
    Lifetime,
}

impl Default for SubscriptionTier {
    fn default() -> Self {
        Self::None
    }
}

impl SubscriptionTier {
    /// Resolve a tier from a store product identifier. Product ids are free-form
    /// strings like "nutriscan_pro_yearly_v2"; substring matching is what the
    /// billing provider's dashboards key on too.
    pub fn from_product_id(product_id: &str) -> Self {
        let id = product_id.to_ascii_lowercase();
        if id.contains("yearly") || id.contains("annual") {
            Self::Yearly
        } else if id.contains("lifetime") {
            Self::Lifetime
        } else if id.contains("monthly") {
            Self::Monthly
        } else {
            Self::Monthly
        }
    }
}

/// Whether a premium entitlement window is open at `now`. Shared by the record
/// derivation and the quota-reset sweep so both paths agree on what "premium" means.
pub fn premium_window_active(
    tier: Option<SubscriptionTier>,
    trial_ends_at: Option<DateTime<Utc>>,
    subscription_ends_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    tier == Some(SubscriptionTier::Lifetime)
        || trial_ends_at.map_or(false, |t| now < t)
        || subscription_ends_at.map_or(false, |t| now < t)
}

/// Per-user subscription state, mutated only by webhook events and the
/// trial-expiration sweep.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionRecord {
    pub user_id: Uuid,
    pub tier: SubscriptionTier,
    pub is_active: bool,
    pub trial_started_at: Option<DateTime<Utc>>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub subscription_started_at: Option<DateTime<Utc>>,
    pub subscription_ends_at: Option<DateTime<Utc>>,
    pub is_cancelled: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub billing_issue: bool,
    pub billing_issue_detected_at: Option<DateTime<Utc>>,
    pub grace_period_ends_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub revenuecat_customer_id: Option<String>,
    pub last_payment_amount: Option<f64>,
    pub last_payment_currency: Option<String>,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What the webhook handler must do to the win-back offer after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinbackAction {
    None,
    Create,
    Clear,
}

impl SubscriptionRecord {
    /// Default record for a user with no billing history.
    pub fn new(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            tier: SubscriptionTier::None,
            is_active: false,
            trial_started_at: None,
            trial_ends_at: None,
            subscription_started_at: None,
            subscription_ends_at: None,
            is_cancelled: false,
            cancelled_at: None,
            cancellation_reason: None,
            billing_issue: false,
            billing_issue_detected_at: None,
            grace_period_ends_at: None,
            expired_at: None,
            revenuecat_customer_id: None,
            last_payment_amount: None,
            last_payment_currency: None,
            last_payment_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Derived entitlement. The stored `is_active` column is a denormalized hint;
    /// callers answering "is this user premium right now" must use this.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        premium_window_active(
            Some(self.tier),
            self.trial_ends_at,
            self.subscription_ends_at,
            now,
        )
    }

    pub fn is_in_trial(&self, now: DateTime<Utc>) -> bool {
        self.trial_ends_at.map_or(false, |t| now < t)
    }

    /// Apply one billing lifecycle event. Pure state transition; persistence and
    /// offer bookkeeping happen in the webhook handler.
    pub fn apply(&mut self, event: &WebhookEvent, now: DateTime<Utc>) -> WinbackAction {
        let action = match event.event_type {
            EventType::InitialPurchase => {
                if let Some(product_id) = event.product_id.as_deref() {
                    self.tier = SubscriptionTier::from_product_id(product_id);
                }
                if event.period_type == PeriodType::Trial {
                    self.trial_started_at = event.purchased_at();
                    self.trial_ends_at = event.expires_at();
                } else {
                    self.subscription_started_at = event.purchased_at();
                    self.subscription_ends_at = event.expires_at();
                }
                self.is_active = true;
                self.is_cancelled = false;
                self.record_payment(event);
                WinbackAction::None
            }
            EventType::Renewal => {
                self.subscription_ends_at = event.expires_at();
                self.is_active = true;
                self.is_cancelled = false;
                self.billing_issue = false;
                self.billing_issue_detected_at = None;
                self.grace_period_ends_at = None;
                if event.is_trial_conversion {
                    self.subscription_started_at = Some(now);
                }
                self.record_payment(event);
                WinbackAction::None
            }
            EventType::Cancellation => {
                // Auto-renew is off, but access persists until subscription_ends_at.
                self.is_cancelled = true;
                self.cancelled_at = Some(now);
                self.cancellation_reason = event.cancel_reason.clone();
                WinbackAction::Create
            }
            EventType::Uncancellation => {
                self.is_cancelled = false;
                self.cancelled_at = None;
                self.cancellation_reason = None;
                WinbackAction::Clear
            }
            EventType::NonRenewingPurchase => {
                self.tier = SubscriptionTier::Lifetime;
                self.is_active = true;
                self.is_cancelled = false;
                self.subscription_started_at = event.purchased_at().or(Some(now));
                self.subscription_ends_at = None;
                self.record_payment(event);
                WinbackAction::None
            }
            EventType::Expiration => {
                self.is_active = false;
                self.expired_at = Some(now);
                WinbackAction::None
            }
            EventType::BillingIssue => {
                self.billing_issue = true;
                self.billing_issue_detected_at = Some(now);
                self.grace_period_ends_at = Some(now + Duration::days(BILLING_GRACE_PERIOD_DAYS));
                WinbackAction::None
            }
            EventType::ProductChange => {
                if let Some(product_id) = event
                    .new_product_id
                    .as_deref()
                    .or(event.product_id.as_deref())
                {
                    self.tier = SubscriptionTier::from_product_id(product_id);
                }
                self.subscription_ends_at = event.expires_at();
                WinbackAction::None
            }
            // Forward-compatible: the handler logs and acknowledges these.
            EventType::Unknown => return WinbackAction::None,
        };

        self.updated_at = now;
        action
    }

    fn record_payment(&mut self, event: &WebhookEvent) {
        if let Some(price) = event.price {
            self.last_payment_amount = Some(price);
        }
        if let Some(currency) = &event.currency {
            self.last_payment_currency = Some(currency.clone());
        }
        if let Some(purchased_at) = event.purchased_at() {
            self.last_payment_date = Some(purchased_at);
        }
        self.revenuecat_customer_id = Some(event.app_user_id.clone());
    }

    /// Status view returned to the app.
    pub fn status(&self, now: DateTime<Utc>) -> SubscriptionStatus {
        let is_in_trial = self.is_in_trial(now);
        let expires_at = if is_in_trial {
            self.trial_ends_at
        } else {
            self.subscription_ends_at
        };
        let days_remaining = expires_at
            .filter(|t| *t > now)
            .map(|t| (t - now).num_days());

        SubscriptionStatus {
            is_active: self.is_active_at(now),
            tier: self.tier,
            expires_at,
            is_in_trial,
            trial_ends_at: self.trial_ends_at,
            days_remaining,
            is_cancelled: self.is_cancelled,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubscriptionStatus {
    pub is_active: bool,
    pub tier: SubscriptionTier,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_in_trial: bool,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub days_remaining: Option<i64>,
    pub is_cancelled: bool,
}
