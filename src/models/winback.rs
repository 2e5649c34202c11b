use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const WINBACK_DISCOUNT_PERCENT: i32 = 50;
pub const WINBACK_DURATION_MONTHS: i32 = 3;
pub const WINBACK_OFFER_VALID_DAYS: i64 = 30;

/// Time-boxed discount issued on cancellation; cleared on reactivation.
/// Expired offers are filtered at read time rather than actively deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WinBackOffer {
    pub user_id: Uuid,
    pub discount_percent: i32,
    pub duration_months: i32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl WinBackOffer {
    pub fn new(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            discount_percent: WINBACK_DISCOUNT_PERCENT,
            duration_months: WINBACK_DURATION_MONTHS,
            created_at: now,
            expires_at: now + Duration::days(WINBACK_OFFER_VALID_DAYS),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_offer_terms() {
        let now = Utc::now();
        let offer = WinBackOffer::new(Uuid::new_v4(), now);
        assert_eq!(offer.discount_percent, 50);
        assert_eq!(offer.duration_months, 3);
        assert_eq!(offer.expires_at, now + Duration::days(30));
        assert!(!offer.is_expired(now));
    }

    #[test]
    fn offer_expires_after_thirty_days() {
        let now = Utc::now();
        let offer = WinBackOffer::new(Uuid::new_v4(), now);
        assert!(!offer.is_expired(offer.expires_at));
        assert!(offer.is_expired(offer.expires_at + Duration::seconds(1)));
    }
}
