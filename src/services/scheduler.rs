use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::models::subscription::{premium_window_active, SubscriptionTier};
use crate::models::usage::{next_utc_midnight, utc_day_start};

/// Users processed per statement during the daily sweep. Each batch commits
/// independently so a crash mid-run only loses the unprocessed remainder.
const RESET_BATCH_SIZE: i64 = 100;

/// Quota row joined with the subscription fields needed to derive premium status.
#[derive(Debug, FromRow)]
struct QuotaSweepRow {
    user_id: Uuid,
    tier: Option<SubscriptionTier>,
    trial_ends_at: Option<DateTime<Utc>>,
    subscription_ends_at: Option<DateTime<Utc>>,
}

impl QuotaSweepRow {
    fn is_premium_at(&self, now: DateTime<Utc>) -> bool {
        premium_window_active(self.tier, self.trial_ends_at, self.subscription_ends_at, now)
    }
}

pub fn duration_until_next_utc_midnight(now: DateTime<Utc>) -> std::time::Duration {
    (next_utc_midnight(now) - now)
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(60))
}

/// Daily quota reset: sleeps until each UTC midnight, then zeroes every
/// free-tier user's counters. The lazy reset on the read path covers any run
/// this task misses; re-running in the same day is a no-op for correctness.
pub fn spawn_daily_quota_reset(db: PgPool) {
    tokio::spawn(async move {
        loop {
            let delay = duration_until_next_utc_midnight(Utc::now());
            tracing::info!(in_secs = delay.as_secs(), "Next daily quota reset scheduled");
            tokio::time::sleep(delay).await;

            match run_daily_quota_reset(&db).await {
                Ok(count) => {
                    tracing::info!(reset = count, "Daily quota reset complete");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Daily quota reset failed");
                }
            }
        }
    });
}

pub async fn run_daily_quota_reset(db: &PgPool) -> Result<u64, sqlx::Error> {
    let now = Utc::now();
    let mut total = 0u64;
    let mut last_user: Option<Uuid> = None;

    loop {
        // Keyset pagination keeps each pass bounded regardless of user count.
        let batch = sqlx::query_as::<_, QuotaSweepRow>(
            r#"
            SELECT q.user_id, s.tier, s.trial_ends_at, s.subscription_ends_at
            FROM usage_quotas q
            LEFT JOIN subscriptions s ON s.user_id = q.user_id
            WHERE $1::uuid IS NULL OR q.user_id > $1
            ORDER BY q.user_id
            LIMIT $2
            "#,
        )
        .bind(last_user)
        .bind(RESET_BATCH_SIZE)
        .fetch_all(db)
        .await?;

        if batch.is_empty() {
            break;
        }
        last_user = batch.last().map(|row| row.user_id);

        let free_users: Vec<Uuid> = batch
            .iter()
            .filter(|row| !row.is_premium_at(now))
            .map(|row| row.user_id)
            .collect();

        if !free_users.is_empty() {
            // Same day-boundary guard as the lazy read-path reset: rows already
            // reset today are skipped, so a same-day re-run never re-zeros
            // counts accumulated since midnight.
            let result = sqlx::query(
                r#"
                UPDATE usage_quotas SET
                    barcode_scans_today = 0,
                    photo_scans_today = 0,
                    ai_messages_today = 0,
                    last_reset_at = $2,
                    updated_at = NOW()
                WHERE user_id = ANY($1) AND last_reset_at < $3
                "#,
            )
            .bind(&free_users)
            .bind(now)
            .bind(utc_day_start(now))
            .execute(db)
            .await?;
            total += result.rows_affected();
        }

        if (batch.len() as i64) < RESET_BATCH_SIZE {
            break;
        }
    }

    Ok(total)
}

/// Trial expiration check: every few hours, transition lapsed trials toward
/// inactive, mirroring Expiration handling.
pub fn spawn_trial_expiration_check(db: PgPool) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(4 * 3600));
        loop {
            interval.tick().await;
            match expire_lapsed_trials(&db).await {
                Ok(count) => {
                    if count > 0 {
                        tracing::info!(expired = count, "Lapsed trials deactivated");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Trial expiration check failed");
                }
            }
        }
    });
}

async fn expire_lapsed_trials(db: &PgPool) -> Result<u64, sqlx::Error> {
    // A trial that converted to a paid period has a live subscription window
    // and must not be touched.
    let result = sqlx::query(
        r#"
        UPDATE subscriptions SET
            is_active = FALSE,
            expired_at = NOW(),
            updated_at = NOW()
        WHERE tier = 'trial'
          AND is_active
          AND trial_ends_at < NOW()
          AND (subscription_ends_at IS NULL OR subscription_ends_at < NOW())
        "#,
    )
    .execute(db)
    .await?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn midnight_delay_is_positive_and_bounded() {
        let now = Utc.with_ymd_and_hms(2026, 8, 28, 23, 59, 30).unwrap();
        let delay = duration_until_next_utc_midnight(now);
        assert_eq!(delay.as_secs(), 30);

        let early = Utc.with_ymd_and_hms(2026, 8, 28, 0, 0, 1).unwrap();
        let delay = duration_until_next_utc_midnight(early);
        assert!(delay.as_secs() <= 24 * 3600);
        assert!(delay.as_secs() >= 23 * 3600);
    }

    #[test]
    fn sweep_row_premium_derivation() {
        let now = Utc::now();
        let free = QuotaSweepRow {
            user_id: Uuid::new_v4(),
            tier: None,
            trial_ends_at: None,
            subscription_ends_at: None,
        };
        assert!(!free.is_premium_at(now));

        let trialing = QuotaSweepRow {
            user_id: Uuid::new_v4(),
            tier: Some(SubscriptionTier::Trial),
            trial_ends_at: Some(now + Duration::days(7)),
            subscription_ends_at: None,
        };
        assert!(trialing.is_premium_at(now));

        let lapsed = QuotaSweepRow {
            user_id: Uuid::new_v4(),
            tier: Some(SubscriptionTier::Monthly),
            trial_ends_at: None,
            subscription_ends_at: Some(now - Duration::days(1)),
        };
        assert!(!lapsed.is_premium_at(now));

        let lifetime = QuotaSweepRow {
            user_id: Uuid::new_v4(),
            tier: Some(SubscriptionTier::Lifetime),
            trial_ends_at: None,
            subscription_ends_at: None,
        };
        assert!(lifetime.is_premium_at(now));
    }
}
