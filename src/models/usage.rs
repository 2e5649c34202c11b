use chrono::{DateTime, Days, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Free-tier daily allowances. Premium users bypass quota entirely.
pub const BARCODE_SCAN_DAILY_LIMIT: i32 = 5;
pub const PHOTO_SCAN_DAILY_LIMIT: i32 = 3;
pub const AI_MESSAGE_DAILY_LIMIT: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageKind {
    Barcode,
    Photo,
    Ai,
}

impl UsageKind {
    pub fn daily_limit(self) -> i32 {
        match self {
            Self::Barcode => BARCODE_SCAN_DAILY_LIMIT,
            Self::Photo => PHOTO_SCAN_DAILY_LIMIT,
            Self::Ai => AI_MESSAGE_DAILY_LIMIT,
        }
    }

    /// Counter column in `usage_quotas`.
    pub fn column(self) -> &'static str {
        match self {
            Self::Barcode => "barcode_scans_today",
            Self::Photo => "photo_scans_today",
            Self::Ai => "ai_messages_today",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Barcode => "barcode scan",
            Self::Photo => "photo scan",
            Self::Ai => "AI message",
        }
    }

    pub fn limit_reason(self) -> String {
        format!(
            "Daily {} limit reached ({}/day)",
            self.label(),
            self.daily_limit()
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsageQuotaRecord {
    pub user_id: Uuid,
    pub barcode_scans_today: i32,
    pub photo_scans_today: i32,
    pub ai_messages_today: i32,
    pub last_reset_at: DateTime<Utc>,
}

impl UsageQuotaRecord {
    /// Zero-usage view for paths that must not touch the store.
    pub fn empty(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            barcode_scans_today: 0,
            photo_scans_today: 0,
            ai_messages_today: 0,
            last_reset_at: now,
        }
    }

    pub fn used(&self, kind: UsageKind) -> i32 {
        match kind {
            UsageKind::Barcode => self.barcode_scans_today,
            UsageKind::Photo => self.photo_scans_today,
            UsageKind::Ai => self.ai_messages_today,
        }
    }
}

/// The single authoritative window predicate: a quota row is stale once a UTC
/// midnight has passed since its last reset. Both the lazy read-path reset and
/// the daily sweep consult this.
pub fn quota_window_is_stale(last_reset_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    last_reset_at.date_naive() < now.date_naive()
}

/// Start of the current UTC day. Reset statements guard on
/// `last_reset_at < utc_day_start(now)` so a concurrent reset is a no-op.
pub fn utc_day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or(now)
}

/// Next UTC midnight; reported to clients as `resets_at` and used by the
/// daily sweep to schedule itself.
pub fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    (now.date_naive() + Days::new(1))
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or(now + Duration::days(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn window_staleness_is_utc_day_based() {
        // Same UTC day: fresh
        assert!(!quota_window_is_stale(
            at(2026, 8, 28, 0, 5),
            at(2026, 8, 28, 23, 59)
        ));
        // Crossed one midnight, even by a minute: stale
        assert!(quota_window_is_stale(
            at(2026, 8, 27, 23, 59),
            at(2026, 8, 28, 0, 1)
        ));
        // Missed sweeps accumulate; still just stale
        assert!(quota_window_is_stale(
            at(2026, 8, 20, 12, 0),
            at(2026, 8, 28, 12, 0)
        ));
    }

    #[test]
    fn reset_guard_skips_rows_already_reset_today() {
        // Both reset paths guard on last_reset_at < utc_day_start(now); a row
        // stamped after midnight must not qualify again the same day.
        let now = at(2026, 8, 28, 14, 0);
        let day_start = utc_day_start(now);

        let reset_this_morning = at(2026, 8, 28, 0, 0);
        assert!(!(reset_this_morning < day_start));

        let reset_yesterday = at(2026, 8, 27, 23, 59);
        assert!(reset_yesterday < day_start);

        // Guard agrees with the staleness predicate on both sides
        assert!(!quota_window_is_stale(reset_this_morning, now));
        assert!(quota_window_is_stale(reset_yesterday, now));
    }

    #[test]
    fn midnight_math() {
        let now = at(2026, 8, 28, 15, 30);
        assert_eq!(utc_day_start(now), at(2026, 8, 28, 0, 0));
        assert_eq!(next_utc_midnight(now), at(2026, 8, 29, 0, 0));
        // Month rollover
        assert_eq!(next_utc_midnight(at(2026, 8, 31, 23, 0)), at(2026, 9, 1, 0, 0));
    }

    #[test]
    fn limits_and_reasons() {
        assert_eq!(UsageKind::Barcode.daily_limit(), 5);
        assert_eq!(UsageKind::Photo.daily_limit(), 3);
        assert_eq!(UsageKind::Ai.daily_limit(), 3);
        assert!(UsageKind::Barcode.limit_reason().contains("5/day"));
        assert!(UsageKind::Ai.limit_reason().contains("AI message"));
    }

    #[test]
    fn counter_access_by_kind() {
        let rec = UsageQuotaRecord {
            user_id: Uuid::new_v4(),
            barcode_scans_today: 4,
            photo_scans_today: 1,
            ai_messages_today: 0,
            last_reset_at: Utc::now(),
        };
        assert_eq!(rec.used(UsageKind::Barcode), 4);
        assert_eq!(rec.used(UsageKind::Photo), 1);
        assert_eq!(rec.used(UsageKind::Ai), 0);
    }
}
