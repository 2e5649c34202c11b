use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::error::AppResult;
use crate::models::usage::{
    next_utc_midnight, quota_window_is_stale, utc_day_start, UsageKind, UsageQuotaRecord,
};
use crate::services::entitlement;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct CounterView {
    pub used: i32,
    pub limit: i32,
}

#[derive(Debug, Serialize)]
pub struct QuotaResponse {
    pub barcode_scans: CounterView,
    pub photo_scans: CounterView,
    pub ai_messages: CounterView,
    pub resets_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct IncrementResponse {
    pub allowed: bool,
}

/// Load the quota row, creating it at zero if absent and applying the lazy
/// day-boundary reset. Callers never see counts from a prior UTC day, even
/// when the scheduled sweep was delayed or missed.
pub(crate) async fn fetch_quota(
    db: &PgPool,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<UsageQuotaRecord, sqlx::Error> {
    sqlx::query("INSERT INTO usage_quotas (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
        .bind(user_id)
        .execute(db)
        .await?;

    let record = sqlx::query_as::<_, UsageQuotaRecord>(
        "SELECT * FROM usage_quotas WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_one(db)
    .await?;

    if !quota_window_is_stale(record.last_reset_at, now) {
        return Ok(record);
    }

    // Guarded on the day boundary so a concurrent lazy reset or the daily
    // sweep doing the same work is a no-op.
    sqlx::query(
        r#"
        UPDATE usage_quotas SET
            barcode_scans_today = 0,
            photo_scans_today = 0,
            ai_messages_today = 0,
            last_reset_at = $2,
            updated_at = NOW()
        WHERE user_id = $1 AND last_reset_at < $3
        "#,
    )
    .bind(user_id)
    .bind(now)
    .bind(utc_day_start(now))
    .execute(db)
    .await?;

    tracing::debug!(user_id = %user_id, "Lazy quota reset applied");

    sqlx::query_as::<_, UsageQuotaRecord>("SELECT * FROM usage_quotas WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(db)
        .await
}

pub async fn get_usage(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<QuotaResponse>> {
    let now = Utc::now();
    let record = fetch_quota(&state.db, auth_user.id, now).await?;

    Ok(Json(QuotaResponse {
        barcode_scans: CounterView {
            used: record.barcode_scans_today,
            limit: UsageKind::Barcode.daily_limit(),
        },
        photo_scans: CounterView {
            used: record.photo_scans_today,
            limit: UsageKind::Photo.daily_limit(),
        },
        ai_messages: CounterView {
            used: record.ai_messages_today,
            limit: UsageKind::Ai.daily_limit(),
        },
        resets_at: next_utc_midnight(now),
    }))
}

pub async fn increment_usage(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(kind): Path<UsageKind>,
) -> AppResult<Json<IncrementResponse>> {
    // Premium users are never counted.
    if entitlement::check_premium_access(&state, auth_user.id).await {
        return Ok(Json(IncrementResponse { allowed: true }));
    }

    let now = Utc::now();
    fetch_quota(&state.db, auth_user.id, now).await?;

    // Atomic check-then-increment: the WHERE guard means concurrent calls
    // cannot push the counter past its limit. Column name comes from the
    // UsageKind enum, never from input.
    let query = format!(
        "UPDATE usage_quotas SET {col} = {col} + 1, updated_at = NOW() \
         WHERE user_id = $1 AND {col} < $2 RETURNING {col}",
        col = kind.column()
    );
    let updated = sqlx::query_scalar::<_, i32>(&query)
        .bind(auth_user.id)
        .bind(kind.daily_limit())
        .fetch_optional(&state.db)
        .await?;

    let allowed = updated.is_some();
    if !allowed {
        tracing::info!(user_id = %auth_user.id, kind = ?kind, "Daily quota exhausted");
    }

    Ok(Json(IncrementResponse { allowed }))
}
