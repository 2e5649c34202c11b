use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::subscription::{SubscriptionRecord, WinbackAction};
use crate::models::webhook::{EventType, WebhookPayload};
use crate::models::winback::WinBackOffer;
use crate::AppState;

/// Compare two secrets without leaking length or prefix information.
/// Hashing both sides first makes the byte-wise comparison length-independent.
fn constant_time_eq(provided: &str, expected: &str) -> bool {
    let a = Sha256::digest(provided.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Check the provider's `Authorization: Bearer <secret>` header.
/// With no secret configured, events are rejected unless the explicit
/// pre-production override is set.
fn authorize_webhook(headers: &HeaderMap, config: &crate::config::Config) -> Result<(), AppError> {
    if config.revenuecat_webhook_secret.is_empty() {
        if config.webhook_allow_unauthenticated {
            tracing::warn!(
                "Webhook secret not configured — accepting unauthenticated events \
                 (WEBHOOK_ALLOW_UNAUTHENTICATED=true)"
            );
            return Ok(());
        }
        tracing::error!("Webhook secret not configured and permissive mode is off, rejecting");
        return Err(AppError::Unauthorized);
    }

    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    if !constant_time_eq(token, &config.revenuecat_webhook_secret) {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

pub async fn revenuecat_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<serde_json::Value>> {
    authorize_webhook(&headers, &state.config)?;

    let payload: WebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("Invalid webhook payload: {}", e)))?;
    let event = payload.event;

    let user_id = Uuid::parse_str(&event.app_user_id).map_err(|_| {
        AppError::Validation(format!("app_user_id is not a UUID: {}", event.app_user_id))
    })?;

    tracing::info!(
        user_id = %user_id,
        event_type = ?event.event_type,
        event_id = event.id.as_deref().unwrap_or(""),
        api_version = payload.api_version.as_deref().unwrap_or(""),
        "Billing webhook received"
    );

    if event.event_type == EventType::Unknown {
        tracing::debug!(user_id = %user_id, "Unhandled billing event type, acknowledging");
        return Ok(Json(serde_json::json!({ "received": true, "ignored": true })));
    }

    let now = Utc::now();

    // Row lock serializes concurrent deliveries for the same user; any sqlx
    // error surfaces as 500 so the provider redelivers.
    let mut tx = state.db.begin().await?;

    let mut record = sqlx::query_as::<_, SubscriptionRecord>(
        "SELECT * FROM subscriptions WHERE user_id = $1 FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?
    .unwrap_or_else(|| SubscriptionRecord::new(user_id, now));

    let winback_action = record.apply(&event, now);

    sqlx::query(
        r#"
        INSERT INTO subscriptions (
            user_id, tier, is_active, trial_started_at, trial_ends_at,
            subscription_started_at, subscription_ends_at, is_cancelled,
            cancelled_at, cancellation_reason, billing_issue,
            billing_issue_detected_at, grace_period_ends_at, expired_at,
            revenuecat_customer_id, last_payment_amount, last_payment_currency,
            last_payment_date, created_at, updated_at
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
            $11, $12, $13, $14, $15, $16, $17, $18, $19, $20
        )
        ON CONFLICT (user_id) DO UPDATE SET
            tier = EXCLUDED.tier,
            is_active = EXCLUDED.is_active,
            trial_started_at = EXCLUDED.trial_started_at,
            trial_ends_at = EXCLUDED.trial_ends_at,
            subscription_started_at = EXCLUDED.subscription_started_at,
            subscription_ends_at = EXCLUDED.subscription_ends_at,
            is_cancelled = EXCLUDED.is_cancelled,
            cancelled_at = EXCLUDED.cancelled_at,
            cancellation_reason = EXCLUDED.cancellation_reason,
            billing_issue = EXCLUDED.billing_issue,
            billing_issue_detected_at = EXCLUDED.billing_issue_detected_at,
            grace_period_ends_at = EXCLUDED.grace_period_ends_at,
            expired_at = EXCLUDED.expired_at,
            revenuecat_customer_id = EXCLUDED.revenuecat_customer_id,
            last_payment_amount = EXCLUDED.last_payment_amount,
            last_payment_currency = EXCLUDED.last_payment_currency,
            last_payment_date = EXCLUDED.last_payment_date,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(record.user_id)
    .bind(record.tier)
    .bind(record.is_active)
    .bind(record.trial_started_at)
    .bind(record.trial_ends_at)
    .bind(record.subscription_started_at)
    .bind(record.subscription_ends_at)
    .bind(record.is_cancelled)
    .bind(record.cancelled_at)
    .bind(&record.cancellation_reason)
    .bind(record.billing_issue)
    .bind(record.billing_issue_detected_at)
    .bind(record.grace_period_ends_at)
    .bind(record.expired_at)
    .bind(&record.revenuecat_customer_id)
    .bind(record.last_payment_amount)
    .bind(&record.last_payment_currency)
    .bind(record.last_payment_date)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(&mut *tx)
    .await?;

    match winback_action {
        WinbackAction::Create => {
            // Cancellation always yields a fresh offer, replacing any prior one.
            let offer = WinBackOffer::new(user_id, now);
            sqlx::query(
                r#"
                INSERT INTO winback_offers
                    (user_id, discount_percent, duration_months, created_at, expires_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (user_id) DO UPDATE SET
                    discount_percent = EXCLUDED.discount_percent,
                    duration_months = EXCLUDED.duration_months,
                    created_at = EXCLUDED.created_at,
                    expires_at = EXCLUDED.expires_at
                "#,
            )
            .bind(offer.user_id)
            .bind(offer.discount_percent)
            .bind(offer.duration_months)
            .bind(offer.created_at)
            .bind(offer.expires_at)
            .execute(&mut *tx)
            .await?;
            tracing::info!(user_id = %user_id, expires_at = %offer.expires_at, "Win-back offer created");
        }
        WinbackAction::Clear => {
            sqlx::query("DELETE FROM winback_offers WHERE user_id = $1")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            tracing::info!(user_id = %user_id, "Win-back offer cleared");
        }
        WinbackAction::None => {}
    }

    tx.commit().await?;

    // Subscription state changed; drop the cached premium flag so the gate
    // re-resolves on the next check.
    state.premium_cache.invalidate(user_id).await;

    Ok(Json(serde_json::json!({ "received": true })))
}
