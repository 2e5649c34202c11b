use axum::{extract::State, Extension, Json};
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::error::AppResult;
use crate::models::subscription::{SubscriptionRecord, SubscriptionStatus};
use crate::models::winback::WinBackOffer;
use crate::AppState;

pub(crate) async fn load_record(
    db: &PgPool,
    user_id: Uuid,
) -> Result<Option<SubscriptionRecord>, sqlx::Error> {
    sqlx::query_as::<_, SubscriptionRecord>("SELECT * FROM subscriptions WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(db)
        .await
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<SubscriptionStatus>> {
    let now = Utc::now();
    // A user with no billing history reads as the free/none default.
    let record = load_record(&state.db, auth_user.id)
        .await?
        .unwrap_or_else(|| SubscriptionRecord::new(auth_user.id, now));

    Ok(Json(record.status(now)))
}

pub async fn check_premium(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Json<serde_json::Value> {
    let is_premium = crate::services::entitlement::check_premium_access(&state, auth_user.id).await;
    Json(serde_json::json!({ "is_premium": is_premium }))
}

pub async fn get_winback_offer(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<Option<WinBackOffer>>> {
    let now = Utc::now();
    let offer = sqlx::query_as::<_, WinBackOffer>(
        "SELECT * FROM winback_offers WHERE user_id = $1",
    )
    .bind(auth_user.id)
    .fetch_optional(&state.db)
    .await?
    // Expired offers are left in place and filtered here.
    .filter(|offer| !offer.is_expired(now));

    Ok(Json(offer))
}
