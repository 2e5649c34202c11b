use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::middleware::AuthUser;
use crate::error::AppResult;
use crate::handlers::usage::fetch_quota;
use crate::models::usage::{UsageKind, UsageQuotaRecord};
use crate::services::entitlement;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    BarcodeScan,
    PhotoScan,
    AiCoach,
    MealPlan,
}

impl Feature {
    /// Which quota counter gates this feature; `None` means premium-exclusive.
    pub fn usage_kind(self) -> Option<UsageKind> {
        match self {
            Self::BarcodeScan => Some(UsageKind::Barcode),
            Self::PhotoScan => Some(UsageKind::Photo),
            Self::AiCoach => Some(UsageKind::Ai),
            Self::MealPlan => None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GateDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl GateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// The gate itself: subscription state and quota state composed into one
/// allow/deny answer. Read-only — consuming quota is the caller's separate
/// increment after the action succeeds.
pub(crate) fn gate_decision(
    is_premium: bool,
    feature: Feature,
    quota: &UsageQuotaRecord,
) -> GateDecision {
    if is_premium {
        return GateDecision::allow();
    }

    match feature.usage_kind() {
        None => GateDecision::deny(
            "Meal plans are available to premium subscribers only".into(),
        ),
        Some(kind) => {
            if quota.used(kind) < kind.daily_limit() {
                GateDecision::allow()
            } else {
                GateDecision::deny(kind.limit_reason())
            }
        }
    }
}

pub async fn can_use_feature(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(feature): Path<Feature>,
) -> AppResult<Json<GateDecision>> {
    if entitlement::check_premium_access(&state, auth_user.id).await {
        return Ok(Json(GateDecision::allow()));
    }

    // Premium-exclusive features need no quota read; skip the store entirely
    // so a read-only denial never creates a quota row.
    if feature.usage_kind().is_none() {
        let empty = UsageQuotaRecord::empty(auth_user.id, Utc::now());
        return Ok(Json(gate_decision(false, feature, &empty)));
    }

    let quota = fetch_quota(&state.db, auth_user.id, Utc::now()).await?;
    Ok(Json(gate_decision(false, feature, &quota)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn quota(barcode: i32, photo: i32, ai: i32) -> UsageQuotaRecord {
        UsageQuotaRecord {
            user_id: Uuid::new_v4(),
            barcode_scans_today: barcode,
            photo_scans_today: photo,
            ai_messages_today: ai,
            last_reset_at: Utc::now(),
        }
    }

    #[test]
    fn premium_bypasses_everything() {
        let exhausted = quota(5, 3, 3);
        for feature in [
            Feature::BarcodeScan,
            Feature::PhotoScan,
            Feature::AiCoach,
            Feature::MealPlan,
        ] {
            let decision = gate_decision(true, feature, &exhausted);
            assert!(decision.allowed, "{feature:?} should be allowed for premium");
            assert!(decision.reason.is_none());
        }
    }

    #[test]
    fn meal_plan_is_premium_exclusive() {
        let decision = gate_decision(false, Feature::MealPlan, &quota(0, 0, 0));
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("premium"));
    }

    #[test]
    fn meal_plan_denial_needs_no_stored_quota() {
        // The handler answers meal_plan checks with a zero-usage view instead
        // of reading (and implicitly creating) a quota row.
        assert_eq!(Feature::MealPlan.usage_kind(), None);

        let empty = UsageQuotaRecord::empty(Uuid::new_v4(), Utc::now());
        let decision = gate_decision(false, Feature::MealPlan, &empty);
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("premium"));
    }

    #[test]
    fn barcode_allowed_below_limit_denied_at_limit() {
        let decision = gate_decision(false, Feature::BarcodeScan, &quota(4, 0, 0));
        assert!(decision.allowed);

        let decision = gate_decision(false, Feature::BarcodeScan, &quota(5, 0, 0));
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("5/day"));
    }

    #[test]
    fn photo_and_ai_denials_name_their_limits() {
        let decision = gate_decision(false, Feature::PhotoScan, &quota(0, 3, 0));
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("3/day"));

        let decision = gate_decision(false, Feature::AiCoach, &quota(0, 0, 3));
        assert!(!decision.allowed);
        let reason = decision.reason.unwrap();
        assert!(reason.contains("AI message"));
        assert!(reason.contains("3/day"));
    }

    #[test]
    fn feature_path_names_deserialize() {
        for (name, feature) in [
            ("barcode_scan", Feature::BarcodeScan),
            ("photo_scan", Feature::PhotoScan),
            ("ai_coach", Feature::AiCoach),
            ("meal_plan", Feature::MealPlan),
        ] {
            let parsed: Feature =
                serde_json::from_value(serde_json::Value::String(name.into())).unwrap();
            assert_eq!(parsed, feature);
        }
    }
}
