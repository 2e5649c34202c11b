use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// RevenueCat webhook envelope: `{"api_version": "1.0", "event": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub api_version: Option<String>,
    pub event: WebhookEvent,
}

/// Billing lifecycle event kinds. Exhaustively matched in the state machine;
/// provider types we don't know deserialize to `Unknown` and are acknowledged
/// without effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    InitialPurchase,
    Renewal,
    Cancellation,
    Uncancellation,
    NonRenewingPurchase,
    Expiration,
    BillingIssue,
    ProductChange,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodType {
    Trial,
    Intro,
    Normal,
    #[serde(other)]
    Other,
}

impl Default for PeriodType {
    fn default() -> Self {
        Self::Normal
    }
}

/// One billing lifecycle event as delivered by the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub app_user_id: String,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub new_product_id: Option<String>,
    #[serde(default)]
    pub period_type: PeriodType,
    #[serde(default)]
    pub purchased_at_ms: Option<i64>,
    #[serde(default)]
    pub expiration_at_ms: Option<i64>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub is_trial_conversion: bool,
    #[serde(default)]
    pub cancel_reason: Option<String>,
}

impl WebhookEvent {
    pub fn purchased_at(&self) -> Option<DateTime<Utc>> {
        self.purchased_at_ms
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expiration_at_ms
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_a_provider_payload() {
        let body = serde_json::json!({
            "api_version": "1.0",
            "event": {
                "id": "evt_abc",
                "type": "INITIAL_PURCHASE",
                "app_user_id": "8f14e45f-ea2f-4c51-9f35-7b2c1a3d4e5f",
                "product_id": "nutriscan_yearly",
                "period_type": "TRIAL",
                "purchased_at_ms": 1700000000000i64,
                "expiration_at_ms": 1701209600000i64,
                "price": 0.0,
                "currency": "USD",
                "is_trial_conversion": false,
                "cancel_reason": null
            }
        });

        let payload: WebhookPayload = serde_json::from_value(body).unwrap();
        let event = payload.event;
        assert_eq!(event.event_type, EventType::InitialPurchase);
        assert_eq!(event.period_type, PeriodType::Trial);
        assert_eq!(event.product_id.as_deref(), Some("nutriscan_yearly"));
        assert!(event.purchased_at().is_some());
        assert!(event.expires_at().unwrap() > event.purchased_at().unwrap());
    }

    #[test]
    fn unknown_event_type_deserializes_to_unknown() {
        let body = serde_json::json!({
            "event": {
                "type": "SUBSCRIBER_ALIAS",
                "app_user_id": "user-1"
            }
        });

        let payload: WebhookPayload = serde_json::from_value(body).unwrap();
        assert_eq!(payload.event.event_type, EventType::Unknown);
        assert_eq!(payload.event.period_type, PeriodType::Normal);
    }

    #[test]
    fn missing_event_is_rejected() {
        let body = serde_json::json!({ "api_version": "1.0" });
        assert!(serde_json::from_value::<WebhookPayload>(body).is_err());
    }
}
