use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::Config;
use crate::handlers::subscription::load_record;
use crate::AppState;

/// In-memory premium-flag cache (for single-instance deployments).
/// Keeps the gate answering during provider or store outages.
#[derive(Clone)]
pub struct PremiumCache {
    entries: Arc<Mutex<HashMap<Uuid, CacheEntry>>>,
    ttl: Duration,
}

struct CacheEntry {
    is_premium: bool,
    cached_at: Instant,
}

impl PremiumCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Cached value, only if still within the TTL.
    pub async fn get_fresh(&self, user_id: Uuid) -> Option<bool> {
        let entries = self.entries.lock().await;
        entries
            .get(&user_id)
            .filter(|e| e.cached_at.elapsed() <= self.ttl)
            .map(|e| e.is_premium)
    }

    /// Cached value regardless of age; the offline fallback of last resort.
    pub async fn get_any(&self, user_id: Uuid) -> Option<bool> {
        let entries = self.entries.lock().await;
        entries.get(&user_id).map(|e| e.is_premium)
    }

    pub async fn put(&self, user_id: Uuid, is_premium: bool) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            user_id,
            CacheEntry {
                is_premium,
                cached_at: Instant::now(),
            },
        );
    }

    pub async fn invalidate(&self, user_id: Uuid) {
        let mut entries = self.entries.lock().await;
        entries.remove(&user_id);
    }

    /// Drop entries older than 2x TTL (call from a background task).
    pub async fn cleanup(&self) {
        let mut entries = self.entries.lock().await;
        let max_age = self.ttl * 2;
        entries.retain(|_, e| e.cached_at.elapsed() < max_age);
    }
}

/// Resolve whether a user currently has premium access.
///
/// Order: fresh cache hit, then the billing provider's live entitlement, then
/// the stored subscription record (covers a trial the provider cache has not
/// reflected yet). Every failure degrades to the last cached value or `false`
/// — never fail-open to premium.
pub async fn check_premium_access(state: &AppState, user_id: Uuid) -> bool {
    if let Some(cached) = state.premium_cache.get_fresh(user_id).await {
        return cached;
    }

    let now = Utc::now();

    match query_provider_entitlement(&state.config, user_id, now).await {
        Ok(true) => {
            state.premium_cache.put(user_id, true).await;
            true
        }
        Ok(false) => premium_from_record(state, user_id, now).await,
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "Entitlement lookup failed, using stored record");
            premium_from_record(state, user_id, now).await
        }
    }
}

async fn premium_from_record(state: &AppState, user_id: Uuid, now: DateTime<Utc>) -> bool {
    match load_record(&state.db, user_id).await {
        Ok(record) => {
            let is_premium = record.map_or(false, |r| r.is_active_at(now));
            state.premium_cache.put(user_id, is_premium).await;
            is_premium
        }
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Subscription store unreachable, falling back to cache");
            state.premium_cache.get_any(user_id).await.unwrap_or(false)
        }
    }
}

/// Live entitlement state from the RevenueCat REST API. Active means any
/// entitlement with a null or future expiry.
async fn query_provider_entitlement(
    config: &Config,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool, anyhow::Error> {
    if config.revenuecat_api_key.is_empty() {
        anyhow::bail!("RevenueCat API key not configured");
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let response = client
        .get(format!(
            "https://api.revenuecat.com/v1/subscribers/{}",
            user_id
        ))
        .header(
            "Authorization",
            format!("Bearer {}", config.revenuecat_api_key),
        )
        .send()
        .await?;

    if !response.status().is_success() {
        anyhow::bail!("RevenueCat API error: {}", response.status());
    }

    let body: serde_json::Value = response.json().await?;
    Ok(entitlements_active(&body, now))
}

fn entitlements_active(subscriber: &serde_json::Value, now: DateTime<Utc>) -> bool {
    subscriber["subscriber"]["entitlements"]
        .as_object()
        .map(|entitlements| {
            entitlements.values().any(|e| match e["expires_date"].as_str() {
                // No expiry means a lifetime entitlement
                None => true,
                Some(s) => DateTime::parse_from_rfc3339(s)
                    .map(|d| d > now)
                    .unwrap_or(false),
            })
        })
        .unwrap_or(false)
}

pub fn spawn_cache_cleanup(cache: PremiumCache) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            cache.cleanup().await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn cache_returns_fresh_values_and_honors_invalidate() {
        let cache = PremiumCache::new(3600);
        let user = Uuid::new_v4();

        assert_eq!(cache.get_fresh(user).await, None);

        cache.put(user, true).await;
        assert_eq!(cache.get_fresh(user).await, Some(true));
        assert_eq!(cache.get_any(user).await, Some(true));

        cache.invalidate(user).await;
        assert_eq!(cache.get_fresh(user).await, None);
        assert_eq!(cache.get_any(user).await, None);
    }

    #[tokio::test]
    async fn expired_entries_are_stale_but_still_reachable() {
        let cache = PremiumCache::new(0);
        let user = Uuid::new_v4();
        cache.put(user, true).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        // TTL of zero: never fresh, but get_any still serves the last value
        assert_eq!(cache.get_fresh(user).await, None);
        assert_eq!(cache.get_any(user).await, Some(true));
    }

    #[test]
    fn entitlement_parsing() {
        let now = Utc::now();
        let future = (now + ChronoDuration::days(10)).to_rfc3339();
        let past = (now - ChronoDuration::days(10)).to_rfc3339();

        let active = serde_json::json!({
            "subscriber": { "entitlements": { "premium": { "expires_date": future } } }
        });
        assert!(entitlements_active(&active, now));

        let lifetime = serde_json::json!({
            "subscriber": { "entitlements": { "premium": { "expires_date": null } } }
        });
        assert!(entitlements_active(&lifetime, now));

        let lapsed = serde_json::json!({
            "subscriber": { "entitlements": { "premium": { "expires_date": past } } }
        });
        assert!(!entitlements_active(&lapsed, now));

        let none = serde_json::json!({ "subscriber": { "entitlements": {} } });
        assert!(!entitlements_active(&none, now));

        let malformed = serde_json::json!({ "unexpected": true });
        assert!(!entitlements_active(&malformed, now));
    }
}
