use jsonwebtoken::{decode, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult};

/// Access-token claims issued by the app's auth service. This backend only
/// verifies them; it never mints tokens.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(default)]
    pub email: String,
    pub exp: i64,
    pub iat: i64,
}

pub fn verify_token(token: &str, config: &Config) -> AppResult<TokenData<Claims>> {
    let mut validation = Validation::default();
    validation.validate_exp = true;

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|_| AppError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn test_config() -> Config {
        Config {
            database_url: String::new(),
            host: "127.0.0.1".into(),
            port: 0,
            frontend_url: String::new(),
            jwt_secret: "test-secret".into(),
            revenuecat_api_key: String::new(),
            revenuecat_webhook_secret: String::new(),
            webhook_allow_unauthenticated: false,
            premium_cache_ttl_secs: 3600,
        }
    }

    fn make_token(config: &Config, ttl_secs: i64) -> String {
        let now = Utc::now();
        let claims = Claims {
            sub: Uuid::new_v4(),
            email: "user@example.com".into(),
            exp: (now + Duration::seconds(ttl_secs)).timestamp(),
            iat: now.timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn verifies_a_valid_token() {
        let config = test_config();
        let token = make_token(&config, 900);
        let data = verify_token(&token, &config).unwrap();
        assert_eq!(data.claims.email, "user@example.com");
    }

    #[test]
    fn rejects_an_expired_token() {
        let config = test_config();
        // Past the default 60s leeway
        let token = make_token(&config, -120);
        assert!(verify_token(&token, &config).is_err());
    }

    #[test]
    fn rejects_a_token_signed_with_another_secret() {
        let config = test_config();
        let mut other = test_config();
        other.jwt_secret = "other-secret".into();
        let token = make_token(&other, 900);
        assert!(verify_token(&token, &config).is_err());
    }
}
