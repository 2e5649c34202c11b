use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub frontend_url: String,

    pub jwt_secret: String,

    pub revenuecat_api_key: String,
    pub revenuecat_webhook_secret: String,
    /// Accept webhook events without a configured secret. Off by default;
    /// only meant for pre-production environments where the provider's
    /// authorization header is not yet set up.
    pub webhook_allow_unauthenticated: bool,

    pub premium_cache_ttl_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()
                .expect("PORT must be a number"),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),

            jwt_secret: env::var("JWT_SECRET").expect("JWT_SECRET must be set"),

            revenuecat_api_key: env::var("REVENUECAT_API_KEY").unwrap_or_else(|_| String::new()),
            revenuecat_webhook_secret: env::var("REVENUECAT_WEBHOOK_SECRET")
                .unwrap_or_else(|_| String::new()),
            webhook_allow_unauthenticated: env::var("WEBHOOK_ALLOW_UNAUTHENTICATED")
                .unwrap_or_else(|_| "false".into())
                .parse()
                .unwrap_or(false),

            premium_cache_ttl_secs: env::var("PREMIUM_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "3600".into()) // 1 hour
                .parse()
                .unwrap_or(3600),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
