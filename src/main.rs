use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod models;
mod services;

use config::Config;
use services::entitlement::PremiumCache;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub premium_cache: PremiumCache,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nutriscan_api=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    let config = Config::from_env();
    let config = Arc::new(config);

    // Database
    let db = db::create_pool(&config.database_url).await;

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Database migrations applied");

    let premium_cache = PremiumCache::new(config.premium_cache_ttl_secs);

    let state = AppState {
        db,
        config: config.clone(),
        premium_cache,
    };

    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/readyz", get(handlers::health::readyz))
        .route(
            "/api/webhooks/revenuecat",
            post(handlers::webhook::revenuecat_webhook),
        );

    let protected_routes = Router::new()
        // Subscription state
        .route(
            "/api/subscription",
            get(handlers::subscription::get_subscription),
        )
        .route(
            "/api/subscription/premium",
            get(handlers::subscription::check_premium),
        )
        .route(
            "/api/subscription/winback",
            get(handlers::subscription::get_winback_offer),
        )
        // Usage quota
        .route("/api/usage", get(handlers::usage::get_usage))
        .route("/api/usage/:kind", post(handlers::usage::increment_usage))
        // Feature gate
        .route(
            "/api/features/:feature",
            get(handlers::features::can_use_feature),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::require_auth,
        ));

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .frontend_url
                .parse::<axum::http::HeaderValue>()
                .expect("FRONTEND_URL must be a valid origin"),
        )
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
        ])
        .allow_credentials(true);

    // Background jobs: daily quota sweep, trial expiration, cache pruning
    services::scheduler::spawn_daily_quota_reset(state.db.clone());
    services::scheduler::spawn_trial_expiration_check(state.db.clone());
    services::entitlement::spawn_cache_cleanup(state.premium_cache.clone());

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.listen_addr();
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
