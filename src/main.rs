use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

mod auth;
mod clock;
mod config;
mod db;
mod error;
mod events;
mod handlers;
mod models;
mod repository;
mod services;
mod sessions;

use clock::{Clock, SystemClock};
use config::Config;
use events::EventBus;
use repository::{PgRepository, Repository};
use services::ads::AdService;
use services::payments::PaymentGateway;
use services::tinkoff::TinkoffClient;
use sessions::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
    pub sessions: SessionStore,
    pub ads: Arc<AdService>,
    pub gateway: Arc<dyn PaymentGateway>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "habitbot_api=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    let config = Arc::new(Config::from_env());

    // Database
    let db = db::create_pool(&config)
        .await
        .expect("Failed to create database pool");

    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Database migrations applied");

    if !config.tinkoff_configured() {
        tracing::warn!("Tinkoff credentials missing, payment creation is disabled");
    }
    let gateway = TinkoffClient::new(&config).expect("Failed to build payment gateway client");

    let sessions = SessionStore::new(
        Duration::from_secs(config.session_ttl_secs),
        config.session_max_entries,
    );
    sessions::spawn_session_cleanup_worker(sessions.clone(), Duration::from_secs(300));

    let state = AppState {
        repo: Arc::new(PgRepository::new(db)),
        config: config.clone(),
        clock: Arc::new(SystemClock),
        events: EventBus::new(256),
        sessions,
        ads: Arc::new(AdService::new(Duration::from_secs(config.ad_cache_ttl_secs))),
        gateway: Arc::new(gateway),
    };

    let app = build_router(state);

    let addr = config.listen_addr();
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind listen address");
    axum::serve(listener, app).await.expect("Server error");
}

fn build_router(state: AppState) -> Router {
    use handlers::{ads, habits, health, payments, progress, session, subscription, users, ws};

    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/readyz", get(health::readyz))
        .route("/api/payments/webhook", post(payments::webhook))
        .route("/ws", get(ws::ws_handler));

    let protected_routes = Router::new()
        // Users
        .route("/api/users/register", post(users::register))
        .route("/api/users/:external_id", get(users::get_profile))
        // Habits
        .route(
            "/api/users/:external_id/habits",
            get(habits::list_habits).post(habits::create_habit),
        )
        .route(
            "/api/users/:external_id/habits/:habit_id",
            delete(habits::delete_habit),
        )
        .route(
            "/api/users/:external_id/habits/:habit_id/complete",
            post(habits::complete_habit),
        )
        .route(
            "/api/users/:external_id/habits/:habit_id/uncomplete",
            post(habits::uncomplete_habit),
        )
        .route(
            "/api/users/:external_id/habits/:habit_id/stats",
            get(habits::get_habit_stats),
        )
        // Progress
        .route("/api/users/:external_id/stats", get(progress::get_stats))
        .route(
            "/api/users/:external_id/achievements",
            get(progress::get_achievements),
        )
        .route(
            "/api/users/:external_id/referrals",
            get(progress::get_referrals),
        )
        // Subscription
        .route(
            "/api/users/:external_id/subscription",
            put(subscription::set_expiry),
        )
        .route(
            "/api/users/:external_id/subscription/days",
            post(subscription::add_days),
        )
        // Payments
        .route(
            "/api/users/:external_id/payments",
            get(payments::get_pending_payment).post(payments::create_payment),
        )
        .route("/api/payments/:order_id", get(payments::refresh_payment))
        // Conversation state
        .route(
            "/api/users/:external_id/session",
            get(session::get_session)
                .put(session::put_session)
                .delete(session::clear_session),
        )
        // Ads
        .route("/api/users/:external_id/ads/next", post(ads::next_ad))
        .route("/api/ads/:ad_id/click", post(ads::record_click))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::require_gateway_token,
        ));

    let mut cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT]);
    if let Some(origin) = state.config.cors_origin.as_deref() {
        match origin.parse::<HeaderValue>() {
            Ok(origin) => cors = cors.allow_origin(origin),
            Err(_) => tracing::warn!(origin, "Ignoring invalid CORS_ORIGIN"),
        }
    }

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Duration as ChronoDuration;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::clock::FixedClock;
    use crate::repository::memory::MemoryRepository;
    use crate::services::payments::fake::FakeGateway;
    use crate::services::tinkoff::Notification;

    const TOKEN: &str = "test-gateway-token";

    struct TestApp {
        router: Router,
        repo: Arc<MemoryRepository>,
        clock: Arc<FixedClock>,
    }

    fn test_app() -> TestApp {
        let repo = Arc::new(MemoryRepository::new());
        let clock = Arc::new(FixedClock::on(
            chrono::NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
        ));
        let config = Config::for_tests();

        let state = AppState {
            repo: repo.clone(),
            clock: clock.clone(),
            gateway: Arc::new(FakeGateway::new(&config.tinkoff_password)),
            config: Arc::new(config),
            events: EventBus::new(64),
            sessions: SessionStore::new(Duration::from_secs(60), 100),
            ads: Arc::new(AdService::new(Duration::from_secs(300))),
        };

        TestApp {
            router: build_router(state),
            repo,
            clock,
        }
    }

    impl TestApp {
        async fn send(
            &self,
            method: &str,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header("authorization", format!("Bearer {token}"));
            }
            let request = match body {
                Some(body) => builder
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };

            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes)
                    .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
            };
            (status, value)
        }

        async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            self.send(method, uri, Some(TOKEN), body).await
        }

        async fn register(&self, external_id: i64, referral_code: Option<&str>) -> Value {
            let (status, body) = self
                .call(
                    "POST",
                    "/api/users/register",
                    Some(json!({
                        "external_id": external_id,
                        "username": format!("user{external_id}"),
                        "display_name": format!("User {external_id}"),
                        "referral_code": referral_code,
                    })),
                )
                .await;
            assert!(status.is_success(), "register failed: {status} {body}");
            body
        }

        async fn create_habit(&self, external_id: i64, name: &str) -> (StatusCode, Value) {
            self.call(
                "POST",
                &format!("/api/users/{external_id}/habits"),
                Some(json!({ "name": name })),
            )
            .await
        }
    }

    fn habit_id(body: &Value) -> Uuid {
        body["id"].as_str().unwrap().parse().unwrap()
    }

    // ── Transport ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_health_is_public() {
        let app = test_app();
        let (status, body) = app.send("GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "habitbot-api");

        let (status, _) = app.send("GET", "/readyz", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_protected_routes_require_gateway_token() {
        let app = test_app();
        app.register(1, None).await;

        let (status, body) = app.send("GET", "/api/users/1", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "unauthorized");

        let (status, _) = app.send("GET", "/api/users/1", Some("wrong"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app.call("GET", "/api/users/1", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let app = test_app();
        let (status, body) = app.call("GET", "/api/users/404", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "not_found");
    }

    // ── Users & referrals ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_register_is_create_or_update() {
        let app = test_app();
        let first = app.register(1, None).await;
        assert_eq!(first["is_new"], true);
        assert_eq!(first["user"]["is_premium"], false);
        assert_eq!(first["user"]["habit_limit"], 3);

        let second = app.register(1, None).await;
        assert_eq!(second["is_new"], false);
        assert_eq!(second["user"]["referral_code"], first["user"]["referral_code"]);
    }

    #[tokio::test]
    async fn test_referral_rejection_does_not_block_registration() {
        let app = test_app();
        let referrer = app.register(1, None).await;
        let code = referrer["user"]["referral_code"].as_str().unwrap().to_string();

        // Referrer has no streak yet.
        let body = app.register(2, Some(&format!("ref_{code}"))).await;
        assert_eq!(body["is_new"], true);
        assert!(body["referral"].is_null());
        assert_eq!(body["referral_error"]["code"], "referral_not_unlocked");

        let body = app.register(3, Some("ref_ffffffffffff")).await;
        assert_eq!(body["referral_error"]["code"], "invalid_referral_code");
    }

    #[tokio::test]
    async fn test_referral_at_registration_grants_days() {
        let app = test_app();
        let referrer = app.register(1, None).await;
        let code = referrer["user"]["referral_code"].as_str().unwrap().to_string();
        let (_, habit) = app.create_habit(1, "Run").await;

        let today = app.clock.today();
        let week: Vec<_> = (0..7).map(|d| today - ChronoDuration::days(d)).collect();
        app.repo.seed_completions(habit_id(&habit), &week).await;

        let body = app.register(2, Some(&format!("ref_{code}"))).await;
        assert_eq!(body["referral"]["stage"], 1);
        assert_eq!(body["referral"]["referrer_reward"]["mode"], "days");
        assert_eq!(body["user"]["is_premium"], true);

        let (_, overview) = app.call("GET", "/api/users/1/referrals", None).await;
        assert_eq!(overview["stats"]["total"], 1);
        assert_eq!(overview["stats"]["can_invite"], true);
        assert_eq!(
            overview["invite_link"],
            format!("https://t.me/habit_test_bot?start=ref_{code}")
        );

        let (_, overview) = app.call("GET", "/api/users/2/referrals", None).await;
        assert_eq!(overview["referred_by"]["external_id"], 1);
    }

    #[tokio::test]
    async fn test_retried_registration_still_applies_referral() {
        let app = test_app();
        let referrer = app.register(1, None).await;
        let code = referrer["user"]["referral_code"].as_str().unwrap().to_string();
        let (_, habit) = app.create_habit(1, "Run").await;
        let today = app.clock.today();
        let week: Vec<_> = (0..7).map(|d| today - ChronoDuration::days(d)).collect();
        app.repo.seed_completions(habit_id(&habit), &week).await;

        // First attempt writes the user row, then fails reading the streak.
        app.repo.fail_log_reads(true);
        let (status, _) = app
            .call(
                "POST",
                "/api/users/register",
                Some(json!({
                    "external_id": 2,
                    "display_name": "User 2",
                    "referral_code": format!("ref_{code}"),
                })),
            )
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        app.repo.fail_log_reads(false);

        let body = app.register(2, Some(&format!("ref_{code}"))).await;
        assert_eq!(body["is_new"], false);
        assert_eq!(body["referral"]["stage"], 1);
        assert_eq!(body["user"]["is_premium"], true);

        let body = app.register(2, Some(&format!("ref_{code}"))).await;
        assert!(body["referral"].is_null());
        assert!(body["referral_error"].is_null());

        let (_, overview) = app.call("GET", "/api/users/1/referrals", None).await;
        assert_eq!(overview["stats"]["total"], 1);
    }

    #[tokio::test]
    async fn test_profile_degrades_when_stats_fail() {
        let app = test_app();
        app.register(1, None).await;
        app.create_habit(1, "Read").await;

        app.repo.fail_log_reads(true);
        let (status, body) = app.call("GET", "/api/users/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stats_available"], false);
        assert!(body["overall_streak"].is_null());

        app.repo.fail_log_reads(false);
        let (_, body) = app.call("GET", "/api/users/1", None).await;
        assert_eq!(body["stats_available"], true);
        assert_eq!(body["overall_streak"], 0);
    }

    // ── Habits ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_free_user_capped_at_three_habits() {
        let app = test_app();
        app.register(1, None).await;

        for name in ["Read", "Run", "Sleep"] {
            let (status, _) = app.create_habit(1, name).await;
            assert_eq!(status, StatusCode::CREATED);
        }
        let (status, body) = app.create_habit(1, "Meditate").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "habit_limit_reached");

        let (_, habits) = app.call("GET", "/api/users/1/habits", None).await;
        assert_eq!(habits.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_complete_and_uncomplete_report_progress() {
        let app = test_app();
        app.register(1, None).await;
        let (_, habit) = app.create_habit(1, "Read").await;
        let id = habit_id(&habit);

        let (status, report) = app
            .call("POST", &format!("/api/users/1/habits/{id}/complete"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["habit_streak"], 1);
        assert_eq!(report["overall_streak"], 1);

        let (_, habits) = app.call("GET", "/api/users/1/habits", None).await;
        assert_eq!(habits[0]["completed_today"], true);

        let (_, report) = app
            .call("POST", &format!("/api/users/1/habits/{id}/uncomplete"), None)
            .await;
        assert_eq!(report["habit_streak"], 0);
        assert_eq!(report["log"]["completed"], false);
    }

    #[tokio::test]
    async fn test_cannot_complete_someone_elses_habit() {
        let app = test_app();
        app.register(1, None).await;
        app.register(2, None).await;
        let (_, habit) = app.create_habit(1, "Read").await;
        let id = habit_id(&habit);

        let (status, body) = app
            .call("POST", &format!("/api/users/2/habits/{id}/complete"), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "access_denied");

        let (status, _) = app
            .call("DELETE", &format!("/api/users/1/habits/{id}"), None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app
            .call("POST", &format!("/api/users/1/habits/{id}/complete"), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // ── Subscription & payments ──────────────────────────────────────────

    #[tokio::test]
    async fn test_admin_grant_rejects_negative_days() {
        let app = test_app();
        app.register(1, None).await;

        let (status, body) = app
            .call("POST", "/api/users/1/subscription/days", Some(json!({ "days": 5 })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_premium"], true);

        let (status, _) = app
            .call("POST", "/api/users/1/subscription/days", Some(json!({ "days": -1 })))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_webhook_requires_valid_token() {
        let app = test_app();
        app.register(1, None).await;

        let (status, payment) = app.call("POST", "/api/users/1/payments", None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(payment["amount"], 19900);
        let order_id = payment["order_id"].as_str().unwrap().to_string();

        let (_, pending) = app.call("GET", "/api/users/1/payments", None).await;
        assert_eq!(pending["order_id"], order_id.as_str());

        let notification = Notification {
            terminal_key: "TestTerminal".into(),
            order_id: order_id.clone(),
            success: true,
            status: "CONFIRMED".into(),
            payment_id: "700001".into(),
            error_code: "0".into(),
            amount: 19900,
            token: "forged".into(),
        };

        let (status, _) = app
            .send(
                "POST",
                "/api/payments/webhook",
                None,
                Some(serde_json::to_value(&notification).unwrap()),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (_, profile) = app.call("GET", "/api/users/1", None).await;
        assert_eq!(profile["is_premium"], false);

        let signed = notification.sign("secret");
        let (status, body) = app
            .send(
                "POST",
                "/api/payments/webhook",
                None,
                Some(serde_json::to_value(&signed).unwrap()),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");

        let (_, profile) = app.call("GET", "/api/users/1", None).await;
        assert_eq!(profile["is_premium"], true);
        let (_, pending) = app.call("GET", "/api/users/1/payments", None).await;
        assert!(pending.is_null());
    }

    // ── Sessions & ads ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_session_roundtrip() {
        let app = test_app();
        let uri = "/api/users/77/session";

        let (_, body) = app.call("GET", uri, None).await;
        assert!(body["state"].is_null());

        let (status, _) = app
            .call("PUT", uri, Some(json!({ "step": "awaiting_habit_name" })))
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, body) = app.call("GET", uri, None).await;
        assert_eq!(body["state"]["step"], "awaiting_habit_name");

        let (status, _) = app.call("DELETE", uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.call("DELETE", uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_click_on_missing_ad() {
        let app = test_app();
        let (status, _) = app
            .call("POST", &format!("/api/ads/{}/click", Uuid::new_v4()), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        app.register(1, None).await;
        let (status, body) = app.call("POST", "/api/users/1/ads/next", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_null());
    }
}
