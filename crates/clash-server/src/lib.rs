pub mod api;
pub mod auth;
pub mod bot;
pub mod chat;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod games;
pub mod health;
pub mod matchmaking;
pub mod presence;
pub mod rate_limit;
pub mod room_manager;
pub mod session;
pub mod state;
pub mod ws;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ConnectInfo;
use axum::middleware;
use axum::response::IntoResponse;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use clash_core::net::messages::{MatchmakingCancelledMsg, ServerEvent};

use config::ServerConfig;
use error::AppError;
use state::AppState;

/// Rate-limiter buckets untouched for this long are dropped.
const RATE_LIMIT_IDLE: Duration = Duration::from_secs(600);

/// Build the Axum router and application state from a config.
pub fn build_app(config: ServerConfig) -> (Router<()>, AppState) {
    let state = AppState::new(config);

    // API routes (behind bearer auth and per-IP rate limiting)
    let api_routes = Router::new()
        .route("/status", axum::routing::get(api::get_status))
        .route("/chat/history", axum::routing::get(api::get_chat_history))
        .route(
            "/presence/{user_id}",
            axum::routing::get(api::get_presence),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            bearer_auth_layer,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api_rate_limit_layer,
        ));

    let app = Router::new()
        .route("/ws", axum::routing::get(ws::ws_handler))
        .route("/health", axum::routing::get(health::health_check))
        .route("/ready", axum::routing::get(health::readiness_check))
        .nest("/api/v1", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state.clone());

    (app, state)
}

/// Periodic sweep: evicts expired rooms, expires stale match requests and
/// prunes idle rate-limiter buckets.
pub fn spawn_maintenance(state: AppState) {
    let every = Duration::from_secs(state.config.rooms.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            sweep(&state).await;
        }
    });
}

async fn sweep(state: &AppState) {
    let now = Instant::now();
    let rooms = &state.config.rooms;
    state.rooms.write().await.evict_expired(
        now,
        Duration::from_secs(rooms.idle_timeout_secs),
        Duration::from_secs(rooms.finished_retention_secs),
    );

    let ttl = Duration::from_secs(state.config.matchmaking.request_ttl_secs);
    let expired = state.matchmaking.lock().await.expire(now, ttl);
    for request in expired {
        tracing::debug!(
            user = %request.user_id,
            game = request.kind.as_str(),
            "Match request expired"
        );
        state.registry.send(
            request.connection,
            &ServerEvent::MatchmakingCancelled(MatchmakingCancelledMsg {
                game_type: request.kind,
                reason: "expired".to_string(),
            }),
        );
    }

    state.api_rate_limiter.cleanup(RATE_LIMIT_IDLE).await;
}

/// Middleware wrapper that injects AuthConfig into request extensions for the
/// bearer auth middleware.
async fn bearer_auth_layer(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut request: axum::extract::Request,
    next: middleware::Next,
) -> Result<axum::response::Response, axum::http::StatusCode> {
    request.extensions_mut().insert(state.auth.clone());
    auth::bearer_auth_middleware(request.headers().clone(), request, next).await
}

async fn api_rate_limit_layer(
    axum::extract::State(state): axum::extract::State<AppState>,
    request: axum::extract::Request,
    next: middleware::Next,
) -> axum::response::Response {
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
    if !state.api_rate_limiter.check_rate_limit(ip).await {
        tracing::warn!(%ip, "API rate limit exceeded");
        return AppError::TooManyRequests.into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_route_is_public() {
        let mut config = ServerConfig::default();
        config.auth.bearer_token = Some("secret".into());
        let (app, _) = build_app(config);
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn api_requires_token_when_configured() {
        let mut config = ServerConfig::default();
        config.auth.bearer_token = Some("secret".into());
        let (app, _) = build_app(config);

        let resp = app
            .clone()
            .oneshot(Request::get("/api/v1/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app
            .oneshot(
                Request::get("/api/v1/status")
                    .header("authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn api_is_rate_limited() {
        let mut config = ServerConfig::default();
        config.limits.api_rate_limit_burst = 2;
        config.limits.api_rate_limit_per_sec = 0.01;
        let (app, _) = build_app(config);
        for _ in 0..2 {
            let resp = app
                .clone()
                .oneshot(Request::get("/api/v1/status").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }
        let resp = app
            .oneshot(Request::get("/api/v1/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn sweep_expires_stale_match_requests() {
        use crate::matchmaking::MatchRequest;
        use crate::presence::tests::{drain, make_sender};
        use clash_core::game_registry::GameKind;
        use clash_core::player::UserId;

        let mut config = ServerConfig::default();
        config.matchmaking.request_ttl_secs = 0;
        let state = AppState::new(config);
        let (tx, mut rx) = make_sender();
        let conn = state.registry.connect(tx);
        state.matchmaking.lock().await.enqueue(
            MatchRequest {
                user_id: UserId::new("alice"),
                username: None,
                connection: conn,
                kind: GameKind::Chess,
                enqueued_at: Instant::now(),
            },
            |_| true,
        );

        sweep(&state).await;
        assert!(state.matchmaking.lock().await.is_empty());
        assert!(matches!(
            &drain(&mut rx)[..],
            [ServerEvent::MatchmakingCancelled(m)] if m.reason == "expired"
        ));
    }
}
