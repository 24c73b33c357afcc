use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

mod config;
mod error;
mod extract;
mod fetch;
mod models;
mod preview;
mod rate_limit;
mod validate;

use config::PreviewConfig;
use error::PreviewError;
use fetch::PageFetcher;
use models::PreviewRequest;
use preview::PreviewService;
use rate_limit::{MemoryRateLimiter, RateLimitStore};
use validate::UrlValidator;

struct AppState {
    preview: PreviewService,
    limiter: Arc<dyn RateLimitStore>,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = PreviewConfig::default();
    let validator = UrlValidator::system();
    let fetcher = PageFetcher::new(config.fetch.clone(), validator.clone())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    let limiter = Arc::new(MemoryRateLimiter::new(
        config.rate_limit_points,
        config.rate_limit_window,
    ));
    let housekeeping = limiter.clone();
    let window = config.rate_limit_window;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(window);
        loop {
            interval.tick().await;
            housekeeping.retain_recent();
        }
    });

    let state = AppState {
        preview: PreviewService::new(validator, fetcher),
        limiter,
    };
    let app = app(state, &config.allowed_origins);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let timeout_ms = config.fetch.timeout.as_millis() as u64;
    tracing::info!(
        max_body_bytes = config.fetch.max_body_bytes,
        timeout_ms,
        max_redirects = config.fetch.max_redirects,
        "listening on {}",
        listener.local_addr()?
    );
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

fn app(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/preview", post(preview_endpoint))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn preview_endpoint(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    payload: Result<Json<PreviewRequest>, JsonRejection>,
) -> Response {
    let identity = peer.ip().to_string();
    if !state.limiter.consume(&identity).await {
        tracing::info!(client = %identity, "rate limit exceeded");
        return PreviewError::RateLimited.into_response();
    }

    let url = match payload {
        Ok(Json(req)) => req.url.filter(|u| !u.trim().is_empty()),
        Err(rejection) => {
            return PreviewError::InvalidInput(rejection.body_text()).into_response();
        }
    };
    let Some(url) = url else {
        return PreviewError::InvalidInput("url is required".to_string()).into_response();
    };

    match state.preview.preview(&url).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => {
            tracing::warn!(client = %identity, url = %url, error = %e, "preview failed");
            e.into_response()
        }
    }
}
