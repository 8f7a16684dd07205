//! Router assembly and the listener loop

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ORIGIN,
    VARY,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use parley_observability::{create_request_span, new_request_id};
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, auth, conversations, health, proxy};
use crate::state::AppState;

const ALLOW_METHODS: &str = "GET, POST, DELETE, OPTIONS";

pub fn build_app(state: AppState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/", get(health::health).post(proxy::forward))
        .route("/health", get(health::health))
        .route("/admin/allow-user", post(admin::allow_user))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route("/conversations", get(conversations::list))
        .route(
            "/conversations/:id",
            get(conversations::get)
                .post(conversations::put)
                .delete(conversations::delete),
        )
        .fallback(health::not_found)
        .layer(middleware::from_fn_with_state(Arc::clone(&state), cors))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            create_request_span(
                &new_request_id(),
                request.method().as_str(),
                request.uri().path(),
            )
        }))
        .with_state(state)
}

/// Answers preflight requests directly and stamps CORS headers on every
/// other response
async fn cors(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let requested = request
        .headers()
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok());
    let origin = state.allow_origin(requested).map(str::to_string);

    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };
    apply_cors_headers(response.headers_mut(), origin.as_deref());
    response
}

fn apply_cors_headers(headers: &mut HeaderMap, origin: Option<&str>) {
    if let Some(value) = origin.and_then(|o| HeaderValue::from_str(o).ok()) {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
    headers.insert(VARY, HeaderValue::from_static("Origin"));
}

pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    run_server_with_shutdown(state, std::future::pending()).await
}

/// Serve until `shutdown` completes
pub async fn run_server_with_shutdown<F>(state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = format!("{}:{}", state.config.host, state.config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Parley edge proxy listening on http://{}", listener.local_addr()?);

    axum::serve(listener, build_app(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
