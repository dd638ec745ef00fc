use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        body::Bytes,
        extract::State,
        http::{HeaderMap, StatusCode, header::AUTHORIZATION},
        response::{IntoResponse, Json, Response},
        routing::{get, post},
    },
    kestrel_config::KestrelConfig,
    kestrel_protocol::{InvocationRequest, PROTOCOL_VERSION, SERVICE_NAME},
    kestrel_tools::Dispatcher,
    serde_json::{Value, json},
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{debug, info, warn},
};

use crate::{auth, state::GatewayState};

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/manifest.json", get(manifest_handler))
        .route("/rpc", post(rpc_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the gateway HTTP server.
pub async fn start_gateway(config: &KestrelConfig, bind: &str, port: u16) -> anyhow::Result<()> {
    let dispatcher = Arc::new(Dispatcher::from_config(config)?);
    let capabilities = dispatcher.registry().len();
    let state = GatewayState::new(dispatcher, config.gateway.token.clone());
    let auth_mode = if state.token.is_some() { "bearer token" } else { "none" };

    let app = build_gateway_app(Arc::clone(&state));

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Startup banner.
    let lines = [
        format!("kestrel gateway v{}", state.version),
        format!("protocol v{PROTOCOL_VERSION}, listening on {addr}"),
        format!("{capabilities} capabilities registered"),
        format!("auth: {auth_mode}"),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    axum::serve(listener, app).await?;
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": state.version,
        "protocol": PROTOCOL_VERSION,
        "capabilities": state.invoker.registry().len(),
    }))
}

async fn manifest_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(state.invoker.registry().manifest(SERVICE_NAME, &state.version))
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message, "id": Value::Null }))).into_response()
}

async fn rpc_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let auth = auth::authorize_invocation(state.token.as_ref(), auth::bearer_token(header));
    if !auth.ok {
        warn!(reason = auth.reason.unwrap_or("unknown"), "rejected rpc request");
        return error_response(StatusCode::UNAUTHORIZED, "unauthorized".into());
    }

    let request: InvocationRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "malformed rpc body");
            return error_response(StatusCode::BAD_REQUEST, format!("invalid request: {e}"));
        },
    };

    let result = state.invoker.invoke(request).await;
    Json(result.to_value()).into_response()
}
