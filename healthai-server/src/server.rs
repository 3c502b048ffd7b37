//! Router assembly and listener startup.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{DefaultBodyLimit, FromRef};
use axum::http::{HeaderValue, Method, header};
use axum::routing::{get, post};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

use crate::config::ServerConfig;
use crate::models::{ModelStore, StoreError};
use crate::relay::{self, RelayState};
use crate::routes;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    /// Chat relay: connections and room membership.
    pub relay: Arc<RelayState>,
    /// Uploaded model files.
    pub models: Arc<ModelStore>,
}

impl FromRef<AppState> for Arc<RelayState> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.relay)
    }
}

impl FromRef<AppState> for Arc<ModelStore> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.models)
    }
}

impl AppState {
    /// Builds relay and model store from the resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the model directory cannot be created.
    pub async fn from_config(config: &ServerConfig) -> Result<Self, StoreError> {
        let relay = RelayState::with_config(
            config.max_payload_size,
            config.ping_interval,
            config.ping_timeout,
            config.allowed_origins.clone(),
        );
        let models = ModelStore::open(&config.model_dir).await?;
        Ok(Self {
            relay: Arc::new(relay),
            models: Arc::new(models),
        })
    }
}

/// Builds the full router: relay socket, health, welcome, and model routes.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    let uploads: Router<AppState> = Router::new()
        .route("/models", post(routes::upload_model))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_upload_size));

    Router::new()
        .route("/", get(routes::index))
        .route("/healthz", get(routes::healthz))
        .route("/models/{model_name}", get(routes::download_model))
        .route("/ws", get(relay::ws_handler))
        .merge(uploads)
        .layer(cors_layer(&config.allowed_origins))
        .with_state(state)
}

/// CORS policy admitting the configured origins with credentials.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

/// Builds the state for `config` and starts the server on
/// `config.bind_addr`, returning the bound address and a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the model directory cannot be created or the TCP
/// listener cannot bind.
pub async fn start_server(
    config: &ServerConfig,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), Box<dyn std::error::Error + Send + Sync>> {
    let state = AppState::from_config(config).await?;
    start_server_with_state(config, state).await
}

/// Starts the server with a pre-built [`AppState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to `config.bind_addr`.
pub async fn start_server_with_state(
    config: &ServerConfig,
    state: AppState,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), Box<dyn std::error::Error + Send + Sync>> {
    let app = build_router(state, config);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok((bound_addr, handle))
}
