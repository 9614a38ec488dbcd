//! WebSocket entry point for exec sessions.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{WebSocket, rejection::WebSocketUpgradeRejection},
    },
    response::{IntoResponse, Response},
    routing::get,
};
use exec_bridge_core::{DEFAULT_SHELL_COMMAND, SessionExecutor, Target};
use futures::StreamExt;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::{channel::ChannelGuard, config::RelayConfig, error::BridgeError, session::run_session};

/// Route serving exec sessions.
pub const EXEC_ROUTE: &str = "/api/v1/namespaces/{namespace}/pods/{pod}/exec";

/// Shared state handed to every session.
#[derive(Clone)]
pub struct BridgeState {
    /// Executor used to attach to pods.
    pub executor: Arc<dyn SessionExecutor>,
    /// Limits applied to each session.
    pub config: RelayConfig,
    /// Command launched in the target.
    pub command: Arc<[String]>,
}

impl BridgeState {
    /// Create state running the default interactive shell.
    #[must_use]
    pub fn new(executor: Arc<dyn SessionExecutor>, config: RelayConfig) -> Self {
        Self {
            executor,
            config,
            command: DEFAULT_SHELL_COMMAND.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Override the command launched in the target.
    #[must_use]
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command.into();
        self
    }
}

/// Query parameters of the exec route.
#[derive(Debug, Default, Deserialize)]
pub struct ExecQuery {
    pub container: Option<String>,
}

/// WebSocket upgrade handler for the exec route.
pub async fn exec_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Path((namespace, pod)): Path<(String, String)>,
    Query(query): Query<ExecQuery>,
    State(state): State<BridgeState>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            tracing::warn!("upgrade: {rejection}");
            return rejection.into_response();
        }
    };

    let limit = state.config.max_message_size;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_failed_upgrade(|e| tracing::warn!("upgrade: {e}"))
        .on_upgrade(move |socket| handle_socket(socket, namespace, pod, query.container, state))
        .into_response()
}

async fn handle_socket(
    socket: WebSocket,
    namespace: String,
    pod: String,
    container: Option<String>,
    state: BridgeState,
) {
    let (sink, incoming) = socket.split();

    let target = match Target::new(namespace, pod, container) {
        Ok(target) => target,
        Err(e) => {
            let err = BridgeError::from(e);
            tracing::warn!(%err, "Rejected exec request");
            ChannelGuard::new(sink, &state.config)
                .close_with_error(&err)
                .await;
            return;
        }
    };

    let outcome = run_session(
        sink,
        incoming,
        target,
        state.executor.as_ref(),
        &state.command,
        &state.config,
    )
    .await;
    tracing::debug!(?outcome, "Exec connection finished");
}

/// Create the exec router.
///
/// # Example
/// ```ignore
/// let app = create_router(BridgeState::new(executor, RelayConfig::default()));
/// ```
#[must_use]
pub fn create_router(state: BridgeState) -> Router {
    Router::new()
        .route(EXEC_ROUTE, get(exec_handler).post(exec_handler))
        .route("/healthz", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
