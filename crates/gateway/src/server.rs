//! Gateway wiring and the HTTP/WebSocket router.

use std::{sync::Arc, time::Duration};

use {
    axum::{
        Json, Router,
        extract::{Path, Query, State, WebSocketUpgrade},
        response::IntoResponse,
        routing::{get, post},
    },
    serde::Deserialize,
    tokio_util::sync::CancellationToken,
    tower_http::{
        catch_panic::CatchPanicLayer,
        request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
        trace::TraceLayer,
    },
    tracing::{error, info},
    uuid::Uuid,
};

use {
    murmur_auth::{DevOtpProvider, TokenService, UserService},
    murmur_chat::{
        ConversationWorker, HeartbeatTuning, ManagerService, MessageService, RoomSink,
        SessionService,
    },
    murmur_config::MurmurConfig,
    murmur_presence::PresenceIndex,
    murmur_protocol::{MAX_PAYLOAD_BYTES, MessageFrame},
    murmur_queue::StreamQueue,
    murmur_storage::Db,
};

use crate::{
    auth_middleware::AuthUser,
    auth_routes,
    error::ApiError,
    registry::Registry,
    state::AppState,
    ws::handle_socket,
};

/// Connect infrastructure and assemble the full service graph.
pub async fn build_state(config: &MurmurConfig) -> anyhow::Result<Arc<AppState>> {
    let db = Db::connect(&config.database.url, config.database.max_connections).await?;
    murmur_queue::run_migrations(db.pool()).await?;
    Ok(build_state_with_db(db, config))
}

/// Assemble the service graph on an existing database handle (migrations
/// must already be run). Split out so tests can wire an in-memory pool.
pub fn build_state_with_db(db: Db, config: &MurmurConfig) -> Arc<AppState> {
    let queue = Arc::new(StreamQueue::with_pool(
        db.pool().clone(),
        config.queue.stream_cap,
        config.queue.max_deliveries,
    ));
    let registry = Arc::new(Registry::new());
    let presence = Arc::new(PresenceIndex::new());
    let session = Arc::new(SessionService::new(
        db.clone(),
        Duration::from_secs(config.session.rejoin_window_secs),
    ));
    let message = Arc::new(MessageService::new(
        db.clone(),
        Arc::clone(&queue),
        Arc::clone(&registry) as Arc<dyn RoomSink>,
    ));
    let manager = Arc::new(ManagerService::new(
        db.clone(),
        presence,
        session,
        Arc::clone(&message),
        HeartbeatTuning {
            fast: Duration::from_secs(config.heartbeat.fast_secs),
            slow: Duration::from_secs(config.heartbeat.slow_secs),
            online_ttl: Duration::from_secs(config.heartbeat.online_ttl_secs),
        },
    ));

    // The worker factory closes the registry ↔ worker construction cycle:
    // the registry only ever sees this opaque closure.
    let worker = Arc::new(ConversationWorker::new(
        Arc::clone(&queue),
        message,
        config.queue.consumer_group.clone(),
    ));
    registry.set_worker(Arc::new(move |cancel, conversation_id| {
        let worker = Arc::clone(&worker);
        Box::pin(async move {
            if let Err(e) = worker.run(cancel, &conversation_id).await {
                error!(conversation_id, error = %e, "conversation worker failed");
            }
        })
    }));

    let tokens = Arc::new(TokenService::new(
        &config.auth.jwt_secret,
        config.auth.token_ttl_secs,
    ));
    let otp = Arc::new(DevOtpProvider::new(config.auth.dev_otp_code.clone()));
    let users = Arc::new(UserService::new(db.clone(), otp));

    Arc::new(AppState {
        db,
        manager,
        registry,
        users,
        tokens,
    })
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/auth/otp/request", post(auth_routes::request_otp))
        .route("/auth/otp/verify", post(auth_routes::verify_otp))
        .route("/ws", get(ws_upgrade))
        .route("/conversations/{conv_id}/messages", get(history))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// Bind and serve until the shutdown token fires.
pub async fn serve(
    state: Arc<AppState>,
    bind: &str,
    port: u16,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = format!("{bind}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr, "murmur gateway listening");
    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    conv_id: String,
    /// `"1"` forces identity rotation.
    #[serde(default)]
    new: Option<String>,
}

async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let force_new = query.new.as_deref() == Some("1");
    ws.max_message_size(MAX_PAYLOAD_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state, user_id, query.conv_id, force_new))
}

async fn history(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(conv_id): Path<String>,
) -> Result<Json<Vec<MessageFrame>>, ApiError> {
    let joined_at = match Uuid::parse_str(&conv_id) {
        Ok(conversation_id) => state.manager.joined_at_for(&user_id, conversation_id).await?,
        Err(_) => None,
    };
    let messages = state.manager.handle_history(&conv_id, joined_at).await?;
    let frames = messages
        .into_iter()
        .map(|m| {
            MessageFrame::new(
                m.conversation_id.to_string(),
                m.sender_id.to_string(),
                m.seq,
                m.payload,
                m.created_at,
            )
        })
        .collect();
    Ok(Json(frames))
}
