use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Json,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{delete, get, post},
};
use application::{CommandOutcome, Subscription};
use domain::tag::TagTable;
use domain::{GatewayEvent, Permission, Requester};
use futures::Stream;
use serde::Deserialize;
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/connect", post(connect))
        .route("/api/tags", post(add_tag))
        .route("/api/tags/{name}", delete(delete_tag))
        .route("/api/write", post(write_tag))
        .route("/api/nodered/sync", post(sync_flow))
        .route("/api/nodered/import", post(import_flow))
        .route("/api/mqtt/connect", post(mqtt_connect))
        .route("/api/audit-logs", get(get_audit_logs))
        .route("/api/history", get(get_history))
        .route("/api/events", get(sse_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .fallback_service(
            tower_http::services::ServeDir::new("static")
                .not_found_service(tower_http::services::ServeFile::new("static/index.html")),
        )
        .with_state(state)
}

/// Commands answer 200 on success and 400 otherwise; the body always
/// carries `{success, message}`.
fn reply(outcome: CommandOutcome) -> (StatusCode, Json<CommandOutcome>) {
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(outcome))
}

fn requester(user: Option<Requester>) -> Requester {
    user.unwrap_or_else(Requester::anonymous)
}

async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.service.status().await)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectRequest {
    protocol: Option<String>,
    endpoint_url: Option<String>,
    /// Dashboard hints; logged, not used for routing
    device_type: Option<String>,
    device_model: Option<String>,
    user: Option<Requester>,
}

async fn connect(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConnectRequest>,
) -> impl IntoResponse {
    if req.device_type.is_some() || req.device_model.is_some() {
        debug!(
            device_type = ?req.device_type,
            device_model = ?req.device_model,
            "Connect request carries device hints"
        );
    }
    let outcome = state
        .service
        .connect(
            &requester(req.user),
            req.protocol.as_deref(),
            req.endpoint_url.as_deref(),
        )
        .await;
    reply(outcome)
}

#[derive(Debug, Default, Deserialize)]
struct AddTagRequest {
    #[serde(default)]
    name: String,
    #[serde(default, alias = "nodeId")]
    address: String,
    datatype: Option<String>,
    user: Option<Requester>,
}

async fn add_tag(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddTagRequest>,
) -> impl IntoResponse {
    let outcome = state
        .service
        .add_tag(
            &requester(req.user),
            &req.name,
            &req.address,
            req.datatype.as_deref(),
        )
        .await;
    reply(outcome)
}

#[derive(Debug, Default, Deserialize)]
struct DeleteQuery {
    user: Option<String>,
    /// Comma-separated, e.g. `read_tag,delete_tag`
    permissions: Option<String>,
}

impl DeleteQuery {
    fn requester(&self) -> Requester {
        let Some(user) = self.user.as_deref().filter(|u| !u.is_empty()) else {
            return Requester::anonymous();
        };
        let permissions = self
            .permissions
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter(|p| !p.trim().is_empty())
            .map(Permission::parse)
            .collect();
        Requester::new(user, permissions)
    }
}

async fn delete_tag(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> impl IntoResponse {
    let outcome = state
        .service
        .delete_tag(&query.requester(), &name)
        .await;
    reply(outcome)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteRequest {
    #[serde(default)]
    tag_name: String,
    #[serde(default)]
    value: Value,
    user: Option<Requester>,
}

async fn write_tag(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WriteRequest>,
) -> impl IntoResponse {
    let outcome = state
        .service
        .write(&requester(req.user), &req.tag_name, &req.value)
        .await;
    reply(outcome)
}

#[derive(Debug, Default, Deserialize)]
struct SyncRequest {
    /// PLC address baked into the flow
    ip: Option<String>,
    tags: Option<TagTable>,
    user: Option<Requester>,
}

async fn sync_flow(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SyncRequest>,
) -> impl IntoResponse {
    let outcome = state
        .service
        .sync_flow(&requester(req.user), req.tags, req.ip.as_deref())
        .await;
    reply(outcome)
}

#[derive(Debug, Default, Deserialize)]
struct ImportRequest {
    user: Option<Requester>,
}

async fn import_flow(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ImportRequest>,
) -> impl IntoResponse {
    reply(state.service.import_flow(&requester(req.user)).await)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MqttConnectRequest {
    broker_url: Option<String>,
    topic: Option<String>,
}

async fn mqtt_connect(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MqttConnectRequest>,
) -> impl IntoResponse {
    let outcome = state
        .service
        .mqtt_connect(req.broker_url.as_deref(), req.topic.as_deref())
        .await;
    reply(outcome)
}

#[derive(Debug, Deserialize)]
struct Limit {
    limit: Option<usize>,
}

async fn get_audit_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<Limit>,
) -> impl IntoResponse {
    match state.audit.recent(query.limit.unwrap_or(100)).await {
        Ok(entries) => (StatusCode::OK, Json(json!(entries))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

async fn get_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<Limit>,
) -> impl IntoResponse {
    match state.history.tail(query.limit.unwrap_or(100)).await {
        Ok(rows) => (StatusCode::OK, Json(json!(rows))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

fn to_sse(event: &GatewayEvent) -> Result<Event, axum::Error> {
    Event::default().event(event.name()).json_data(event.payload())
}

/// Current status, data and link state first, then live events.
async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let active = state.service.router().active();
    let Subscription { replay, receiver } = state.hub.subscribe_to(active.as_ref());

    let live = BroadcastStream::new(receiver).filter_map(|msg| match msg {
        Ok(event) => Some(event),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(skipped, "Event subscriber lagging, dropped events");
            None
        }
    });
    let stream = tokio_stream::iter(replay)
        .chain(live)
        .map(|event| to_sse(&event));
    let stream = futures::StreamExt::take_until(stream, state.shutdown.clone().cancelled_owned());

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
