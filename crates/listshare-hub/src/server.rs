//! HTTP server setup and routing

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::{
        StatusCode,
        header::{ACCEPT, CONTENT_TYPE, ORIGIN},
    },
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::context::{HubConfig, HubContext, SharedContext};
use crate::error::{Error, Result};
use crate::model::{CreateTodoListRequest, PublicTodoList, UpdateTodoListRequest};
use crate::registry::Connection;

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    storage: &'static str,
    websocket_enabled: bool,
    default_expiration_hours: i64,
    connections: usize,
}

/// Response to a successful create. The only time the edit token is sent.
#[derive(Serialize)]
struct CreateTodoListResponse<'a> {
    id: &'a str,
    edit_token: &'a str,
    todo_list: PublicTodoList<'a>,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
struct UpdateParams {
    token: Option<String>,
    client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebSocketParams {
    client_id: Option<String>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Conflict => StatusCode::CONFLICT,
            Error::FeatureUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Error::Store(_) | Error::Serialization(_) | Error::Io(_) | Error::Server(_) => {
                error!(error = %self, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        error_response(status, self.to_string())
    }
}

fn invalid_body(rejection: JsonRejection) -> Error {
    debug!(error = %rejection, "Rejected request body");
    Error::Validation("Invalid request body".to_string())
}

/// Health check endpoint
async fn health(State(ctx): State<SharedContext>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        storage: ctx.config().storage_kind(),
        websocket_enabled: ctx.registry().is_enabled(),
        default_expiration_hours: ctx.config().default_expiration_hours,
        connections: ctx.registry().connection_count().await,
    })
}

/// Create a todo list
async fn create_todo_list(
    State(ctx): State<SharedContext>,
    body: std::result::Result<Json<CreateTodoListRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(request) = body.map_err(invalid_body)?;

    let created = ctx
        .service()
        .create(request.expiration_hours, request.items)
        .await?;

    let response = CreateTodoListResponse {
        id: &created.todo_list.id,
        edit_token: &created.edit_token,
        todo_list: created.todo_list.public(),
    };
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// Get a todo list by ID
async fn get_todo_list(
    State(ctx): State<SharedContext>,
    Path(id): Path<String>,
) -> Result<Response> {
    let todo_list = ctx.service().get(&id).await?;
    Ok(Json(todo_list.public()).into_response())
}

/// Replace a todo list's items
///
/// Requires the edit token in `?token=`. `?client_id=` names the editor's
/// own WebSocket session so it is left out of the broadcast.
async fn update_todo_list(
    State(ctx): State<SharedContext>,
    Path(id): Path<String>,
    Query(params): Query<UpdateParams>,
    body: std::result::Result<Json<UpdateTodoListRequest>, JsonRejection>,
) -> Result<Response> {
    let token = params
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::Validation("ID and edit token are required".to_string()))?;
    let Json(request) = body.map_err(invalid_body)?;
    let client_id = params.client_id.unwrap_or_default();

    let todo_list = ctx
        .service()
        .update(&id, &token, request.items, &client_id)
        .await?;

    Ok(Json(todo_list.public()).into_response())
}

/// 404 handler
async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not found")
}

/// WebSocket upgrade handler for live updates of one todo list.
async fn ws_handler(
    State(ctx): State<SharedContext>,
    Path(todo_id): Path<String>,
    Query(params): Query<WebSocketParams>,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if !ctx.registry().is_enabled() {
        info!(todo_id = %todo_id, "WebSocket connection rejected: WebSocket is disabled");
        return Error::FeatureUnavailable.into_response();
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let Some(session_id) = params.client_id.filter(|id| !id.is_empty()) else {
        warn!(todo_id = %todo_id, "Missing client ID for WebSocket connection");
        return error_response(StatusCode::BAD_REQUEST, "client_id is required");
    };

    ws.on_upgrade(move |socket| handle_websocket(socket, ctx, todo_id, session_id))
}

/// Handle an upgraded WebSocket connection.
///
/// Outbound frames flow from the registry through the connection's queue to
/// a writer task. This task only reads; inbound frames are ignored, and a
/// close, read error or failed write ends the session.
///
/// The handler keeps its own handle on the queue, so being replaced in the
/// registry by a newer socket with the same session id does not end this
/// one; it just stops receiving broadcasts.
async fn handle_websocket(
    socket: WebSocket,
    ctx: SharedContext,
    todo_id: String,
    session_id: String,
) {
    let (mut sink, mut stream) = socket.split();
    let (connection, mut outbound) = Connection::new(session_id.clone(), todo_id.clone());

    if let Err(e) = ctx.service().join(connection.clone()).await {
        warn!(session_id = %session_id, error = %e, "Failed to register WebSocket client");
        return;
    }

    let writer_session = session_id.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                debug!(session_id = %writer_session, error = %e, "WebSocket write failed");
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(session_id = %session_id, error = %e, "WebSocket read failed");
                    break;
                }
            },
            _ = &mut writer => break,
        }
    }

    ctx.service().leave_connection(&connection).await;
    writer.abort();
}

/// Build the axum router
pub fn build_router(ctx: SharedContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([ORIGIN, CONTENT_TYPE, ACCEPT]);

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/todos", axum::routing::post(create_todo_list))
        .route(
            "/api/v1/todos/{id}",
            get(get_todo_list).put(update_todo_list),
        )
        // WebSocket endpoint for live updates
        .route("/ws/todos/{id}", get(ws_handler))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(ctx)
}

/// Run the hub server.
///
/// This function blocks until the server is shut down.
pub async fn run_server(config: HubConfig) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let ctx = Arc::new(HubContext::connect(config).await?);

    let router = build_router(ctx);

    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "Hub server listening");

    axum::serve(listener, router)
        .await
        .map_err(|e| Error::Server(e.to_string()))?;

    Ok(())
}
