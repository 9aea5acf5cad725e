use std::convert::Infallible;
use std::sync::Arc;

use async_stream::stream as async_stream;
use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
    routing::get,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::application::usecases::InventoryService;
use crate::application::{AppError, EntryQuery};
use crate::domain::{EntryDraft, EntryPatch, EntryType, EventMessage};
use crate::infrastructure::entry_broker::{EntryEventBroker, Subscriber};

#[derive(Clone)]
pub struct ApiState {
    pub inventory: InventoryService,
    pub broker: Arc<EntryEventBroker>,
    pub api_token: Option<String>,
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/entries", get(list_entries).post(create_entry))
        .route(
            "/api/v1/entries/{id}",
            get(get_entry).patch(update_entry).delete(delete_entry),
        )
        .route("/api/v1/entries/stream", get(stream_entries_ws))
        .route("/api/v1/entries/events", get(stream_entries_sse))
        .route("/api/v1/realtime/stats", get(broker_stats))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

#[derive(Deserialize)]
struct ListQuery {
    r#type: Option<String>, // "raw" | "sfg" | "fg"
    limit: Option<usize>,
    token: Option<String>,
}

async fn list_entries(
    State(state): State<ApiState>,
    Query(q): Query<ListQuery>,
    headers: HeaderMap,
) -> Response {
    if let Err((code, msg)) = check_auth(&headers, q.token.as_deref(), &state.api_token) {
        return (code, msg).into_response();
    }
    let entry_type = match q.r#type.as_deref() {
        Some(t) => match t.parse::<EntryType>() {
            Ok(et) => Some(et),
            Err(e) => return (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response(),
        },
        None => None,
    };
    let query = EntryQuery {
        entry_type,
        limit: q.limit.map(|l| l.min(1000)),
    };
    match state.inventory.list_entries(query).await {
        Ok(v) => Json(v).into_response(),
        Err(e) => error_response(e),
    }
}

async fn create_entry(
    State(state): State<ApiState>,
    Query(q): Query<TokenQuery>,
    headers: HeaderMap,
    Json(draft): Json<EntryDraft>,
) -> Response {
    if let Err((code, msg)) = check_auth(&headers, q.token.as_deref(), &state.api_token) {
        return (code, msg).into_response();
    }
    // identity comes from the session layer in front of us
    let user = headers
        .get("x-user-name")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    match state.inventory.create_entry(draft, user).await {
        Ok(entry) => (StatusCode::CREATED, Json(entry)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_entry(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Query(q): Query<TokenQuery>,
    headers: HeaderMap,
) -> Response {
    if let Err((code, msg)) = check_auth(&headers, q.token.as_deref(), &state.api_token) {
        return (code, msg).into_response();
    }
    match state.inventory.get_entry(id).await {
        Ok(entry) => Json(entry).into_response(),
        Err(e) => error_response(e),
    }
}

async fn update_entry(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Query(q): Query<TokenQuery>,
    headers: HeaderMap,
    Json(patch): Json<EntryPatch>,
) -> Response {
    if let Err((code, msg)) = check_auth(&headers, q.token.as_deref(), &state.api_token) {
        return (code, msg).into_response();
    }
    match state.inventory.update_entry(id, patch).await {
        Ok(entry) => Json(entry).into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_entry(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Query(q): Query<TokenQuery>,
    headers: HeaderMap,
) -> Response {
    if let Err((code, msg)) = check_auth(&headers, q.token.as_deref(), &state.api_token) {
        return (code, msg).into_response();
    }
    match state.inventory.delete_entry(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn broker_stats(
    State(state): State<ApiState>,
    Query(q): Query<TokenQuery>,
    headers: HeaderMap,
) -> Response {
    if let Err((code, msg)) = check_auth(&headers, q.token.as_deref(), &state.api_token) {
        return (code, msg).into_response();
    }
    Json(state.broker.stats()).into_response()
}

async fn stream_entries_ws(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Query(q): Query<TokenQuery>,
    headers: HeaderMap,
) -> Response {
    // browsers can't set headers on an upgrade, so the token may come as ?token=
    let authorized = check_auth(&headers, q.token.as_deref(), &state.api_token).is_ok();
    let broker = state.broker.clone();
    ws.on_upgrade(move |socket| handle_entry_stream(socket, broker, authorized))
}

async fn handle_entry_stream(mut socket: WebSocket, broker: Arc<EntryEventBroker>, authorized: bool) {
    if !authorized {
        close_with(&mut socket, close_code::POLICY, "unauthorized").await;
        return;
    }

    let mut subscriber = match broker.subscribe().await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "entry stream rejected");
            close_with(&mut socket, close_code::ERROR, "stream unavailable").await;
            return;
        }
    };
    let id = subscriber.id();
    tracing::info!(subscriber = id, "entry stream opened");

    forward_events(&mut socket, &mut subscriber).await;

    broker.unsubscribe(&subscriber).await;
    tracing::info!(
        subscriber = id,
        dropped = subscriber.dropped(),
        "entry stream closed"
    );
}

/// Pump events to the peer until it goes away. Inbound frames only serve
/// as a liveness signal; their content is ignored.
async fn forward_events(socket: &mut WebSocket, subscriber: &mut Subscriber) {
    if send_event(socket, &EventMessage::Connected).await.is_err() {
        return;
    }
    let id = subscriber.id();

    loop {
        tokio::select! {
            event = subscriber.recv() => {
                let Some(event) = event else {
                    // broker shut down
                    close_with(socket, close_code::AWAY, "server shutting down").await;
                    break;
                };
                if send_event(socket, &event).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(subscriber = id, error = %e, "entry stream read failed");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

async fn send_event(socket: &mut WebSocket, event: &EventMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    socket.send(Message::Text(json.into())).await
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

async fn stream_entries_sse(
    State(state): State<ApiState>,
    Query(q): Query<TokenQuery>,
    headers: HeaderMap,
) -> Response {
    if let Err((code, msg)) = check_auth(&headers, q.token.as_deref(), &state.api_token) {
        return (code, msg).into_response();
    }

    let mut subscriber = match state.broker.subscribe().await {
        Ok(s) => s,
        Err(e) => return error_response(AppError::from(e)),
    };

    // dropping the stream drops the subscriber, which unregisters it
    let out_stream = async_stream! {
        yield Ok::<SseEvent, Infallible>(to_sse(&EventMessage::Connected));
        while let Some(event) = subscriber.recv().await {
            yield Ok::<SseEvent, Infallible>(to_sse(&event));
        }
    };

    Sse::new(out_stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn to_sse(event: &EventMessage) -> SseEvent {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    SseEvent::default().event(event.kind()).data(data)
}

fn error_response(err: AppError) -> Response {
    let code = match &err {
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AppError::Broker(_) => StatusCode::SERVICE_UNAVAILABLE,
        AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if code.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }
    (code, format!("error: {err}")).into_response()
}

pub fn check_auth(
    headers: &HeaderMap,
    query_token: Option<&str>,
    token: &Option<String>,
) -> Result<(), (StatusCode, String)> {
    let Some(expected) = token else {
        return Ok(());
    };
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if bearer == Some(expected.as_str()) || query_token == Some(expected.as_str()) {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "unauthorized".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn open_when_no_token_configured() {
        assert!(check_auth(&HeaderMap::new(), None, &None).is_ok());
    }

    #[test]
    fn accepts_bearer_header_or_query_token() {
        let expected = Some("s3cret".to_string());
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer s3cret"));
        assert!(check_auth(&headers, None, &expected).is_ok());
        assert!(check_auth(&HeaderMap::new(), Some("s3cret"), &expected).is_ok());
    }

    #[test]
    fn rejects_wrong_token() {
        let expected = Some("s3cret".to_string());
        let err = check_auth(&HeaderMap::new(), Some("nope"), &expected).unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }
}
