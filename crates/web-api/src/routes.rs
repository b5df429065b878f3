use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    http::StatusCode,
    response::Response,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use application::{ChatMessageView, CreateRoomRequest, HistoryQuery, PostMessageRequest};
use domain::{ChatRoom, ConversationKey, LocationId, RoomId};

use crate::{
    error::ApiError,
    extract::{ApiJson, ApiQuery},
    identity::Identity,
    state::AppState,
    ws_connection::{reject, LiveConnection},
};

#[derive(Debug, Deserialize)]
struct PostMessagePayload {
    #[serde(alias = "message")]
    text: String,
}

#[derive(Debug, Deserialize)]
struct CreateRoomPayload {
    name: String,
    #[serde(default)]
    category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct HistoryParams {
    limit: Option<u32>,
    before: Option<DateTime<Utc>>,
}

impl From<HistoryParams> for HistoryQuery {
    fn from(params: HistoryParams) -> Self {
        HistoryQuery {
            limit: params.limit,
            before: params.before,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/locations/{location_id}/messages",
            get(location_history).post(post_location_message),
        )
        .route("/locations/{location_id}/ws", get(location_socket))
        .route("/rooms", get(list_rooms).post(create_room))
        .route("/rooms/{room_id}", get(get_room).delete(delete_room))
        .route(
            "/rooms/{room_id}/messages",
            get(room_history).post(post_room_message),
        )
        .route("/rooms/{room_id}/ws", get(room_socket))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn post_location_message(
    State(state): State<AppState>,
    Path(location_id): Path<String>,
    Identity(sender): Identity,
    ApiJson(payload): ApiJson<PostMessagePayload>,
) -> Result<(StatusCode, Json<ChatMessageView>), ApiError> {
    let location_id = LocationId::parse(&location_id)?;
    let view = state
        .chat_service
        .post_location_message(
            location_id,
            PostMessageRequest {
                sender,
                text: payload.text,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(view)))
}

async fn location_history(
    State(state): State<AppState>,
    Path(location_id): Path<String>,
    ApiQuery(params): ApiQuery<HistoryParams>,
) -> Result<Json<Vec<ChatMessageView>>, ApiError> {
    let location_id = LocationId::parse(&location_id)?;
    let views = state
        .chat_service
        .location_history(location_id, params.into())
        .await?;

    Ok(Json(views))
}

async fn list_rooms(State(state): State<AppState>) -> Result<Json<Vec<ChatRoom>>, ApiError> {
    Ok(Json(state.room_service.list_rooms().await?))
}

async fn create_room(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CreateRoomPayload>,
) -> Result<(StatusCode, Json<ChatRoom>), ApiError> {
    let room = state
        .room_service
        .create_room(CreateRoomRequest {
            name: payload.name,
            category: payload.category,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(room)))
}

async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<ChatRoom>, ApiError> {
    let room_id = RoomId::parse(&room_id)?;
    Ok(Json(state.room_service.get_room(room_id).await?))
}

async fn delete_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let room_id = RoomId::parse(&room_id)?;
    state.room_service.delete_room(room_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn post_room_message(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Identity(sender): Identity,
    ApiJson(payload): ApiJson<PostMessagePayload>,
) -> Result<(StatusCode, Json<ChatMessageView>), ApiError> {
    let room_id = RoomId::parse(&room_id)?;
    let view = state
        .chat_service
        .post_room_message(
            room_id,
            PostMessageRequest {
                sender,
                text: payload.text,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(view)))
}

async fn room_history(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    ApiQuery(params): ApiQuery<HistoryParams>,
) -> Result<Json<Vec<ChatMessageView>>, ApiError> {
    let room_id = RoomId::parse(&room_id)?;
    let views = state
        .chat_service
        .room_history(room_id, params.into())
        .await?;

    Ok(Json(views))
}

async fn location_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(location_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let Ok(location_id) = LocationId::parse(&location_id) else {
            return reject(socket, "invalid conversation id").await;
        };
        if let Err(err) = state
            .chat_service
            .ensure_conversation(ConversationKey::Location(location_id))
            .await
        {
            tracing::debug!(%location_id, error = %err, "location socket refused");
            return reject(socket, "conversation not found").await;
        }
        let registry = state.chat_service.location_connections().clone();
        LiveConnection::new(state.chat_service.clone(), registry, location_id)
            .run(socket)
            .await;
    })
}

async fn room_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let Ok(room_id) = RoomId::parse(&room_id) else {
            return reject(socket, "invalid conversation id").await;
        };
        if let Err(err) = state
            .chat_service
            .ensure_conversation(ConversationKey::Room(room_id))
            .await
        {
            tracing::debug!(%room_id, error = %err, "room socket refused");
            return reject(socket, "conversation not found").await;
        }
        let registry = state.chat_service.room_connections().clone();
        LiveConnection::new(state.chat_service.clone(), registry, room_id)
            .run(socket)
            .await;
    })
}
