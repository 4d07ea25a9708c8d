//! Pull endpoints for clients without a live connection.
//!
//! They share the hub's code paths with the duplex channel, so a client
//! that reconnects can reconcile against exactly what live events reported.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use medchat_common::{Message, NewMessage};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::ChatError;
use crate::messaging::SendReceipt;
use crate::storage::MessageFilter;

impl ChatError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotAuthenticated => StatusCode::UNAUTHORIZED,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub code: &'static str,
    pub message: String,
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        if let Self::Storage(err) = &self {
            log::error!("Request failed in the store: {err}");
        }
        let body = ErrorResponse {
            status: "error",
            code: self.code().as_str(),
            message: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ChatError>;

/// `GET /api/messages` query string.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub sender_id: Option<String>,
    pub recipient_id: Option<String>,
    /// Messages where this user is on either side.
    pub user_id: Option<String>,
    /// With `userId`, restricts to the conversation with this user.
    pub with_user_id: Option<String>,
    #[serde(default)]
    pub unread_only: bool,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

impl HistoryQuery {
    fn filter(&self) -> MessageFilter {
        MessageFilter {
            sender_id: self.sender_id.clone(),
            recipient_id: self.recipient_id.clone(),
            participant: self.user_id.clone(),
            counterpart: self.with_user_id.clone(),
            unread_only: self.unread_only,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<Message>,
    pub page: usize,
    pub limit: usize,
}

pub async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let page = state.hub.page(query.page, query.limit)?;
    let messages = state.hub.messages(query.filter(), page).await?;
    Ok(Json(HistoryResponse {
        messages,
        page: page.page,
        limit: page.limit,
    }))
}

pub async fn create_message(
    State(state): State<AppState>,
    Json(new_message): Json<NewMessage>,
) -> ApiResult<(StatusCode, Json<SendReceipt>)> {
    let receipt = state.hub.send_message(new_message).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadBody {
    pub user_id: String,
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Json(body): Json<MarkReadBody>,
) -> ApiResult<Json<Message>> {
    let message = state.hub.mark_read(&message_id, &body.user_id).await?;
    Ok(Json(message))
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountResponse {
    pub user_id: String,
    pub count: u64,
}

pub async fn unread_count(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<UnreadCountResponse>> {
    let count = state.hub.unread_count(&user_id).await?;
    Ok(Json(UnreadCountResponse { user_id, count }))
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceResponse {
    pub user_id: String,
    pub online: bool,
    pub connections: usize,
}

pub async fn presence(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<PresenceResponse> {
    Json(PresenceResponse {
        online: state.hub.is_online(&user_id),
        connections: state.hub.connection_count_for(&user_id),
        user_id,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
    pub online_users: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.hub.stats();
    Json(HealthResponse {
        status: "ok",
        connections: stats.connections,
        online_users: stats.online_users,
    })
}
