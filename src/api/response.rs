//! Success envelope shared by every handler.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query},
    http::{request::Parts, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};

use super::error::ApiError;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;
pub type CreatedResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

pub fn ok<T>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data: Some(data),
        message: None,
    })
}

pub fn created<T>(data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::CREATED, ok(data))
}

pub fn message(message: impl Into<String>) -> Json<ApiResponse<()>> {
    Json(ApiResponse {
        success: true,
        data: None,
        message: Some(message.into()),
    })
}

/// `GET` on a collection: the whole list, or one record when `?id=` is given
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Listing<T> {
    One(T),
    Many(Vec<T>),
}

/// Query accepted by every collection `GET`
#[derive(Debug, Default, Deserialize)]
pub struct IdQuery {
    pub id: Option<String>,
}

/// Record targeted by `PUT`/`DELETE`: the `/:id` segment, else `?id=` on the
/// collection route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for RecordId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Ok(Path(id)) = Path::<String>::from_request_parts(parts, state).await {
            return Ok(RecordId(id));
        }

        let Query(query) = Query::<IdQuery>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        query
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .map(RecordId)
            .ok_or_else(|| ApiError::bad_request("A record id is required, in the path or as ?id="))
    }
}
