/// Request extractors that reject with the moderation error shape
use crate::{
    db::PageRequest,
    error::ModerationError,
    moderation::types::ContentRef,
};
use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Path, Query, Request},
    http::request::Parts,
    Json,
};
use serde::{de::DeserializeOwned, Deserialize};

/// JSON request body; malformed bodies and unknown enum names are `InvalidRequest`
#[derive(Debug, Clone)]
pub struct Payload<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Payload<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ModerationError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ModerationError::InvalidArgument(e.body_text()))?;
        Ok(Payload(value))
    }
}

/// Query string parameters
#[derive(Debug, Clone)]
pub struct Params<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for Params<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ModerationError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| ModerationError::InvalidArgument(e.body_text()))?;
        Ok(Params(value))
    }
}

/// `/content/:content_type/:content_id` path target
#[derive(Debug, Clone, Copy)]
pub struct ContentTarget(pub ContentRef);

#[async_trait]
impl<S> FromRequestParts<S> for ContentTarget
where
    S: Send + Sync,
{
    type Rejection = ModerationError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path((kind, id)) = Path::<(String, String)>::from_request_parts(parts, state)
            .await
            .map_err(|e| ModerationError::InvalidArgument(e.body_text()))?;
        let id = id
            .parse::<i64>()
            .map_err(|_| ModerationError::InvalidArgument(format!("Invalid content id: {}", id)))?;
        Ok(ContentTarget(ContentRef::parse(&kind, id)?))
    }
}

/// `page` / `pageSize` query parameters
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl PageQuery {
    pub fn request(&self) -> PageRequest {
        PageRequest::new(self.page, self.page_size)
    }
}

/// Body naming the user an item is assigned to
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AssignRequest {
    pub assignee_id: i64,
}
