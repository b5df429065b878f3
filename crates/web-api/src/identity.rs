use axum::{extract::FromRequestParts, http::request::Parts};
use domain::UserId;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// 请求方身份：来自 `X-User-Id` 头，缺省为匿名。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity(pub Option<UserId>);

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(USER_ID_HEADER) else {
            return Ok(Identity(None));
        };
        let value = value
            .to_str()
            .map_err(|_| ApiError::bad_request("X-User-Id header is not valid text"))?;
        Ok(Identity(Some(UserId::parse(value)?)))
    }
}
