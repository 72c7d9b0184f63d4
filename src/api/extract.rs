use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tracing::debug;

use super::AppState;
use crate::auth::Actor;
use crate::error::CmsError;
use crate::models::User;
use crate::users::find_user;

/// 已登录的用户，从 `Authorization: Bearer <token>` 解析
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl AuthUser {
    pub fn actor(&self) -> Actor {
        Actor::from(&self.0)
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = CmsError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| CmsError::Unauthorized("Authentication required".to_string()))?;
        let claims = state.tokens.verify(token)?;
        let user_id = claims.user_id()?;

        let user = state.db.call(move |conn| find_user(conn, user_id)).await?;
        match user {
            Some(user) if user.is_active => Ok(AuthUser(user)),
            _ => {
                debug!(user_id, "令牌对应的用户不存在或已停用");
                Err(CmsError::Unauthorized("User not found or inactive".to_string()))
            }
        }
    }
}
