use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{CmsError, Result};
use crate::models::{Role, User};

/// JWT 载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// 用户 ID
    pub sub: String,
    pub username: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn new(user: &User, expires_in: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: user.id.to_string(),
            username: user.username.clone(),
            role: user.role,
            iat: now.timestamp(),
            exp: (now + expires_in).timestamp(),
        }
    }

    pub fn user_id(&self) -> Result<i64> {
        self.sub
            .parse()
            .map_err(|_| CmsError::Unauthorized("Invalid token subject".to_string()))
    }
}

/// 令牌签发器
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation: Validation::default(),
            ttl: Duration::hours(ttl_hours.max(1)),
        }
    }

    /// 为用户签发访问令牌
    pub fn issue(&self, user: &User) -> Result<String> {
        let claims = Claims::new(user, self.ttl);
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| CmsError::Internal(format!("token encoding failed: {e}")))
    }

    /// 校验令牌（签名与过期时间）
    pub fn verify(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| CmsError::Unauthorized("Invalid or expired token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;

    fn user() -> User {
        let now = Utc::now();
        User {
            id: 42,
            username: "editor".into(),
            email: "editor@example.com".into(),
            password_hash: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            role: Role::Editor,
            avatar_url: None,
            bio: None,
            website: None,
            social_links: Document::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_issue_and_verify() {
        let issuer = TokenIssuer::new(b"secret", 24);
        let token = issuer.issue(&user()).unwrap();
        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.user_id().unwrap(), 42);
        assert_eq!(claims.role, Role::Editor);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = TokenIssuer::new(b"secret", 24).issue(&user()).unwrap();
        let err = TokenIssuer::new(b"other", 24).verify(&token).unwrap_err();
        assert!(matches!(err, CmsError::Unauthorized(_)));
    }

    #[test]
    fn test_expired_token_rejected() {
        let issuer = TokenIssuer::new(b"secret", 24);
        let mut claims = Claims::new(&user(), Duration::hours(1));
        claims.iat -= 7200;
        claims.exp -= 7200;
        let token = encode(&Header::default(), &claims, &issuer.encoding_key).unwrap();
        assert!(issuer.verify(&token).is_err());
    }
}
