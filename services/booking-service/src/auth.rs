//! Bearer token authentication
//!
//! Tokens are HS256 JWTs issued by the platform's auth service. Only `sub`
//! (account id) and `role` are read here.

use crate::errors::ServiceError;
use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use booking_core::{AccountId, Role};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::future::{ready, Ready};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: usize,
}

/// Signing keys, registered as app data
pub struct JwtKeys {
    decoding: DecodingKey,
    encoding: EncodingKey,
}

impl JwtKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Issue a token, used by operator tooling and tests
    pub fn issue(&self, account_id: AccountId, role: Role, ttl_secs: i64) -> Result<String, ServiceError> {
        let exp = (chrono::Utc::now().timestamp() + ttl_secs).max(0) as usize;
        let claims = Claims {
            sub: account_id.to_string(),
            role,
            exp,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ServiceError::Internal(format!("Token encoding failed: {}", e)))
    }

    fn verify(&self, token: &str) -> Result<Claims, ServiceError> {
        decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
            .map_err(|err| {
                tracing::warn!("JWT validation failed: {:?}", err);
                ServiceError::Unauthorized("Invalid or expired token".to_string())
            })
    }
}

/// Authenticated caller
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub account_id: AccountId,
    pub role: Role,
}

impl AuthUser {
    pub fn require(&self, role: Role) -> Result<(), ServiceError> {
        if self.role == role {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "This action requires the {} role",
                role.as_str()
            )))
        }
    }
}

impl FromRequest for AuthUser {
    type Error = ServiceError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authenticate(req))
    }
}

fn authenticate(req: &HttpRequest) -> Result<AuthUser, ServiceError> {
    let keys = req
        .app_data::<web::Data<JwtKeys>>()
        .ok_or_else(|| ServiceError::Internal("Authentication is not configured".to_string()))?;

    let header = req
        .headers()
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ServiceError::Unauthorized("Missing Authorization header".to_string()))?;

    let token = header
        .strip_prefix("Bearer ")
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ServiceError::Unauthorized("Invalid auth header format".to_string()))?;

    let claims = keys.verify(token)?;
    let account_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| ServiceError::Unauthorized("Invalid token subject".to_string()))?;

    Ok(AuthUser {
        account_id,
        role: claims.role,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_token_roundtrip() {
        let keys = web::Data::new(JwtKeys::new("secret"));
        let id = Uuid::new_v4();
        let token = keys.issue(id, Role::Teacher, 60).unwrap();

        let req = TestRequest::default()
            .app_data(keys.clone())
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .to_http_request();
        let user = authenticate(&req).unwrap();
        assert_eq!(user.account_id, id);
        assert_eq!(user.role, Role::Teacher);
        assert!(user.require(Role::Admin).is_err());
    }

    #[test]
    fn test_rejects_missing_and_foreign_tokens() {
        let keys = web::Data::new(JwtKeys::new("secret"));
        let req = TestRequest::default().app_data(keys.clone()).to_http_request();
        assert!(matches!(authenticate(&req), Err(ServiceError::Unauthorized(_))));

        let foreign = JwtKeys::new("other")
            .issue(Uuid::new_v4(), Role::Student, 60)
            .unwrap();
        let req = TestRequest::default()
            .app_data(keys)
            .insert_header(("Authorization", format!("Bearer {}", foreign)))
            .to_http_request();
        assert!(matches!(authenticate(&req), Err(ServiceError::Unauthorized(_))));
    }
}
