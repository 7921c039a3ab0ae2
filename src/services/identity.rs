//! Credential to identity resolution for realtime connections and HTTP routes.
//!
//! Credentials are RS256 access tokens. Only validation happens here; tokens
//! are issued elsewhere.

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    pub user_id: Uuid,
    /// Shown to peers in typing indicators
    pub display_name: String,
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, credential: &str) -> AppResult<AuthenticatedIdentity>;
}

/// Claims this service reads from an access token
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

pub struct JwtIdentityResolver {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityResolver {
    pub fn from_public_key_pem(public_key_pem: &str) -> AppResult<Self> {
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| AppError::Config(format!("failed to parse RSA public key: {e}")))?;

        // RS256 only; symmetric algorithms are never accepted
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;

        Ok(Self {
            decoding_key,
            validation,
        })
    }

    fn validate(&self, token: &str) -> AppResult<AuthenticatedIdentity> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "token validation failed");
            AppError::Unauthorized
        })?;
        let claims = data.claims;

        if claims.token_type.as_deref() == Some("refresh") {
            return Err(AppError::Unauthorized);
        }

        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::Unauthorized)?;
        let display_name = claims
            .display_name
            .or(claims.username)
            .unwrap_or_else(|| user_id.to_string());

        Ok(AuthenticatedIdentity {
            user_id,
            display_name,
        })
    }
}

#[async_trait]
impl IdentityResolver for JwtIdentityResolver {
    async fn resolve(&self, credential: &str) -> AppResult<AuthenticatedIdentity> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(AppError::MissingCredential);
        }
        self.validate(credential)
    }
}
