//! Request extractors that resolve the caller before a handler runs

use crate::error::AppError;
use crate::services::AuthenticatedIdentity;
use crate::state::AppState;
use actix_web::{dev::Payload, http::header, web, Error, FromRequest, HttpRequest};
use futures::future::LocalBoxFuture;
use uuid::Uuid;

/// An authenticated caller, resolved from the `Authorization: Bearer` header
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub display_name: String,
}

impl From<AuthenticatedIdentity> for User {
    fn from(identity: AuthenticatedIdentity) -> Self {
        Self {
            id: identity.user_id,
            display_name: identity.display_name,
        }
    }
}

impl FromRequest for User {
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let resolver = req
            .app_data::<web::Data<AppState>>()
            .map(|state| state.deps.identity.clone());
        let token = bearer_token(req);

        Box::pin(async move {
            let resolver = resolver.ok_or(AppError::Internal)?;
            let token = token.ok_or(AppError::MissingCredential)?;
            let identity = resolver.resolve(&token).await?;
            Ok(User::from(identity))
        })
    }
}

pub fn bearer_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
