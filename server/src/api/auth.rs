//! Caller identity extractors.
//!
//! Authentication itself happens upstream. The gateway forwards the buyer id
//! in `X-User-Id`; admin calls carry `Authorization: Bearer <token>`.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use flashsale_core::UserId;
use flashsale_web::AppError;
use std::sync::Arc;

/// Header carrying the authenticated buyer id.
pub const USER_ID_HEADER: &str = "X-User-Id";

/// Authenticated buyer.
#[derive(Debug, Clone, Copy)]
pub struct BuyerId(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for BuyerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .map(|id| Self(UserId::new(id)))
            .ok_or_else(|| AppError::unauthorized("Missing or invalid buyer identity"))
    }
}

/// Configured admin token.
#[derive(Clone)]
pub struct AdminSecret(Arc<str>);

impl AdminSecret {
    /// Wrap the configured token.
    #[must_use]
    pub fn new(token: &str) -> Self {
        Self(Arc::from(token))
    }

    fn matches(&self, presented: &str) -> bool {
        constant_time_eq::constant_time_eq(presented.as_bytes(), self.0.as_bytes())
    }
}

impl std::fmt::Debug for AdminSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AdminSecret(..)")
    }
}

/// Proof that the request carried the admin token.
///
/// Missing token is `401`, a wrong one `403`.
#[derive(Debug, Clone, Copy)]
pub struct AdminToken;

#[async_trait]
impl<S> FromRequestParts<S> for AdminToken
where
    AdminSecret: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let presented = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::unauthorized("Missing admin bearer token"))?;

        if AdminSecret::from_ref(state).matches(presented.trim()) {
            Ok(Self)
        } else {
            tracing::warn!("Rejected admin call with invalid token");
            Err(AppError::forbidden("Invalid admin token"))
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    #[derive(Clone)]
    struct State(AdminSecret);

    impl FromRef<State> for AdminSecret {
        fn from_ref(state: &State) -> Self {
            state.0.clone()
        }
    }

    fn parts(name: &str, value: &str) -> Parts {
        let (parts, ()) = Request::builder()
            .header(name, value)
            .body(())
            .expect("Valid request")
            .into_parts();
        parts
    }

    #[tokio::test]
    async fn buyer_id_from_header() {
        let mut parts = parts(USER_ID_HEADER, "42");
        let buyer = BuyerId::from_request_parts(&mut parts, &()).await.expect("buyer");
        assert_eq!(buyer.0, UserId::new(42));
    }

    #[tokio::test]
    async fn non_positive_buyer_id_is_unauthorized() {
        for value in ["0", "-3", "abc"] {
            let mut parts = parts(USER_ID_HEADER, value);
            let err = BuyerId::from_request_parts(&mut parts, &())
                .await
                .expect_err("rejected");
            assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn admin_token_missing_wrong_and_right() {
        let state = State(AdminSecret::new("s3cret"));

        let (mut missing, ()) = Request::builder().body(()).expect("Valid request").into_parts();
        let err = AdminToken::from_request_parts(&mut missing, &state)
            .await
            .expect_err("missing");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let mut wrong = parts("Authorization", "Bearer nope");
        let err = AdminToken::from_request_parts(&mut wrong, &state)
            .await
            .expect_err("wrong");
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let mut right = parts("Authorization", "Bearer s3cret");
        assert!(AdminToken::from_request_parts(&mut right, &state).await.is_ok());
    }
}
