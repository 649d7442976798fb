//! Per-call authentication.
//!
//! # Modes
//!
//! - **None**: every call is accepted.
//! - **Token**: the caller must present `authorization: Bearer <token>`
//!   matching the configured secret. The comparison is constant-time.
//! - **Certificate**: the peer chain was already verified by rustls during
//!   the handshake, so calls that reach this layer are accepted.
//!
//! A rejected token is never echoed back. The caller gets a generic
//! `Unauthenticated` status and the details stay in the server log.

use axum::extract::State;
use axum::http::{header, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::rpc::RpcStatus;

/// Predicate run for every call, inside the negotiated transport
#[derive(Clone)]
pub enum Authenticator {
    AllowAll,
    Token(Arc<Vec<u8>>),
    /// Peer certificate verified at the transport layer
    PeerCertificate,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Authenticator::AllowAll => f.write_str("AllowAll"),
            Authenticator::Token(_) => f.write_str("Token(<redacted>)"),
            Authenticator::PeerCertificate => f.write_str("PeerCertificate"),
        }
    }
}

impl Authenticator {
    pub fn token(secret: &str) -> Self {
        Authenticator::Token(Arc::new(secret.as_bytes().to_vec()))
    }

    /// Checks the `authorization` header value of one call.
    pub fn check(&self, authorization: Option<&[u8]>) -> Result<(), RpcStatus> {
        let expected = match self {
            Authenticator::AllowAll | Authenticator::PeerCertificate => return Ok(()),
            Authenticator::Token(expected) => expected,
        };

        let provided = authorization.ok_or_else(|| {
            tracing::warn!("call rejected: missing authorization token");
            RpcStatus::unauthenticated("missing authorization token")
        })?;

        let token = strip_bearer(provided);
        if !constant_time_eq(token, expected) {
            tracing::warn!(
                presented_len = token.len(),
                "call rejected: invalid authorization token"
            );
            return Err(RpcStatus::unauthenticated("invalid authentication token"));
        }

        Ok(())
    }
}

/// Middleware wrapping the RPC routes
pub async fn authenticate<B>(
    State(authenticator): State<Authenticator>,
    request: Request<B>,
    next: Next<B>,
) -> Response {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .map(|v| v.as_bytes());

    match authenticator.check(authorization) {
        Ok(()) => next.run(request).await,
        Err(status) => status.into_response(),
    }
}

fn strip_bearer(value: &[u8]) -> &[u8] {
    if value.len() > 7 && value[..7].eq_ignore_ascii_case(b"Bearer ") {
        &value[7..]
    } else {
        value
    }
}

/// Compares two byte slices in constant time.
///
/// The running time depends only on the lengths, never on the content.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::RpcCode;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{middleware, Router};
    use tower::ServiceExt;

    fn guarded(authenticator: Authenticator) -> Router {
        Router::new()
            .route("/rpc/test", post(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(authenticator, authenticate))
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_allow_all_accepts_anything() {
        assert!(Authenticator::AllowAll.check(None).is_ok());
        assert!(Authenticator::PeerCertificate.check(None).is_ok());
    }

    #[test]
    fn test_token_accepts_exact_value() {
        let auth = Authenticator::token("my-secret");
        assert!(auth.check(Some(&b"Bearer my-secret"[..])).is_ok());
        assert!(auth.check(Some(&b"bearer my-secret"[..])).is_ok());
        assert!(auth.check(Some(&b"my-secret"[..])).is_ok());
    }

    #[test]
    fn test_token_rejects_other_values() {
        let auth = Authenticator::token("my-secret");
        let presented_values: [&[u8]; 4] = [
            b"Bearer wrong",
            b"Bearer my-secret2",
            b"Bearer my-secre",
            b"",
        ];
        for presented in presented_values {
            let err = auth.check(Some(presented)).unwrap_err();
            assert_eq!(err.code, RpcCode::Unauthenticated);
        }
        assert!(auth.check(None).is_err());
    }

    #[test]
    fn test_rejection_does_not_echo_token() {
        let auth = Authenticator::token("my-secret");
        let err = auth.check(Some(&b"Bearer leaked-guess"[..])).unwrap_err();
        assert!(!err.message.contains("leaked-guess"));
    }

    #[tokio::test]
    async fn test_middleware_rejects_wrong_token() {
        let app = guarded(Authenticator::token("correct"));
        let request = Request::post("/rpc/test")
            .header("authorization", "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_middleware_passes_valid_token() {
        let app = guarded(Authenticator::token("correct"));
        let request = Request::post("/rpc/test")
            .header("authorization", "Bearer correct")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
