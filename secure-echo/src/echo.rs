//! The sample echo service.
//!
//! | Method  | Behaviour                                   |
//! |---------|---------------------------------------------|
//! | Ping    | always `ok: true`                           |
//! | Health  | always `alive: true`                        |
//! | Request | echoes the value as `you said: <value>`     |
//! | Faulty  | fails with `Internal` about 1 call in 5     |
//! | Slow    | answers after a random 10-200 ms delay      |

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use rand::Rng;
use std::time::Duration;

use crate::rpc::{EchoMethod, RpcStatus};
use crate::types::{EchoRequest, EchoResponse, Empty, HealthResponse, PingResponse};

/// One in `FAULTY_ONE_IN` Faulty calls fails
pub const FAULTY_ONE_IN: u32 = 5;

pub const SLOW_MIN_MS: u64 = 10;
pub const SLOW_MAX_MS: u64 = 200;

#[derive(Debug, Clone, Default)]
pub struct EchoHandler {
    /// Reject malformed requests before they reach the method body
    pub validate_input: bool,
}

impl EchoHandler {
    pub fn new(validate_input: bool) -> Self {
        Self { validate_input }
    }

    /// Mounts every method under its RPC path
    pub fn router(self) -> Router {
        Router::new()
            .route(&EchoMethod::Ping.path(), post(ping))
            .route(&EchoMethod::Health.path(), post(health))
            .route(&EchoMethod::Request.path(), post(request))
            .route(&EchoMethod::Faulty.path(), post(faulty))
            .route(&EchoMethod::Slow.path(), post(slow))
            .with_state(self)
    }

    pub fn echo(&self, request: EchoRequest) -> Result<EchoResponse, RpcStatus> {
        if self.validate_input && request.value.trim().is_empty() {
            return Err(RpcStatus::invalid_argument("value must not be empty"));
        }
        Ok(EchoResponse {
            result: format!("you said: {}", request.value),
        })
    }
}

async fn ping() -> Json<PingResponse> {
    Json(PingResponse { ok: true })
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { alive: true })
}

async fn request(
    State(handler): State<EchoHandler>,
    Json(request): Json<EchoRequest>,
) -> Result<Json<EchoResponse>, RpcStatus> {
    handler.echo(request).map(Json)
}

async fn faulty() -> Result<Json<Empty>, RpcStatus> {
    let roll = rand::thread_rng().gen_range(0..FAULTY_ONE_IN);
    if roll == 0 {
        return Err(RpcStatus::internal("dummy error"));
    }
    Ok(Json(Empty {}))
}

async fn slow() -> Json<Empty> {
    let delay = rand::thread_rng().gen_range(SLOW_MIN_MS..=SLOW_MAX_MS);
    tokio::time::sleep(Duration::from_millis(delay)).await;
    Json(Empty {})
}
