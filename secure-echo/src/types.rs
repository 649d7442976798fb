use serde::{Deserialize, Serialize};

/// Message with no fields, used by Ping/Health/Faulty/Slow requests and
/// the Faulty/Slow responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Empty {}

/// Reachability check response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingResponse {
    pub ok: bool,
}

/// Liveness check response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub alive: bool,
}

/// Echo request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoRequest {
    pub value: String,
}

/// Echo response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoResponse {
    pub result: String,
}

/// Body of every failed call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: i32,
    pub status: String,
    pub message: String,
}
