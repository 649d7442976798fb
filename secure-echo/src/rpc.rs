//! Wire conventions shared by the server, the gateway and the client.
//!
//! Every RPC is a `POST /rpc/<service>/<Method>` carrying a JSON message.
//! Failures travel as an HTTP status plus an [`RpcErrorBody`] whose `code`
//! uses the gRPC status numbering.

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::types::RpcErrorBody;

/// Fully-qualified name of the echo service.
pub const ECHO_SERVICE: &str = "echo.v1.EchoAPI";

/// Prefix under which every RPC method is mounted.
pub const RPC_PREFIX: &str = "/rpc/";

/// Methods exposed by the echo service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoMethod {
    Ping,
    Health,
    Request,
    Faulty,
    Slow,
}

impl EchoMethod {
    pub const ALL: [EchoMethod; 5] = [
        EchoMethod::Ping,
        EchoMethod::Health,
        EchoMethod::Request,
        EchoMethod::Faulty,
        EchoMethod::Slow,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EchoMethod::Ping => "Ping",
            EchoMethod::Health => "Health",
            EchoMethod::Request => "Request",
            EchoMethod::Faulty => "Faulty",
            EchoMethod::Slow => "Slow",
        }
    }

    /// `echo.v1.EchoAPI/Ping`, the form used in logs and metrics.
    pub fn full_name(self) -> String {
        format!("{}/{}", ECHO_SERVICE, self.name())
    }

    /// `/rpc/echo.v1.EchoAPI/Ping`, the HTTP path of the method.
    pub fn path(self) -> String {
        format!("{}{}", RPC_PREFIX, self.full_name())
    }

    /// `/echo/ping`, the gateway route of the method.
    pub fn route(self) -> String {
        format!("/echo/{}", self.name().to_ascii_lowercase())
    }

    /// Looks up a method by its HTTP path.
    pub fn from_path(path: &str) -> Option<Self> {
        let name = path.strip_prefix(RPC_PREFIX)?.strip_prefix(ECHO_SERVICE)?.strip_prefix('/')?;
        Self::ALL.into_iter().find(|m| m.name() == name)
    }
}

/// Status codes, numbered as in gRPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcCode {
    Ok,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    PermissionDenied,
    Internal,
    Unavailable,
    Unauthenticated,
}

impl RpcCode {
    pub fn as_i32(self) -> i32 {
        match self {
            RpcCode::Ok => 0,
            RpcCode::Unknown => 2,
            RpcCode::InvalidArgument => 3,
            RpcCode::DeadlineExceeded => 4,
            RpcCode::NotFound => 5,
            RpcCode::PermissionDenied => 7,
            RpcCode::Internal => 13,
            RpcCode::Unavailable => 14,
            RpcCode::Unauthenticated => 16,
        }
    }

    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => RpcCode::Ok,
            3 => RpcCode::InvalidArgument,
            4 => RpcCode::DeadlineExceeded,
            5 => RpcCode::NotFound,
            7 => RpcCode::PermissionDenied,
            13 => RpcCode::Internal,
            14 => RpcCode::Unavailable,
            16 => RpcCode::Unauthenticated,
            _ => RpcCode::Unknown,
        }
    }

    /// Best-effort code for a response that carried no error body.
    pub fn from_http(status: StatusCode) -> Self {
        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => RpcCode::InvalidArgument,
            StatusCode::UNAUTHORIZED => RpcCode::Unauthenticated,
            StatusCode::FORBIDDEN => RpcCode::PermissionDenied,
            StatusCode::NOT_FOUND => RpcCode::NotFound,
            StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => RpcCode::DeadlineExceeded,
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => RpcCode::Unavailable,
            StatusCode::INTERNAL_SERVER_ERROR => RpcCode::Internal,
            _ => RpcCode::Unknown,
        }
    }

    pub fn http_status(self) -> StatusCode {
        match self {
            RpcCode::Ok => StatusCode::OK,
            RpcCode::InvalidArgument => StatusCode::BAD_REQUEST,
            RpcCode::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            RpcCode::NotFound => StatusCode::NOT_FOUND,
            RpcCode::PermissionDenied => StatusCode::FORBIDDEN,
            RpcCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            RpcCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            RpcCode::Unknown | RpcCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for RpcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RpcCode::Ok => "OK",
            RpcCode::Unknown => "Unknown",
            RpcCode::InvalidArgument => "InvalidArgument",
            RpcCode::DeadlineExceeded => "DeadlineExceeded",
            RpcCode::NotFound => "NotFound",
            RpcCode::PermissionDenied => "PermissionDenied",
            RpcCode::Internal => "Internal",
            RpcCode::Unavailable => "Unavailable",
            RpcCode::Unauthenticated => "Unauthenticated",
        };
        f.write_str(name)
    }
}

/// A failed call: code plus human readable description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcStatus {
    pub code: RpcCode,
    pub message: String,
}

impl RpcStatus {
    pub fn new(code: RpcCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(RpcCode::InvalidArgument, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RpcCode::Internal, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(RpcCode::Unauthenticated, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(RpcCode::Unavailable, message)
    }

    pub fn to_body(&self) -> RpcErrorBody {
        RpcErrorBody {
            code: self.code.as_i32(),
            status: self.code.to_string(),
            message: self.message.clone(),
        }
    }

    pub fn from_body(body: RpcErrorBody) -> Self {
        Self::new(RpcCode::from_i32(body.code), body.message)
    }
}

impl fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpc error: code = {} desc = {}", self.code, self.message)
    }
}

impl IntoResponse for RpcStatus {
    fn into_response(self) -> Response {
        (self.code.http_status(), Json(self.to_body())).into_response()
    }
}
