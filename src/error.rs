use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failures raised while running a single probe.
///
/// None of these escape a prober entry point: they are logged and turned
/// into a failed `probe_success`.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("RPC error: {message} (code: {code})")]
    Rpc { code: i64, message: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Metrics registry error: {0}")]
    Registry(#[from] prometheus::Error),
}

impl ProbeError {
    /// Prefixes the message with what was being attempted, keeping the kind.
    pub fn context(self, what: impl std::fmt::Display) -> Self {
        match self {
            ProbeError::Precondition(msg) => ProbeError::Precondition(format!("{}: {}", what, msg)),
            ProbeError::Transport(msg) => ProbeError::Transport(format!("{}: {}", what, msg)),
            ProbeError::Rpc { code, message } => ProbeError::Rpc {
                code,
                message: format!("{}: {}", what, message),
            },
            ProbeError::Decode(msg) => ProbeError::Decode(format!("{}: {}", what, msg)),
            other @ ProbeError::Registry(_) => other,
        }
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        ProbeError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProbeError>;

/// Errors surfaced by the HTTP shell.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unknown module: {0}")]
    UnknownModule(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::UnknownModule(_) => (StatusCode::BAD_REQUEST, "UNKNOWN_MODULE"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = Json(ErrorResponse {
            success: false,
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
            },
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_message_carries_code() {
        let err = ProbeError::Rpc {
            code: -32601,
            message: "method not found".to_string(),
        };
        assert_eq!(err.to_string(), "RPC error: method not found (code: -32601)");
    }

    #[test]
    fn context_keeps_error_kind() {
        let err = ProbeError::Rpc {
            code: -32000,
            message: "header not found".to_string(),
        }
        .context("eth_getBalance");
        match err {
            ProbeError::Rpc { code, message } => {
                assert_eq!(code, -32000);
                assert_eq!(message, "eth_getBalance: header not found");
            }
            other => panic!("unexpected error kind: {:?}", other),
        }

        let err = ProbeError::Decode("bad hex".to_string()).context("owner");
        assert_eq!(err.to_string(), "Decode error: owner: bad hex");
    }

    #[test]
    fn unknown_module_maps_to_bad_request() {
        let response = ApiError::UnknownModule("icmp".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
