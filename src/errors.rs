//! Error taxonomy for the console.
//!
//! Backend calls fail with [`ApiError`] (ingestion service) or [`GatewayError`]
//! (QuickBooks gateway); bad user input fails with [`ValidationError`] before
//! any request is made. Command handlers wrap these in `anyhow` and the binary
//! translates them back into human-readable messages at the edge.

use std::error::Error;

/// Common behaviour shared by all console errors.
pub trait ConsoleError: Error + Send + Sync + 'static {
    /// Error code for programmatic handling
    fn error_code(&self) -> &'static str;

    /// Whether the error was caused by the operator rather than a backend
    fn is_user_error(&self) -> bool {
        false
    }
}

/// Failures talking to the ingestion/orchestration backend.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    Transport {
        message: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl ApiError {
    pub(crate) fn transport(source: reqwest::Error) -> Self {
        let message = source.to_string();
        ApiError::Transport {
            message: if message.is_empty() {
                "Request failed".to_string()
            } else {
                message
            },
            source,
        }
    }

    /// Build a status error, preferring the backend's `message` field over the raw body.
    pub(crate) fn from_status(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("Request failed with status code {status}"));
        ApiError::Status { status, message }
    }
}

impl ConsoleError for ApiError {
    fn error_code(&self) -> &'static str {
        match self {
            ApiError::Transport { .. } => "API_TRANSPORT",
            ApiError::Status { .. } => "API_STATUS",
            ApiError::Malformed(_) => "API_MALFORMED",
        }
    }
}

/// Failures talking to the QuickBooks gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    #[error("{message}")]
    Status {
        status: u16,
        body: String,
        message: String,
    },

    #[error("Gateway response was not valid JSON.")]
    InvalidJson,
}

impl GatewayError {
    pub(crate) fn from_status(status: u16, body: String) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v.as_object()
                    .and_then(|o| o.get("message"))
                    .map(|m| match m {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
            })
            .unwrap_or_else(|| format!("Gateway request failed with status {status}"));
        let body = if body.is_empty() {
            "Gateway request failed".to_string()
        } else {
            body
        };
        GatewayError::Status {
            status,
            body,
            message,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Translate the error into an operator-facing explanation.
    pub fn describe(&self) -> String {
        match self {
            GatewayError::Status { status: 401, .. } => {
                "qbo-gateway rejected the API key (401).".to_string()
            }
            GatewayError::Status { status: 404, .. } => "Not found on qbo-gateway (404).".to_string(),
            GatewayError::Status { status, .. } if *status >= 500 => {
                "qbo-gateway returned a server error. Please retry.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl ConsoleError for GatewayError {
    fn error_code(&self) -> &'static str {
        match self {
            GatewayError::Transport(_) => "GATEWAY_TRANSPORT",
            GatewayError::Status { .. } => "GATEWAY_STATUS",
            GatewayError::InvalidJson => "GATEWAY_INVALID_JSON",
        }
    }
}

/// Describe any error coming out of a gateway operation, with a fallback for empty messages.
pub fn describe_gateway_error(err: &anyhow::Error, fallback: &str) -> String {
    if let Some(gw) = err.downcast_ref::<GatewayError>() {
        return gw.describe();
    }
    let message = err.to_string();
    if message.is_empty() {
        fallback.to_string()
    } else {
        message
    }
}

/// Operator input rejected before reaching a backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Notification email is required.")]
    MissingNotifyEmail,

    #[error("Please attach at least one CSV file.")]
    MissingFiles,

    #[error("Samples source requires at least one CSV file.")]
    SamplesWithoutFiles,

    #[error("Week number must be between 1 and 53 (got {0}).")]
    WeekOutOfRange(u8),

    #[error("Week year must be 2020 or later (got {0}).")]
    YearOutOfRange(i32),

    #[error("Name / label is required.")]
    MissingLabel,

    #[error("Additional fields must be valid JSON.")]
    InvalidExtraFields,

    #[error("Type {expected} to confirm.")]
    ConfirmationMismatch { expected: &'static str },
}

impl ConsoleError for ValidationError {
    fn error_code(&self) -> &'static str {
        match self {
            ValidationError::MissingNotifyEmail => "MISSING_NOTIFY_EMAIL",
            ValidationError::MissingFiles => "MISSING_FILES",
            ValidationError::SamplesWithoutFiles => "SAMPLES_WITHOUT_FILES",
            ValidationError::WeekOutOfRange(_) => "WEEK_OUT_OF_RANGE",
            ValidationError::YearOutOfRange(_) => "YEAR_OUT_OF_RANGE",
            ValidationError::MissingLabel => "MISSING_LABEL",
            ValidationError::InvalidExtraFields => "INVALID_EXTRA_FIELDS",
            ValidationError::ConfirmationMismatch { .. } => "CONFIRMATION_MISMATCH",
        }
    }

    fn is_user_error(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_error(status: u16, body: &str) -> GatewayError {
        GatewayError::from_status(status, body.to_string())
    }

    #[test]
    fn gateway_known_statuses_get_canned_messages() {
        assert_eq!(
            status_error(401, "").describe(),
            "qbo-gateway rejected the API key (401)."
        );
        assert_eq!(
            status_error(404, "{}").describe(),
            "Not found on qbo-gateway (404)."
        );
        assert_eq!(
            status_error(503, "oops").describe(),
            "qbo-gateway returned a server error. Please retry."
        );
    }

    #[test]
    fn gateway_other_status_uses_body_message() {
        let err = status_error(422, r#"{"message":"label already taken"}"#);
        assert_eq!(err.describe(), "label already taken");
        assert_eq!(err.status(), Some(422));

        let err = status_error(409, "not json");
        assert_eq!(err.describe(), "Gateway request failed with status 409");
    }

    #[test]
    fn gateway_empty_body_is_replaced() {
        match status_error(400, "") {
            GatewayError::Status { body, .. } => assert_eq!(body, "Gateway request failed"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn describe_gateway_error_through_anyhow() {
        let err = anyhow::Error::new(status_error(401, ""));
        assert_eq!(
            describe_gateway_error(&err, "fallback"),
            "qbo-gateway rejected the API key (401)."
        );

        let err = anyhow::anyhow!("");
        assert_eq!(describe_gateway_error(&err, "fallback"), "fallback");
    }

    #[test]
    fn api_status_prefers_backend_message() {
        let err = ApiError::from_status(400, r#"{"message":"week_num is invalid"}"#);
        assert_eq!(err.to_string(), "week_num is invalid");
        assert_eq!(err.error_code(), "API_STATUS");

        let err = ApiError::from_status(502, "<html>");
        assert_eq!(err.to_string(), "Request failed with status code 502");
    }

    #[test]
    fn validation_errors_are_user_errors() {
        let err = ValidationError::SamplesWithoutFiles;
        assert_eq!(
            err.to_string(),
            "Samples source requires at least one CSV file."
        );
        assert!(err.is_user_error());
        assert_eq!(err.error_code(), "SAMPLES_WITHOUT_FILES");
    }
}
