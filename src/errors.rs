use reqwest::StatusCode;
use thiserror::Error;

/// Errors surfaced by the remote conversion service.
///
/// `Transport` means the service itself could not be reached, which is a
/// different situation from the target site refusing automated access
/// (`RateLimited`) or the service rejecting the request (`Validation`).
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("conversion service unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("target site is blocking automated access")]
    RateLimited,
    #[error("{message}")]
    Validation { message: String },
}

impl ServiceError {
    /// Maps a rejected (non-2xx) response to the error taxonomy. Used
    /// uniformly by the analyze and job creation paths.
    ///
    /// 403 and 429 are how the service relays that the target site is
    /// rejecting automated requests. Anything else carries the message the
    /// service put in the body when there is one, else `fallback`.
    pub fn rejection(status: StatusCode, body: &str, fallback: &str) -> ServiceError {
        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            return ServiceError::RateLimited;
        }
        ServiceError::Validation {
            message: extract_detail(body).unwrap_or_else(|| fallback.into()),
        }
    }
}

// the service reports rejections as {"detail": ...} and unexpected
// failures as {"error": ..., "detail": ...}
fn extract_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    for key in ["detail", "error"] {
        if let Some(message) = value.get(key).and_then(|m| m.as_str()) {
            return Some(message.to_string());
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    ConnectivityLost,
    AccessBlocked,
    Rejected,
}

/// User-facing record of a failed analyze or job creation call. A single
/// current failure is kept by the controller, overwriting any prior one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub category: FailureCategory,
    pub message: String,
    /// Whether the conversion service itself answered. Connectivity
    /// failures warrant different retry guidance than a cooperative
    /// service relaying a rejection.
    pub service_reachable: bool,
}

impl Failure {
    pub fn classify(err: &ServiceError) -> Failure {
        match err {
            ServiceError::Transport(_) => Failure {
                category: FailureCategory::ConnectivityLost,
                message: "Cannot connect to the conversion service. Please check that it is running.".into(),
                service_reachable: false,
            },
            ServiceError::RateLimited => Failure {
                category: FailureCategory::AccessBlocked,
                message: "This website is blocking our requests due to rate limiting or security restrictions.".into(),
                service_reachable: true,
            },
            ServiceError::Validation { message } => Failure {
                category: FailureCategory::Rejected,
                message: message.clone(),
                service_reachable: true,
            },
        }
    }
}
