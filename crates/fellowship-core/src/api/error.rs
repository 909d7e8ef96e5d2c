use thiserror::Error;

/// How a failed remote call should be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The backend is temporarily degraded; fall back to local state and retry later.
    Transient,
    /// Definitive rejection; surface to the user, never queue for retry.
    Hard,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Backend policy evaluation failed: {0}")]
    PolicyFault(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Error code the backend database reports when a row policy recurses.
const POLICY_FAULT_CODE: &str = "42P17";

/// Message fragment of the same fault when no code is attached.
const POLICY_FAULT_MESSAGE: &str = "infinite recursion detected in policy";

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    fn is_policy_fault(body: &str) -> bool {
        body.contains(POLICY_FAULT_CODE) || body.to_lowercase().contains(POLICY_FAULT_MESSAGE)
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        if Self::is_policy_fault(body) {
            return ApiError::PolicyFault(truncated);
        }
        match status.as_u16() {
            400 | 422 => ApiError::Validation(truncated),
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            409 => ApiError::Conflict(truncated),
            429 => ApiError::RateLimited,
            502..=504 => ApiError::Unavailable(truncated),
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    pub fn classify(&self) -> ErrorClass {
        match self {
            ApiError::RateLimited
            | ApiError::PolicyFault(_)
            | ApiError::Unavailable(_)
            | ApiError::ServerError(_)
            | ApiError::NetworkError(_)
            | ApiError::Unreachable(_) => ErrorClass::Transient,
            ApiError::AccessDenied(_)
            | ApiError::Unauthorized
            | ApiError::NotFound(_)
            | ApiError::Conflict(_)
            | ApiError::Validation(_)
            | ApiError::InvalidResponse(_) => ErrorClass::Hard,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.classify() == ErrorClass::Transient
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }
}
