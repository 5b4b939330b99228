use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("permission denied: {0}")]
    Forbidden(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("object store error: {0}")]
    Store(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Store(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.to_string()
        }))
    }
}

/// Maps a database connection failure to a stable error category based on
/// its message text. Patterns are tried in a fixed order and the first hit
/// wins, so a message matching more than one pattern classifies the same
/// way every time.
pub fn classify_connection_error(err: &sqlx::Error) -> AppError {
    let text = err.to_string();
    let lower = text.to_ascii_lowercase();

    if lower.contains("password authentication failed") || lower.contains("authentication") {
        AppError::Auth(text)
    } else if lower.contains("role") && lower.contains("does not exist") {
        AppError::Auth(text)
    } else if lower.contains("database") && lower.contains("does not exist") {
        AppError::NotFound(text)
    } else if lower.contains("connection refused")
        || lower.contains("timed out")
        || lower.contains("timeout")
    {
        AppError::Unavailable(text)
    } else if lower.contains("permission denied") {
        AppError::Forbidden(text)
    } else {
        AppError::Internal(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(message: &str) -> AppError {
        classify_connection_error(&sqlx::Error::Configuration(message.into()))
    }

    #[test]
    fn wrong_password_maps_to_auth() {
        let err = classify(r#"password authentication failed for user "app""#);
        assert!(matches!(err, AppError::Auth(_)));
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn unknown_role_maps_to_auth() {
        let err = classify(r#"role "nobody" does not exist"#);
        assert!(matches!(err, AppError::Auth(_)));
    }

    #[test]
    fn unknown_database_maps_to_not_found() {
        let err = classify(r#"database "missing" does not exist"#);
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn refused_and_timeout_map_to_unavailable() {
        assert!(matches!(
            classify("connection refused (os error 111)"),
            AppError::Unavailable(_)
        ));
        assert!(matches!(
            classify("connection timed out"),
            AppError::Unavailable(_)
        ));
    }

    #[test]
    fn permission_denied_maps_to_forbidden() {
        let err = classify("permission denied for table users");
        assert!(matches!(err, AppError::Forbidden(_)));
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn unrecognized_maps_to_internal() {
        let err = classify("something unexpected happened");
        assert!(matches!(err, AppError::Internal(_)));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn ambiguous_message_resolves_by_pattern_order() {
        // Mentions both a role and a database; the role pattern is tried
        // first, so this classifies as Auth every time.
        let err = classify(r#"role "app" does not exist in database "prod""#);
        assert!(matches!(err, AppError::Auth(_)));
    }
}
