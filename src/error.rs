use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{1}")]
    Unauthorized(&'static str, String),
    #[error("{1}")]
    Forbidden(&'static str, String),
    #[error("{1}")]
    BadRequest(&'static str, String),
    #[error("{1}")]
    NotFound(&'static str, String),
    #[error("{1}")]
    Conflict(&'static str, String),
    #[error("{0}")]
    Internal(String),
}

// Postgres SQLSTATE codes we surface as conflicts
const UNIQUE_VIOLATION: &str = "23505";
const EXCLUSION_VIOLATION: &str = "23P01";

impl ApiError {
    pub fn invalid_credentials() -> Self {
        ApiError::Unauthorized("INVALID_CREDENTIALS", "Invalid credentials".into())
    }

    pub fn session_expired() -> Self {
        ApiError::Unauthorized("SESSION_EXPIRED", "Not authorized, session expired".into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::BadRequest("VALIDATION_ERROR", message.into())
    }

    pub fn not_found(what: &str) -> Self {
        ApiError::NotFound("NOT_FOUND", format!("{what} not found"))
    }

    pub fn role_required(role: &str) -> Self {
        ApiError::Forbidden("FORBIDDEN", format!("Access denied. {role} role required"))
    }

    /// Map a storage error. Constraint violations that guard scheduling and
    /// dispatch invariants become conflicts, everything else is internal.
    pub fn db(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e {
            match db_err.code().as_deref() {
                Some(EXCLUSION_VIOLATION) => {
                    return ApiError::Conflict(
                        "SLOT_UNAVAILABLE",
                        "Selected time is not available. Please choose another slot.".into(),
                    );
                }
                Some(UNIQUE_VIOLATION) => {
                    return ApiError::Conflict(
                        "DUPLICATE",
                        db_err
                            .constraint()
                            .map(|c| format!("duplicate record ({c})"))
                            .unwrap_or_else(|| "duplicate record".into()),
                    );
                }
                _ => {}
            }
        }
        tracing::error!(error = %e, "database error");
        ApiError::Internal(format!("db error: {e}"))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(..) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(..) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(..) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(..) => StatusCode::NOT_FOUND,
            ApiError::Conflict(..) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(code, _)
            | ApiError::Forbidden(code, _)
            | ApiError::BadRequest(code, _)
            | ApiError::NotFound(code, _)
            | ApiError::Conflict(code, _) => code,
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    fn to_error_response(&self) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            success: false,
            code: self.code().to_string(),
            message: self.to_string(),
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.to_error_response()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn variants_map_to_http_status() {
        assert_eq!(ApiError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::session_expired().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::role_required("patient").status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::not_found("Emergency").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Conflict("STALE_STATE", "no longer active".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn non_database_errors_are_internal() {
        let err = ApiError::db(sqlx::Error::RowNotFound);
        assert_eq!(err.code(), "INTERNAL");
    }

    #[tokio::test]
    async fn error_envelope_shape() {
        let resp = ApiError::not_found("Doctor").into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "NOT_FOUND");
        assert_eq!(json["message"], "Doctor not found");
    }
}
