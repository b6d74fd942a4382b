use std::path::Path as FsPath;

use axum::{
    Json, Router,
    extract::{Multipart, Path, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    auth::Role,
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, resolve_patient_id},
};

pub const UPLOAD_FIELD: &str = "report";

const ALLOWED_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "application/pdf",
];

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload_report))
        .route("/patient/{patient_id}/reports", get(patient_reports))
}

/// Anything outside `[a-zA-Z0-9.-]` becomes `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn stored_file_name(original: &str, now: DateTime<Utc>) -> String {
    format!("{}_{}", now.timestamp_millis(), sanitize_file_name(original))
}

pub fn is_allowed_type(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ALLOWED_TYPES.contains(&ct))
}

fn public_path(file_path: &str) -> String {
    let base = FsPath::new(file_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("/uploads/{base}")
}

#[derive(Debug, FromRow)]
struct ReportRow {
    report_id: Uuid,
    file_path: String,
    analysis: Option<String>,
    uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ReportView {
    pub report_id: Uuid,
    pub file: String,
    pub analysis: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<ReportRow> for ReportView {
    fn from(r: ReportRow) -> Self {
        Self {
            report_id: r.report_id,
            file: public_path(&r.file_path),
            analysis: r.analysis,
            uploaded_at: r.uploaded_at,
        }
    }
}

struct Upload {
    file_name: String,
    bytes: Vec<u8>,
}

async fn read_upload(multipart: &mut Multipart, max_bytes: usize) -> Result<Upload, ApiError> {
    let bad_form = |e: axum::extract::multipart::MultipartError| {
        ApiError::validation(format!("invalid multipart body: {e}"))
    };

    while let Some(mut field) = multipart.next_field().await.map_err(bad_form)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        if !is_allowed_type(field.content_type()) {
            return Err(ApiError::validation(
                "Invalid file type. Only JPEG, PNG, GIF, and PDF files are allowed.",
            ));
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "report".to_string());

        let mut bytes = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(bad_form)? {
            if bytes.len() + chunk.len() > max_bytes {
                return Err(ApiError::validation(format!(
                    "File too large. Maximum size is {} bytes",
                    max_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }
        return Ok(Upload { file_name, bytes });
    }
    Err(ApiError::validation("No file uploaded"))
}

#[derive(Debug, Serialize)]
pub struct UploadResult {
    pub report_id: Uuid,
    pub analysis: String,
    pub file: String,
}

pub async fn upload_report(
    State(state): State<AppState>,
    auth: AuthContext,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ApiOk<UploadResult>>), ApiError> {
    auth.require(Role::Patient)?;
    let patient_id = resolve_patient_id(&state.db, auth.user_id).await?;

    let upload = read_upload(&mut multipart, state.max_upload_bytes).await?;
    let stored = state
        .upload_dir
        .join(stored_file_name(&upload.file_name, Utc::now()));
    tokio::fs::write(&stored, &upload.bytes)
        .await
        .map_err(|e| ApiError::Internal(format!("upload write error: {e}")))?;

    let file_path = stored.to_string_lossy().into_owned();
    let analysis = state.document_classifier.classify(&file_path);

    let report_id: Uuid = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO patient_report (patient_id, file_path, analysis)
        VALUES ($1, $2, $3)
        RETURNING report_id
        "#,
    )
    .bind(patient_id)
    .bind(&file_path)
    .bind(&analysis)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(%patient_id, %report_id, bytes = upload.bytes.len(), "report uploaded");
    Ok((
        StatusCode::CREATED,
        Json(
            ApiOk::new(UploadResult {
                report_id,
                analysis,
                file: public_path(&file_path),
            })
            .with_message("Report uploaded successfully"),
        ),
    ))
}

/// Patients read their own reports; provider-side accounts may read any.
pub async fn patient_reports(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<ReportView>>>, ApiError> {
    if auth.role == Role::Patient
        && resolve_patient_id(&state.db, auth.user_id).await? != patient_id
    {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Patients can only view their own reports".into(),
        ));
    }

    let exists: bool =
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM patient WHERE patient_id = $1)")
            .bind(patient_id)
            .fetch_one(&state.db)
            .await
            .map_err(ApiError::db)?;
    if !exists {
        return Err(ApiError::not_found("Patient"));
    }

    let rows: Vec<ReportRow> = sqlx::query_as::<_, ReportRow>(
        r#"
        SELECT report_id, file_path, analysis, uploaded_at
        FROM patient_report
        WHERE patient_id = $1
        ORDER BY uploaded_at ASC
        "#,
    )
    .bind(patient_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::list(rows.into_iter().map(ReportView::from).collect())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn names_are_sanitized_and_timestamped() {
        assert_eq!(sanitize_file_name("blood test (1).pdf"), "blood_test__1_.pdf");
        assert_eq!(sanitize_file_name("ecg-2024.PDF"), "ecg-2024.PDF");
        assert_eq!(sanitize_file_name("../../etc/passwd"), ".._.._etc_passwd");

        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(stored_file_name("x ray.png", at), "1700000000123_x_ray.png");
    }

    #[test]
    fn only_images_and_pdf_are_accepted() {
        assert!(is_allowed_type(Some("application/pdf")));
        assert!(is_allowed_type(Some("image/png")));
        assert!(!is_allowed_type(Some("text/plain")));
        assert!(!is_allowed_type(None));
    }

    #[test]
    fn public_path_uses_basename() {
        assert_eq!(public_path("uploads/17_report.pdf"), "/uploads/17_report.pdf");
    }
}
