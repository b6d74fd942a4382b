use axum::{Json, Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};

use crate::{
    auth::Role,
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, DoctorRow, clean_opt, resolve_patient_id},
    routes::doctor_routes::find_doctors,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/recommend", post(recommend))
}

#[derive(Debug, Deserialize)]
pub struct RecommendRequest {
    pub issue: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Recommendation {
    pub specialty: String,
    pub count: usize,
    pub doctors: Vec<DoctorRow>,
}

/// Route a symptom description to a specialty and the doctors practising
/// it. A patient caller is added to each matched doctor's patient list.
pub async fn recommend(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<RecommendRequest>,
) -> Result<Json<ApiOk<Recommendation>>, ApiError> {
    let issue = clean_opt(req.issue).ok_or_else(|| ApiError::validation("Please describe your issue."))?;
    let city = clean_opt(req.city);

    let specialty = state.symptom_classifier.classify(&issue);
    let doctors = find_doctors(&state, Some(&specialty), city.as_deref()).await?;

    if auth.role == Role::Patient && !doctors.is_empty() {
        let patient_id = resolve_patient_id(&state.db, auth.user_id).await?;
        let doctor_ids: Vec<_> = doctors.iter().map(|d| d.doctor_id).collect();
        let attached = sqlx::query(
            r#"
            INSERT INTO doctor_patient (doctor_id, patient_id)
            SELECT d, $2 FROM unnest($1::uuid[]) AS d
            ON CONFLICT (doctor_id, patient_id) DO NOTHING
            "#,
        )
        .bind(&doctor_ids)
        .bind(patient_id)
        .execute(&state.db)
        .await
        .map_err(ApiError::db)?;
        tracing::debug!(%patient_id, attached = attached.rows_affected(), "patient attached to doctors");
    }

    tracing::info!(specialty = %specialty, matches = doctors.len(), "symptom recommendation");
    Ok(Json(ApiOk::new(Recommendation {
        specialty,
        count: doctors.len(),
        doctors,
    })))
}
