use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::Role,
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{
        ApiOk, AppState, DOCTOR_SELECT, DoctorRow, PATIENT_SELECT, PatientRow, clean_opt,
        resolve_doctor_id,
    },
};

pub const MAX_EXPERIENCE_YEARS: i32 = 50;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_doctors))
        .route("/me", get(get_me).patch(update_me))
        .route("/for-patient/{patient_id}", get(doctors_for_patient))
        .route("/{doctor_id}", get(get_doctor))
}

pub fn validate_city(city: Option<String>) -> Result<Option<String>, ApiError> {
    match city {
        Some(c) if c.trim().chars().count() < 2 => Err(ApiError::validation(
            "Please provide a valid city (at least 2 characters)",
        )),
        other => Ok(other.map(|c| c.trim().to_string())),
    }
}

pub fn validate_experience(years: i32) -> Result<(), ApiError> {
    if !(0..=MAX_EXPERIENCE_YEARS).contains(&years) {
        return Err(ApiError::validation(
            "Please provide valid experience years (0-50)",
        ));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct DoctorFilter {
    pub specialty: Option<String>,
    pub city: Option<String>,
}

/// Active doctors matching the optional specialty and city.
pub async fn find_doctors(
    state: &AppState,
    specialty: Option<&str>,
    city: Option<&str>,
) -> Result<Vec<DoctorRow>, ApiError> {
    let sql = format!(
        r#"{DOCTOR_SELECT}
        WHERE d.is_active
          AND ($1::text IS NULL OR d.specialty = $1)
          AND ($2::text IS NULL OR lower(d.city) = lower($2))
        ORDER BY d.experience DESC, u.display_name ASC"#
    );
    sqlx::query_as::<_, DoctorRow>(&sql)
        .bind(specialty)
        .bind(city)
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)
}

pub async fn list_doctors(
    State(state): State<AppState>,
    Query(q): Query<DoctorFilter>,
) -> Result<Json<ApiOk<Vec<DoctorRow>>>, ApiError> {
    let specialty = clean_opt(q.specialty);
    let city = clean_opt(q.city);
    let rows = find_doctors(&state, specialty.as_deref(), city.as_deref()).await?;
    Ok(Json(ApiOk::list(rows)))
}

async fn load_doctor(state: &AppState, doctor_id: Uuid) -> Result<DoctorRow, ApiError> {
    let sql = format!("{DOCTOR_SELECT} WHERE d.doctor_id = $1");
    sqlx::query_as::<_, DoctorRow>(&sql)
        .bind(doctor_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("Doctor"))
}

pub async fn get_doctor(
    State(state): State<AppState>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<ApiOk<DoctorRow>>, ApiError> {
    Ok(Json(ApiOk::new(load_doctor(&state, doctor_id).await?)))
}

#[derive(Debug, Serialize)]
pub struct DoctorProfile {
    #[serde(flatten)]
    pub doctor: DoctorRow,
    pub patients: Vec<PatientRow>,
}

pub async fn get_me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<DoctorProfile>>, ApiError> {
    auth.require(Role::Doctor)?;
    let doctor_id = resolve_doctor_id(&state.db, auth.user_id).await?;
    let doctor = load_doctor(&state, doctor_id).await?;

    let sql = format!(
        r#"{PATIENT_SELECT}
        JOIN doctor_patient dp ON dp.patient_id = p.patient_id
        WHERE dp.doctor_id = $1
        ORDER BY dp.attached_at DESC"#
    );
    let patients: Vec<PatientRow> = sqlx::query_as::<_, PatientRow>(&sql)
        .bind(doctor_id)
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(DoctorProfile { doctor, patients })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateDoctorRequest {
    pub city: Option<String>,
    pub experience: Option<i32>,
}

pub async fn update_me(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<UpdateDoctorRequest>,
) -> Result<Json<ApiOk<DoctorRow>>, ApiError> {
    auth.require(Role::Doctor)?;
    let city = validate_city(req.city)?;
    if let Some(years) = req.experience {
        validate_experience(years)?;
    }

    let doctor_id = resolve_doctor_id(&state.db, auth.user_id).await?;
    sqlx::query(
        r#"
        UPDATE doctor
        SET city = COALESCE($1, city),
            experience = COALESCE($2, experience)
        WHERE doctor_id = $3
        "#,
    )
    .bind(city)
    .bind(req.experience)
    .bind(doctor_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    let updated = load_doctor(&state, doctor_id).await?;
    Ok(Json(
        ApiOk::new(updated).with_message("Profile updated successfully"),
    ))
}

/// Doctors a patient was attached to through symptom recommendations.
pub async fn attached_doctors(state: &AppState, patient_id: Uuid) -> Result<Vec<DoctorRow>, ApiError> {
    let sql = format!(
        r#"{DOCTOR_SELECT}
        JOIN doctor_patient dp ON dp.doctor_id = d.doctor_id
        WHERE dp.patient_id = $1
        ORDER BY dp.attached_at DESC"#
    );
    sqlx::query_as::<_, DoctorRow>(&sql)
        .bind(patient_id)
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)
}

pub async fn doctors_for_patient(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<DoctorRow>>>, ApiError> {
    Ok(Json(ApiOk::list(attached_doctors(&state, patient_id).await?)))
}
