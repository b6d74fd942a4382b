use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    auth::{Role, is_valid_email, is_valid_phone, normalize_email},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{
        ApiOk, AppState, HOSPITAL_DOCTOR_COLUMNS, HospitalDoctorRow, MessageOnly, clean_opt,
        resolve_hospital_id,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(search_doctors).post(add_doctor))
        .route("/hospital/{hospital_id}", get(doctors_of_hospital))
        .route(
            "/{hospital_doctor_id}",
            get(get_doctor).patch(update_doctor).delete(remove_doctor),
        )
}

/// A hospital doctor together with where they practise.
#[derive(Debug, Serialize, FromRow)]
pub struct HospitalDoctorListing {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub doctor: HospitalDoctorRow,
    pub hospital_name: String,
}

const LISTING_SELECT: &str = r#"
    SELECT hd.hospital_doctor_id, hd.hospital_id, hd.name, hd.email, hd.phone,
           hd.specialty, hd.experience, hd.qualifications, hd.is_active,
           hd.city, hd.state, hd.address, hd.created_at, hd.updated_at,
           h.name AS hospital_name
    FROM hospital_doctor hd
    JOIN hospital h ON h.hospital_id = hd.hospital_id
"#;

#[derive(Debug, Deserialize)]
pub struct DoctorSearch {
    pub specialty: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
}

/// Public search: specialty matches exactly, city and state are
/// case-insensitive substrings.
pub async fn search_doctors(
    State(state): State<AppState>,
    Query(q): Query<DoctorSearch>,
) -> Result<Json<ApiOk<Vec<HospitalDoctorListing>>>, ApiError> {
    let sql = format!(
        r#"{LISTING_SELECT}
        WHERE hd.is_active AND h.is_active
          AND ($1::text IS NULL OR hd.specialty = $1)
          AND ($2::text IS NULL OR position(lower($2) IN lower(hd.city)) > 0)
          AND ($3::text IS NULL OR position(lower($3) IN lower(hd.state)) > 0)
        ORDER BY hd.experience DESC, hd.name ASC"#
    );
    let rows: Vec<HospitalDoctorListing> = sqlx::query_as::<_, HospitalDoctorListing>(&sql)
        .bind(clean_opt(q.specialty))
        .bind(clean_opt(q.city))
        .bind(clean_opt(q.state))
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?;
    Ok(Json(ApiOk::list(rows)))
}

pub async fn doctors_of_hospital(
    State(state): State<AppState>,
    Path(hospital_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<HospitalDoctorRow>>>, ApiError> {
    let sql = format!(
        "SELECT {HOSPITAL_DOCTOR_COLUMNS} FROM hospital_doctor \
         WHERE hospital_id = $1 AND is_active ORDER BY name ASC"
    );
    let rows: Vec<HospitalDoctorRow> = sqlx::query_as::<_, HospitalDoctorRow>(&sql)
        .bind(hospital_id)
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?;
    Ok(Json(ApiOk::list(rows)))
}

pub async fn get_doctor(
    State(state): State<AppState>,
    Path(hospital_doctor_id): Path<Uuid>,
) -> Result<Json<ApiOk<HospitalDoctorListing>>, ApiError> {
    let sql = format!("{LISTING_SELECT} WHERE hd.hospital_doctor_id = $1");
    let row = sqlx::query_as::<_, HospitalDoctorListing>(&sql)
        .bind(hospital_doctor_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("Doctor"))?;
    Ok(Json(ApiOk::new(row)))
}

#[derive(Debug, Deserialize)]
pub struct AddDoctorRequest {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub specialty: String,
    pub experience: Option<i32>,
    pub qualifications: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub address: Option<String>,
}

fn check_phone(phone: &Option<String>) -> Result<(), ApiError> {
    if phone
        .as_deref()
        .map(str::trim)
        .is_some_and(|p| !p.is_empty() && !is_valid_phone(p))
    {
        return Err(ApiError::validation("Invalid phone number format"));
    }
    Ok(())
}

fn check_experience(years: Option<i32>) -> Result<(), ApiError> {
    if years.is_some_and(|y| y < 0) {
        return Err(ApiError::validation("experience cannot be negative"));
    }
    Ok(())
}

impl AddDoctorRequest {
    pub fn validate(&self) -> Result<String, ApiError> {
        if self.name.trim().is_empty() || self.email.trim().is_empty() || self.specialty.trim().is_empty() {
            return Err(ApiError::validation("Name, email, and specialty are required"));
        }
        let email = normalize_email(&self.email);
        if !is_valid_email(&email) {
            return Err(ApiError::validation("Invalid email format"));
        }
        check_phone(&self.phone)?;
        check_experience(self.experience)?;
        Ok(email)
    }
}

#[derive(Debug, FromRow)]
struct HospitalDefaults {
    hospital_id: Uuid,
    city: String,
    state: String,
    address: String,
}

async fn caller_hospital(state: &AppState, auth: &AuthContext) -> Result<HospitalDefaults, ApiError> {
    auth.require(Role::Hospital)?;
    sqlx::query_as::<_, HospitalDefaults>(
        "SELECT hospital_id, city, state, address FROM hospital WHERE user_id = $1",
    )
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("Hospital"))
}

/// Location fields default to the hospital's own.
pub async fn add_doctor(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<AddDoctorRequest>,
) -> Result<(StatusCode, Json<ApiOk<HospitalDoctorRow>>), ApiError> {
    let email = req.validate()?;
    let hospital = caller_hospital(&state, &auth).await?;

    let exists: bool = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM hospital_doctor WHERE hospital_id = $1 AND email = $2)",
    )
    .bind(hospital.hospital_id)
    .bind(&email)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;
    if exists {
        return Err(ApiError::Conflict(
            "DUPLICATE",
            "Doctor with this email already exists in this hospital".into(),
        ));
    }

    let sql = format!(
        r#"
        INSERT INTO hospital_doctor
            (hospital_id, name, email, phone, specialty, experience, qualifications, city, state, address)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {HOSPITAL_DOCTOR_COLUMNS}
        "#
    );
    let row: HospitalDoctorRow = sqlx::query_as::<_, HospitalDoctorRow>(&sql)
        .bind(hospital.hospital_id)
        .bind(req.name.trim())
        .bind(&email)
        .bind(clean_opt(req.phone))
        .bind(req.specialty.trim())
        .bind(req.experience.unwrap_or(0))
        .bind(clean_opt(req.qualifications))
        .bind(clean_opt(req.city).unwrap_or(hospital.city))
        .bind(clean_opt(req.state).unwrap_or(hospital.state))
        .bind(clean_opt(req.address).or(Some(hospital.address)))
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::db)?;

    tracing::info!(
        hospital_id = %row.hospital_id,
        hospital_doctor_id = %row.hospital_doctor_id,
        "hospital doctor added"
    );
    Ok((
        StatusCode::CREATED,
        Json(ApiOk::new(row).with_message("Doctor added successfully")),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateDoctorRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub specialty: Option<String>,
    pub experience: Option<i32>,
    pub qualifications: Option<String>,
    pub is_active: Option<bool>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub address: Option<String>,
}

async fn owned_doctor(
    state: &AppState,
    auth: &AuthContext,
    hospital_doctor_id: Uuid,
) -> Result<HospitalDoctorRow, ApiError> {
    auth.require(Role::Hospital)?;
    let hospital_id = resolve_hospital_id(&state.db, auth.user_id).await?;
    let sql = format!(
        "SELECT {HOSPITAL_DOCTOR_COLUMNS} FROM hospital_doctor \
         WHERE hospital_doctor_id = $1 AND hospital_id = $2"
    );
    sqlx::query_as::<_, HospitalDoctorRow>(&sql)
        .bind(hospital_doctor_id)
        .bind(hospital_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("Doctor"))
}

pub async fn update_doctor(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(hospital_doctor_id): Path<Uuid>,
    Json(req): Json<UpdateDoctorRequest>,
) -> Result<Json<ApiOk<HospitalDoctorRow>>, ApiError> {
    check_phone(&req.phone)?;
    check_experience(req.experience)?;
    let existing = owned_doctor(&state, &auth, hospital_doctor_id).await?;

    let sql = format!(
        r#"
        UPDATE hospital_doctor
        SET name = $1, phone = $2, specialty = $3, experience = $4, qualifications = $5,
            is_active = $6, city = $7, state = $8, address = $9, updated_at = now()
        WHERE hospital_doctor_id = $10
        RETURNING {HOSPITAL_DOCTOR_COLUMNS}
        "#
    );
    let row: HospitalDoctorRow = sqlx::query_as::<_, HospitalDoctorRow>(&sql)
        .bind(clean_opt(req.name).unwrap_or(existing.name))
        .bind(clean_opt(req.phone).or(existing.phone))
        .bind(clean_opt(req.specialty).unwrap_or(existing.specialty))
        .bind(req.experience.unwrap_or(existing.experience))
        .bind(clean_opt(req.qualifications).or(existing.qualifications))
        .bind(req.is_active.unwrap_or(existing.is_active))
        .bind(clean_opt(req.city).unwrap_or(existing.city))
        .bind(clean_opt(req.state).unwrap_or(existing.state))
        .bind(clean_opt(req.address).or(existing.address))
        .bind(hospital_doctor_id)
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::db)?;

    Ok(Json(
        ApiOk::new(row).with_message("Doctor updated successfully"),
    ))
}

/// Soft delete: the doctor stops taking bookings but keeps their history.
pub async fn remove_doctor(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(hospital_doctor_id): Path<Uuid>,
) -> Result<Json<MessageOnly>, ApiError> {
    owned_doctor(&state, &auth, hospital_doctor_id).await?;

    sqlx::query(
        r#"
        UPDATE hospital_doctor
        SET is_active = FALSE, updated_at = now()
        WHERE hospital_doctor_id = $1
        "#,
    )
    .bind(hospital_doctor_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(%hospital_doctor_id, "hospital doctor deactivated");
    Ok(Json(MessageOnly::new("Doctor removed successfully")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_req() -> AddDoctorRequest {
        AddDoctorRequest {
            name: "Dr. Mehta".into(),
            email: " Mehta@CityCare.in ".into(),
            phone: None,
            specialty: "Cardiologist".into(),
            experience: Some(12),
            qualifications: None,
            city: None,
            state: None,
            address: None,
        }
    }

    #[test]
    fn add_request_normalizes_email() {
        assert_eq!(add_req().validate().unwrap(), "mehta@citycare.in");
    }

    #[test]
    fn add_request_rejects_missing_and_malformed_fields() {
        let mut r = add_req();
        r.specialty = " ".into();
        assert!(r.validate().is_err());

        let mut r = add_req();
        r.email = "mehta".into();
        assert_eq!(r.validate().unwrap_err().to_string(), "Invalid email format");

        let mut r = add_req();
        r.experience = Some(-1);
        assert!(r.validate().is_err());

        let mut r = add_req();
        r.phone = Some("n/a".into());
        assert!(r.validate().is_err());
    }
}
