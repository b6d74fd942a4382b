// src/routes/patient_routes.rs

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth::{Role, is_valid_phone},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, DoctorRow, PATIENT_SELECT, PatientRow, clean_opt, resolve_patient_id},
    routes::doctor_routes::attached_doctors,
};

pub const GENDERS: [&str; 3] = ["Male", "Female", "Other"];

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me).patch(update_me))
        .route("/me/doctors", get(my_doctors))
        .route("/{patient_id}", get(get_patient))
}

pub fn validate_age(age: Option<i32>) -> Result<(), ApiError> {
    match age {
        Some(a) if !(0..=150).contains(&a) => {
            Err(ApiError::validation("Please provide a valid age (0-150)"))
        }
        _ => Ok(()),
    }
}

pub fn validate_gender(gender: Option<String>) -> Result<Option<String>, ApiError> {
    match gender {
        Some(g) if !GENDERS.contains(&g.as_str()) => {
            Err(ApiError::validation("Please provide a valid gender"))
        }
        other => Ok(other),
    }
}

async fn load_patient(state: &AppState, patient_id: Uuid) -> Result<PatientRow, ApiError> {
    let sql = format!("{PATIENT_SELECT} WHERE p.patient_id = $1");
    sqlx::query_as::<_, PatientRow>(&sql)
        .bind(patient_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("Patient"))
}

pub async fn get_me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    auth.require(Role::Patient)?;
    let patient_id = resolve_patient_id(&state.db, auth.user_id).await?;
    Ok(Json(ApiOk::new(load_patient(&state, patient_id).await?)))
}

pub async fn get_patient(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    Ok(Json(ApiOk::new(load_patient(&state, patient_id).await?)))
}

#[derive(Debug, Default, Deserialize)]
pub struct LocationUpdate {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EmergencyContactUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub relationship: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdatePatientRequest {
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub location: Option<LocationUpdate>,
    pub emergency_contact: Option<EmergencyContactUpdate>,
}

pub fn validate_update(req: &UpdatePatientRequest) -> Result<(), ApiError> {
    validate_age(req.age)?;
    validate_gender(req.gender.clone())?;
    if let Some(loc) = &req.location {
        if loc.latitude.is_some_and(|v| !(-90.0..=90.0).contains(&v)) {
            return Err(ApiError::validation("Invalid latitude value"));
        }
        if loc.longitude.is_some_and(|v| !(-180.0..=180.0).contains(&v)) {
            return Err(ApiError::validation("Invalid longitude value"));
        }
    }
    if let Some(contact) = &req.emergency_contact {
        if contact
            .phone
            .as_deref()
            .map(str::trim)
            .is_some_and(|p| !p.is_empty() && !is_valid_phone(p))
        {
            return Err(ApiError::validation("Invalid emergency contact phone"));
        }
    }
    Ok(())
}

pub async fn update_me(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<UpdatePatientRequest>,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    auth.require(Role::Patient)?;
    validate_update(&req)?;

    let patient_id = resolve_patient_id(&state.db, auth.user_id).await?;
    let existing = load_patient(&state, patient_id).await?;

    let loc = req.location.unwrap_or_default();
    let contact = req.emergency_contact.unwrap_or_default();

    sqlx::query(
        r#"
        UPDATE patient
        SET age = $1,
            gender = $2,
            latitude = $3,
            longitude = $4,
            address = $5,
            city = $6,
            state = $7,
            emergency_contact_name = $8,
            emergency_contact_phone = $9,
            emergency_contact_relationship = $10
        WHERE patient_id = $11
        "#,
    )
    .bind(req.age.or(existing.age))
    .bind(clean_opt(req.gender).or(existing.gender))
    .bind(loc.latitude.or(existing.latitude))
    .bind(loc.longitude.or(existing.longitude))
    .bind(clean_opt(loc.address).or(existing.address))
    .bind(clean_opt(loc.city).or(existing.city))
    .bind(clean_opt(loc.state).or(existing.state))
    .bind(clean_opt(contact.name).or(existing.emergency_contact_name))
    .bind(clean_opt(contact.phone).or(existing.emergency_contact_phone))
    .bind(clean_opt(contact.relationship).or(existing.emergency_contact_relationship))
    .bind(patient_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    let updated = load_patient(&state, patient_id).await?;
    Ok(Json(
        ApiOk::new(updated).with_message("Profile updated successfully"),
    ))
}

pub async fn my_doctors(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<DoctorRow>>>, ApiError> {
    auth.require(Role::Patient)?;
    let patient_id = resolve_patient_id(&state.db, auth.user_id).await?;
    let rows = attached_doctors(&state, patient_id).await?;
    Ok(Json(ApiOk::list(rows)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_and_gender_rules() {
        assert!(validate_age(None).is_ok());
        assert!(validate_age(Some(0)).is_ok());
        assert!(validate_age(Some(150)).is_ok());
        assert!(validate_age(Some(151)).is_err());
        assert!(validate_age(Some(-1)).is_err());

        assert_eq!(validate_gender(Some("Other".into())).unwrap(), Some("Other".into()));
        assert!(validate_gender(Some("male".into())).is_err());
        assert_eq!(validate_gender(None).unwrap(), None);
    }

    #[test]
    fn update_checks_nested_location_and_contact() {
        let req: UpdatePatientRequest = serde_json::from_value(serde_json::json!({
            "location": { "latitude": 95.0 }
        }))
        .unwrap();
        assert_eq!(validate_update(&req).unwrap_err().to_string(), "Invalid latitude value");

        let req: UpdatePatientRequest = serde_json::from_value(serde_json::json!({
            "age": 34,
            "location": { "latitude": 19.07, "longitude": 72.87, "city": "Mumbai" },
            "emergency_contact": { "name": "Ravi", "phone": "+91 98200 00000" }
        }))
        .unwrap();
        assert!(validate_update(&req).is_ok());

        let req = UpdatePatientRequest {
            emergency_contact: Some(EmergencyContactUpdate {
                phone: Some("call me".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(validate_update(&req).is_err());
    }
}
