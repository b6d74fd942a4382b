// src/routes/hospital_appointment_routes.rs

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth::Role,
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, resolve_patient_id},
    routes::appointment_routes::{apply, cancel, get_one, mine, provider_actor, reschedule},
    scheduling::{
        Actor, AppointmentRow, AppointmentStatus, HospitalDoctorProvider, NewAppointment,
        Transition, conflict::parse_appointment_date, store,
    },
};

type H = HospitalDoctorProvider;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_appointment))
        .route("/patient", get(patient_appointments))
        .route("/mine", get(mine::<H>))
        .route("/doctor/{hospital_doctor_id}", get(doctor_schedule))
        .route("/{appointment_id}", get(get_one::<H>))
        .route("/{appointment_id}/status", patch(update_status))
        .route("/{appointment_id}/cancel", patch(cancel::<H>))
        .route("/{appointment_id}/reschedule", patch(reschedule::<H>))
}

#[derive(Debug, Deserialize)]
pub struct CreateHospitalAppointmentRequest {
    pub hospital_doctor_id: Option<Uuid>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub notes: Option<String>,
}

/// The booked instant comes from `date` alone: a full timestamp, or a bare
/// `YYYY-MM-DD` read as midnight UTC. `time` is a display label only.
pub fn resolve_slot(date: &str) -> Result<DateTime<Utc>, ApiError> {
    if let Ok(at) = parse_appointment_date(date) {
        return Ok(at);
    }
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map(|day| day.and_time(NaiveTime::MIN).and_utc())
        .map_err(|_| ApiError::validation("Invalid date format"))
}

impl CreateHospitalAppointmentRequest {
    pub fn validate(&self) -> Result<(Uuid, DateTime<Utc>, String), ApiError> {
        let nonblank = |s: &Option<String>| {
            s.as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let doctor_id = self
            .hospital_doctor_id
            .ok_or_else(|| ApiError::validation("Doctor ID is required"))?;
        let date = nonblank(&self.date)
            .ok_or_else(|| ApiError::validation("Appointment date is required"))?;
        let time = self
            .time
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ApiError::validation("Appointment time is required"))?;
        let at = resolve_slot(&date)?;
        Ok((doctor_id, at, time))
    }
}

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateHospitalAppointmentRequest>,
) -> Result<(StatusCode, Json<ApiOk<AppointmentRow>>), ApiError> {
    auth.require(Role::Patient)?;
    let (provider_id, scheduled_at, time_label) = req.validate()?;
    let patient_id = resolve_patient_id(&state.db, auth.user_id).await?;

    let row = store::create::<H>(
        &state.db,
        NewAppointment {
            provider_id,
            patient_id,
            scheduled_at,
            time_label: Some(time_label),
            notes: req.notes,
        },
        Utc::now(),
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiOk::new(row).with_message("Appointment booked successfully")),
    ))
}

pub async fn patient_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<AppointmentRow>>>, ApiError> {
    auth.require(Role::Patient)?;
    let patient_id = resolve_patient_id(&state.db, auth.user_id).await?;
    let rows = store::list_for::<H>(&state.db, &Actor::Patient(patient_id)).await?;
    Ok(Json(ApiOk::list(rows)))
}

/// One doctor's book, for the hospital that employs them.
pub async fn doctor_schedule(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(hospital_doctor_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<AppointmentRow>>>, ApiError> {
    let providers = provider_actor::<H>(&state, &auth).await?;
    if !providers.contains(&hospital_doctor_id) {
        return Err(ApiError::not_found("Doctor"));
    }
    let rows = store::list_for::<H>(&state.db, &Actor::Providers(vec![hospital_doctor_id])).await?;
    Ok(Json(ApiOk::list(rows)))
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
}

impl StatusUpdateRequest {
    pub fn transition(&self) -> Result<Transition, ApiError> {
        AppointmentStatus::parse(self.status.trim())
            .and_then(Transition::for_target)
            .ok_or_else(|| ApiError::validation("Invalid status"))
    }
}

pub async fn update_status(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<StatusUpdateRequest>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let t = req.transition()?;
    let providers = provider_actor::<H>(&state, &auth).await?;
    apply::<H>(&state, appointment_id, &Actor::Providers(providers), t).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::conflict::{BookedSlot, has_conflict};

    fn slot(id: Uuid, at: DateTime<Utc>) -> BookedSlot {
        BookedSlot {
            appointment_id: id,
            scheduled_at: at,
            status: AppointmentStatus::Pending,
        }
    }

    #[test]
    fn bare_date_books_midnight_utc() {
        let at = resolve_slot("2030-05-01").unwrap();
        assert_eq!(at.to_rfc3339(), "2030-05-01T00:00:00+00:00");
        let at = resolve_slot("2030-05-01T09:00:00Z").unwrap();
        assert_eq!(at.to_rfc3339(), "2030-05-01T09:00:00+00:00");
        assert!(resolve_slot("01/05/2030").is_err());
    }

    #[test]
    fn time_label_never_moves_the_slot() {
        let request = |time: &str| CreateHospitalAppointmentRequest {
            hospital_doctor_id: Some(Uuid::nil()),
            date: Some("2030-03-04".into()),
            time: Some(time.into()),
            notes: None,
        };
        let (_, first, label) = request("09:00").validate().unwrap();
        assert_eq!(label, "09:00");
        let (_, second, _) = request("15:00").validate().unwrap();
        let (_, morning, label) = request("Morning").validate().unwrap();
        assert_eq!(label, "Morning");
        assert_eq!(first, second);
        assert_eq!(first, morning);

        // same day, different label: still the same slot on the doctor's book
        let booked = [slot(Uuid::new_v4(), first)];
        assert!(has_conflict(&booked, second, None));
    }

    #[test]
    fn create_request_needs_time() {
        let req = CreateHospitalAppointmentRequest {
            hospital_doctor_id: Some(Uuid::new_v4()),
            date: Some("2030-05-01".into()),
            time: None,
            notes: None,
        };
        assert_eq!(
            req.validate().unwrap_err().to_string(),
            "Appointment time is required"
        );
    }

    #[test]
    fn status_bodies() {
        let t = |s: &str| StatusUpdateRequest { status: s.into() }.transition();
        assert_eq!(t("confirmed").unwrap(), Transition::Confirm);
        assert_eq!(t("completed").unwrap(), Transition::Complete);
        assert_eq!(t("cancelled").unwrap(), Transition::Cancel);
        assert!(t("pending").is_err());
        assert!(t("archived").is_err());
    }
}
