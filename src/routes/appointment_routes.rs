// src/routes/appointment_routes.rs
//
// Doctor-direct appointments, plus the handlers shared with the
// hospital-doctor book. Both books run on the same scheduling store,
// parameterized by ProviderKind.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth::Role,
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, resolve_patient_id},
    scheduling::{
        Actor, AppointmentRow, DoctorProvider, NewAppointment, ProviderKind, Transition,
        conflict::parse_appointment_date, store,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_appointment))
        .route("/mine", get(mine::<DoctorProvider>))
        .route("/{appointment_id}", get(get_one::<DoctorProvider>))
        .route("/{appointment_id}/confirm", patch(confirm::<DoctorProvider>))
        .route("/{appointment_id}/cancel", patch(cancel::<DoctorProvider>))
        .route("/{appointment_id}/complete", patch(complete::<DoctorProvider>))
        .route("/{appointment_id}/reschedule", patch(reschedule::<DoctorProvider>))
}

/* -------------------------
   Who is acting
--------------------------*/

/// Patients see their own bookings; provider-side accounts see the books
/// they act for. Anyone else has no appointment scope.
pub(crate) async fn actor_for<P: ProviderKind>(
    state: &AppState,
    auth: &AuthContext,
) -> Result<Actor, ApiError> {
    if auth.role == Role::Patient {
        let patient_id = resolve_patient_id(&state.db, auth.user_id).await?;
        return Ok(Actor::Patient(patient_id));
    }
    if auth.role == P::ACTING_ROLE {
        return Ok(Actor::Providers(P::acting_providers(&state.db, auth).await?));
    }
    Err(ApiError::Forbidden(
        "FORBIDDEN",
        "No appointment access for this account".into(),
    ))
}

pub(crate) async fn provider_actor<P: ProviderKind>(
    state: &AppState,
    auth: &AuthContext,
) -> Result<Vec<Uuid>, ApiError> {
    auth.require(P::ACTING_ROLE)?;
    P::acting_providers(&state.db, auth).await
}

/* -------------------------
   Shared handlers
--------------------------*/

pub(crate) async fn apply<P: ProviderKind>(
    state: &AppState,
    appointment_id: Uuid,
    actor: &Actor,
    t: Transition,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let row = store::transition::<P>(&state.db, appointment_id, actor, t).await?;
    Ok(Json(
        ApiOk::new(row).with_message(format!("Appointment {}", t.verb())),
    ))
}

pub async fn confirm<P: ProviderKind>(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let providers = provider_actor::<P>(&state, &auth).await?;
    apply::<P>(&state, appointment_id, &Actor::Providers(providers), Transition::Confirm).await
}

pub async fn complete<P: ProviderKind>(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let providers = provider_actor::<P>(&state, &auth).await?;
    apply::<P>(&state, appointment_id, &Actor::Providers(providers), Transition::Complete).await
}

/// Either side may cancel.
pub async fn cancel<P: ProviderKind>(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let actor = actor_for::<P>(&state, &auth).await?;
    apply::<P>(&state, appointment_id, &actor, Transition::Cancel).await
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub date: Option<String>,
}

impl RescheduleRequest {
    pub fn new_time(&self) -> Result<chrono::DateTime<Utc>, ApiError> {
        let raw = self
            .date
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ApiError::validation("New date is required"))?;
        parse_appointment_date(raw)
    }
}

pub async fn reschedule<P: ProviderKind>(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<RescheduleRequest>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let new_time = req.new_time()?;
    let providers = provider_actor::<P>(&state, &auth).await?;
    let row = store::reschedule::<P>(&state.db, appointment_id, &providers, new_time, Utc::now()).await?;
    Ok(Json(ApiOk::new(row).with_message("Appointment rescheduled")))
}

pub async fn mine<P: ProviderKind>(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<AppointmentRow>>>, ApiError> {
    let actor = actor_for::<P>(&state, &auth).await?;
    let rows = store::list_for::<P>(&state.db, &actor).await?;
    Ok(Json(ApiOk::list(rows)))
}

pub async fn get_one<P: ProviderKind>(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let actor = actor_for::<P>(&state, &auth).await?;
    let row = store::find_for::<P>(&state.db, appointment_id, &actor)
        .await?
        .ok_or_else(|| ApiError::not_found("Appointment"))?;
    Ok(Json(ApiOk::new(row)))
}

/* -------------------------
   Doctor-direct booking
--------------------------*/

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub doctor_id: Option<Uuid>,
    pub date: Option<String>,
    pub notes: Option<String>,
}

impl CreateAppointmentRequest {
    pub fn validate(&self) -> Result<(Uuid, chrono::DateTime<Utc>), ApiError> {
        let doctor_id = self
            .doctor_id
            .ok_or_else(|| ApiError::validation("Doctor ID is required"))?;
        let raw = self
            .date
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ApiError::validation("Appointment date is required"))?;
        Ok((doctor_id, parse_appointment_date(raw)?))
    }
}

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<ApiOk<AppointmentRow>>), ApiError> {
    auth.require(Role::Patient)?;
    let (doctor_id, scheduled_at) = req.validate()?;
    let patient_id = resolve_patient_id(&state.db, auth.user_id).await?;

    let row = store::create::<DoctorProvider>(
        &state.db,
        NewAppointment {
            provider_id: doctor_id,
            patient_id,
            scheduled_at,
            time_label: None,
            notes: req.notes,
        },
        Utc::now(),
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiOk::new(row).with_message("Appointment booked")),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn create_requires_doctor_and_date() {
        let req = CreateAppointmentRequest {
            doctor_id: None,
            date: Some("2030-01-01T10:00:00Z".into()),
            notes: None,
        };
        assert_eq!(req.validate().unwrap_err().to_string(), "Doctor ID is required");

        let req = CreateAppointmentRequest {
            doctor_id: Some(Uuid::new_v4()),
            date: Some("  ".into()),
            notes: None,
        };
        assert_eq!(
            req.validate().unwrap_err().to_string(),
            "Appointment date is required"
        );

        let req = CreateAppointmentRequest {
            doctor_id: Some(Uuid::new_v4()),
            date: Some("next tuesday".into()),
            notes: None,
        };
        assert_matches!(req.validate(), Err(ApiError::BadRequest("VALIDATION_ERROR", _)));
    }

    #[test]
    fn reschedule_parses_new_date() {
        let req = RescheduleRequest {
            date: Some("2030-01-01T10:00:00+05:30".into()),
        };
        assert_eq!(req.new_time().unwrap().to_rfc3339(), "2030-01-01T04:30:00+00:00");
        assert!(RescheduleRequest { date: None }.new_time().is_err());
    }
}
