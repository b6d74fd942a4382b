use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::conflict::{ensure_future, provider_has_conflict, slot_range};
use super::lifecycle::{AppointmentStatus, Transition};
use super::provider::ProviderKind;
use crate::error::ApiError;

pub const MAX_NOTES_LEN: usize = 500;

const APPOINTMENT_COLUMNS: &str = "appointment_id, provider_id, patient_id, hospital_id, \
     scheduled_at, time_label, status, notes, created_at, updated_at";

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AppointmentRow {
    pub appointment_id: Uuid,
    pub provider_id: Uuid,
    pub patient_id: Uuid,
    pub hospital_id: Option<Uuid>,
    #[serde(rename = "date")]
    pub scheduled_at: DateTime<Utc>,
    #[serde(rename = "time", skip_serializing_if = "Option::is_none")]
    pub time_label: Option<String>,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub provider_id: Uuid,
    pub patient_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub time_label: Option<String>,
    pub notes: Option<String>,
}

/// Who is touching an appointment, and therefore which rows they may see.
#[derive(Debug, Clone)]
pub enum Actor {
    Patient(Uuid),
    Providers(Vec<Uuid>),
}

impl Actor {
    fn column(&self) -> &'static str {
        match self {
            Actor::Patient(_) => "patient_id",
            Actor::Providers(_) => "provider_id",
        }
    }

    fn ids(&self) -> Vec<Uuid> {
        match self {
            Actor::Patient(id) => vec![*id],
            Actor::Providers(ids) => ids.clone(),
        }
    }
}

pub fn validate_notes(notes: Option<String>) -> Result<Option<String>, ApiError> {
    let notes = crate::models::clean_opt(notes);
    if notes.as_ref().is_some_and(|n| n.chars().count() > MAX_NOTES_LEN) {
        return Err(ApiError::validation(format!(
            "Notes must be less than {MAX_NOTES_LEN} characters"
        )));
    }
    Ok(notes)
}

/// Book a slot. The provider row lock serializes concurrent bookings for the
/// same provider; the table's exclusion constraint backs it up.
pub async fn create<P: ProviderKind>(
    db: &PgPool,
    req: NewAppointment,
    now: DateTime<Utc>,
) -> Result<AppointmentRow, ApiError> {
    ensure_future(req.scheduled_at, now)?;
    let notes = validate_notes(req.notes)?;

    let mut tx = db.begin().await.map_err(ApiError::db)?;

    let provider = P::lock_provider(&mut tx, req.provider_id)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| ApiError::not_found(P::LABEL))?;

    if provider_has_conflict::<P>(&mut tx, provider.provider_id, req.scheduled_at, None).await? {
        tracing::info!(
            provider_id = %provider.provider_id,
            requested = %req.scheduled_at,
            "booking rejected, slot taken"
        );
        return Err(ApiError::Conflict(
            "SLOT_UNAVAILABLE",
            "Selected time is not available. Please choose another slot.".into(),
        ));
    }

    let sql = format!(
        r#"
        INSERT INTO {} (provider_id, patient_id, hospital_id, scheduled_at, time_label, slot, status, notes)
        VALUES ($1, $2, $3, $4, $5, $6, 0, $7)
        RETURNING {APPOINTMENT_COLUMNS}
        "#,
        P::APPOINTMENT_TABLE
    );

    let row: AppointmentRow = sqlx::query_as::<_, AppointmentRow>(&sql)
        .bind(provider.provider_id)
        .bind(req.patient_id)
        .bind(provider.hospital_id)
        .bind(req.scheduled_at)
        .bind(req.time_label)
        .bind(slot_range(req.scheduled_at))
        .bind(notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(
        table = P::APPOINTMENT_TABLE,
        appointment_id = %row.appointment_id,
        provider_id = %row.provider_id,
        "appointment booked"
    );
    Ok(row)
}

/// Status-only transition as a conditional update: the row changes only if
/// it is still in one of the states the transition accepts.
pub async fn transition<P: ProviderKind>(
    db: &PgPool,
    appointment_id: Uuid,
    actor: &Actor,
    t: Transition,
) -> Result<AppointmentRow, ApiError> {
    let sql = format!(
        r#"
        UPDATE {}
        SET status = $2, updated_at = now()
        WHERE appointment_id = $1
          AND {} = ANY($3)
          AND status = ANY($4)
        RETURNING {APPOINTMENT_COLUMNS}
        "#,
        P::APPOINTMENT_TABLE,
        actor.column()
    );

    let updated: Option<AppointmentRow> = sqlx::query_as::<_, AppointmentRow>(&sql)
        .bind(appointment_id)
        .bind(t.target())
        .bind(actor.ids())
        .bind(t.allowed_codes())
        .fetch_optional(db)
        .await
        .map_err(ApiError::db)?;

    if let Some(row) = updated {
        tracing::info!(appointment_id = %appointment_id, status = row.status.as_str(), "appointment {}", t.verb());
        return Ok(row);
    }

    // Nothing matched: either not visible to this actor or in the wrong state.
    let current = find_for::<P>(db, appointment_id, actor)
        .await?
        .ok_or_else(|| ApiError::not_found("Appointment"))?;
    t.check(current.status)?;
    Err(ApiError::Conflict(
        "STALE_STATE",
        "Appointment changed concurrently, please retry".into(),
    ))
}

/// Move an appointment to a new time. On any failure the stored time and
/// status are left as they were.
pub async fn reschedule<P: ProviderKind>(
    db: &PgPool,
    appointment_id: Uuid,
    providers: &[Uuid],
    new_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<AppointmentRow, ApiError> {
    ensure_future(new_time, now)?;

    let mut tx = db.begin().await.map_err(ApiError::db)?;

    let sql = format!(
        "SELECT provider_id FROM {} WHERE appointment_id = $1 AND provider_id = ANY($2)",
        P::APPOINTMENT_TABLE
    );
    let provider_id: Uuid = sqlx::query_scalar::<_, Uuid>(&sql)
        .bind(appointment_id)
        .bind(providers)
        .fetch_optional(&mut *tx)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("Appointment"))?;

    // provider lock first, same order as create
    P::lock_provider(&mut tx, provider_id).await?;

    let sql = format!(
        "SELECT status FROM {} WHERE appointment_id = $1 FOR UPDATE",
        P::APPOINTMENT_TABLE
    );
    let status: AppointmentStatus = sqlx::query_scalar::<_, AppointmentStatus>(&sql)
        .bind(appointment_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(ApiError::db)?;
    Transition::Reschedule.check(status)?;

    if provider_has_conflict::<P>(&mut tx, provider_id, new_time, Some(appointment_id)).await? {
        tracing::info!(appointment_id = %appointment_id, requested = %new_time, "reschedule rejected, slot taken");
        return Err(ApiError::Conflict(
            "SLOT_UNAVAILABLE",
            "New time not available".into(),
        ));
    }

    let sql = format!(
        r#"
        UPDATE {}
        SET scheduled_at = $2, slot = $3, status = 0, updated_at = now()
        WHERE appointment_id = $1
        RETURNING {APPOINTMENT_COLUMNS}
        "#,
        P::APPOINTMENT_TABLE
    );
    let row: AppointmentRow = sqlx::query_as::<_, AppointmentRow>(&sql)
        .bind(appointment_id)
        .bind(new_time)
        .bind(slot_range(new_time))
        .fetch_one(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;
    tracing::info!(appointment_id = %appointment_id, date = %new_time, "appointment rescheduled");
    Ok(row)
}

pub async fn find_for<P: ProviderKind>(
    db: &PgPool,
    appointment_id: Uuid,
    actor: &Actor,
) -> Result<Option<AppointmentRow>, ApiError> {
    let sql = format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM {} WHERE appointment_id = $1 AND {} = ANY($2)",
        P::APPOINTMENT_TABLE,
        actor.column()
    );
    sqlx::query_as::<_, AppointmentRow>(&sql)
        .bind(appointment_id)
        .bind(actor.ids())
        .fetch_optional(db)
        .await
        .map_err(ApiError::db)
}

pub async fn list_for<P: ProviderKind>(
    db: &PgPool,
    actor: &Actor,
) -> Result<Vec<AppointmentRow>, ApiError> {
    let sql = format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM {} WHERE {} = ANY($1) ORDER BY scheduled_at ASC",
        P::APPOINTMENT_TABLE,
        actor.column()
    );
    sqlx::query_as::<_, AppointmentRow>(&sql)
        .bind(actor.ids())
        .fetch_all(db)
        .await
        .map_err(ApiError::db)
}
