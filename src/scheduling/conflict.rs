use std::ops::Bound;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use sqlx::PgConnection;
use sqlx::postgres::types::PgRange;
use uuid::Uuid;

use super::lifecycle::AppointmentStatus;
use super::provider::ProviderKind;
use crate::error::ApiError;

/// Half-width of the window around a requested time in which another active
/// appointment of the same provider blocks the request.
pub const CONFLICT_WINDOW_MINUTES: i64 = 30;

pub fn conflict_window() -> Duration {
    Duration::minutes(CONFLICT_WINDOW_MINUTES)
}

/// Closed window `[t - 30min, t + 30min]`.
pub fn window_bounds(candidate: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    (candidate - conflict_window(), candidate + conflict_window())
}

/// Stored slot for the exclusion constraint: the closed range of half the
/// window on either side. Two such ranges intersect exactly when their centres
/// are at most 30 minutes apart.
pub fn slot_range(at: DateTime<Utc>) -> PgRange<DateTime<Utc>> {
    let half = conflict_window() / 2;
    PgRange {
        start: Bound::Included(at - half),
        end: Bound::Included(at + half),
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BookedSlot {
    pub appointment_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub status: AppointmentStatus,
}

/// True if any pending/confirmed slot (other than `exclude`) falls inside the
/// closed window around `candidate`.
pub fn has_conflict(booked: &[BookedSlot], candidate: DateTime<Utc>, exclude: Option<Uuid>) -> bool {
    let (start, end) = window_bounds(candidate);
    booked.iter().any(|b| {
        b.status.blocks_slot()
            && Some(b.appointment_id) != exclude
            && b.scheduled_at >= start
            && b.scheduled_at <= end
    })
}

/// Conflict check against the provider's book. Callers hold the provider row
/// lock (see [`ProviderKind::lock_provider`]) so the answer stays valid until
/// their write commits.
pub async fn provider_has_conflict<P: ProviderKind>(
    conn: &mut PgConnection,
    provider_id: Uuid,
    candidate: DateTime<Utc>,
    exclude: Option<Uuid>,
) -> Result<bool, ApiError> {
    let (start, end) = window_bounds(candidate);
    let sql = format!(
        r#"
        SELECT appointment_id, scheduled_at, status
        FROM {}
        WHERE provider_id = $1
          AND status IN (0, 1)
          AND scheduled_at BETWEEN $2 AND $3
        "#,
        P::APPOINTMENT_TABLE
    );

    let booked: Vec<BookedSlot> = sqlx::query_as::<_, BookedSlot>(&sql)
        .bind(provider_id)
        .bind(start)
        .bind(end)
        .fetch_all(&mut *conn)
        .await
        .map_err(ApiError::db)?;

    Ok(has_conflict(&booked, candidate, exclude))
}

/// Accepts RFC 3339, or a naive `YYYY-MM-DDTHH:MM[:SS]` read as UTC.
pub fn parse_appointment_date(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| ApiError::validation("Invalid date format"))
}

/// Requested times must be strictly after the server clock.
pub fn ensure_future(candidate: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), ApiError> {
    if candidate <= now {
        return Err(ApiError::validation("Appointment must be in the future"));
    }
    Ok(())
}
