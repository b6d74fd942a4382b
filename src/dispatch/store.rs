use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{DispatchPolicy, MAX_SNAPSHOT_HOSPITALS};
use super::geo::{GeoPoint, find_nearby_hospitals};
use super::lifecycle::{EmergencyAction, EmergencyStatus, Severity, check_accept};
use crate::error::ApiError;

pub const MAX_DESCRIPTION_LEN: usize = 500;

const OPEN_PER_PATIENT_INDEX: &str = "emergency_one_open_per_patient";

const EMERGENCY_COLUMNS: &str = "emergency_id, patient_id, latitude, longitude, address, \
     description, severity, status, accepted_by_hospital_id, accepted_at, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
pub struct EmergencyRow {
    pub emergency_id: Uuid,
    pub patient_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
    pub description: Option<String>,
    pub severity: Severity,
    pub status: EmergencyStatus,
    pub accepted_by_hospital_id: Option<Uuid>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One hospital in the list fixed when the SOS was raised.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SnapshotEntry {
    #[serde(skip)]
    pub emergency_id: Uuid,
    pub hospital_id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub emergency_phone: Option<String>,
    pub rank: i16,
    #[serde(rename = "distance")]
    pub distance_km: f64,
    pub notified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatientLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcceptedBy {
    pub hospital_id: Uuid,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmergencyView {
    pub emergency_id: Uuid,
    pub patient_id: Uuid,
    pub patient_location: PatientLocation,
    pub description: Option<String>,
    pub severity: Severity,
    pub status: EmergencyStatus,
    pub accepted_by: Option<AcceptedBy>,
    pub nearby_hospitals: Vec<SnapshotEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmergencyView {
    pub fn from_parts(row: EmergencyRow, nearby_hospitals: Vec<SnapshotEntry>) -> Self {
        let accepted_by = match (row.accepted_by_hospital_id, row.accepted_at) {
            (Some(hospital_id), Some(accepted_at)) => Some(AcceptedBy {
                hospital_id,
                accepted_at,
            }),
            _ => None,
        };
        Self {
            emergency_id: row.emergency_id,
            patient_id: row.patient_id,
            patient_location: PatientLocation {
                latitude: row.latitude,
                longitude: row.longitude,
                address: row.address,
            },
            description: row.description,
            severity: row.severity,
            status: row.status,
            accepted_by,
            nearby_hospitals,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }

    pub fn lists_hospital(&self, hospital_id: Uuid) -> bool {
        self.nearby_hospitals.iter().any(|n| n.hospital_id == hospital_id)
    }
}

/// Pair each row with its snapshot entries, preserving row order.
pub fn assemble(rows: Vec<EmergencyRow>, entries: Vec<SnapshotEntry>) -> Vec<EmergencyView> {
    let mut by_emergency: HashMap<Uuid, Vec<SnapshotEntry>> = HashMap::new();
    for e in entries {
        by_emergency.entry(e.emergency_id).or_default().push(e);
    }
    rows.into_iter()
        .map(|row| {
            let mut nearby = by_emergency.remove(&row.emergency_id).unwrap_or_default();
            nearby.sort_by_key(|n| n.rank);
            EmergencyView::from_parts(row, nearby)
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct NewEmergency {
    pub patient_id: Uuid,
    pub location: GeoPoint,
    pub address: Option<String>,
    pub description: Option<String>,
    pub severity: Severity,
}

/// Who is closing out a request.
#[derive(Debug, Clone, Copy)]
pub enum EmergencyActor {
    Patient(Uuid),
    Hospital(Uuid),
}

impl EmergencyActor {
    fn column(self) -> &'static str {
        match self {
            EmergencyActor::Patient(_) => "patient_id",
            EmergencyActor::Hospital(_) => "accepted_by_hospital_id",
        }
    }

    fn id(self) -> Uuid {
        match self {
            EmergencyActor::Patient(id) | EmergencyActor::Hospital(id) => id,
        }
    }
}

pub fn validate_description(description: Option<String>) -> Result<Option<String>, ApiError> {
    let description = crate::models::clean_opt(description);
    if description
        .as_ref()
        .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN)
    {
        return Err(ApiError::validation(format!(
            "Description must be less than {MAX_DESCRIPTION_LEN} characters"
        )));
    }
    Ok(description)
}

fn already_open() -> ApiError {
    ApiError::Conflict(
        "ACTIVE_EMERGENCY",
        "Patient already has an active emergency request".into(),
    )
}

fn map_insert_error(e: sqlx::Error) -> ApiError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.constraint() == Some(OPEN_PER_PATIENT_INDEX) {
            return already_open();
        }
    }
    ApiError::db(e)
}

/// Raise an SOS: take the nearby-hospital snapshot and store it with the
/// request in one transaction.
pub async fn create(
    db: &PgPool,
    policy: DispatchPolicy,
    req: NewEmergency,
) -> Result<EmergencyView, ApiError> {
    let description = validate_description(req.description)?;
    let address = crate::models::clean_opt(req.address);

    let open: bool = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM emergency WHERE patient_id = $1 AND status IN (0, 1))",
    )
    .bind(req.patient_id)
    .fetch_one(db)
    .await
    .map_err(ApiError::db)?;
    if open {
        return Err(already_open());
    }

    let limit = usize::try_from(policy.max_hospitals.min(MAX_SNAPSHOT_HOSPITALS)).unwrap_or(0);
    let nearby = find_nearby_hospitals(db, req.location, policy.radius_km, Some(limit), true).await?;

    let mut tx = db.begin().await.map_err(ApiError::db)?;

    let sql = format!(
        r#"
        INSERT INTO emergency (patient_id, latitude, longitude, address, description, severity, status)
        VALUES ($1, $2, $3, $4, $5, $6, 0)
        RETURNING {EMERGENCY_COLUMNS}
        "#
    );
    let row: EmergencyRow = sqlx::query_as::<_, EmergencyRow>(&sql)
        .bind(req.patient_id)
        .bind(req.location.latitude)
        .bind(req.location.longitude)
        .bind(address)
        .bind(description)
        .bind(req.severity)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_insert_error)?;

    let mut entries = Vec::with_capacity(nearby.len());
    for (i, n) in nearby.into_iter().enumerate() {
        let rank = i16::try_from(i + 1)
            .map_err(|_| ApiError::Internal(format!("snapshot rank {} out of range", i + 1)))?;
        sqlx::query(
            r#"
            INSERT INTO emergency_nearby_hospital (emergency_id, hospital_id, rank, distance_km, notified_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(row.emergency_id)
        .bind(n.item.hospital_id)
        .bind(rank)
        .bind(n.distance)
        .bind(row.created_at)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;

        entries.push(SnapshotEntry {
            emergency_id: row.emergency_id,
            hospital_id: n.item.hospital_id,
            name: n.item.name,
            phone: n.item.phone,
            emergency_phone: n.item.emergency_phone,
            rank,
            distance_km: n.distance,
            notified_at: row.created_at,
        });
    }

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(
        emergency_id = %row.emergency_id,
        patient_id = %row.patient_id,
        hospitals = entries.len(),
        "emergency dispatched"
    );
    if entries.is_empty() {
        tracing::warn!(emergency_id = %row.emergency_id, "no emergency hospitals in range");
    }

    Ok(EmergencyView::from_parts(row, entries))
}

async fn load_snapshots(db: &PgPool, ids: &[Uuid]) -> Result<Vec<SnapshotEntry>, ApiError> {
    sqlx::query_as::<_, SnapshotEntry>(
        r#"
        SELECT enh.emergency_id, enh.hospital_id, h.name, h.phone, h.emergency_phone,
               enh.rank, enh.distance_km, enh.notified_at
        FROM emergency_nearby_hospital enh
        JOIN hospital h ON h.hospital_id = enh.hospital_id
        WHERE enh.emergency_id = ANY($1)
        ORDER BY enh.emergency_id, enh.rank
        "#,
    )
    .bind(ids)
    .fetch_all(db)
    .await
    .map_err(ApiError::db)
}

async fn with_snapshots(db: &PgPool, rows: Vec<EmergencyRow>) -> Result<Vec<EmergencyView>, ApiError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = rows.iter().map(|r| r.emergency_id).collect();
    let entries = load_snapshots(db, &ids).await?;
    Ok(assemble(rows, entries))
}

async fn find_row(db: &PgPool, emergency_id: Uuid) -> Result<EmergencyRow, ApiError> {
    let sql = format!("SELECT {EMERGENCY_COLUMNS} FROM emergency WHERE emergency_id = $1");
    sqlx::query_as::<_, EmergencyRow>(&sql)
        .bind(emergency_id)
        .fetch_optional(db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("Emergency"))
}

pub async fn load(db: &PgPool, emergency_id: Uuid) -> Result<EmergencyView, ApiError> {
    let row = find_row(db, emergency_id).await?;
    let entries = load_snapshots(db, &[emergency_id]).await?;
    Ok(EmergencyView::from_parts(row, entries))
}

/// Compare-and-swap accept: succeeds only while the request is Active and
/// the hospital is in its snapshot, so at most one hospital wins.
pub async fn accept(
    db: &PgPool,
    emergency_id: Uuid,
    hospital_id: Uuid,
) -> Result<EmergencyView, ApiError> {
    let sql = format!(
        r#"
        UPDATE emergency
        SET status = 1, accepted_by_hospital_id = $2, accepted_at = now(), updated_at = now()
        WHERE emergency_id = $1
          AND status = 0
          AND EXISTS (
              SELECT 1 FROM emergency_nearby_hospital
              WHERE emergency_id = $1 AND hospital_id = $2
          )
        RETURNING {EMERGENCY_COLUMNS}
        "#
    );
    let updated: Option<EmergencyRow> = sqlx::query_as::<_, EmergencyRow>(&sql)
        .bind(emergency_id)
        .bind(hospital_id)
        .fetch_optional(db)
        .await
        .map_err(ApiError::db)?;

    match updated {
        Some(row) => {
            tracing::info!(emergency_id = %emergency_id, hospital_id = %hospital_id, "emergency accepted");
            let entries = load_snapshots(db, &[emergency_id]).await?;
            Ok(EmergencyView::from_parts(row, entries))
        }
        None => {
            let current = load(db, emergency_id).await?;
            let listed: Vec<Uuid> = current.nearby_hospitals.iter().map(|n| n.hospital_id).collect();
            check_accept(current.status, &listed, hospital_id)?;
            Err(ApiError::Conflict(
                "STALE_STATE",
                "Emergency request changed concurrently, please retry".into(),
            ))
        }
    }
}

/// Complete or cancel, conditional on the current status and on the actor
/// owning the request (patient) or having accepted it (hospital).
pub async fn finish(
    db: &PgPool,
    emergency_id: Uuid,
    actor: EmergencyActor,
    action: EmergencyAction,
) -> Result<EmergencyView, ApiError> {
    if action == EmergencyAction::Accept {
        return Err(ApiError::Internal("accept is not a closing action".into()));
    }

    let sql = format!(
        r#"
        UPDATE emergency
        SET status = $2, updated_at = now()
        WHERE emergency_id = $1
          AND {} = $3
          AND status = ANY($4)
        RETURNING {EMERGENCY_COLUMNS}
        "#,
        actor.column()
    );
    let updated: Option<EmergencyRow> = sqlx::query_as::<_, EmergencyRow>(&sql)
        .bind(emergency_id)
        .bind(action.target())
        .bind(actor.id())
        .bind(action.allowed_codes())
        .fetch_optional(db)
        .await
        .map_err(ApiError::db)?;

    if let Some(row) = updated {
        tracing::info!(emergency_id = %emergency_id, status = ?row.status, "emergency closed");
        let entries = load_snapshots(db, &[emergency_id]).await?;
        return Ok(EmergencyView::from_parts(row, entries));
    }

    let current = find_row(db, emergency_id).await?;
    let owns = match actor {
        EmergencyActor::Patient(id) => current.patient_id == id,
        EmergencyActor::Hospital(id) => current.accepted_by_hospital_id == Some(id),
    };
    if !owns {
        // a hospital that has not accepted yet hits the status rule first
        action.check(current.status)?;
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Not allowed to modify this emergency request".into(),
        ));
    }
    action.check(current.status)?;
    Err(ApiError::Conflict(
        "STALE_STATE",
        "Emergency request changed concurrently, please retry".into(),
    ))
}

pub async fn list_for_patient(db: &PgPool, patient_id: Uuid) -> Result<Vec<EmergencyView>, ApiError> {
    let sql = format!(
        "SELECT {EMERGENCY_COLUMNS} FROM emergency WHERE patient_id = $1 ORDER BY created_at DESC"
    );
    let rows: Vec<EmergencyRow> = sqlx::query_as::<_, EmergencyRow>(&sql)
        .bind(patient_id)
        .fetch_all(db)
        .await
        .map_err(ApiError::db)?;
    with_snapshots(db, rows).await
}

/// Active requests that list this hospital, most severe first.
pub async fn list_incoming_for_hospital(
    db: &PgPool,
    hospital_id: Uuid,
) -> Result<Vec<EmergencyView>, ApiError> {
    let sql = format!(
        r#"
        SELECT {EMERGENCY_COLUMNS}
        FROM emergency
        WHERE status = 0
          AND emergency_id IN (
              SELECT emergency_id FROM emergency_nearby_hospital WHERE hospital_id = $1
          )
        ORDER BY severity DESC, created_at ASC
        "#
    );
    let rows: Vec<EmergencyRow> = sqlx::query_as::<_, EmergencyRow>(&sql)
        .bind(hospital_id)
        .fetch_all(db)
        .await
        .map_err(ApiError::db)?;
    with_snapshots(db, rows).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{insert_hospital, insert_patient, north_of, random_origin, test_pool};
    use assert_matches::assert_matches;

    fn row(status: EmergencyStatus) -> EmergencyRow {
        let now = Utc::now();
        EmergencyRow {
            emergency_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            latitude: 19.07,
            longitude: 72.87,
            address: None,
            description: Some("chest pain".into()),
            severity: Severity::High,
            status,
            accepted_by_hospital_id: None,
            accepted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn entry(emergency_id: Uuid, rank: i16) -> SnapshotEntry {
        SnapshotEntry {
            emergency_id,
            hospital_id: Uuid::new_v4(),
            name: format!("Hospital {rank}"),
            phone: None,
            emergency_phone: None,
            rank,
            distance_km: rank as f64,
            notified_at: Utc::now(),
        }
    }

    #[test]
    fn assemble_groups_snapshot_by_request() {
        let a = row(EmergencyStatus::Active);
        let b = row(EmergencyStatus::Cancelled);
        let entries = vec![entry(a.emergency_id, 2), entry(b.emergency_id, 1), entry(a.emergency_id, 1)];
        let (a_id, b_id) = (a.emergency_id, b.emergency_id);

        let views = assemble(vec![a, b], entries);
        assert_eq!(views[0].emergency_id, a_id);
        assert_eq!(
            views[0].nearby_hospitals.iter().map(|n| n.rank).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(views[1].emergency_id, b_id);
        assert_eq!(views[1].nearby_hospitals.len(), 1);
    }

    #[test]
    fn accepted_by_appears_only_once_stamped() {
        let mut r = row(EmergencyStatus::Accepted);
        let hospital = Uuid::new_v4();
        r.accepted_by_hospital_id = Some(hospital);
        r.accepted_at = Some(Utc::now());
        let v = serde_json::to_value(EmergencyView::from_parts(r, vec![])).unwrap();
        assert_eq!(v["status"], "Accepted");
        assert_eq!(v["accepted_by"]["hospital_id"], hospital.to_string());
        assert_eq!(v["severity"], "High");
        assert_eq!(v["patient_location"]["latitude"], 19.07);

        let v = serde_json::to_value(EmergencyView::from_parts(row(EmergencyStatus::Active), vec![])).unwrap();
        assert!(v["accepted_by"].is_null());
    }

    #[test]
    fn snapshot_entries_hide_owner_and_expose_distance() {
        let e = entry(Uuid::new_v4(), 1);
        let v = serde_json::to_value(&e).unwrap();
        assert!(v.get("emergency_id").is_none());
        assert_eq!(v["distance"], 1.0);
    }

    #[test]
    fn description_is_bounded() {
        assert_eq!(validate_description(Some("  ".into())).unwrap(), None);
        assert!(validate_description(Some("x".repeat(500))).is_ok());
        assert!(validate_description(Some("x".repeat(501))).is_err());
    }

    #[test]
    fn actor_targets_owner_column() {
        let id = Uuid::new_v4();
        assert_eq!(EmergencyActor::Patient(id).column(), "patient_id");
        assert_eq!(EmergencyActor::Hospital(id).column(), "accepted_by_hospital_id");
        assert_eq!(EmergencyActor::Hospital(id).id(), id);
    }

    fn sos(patient_id: Uuid, location: GeoPoint) -> NewEmergency {
        NewEmergency {
            patient_id,
            location,
            address: None,
            description: Some("chest pain".into()),
            severity: Severity::High,
        }
    }

    #[tokio::test]
    async fn sos_snapshot_takes_only_hospitals_in_radius_and_accepts_once() {
        let Some(db) = test_pool().await else { return };
        let origin = random_origin();
        let near = insert_hospital(&db, north_of(origin, 3.0)).await;
        let far = insert_hospital(&db, north_of(origin, 60.0)).await;
        let patient = insert_patient(&db).await;

        let created = create(&db, DispatchPolicy::default(), sos(patient, origin)).await.unwrap();
        assert_eq!(created.status, EmergencyStatus::Active);
        assert_eq!(created.nearby_hospitals.len(), 1);
        let entry = &created.nearby_hospitals[0];
        assert_eq!(entry.hospital_id, near);
        assert_eq!(entry.rank, 1);
        assert!((entry.distance_km - 3.0).abs() < 0.01, "{}", entry.distance_km);
        assert_eq!(entry.notified_at, created.created_at);
        assert!(!created.lists_hospital(far));

        let err = accept(&db, created.emergency_id, far).await.unwrap_err();
        assert_matches!(err, ApiError::Conflict("NOT_NEARBY", _));

        let accepted = accept(&db, created.emergency_id, near).await.unwrap();
        assert_eq!(accepted.status, EmergencyStatus::Accepted);
        assert_eq!(accepted.accepted_by.as_ref().map(|a| a.hospital_id), Some(near));

        let err = accept(&db, created.emergency_id, near).await.unwrap_err();
        assert_matches!(err, ApiError::Conflict("INVALID_TRANSITION", _));

        let stored = load(&db, created.emergency_id).await.unwrap();
        assert_eq!(stored.status, EmergencyStatus::Accepted);
        assert_eq!(stored.accepted_by.map(|a| a.hospital_id), Some(near));
        assert_eq!(stored.nearby_hospitals.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_accepts_have_one_winner() {
        let Some(db) = test_pool().await else { return };
        let origin = random_origin();
        let a = insert_hospital(&db, north_of(origin, 1.0)).await;
        let b = insert_hospital(&db, north_of(origin, 2.0)).await;
        let patient = insert_patient(&db).await;
        let created = create(&db, DispatchPolicy::default(), sos(patient, origin)).await.unwrap();

        let (ra, rb) = tokio::join!(
            accept(&db, created.emergency_id, a),
            accept(&db, created.emergency_id, b)
        );
        assert_eq!(ra.is_ok() as u8 + rb.is_ok() as u8, 1);
        let loser = if ra.is_ok() { rb } else { ra };
        assert_matches!(loser, Err(ApiError::Conflict(_, _)));
    }

    #[tokio::test]
    async fn snapshot_rows_are_write_once() {
        let Some(db) = test_pool().await else { return };
        let origin = random_origin();
        let hospital = insert_hospital(&db, north_of(origin, 5.0)).await;
        let patient = insert_patient(&db).await;
        let created = create(&db, DispatchPolicy::default(), sos(patient, origin)).await.unwrap();

        let update = sqlx::query(
            "UPDATE emergency_nearby_hospital SET distance_km = 0 WHERE emergency_id = $1",
        )
        .bind(created.emergency_id)
        .execute(&db)
        .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM emergency_nearby_hospital WHERE emergency_id = $1")
            .bind(created.emergency_id)
            .execute(&db)
            .await;
        assert!(delete.is_err());

        // closing the request leaves the snapshot as it was
        finish(&db, created.emergency_id, EmergencyActor::Patient(patient), EmergencyAction::Cancel)
            .await
            .unwrap();
        let stored = load(&db, created.emergency_id).await.unwrap();
        assert_eq!(stored.nearby_hospitals.len(), 1);
        assert_eq!(stored.nearby_hospitals[0].hospital_id, hospital);
        assert_eq!(stored.nearby_hospitals[0].distance_km, created.nearby_hospitals[0].distance_km);
    }

    #[tokio::test]
    async fn one_open_emergency_per_patient() {
        let Some(db) = test_pool().await else { return };
        let origin = random_origin();
        let patient = insert_patient(&db).await;
        let first = create(&db, DispatchPolicy::default(), sos(patient, origin)).await.unwrap();

        let err = create(&db, DispatchPolicy::default(), sos(patient, origin)).await.unwrap_err();
        assert_matches!(err, ApiError::Conflict("ACTIVE_EMERGENCY", _));

        // the partial unique index holds even without the pre-check
        let raw = sqlx::query("INSERT INTO emergency (patient_id, latitude, longitude) VALUES ($1, $2, $3)")
            .bind(patient)
            .bind(origin.latitude)
            .bind(origin.longitude)
            .execute(&db)
            .await
            .map_err(map_insert_error)
            .unwrap_err();
        assert_matches!(raw, ApiError::Conflict("ACTIVE_EMERGENCY", _));

        finish(&db, first.emergency_id, EmergencyActor::Patient(patient), EmergencyAction::Cancel)
            .await
            .unwrap();
        let second = create(&db, DispatchPolicy::default(), sos(patient, origin)).await.unwrap();
        assert_eq!(second.status, EmergencyStatus::Active);
    }
}
