use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::classify::{KeywordDocumentClassifier, KeywordSymptomClassifier, TextClassifier};
use crate::config::Config;
use crate::dispatch::DispatchPolicy;
use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub session_ttl_hours: i64,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub dispatch: DispatchPolicy,
    pub symptom_classifier: Arc<dyn TextClassifier>,
    pub document_classifier: Arc<dyn TextClassifier>,
}

impl AppState {
    pub fn new(cfg: &Config, db: PgPool) -> Self {
        Self {
            db,
            session_ttl_hours: cfg.session_ttl_hours,
            upload_dir: PathBuf::from(&cfg.upload_dir),
            max_upload_bytes: cfg.max_upload_bytes,
            dispatch: DispatchPolicy {
                radius_km: cfg.emergency_radius_km,
                max_hospitals: cfg.emergency_max_hospitals,
            },
            symptom_classifier: Arc::new(KeywordSymptomClassifier::default()),
            document_classifier: Arc::new(KeywordDocumentClassifier),
        }
    }
}

/* -------------------------
   Response envelope
--------------------------*/

/// `{ success, message?, data, count? }`
#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl<T> ApiOk<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data,
            count: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl<T> ApiOk<Vec<T>> {
    pub fn list(data: Vec<T>) -> Self {
        let count = data.len();
        Self {
            success: true,
            message: None,
            data,
            count: Some(count),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageOnly {
    pub success: bool,
    pub message: String,
}

impl MessageOnly {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/* -------------------------
   DB Row Models
--------------------------*/

pub const HOSPITAL_COLUMNS: &str = "hospital_id, name, address, city, state, email, phone, \
     emergency_phone, specialties, emergency_services, is_active, latitude, longitude, created_at";

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct HospitalRow {
    pub hospital_id: Uuid,
    pub name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub email: String,
    pub phone: Option<String>,
    pub emergency_phone: Option<String>,
    pub specialties: Vec<String>,
    pub emergency_services: bool,
    pub is_active: bool,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: DateTime<Utc>,
}

pub const DOCTOR_SELECT: &str = r#"
    SELECT d.doctor_id, d.hospital_id, u.display_name AS name, u.email,
           d.specialty, d.city, d.experience, d.is_active, d.created_at
    FROM doctor d
    JOIN app_user u ON u.user_id = d.user_id
"#;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DoctorRow {
    pub doctor_id: Uuid,
    pub hospital_id: Option<Uuid>,
    pub name: String,
    pub email: String,
    pub specialty: String,
    pub city: Option<String>,
    pub experience: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

pub const PATIENT_SELECT: &str = r#"
    SELECT p.patient_id, u.display_name AS name, u.email, p.age, p.gender,
           p.latitude, p.longitude, p.address, p.city, p.state,
           p.emergency_contact_name, p.emergency_contact_phone,
           p.emergency_contact_relationship, p.created_at
    FROM patient p
    JOIN app_user u ON u.user_id = p.user_id
"#;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PatientRow {
    pub patient_id: Uuid,
    pub name: String,
    pub email: String,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub emergency_contact_relationship: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub const HOSPITAL_DOCTOR_COLUMNS: &str = "hospital_doctor_id, hospital_id, name, email, phone, \
     specialty, experience, qualifications, is_active, city, state, address, created_at, updated_at";

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct HospitalDoctorRow {
    pub hospital_doctor_id: Uuid,
    pub hospital_id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub specialty: String,
    pub experience: i32,
    pub qualifications: Option<String>,
    pub is_active: bool,
    pub city: String,
    pub state: String,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/* -------------------------
   Helpers
--------------------------*/

async fn resolve_profile_id(
    db: &PgPool,
    sql: &'static str,
    user_id: Uuid,
    what: &str,
) -> Result<Uuid, ApiError> {
    sqlx::query_scalar::<_, Uuid>(sql)
        .bind(user_id)
        .fetch_optional(db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found(what))
}

pub async fn resolve_patient_id(db: &PgPool, user_id: Uuid) -> Result<Uuid, ApiError> {
    resolve_profile_id(
        db,
        "SELECT patient_id FROM patient WHERE user_id = $1",
        user_id,
        "Patient profile",
    )
    .await
}

pub async fn resolve_doctor_id(db: &PgPool, user_id: Uuid) -> Result<Uuid, ApiError> {
    resolve_profile_id(
        db,
        "SELECT doctor_id FROM doctor WHERE user_id = $1",
        user_id,
        "Doctor profile",
    )
    .await
}

pub async fn resolve_hospital_id(db: &PgPool, user_id: Uuid) -> Result<Uuid, ApiError> {
    resolve_profile_id(
        db,
        "SELECT hospital_id FROM hospital WHERE user_id = $1",
        user_id,
        "Hospital",
    )
    .await
}

/// Trim an optional text field, treating blank as absent.
pub fn clean_opt(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_envelope_carries_count() {
        let body = serde_json::to_value(ApiOk::list(vec![1, 2, 3]).with_message("ok")).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["count"], 3);
        assert_eq!(body["message"], "ok");
    }

    #[test]
    fn single_envelope_omits_count() {
        let body = serde_json::to_value(ApiOk::new("x")).unwrap();
        assert!(body.get("count").is_none());
        assert!(body.get("message").is_none());
    }

    #[test]
    fn clean_opt_drops_blank() {
        assert_eq!(clean_opt(Some("  ".into())), None);
        assert_eq!(clean_opt(Some(" Pune ".into())), Some("Pune".into()));
    }
}
