use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::auth::Role;
use crate::error::ApiError;
use crate::middleware::auth_context::AuthContext;

/// The slice of a provider the booking rules care about.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProviderRecord {
    pub provider_id: Uuid,
    pub hospital_id: Option<Uuid>,
    pub is_active: bool,
}

/// A kind of provider that owns an appointment book.
#[async_trait]
pub trait ProviderKind: Send + Sync + 'static {
    /// Human label used in messages ("Doctor").
    const LABEL: &'static str;
    /// Table holding this kind's appointments.
    const APPOINTMENT_TABLE: &'static str;
    /// Role of the account that acts for the provider.
    const ACTING_ROLE: Role;

    /// Load the provider and lock its row until the transaction ends. All
    /// check-and-write sequences on one provider's book go through this lock.
    async fn lock_provider(
        conn: &mut PgConnection,
        provider_id: Uuid,
    ) -> Result<Option<ProviderRecord>, ApiError>;

    /// Providers the authenticated account may act for.
    async fn acting_providers(db: &PgPool, auth: &AuthContext) -> Result<Vec<Uuid>, ApiError>;
}

/// Standalone doctors act for themselves.
pub struct DoctorProvider;

#[async_trait]
impl ProviderKind for DoctorProvider {
    const LABEL: &'static str = "Doctor";
    const APPOINTMENT_TABLE: &'static str = "appointment";
    const ACTING_ROLE: Role = Role::Doctor;

    async fn lock_provider(
        conn: &mut PgConnection,
        provider_id: Uuid,
    ) -> Result<Option<ProviderRecord>, ApiError> {
        sqlx::query_as::<_, ProviderRecord>(
            r#"
            SELECT doctor_id AS provider_id, hospital_id, is_active
            FROM doctor
            WHERE doctor_id = $1
            FOR UPDATE
            "#,
        )
        .bind(provider_id)
        .fetch_optional(conn)
        .await
        .map_err(ApiError::db)
    }

    async fn acting_providers(db: &PgPool, auth: &AuthContext) -> Result<Vec<Uuid>, ApiError> {
        auth.require(Role::Doctor)?;
        let id = crate::models::resolve_doctor_id(db, auth.user_id).await?;
        Ok(vec![id])
    }
}

/// Hospital-employed doctors have no login; their hospital acts for them.
pub struct HospitalDoctorProvider;

#[async_trait]
impl ProviderKind for HospitalDoctorProvider {
    const LABEL: &'static str = "Doctor";
    const APPOINTMENT_TABLE: &'static str = "hospital_appointment";
    const ACTING_ROLE: Role = Role::Hospital;

    async fn lock_provider(
        conn: &mut PgConnection,
        provider_id: Uuid,
    ) -> Result<Option<ProviderRecord>, ApiError> {
        sqlx::query_as::<_, ProviderRecord>(
            r#"
            SELECT hd.hospital_doctor_id AS provider_id, hd.hospital_id,
                   (hd.is_active AND h.is_active) AS is_active
            FROM hospital_doctor hd
            JOIN hospital h ON h.hospital_id = hd.hospital_id
            WHERE hd.hospital_doctor_id = $1
            FOR UPDATE OF hd
            "#,
        )
        .bind(provider_id)
        .fetch_optional(conn)
        .await
        .map_err(ApiError::db)
    }

    async fn acting_providers(db: &PgPool, auth: &AuthContext) -> Result<Vec<Uuid>, ApiError> {
        auth.require(Role::Hospital)?;
        sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT hd.hospital_doctor_id
            FROM hospital_doctor hd
            JOIN hospital h ON h.hospital_id = hd.hospital_id
            WHERE h.user_id = $1
            "#,
        )
        .bind(auth.user_id)
        .fetch_all(db)
        .await
        .map_err(ApiError::db)
    }
}
