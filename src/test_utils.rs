//! Fixtures for tests that need a real Postgres (with PostGIS and
//! btree_gist). They are skipped when `DATABASE_URL` is not set.

use rand::Rng;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::Role;
use crate::db;
use crate::dispatch::GeoPoint;

/// Migrated pool, or `None` when no database is configured.
pub async fn test_pool() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping database test");
        return None;
    };
    Some(
        db::connect_pg(&url, 4)
            .await
            .expect("connect and migrate test database"),
    )
}

fn unique_email(prefix: &str) -> String {
    format!("{prefix}-{}@test.meditrust.local", Uuid::new_v4().simple())
}

async fn insert_user(db: &PgPool, role: Role, email: &str) -> Uuid {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO app_user (email, display_name, password_hash, roles)
        VALUES ($1, $2, 'not-a-real-hash', $3)
        RETURNING user_id
        "#,
    )
    .bind(email)
    .bind(format!("Test {}", role.as_str()))
    .bind(role)
    .fetch_one(db)
    .await
    .expect("insert app_user")
}

pub async fn insert_patient(db: &PgPool) -> Uuid {
    let user_id = insert_user(db, Role::Patient, &unique_email("patient")).await;
    sqlx::query_scalar::<_, Uuid>("INSERT INTO patient (user_id) VALUES ($1) RETURNING patient_id")
        .bind(user_id)
        .fetch_one(db)
        .await
        .expect("insert patient")
}

pub async fn insert_doctor(db: &PgPool) -> Uuid {
    let user_id = insert_user(db, Role::Doctor, &unique_email("doctor")).await;
    sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO doctor (user_id, specialty, city) VALUES ($1, 'Cardiologist', 'Mumbai') RETURNING doctor_id",
    )
    .bind(user_id)
    .fetch_one(db)
    .await
    .expect("insert doctor")
}

pub async fn insert_hospital(db: &PgPool, at: GeoPoint) -> Uuid {
    let email = unique_email("hospital");
    let user_id = insert_user(db, Role::Hospital, &email).await;
    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO hospital (user_id, name, address, city, state, email, latitude, longitude)
        VALUES ($1, 'Test General', '1 Test Road', 'Mumbai', 'Maharashtra', $2, $3, $4)
        RETURNING hospital_id
        "#,
    )
    .bind(user_id)
    .bind(email)
    .bind(at.latitude)
    .bind(at.longitude)
    .fetch_one(db)
    .await
    .expect("insert hospital")
}

/// A point away from hospitals left behind by earlier runs.
pub fn random_origin() -> GeoPoint {
    let mut rng = rand::thread_rng();
    GeoPoint {
        latitude: rng.gen_range(-50.0..50.0),
        longitude: rng.gen_range(-170.0..170.0),
    }
}

/// The point `km` due north of `origin` on the 6371 km sphere.
pub fn north_of(origin: GeoPoint, km: f64) -> GeoPoint {
    GeoPoint {
        latitude: origin.latitude + (km / 6371.0).to_degrees(),
        longitude: origin.longitude,
    }
}
