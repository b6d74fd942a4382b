use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::{
    auth::{
        Role, generate_access_token, hash_access_token, hash_password, is_valid_email,
        is_valid_phone, normalize_email, validate_password, verify_password,
    },
    classify::is_known_specialty,
    dispatch::GeoPoint,
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, MessageOnly, clean_opt},
    routes::{doctor_routes, patient_routes},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/patient/register", post(register_patient))
        .route("/doctor/register", post(register_doctor))
        .route("/hospital/register", post(register_hospital))
        .route("/patient/login", post(login_patient))
        .route("/doctor/login", post(login_doctor))
        .route("/hospital/login", post(login_hospital))
        .route("/me", get(me))
        .route("/logout", post(logout))
}

/* -------------------------
   Payloads
--------------------------*/

#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct AuthPayload {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserSummary,
    /// patient_id, doctor_id or hospital_id depending on role
    pub profile_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub device_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterPatientRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterDoctorRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub specialty: String,
    pub city: Option<String>,
    pub experience: Option<i32>,
    pub hospital_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterHospitalRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub phone: Option<String>,
    pub emergency_phone: Option<String>,
    #[serde(default)]
    pub specialties: Vec<String>,
    pub emergency_services: Option<bool>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/* -------------------------
   Shared helpers
--------------------------*/

#[derive(Debug)]
struct Credentials {
    name: String,
    email: String,
    password_hash: String,
}

fn check_credentials(name: &str, email: &str, password: &str) -> Result<Credentials, ApiError> {
    let name = name.trim();
    let email = normalize_email(email);
    if name.is_empty() || email.is_empty() || password.is_empty() {
        return Err(ApiError::validation("Name, email, and password are required"));
    }
    if !is_valid_email(&email) {
        return Err(ApiError::validation("Invalid email format"));
    }
    validate_password(password)?;
    Ok(Credentials {
        name: name.to_string(),
        email,
        password_hash: hash_password(password)?,
    })
}

async fn ensure_email_free(db: &PgPool, email: &str) -> Result<(), ApiError> {
    let taken: bool =
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM app_user WHERE email = $1)")
            .bind(email)
            .fetch_one(db)
            .await
            .map_err(ApiError::db)?;
    if taken {
        return Err(ApiError::Conflict(
            "EMAIL_TAKEN",
            "User with this email already exists".into(),
        ));
    }
    Ok(())
}

async fn insert_user(
    conn: &mut PgConnection,
    creds: &Credentials,
    role: Role,
) -> Result<Uuid, ApiError> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO app_user (email, display_name, password_hash, roles)
        VALUES ($1, $2, $3, $4)
        RETURNING user_id
        "#,
    )
    .bind(&creds.email)
    .bind(&creds.name)
    .bind(&creds.password_hash)
    .bind(role)
    .fetch_one(conn)
    .await
    .map_err(ApiError::db)
}

async fn issue_session(
    db: &PgPool,
    ttl_hours: i64,
    user_id: Uuid,
    device_name: Option<&str>,
) -> Result<(String, DateTime<Utc>), ApiError> {
    let access_token = generate_access_token();
    let expires_at = Utc::now() + Duration::hours(ttl_hours);

    sqlx::query(
        r#"
        INSERT INTO session_token (user_id, session_token_hash, device_name, expires_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(user_id)
    .bind(hash_access_token(&access_token))
    .bind(device_name)
    .bind(expires_at)
    .execute(db)
    .await
    .map_err(ApiError::db)?;

    Ok((access_token, expires_at))
}

async fn signed_in(
    state: &AppState,
    user_id: Uuid,
    creds: Credentials,
    role: Role,
    profile_id: Uuid,
) -> Result<AuthPayload, ApiError> {
    let (token, expires_at) = issue_session(&state.db, state.session_ttl_hours, user_id, None).await?;
    Ok(AuthPayload {
        token,
        expires_at,
        user: UserSummary {
            user_id,
            name: creds.name,
            email: creds.email,
            role,
        },
        profile_id,
    })
}

/* -------------------------
   Registration
--------------------------*/

pub async fn register_patient(
    State(state): State<AppState>,
    Json(req): Json<RegisterPatientRequest>,
) -> Result<(StatusCode, Json<ApiOk<AuthPayload>>), ApiError> {
    let creds = check_credentials(&req.name, &req.email, &req.password)?;
    patient_routes::validate_age(req.age)?;
    let gender = patient_routes::validate_gender(clean_opt(req.gender))?;

    ensure_email_free(&state.db, &creds.email).await?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;
    let user_id = insert_user(&mut tx, &creds, Role::Patient).await?;
    let patient_id: Uuid = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO patient (user_id, age, gender, address, city, state)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING patient_id
        "#,
    )
    .bind(user_id)
    .bind(req.age)
    .bind(gender)
    .bind(clean_opt(req.address))
    .bind(clean_opt(req.city))
    .bind(clean_opt(req.state))
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;
    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%user_id, %patient_id, "patient registered");
    let payload = signed_in(&state, user_id, creds, Role::Patient, patient_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiOk::new(payload).with_message("Patient registered successfully")),
    ))
}

pub async fn register_doctor(
    State(state): State<AppState>,
    Json(req): Json<RegisterDoctorRequest>,
) -> Result<(StatusCode, Json<ApiOk<AuthPayload>>), ApiError> {
    let specialty = req.specialty.trim().to_string();
    if specialty.is_empty() {
        return Err(ApiError::validation(
            "Name, email, password, and specialty are required",
        ));
    }
    let creds = check_credentials(&req.name, &req.email, &req.password)?;
    if !is_known_specialty(&specialty) {
        return Err(ApiError::validation("Invalid specialty"));
    }
    let city = doctor_routes::validate_city(clean_opt(req.city))?;
    let experience = req.experience.unwrap_or(0);
    doctor_routes::validate_experience(experience)?;

    ensure_email_free(&state.db, &creds.email).await?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;
    if let Some(hospital_id) = req.hospital_id {
        let exists: bool = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM hospital WHERE hospital_id = $1 AND is_active)",
        )
        .bind(hospital_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(ApiError::db)?;
        if !exists {
            return Err(ApiError::not_found("Hospital"));
        }
    }
    let user_id = insert_user(&mut tx, &creds, Role::Doctor).await?;
    let doctor_id: Uuid = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO doctor (user_id, hospital_id, specialty, city, experience)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING doctor_id
        "#,
    )
    .bind(user_id)
    .bind(req.hospital_id)
    .bind(&specialty)
    .bind(city)
    .bind(experience)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;
    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%user_id, %doctor_id, specialty = %specialty, "doctor registered");
    let payload = signed_in(&state, user_id, creds, Role::Doctor, doctor_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiOk::new(payload).with_message("Doctor registered successfully")),
    ))
}

pub fn validate_hospital_fields(req: &RegisterHospitalRequest) -> Result<(), ApiError> {
    let required = [&req.name, &req.address, &req.city, &req.state, &req.email];
    if required.iter().any(|f| f.trim().is_empty()) {
        return Err(ApiError::validation("All required fields must be provided"));
    }
    if !is_valid_email(&normalize_email(&req.email)) {
        return Err(ApiError::validation("Invalid email format"));
    }
    if req.phone.as_deref().is_some_and(|p| !is_valid_phone(p.trim())) {
        return Err(ApiError::validation("Invalid phone number format"));
    }
    if req
        .emergency_phone
        .as_deref()
        .is_some_and(|p| !is_valid_phone(p.trim()))
    {
        return Err(ApiError::validation("Invalid emergency phone number format"));
    }
    Ok(())
}

pub async fn register_hospital(
    State(state): State<AppState>,
    Json(req): Json<RegisterHospitalRequest>,
) -> Result<(StatusCode, Json<ApiOk<AuthPayload>>), ApiError> {
    validate_hospital_fields(&req)?;
    let creds = check_credentials(&req.name, &req.email, &req.password)?;
    let location = match (req.latitude, req.longitude) {
        (Some(lat), Some(lon)) => GeoPoint::new(lat, lon)?,
        (None, None) => GeoPoint {
            latitude: 0.0,
            longitude: 0.0,
        },
        _ => {
            return Err(ApiError::validation(
                "latitude and longitude must be provided together",
            ));
        }
    };
    let specialties: Vec<String> = req
        .specialties
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    ensure_email_free(&state.db, &creds.email).await?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;
    let user_id = insert_user(&mut tx, &creds, Role::Hospital).await?;
    let hospital_id: Uuid = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO hospital
            (user_id, name, address, city, state, email, phone, emergency_phone,
             specialties, emergency_services, latitude, longitude)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING hospital_id
        "#,
    )
    .bind(user_id)
    .bind(&creds.name)
    .bind(req.address.trim())
    .bind(req.city.trim())
    .bind(req.state.trim())
    .bind(&creds.email)
    .bind(clean_opt(req.phone))
    .bind(clean_opt(req.emergency_phone))
    .bind(&specialties)
    .bind(req.emergency_services.unwrap_or(true))
    .bind(location.latitude)
    .bind(location.longitude)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;
    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%user_id, %hospital_id, "hospital registered");
    let payload = signed_in(&state, user_id, creds, Role::Hospital, hospital_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiOk::new(payload).with_message("Hospital registered successfully")),
    ))
}

/* -------------------------
   Login / session
--------------------------*/

#[derive(Debug, sqlx::FromRow)]
struct LoginRow {
    user_id: Uuid,
    display_name: String,
    email: String,
    password_hash: String,
    is_active: bool,
}

async fn profile_id_for(db: &PgPool, role: Role, user_id: Uuid) -> Result<Uuid, ApiError> {
    match role {
        Role::Patient => crate::models::resolve_patient_id(db, user_id).await,
        Role::Doctor => crate::models::resolve_doctor_id(db, user_id).await,
        Role::Hospital => crate::models::resolve_hospital_id(db, user_id).await,
        Role::Admin => Ok(user_id),
    }
}

async fn login_as(state: &AppState, req: LoginRequest, role: Role) -> Result<AuthPayload, ApiError> {
    let email = normalize_email(&req.email);
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("Email and password are required"));
    }

    let user: LoginRow = sqlx::query_as::<_, LoginRow>(
        r#"
        SELECT user_id, display_name, email, password_hash, is_active
        FROM app_user
        WHERE email = $1 AND roles = $2
        "#,
    )
    .bind(&email)
    .bind(role)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::invalid_credentials)?;

    if !verify_password(&req.password, &user.password_hash) {
        return Err(ApiError::invalid_credentials());
    }
    if !user.is_active {
        return Err(ApiError::Forbidden("FORBIDDEN", "Account is disabled".into()));
    }
    if role == Role::Hospital {
        let active: bool = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM hospital WHERE user_id = $1 AND is_active)",
        )
        .bind(user.user_id)
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::db)?;
        if !active {
            return Err(ApiError::Unauthorized(
                "INVALID_CREDENTIALS",
                "Hospital not found or inactive".into(),
            ));
        }
    }

    let profile_id = profile_id_for(&state.db, role, user.user_id).await?;
    let (token, expires_at) = issue_session(
        &state.db,
        state.session_ttl_hours,
        user.user_id,
        req.device_name.as_deref(),
    )
    .await?;

    tracing::info!(user_id = %user.user_id, role = role.as_str(), "login");
    Ok(AuthPayload {
        token,
        expires_at,
        user: UserSummary {
            user_id: user.user_id,
            name: user.display_name,
            email: user.email,
            role,
        },
        profile_id,
    })
}

pub async fn login_patient(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiOk<AuthPayload>>, ApiError> {
    let payload = login_as(&state, req, Role::Patient).await?;
    Ok(Json(ApiOk::new(payload).with_message("Login successful")))
}

pub async fn login_doctor(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiOk<AuthPayload>>, ApiError> {
    let payload = login_as(&state, req, Role::Doctor).await?;
    Ok(Json(ApiOk::new(payload).with_message("Login successful")))
}

pub async fn login_hospital(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiOk<AuthPayload>>, ApiError> {
    let payload = login_as(&state, req, Role::Hospital).await?;
    Ok(Json(ApiOk::new(payload).with_message("Login successful")))
}

#[derive(Debug, Serialize)]
pub struct MeData {
    pub user: UserSummary,
    pub profile_id: Uuid,
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct MeRow {
    display_name: String,
    email: String,
    expires_at: DateTime<Utc>,
}

pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<MeData>>, ApiError> {
    let row: MeRow = sqlx::query_as::<_, MeRow>(
        r#"
        SELECT u.display_name, u.email, st.expires_at
        FROM session_token st
        JOIN app_user u ON u.user_id = st.user_id
        WHERE st.session_token_id = $1 AND st.user_id = $2
        "#,
    )
    .bind(auth.session_token_id)
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::session_expired)?;

    let profile_id = profile_id_for(&state.db, auth.role, auth.user_id).await?;

    Ok(Json(ApiOk::new(MeData {
        user: UserSummary {
            user_id: auth.user_id,
            name: row.display_name,
            email: row.email,
            role: auth.role,
        },
        profile_id,
        session_token_id: auth.session_token_id,
        expires_at: row.expires_at,
    })))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<MessageOnly>, ApiError> {
    let rows = sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE session_token_id = $1
          AND user_id = $2
          AND revoked_at IS NULL
        "#,
    )
    .bind(auth.session_token_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if rows.rows_affected() == 0 {
        return Err(ApiError::session_expired());
    }
    Ok(Json(MessageOnly::new("Logged out")))
}
