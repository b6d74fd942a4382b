use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth::{Role, is_valid_phone},
    dispatch::{
        GeoPoint,
        geo::{Nearby, find_nearby_hospitals, round_km},
    },
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, HOSPITAL_COLUMNS, HospitalRow, clean_opt, resolve_hospital_id},
};

pub const DEFAULT_SEARCH_RADIUS_KM: f64 = 50.0;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_hospitals))
        .route("/nearby", get(nearby_hospitals))
        .route("/me", get(get_me).patch(update_me))
        .route("/{hospital_id}", get(get_hospital))
}

pub async fn list_hospitals(
    State(state): State<AppState>,
) -> Result<Json<ApiOk<Vec<HospitalRow>>>, ApiError> {
    let sql = format!("SELECT {HOSPITAL_COLUMNS} FROM hospital WHERE is_active ORDER BY name");
    let rows: Vec<HospitalRow> = sqlx::query_as::<_, HospitalRow>(&sql)
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?;
    Ok(Json(ApiOk::list(rows)))
}

#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius: Option<f64>,
}

impl NearbyQuery {
    pub fn resolve(&self) -> Result<(GeoPoint, f64), ApiError> {
        let (Some(lat), Some(lon)) = (self.latitude, self.longitude) else {
            return Err(ApiError::validation("Latitude and longitude are required"));
        };
        let origin = GeoPoint::new(lat, lon)?;
        let radius = self.radius.unwrap_or(DEFAULT_SEARCH_RADIUS_KM);
        if !radius.is_finite() || radius <= 0.0 {
            return Err(ApiError::validation("radius must be a positive number of km"));
        }
        Ok((origin, radius))
    }
}

/// Active hospitals within `radius` km, nearest first, distance rounded to
/// two decimals.
pub async fn nearby_hospitals(
    State(state): State<AppState>,
    Query(q): Query<NearbyQuery>,
) -> Result<Json<ApiOk<Vec<Nearby<HospitalRow>>>>, ApiError> {
    let (origin, radius) = q.resolve()?;
    let found = find_nearby_hospitals(&state.db, origin, radius, None, false).await?;
    let rows = found
        .into_iter()
        .map(|n| Nearby {
            distance: round_km(n.distance),
            item: n.item,
        })
        .collect();
    Ok(Json(ApiOk::list(rows)))
}

async fn load_hospital(state: &AppState, hospital_id: Uuid) -> Result<HospitalRow, ApiError> {
    let sql = format!("SELECT {HOSPITAL_COLUMNS} FROM hospital WHERE hospital_id = $1");
    sqlx::query_as::<_, HospitalRow>(&sql)
        .bind(hospital_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("Hospital"))
}

pub async fn get_hospital(
    State(state): State<AppState>,
    Path(hospital_id): Path<Uuid>,
) -> Result<Json<ApiOk<HospitalRow>>, ApiError> {
    let hospital = load_hospital(&state, hospital_id).await?;
    if !hospital.is_active {
        return Err(ApiError::not_found("Hospital"));
    }
    Ok(Json(ApiOk::new(hospital)))
}

pub async fn get_me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<HospitalRow>>, ApiError> {
    auth.require(Role::Hospital)?;
    let hospital_id = resolve_hospital_id(&state.db, auth.user_id).await?;
    Ok(Json(ApiOk::new(load_hospital(&state, hospital_id).await?)))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateHospitalRequest {
    pub name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub phone: Option<String>,
    pub emergency_phone: Option<String>,
    pub specialties: Option<Vec<String>>,
    pub emergency_services: Option<bool>,
    pub is_active: Option<bool>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl UpdateHospitalRequest {
    pub fn location(&self) -> Result<Option<GeoPoint>, ApiError> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => GeoPoint::new(lat, lon).map(Some),
            (None, None) => Ok(None),
            _ => Err(ApiError::validation(
                "latitude and longitude must be provided together",
            )),
        }
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        let bad_phone = |p: &Option<String>| {
            p.as_deref()
                .map(str::trim)
                .is_some_and(|p| !p.is_empty() && !is_valid_phone(p))
        };
        if bad_phone(&self.phone) {
            return Err(ApiError::validation("Invalid phone number format"));
        }
        if bad_phone(&self.emergency_phone) {
            return Err(ApiError::validation("Invalid emergency phone number format"));
        }
        self.location().map(|_| ())
    }
}

pub async fn update_me(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<UpdateHospitalRequest>,
) -> Result<Json<ApiOk<HospitalRow>>, ApiError> {
    auth.require(Role::Hospital)?;
    req.validate()?;
    let location = req.location()?;

    let hospital_id = resolve_hospital_id(&state.db, auth.user_id).await?;
    let existing = load_hospital(&state, hospital_id).await?;

    let specialties = req.specialties.map(|list| {
        list.into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
    });
    let location = location.unwrap_or(GeoPoint {
        latitude: existing.latitude,
        longitude: existing.longitude,
    });

    sqlx::query(
        r#"
        UPDATE hospital
        SET name = $1,
            address = $2,
            city = $3,
            state = $4,
            phone = $5,
            emergency_phone = $6,
            specialties = $7,
            emergency_services = $8,
            is_active = $9,
            latitude = $10,
            longitude = $11
        WHERE hospital_id = $12
        "#,
    )
    .bind(clean_opt(req.name).unwrap_or(existing.name))
    .bind(clean_opt(req.address).unwrap_or(existing.address))
    .bind(clean_opt(req.city).unwrap_or(existing.city))
    .bind(clean_opt(req.state).unwrap_or(existing.state))
    .bind(clean_opt(req.phone).or(existing.phone))
    .bind(clean_opt(req.emergency_phone).or(existing.emergency_phone))
    .bind(specialties.unwrap_or(existing.specialties))
    .bind(req.emergency_services.unwrap_or(existing.emergency_services))
    .bind(req.is_active.unwrap_or(existing.is_active))
    .bind(location.latitude)
    .bind(location.longitude)
    .bind(hospital_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(%hospital_id, "hospital profile updated");
    let updated = load_hospital(&state, hospital_id).await?;
    Ok(Json(
        ApiOk::new(updated).with_message("Profile updated successfully"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearby_query_defaults_radius() {
        let q = NearbyQuery {
            latitude: Some(19.07),
            longitude: Some(72.87),
            radius: None,
        };
        let (origin, radius) = q.resolve().unwrap();
        assert_eq!(origin.latitude, 19.07);
        assert_eq!(radius, DEFAULT_SEARCH_RADIUS_KM);
    }

    #[test]
    fn nearby_query_rejects_missing_or_bad_input() {
        let missing = NearbyQuery {
            latitude: Some(19.07),
            longitude: None,
            radius: None,
        };
        assert_eq!(
            missing.resolve().unwrap_err().to_string(),
            "Latitude and longitude are required"
        );
        let zero = NearbyQuery {
            latitude: Some(19.07),
            longitude: Some(72.87),
            radius: Some(0.0),
        };
        assert!(zero.resolve().is_err());
        let out_of_range = NearbyQuery {
            latitude: Some(100.0),
            longitude: Some(72.87),
            radius: None,
        };
        assert!(out_of_range.resolve().is_err());
    }

    #[test]
    fn profile_update_needs_both_coordinates() {
        let half = UpdateHospitalRequest {
            latitude: Some(19.0),
            ..Default::default()
        };
        assert!(half.validate().is_err());
        let both = UpdateHospitalRequest {
            latitude: Some(19.0),
            longitude: Some(72.8),
            phone: Some("022 5550 0101".into()),
            ..Default::default()
        };
        assert!(both.validate().is_ok());
        assert!(both.location().unwrap().is_some());
    }
}
