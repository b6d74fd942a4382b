use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::Role,
    dispatch::{
        EmergencyAction, GeoPoint, Severity,
        store::{self, EmergencyActor, EmergencyView, NewEmergency},
    },
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, resolve_hospital_id, resolve_patient_id},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sos", post(raise_sos))
        .route("/hospital/incoming", get(incoming))
        .route("/patient/{patient_id}", get(patient_history))
        .route("/{emergency_id}", get(get_emergency))
        .route("/{emergency_id}/accept", patch(accept))
        .route("/{emergency_id}/complete", patch(complete))
        .route("/{emergency_id}/cancel", patch(cancel))
}

#[derive(Debug, Deserialize)]
pub struct SosRequest {
    pub patient_id: Option<Uuid>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub severity: Option<String>,
}

impl SosRequest {
    pub fn location(&self) -> Result<GeoPoint, ApiError> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => GeoPoint::new(lat, lon),
            _ => Err(ApiError::validation("Latitude and longitude are required")),
        }
    }

    pub fn severity(&self) -> Result<Severity, ApiError> {
        match self.severity.as_deref().map(str::trim) {
            None | Some("") => Ok(Severity::default()),
            Some(s) => Severity::parse(s),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SosCreated {
    pub emergency: EmergencyView,
    pub nearby_hospitals: usize,
}

pub async fn raise_sos(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<SosRequest>,
) -> Result<(StatusCode, Json<ApiOk<SosCreated>>), ApiError> {
    auth.require(Role::Patient)?;
    let location = req.location()?;
    let severity = req.severity()?;

    let patient_id = resolve_patient_id(&state.db, auth.user_id).await?;
    if req.patient_id.is_some_and(|id| id != patient_id) {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Cannot raise an SOS for another patient".into(),
        ));
    }

    let emergency = store::create(
        &state.db,
        state.dispatch,
        NewEmergency {
            patient_id,
            location,
            address: req.address,
            description: req.description,
            severity,
        },
    )
    .await?;

    let nearby_hospitals = emergency.nearby_hospitals.len();
    Ok((
        StatusCode::CREATED,
        Json(
            ApiOk::new(SosCreated {
                emergency,
                nearby_hospitals,
            })
            .with_message("Emergency SOS sent successfully"),
        ),
    ))
}

/// Owner patient, any hospital in the snapshot, or an admin.
async fn ensure_can_view(state: &AppState, auth: &AuthContext, view: &EmergencyView) -> Result<(), ApiError> {
    let allowed = match auth.role {
        Role::Admin => true,
        Role::Patient => resolve_patient_id(&state.db, auth.user_id).await? == view.patient_id,
        Role::Hospital => view.lists_hospital(resolve_hospital_id(&state.db, auth.user_id).await?),
        Role::Doctor => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Not allowed to view this emergency request".into(),
        ))
    }
}

pub async fn get_emergency(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(emergency_id): Path<Uuid>,
) -> Result<Json<ApiOk<EmergencyView>>, ApiError> {
    let view = store::load(&state.db, emergency_id).await?;
    ensure_can_view(&state, &auth, &view).await?;
    Ok(Json(ApiOk::new(view)))
}

pub async fn patient_history(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<EmergencyView>>>, ApiError> {
    let allowed = match auth.role {
        Role::Admin => true,
        Role::Patient => resolve_patient_id(&state.db, auth.user_id).await? == patient_id,
        _ => false,
    };
    if !allowed {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Not allowed to view this patient's emergencies".into(),
        ));
    }
    let rows = store::list_for_patient(&state.db, patient_id).await?;
    Ok(Json(ApiOk::list(rows)))
}

/// Active requests this hospital was notified about.
pub async fn incoming(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<EmergencyView>>>, ApiError> {
    auth.require(Role::Hospital)?;
    let hospital_id = resolve_hospital_id(&state.db, auth.user_id).await?;
    let rows = store::list_incoming_for_hospital(&state.db, hospital_id).await?;
    Ok(Json(ApiOk::list(rows)))
}

#[derive(Debug, Default, Deserialize)]
pub struct AcceptRequest {
    pub hospital_id: Option<Uuid>,
}

pub async fn accept(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(emergency_id): Path<Uuid>,
    body: Option<Json<AcceptRequest>>,
) -> Result<Json<ApiOk<EmergencyView>>, ApiError> {
    auth.require(Role::Hospital)?;
    let hospital_id = resolve_hospital_id(&state.db, auth.user_id).await?;
    let claimed = body.and_then(|Json(b)| b.hospital_id);
    if claimed.is_some_and(|id| id != hospital_id) {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Cannot accept on behalf of another hospital".into(),
        ));
    }

    let view = store::accept(&state.db, emergency_id, hospital_id).await?;
    Ok(Json(
        ApiOk::new(view).with_message("Emergency request accepted successfully"),
    ))
}

pub async fn complete(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(emergency_id): Path<Uuid>,
) -> Result<Json<ApiOk<EmergencyView>>, ApiError> {
    auth.require(Role::Hospital)?;
    let hospital_id = resolve_hospital_id(&state.db, auth.user_id).await?;
    let view = store::finish(
        &state.db,
        emergency_id,
        EmergencyActor::Hospital(hospital_id),
        EmergencyAction::Complete,
    )
    .await?;
    Ok(Json(
        ApiOk::new(view).with_message("Emergency request completed successfully"),
    ))
}

pub async fn cancel(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(emergency_id): Path<Uuid>,
) -> Result<Json<ApiOk<EmergencyView>>, ApiError> {
    let actor = match auth.role {
        Role::Patient => EmergencyActor::Patient(resolve_patient_id(&state.db, auth.user_id).await?),
        Role::Hospital => EmergencyActor::Hospital(resolve_hospital_id(&state.db, auth.user_id).await?),
        _ => {
            return Err(ApiError::Forbidden(
                "FORBIDDEN",
                "Only the patient or the accepting hospital can cancel".into(),
            ));
        }
    };
    let view = store::finish(&state.db, emergency_id, actor, EmergencyAction::Cancel).await?;
    Ok(Json(
        ApiOk::new(view).with_message("Emergency request cancelled successfully"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sos(lat: Option<f64>, lon: Option<f64>, severity: Option<&str>) -> SosRequest {
        SosRequest {
            patient_id: None,
            latitude: lat,
            longitude: lon,
            address: None,
            description: None,
            severity: severity.map(Into::into),
        }
    }

    #[test]
    fn sos_needs_valid_coordinates() {
        assert!(sos(Some(19.07), Some(72.87), None).location().is_ok());
        assert_eq!(
            sos(Some(19.07), None, None).location().unwrap_err().to_string(),
            "Latitude and longitude are required"
        );
        assert!(sos(Some(-91.0), Some(72.87), None).location().is_err());
        assert!(sos(Some(19.07), Some(181.0), None).location().is_err());
    }

    #[test]
    fn sos_severity_defaults_to_medium() {
        assert_eq!(sos(None, None, None).severity().unwrap(), Severity::Medium);
        assert_eq!(sos(None, None, Some("Critical")).severity().unwrap(), Severity::Critical);
        assert!(sos(None, None, Some("panic")).severity().is_err());
    }
}
