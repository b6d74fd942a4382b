use crate::models::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use tower_http::services::ServeDir;

pub mod appointment_routes;
pub mod auth_routes;
pub mod doctor_routes;
pub mod document_routes;
pub mod emergency_routes;
pub mod hospital_appointment_routes;
pub mod hospital_doctor_routes;
pub mod hospital_routes;
pub mod issue_routes;
pub mod patient_routes;

// multipart framing on top of the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn router(state: AppState) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.max_upload_bytes + MULTIPART_OVERHEAD);

    Router::new()
        .nest("/api/auth", auth_routes::router())
        .nest("/api/appointments", appointment_routes::router())
        .nest("/api/hospital-appointments", hospital_appointment_routes::router())
        .nest("/api/emergency", emergency_routes::router())
        .nest("/api/hospitals", hospital_routes::router())
        .nest("/api/hospital-doctors", hospital_doctor_routes::router())
        .nest("/api/doctors", doctor_routes::router())
        .nest("/api/patients", patient_routes::router())
        .nest("/api/documents", document_routes::router().layer(upload_limit))
        .nest("/api/issues", issue_routes::router())
        .nest_service("/uploads", ServeDir::new(&state.upload_dir))
        .with_state(state)
}
