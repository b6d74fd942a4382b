//! Emergency SOS dispatch: nearby-hospital snapshot plus the request
//! lifecycle.

pub mod geo;
pub mod lifecycle;
pub mod store;

pub use geo::GeoPoint;
pub use lifecycle::{EmergencyAction, Severity};

/// Upper bound on hospitals recorded in one snapshot.
pub const MAX_SNAPSHOT_HOSPITALS: i64 = 100;

/// Search bounds for the snapshot taken when an SOS is raised.
#[derive(Debug, Clone, Copy)]
pub struct DispatchPolicy {
    pub radius_km: f64,
    pub max_hospitals: i64,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            radius_km: 50.0,
            max_hospitals: 10,
        }
    }
}
