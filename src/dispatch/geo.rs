use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::ApiError;
use crate::models::{HOSPITAL_COLUMNS, HospitalRow};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ApiError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(ApiError::validation("Invalid latitude value"));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(ApiError::validation("Invalid longitude value"));
        }
        Ok(Self { latitude, longitude })
    }
}

/// Great-circle distance on a sphere of radius 6371 km.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

pub fn round_km(d: f64) -> f64 {
    (d * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize)]
pub struct Nearby<T> {
    #[serde(flatten)]
    pub item: T,
    pub distance: f64,
}

/// Keep candidates within `radius_km` of `origin`, nearest first, at most
/// `limit` of them.
pub fn select_nearest<T>(
    origin: GeoPoint,
    candidates: impl IntoIterator<Item = (T, GeoPoint)>,
    radius_km: f64,
    limit: Option<usize>,
) -> Vec<Nearby<T>> {
    let mut within: Vec<Nearby<T>> = candidates
        .into_iter()
        .map(|(item, p)| Nearby {
            item,
            distance: haversine_km(origin, p),
        })
        .filter(|n| n.distance <= radius_km)
        .collect();
    within.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    if let Some(limit) = limit {
        within.truncate(limit);
    }
    within
}

/// Nearest active hospitals around `origin`. PostGIS narrows the candidates
/// through the spatial index; the final radius cut and order use haversine
/// so stored distances and membership agree.
pub async fn find_nearby_hospitals(
    db: &PgPool,
    origin: GeoPoint,
    radius_km: f64,
    limit: Option<usize>,
    emergency_only: bool,
) -> Result<Vec<Nearby<HospitalRow>>, ApiError> {
    // spheroid vs sphere differ by well under 1%
    let search_m = radius_km * 1000.0 * 1.01;
    let fetch_limit = limit.map(|l| i64::try_from(l.saturating_mul(2)).unwrap_or(i64::MAX));

    let sql = format!(
        r#"
        SELECT {HOSPITAL_COLUMNS}
        FROM hospital
        WHERE is_active
          AND (NOT $4 OR emergency_services)
          AND ST_DWithin(location, ST_SetSRID(ST_MakePoint($1, $2), 4326)::geography, $3)
        ORDER BY location <-> ST_SetSRID(ST_MakePoint($1, $2), 4326)::geography
        LIMIT $5
        "#
    );

    let rows: Vec<HospitalRow> = sqlx::query_as::<_, HospitalRow>(&sql)
        .bind(origin.longitude)
        .bind(origin.latitude)
        .bind(search_m)
        .bind(emergency_only)
        .bind(fetch_limit)
        .fetch_all(db)
        .await
        .map_err(ApiError::db)?;

    Ok(select_nearest(
        origin,
        rows.into_iter().map(|h| {
            let p = GeoPoint {
                latitude: h.latitude,
                longitude: h.longitude,
            };
            (h, p)
        }),
        radius_km,
        limit,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOS: GeoPoint = GeoPoint {
        latitude: 19.07,
        longitude: 72.87,
    };

    fn north_of(origin: GeoPoint, km: f64) -> GeoPoint {
        GeoPoint {
            latitude: origin.latitude + (km / EARTH_RADIUS_KM).to_degrees(),
            longitude: origin.longitude,
        }
    }

    #[test]
    fn haversine_matches_known_distances() {
        assert!(haversine_km(SOS, SOS).abs() < 1e-9);
        assert!((haversine_km(SOS, north_of(SOS, 3.0)) - 3.0).abs() < 1e-6);

        let mumbai = GeoPoint { latitude: 19.0760, longitude: 72.8777 };
        let pune = GeoPoint { latitude: 18.5204, longitude: 73.8567 };
        let d = haversine_km(mumbai, pune);
        assert!((115.0..125.0).contains(&d), "got {d}");
        assert!((haversine_km(pune, mumbai) - d).abs() < 1e-9);
    }

    #[test]
    fn selection_excludes_far_hospitals() {
        let picked = select_nearest(
            SOS,
            vec![("far", north_of(SOS, 60.0)), ("near", north_of(SOS, 3.0))],
            50.0,
            Some(10),
        );
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].item, "near");
        assert!((picked[0].distance - 3.0).abs() < 1e-6);
    }

    #[test]
    fn selection_orders_and_caps() {
        let candidates: Vec<(u32, GeoPoint)> = (1..=15)
            .rev()
            .map(|km| (km, north_of(SOS, km as f64)))
            .collect();
        let picked = select_nearest(SOS, candidates, 50.0, Some(10));
        let order: Vec<u32> = picked.iter().map(|n| n.item).collect();
        assert_eq!(order, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn radius_boundary_is_inclusive() {
        let edge = north_of(SOS, 50.0);
        let picked = select_nearest(SOS, vec![((), edge)], haversine_km(SOS, edge), None);
        assert_eq!(picked.len(), 1);
    }

    #[test]
    fn coordinates_are_range_checked() {
        assert!(GeoPoint::new(19.07, 72.87).is_ok());
        assert!(GeoPoint::new(91.0, 0.0).is_err());
        assert!(GeoPoint::new(0.0, -181.0).is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
        assert_eq!(round_km(3.14159), 3.14);
    }
}
