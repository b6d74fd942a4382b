use std::env;

use crate::dispatch::MAX_SNAPSHOT_HOSPITALS;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    pub db_max_connections: u32,
    pub upload_dir: String,
    pub max_upload_bytes: usize,
    pub emergency_radius_km: f64,
    pub emergency_max_hospitals: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        Ok(Self::from_lookup(database_url, |key| env::var(key).ok()))
    }

    fn from_lookup(database_url: String, get: impl Fn(&str) -> Option<String>) -> Self {
        let bind_addr = get("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:5000".to_string());
        let session_ttl_hours = get("SESSION_TTL_HOURS")
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(24 * 30);
        let db_max_connections = get("DB_MAX_CONNECTIONS")
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(10);
        let upload_dir = get("UPLOAD_DIR").unwrap_or_else(|| "uploads".to_string());
        let max_upload_bytes = get("MAX_UPLOAD_BYTES")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(5 * 1024 * 1024);
        let emergency_radius_km = get("EMERGENCY_RADIUS_KM")
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|r| *r > 0.0)
            .unwrap_or(50.0);
        let emergency_max_hospitals = get("EMERGENCY_MAX_HOSPITALS")
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|n| *n > 0)
            .map(|n| n.min(MAX_SNAPSHOT_HOSPITALS))
            .unwrap_or(10);

        Self {
            database_url,
            bind_addr,
            session_ttl_hours,
            db_max_connections,
            upload_dir,
            max_upload_bytes,
            emergency_radius_km,
            emergency_max_hospitals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = Config::from_lookup("postgres://localhost/meditrust".into(), lookup(&[]));
        assert_eq!(cfg.bind_addr, "127.0.0.1:5000");
        assert_eq!(cfg.session_ttl_hours, 720);
        assert_eq!(cfg.max_upload_bytes, 5 * 1024 * 1024);
        assert_eq!(cfg.emergency_radius_km, 50.0);
        assert_eq!(cfg.emergency_max_hospitals, 10);
        assert_eq!(cfg.upload_dir, "uploads");
    }

    #[test]
    fn overrides_and_garbage_fall_back() {
        let cfg = Config::from_lookup(
            "postgres://db".into(),
            lookup(&[
                ("BIND_ADDR", "0.0.0.0:8080"),
                ("SESSION_TTL_HOURS", "12"),
                ("EMERGENCY_RADIUS_KM", "-3"),
                ("EMERGENCY_MAX_HOSPITALS", "abc"),
                ("DB_MAX_CONNECTIONS", "32"),
            ]),
        );
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.session_ttl_hours, 12);
        assert_eq!(cfg.emergency_radius_km, 50.0);
        assert_eq!(cfg.emergency_max_hospitals, 10);
        assert_eq!(cfg.db_max_connections, 32);
    }

    #[test]
    fn snapshot_size_is_capped() {
        let cfg = Config::from_lookup(
            "postgres://db".into(),
            lookup(&[("EMERGENCY_MAX_HOSPITALS", "9223372036854775807")]),
        );
        assert_eq!(cfg.emergency_max_hospitals, MAX_SNAPSHOT_HOSPITALS);

        let cfg = Config::from_lookup("postgres://db".into(), lookup(&[("EMERGENCY_MAX_HOSPITALS", "25")]));
        assert_eq!(cfg.emergency_max_hospitals, 25);
    }
}
