//! Runtime configuration read from the environment.

use std::time::Duration;

use crate::matrix::OsrmConfig;
use crate::vrp::DEFAULT_CACHE_TTL;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Persistent store endpoint, consumed by the deployment's wiring.
    pub database_url: String,
    pub osrm: OsrmConfig,
    /// Freshness window of the VRP result cache.
    pub vrp_cache_ttl: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./rota_planner.db".to_string(),
            osrm: OsrmConfig::default(),
            vrp_cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

impl Settings {
    /// Builds settings from the recognized environment variables, falling
    /// back to the defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut osrm = defaults.osrm;
        if let Ok(base_url) = std::env::var("OSRM_BASE_URL") {
            osrm.base_url = base_url;
        }
        if let Ok(profile) = std::env::var("OSRM_PROFILE") {
            osrm.profile = profile;
        }
        if let Some(timeout) = read_parsed::<u64>("OSRM_TIMEOUT") {
            osrm.timeout = Duration::from_secs(timeout);
        }

        Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            osrm,
            vrp_cache_ttl: read_parsed::<u64>("ROTEIRIZACAO_CACHE_TTL_MINUTES")
                .map(|minutes| Duration::from_secs(minutes * 60))
                .unwrap_or(defaults.vrp_cache_ttl),
        }
    }
}

fn read_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}
