//! Address geocoding with a two-tier cache and a rate-limited backend.
//!
//! Resolution order: in-process LRU, persistent cache, external service.
//! External lookups are serialized behind a gate so concurrent misses for
//! the same address coalesce into a single call, and spaced at least
//! [`MIN_LOOKUP_INTERVAL`] apart to respect public-provider limits.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Deserialize;
use thiserror::Error;

use crate::store::Database;

/// Identifying User-Agent required by public geocoding providers.
pub const USER_AGENT: &str = "rota-planner";

/// Minimum spacing between external lookups.
pub const MIN_LOOKUP_INTERVAL: Duration = Duration::from_secs(1);

const MEMO_CAPACITY: usize = 512;
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeocodeError {
    #[error("empty address")]
    EmptyAddress,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("geocoding service failure: {0}")]
    Service(String),
    #[error("failed to geocode address of {name}: {reason}")]
    Employee { name: String, reason: String },
}

/// Lowercases, trims and collapses internal whitespace. The result is the
/// cache key in both tiers.
pub fn normalize_address(address: &str) -> String {
    address
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// External lookup capability. `Ok(None)` means the provider had no match.
pub trait GeocodeBackend: Send + Sync {
    fn lookup(&self, address: &str) -> Result<Option<(f64, f64)>, GeocodeError>;
}

// ============================================================================
// Nominatim backend
// ============================================================================

#[derive(Debug, Clone)]
pub struct NominatimConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for NominatimConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            timeout: LOOKUP_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NominatimClient {
    config: NominatimConfig,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

impl NominatimClient {
    pub fn new(config: NominatimConfig) -> Result<Self, GeocodeError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|err| GeocodeError::Service(err.to_string()))?;
        Ok(Self { config, client })
    }
}

impl GeocodeBackend for NominatimClient {
    fn lookup(&self, address: &str) -> Result<Option<(f64, f64)>, GeocodeError> {
        let url = format!("{}/search", self.config.base_url.trim_end_matches('/'));
        let places: Vec<NominatimPlace> = self
            .client
            .get(url)
            .query(&[("q", address), ("format", "json"), ("limit", "1")])
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.json())
            .map_err(|err| GeocodeError::Service(err.to_string()))?;

        let Some(place) = places.into_iter().next() else {
            return Ok(None);
        };
        let lat: f64 = place
            .lat
            .parse()
            .map_err(|_| GeocodeError::Service(format!("bad latitude '{}'", place.lat)))?;
        let lon: f64 = place
            .lon
            .parse()
            .map_err(|_| GeocodeError::Service(format!("bad longitude '{}'", place.lon)))?;
        Ok(Some((lat, lon)))
    }
}

// ============================================================================
// Cached, rate-limited resolver
// ============================================================================

pub struct Geocoder<B> {
    backend: B,
    min_interval: Duration,
    memo: Mutex<LruCache<String, (f64, f64)>>,
    /// Serializes external lookups; stores the instant of the last call.
    gate: Mutex<Option<Instant>>,
}

impl<B: GeocodeBackend> Geocoder<B> {
    pub fn new(backend: B) -> Self {
        Self::with_min_interval(backend, MIN_LOOKUP_INTERVAL)
    }

    pub fn with_min_interval(backend: B, min_interval: Duration) -> Self {
        Self {
            backend,
            min_interval,
            memo: Mutex::new(LruCache::new(
                NonZeroUsize::new(MEMO_CAPACITY).expect("memo capacity must be non-zero"),
            )),
            gate: Mutex::new(None),
        }
    }

    /// Resolves an address to `(lat, lon)` through the cache tiers.
    pub fn resolve(&self, db: &Database, address: &str) -> Result<(f64, f64), GeocodeError> {
        let normalized = normalize_address(address);
        if normalized.is_empty() {
            return Err(GeocodeError::EmptyAddress);
        }

        if let Some(&coords) = self.memo.lock().unwrap().get(&normalized) {
            return Ok(coords);
        }

        match db.geocode_lookup(&normalized) {
            Ok(Some(coords)) => {
                self.memo.lock().unwrap().put(normalized, coords);
                return Ok(coords);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(address = %normalized, error = %err, "geocode cache read failed");
            }
        }

        let mut gate = self.gate.lock().unwrap();

        // Another caller may have resolved the same address while we waited
        // for the gate.
        if let Some(&coords) = self.memo.lock().unwrap().get(&normalized) {
            return Ok(coords);
        }

        if let Some(last_call) = *gate {
            let elapsed = last_call.elapsed();
            if elapsed < self.min_interval {
                std::thread::sleep(self.min_interval - elapsed);
            }
        }
        let result = self.backend.lookup(address);
        *gate = Some(Instant::now());
        drop(gate);

        let coords = result?.ok_or_else(|| GeocodeError::NotFound(address.to_string()))?;
        self.memo.lock().unwrap().put(normalized.clone(), coords);

        // The persistent tier is best-effort: a failed write must never fail
        // the resolution that produced the coordinates.
        if let Err(err) = db.geocode_store(&normalized, coords.0, coords.1) {
            tracing::warn!(address = %normalized, error = %err, "geocode cache write failed");
        }

        Ok(coords)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FixedBackend {
        coords: Option<(f64, f64)>,
        calls: AtomicUsize,
    }

    impl FixedBackend {
        fn new(coords: Option<(f64, f64)>) -> Self {
            Self {
                coords,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl GeocodeBackend for &FixedBackend {
        fn lookup(&self, _address: &str) -> Result<Option<(f64, f64)>, GeocodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.coords)
        }
    }

    #[test]
    fn normalize_collapses_whitespace_and_case() {
        assert_eq!(
            normalize_address("  Rua   das Flores,  100 "),
            "rua das flores, 100"
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_address("  AV.  Salgado   Filho ");
        assert_eq!(normalize_address(&once), once);
    }

    #[test]
    fn empty_address_is_rejected() {
        let backend = FixedBackend::new(Some((1.0, 2.0)));
        let geocoder = Geocoder::with_min_interval(&backend, Duration::ZERO);
        let db = Database::new();
        assert_eq!(
            geocoder.resolve(&db, "   "),
            Err(GeocodeError::EmptyAddress)
        );
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn repeated_lookups_hit_the_memo() {
        let backend = FixedBackend::new(Some((-5.8, -35.2)));
        let geocoder = Geocoder::with_min_interval(&backend, Duration::ZERO);
        let db = Database::new();
        let first = geocoder.resolve(&db, "Rua A, 1").unwrap();
        let second = geocoder.resolve(&db, "  rua a,   1").unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn persistent_cache_avoids_the_backend() {
        let backend = FixedBackend::new(None);
        let geocoder = Geocoder::with_min_interval(&backend, Duration::ZERO);
        let db = Database::new();
        db.geocode_store("rua b, 2", -6.0, -36.0).unwrap();
        let coords = geocoder.resolve(&db, "Rua B, 2").unwrap();
        assert_eq!(coords, (-6.0, -36.0));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_place_maps_to_not_found() {
        let backend = FixedBackend::new(None);
        let geocoder = Geocoder::with_min_interval(&backend, Duration::ZERO);
        let db = Database::new();
        assert!(matches!(
            geocoder.resolve(&db, "Nowhere"),
            Err(GeocodeError::NotFound(address)) if address == "Nowhere"
        ));
    }
}
