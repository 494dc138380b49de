//! Road travel matrices from OSRM, with a geodesic fallback.
//!
//! The primary path is a single `/table/v1` request annotated for both
//! distance and duration. Any service failure degrades to straight-line
//! estimates so planning never stalls on the routing backend.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::geo;
use crate::geocode::USER_AGENT;

/// Sentinel for pairs the routing service reports as unreachable.
pub const UNREACHABLE: i64 = 1_000_000_000;

#[derive(Debug, Clone)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout: Duration,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://router.project-osrm.org".to_string(),
            profile: "driving".to_string(),
            timeout: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingServiceError {
    #[error("routing request failed: {0}")]
    Request(String),
    #[error("routing service error: {0}")]
    Service(String),
    #[error("malformed routing response: {0}")]
    MalformedResponse(String),
}

/// Pairwise travel estimates for an ordered coordinate list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TravelMatrices {
    pub distances_m: Vec<Vec<i64>>,
    pub durations_s: Vec<Vec<i64>>,
}

/// Road-matrix capability. Implementations return both matrices for the
/// given `(lat, lon)` coordinates, indexed by input order.
pub trait MatrixService: Send + Sync {
    fn matrices(&self, coords: &[(f64, f64)]) -> Result<TravelMatrices, RoutingServiceError>;
}

#[derive(Debug, Clone)]
pub struct OsrmTables {
    config: OsrmConfig,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
struct OsrmTableResponse {
    code: String,
    message: Option<String>,
    distances: Option<Vec<Vec<Option<f64>>>>,
    durations: Option<Vec<Vec<Option<f64>>>>,
}

impl OsrmTables {
    pub fn new(config: OsrmConfig) -> Result<Self, RoutingServiceError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|err| RoutingServiceError::Request(err.to_string()))?;
        Ok(Self { config, client })
    }

    /// Coordinates in OSRM order: `lon1,lat1;lon2,lat2;...`
    fn format_coordinates(coords: &[(f64, f64)]) -> String {
        coords
            .iter()
            .map(|(lat, lon)| format!("{lon:.6},{lat:.6}"))
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl MatrixService for OsrmTables {
    fn matrices(&self, coords: &[(f64, f64)]) -> Result<TravelMatrices, RoutingServiceError> {
        if coords.len() < 2 {
            return Err(RoutingServiceError::Request(
                "at least two coordinates are required for a table request".into(),
            ));
        }

        let url = format!(
            "{}/table/v1/{}/{}?annotations=distance,duration",
            self.config.base_url.trim_end_matches('/'),
            self.config.profile,
            Self::format_coordinates(coords),
        );

        let body: OsrmTableResponse = self
            .client
            .get(&url)
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.json())
            .map_err(|err| RoutingServiceError::Request(err.to_string()))?;

        if body.code != "Ok" {
            return Err(RoutingServiceError::Service(
                body.message.unwrap_or(body.code),
            ));
        }

        let (Some(distances), Some(durations)) = (body.distances, body.durations) else {
            return Err(RoutingServiceError::MalformedResponse(
                "response is missing distance or duration matrices".into(),
            ));
        };

        Ok(TravelMatrices {
            distances_m: convert_matrix(distances),
            durations_s: convert_matrix(durations),
        })
    }
}

fn convert_matrix(matrix: Vec<Vec<Option<f64>>>) -> Vec<Vec<i64>> {
    matrix
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|value| match value {
                    Some(v) => v.round() as i64,
                    None => UNREACHABLE,
                })
                .collect()
        })
        .collect()
}

/// Geodesic matrices at the fallback average speed.
pub fn geodesic_matrices(coords: &[(f64, f64)]) -> TravelMatrices {
    let distances_m = geo::distance_matrix_m(coords);
    let durations_s = geo::duration_matrix_s(&distances_m);
    TravelMatrices {
        distances_m,
        durations_s,
    }
}

/// Fetches road matrices, degrading to geodesic estimates on any failure.
pub fn travel_matrices(service: &dyn MatrixService, coords: &[(f64, f64)]) -> TravelMatrices {
    match service.matrices(coords) {
        Ok(matrices) => matrices,
        Err(err) => {
            tracing::warn!(error = %err, "routing service unavailable, using geodesic estimates");
            geodesic_matrices(coords)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingService;

    impl MatrixService for FailingService {
        fn matrices(&self, _coords: &[(f64, f64)]) -> Result<TravelMatrices, RoutingServiceError> {
            Err(RoutingServiceError::Service("NoTable".into()))
        }
    }

    #[test]
    fn null_cells_become_sentinel() {
        let converted = convert_matrix(vec![
            vec![Some(0.0), None],
            vec![Some(1234.4), Some(0.0)],
        ]);
        assert_eq!(converted, vec![vec![0, UNREACHABLE], vec![1234, 0]]);
    }

    #[test]
    fn fallback_produces_square_matrices_with_zero_diagonal() {
        let coords = [(-5.80, -35.20), (-5.85, -35.25), (-5.90, -35.30)];
        let matrices = travel_matrices(&FailingService, &coords);
        assert_eq!(matrices.distances_m.len(), 3);
        assert_eq!(matrices.durations_s.len(), 3);
        for i in 0..3 {
            assert_eq!(matrices.distances_m[i][i], 0);
            assert_eq!(matrices.durations_s[i][i], 0);
        }
        assert!(matrices.distances_m[0][1] > 0);
    }

    #[test]
    fn coordinates_are_formatted_lon_first() {
        let formatted = OsrmTables::format_coordinates(&[(-5.8279, -35.2062), (-5.9, -35.3)]);
        assert_eq!(formatted, "-35.206200,-5.827900;-35.300000,-5.900000");
    }
}
