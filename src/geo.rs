//! Geodesic math: haversine distances and synthesized travel matrices.
//!
//! The single-vehicle planner runs entirely on these estimates; the VRP
//! planner only falls back to them when the road-routing service is down.

/// Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Average speed assumed when synthesizing durations from distances.
pub const FALLBACK_SPEED_KMH: f64 = 32.0;

/// Great-circle distance between two `(lat, lon)` points in kilometers.
pub fn distance_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = from;
    let (lat2, lon2) = to;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Square matrix of pairwise geodesic distances in meters, zero diagonal.
pub fn distance_matrix_m(coords: &[(f64, f64)]) -> Vec<Vec<i64>> {
    let n = coords.len();
    let mut matrix = vec![vec![0i64; n]; n];
    for (i, from) in coords.iter().enumerate() {
        for (j, to) in coords.iter().enumerate() {
            if i != j {
                matrix[i][j] = (distance_km(*from, *to) * 1000.0).round() as i64;
            }
        }
    }
    matrix
}

/// Durations in seconds derived from a meter matrix at [`FALLBACK_SPEED_KMH`].
pub fn duration_matrix_s(distances_m: &[Vec<i64>]) -> Vec<Vec<i64>> {
    distances_m
        .iter()
        .map(|row| {
            row.iter()
                .map(|&meters| {
                    if meters == 0 {
                        0
                    } else {
                        ((meters as f64 / 1000.0) / FALLBACK_SPEED_KMH * 3600.0).round() as i64
                    }
                })
                .collect()
        })
        .collect()
}

/// Total geodesic distance of `start -> order... -> end` in kilometers.
///
/// `coords[0]` is the start, `end` indexes the fixed final stop, and `order`
/// lists the intermediate stops by index.
pub fn path_distance_km(coords: &[(f64, f64)], order: &[usize], end: usize) -> f64 {
    let mut current = coords[0];
    if order.is_empty() {
        return distance_km(current, coords[end]);
    }
    let mut total = 0.0;
    for &idx in order {
        total += distance_km(current, coords[idx]);
        current = coords[idx];
    }
    total + distance_km(current, coords[end])
}
