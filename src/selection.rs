//! Driver and fleet selection.

use std::collections::HashMap;

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{Employee, EmployeeId, RouteGroup, Vehicle, VehicleAvailability, VehicleId};
use crate::error::PlannerError;
use crate::geo;
use crate::solver::{self, PICKUP_TIME_LIMIT};
use crate::store::Store;

// ============================================================================
// Driver selection
// ============================================================================

/// Picks the driver for a candidate set.
///
/// A manual pick must be present in the set and licensed. Otherwise every
/// licensed candidate is evaluated by solving the pickup ordering with that
/// candidate at the wheel, and the shortest estimated trip wins. Candidates
/// whose estimate fails are skipped; when every estimate fails the first
/// licensed candidate is returned.
pub fn select_driver(
    candidates: &[Employee],
    manual: Option<EmployeeId>,
    coords: &HashMap<EmployeeId, (f64, f64)>,
    destination: (f64, f64),
) -> Result<Employee, PlannerError> {
    if let Some(driver_id) = manual {
        return candidates
            .iter()
            .find(|candidate| candidate.id == driver_id && candidate.can_drive())
            .cloned()
            .ok_or_else(|| {
                PlannerError::Validation(
                    "manual driver is not among the candidates or not licensed to drive".into(),
                )
            });
    }

    let licensed: Vec<&Employee> = candidates
        .iter()
        .filter(|candidate| candidate.can_drive())
        .collect();
    if licensed.is_empty() {
        return Err(PlannerError::NoEligibleDriver);
    }

    let best = licensed
        .par_iter()
        .filter_map(|candidate| {
            let distance = estimate_trip_km(candidate, candidates, coords, destination)?;
            Some((*candidate, distance))
        })
        .min_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });

    Ok(best.map(|(candidate, _)| candidate).unwrap_or(licensed[0]).clone())
}

/// Trip length with `candidate` at position 0, the other candidates as
/// stops and the destination pinned last. `None` when a coordinate is
/// missing or the ordering fails.
fn estimate_trip_km(
    candidate: &Employee,
    candidates: &[Employee],
    coords: &HashMap<EmployeeId, (f64, f64)>,
    destination: (f64, f64),
) -> Option<f64> {
    let mut trip = vec![*coords.get(&candidate.id)?];
    for other in candidates {
        if other.id == candidate.id {
            continue;
        }
        trip.push(*coords.get(&other.id)?);
    }
    trip.push(destination);
    let end = trip.len() - 1;
    if end == 0 {
        return None;
    }

    let matrix = geo::distance_matrix_m(&trip);
    let order = solver::solve_pickup_order(&matrix, end, PICKUP_TIME_LIMIT).ok()?;
    Some(geo::path_distance_km(&trip, &order, end))
}

// ============================================================================
// Fleet selection (single vehicle)
// ============================================================================

#[derive(Debug, Clone)]
pub struct FleetChoice {
    pub vehicle: Vehicle,
    pub availability: VehicleAvailability,
}

/// Picks the vehicle for a single-vehicle route.
///
/// Considers availabilities of the group covering the date whose vehicle is
/// active and belongs to the group's company. Vehicles that seat everyone
/// are preferred, cheapest tier first and largest capacity on ties; when
/// none is big enough the best-ranked undersized vehicle is still chosen
/// (overflow riders go to the pending list). `Ok(None)` means no
/// availability covers the date at all.
pub fn select_vehicle(
    store: &Store,
    group: &RouteGroup,
    date: NaiveDate,
    seats_needed: u32,
    manual: Option<VehicleId>,
) -> Result<Option<FleetChoice>, PlannerError> {
    let mut covering: Vec<FleetChoice> = store
        .availabilities
        .values()
        .filter(|availability| availability.group_id == Some(group.id))
        .filter(|availability| availability.covers(date))
        .filter_map(|availability| {
            let vehicle = store.vehicles.get(&availability.vehicle_id)?;
            (vehicle.active && vehicle.company_id == group.company_id).then(|| FleetChoice {
                vehicle: vehicle.clone(),
                availability: availability.clone(),
            })
        })
        .collect();

    if covering.is_empty() {
        return Ok(None);
    }

    if let Some(vehicle_id) = manual {
        return covering
            .into_iter()
            .find(|choice| choice.vehicle.id == vehicle_id)
            .map(Some)
            .ok_or_else(|| {
                PlannerError::Validation(
                    "manual vehicle is not available for the requested period".into(),
                )
            });
    }

    covering.sort_by_key(|choice| rank_key(&choice.vehicle));
    let sufficient = covering
        .iter()
        .find(|choice| choice.vehicle.seat_capacity >= seats_needed);
    Ok(Some(
        sufficient.unwrap_or(&covering[0]).clone(),
    ))
}

fn rank_key(vehicle: &Vehicle) -> (i64, i64, VehicleId) {
    (
        (vehicle.cost_factor() * 100.0).round() as i64,
        -(vehicle.seat_capacity as i64),
        vehicle.id,
    )
}

// ============================================================================
// Fleet enumeration (VRP)
// ============================================================================

#[derive(Debug, Clone)]
pub struct FleetVehicle {
    pub vehicle: Vehicle,
    pub availability: VehicleAvailability,
    /// Seats available for riders once the driver's seat is reserved.
    pub usable_capacity: u32,
    pub cost_factor: f64,
    pub rental: bool,
}

/// Enumerates the fleet for a VRP run: availabilities covering the date
/// that reference the group (or no group), optionally including rentals,
/// restricted to `allowed` ids, ranked `(rental, cost, -capacity)` and
/// truncated to `max_vehicles`.
pub fn enumerate_fleet(
    store: &Store,
    group: &RouteGroup,
    date: NaiveDate,
    include_rentals: bool,
    allowed: Option<&[VehicleId]>,
    max_vehicles: Option<usize>,
) -> Vec<FleetVehicle> {
    let mut fleet: Vec<FleetVehicle> = store
        .availabilities
        .values()
        .filter(|availability| {
            availability.group_id.is_none() || availability.group_id == Some(group.id)
        })
        .filter(|availability| availability.covers(date))
        .filter(|availability| include_rentals || !availability.is_rental())
        .filter(|availability| {
            allowed
                .map(|ids| ids.contains(&availability.vehicle_id))
                .unwrap_or(true)
        })
        .filter_map(|availability| {
            let vehicle = store.vehicles.get(&availability.vehicle_id)?;
            if !vehicle.active || vehicle.company_id != group.company_id {
                return None;
            }
            let usable_capacity = vehicle.seat_capacity.saturating_sub(1);
            (usable_capacity > 0).then(|| FleetVehicle {
                vehicle: vehicle.clone(),
                availability: availability.clone(),
                usable_capacity,
                cost_factor: vehicle.cost_factor(),
                rental: availability.is_rental(),
            })
        })
        .collect();

    fleet.sort_by_key(|item| {
        (
            item.rental,
            (item.cost_factor * 100.0).round() as i64,
            -(item.usable_capacity as i64),
            item.vehicle.id,
        )
    });
    if let Some(limit) = max_vehicles {
        fleet.truncate(limit);
    }
    fleet
}

// ============================================================================
// Vehicle suggestions
// ============================================================================

/// A suggested extra vehicle for riders who could not be seated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleSuggestion {
    #[serde(rename = "tipo")]
    pub kind: String,
    #[serde(rename = "quantidade")]
    pub count: u32,
    #[serde(rename = "capacidade_por_veiculo")]
    pub capacity_each: u32,
    #[serde(rename = "passageiros_atendidos")]
    pub passengers_covered: u32,
}

/// Suggests sedans (5 seats) and at most one hatch (4 seats) to cover the
/// given headcount.
pub fn suggest_vehicles(headcount: u32) -> Vec<VehicleSuggestion> {
    if headcount == 0 {
        return Vec::new();
    }

    let mut suggestions = Vec::new();
    let sedans = headcount / 5;
    let remainder = headcount % 5;

    if sedans > 0 {
        suggestions.push(VehicleSuggestion {
            kind: "sedan".to_string(),
            count: sedans,
            capacity_each: 5,
            passengers_covered: (sedans * 5).min(headcount),
        });
    }
    if remainder > 0 {
        suggestions.push(VehicleSuggestion {
            kind: "hatch".to_string(),
            count: 1,
            capacity_each: 4,
            passengers_covered: remainder,
        });
    }
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employee(id_hint: &str, lat: f64, can_drive: bool) -> Employee {
        Employee {
            id: 0,
            company_id: 1,
            full_name: id_hint.into(),
            national_id: id_hint.into(),
            street: "Rua A".into(),
            number: "1".into(),
            complement: None,
            neighborhood: "Centro".into(),
            city: "Natal".into(),
            state: "RN".into(),
            zip: format!("{lat}"),
            licensed: can_drive,
            license_class: can_drive.then(|| "B".into()),
            license_expiry: None,
            apt_to_drive: can_drive,
            active: true,
        }
    }

    #[test]
    fn manual_driver_must_be_licensed() {
        let mut rider = employee("Ana", -5.8, false);
        rider.id = 1;
        let result = select_driver(&[rider], Some(1), &HashMap::new(), (-5.9, -35.2));
        assert!(matches!(result, Err(PlannerError::Validation(_))));
    }

    #[test]
    fn no_licensed_candidate_is_an_error() {
        let mut rider = employee("Ana", -5.8, false);
        rider.id = 1;
        let result = select_driver(&[rider], None, &HashMap::new(), (-5.9, -35.2));
        assert!(matches!(result, Err(PlannerError::NoEligibleDriver)));
    }

    #[test]
    fn picks_the_driver_with_the_shortest_trip() {
        // Destination far south; the southern candidate starting the run
        // keeps everyone on the way instead of backtracking.
        let mut north = employee("Norte", -5.70, true);
        north.id = 1;
        let mut south = employee("Sul", -5.90, true);
        south.id = 2;
        let mut middle = employee("Meio", -5.80, false);
        middle.id = 3;
        let coords = HashMap::from([
            (1, (-5.70, -35.20)),
            (2, (-5.90, -35.20)),
            (3, (-5.80, -35.20)),
        ]);
        let destination = (-6.00, -35.20);
        let driver = select_driver(
            &[north.clone(), south, middle],
            None,
            &coords,
            destination,
        )
        .unwrap();
        assert_eq!(driver.id, 1, "northernmost driver sweeps everyone southward");
    }

    #[test]
    fn suggestions_split_into_sedans_and_a_hatch() {
        assert_eq!(
            suggest_vehicles(6),
            vec![
                VehicleSuggestion {
                    kind: "sedan".into(),
                    count: 1,
                    capacity_each: 5,
                    passengers_covered: 5,
                },
                VehicleSuggestion {
                    kind: "hatch".into(),
                    count: 1,
                    capacity_each: 4,
                    passengers_covered: 1,
                },
            ]
        );
    }

    #[test]
    fn small_remainders_get_a_single_hatch() {
        assert_eq!(
            suggest_vehicles(2),
            vec![VehicleSuggestion {
                kind: "hatch".into(),
                count: 1,
                capacity_each: 4,
                passengers_covered: 2,
            }]
        );
        assert!(suggest_vehicles(0).is_empty());
    }
}
