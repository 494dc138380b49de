//! Multi-vehicle route planning with a context-keyed result cache.
//!
//! The solve is keyed by a canonical JSON snapshot of everything that can
//! change its outcome: company, group, date, shift, rounded destination,
//! rounded employee coordinates and the fleet. Within the TTL, an identical
//! request replays the cached plan instead of rebuilding matrices and
//! re-solving.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{
    Assignment, AssignmentRole, AvailabilityId, CostTier, Employee, EmployeeId, GenerationLog,
    PendingEmployee, PlanningMode, Route, RouteStatus, Shift, VehicleId,
};
use crate::error::PlannerError;
use crate::geocode::{GeocodeBackend, Geocoder};
use crate::matrix::{self, MatrixService};
use crate::planner::{
    geocode_employees, load_company_and_group, reject_past_date, resolve_destination, round2,
    PlanRequest, PlannedRoute,
};
use crate::selection::{self, FleetVehicle};
use crate::solver::{self, DEFAULT_DROP_PENALTY, VRP_TIME_LIMIT};
use crate::store::{Database, CONFLICT_CONTEXT};

/// Cache freshness window when none is configured.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Pending reason when the whole fleet runs out of seats.
pub const PENDING_FLEET_REASON: &str =
    "Capacidade total da frota atingida para o turno selecionado.";

const VRP_ROUTE_NOTES: &str =
    "Rota VRP gerada automaticamente com base na frota disponível.";
const VRP_GENERATION_NOTES: &str = "Rota VRP gerada automaticamente.";

#[derive(Debug, Clone)]
pub struct VrpRequest {
    pub plan: PlanRequest,
    pub allowed_vehicle_ids: Option<Vec<VehicleId>>,
    pub max_vehicles: Option<usize>,
    pub include_rentals: bool,
    pub ignore_cache: bool,
}

/// Everything produced by one VRP run: the persisted sub-routes plus the
/// riders no vehicle could seat.
#[derive(Debug, Clone)]
pub struct VrpOutcome {
    pub routes: Vec<PlannedRoute>,
    pub pending: Vec<PendingEmployee>,
}

// ============================================================================
// Cache context and payload
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeePoint {
    pub id: EmployeeId,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetPoint {
    pub id: VehicleId,
    #[serde(rename = "capacidade")]
    pub capacity: u32,
    #[serde(rename = "terceirizado")]
    pub rental: bool,
    #[serde(rename = "categoria")]
    pub tier: CostTier,
}

/// Snapshot of the inputs a VRP solve depends on. Serialized canonically
/// (sorted keys, no whitespace) and hashed into the cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheContext {
    #[serde(rename = "empresa_id")]
    pub company_id: i64,
    #[serde(rename = "grupo_rota_id")]
    pub group_id: i64,
    #[serde(rename = "data")]
    pub date: String,
    #[serde(rename = "turno")]
    pub shift: Shift,
    #[serde(rename = "destino")]
    pub destination: [f64; 2],
    #[serde(rename = "funcionarios")]
    pub employees: Vec<EmployeePoint>,
    #[serde(rename = "veiculos")]
    pub vehicles: Vec<FleetPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedVrpRoute {
    #[serde(rename = "veiculo_id")]
    pub vehicle_id: VehicleId,
    #[serde(rename = "disponibilidade_id")]
    pub availability_id: AvailabilityId,
    #[serde(rename = "funcionarios")]
    pub employee_ids: Vec<EmployeeId>,
    #[serde(rename = "distancia_m")]
    pub distance_m: i64,
    #[serde(rename = "duracao_s")]
    pub duration_s: i64,
    #[serde(rename = "custo")]
    pub cost: f64,
}

/// The cached result of one solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VrpPlan {
    #[serde(rename = "rotas")]
    pub routes: Vec<PlannedVrpRoute>,
    #[serde(rename = "pendentes")]
    pub pending: Vec<EmployeeId>,
    #[serde(rename = "contexto")]
    pub context: CacheContext,
}

fn round5(value: f64) -> f64 {
    (value * 100_000.0).round() / 100_000.0
}

/// Compact JSON with alphabetically sorted object keys.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, PlannerError> {
    // Round-tripping through Value sorts the keys: serde_json maps are
    // BTreeMaps.
    let value = serde_json::to_value(value)
        .map_err(|err| PlannerError::Repository(format!("serialization failed: {err}")))?;
    serde_json::to_string(&value)
        .map_err(|err| PlannerError::Repository(format!("serialization failed: {err}")))
}

/// SHA-256 hex of the canonical context serialization.
pub fn context_key(context: &CacheContext) -> Result<String, PlannerError> {
    let raw = canonical_json(context)?;
    let digest = Sha256::digest(raw.as_bytes());
    Ok(digest.iter().map(|byte| format!("{byte:02x}")).collect())
}

pub fn build_context(
    request: &PlanRequest,
    destination_coords: (f64, f64),
    employees: &[(Employee, (f64, f64))],
    fleet: &[FleetVehicle],
) -> CacheContext {
    CacheContext {
        company_id: request.company_id,
        group_id: request.group_id,
        date: request.date.to_string(),
        shift: request.shift,
        destination: [round5(destination_coords.0), round5(destination_coords.1)],
        employees: employees
            .iter()
            .map(|(employee, coords)| EmployeePoint {
                id: employee.id,
                lat: round5(coords.0),
                lon: round5(coords.1),
            })
            .collect(),
        vehicles: fleet
            .iter()
            .map(|item| FleetPoint {
                id: item.vehicle.id,
                capacity: item.usable_capacity,
                rental: item.rental,
                tier: item.vehicle.cost_tier,
            })
            .collect(),
    }
}

/// Fetches a cached plan if it is fresh and its fleet snapshot still
/// matches (every cached vehicle id present in the current fleet).
fn cached_plan(
    db: &Database,
    key: &str,
    ttl: Duration,
    fleet: &[FleetVehicle],
) -> Result<Option<VrpPlan>, PlannerError> {
    let Some(entry) = db.read(|store| store.vrp_cache_get(key).cloned())? else {
        return Ok(None);
    };
    let ttl = chrono::Duration::from_std(ttl)
        .unwrap_or_else(|_| chrono::Duration::try_seconds(i64::MAX / 1_000).unwrap());
    if chrono::Utc::now() - entry.updated_at > ttl {
        return Ok(None);
    }
    let Ok(plan) = serde_json::from_str::<VrpPlan>(&entry.payload) else {
        return Ok(None);
    };
    let fleet_ids: Vec<VehicleId> = fleet.iter().map(|item| item.vehicle.id).collect();
    if plan
        .routes
        .iter()
        .any(|route| !fleet_ids.contains(&route.vehicle_id))
    {
        return Ok(None);
    }
    Ok(Some(plan))
}

// ============================================================================
// Solving
// ============================================================================

/// Solves the capacitated VRP over road matrices (geodesic on fallback).
fn solve_plan(
    matrix_service: &dyn MatrixService,
    employees: &[(Employee, (f64, f64))],
    destination_coords: (f64, f64),
    fleet: &[FleetVehicle],
    context: CacheContext,
) -> Result<VrpPlan, PlannerError> {
    let mut coords: Vec<(f64, f64)> = Vec::with_capacity(employees.len() + 1);
    coords.push(destination_coords);
    coords.extend(employees.iter().map(|(_, point)| *point));

    let matrices = matrix::travel_matrices(matrix_service, &coords);
    let capacities: Vec<i64> = fleet.iter().map(|item| item.usable_capacity as i64).collect();
    let solution = solver::solve_vrp(
        &matrices.distances_m,
        &capacities,
        DEFAULT_DROP_PENALTY,
        VRP_TIME_LIMIT,
    )?;

    let mut routes = Vec::new();
    for (vehicle_index, node_route) in solution.vehicle_routes.iter().enumerate() {
        if node_route.is_empty() {
            continue;
        }
        let item = &fleet[vehicle_index];
        let distance_m = solver::closed_route_cost(&matrices.distances_m, node_route);
        let duration_s = solver::closed_route_cost(&matrices.durations_s, node_route);
        routes.push(PlannedVrpRoute {
            vehicle_id: item.vehicle.id,
            availability_id: item.availability.id,
            employee_ids: node_route
                .iter()
                .map(|&node| employees[node - 1].0.id)
                .collect(),
            distance_m,
            duration_s,
            cost: (distance_m as f64 / 1000.0) * item.cost_factor,
        });
    }

    let pending = solution
        .dropped
        .iter()
        .map(|&node| employees[node - 1].0.id)
        .collect();

    Ok(VrpPlan {
        routes,
        pending,
        context,
    })
}

// ============================================================================
// Facade
// ============================================================================

/// Plans one route per vehicle for the request, splitting riders across the
/// fleet and pending the ones no vehicle can seat.
pub fn generate_vrp_routes<B: GeocodeBackend>(
    db: &Database,
    geocoder: &Geocoder<B>,
    matrix_service: &dyn MatrixService,
    request: &VrpRequest,
    cache_ttl: Duration,
) -> Result<VrpOutcome, PlannerError> {
    let (company, group) =
        load_company_and_group(db, request.plan.company_id, request.plan.group_id)?;
    reject_past_date(request.plan.date)?;

    if db.read(|store| {
        store.route_exists(company.id, group.id, request.plan.date, request.plan.shift)
    })? {
        return Err(PlannerError::Validation(
            "routes already exist for this group, date and shift".into(),
        ));
    }

    let candidates = db.read(|store| {
        crate::eligibility::eligible_employees(store, &group, request.plan.date, request.plan.shift)
    })?;
    if candidates.is_empty() {
        return Err(PlannerError::NoEligibleEmployees);
    }

    let (destination, destination_coords) =
        resolve_destination(db, geocoder, &company, &request.plan.destination)?;
    let coords = geocode_employees(db, geocoder, &candidates)?;
    // Candidates come back sorted by id; keep that order in the snapshot.
    let planned_employees: Vec<(Employee, (f64, f64))> = candidates
        .iter()
        .map(|employee| (employee.clone(), coords[&employee.id]))
        .collect();

    let fleet = db.read(|store| {
        selection::enumerate_fleet(
            store,
            &group,
            request.plan.date,
            request.include_rentals,
            request.allowed_vehicle_ids.as_deref(),
            request.max_vehicles,
        )
    })?;
    if fleet.is_empty() {
        return Err(PlannerError::Validation(
            "no vehicle available for the requested period".into(),
        ));
    }

    let context = build_context(&request.plan, destination_coords, &planned_employees, &fleet);
    let key = context_key(&context)?;

    let mut plan = None;
    if !request.ignore_cache {
        plan = cached_plan(db, &key, cache_ttl, &fleet)?;
        if plan.is_some() {
            tracing::debug!(key = %key, "VRP cache hit");
        }
    }
    let plan = match plan {
        Some(plan) => plan,
        None => {
            let solved = solve_plan(
                matrix_service,
                &planned_employees,
                destination_coords,
                &fleet,
                context,
            )?;
            let payload = canonical_json(&solved)?;
            db.transaction(|store| {
                store.vrp_cache_upsert(&key, payload.clone());
                Ok(())
            })?;
            solved
        }
    };

    if plan.routes.is_empty() {
        return Err(PlannerError::Validation(
            "no route could be assembled with the available fleet".into(),
        ));
    }

    let employees_by_id: HashMap<EmployeeId, Employee> = candidates
        .iter()
        .map(|employee| (employee.id, employee.clone()))
        .collect();
    let suggestions = if plan.pending.is_empty() {
        Vec::new()
    } else {
        selection::suggest_vehicles(plan.pending.len() as u32)
    };
    let availability_by_vehicle: HashMap<VehicleId, AvailabilityId> = fleet
        .iter()
        .map(|item| (item.vehicle.id, item.availability.id))
        .collect();

    let result = db.transaction(|store| {
        let mut outcome = VrpOutcome {
            routes: Vec::with_capacity(plan.routes.len()),
            pending: Vec::with_capacity(plan.pending.len()),
        };

        for (index, sub_route) in plan.routes.iter().enumerate() {
            if store.vehicle_has_route(
                sub_route.vehicle_id,
                request.plan.date,
                request.plan.shift,
                &[],
            ) {
                return Err(PlannerError::Conflict(
                    "Veículo indisponível por conflito de agenda.".into(),
                ));
            }

            let riders: Vec<Employee> = sub_route
                .employee_ids
                .iter()
                .filter_map(|id| employees_by_id.get(id).cloned())
                .collect();
            for rider in &riders {
                if store.employee_has_route(rider.id, request.plan.date, request.plan.shift, &[]) {
                    return Err(PlannerError::Conflict(
                        "Funcionário já possui rota no mesmo dia e turno.".into(),
                    ));
                }
            }

            let driver =
                selection::select_driver(&riders, None, &coords, destination_coords).ok();

            let route_id = store.insert_route(Route {
                id: 0,
                company_id: company.id,
                group_id: group.id,
                vehicle_id: Some(sub_route.vehicle_id),
                driver_id: driver.as_ref().map(|driver| driver.id),
                availability_id: availability_by_vehicle
                    .get(&sub_route.vehicle_id)
                    .copied()
                    .or(Some(sub_route.availability_id)),
                destination_id: Some(destination.id),
                date: request.plan.date,
                shift: request.plan.shift,
                status: RouteStatus::Scheduled,
                mode: PlanningMode::Automatic,
                sequence: index as u32 + 1,
                distance_km: Some(round2(sub_route.distance_m as f64 / 1000.0)),
                cost: Some(round2(sub_route.cost)),
                notes: Some(VRP_ROUTE_NOTES.to_string()),
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            })?;

            let mut assignments = Vec::with_capacity(riders.len());
            if let Some(driver) = &driver {
                let (lat, lon) = coords[&driver.id];
                let row = Assignment {
                    id: 0,
                    route_id,
                    employee_id: driver.id,
                    role: AssignmentRole::Driver,
                    boarding_order: Some(0),
                    boarding_time: None,
                    latitude: Some(lat),
                    longitude: Some(lon),
                };
                store.insert_assignment(row.clone())?;
                assignments.push(row);
            }
            let mut position = if driver.is_some() { 1u32 } else { 0 };
            for rider in &riders {
                if driver.as_ref().map(|driver| driver.id) == Some(rider.id) {
                    continue;
                }
                let (lat, lon) = coords[&rider.id];
                let row = Assignment {
                    id: 0,
                    route_id,
                    employee_id: rider.id,
                    role: AssignmentRole::Passenger,
                    boarding_order: Some(position),
                    boarding_time: None,
                    latitude: Some(lat),
                    longitude: Some(lon),
                };
                store.insert_assignment(row.clone())?;
                assignments.push(row);
                position += 1;
            }

            store.insert_generation_log(GenerationLog {
                id: 0,
                route_id,
                generated_at: chrono::Utc::now(),
                employee_count: riders.len() as u32,
                vehicle_id: Some(sub_route.vehicle_id),
                driver_id: driver.as_ref().map(|driver| driver.id),
                notes: Some(VRP_GENERATION_NOTES.to_string()),
            });

            outcome.routes.push(PlannedRoute {
                route: store.routes[&route_id].clone(),
                assignments,
                pending: Vec::new(),
                suggestions: suggestions.clone(),
            });
        }

        for &employee_id in &plan.pending {
            let pending_id = store.insert_pending(PendingEmployee {
                id: 0,
                route_id: None,
                employee_id,
                date: request.plan.date,
                shift: request.plan.shift,
                reason: PENDING_FLEET_REASON.to_string(),
                group_id: Some(group.id),
            });
            outcome.pending.push(store.pending[&pending_id].clone());
        }

        Ok(outcome)
    });

    if let Err(PlannerError::Conflict(message)) = &result {
        db.log_error(None, CONFLICT_CONTEXT, message, None);
    }
    if let Ok(outcome) = &result {
        tracing::info!(
            routes = outcome.routes.len(),
            pending = outcome.pending.len(),
            "VRP routes generated"
        );
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_context() -> CacheContext {
        CacheContext {
            company_id: 1,
            group_id: 2,
            date: "2026-08-04".into(),
            shift: Shift::Morning,
            destination: [-5.8279, -35.2062],
            employees: vec![EmployeePoint {
                id: 3,
                lat: -5.8,
                lon: -35.2,
            }],
            vehicles: vec![FleetPoint {
                id: 4,
                capacity: 4,
                rental: false,
                tier: CostTier::Low,
            }],
        }
    }

    #[test]
    fn canonical_json_sorts_keys_and_strips_whitespace() {
        let encoded = canonical_json(&sample_context()).unwrap();
        assert_eq!(
            encoded,
            "{\"data\":\"2026-08-04\",\"destino\":[-5.8279,-35.2062],\"empresa_id\":1,\
             \"funcionarios\":[{\"id\":3,\"lat\":-5.8,\"lon\":-35.2}],\"grupo_rota_id\":2,\
             \"turno\":\"manha\",\"veiculos\":[{\"capacidade\":4,\"categoria\":\"baixo\",\
             \"id\":4,\"terceirizado\":false}]}"
        );
    }

    #[test]
    fn context_key_is_a_stable_sha256_hex() {
        let first = context_key(&sample_context()).unwrap();
        let second = context_key(&sample_context()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));

        let mut other = sample_context();
        other.employees[0].lat = -5.81;
        assert_ne!(first, context_key(&other).unwrap());
    }

    #[test]
    fn plan_payload_round_trips() {
        let plan = VrpPlan {
            routes: vec![PlannedVrpRoute {
                vehicle_id: 4,
                availability_id: 9,
                employee_ids: vec![3, 5],
                distance_m: 12_345,
                duration_s: 1_389,
                cost: 12.345,
            }],
            pending: vec![8],
            context: sample_context(),
        };
        let payload = canonical_json(&plan).unwrap();
        let decoded: VrpPlan = serde_json::from_str(&payload).unwrap();
        assert_eq!(decoded, plan);
    }

    #[test]
    fn rounding_keeps_five_decimals() {
        assert_eq!(round5(-5.827_914_999), -5.82791);
        assert_eq!(round5(-35.206_2), -35.2062);
    }
}
