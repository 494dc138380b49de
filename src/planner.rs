//! Single-vehicle route generation and recalculation.
//!
//! The facade walks the full pipeline: validation, eligibility, destination
//! resolution, geocoding, driver and vehicle picks, pickup ordering,
//! geodesic metrics and one atomic persistence pass. Distances on this path
//! are always geodesic; the road-routing service only participates in the
//! multi-vehicle planner.

use std::collections::HashMap;

use chrono::{Local, NaiveDate};

use crate::domain::{
    Assignment, AssignmentRole, Company, Destination, DestinationId, Employee, EmployeeId,
    GenerationLog, PendingEmployee, PlanningMode, Route, RouteGroup, RouteId, RouteStatus, Shift,
    VehicleId,
};
use crate::error::PlannerError;
use crate::geo;
use crate::geocode::{GeocodeBackend, GeocodeError, Geocoder};
use crate::selection::{self, VehicleSuggestion};
use crate::solver::{self, PICKUP_TIME_LIMIT};
use crate::store::{Database, CONFLICT_CONTEXT};

/// Pending reason when the chosen vehicle cannot seat every rider.
pub const PENDING_CAPACITY_REASON: &str =
    "Capacidade máxima do veículo atingida para o turno.";

/// Pending reason when no vehicle covers the date at all.
pub const PENDING_NO_VEHICLE_REASON: &str =
    "Nenhum veículo disponível para o grupo na data e turno.";

/// ErrorLog context recorded when the optimizer fails.
pub const SOLVER_FAILURE_CONTEXT: &str = "Falha na otimização de rota";

const ROUTE_NOTES: &str =
    "Rota gerada automaticamente com base na disponibilidade de funcionários e veículos.";
const GENERATION_NOTES: &str = "Rota gerada automaticamente pela API.";

/// Destination of a planning request: an existing row or an inline address.
#[derive(Debug, Clone)]
pub enum DestinationSpec {
    Existing(DestinationId),
    New(NewDestination),
}

#[derive(Debug, Clone, Default)]
pub struct NewDestination {
    pub name: Option<String>,
    pub street: String,
    pub number: String,
    pub complement: Option<String>,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub company_id: i64,
    pub group_id: i64,
    pub date: NaiveDate,
    pub shift: Shift,
    pub driver_id: Option<EmployeeId>,
    pub vehicle_id: Option<VehicleId>,
    pub destination: DestinationSpec,
    pub mode: PlanningMode,
}

/// A persisted route together with the rows created alongside it.
#[derive(Debug, Clone)]
pub struct PlannedRoute {
    pub route: Route,
    pub assignments: Vec<Assignment>,
    pub pending: Vec<PendingEmployee>,
    pub suggestions: Vec<VehicleSuggestion>,
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ============================================================================
// Shared pipeline pieces
// ============================================================================

pub(crate) fn load_company_and_group(
    db: &Database,
    company_id: i64,
    group_id: i64,
) -> Result<(Company, RouteGroup), PlannerError> {
    let (company, group) = db.read(|store| {
        (
            store.companies.get(&company_id).cloned(),
            store.groups.get(&group_id).cloned(),
        )
    })?;
    let company =
        company.ok_or_else(|| PlannerError::Validation("company not found".into()))?;
    let group = group
        .filter(|group| group.company_id == company.id)
        .ok_or_else(|| {
            PlannerError::Validation("route group does not belong to the company".into())
        })?;
    Ok((company, group))
}

pub(crate) fn reject_past_date(date: NaiveDate) -> Result<(), PlannerError> {
    if date < Local::now().date_naive() {
        return Err(PlannerError::Validation(
            "cannot plan routes for past dates".into(),
        ));
    }
    Ok(())
}

/// Resolves the destination: looks up (and memoizes coordinates of) an
/// existing row, or geocodes and persists an inline address.
pub(crate) fn resolve_destination<B: GeocodeBackend>(
    db: &Database,
    geocoder: &Geocoder<B>,
    company: &Company,
    spec: &DestinationSpec,
) -> Result<(Destination, (f64, f64)), PlannerError> {
    match spec {
        DestinationSpec::Existing(destination_id) => {
            let destination = db
                .read(|store| store.destinations.get(destination_id).cloned())?
                .filter(|destination| destination.company_id == company.id)
                .ok_or_else(|| {
                    PlannerError::Validation(
                        "destination does not belong to the selected company".into(),
                    )
                })?;
            if let Some(coords) = destination.coordinates() {
                return Ok((destination, coords));
            }
            let coords = geocoder
                .resolve(db, &destination.full_address())
                .map_err(|err| {
                    PlannerError::Validation(format!(
                        "failed to geocode the selected destination: {err}"
                    ))
                })?;
            // Coordinates are memoized on first success and never cleared.
            let destination = db.transaction(|store| {
                let row = store
                    .destinations
                    .get_mut(&destination.id)
                    .ok_or_else(|| PlannerError::Repository("destination vanished".into()))?;
                row.latitude = Some(coords.0);
                row.longitude = Some(coords.1);
                Ok(row.clone())
            })?;
            Ok((destination, coords))
        }
        DestinationSpec::New(address) => {
            let required = [
                &address.street,
                &address.number,
                &address.neighborhood,
                &address.city,
                &address.state,
                &address.zip,
            ];
            if required.iter().any(|field| field.trim().is_empty()) {
                return Err(PlannerError::Validation(
                    "provide a valid destination id or every destination address field \
                     (street, number, neighborhood, city, state, zip)"
                        .into(),
                ));
            }

            let name = address
                .name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .unwrap_or(&company.name)
                .to_string();
            let mut destination = Destination {
                id: 0,
                company_id: company.id,
                name,
                street: address.street.trim().to_string(),
                number: address.number.trim().to_string(),
                complement: address
                    .complement
                    .as_deref()
                    .map(str::trim)
                    .filter(|complement| !complement.is_empty())
                    .map(str::to_string),
                neighborhood: address.neighborhood.trim().to_string(),
                city: address.city.trim().to_string(),
                state: address.state.trim().to_uppercase(),
                zip: address.zip.replace(' ', "").trim().to_string(),
                latitude: None,
                longitude: None,
                active: true,
            };
            let coords = geocoder
                .resolve(db, &destination.full_address())
                .map_err(|err| {
                    PlannerError::Validation(format!(
                        "failed to geocode the destination address: {err}"
                    ))
                })?;
            destination.latitude = Some(coords.0);
            destination.longitude = Some(coords.1);
            let destination = db.transaction(|store| {
                let id = store.add_destination(destination.clone());
                Ok(store.destinations.get(&id).cloned().expect("just inserted"))
            })?;
            Ok((destination, coords))
        }
    }
}

/// Geocodes every employee's home address, naming the employee on failure.
pub(crate) fn geocode_employees<B: GeocodeBackend>(
    db: &Database,
    geocoder: &Geocoder<B>,
    employees: &[Employee],
) -> Result<HashMap<EmployeeId, (f64, f64)>, PlannerError> {
    let mut coords = HashMap::with_capacity(employees.len());
    for employee in employees {
        let resolved = geocoder
            .resolve(db, &employee.full_address())
            .map_err(|err| GeocodeError::Employee {
                name: employee.display_name(),
                reason: err.to_string(),
            })?;
        coords.insert(employee.id, resolved);
    }
    Ok(coords)
}

// ============================================================================
// Generation
// ============================================================================

/// Plans and persists one route for the request, or fails without touching
/// the store.
pub fn generate_route<B: GeocodeBackend>(
    db: &Database,
    geocoder: &Geocoder<B>,
    request: &PlanRequest,
) -> Result<PlannedRoute, PlannerError> {
    let (company, group) = load_company_and_group(db, request.company_id, request.group_id)?;
    reject_past_date(request.date)?;

    if db.read(|store| store.route_exists(company.id, group.id, request.date, request.shift))? {
        return Err(PlannerError::Validation(
            "a route already exists for this group, date and shift".into(),
        ));
    }

    let candidates = db.read(|store| {
        crate::eligibility::eligible_employees(store, &group, request.date, request.shift)
    })?;
    if candidates.is_empty() {
        return Err(PlannerError::NoEligibleEmployees);
    }

    let (destination, destination_coords) =
        resolve_destination(db, geocoder, &company, &request.destination)?;
    let coords = geocode_employees(db, geocoder, &candidates)?;

    let driver = selection::select_driver(
        &candidates,
        request.driver_id,
        &coords,
        destination_coords,
    )?;
    let passengers: Vec<Employee> = candidates
        .iter()
        .filter(|candidate| candidate.id != driver.id)
        .cloned()
        .collect();
    if passengers.is_empty() {
        return Err(PlannerError::NoPassengers);
    }

    let choice = db.read(|store| {
        selection::select_vehicle(
            store,
            &group,
            request.date,
            passengers.len() as u32 + 1,
            request.vehicle_id,
        )
    })??;

    let (seated, overflow, suggestions, status) = match &choice {
        Some(choice) => {
            let usable = choice.vehicle.seat_capacity.saturating_sub(1) as usize;
            let seated: Vec<Employee> = passengers.iter().take(usable).cloned().collect();
            let overflow: Vec<Employee> = passengers.iter().skip(usable).cloned().collect();
            let suggestions = selection::suggest_vehicles(overflow.len() as u32);
            (seated, overflow, suggestions, RouteStatus::Scheduled)
        }
        None => {
            let suggestions = selection::suggest_vehicles(passengers.len() as u32 + 1);
            (Vec::new(), passengers.clone(), suggestions, RouteStatus::Draft)
        }
    };

    let mut trip: Vec<(f64, f64)> = Vec::with_capacity(seated.len() + 2);
    trip.push(coords[&driver.id]);
    for passenger in &seated {
        trip.push(coords[&passenger.id]);
    }
    trip.push(destination_coords);
    let end = trip.len() - 1;

    let matrix = geo::distance_matrix_m(&trip);
    let order = match solver::solve_pickup_order(&matrix, end, PICKUP_TIME_LIMIT) {
        Ok(order) => order,
        Err(err) => {
            db.log_error(None, SOLVER_FAILURE_CONTEXT, &err.to_string(), None);
            return Err(err.into());
        }
    };

    let distance_km = geo::path_distance_km(&trip, &order, end);
    let cost_factor = choice
        .as_ref()
        .map(|choice| choice.vehicle.cost_factor())
        .unwrap_or(1.0);
    let cost = distance_km * cost_factor;

    let trip_riders: Vec<&Employee> =
        std::iter::once(&driver).chain(seated.iter()).collect();

    let result = db.transaction(|store| {
        if store.route_exists(company.id, group.id, request.date, request.shift) {
            return Err(PlannerError::Validation(
                "a route already exists for this group, date and shift".into(),
            ));
        }
        if let Some(choice) = &choice {
            if store.vehicle_has_route(choice.vehicle.id, request.date, request.shift, &[]) {
                return Err(PlannerError::Conflict(
                    "Veículo indisponível por conflito de agenda.".into(),
                ));
            }
        }
        for rider in &trip_riders {
            if store.employee_has_route(rider.id, request.date, request.shift, &[]) {
                return Err(PlannerError::Conflict(
                    "Funcionário já possui rota no mesmo dia e turno.".into(),
                ));
            }
        }

        let route_id = store.insert_route(Route {
            id: 0,
            company_id: company.id,
            group_id: group.id,
            vehicle_id: choice.as_ref().map(|choice| choice.vehicle.id),
            driver_id: Some(driver.id),
            availability_id: choice.as_ref().map(|choice| choice.availability.id),
            destination_id: Some(destination.id),
            date: request.date,
            shift: request.shift,
            status,
            mode: request.mode,
            sequence: 1,
            distance_km: Some(round2(distance_km)),
            cost: Some(round2(cost)),
            notes: Some(ROUTE_NOTES.to_string()),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        })?;

        let mut assignments = Vec::with_capacity(trip_riders.len());
        let driver_row = Assignment {
            id: 0,
            route_id,
            employee_id: driver.id,
            role: AssignmentRole::Driver,
            boarding_order: Some(0),
            boarding_time: None,
            latitude: Some(trip[0].0),
            longitude: Some(trip[0].1),
        };
        store.insert_assignment(driver_row.clone())?;
        assignments.push(driver_row);

        for (position, &stop) in order.iter().enumerate() {
            let passenger = trip_riders[stop];
            let row = Assignment {
                id: 0,
                route_id,
                employee_id: passenger.id,
                role: AssignmentRole::Passenger,
                boarding_order: Some(position as u32 + 1),
                boarding_time: None,
                latitude: Some(trip[stop].0),
                longitude: Some(trip[stop].1),
            };
            store.insert_assignment(row.clone())?;
            assignments.push(row);
        }

        let reason = if choice.is_some() {
            PENDING_CAPACITY_REASON
        } else {
            PENDING_NO_VEHICLE_REASON
        };
        let mut pending_rows = Vec::with_capacity(overflow.len());
        for employee in &overflow {
            let pending_id = store.insert_pending(PendingEmployee {
                id: 0,
                route_id: Some(route_id),
                employee_id: employee.id,
                date: request.date,
                shift: request.shift,
                reason: reason.to_string(),
                group_id: Some(group.id),
            });
            pending_rows.push(store.pending[&pending_id].clone());
        }

        store.insert_generation_log(GenerationLog {
            id: 0,
            route_id,
            generated_at: chrono::Utc::now(),
            employee_count: seated.len() as u32,
            vehicle_id: choice.as_ref().map(|choice| choice.vehicle.id),
            driver_id: Some(driver.id),
            notes: Some(GENERATION_NOTES.to_string()),
        });

        let route = store.routes[&route_id].clone();
        Ok(PlannedRoute {
            route,
            assignments,
            pending: pending_rows,
            suggestions: suggestions.clone(),
        })
    });

    if let Err(PlannerError::Conflict(message)) = &result {
        db.log_error(None, CONFLICT_CONTEXT, message, None);
    }
    if let Ok(planned) = &result {
        tracing::info!(
            route_id = planned.route.id,
            riders = planned.assignments.len(),
            pending = planned.pending.len(),
            "route generated"
        );
    }
    result
}

// ============================================================================
// Recalculation
// ============================================================================

/// Re-solves the pickup ordering of an existing route for its current
/// roster and vehicle, updating distance, cost, boarding orders and stored
/// coordinates.
pub fn recalculate_route<B: GeocodeBackend>(
    db: &Database,
    geocoder: &Geocoder<B>,
    route_id: RouteId,
) -> Result<Route, PlannerError> {
    let route = db
        .read(|store| store.routes.get(&route_id).cloned())?
        .ok_or_else(|| PlannerError::Validation("route not found for recalculation".into()))?;
    let destination_id = route
        .destination_id
        .ok_or_else(|| PlannerError::Validation("route has no destination configured".into()))?;
    let company = db
        .read(|store| store.companies.get(&route.company_id).cloned())?
        .ok_or_else(|| PlannerError::Validation("company not found".into()))?;

    let (_, destination_coords) = resolve_destination(
        db,
        geocoder,
        &company,
        &DestinationSpec::Existing(destination_id),
    )?;

    let assignments = db.read(|store| store.assignments_for(route_id))?;
    if assignments.is_empty() {
        return Err(PlannerError::Validation(
            "route has no assignments to recalculate".into(),
        ));
    }

    let mut riders: Vec<Employee> = db.read(|store| {
        assignments
            .iter()
            .filter_map(|assignment| store.employees.get(&assignment.employee_id).cloned())
            .collect()
    })?;
    if let Some(driver_id) = route.driver_id {
        if !riders.iter().any(|rider| rider.id == driver_id) {
            if let Some(driver) = db.read(|store| store.employees.get(&driver_id).cloned())? {
                riders.push(driver);
            }
        }
    }
    let coords = geocode_employees(db, geocoder, &riders)?;

    let driver = route
        .driver_id
        .and_then(|driver_id| riders.iter().find(|rider| rider.id == driver_id))
        .or_else(|| riders.first())
        .cloned()
        .ok_or_else(|| {
            PlannerError::Validation("driver not found for recalculation".into())
        })?;

    let passengers: Vec<&Employee> = assignments
        .iter()
        .filter(|assignment| assignment.employee_id != driver.id)
        .filter_map(|assignment| riders.iter().find(|rider| rider.id == assignment.employee_id))
        .collect();

    let mut trip: Vec<(f64, f64)> = Vec::with_capacity(passengers.len() + 2);
    trip.push(coords[&driver.id]);
    let mut trip_riders: Vec<&Employee> = vec![&driver];
    for &passenger in &passengers {
        trip.push(coords[&passenger.id]);
        trip_riders.push(passenger);
    }
    trip.push(destination_coords);
    let end = trip.len() - 1;

    let matrix = geo::distance_matrix_m(&trip);
    let order = match solver::solve_pickup_order(&matrix, end, PICKUP_TIME_LIMIT) {
        Ok(order) => order,
        Err(err) => {
            db.log_error(Some(route_id), SOLVER_FAILURE_CONTEXT, &err.to_string(), None);
            return Err(err.into());
        }
    };

    let mut order_map: HashMap<EmployeeId, u32> = HashMap::new();
    order_map.insert(driver.id, 0);
    for (position, &stop) in order.iter().enumerate() {
        order_map.insert(trip_riders[stop].id, position as u32 + 1);
    }

    let distance_km = geo::path_distance_km(&trip, &order, end);
    let cost_factor = route
        .vehicle_id
        .and_then(|vehicle_id| {
            db.read(|store| store.vehicles.get(&vehicle_id).map(|v| v.cost_factor()))
                .ok()
                .flatten()
        })
        .unwrap_or(1.0);

    db.transaction(|store| {
        for assignment in store.assignments.values_mut() {
            if assignment.route_id != route_id {
                continue;
            }
            if let Some(&position) = order_map.get(&assignment.employee_id) {
                assignment.boarding_order = Some(position);
            }
            if let Some(&(lat, lon)) = coords.get(&assignment.employee_id) {
                assignment.latitude = Some(lat);
                assignment.longitude = Some(lon);
            }
        }
        let route = store
            .routes
            .get_mut(&route_id)
            .ok_or_else(|| PlannerError::Repository("route vanished".into()))?;
        route.distance_km = Some(round2(distance_km));
        route.cost = Some(round2(distance_km * cost_factor));
        route.updated_at = chrono::Utc::now();
        Ok(route.clone())
    })
}
