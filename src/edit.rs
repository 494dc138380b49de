//! Manual edit operations over persisted routes.
//!
//! Every operation validates, runs as one unit of work and records an
//! AdminLog row. Booking conflicts roll the edit back, leave an ErrorLog
//! row behind and surface as [`PlannerError::Conflict`].

use chrono::NaiveDate;

use crate::domain::{
    Assignment, AssignmentRole, AvailabilityId, EmployeeId, Route, RouteId, RouteStatus, Shift,
    VehicleId,
};
use crate::error::PlannerError;
use crate::geocode::{GeocodeBackend, Geocoder};
use crate::planner::{self, DestinationSpec};
use crate::store::{Database, CONFLICT_CONTEXT, Store};

fn load_route(store: &Store, route_id: RouteId) -> Result<Route, PlannerError> {
    store
        .routes
        .get(&route_id)
        .cloned()
        .ok_or_else(|| PlannerError::Validation("route not found".into()))
}

fn log_conflict(db: &Database, route_id: RouteId, message: &str, actor: &str) {
    db.log_error(
        Some(route_id),
        CONFLICT_CONTEXT,
        message,
        Some(format!("Usuário: {actor}")),
    );
}

/// Assigns or clears the route's driver.
pub fn set_driver(
    db: &Database,
    route_id: RouteId,
    driver_id: Option<EmployeeId>,
    actor: &str,
) -> Result<Route, PlannerError> {
    let result = db.transaction(|store| {
        let route = load_route(store, route_id)?;

        if let Some(driver_id) = driver_id {
            let driver = store
                .employees
                .get(&driver_id)
                .filter(|driver| driver.company_id == route.company_id)
                .ok_or_else(|| {
                    PlannerError::Validation("driver does not belong to the route's company".into())
                })?;
            if !driver.can_drive() {
                return Err(PlannerError::Validation(
                    "employee is not licensed to drive".into(),
                ));
            }
            if store.employee_has_route(driver_id, route.date, route.shift, &[route.id]) {
                return Err(PlannerError::Conflict(
                    "Motorista já está alocado em outra rota neste horário.".into(),
                ));
            }
        }

        let row = store.routes.get_mut(&route_id).expect("route just loaded");
        row.driver_id = driver_id;
        row.updated_at = chrono::Utc::now();
        let updated = row.clone();

        let details = match driver_id {
            Some(id) => format!("Motorista definido como {id}"),
            None => "Motorista definido como automático".to_string(),
        };
        store.insert_admin_log(route_id, actor, "Atualização de motorista", Some(details));
        Ok(updated)
    });

    if let Err(PlannerError::Conflict(message)) = &result {
        log_conflict(db, route_id, message, actor);
    }
    result
}

/// Assigns or clears the route's vehicle and availability reference.
pub fn set_vehicle(
    db: &Database,
    route_id: RouteId,
    vehicle_id: Option<VehicleId>,
    availability_id: Option<AvailabilityId>,
    actor: &str,
) -> Result<Route, PlannerError> {
    let result = db.transaction(|store| {
        let route = load_route(store, route_id)?;

        if let Some(vehicle_id) = vehicle_id {
            let vehicle = store
                .vehicles
                .get(&vehicle_id)
                .filter(|vehicle| vehicle.company_id == route.company_id)
                .ok_or_else(|| {
                    PlannerError::Validation(
                        "vehicle does not belong to the route's company".into(),
                    )
                })?;
            if store.vehicle_has_route(vehicle.id, route.date, route.shift, &[route.id]) {
                return Err(PlannerError::Conflict(
                    "Veículo indisponível por conflito de agenda.".into(),
                ));
            }
        }
        if let Some(availability_id) = availability_id {
            let linked = store
                .availabilities
                .get(&availability_id)
                .map(|availability| availability.group_id == Some(route.group_id))
                .unwrap_or(false);
            if !linked {
                return Err(PlannerError::Validation(
                    "availability is not linked to the route's group".into(),
                ));
            }
        }

        let row = store.routes.get_mut(&route_id).expect("route just loaded");
        row.vehicle_id = vehicle_id;
        row.availability_id = availability_id;
        row.updated_at = chrono::Utc::now();
        let updated = row.clone();

        let details = match vehicle_id {
            Some(id) => format!("Veículo definido como {id}"),
            None => "Veículo definido como automático".to_string(),
        };
        store.insert_admin_log(route_id, actor, "Atualização de veículo", Some(details));
        Ok(updated)
    });

    if let Err(PlannerError::Conflict(message)) = &result {
        log_conflict(db, route_id, message, actor);
    }
    result
}

/// Points the route at an existing destination or one created inline.
pub fn set_destination<B: GeocodeBackend>(
    db: &Database,
    geocoder: &Geocoder<B>,
    route_id: RouteId,
    spec: &DestinationSpec,
    actor: &str,
) -> Result<Route, PlannerError> {
    let route = db.read(|store| load_route(store, route_id))??;
    let company = db
        .read(|store| store.companies.get(&route.company_id).cloned())?
        .ok_or_else(|| PlannerError::Validation("company not found".into()))?;

    if let DestinationSpec::New(address) = spec {
        if address.name.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Err(PlannerError::Validation(
                "provide a valid destination id or a name and every field for the new destination"
                    .into(),
            ));
        }
    }
    let (destination, _) = planner::resolve_destination(db, geocoder, &company, spec)?;

    db.transaction(|store| {
        let row = store
            .routes
            .get_mut(&route_id)
            .ok_or_else(|| PlannerError::Validation("route not found".into()))?;
        row.destination_id = Some(destination.id);
        row.updated_at = chrono::Utc::now();
        let updated = row.clone();
        store.insert_admin_log(
            route_id,
            actor,
            "Atualização de destino",
            Some(format!("Destino alterado para {}", destination.name)),
        );
        Ok(updated)
    })
}

/// Moves the route to another date and shift.
pub fn set_schedule(
    db: &Database,
    route_id: RouteId,
    date: NaiveDate,
    shift: Shift,
    actor: &str,
) -> Result<Route, PlannerError> {
    db.transaction(|store| {
        let route = load_route(store, route_id)?;
        if store.group_slot_taken(route.group_id, date, shift, route.id) {
            return Err(PlannerError::Validation(
                "a route already exists for the group on the given date and shift".into(),
            ));
        }
        let row = store.routes.get_mut(&route_id).expect("route just loaded");
        row.date = date;
        row.shift = shift;
        row.updated_at = chrono::Utc::now();
        let updated = row.clone();
        store.insert_admin_log(
            route_id,
            actor,
            "Atualização de data/turno",
            Some(format!("Atualizado para {} - {}", date, shift.as_str())),
        );
        Ok(updated)
    })
}

/// Sets the route status. Transitions are free; no lifecycle is enforced.
pub fn set_status(
    db: &Database,
    route_id: RouteId,
    status: RouteStatus,
    actor: &str,
) -> Result<Route, PlannerError> {
    db.transaction(|store| {
        load_route(store, route_id)?;
        let row = store.routes.get_mut(&route_id).expect("route just loaded");
        row.status = status;
        row.updated_at = chrono::Utc::now();
        let updated = row.clone();
        store.insert_admin_log(
            route_id,
            actor,
            "Atualização de status",
            Some(format!("Status alterado para {}", status.as_str())),
        );
        Ok(updated)
    })
}

/// One row of a passenger replacement request.
#[derive(Debug, Clone)]
pub struct AssignmentDraft {
    pub employee_id: EmployeeId,
    pub role: AssignmentRole,
    pub boarding_order: Option<u32>,
}

/// Replaces the route's assignments wholesale. Ordering is taken from the
/// drafts (falling back to list position); the pickup ordering is NOT
/// re-solved — callers recalculate explicitly when they want fresh metrics.
pub fn replace_passengers<B: GeocodeBackend>(
    db: &Database,
    geocoder: &Geocoder<B>,
    route_id: RouteId,
    drafts: &[AssignmentDraft],
    actor: &str,
) -> Result<Route, PlannerError> {
    if drafts.is_empty() {
        return Err(PlannerError::Validation(
            "at least one assignment is required".into(),
        ));
    }

    let route = db.read(|store| load_route(store, route_id))??;

    // Geocoding happens outside the transaction; failures leave the
    // coordinates unset rather than failing the edit.
    let mut coords = std::collections::HashMap::new();
    let employees = db.read(|store| {
        drafts
            .iter()
            .filter_map(|draft| store.employees.get(&draft.employee_id).cloned())
            .collect::<Vec<_>>()
    })?;
    for employee in &employees {
        if let Ok(point) = geocoder.resolve(db, &employee.full_address()) {
            coords.insert(employee.id, point);
        }
    }

    let result = db.transaction(|store| {
        let mut seen = std::collections::BTreeSet::new();
        for draft in drafts {
            let employee = store
                .employees
                .get(&draft.employee_id)
                .filter(|employee| employee.company_id == route.company_id)
                .ok_or_else(|| {
                    PlannerError::Validation(
                        "not every employee belongs to the route's company".into(),
                    )
                })?;
            if !seen.insert(employee.id) {
                return Err(PlannerError::Validation(
                    "employee listed more than once for the same route".into(),
                ));
            }
            if draft.role == AssignmentRole::Driver && route.driver_id != Some(employee.id) {
                return Err(PlannerError::Validation(
                    "driver assignment must match the route's driver".into(),
                ));
            }
            if store.employee_has_route(employee.id, route.date, route.shift, &[route.id]) {
                return Err(PlannerError::Conflict(format!(
                    "Funcionário já possui rota no turno {} para esta data.",
                    route.shift.as_str()
                )));
            }
        }

        store
            .assignments
            .retain(|_, assignment| assignment.route_id != route_id);
        for (index, draft) in drafts.iter().enumerate() {
            let point = coords.get(&draft.employee_id);
            store.insert_assignment(Assignment {
                id: 0,
                route_id,
                employee_id: draft.employee_id,
                role: draft.role,
                boarding_order: Some(draft.boarding_order.unwrap_or(index as u32)),
                boarding_time: None,
                latitude: point.map(|p| p.0),
                longitude: point.map(|p| p.1),
            })?;
        }

        let row = store.routes.get_mut(&route_id).expect("route just loaded");
        row.updated_at = chrono::Utc::now();
        let updated = row.clone();
        store.insert_admin_log(
            route_id,
            actor,
            "Atualização de funcionários",
            Some(format!("{} atribuições atualizadas", drafts.len())),
        );
        Ok(updated)
    });

    if let Err(PlannerError::Conflict(message)) = &result {
        log_conflict(db, route_id, message, actor);
    }
    result
}

/// Moves employees from one route to another of the same date and shift,
/// re-sequencing them after the target's current boarding orders.
pub fn move_passengers(
    db: &Database,
    source_route_id: RouteId,
    target_route_id: RouteId,
    employee_ids: &[EmployeeId],
    actor: &str,
) -> Result<(Route, Route), PlannerError> {
    let result = db.transaction(|store| {
        let source = load_route(store, source_route_id)?;
        let target = load_route(store, target_route_id)?;
        if source.date != target.date || source.shift != target.shift {
            return Err(PlannerError::Validation(
                "moves are only allowed between routes of the same date and shift".into(),
            ));
        }

        let moved: Vec<Assignment> = store
            .assignments
            .values()
            .filter(|assignment| {
                assignment.route_id == source.id && employee_ids.contains(&assignment.employee_id)
            })
            .cloned()
            .collect();
        if moved.is_empty() {
            return Err(PlannerError::Validation(
                "no employees found to move".into(),
            ));
        }

        for assignment in &moved {
            if store.employee_has_route(
                assignment.employee_id,
                target.date,
                target.shift,
                &[source.id, target.id],
            ) {
                return Err(PlannerError::Conflict(
                    "Funcionário já possui rota no turno selecionado.".into(),
                ));
            }
        }

        let moved_ids: Vec<i64> = moved.iter().map(|assignment| assignment.id).collect();
        store
            .assignments
            .retain(|id, _| !moved_ids.contains(id));

        let start = store.max_boarding_order(target.id).unwrap_or(0);
        for (offset, assignment) in moved.iter().enumerate() {
            store.insert_assignment(Assignment {
                id: 0,
                route_id: target.id,
                employee_id: assignment.employee_id,
                role: assignment.role,
                boarding_order: Some(start + offset as u32 + 1),
                boarding_time: assignment.boarding_time.clone(),
                latitude: assignment.latitude,
                longitude: assignment.longitude,
            })?;
        }

        store.insert_admin_log(
            source.id,
            actor,
            "Remanejamento de funcionários",
            Some(format!("Funcionários movidos para rota #{}", target.id)),
        );
        store.insert_admin_log(
            target.id,
            actor,
            "Remanejamento de funcionários",
            Some(format!("Funcionários recebidos da rota #{}", source.id)),
        );

        let source = store.routes[&source.id].clone();
        let target = store.routes[&target.id].clone();
        Ok((source, target))
    });

    if let Err(PlannerError::Conflict(message)) = &result {
        log_conflict(db, target_route_id, message, actor);
    }
    result
}

/// Re-solves the pickup ordering of the route and records the action.
pub fn recalculate<B: GeocodeBackend>(
    db: &Database,
    geocoder: &Geocoder<B>,
    route_id: RouteId,
    reason: Option<String>,
    actor: &str,
) -> Result<Route, PlannerError> {
    let route = planner::recalculate_route(db, geocoder, route_id)?;
    db.transaction(|store| {
        store.insert_admin_log(
            route_id,
            actor,
            "Recalcular rota",
            Some(reason.clone().unwrap_or_else(|| "Recalculo manual solicitado.".to_string())),
        );
        Ok(())
    })?;
    Ok(route)
}
