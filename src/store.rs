//! In-memory repository with transactional semantics.
//!
//! Entities live in per-table maps keyed by id (arena style, foreign keys
//! as plain ids). A [`Database`] wraps the store in a mutex and offers
//! snapshot-rollback transactions: the closure either commits its changes
//! or leaves the store untouched.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};

use crate::domain::{
    AdminLog, Assignment, AvailabilityId, Company, CompanyId, Destination, DestinationId,
    Employee, EmployeeId, ErrorLog, GenerationLog, GeocodeEntry, GroupId, GroupMembership,
    PendingEmployee, Route, RouteGroup, RouteId, RouteStatus, Shift, Unavailability, Vehicle,
    VehicleAvailability, VehicleId, VrpCacheEntry, WorkSchedule,
};
use crate::error::PlannerError;

/// ErrorLog context recorded for booking conflicts.
pub const CONFLICT_CONTEXT: &str = "Conflito de alocação";

#[derive(Debug, Clone, Default)]
pub struct Store {
    next_id: i64,
    pub companies: BTreeMap<CompanyId, Company>,
    pub employees: BTreeMap<EmployeeId, Employee>,
    pub destinations: BTreeMap<DestinationId, Destination>,
    pub groups: BTreeMap<GroupId, RouteGroup>,
    pub memberships: BTreeMap<i64, GroupMembership>,
    pub schedules: BTreeMap<i64, WorkSchedule>,
    pub unavailabilities: BTreeMap<i64, Unavailability>,
    pub vehicles: BTreeMap<VehicleId, Vehicle>,
    pub availabilities: BTreeMap<AvailabilityId, VehicleAvailability>,
    pub routes: BTreeMap<RouteId, Route>,
    pub assignments: BTreeMap<i64, Assignment>,
    pub pending: BTreeMap<i64, PendingEmployee>,
    pub generation_logs: BTreeMap<i64, GenerationLog>,
    pub admin_logs: BTreeMap<i64, AdminLog>,
    pub error_logs: BTreeMap<i64, ErrorLog>,
    pub geocode_cache: BTreeMap<String, GeocodeEntry>,
    pub vrp_cache: BTreeMap<String, VrpCacheEntry>,
}

impl Store {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    // ------------------------------------------------------------------
    // Master-data inserts (used by seeds and tests)
    // ------------------------------------------------------------------

    pub fn add_company(&mut self, mut company: Company) -> CompanyId {
        company.id = self.next_id();
        let id = company.id;
        self.companies.insert(id, company);
        id
    }

    pub fn add_employee(&mut self, mut employee: Employee) -> EmployeeId {
        employee.id = self.next_id();
        let id = employee.id;
        self.employees.insert(id, employee);
        id
    }

    pub fn add_destination(&mut self, mut destination: Destination) -> DestinationId {
        destination.id = self.next_id();
        let id = destination.id;
        self.destinations.insert(id, destination);
        id
    }

    pub fn add_group(&mut self, mut group: RouteGroup) -> GroupId {
        group.id = self.next_id();
        let id = group.id;
        self.groups.insert(id, group);
        id
    }

    pub fn add_membership(&mut self, employee_id: EmployeeId, group_id: GroupId) -> i64 {
        let id = self.next_id();
        self.memberships.insert(
            id,
            GroupMembership {
                id,
                employee_id,
                group_id,
            },
        );
        id
    }

    pub fn add_schedule(&mut self, mut schedule: WorkSchedule) -> i64 {
        schedule.id = self.next_id();
        let id = schedule.id;
        self.schedules.insert(id, schedule);
        id
    }

    pub fn add_unavailability(&mut self, mut unavailability: Unavailability) -> i64 {
        unavailability.id = self.next_id();
        let id = unavailability.id;
        self.unavailabilities.insert(id, unavailability);
        id
    }

    pub fn add_vehicle(&mut self, mut vehicle: Vehicle) -> VehicleId {
        vehicle.id = self.next_id();
        let id = vehicle.id;
        self.vehicles.insert(id, vehicle);
        id
    }

    pub fn add_availability(&mut self, mut availability: VehicleAvailability) -> AvailabilityId {
        availability.id = self.next_id();
        let id = availability.id;
        self.availabilities.insert(id, availability);
        id
    }

    // ------------------------------------------------------------------
    // Planner writes
    // ------------------------------------------------------------------

    /// Inserts a route, enforcing the `(date, shift, group, sequence)` key.
    pub fn insert_route(&mut self, mut route: Route) -> Result<RouteId, PlannerError> {
        let duplicate = self.routes.values().any(|existing| {
            existing.date == route.date
                && existing.shift == route.shift
                && existing.group_id == route.group_id
                && existing.sequence == route.sequence
        });
        if duplicate {
            return Err(PlannerError::Repository(format!(
                "route already exists for group {} on {} {} sequence {}",
                route.group_id,
                route.date,
                route.shift.as_str(),
                route.sequence
            )));
        }
        route.id = self.next_id();
        let now = Utc::now();
        route.created_at = now;
        route.updated_at = now;
        let id = route.id;
        self.routes.insert(id, route);
        Ok(id)
    }

    /// Inserts an assignment, enforcing one row per `(route, employee)`.
    pub fn insert_assignment(&mut self, mut assignment: Assignment) -> Result<i64, PlannerError> {
        let duplicate = self.assignments.values().any(|existing| {
            existing.route_id == assignment.route_id
                && existing.employee_id == assignment.employee_id
        });
        if duplicate {
            return Err(PlannerError::Repository(format!(
                "employee {} is already assigned to route {}",
                assignment.employee_id, assignment.route_id
            )));
        }
        assignment.id = self.next_id();
        let id = assignment.id;
        self.assignments.insert(id, assignment);
        Ok(id)
    }

    pub fn insert_pending(&mut self, mut pending: PendingEmployee) -> i64 {
        pending.id = self.next_id();
        let id = pending.id;
        self.pending.insert(id, pending);
        id
    }

    pub fn insert_generation_log(&mut self, mut log: GenerationLog) -> i64 {
        log.id = self.next_id();
        log.generated_at = Utc::now();
        let id = log.id;
        self.generation_logs.insert(id, log);
        id
    }

    pub fn insert_admin_log(
        &mut self,
        route_id: RouteId,
        actor: &str,
        action: &str,
        details: Option<String>,
    ) -> i64 {
        let id = self.next_id();
        self.admin_logs.insert(
            id,
            AdminLog {
                id,
                route_id,
                actor: actor.to_string(),
                action: action.to_string(),
                details,
                created_at: Utc::now(),
            },
        );
        id
    }

    pub fn insert_error_log(
        &mut self,
        route_id: Option<RouteId>,
        context: &str,
        message: &str,
        details: Option<String>,
    ) -> i64 {
        let id = self.next_id();
        self.error_logs.insert(
            id,
            ErrorLog {
                id,
                route_id,
                logged_at: Utc::now(),
                context: context.to_string(),
                message: message.to_string(),
                details,
            },
        );
        id
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    fn route_counts(&self, route: &Route, date: NaiveDate, shift: Shift, ignore: &[RouteId]) -> bool {
        route.date == date
            && route.shift == shift
            && route.status != RouteStatus::Canceled
            && !ignore.contains(&route.id)
    }

    /// Whether the employee rides or drives any non-canceled route for the
    /// date and shift, apart from the ignored routes.
    pub fn employee_has_route(
        &self,
        employee_id: EmployeeId,
        date: NaiveDate,
        shift: Shift,
        ignore: &[RouteId],
    ) -> bool {
        let assigned = self.assignments.values().any(|assignment| {
            assignment.employee_id == employee_id
                && self
                    .routes
                    .get(&assignment.route_id)
                    .map(|route| self.route_counts(route, date, shift, ignore))
                    .unwrap_or(false)
        });
        if assigned {
            return true;
        }
        self.routes.values().any(|route| {
            route.driver_id == Some(employee_id) && self.route_counts(route, date, shift, ignore)
        })
    }

    /// Whether the vehicle is held by any non-canceled route for the date
    /// and shift, apart from the ignored routes.
    pub fn vehicle_has_route(
        &self,
        vehicle_id: VehicleId,
        date: NaiveDate,
        shift: Shift,
        ignore: &[RouteId],
    ) -> bool {
        self.routes.values().any(|route| {
            route.vehicle_id == Some(vehicle_id) && self.route_counts(route, date, shift, ignore)
        })
    }

    /// Whether any route (any sequence, any status) already exists for the
    /// company, group, date and shift.
    pub fn route_exists(
        &self,
        company_id: CompanyId,
        group_id: GroupId,
        date: NaiveDate,
        shift: Shift,
    ) -> bool {
        self.routes.values().any(|route| {
            route.company_id == company_id
                && route.group_id == group_id
                && route.date == date
                && route.shift == shift
        })
    }

    /// Whether another route of the same group occupies the date and shift.
    pub fn group_slot_taken(
        &self,
        group_id: GroupId,
        date: NaiveDate,
        shift: Shift,
        ignore: RouteId,
    ) -> bool {
        self.routes.values().any(|route| {
            route.id != ignore
                && route.group_id == group_id
                && route.date == date
                && route.shift == shift
        })
    }

    /// Assignments of a route ordered by boarding order (unset last).
    pub fn assignments_for(&self, route_id: RouteId) -> Vec<Assignment> {
        let mut rows: Vec<Assignment> = self
            .assignments
            .values()
            .filter(|assignment| assignment.route_id == route_id)
            .cloned()
            .collect();
        rows.sort_by_key(|assignment| (assignment.boarding_order.unwrap_or(u32::MAX), assignment.id));
        rows
    }

    pub fn pending_for(&self, route_id: RouteId) -> Vec<PendingEmployee> {
        self.pending
            .values()
            .filter(|pending| pending.route_id == Some(route_id))
            .cloned()
            .collect()
    }

    pub fn max_boarding_order(&self, route_id: RouteId) -> Option<u32> {
        self.assignments
            .values()
            .filter(|assignment| assignment.route_id == route_id)
            .filter_map(|assignment| assignment.boarding_order)
            .max()
    }

    pub fn memberships_of_group(&self, group_id: GroupId) -> Vec<&GroupMembership> {
        self.memberships
            .values()
            .filter(|membership| membership.group_id == group_id)
            .collect()
    }

    // ------------------------------------------------------------------
    // Caches
    // ------------------------------------------------------------------

    pub fn geocode_get(&self, normalized: &str) -> Option<(f64, f64)> {
        self.geocode_cache
            .get(normalized)
            .map(|entry| (entry.latitude, entry.longitude))
    }

    pub fn geocode_upsert(&mut self, normalized: &str, latitude: f64, longitude: f64) {
        let now = Utc::now();
        if let Some(entry) = self.geocode_cache.get_mut(normalized) {
            entry.latitude = latitude;
            entry.longitude = longitude;
            entry.updated_at = now;
            return;
        }
        let id = self.next_id();
        self.geocode_cache.insert(
            normalized.to_string(),
            GeocodeEntry {
                id,
                normalized_address: normalized.to_string(),
                latitude,
                longitude,
                created_at: now,
                updated_at: now,
            },
        );
    }

    pub fn vrp_cache_get(&self, context_key: &str) -> Option<&VrpCacheEntry> {
        self.vrp_cache.get(context_key)
    }

    pub fn vrp_cache_upsert(&mut self, context_key: &str, payload: String) {
        let now = Utc::now();
        if let Some(entry) = self.vrp_cache.get_mut(context_key) {
            entry.payload = payload;
            entry.updated_at = now;
            return;
        }
        let id = self.next_id();
        self.vrp_cache.insert(
            context_key.to_string(),
            VrpCacheEntry {
                id,
                context_key: context_key.to_string(),
                payload,
                created_at: now,
                updated_at: now,
            },
        );
    }
}

// ============================================================================
// Database handle
// ============================================================================

/// Shared handle over the store. Cloning shares the same underlying data.
#[derive(Clone, Default)]
pub struct Database {
    inner: Arc<Mutex<Store>>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_store(store: Store) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Runs a read-only closure against the store.
    pub fn read<T>(&self, f: impl FnOnce(&Store) -> T) -> Result<T, PlannerError> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| PlannerError::Repository("store lock poisoned".into()))?;
        Ok(f(&guard))
    }

    /// Runs a closure as one unit of work. On `Err` the store is restored
    /// to its pre-closure snapshot, so partial writes never leak.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&mut Store) -> Result<T, PlannerError>,
    ) -> Result<T, PlannerError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| PlannerError::Repository("store lock poisoned".into()))?;
        let snapshot = guard.clone();
        match f(&mut guard) {
            Ok(value) => Ok(value),
            Err(err) => {
                *guard = snapshot;
                Err(err)
            }
        }
    }

    /// Appends an error log in its own transaction, so it survives the
    /// rollback of the operation that failed. Best effort.
    pub fn log_error(
        &self,
        route_id: Option<RouteId>,
        context: &str,
        message: &str,
        details: Option<String>,
    ) {
        let result = self.transaction(|store| {
            store.insert_error_log(route_id, context, message, details.clone());
            Ok(())
        });
        if let Err(err) = result {
            tracing::warn!(error = %err, "failed to record error log");
        }
    }

    pub fn geocode_lookup(&self, normalized: &str) -> Result<Option<(f64, f64)>, PlannerError> {
        self.read(|store| store.geocode_get(normalized))
    }

    pub fn geocode_store(
        &self,
        normalized: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<(), PlannerError> {
        self.transaction(|store| {
            store.geocode_upsert(normalized, latitude, longitude);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::domain::PlanningMode;

    fn draft_route(group_id: GroupId, sequence: u32) -> Route {
        Route {
            id: 0,
            company_id: 1,
            group_id,
            vehicle_id: None,
            driver_id: None,
            availability_id: None,
            destination_id: None,
            date: NaiveDate::from_ymd_opt(2026, 8, 4).unwrap(),
            shift: Shift::Morning,
            status: RouteStatus::Draft,
            mode: PlanningMode::Automatic,
            sequence,
            distance_km: None,
            cost: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn route_sequence_key_is_unique() {
        let mut store = Store::default();
        store.insert_route(draft_route(7, 1)).unwrap();
        assert!(store.insert_route(draft_route(7, 1)).is_err());
        store.insert_route(draft_route(7, 2)).unwrap();
    }

    #[test]
    fn assignment_unique_per_route_and_employee() {
        let mut store = Store::default();
        let route_id = store.insert_route(draft_route(7, 1)).unwrap();
        let assignment = Assignment {
            id: 0,
            route_id,
            employee_id: 42,
            role: crate::domain::AssignmentRole::Passenger,
            boarding_order: Some(1),
            boarding_time: None,
            latitude: None,
            longitude: None,
        };
        store.insert_assignment(assignment.clone()).unwrap();
        assert!(store.insert_assignment(assignment).is_err());
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let db = Database::new();
        let result: Result<(), PlannerError> = db.transaction(|store| {
            store.insert_route(draft_route(7, 1))?;
            Err(PlannerError::Validation("boom".into()))
        });
        assert!(result.is_err());
        let count = db.read(|store| store.routes.len()).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn canceled_routes_do_not_block_employees() {
        let mut store = Store::default();
        let mut route = draft_route(7, 1);
        route.driver_id = Some(42);
        route.status = RouteStatus::Canceled;
        let date = route.date;
        store.insert_route(route).unwrap();
        assert!(!store.employee_has_route(42, date, Shift::Morning, &[]));
    }

    #[test]
    fn geocode_upsert_is_idempotent() {
        let mut store = Store::default();
        store.geocode_upsert("rua a, 1", -5.0, -35.0);
        store.geocode_upsert("rua a, 1", -5.5, -35.5);
        assert_eq!(store.geocode_cache.len(), 1);
        assert_eq!(store.geocode_get("rua a, 1"), Some((-5.5, -35.5)));
    }
}
