//! Shared test world: an in-memory company with riders, vehicles and
//! deterministic fakes for the external geocoding and routing services.

// Each test binary pulls in this module; not all of them use every helper.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Days, Local, NaiveDate};

use rota_planner::domain::{
    weekday_index, Company, CostTier, Destination, Employee, GroupRegime, PlanningMode,
    RouteGroup, Shift, Tenure, Vehicle, VehicleAvailability, WorkSchedule,
};
use rota_planner::geocode::{normalize_address, GeocodeBackend, GeocodeError, Geocoder};
use rota_planner::matrix::{
    geodesic_matrices, MatrixService, RoutingServiceError, TravelMatrices,
};
use rota_planner::planner::{DestinationSpec, PlanRequest};
use rota_planner::store::Database;

/// Company base in Natal/RN, used as the default destination.
pub const BASE_COORDS: (f64, f64) = (-5.8279, -35.2062);

// ============================================================================
// Service fakes
// ============================================================================

/// Deterministic geocoder: address -> registered coordinates.
#[derive(Clone, Default)]
pub struct FixedGeocode {
    places: Arc<Mutex<HashMap<String, (f64, f64)>>>,
    pub calls: Arc<AtomicUsize>,
}

impl FixedGeocode {
    pub fn register(&self, address: &str, coords: (f64, f64)) {
        self.places
            .lock()
            .unwrap()
            .insert(normalize_address(address), coords);
    }
}

impl GeocodeBackend for FixedGeocode {
    fn lookup(&self, address: &str) -> Result<Option<(f64, f64)>, GeocodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .places
            .lock()
            .unwrap()
            .get(&normalize_address(address))
            .copied())
    }
}

/// Geodesic matrices with a call counter, standing in for OSRM.
#[derive(Clone, Default)]
pub struct CountingMatrix {
    pub calls: Arc<AtomicUsize>,
}

impl MatrixService for CountingMatrix {
    fn matrices(&self, coords: &[(f64, f64)]) -> Result<TravelMatrices, RoutingServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(geodesic_matrices(coords))
    }
}

// ============================================================================
// World builder
// ============================================================================

pub struct World {
    pub db: Database,
    pub backend: FixedGeocode,
    pub geocoder: Geocoder<FixedGeocode>,
    pub company_id: i64,
    pub group_id: i64,
    pub destination_id: i64,
    /// Planning date: the next Tuesday (group weekday 1), never in the past.
    pub date: NaiveDate,
}

/// Next date (today or later) falling on weekday 1 (Tuesday).
pub fn next_tuesday() -> NaiveDate {
    let mut date = Local::now().date_naive();
    while weekday_index(date) != 1 {
        date = date + Days::new(1);
    }
    date
}

/// A company with one route group running on weekdays {1, 2, 3} and one
/// geocoded destination.
pub fn world() -> World {
    let db = Database::new();
    let backend = FixedGeocode::default();
    let geocoder = Geocoder::with_min_interval(backend.clone(), Duration::ZERO);

    let (company_id, group_id, destination_id) = db
        .transaction(|store| {
            let company_id = store.add_company(Company {
                id: 0,
                code: "ACME".into(),
                name: "ACME Transportes".into(),
                base_address: "Av. Salgado Filho, 2000".into(),
                city: "Natal".into(),
                state: "RN".into(),
                zip: "59000-000".into(),
            });
            let group_id = store.add_group(RouteGroup {
                id: 0,
                company_id,
                name: "Turno Manhã".into(),
                regime: GroupRegime::Daily,
                default_weekdays: vec![1, 2, 3],
                description: None,
            });
            let destination_id = store.add_destination(Destination {
                id: 0,
                company_id,
                name: "Sede".into(),
                street: "Av. Salgado Filho".into(),
                number: "2000".into(),
                complement: None,
                neighborhood: "Lagoa Nova".into(),
                city: "Natal".into(),
                state: "RN".into(),
                zip: "59000-000".into(),
                latitude: Some(BASE_COORDS.0),
                longitude: Some(BASE_COORDS.1),
                active: true,
            });
            Ok((company_id, group_id, destination_id))
        })
        .expect("seed world");

    World {
        db,
        backend,
        geocoder,
        company_id,
        group_id,
        destination_id,
        date: next_tuesday(),
    }
}

impl World {
    /// Enrolls an employee in the group with a schedule for the planning
    /// date's weekday and registers the home coordinates with the fake
    /// geocoder. `coords: None` leaves the address unresolvable.
    pub fn add_rider_at(&self, name: &str, coords: Option<(f64, f64)>, can_drive: bool) -> i64 {
        let employee = Employee {
            id: 0,
            company_id: self.company_id,
            full_name: name.into(),
            national_id: format!("cpf-{name}"),
            street: format!("Rua {name}"),
            number: "1".into(),
            complement: None,
            neighborhood: "Centro".into(),
            city: "Natal".into(),
            state: "RN".into(),
            zip: "59000-000".into(),
            licensed: can_drive,
            license_class: can_drive.then(|| "B".into()),
            license_expiry: None,
            apt_to_drive: can_drive,
            active: true,
        };
        if let Some(coords) = coords {
            self.backend.register(&employee.full_address(), coords);
        }
        let weekday = weekday_index(self.date);
        self.db
            .transaction(|store| {
                let employee_id = store.add_employee(employee.clone());
                store.add_membership(employee_id, self.group_id);
                store.add_schedule(WorkSchedule {
                    id: 0,
                    employee_id,
                    weekday,
                    shift: Shift::Morning,
                    available: true,
                    start: None,
                    end: None,
                });
                Ok(employee_id)
            })
            .expect("add rider")
    }

    pub fn add_rider(&self, name: &str, coords: (f64, f64), can_drive: bool) -> i64 {
        self.add_rider_at(name, Some(coords), can_drive)
    }

    /// Registers a vehicle with an availability window around the planning
    /// date. `for_group: false` leaves the availability group-less (the
    /// "any group" semantics of fleet enumeration).
    pub fn add_vehicle(
        &self,
        plate: &str,
        seat_capacity: u32,
        cost_tier: CostTier,
        tenure: Tenure,
        for_group: bool,
    ) -> (i64, i64) {
        let group_id = for_group.then_some(self.group_id);
        let date = self.date;
        let company_id = self.company_id;
        self.db
            .transaction(|store| {
                let vehicle_id = store.add_vehicle(Vehicle {
                    id: 0,
                    company_id,
                    plate: plate.into(),
                    kind: "carro".into(),
                    seat_capacity,
                    fuel_efficiency_km_l: 12.0,
                    cost_tier,
                    active: true,
                });
                let availability_id = store.add_availability(VehicleAvailability {
                    id: 0,
                    vehicle_id,
                    group_id,
                    tenure,
                    period_start: date - Days::new(7),
                    period_end: date + Days::new(30),
                    weekdays: None,
                    monthly_renewal: false,
                    notes: None,
                    active: true,
                });
                Ok((vehicle_id, availability_id))
            })
            .expect("add vehicle")
    }

    /// A second route group in the same company, for conflict scenarios.
    pub fn add_group(&self, name: &str) -> i64 {
        let company_id = self.company_id;
        self.db
            .transaction(|store| {
                Ok(store.add_group(RouteGroup {
                    id: 0,
                    company_id,
                    name: name.into(),
                    regime: GroupRegime::Daily,
                    default_weekdays: vec![],
                    description: None,
                }))
            })
            .expect("add group")
    }

    pub fn plan_request(&self) -> PlanRequest {
        PlanRequest {
            company_id: self.company_id,
            group_id: self.group_id,
            date: self.date,
            shift: Shift::Morning,
            driver_id: None,
            vehicle_id: None,
            destination: DestinationSpec::Existing(self.destination_id),
            mode: PlanningMode::Automatic,
        }
    }
}
