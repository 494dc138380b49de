//! Single-vehicle planning scenarios.

mod fixtures;

use chrono::Days;

use rota_planner::domain::{
    AssignmentRole, CostTier, PlanningMode, RouteStatus, Shift, Tenure,
};
use rota_planner::error::PlannerError;
use rota_planner::geo;
use rota_planner::geocode::GeocodeError;
use rota_planner::planner::{
    generate_route, round2, PlannedRoute, PENDING_CAPACITY_REASON, PENDING_NO_VEHICLE_REASON,
};

use fixtures::{world, BASE_COORDS};

/// Riders on a north-south line heading toward the base in the south.
fn line_coords(index: usize) -> (f64, f64) {
    (-5.70 - 0.05 * index as f64, -35.20)
}

fn assert_dense_boarding(planned: &PlannedRoute) {
    let mut orders: Vec<u32> = planned
        .assignments
        .iter()
        .map(|assignment| assignment.boarding_order.expect("boarding order set"))
        .collect();
    orders.sort_unstable();
    let expected: Vec<u32> = (0..planned.assignments.len() as u32).collect();
    assert_eq!(orders, expected, "boarding orders must be dense from zero");

    let driver_row = planned
        .assignments
        .iter()
        .find(|assignment| assignment.role == AssignmentRole::Driver)
        .expect("driver assignment");
    assert_eq!(driver_row.boarding_order, Some(0));
    assert_eq!(Some(driver_row.employee_id), planned.route.driver_id);
}

/// Recomputes the geodesic length over the persisted boarding order.
fn recorded_distance(planned: &PlannedRoute) -> f64 {
    let mut rows = planned.assignments.clone();
    rows.sort_by_key(|assignment| assignment.boarding_order);
    let mut chain: Vec<(f64, f64)> = rows
        .iter()
        .map(|row| (row.latitude.unwrap(), row.longitude.unwrap()))
        .collect();
    chain.push(BASE_COORDS);
    chain
        .windows(2)
        .map(|pair| geo::distance_km(pair[0], pair[1]))
        .sum()
}

#[test]
fn happy_path_picks_cheap_vehicle_and_best_driver() {
    let world = world();
    let e1 = world.add_rider("Ana", line_coords(0), true);
    let e2 = world.add_rider("Bruno", line_coords(1), false);
    let e3 = world.add_rider("Clara", line_coords(2), false);
    let e4 = world.add_rider("Davi", line_coords(3), true);
    let (v1, _) = world.add_vehicle("AAA-0001", 4, CostTier::Low, Tenure::Fleet, true);
    world.add_vehicle("BBB-0002", 5, CostTier::Medium, Tenure::Fleet, true);

    let planned = generate_route(&world.db, &world.geocoder, &world.plan_request()).unwrap();

    assert_eq!(planned.route.vehicle_id, Some(v1), "low tier wins over capacity");
    assert_eq!(planned.route.status, RouteStatus::Scheduled);
    assert_eq!(planned.route.sequence, 1);
    assert_eq!(planned.route.mode, PlanningMode::Automatic);
    // The northernmost licensed rider sweeps everyone on the way south.
    assert_eq!(planned.route.driver_id, Some(e1));

    assert_eq!(planned.assignments.len(), 4);
    assert_dense_boarding(&planned);
    let passenger_ids: Vec<i64> = planned
        .assignments
        .iter()
        .filter(|row| row.role == AssignmentRole::Passenger)
        .map(|row| row.employee_id)
        .collect();
    assert_eq!(passenger_ids, vec![e2, e3, e4], "line order south-bound");

    assert!(planned.pending.is_empty());
    assert!(planned.suggestions.is_empty());

    let distance = planned.route.distance_km.expect("distance recorded");
    assert!((distance - round2(recorded_distance(&planned))).abs() < 0.011);
    // Low tier: cost factor 1.0.
    assert_eq!(planned.route.cost, planned.route.distance_km);

    let logs = world.db.read(|store| store.generation_logs.len()).unwrap();
    assert_eq!(logs, 1);
}

#[test]
fn overflow_riders_go_to_pending_with_suggestions() {
    let world = world();
    world.add_rider("Ana", line_coords(0), true);
    for (index, name) in ["Bruno", "Clara", "Davi", "Edu", "Fabi"].iter().enumerate() {
        world.add_rider(name, line_coords(index + 1), false);
    }
    let (v1, _) = world.add_vehicle("AAA-0001", 4, CostTier::Low, Tenure::Fleet, true);

    let planned = generate_route(&world.db, &world.geocoder, &world.plan_request()).unwrap();

    assert_eq!(planned.route.vehicle_id, Some(v1));
    assert_eq!(planned.route.status, RouteStatus::Scheduled);
    assert_eq!(planned.assignments.len(), 4, "driver plus three seats");
    assert_eq!(planned.pending.len(), 2);
    for pending in &planned.pending {
        assert_eq!(pending.reason, PENDING_CAPACITY_REASON);
        assert_eq!(pending.route_id, Some(planned.route.id));
    }
    assert_eq!(planned.suggestions.len(), 1);
    assert_eq!(planned.suggestions[0].kind, "hatch");
    assert_eq!(planned.suggestions[0].count, 1);
    assert_eq!(planned.suggestions[0].capacity_each, 4);
    assert_eq!(planned.suggestions[0].passengers_covered, 2);
}

#[test]
fn exact_capacity_leaves_nobody_pending() {
    let world = world();
    world.add_rider("Ana", line_coords(0), true);
    world.add_rider("Bruno", line_coords(1), false);
    world.add_rider("Clara", line_coords(2), false);
    world.add_rider("Davi", line_coords(3), false);
    world.add_vehicle("AAA-0001", 4, CostTier::Low, Tenure::Fleet, true);

    let planned = generate_route(&world.db, &world.geocoder, &world.plan_request()).unwrap();
    assert_eq!(planned.assignments.len(), 4);
    assert!(planned.pending.is_empty());
    assert!(planned.suggestions.is_empty());
}

#[test]
fn no_vehicle_downgrades_to_draft_and_pends_everyone() {
    let world = world();
    world.add_rider("Ana", line_coords(0), true);
    world.add_rider("Bruno", line_coords(1), false);
    world.add_rider("Clara", line_coords(2), false);

    let planned = generate_route(&world.db, &world.geocoder, &world.plan_request()).unwrap();

    assert_eq!(planned.route.status, RouteStatus::Draft);
    assert_eq!(planned.route.vehicle_id, None);
    assert_eq!(planned.assignments.len(), 1, "only the driver rides a draft");
    assert_eq!(planned.pending.len(), 2);
    for pending in &planned.pending {
        assert_eq!(pending.reason, PENDING_NO_VEHICLE_REASON);
    }
    // Suggestions cover every rider plus the driver's seat.
    assert_eq!(planned.suggestions[0].passengers_covered, 3);
}

#[test]
fn past_dates_are_rejected() {
    let world = world();
    world.add_rider("Ana", line_coords(0), true);
    let mut request = world.plan_request();
    request.date = chrono::Local::now().date_naive() - Days::new(7);
    assert!(matches!(
        generate_route(&world.db, &world.geocoder, &request),
        Err(PlannerError::Validation(_))
    ));
}

#[test]
fn empty_eligibility_is_rejected() {
    let world = world();
    world.add_rider("Ana", line_coords(0), true);
    let mut request = world.plan_request();
    request.shift = Shift::Afternoon;
    assert!(matches!(
        generate_route(&world.db, &world.geocoder, &request),
        Err(PlannerError::NoEligibleEmployees)
    ));
}

#[test]
fn lone_driver_is_rejected() {
    let world = world();
    world.add_rider("Ana", line_coords(0), true);
    world.add_vehicle("AAA-0001", 4, CostTier::Low, Tenure::Fleet, true);
    assert!(matches!(
        generate_route(&world.db, &world.geocoder, &world.plan_request()),
        Err(PlannerError::NoPassengers)
    ));
}

#[test]
fn unmapped_address_names_the_employee() {
    let world = world();
    world.add_rider("Ana", line_coords(0), true);
    world.add_rider("Bruno", line_coords(1), false);
    world.add_rider_at("Carlos", None, false);
    world.add_vehicle("AAA-0001", 5, CostTier::Low, Tenure::Fleet, true);

    let result = generate_route(&world.db, &world.geocoder, &world.plan_request());
    match result {
        Err(PlannerError::Geocode(GeocodeError::Employee { name, .. })) => {
            assert_eq!(name, "Carlos");
        }
        other => panic!("expected a geocode error naming the employee, got {other:?}"),
    }
}

#[test]
fn duplicate_slot_is_rejected() {
    let world = world();
    world.add_rider("Ana", line_coords(0), true);
    world.add_rider("Bruno", line_coords(1), false);
    world.add_vehicle("AAA-0001", 4, CostTier::Low, Tenure::Fleet, true);

    generate_route(&world.db, &world.geocoder, &world.plan_request()).unwrap();
    assert!(matches!(
        generate_route(&world.db, &world.geocoder, &world.plan_request()),
        Err(PlannerError::Validation(_))
    ));
}

#[test]
fn manual_driver_must_be_eligible_and_licensed() {
    let world = world();
    world.add_rider("Ana", line_coords(0), true);
    let unlicensed = world.add_rider("Bruno", line_coords(1), false);
    world.add_vehicle("AAA-0001", 4, CostTier::Low, Tenure::Fleet, true);

    let mut request = world.plan_request();
    request.driver_id = Some(unlicensed);
    assert!(matches!(
        generate_route(&world.db, &world.geocoder, &request),
        Err(PlannerError::Validation(_))
    ));
}

#[test]
fn manual_vehicle_outside_the_window_is_rejected() {
    let world = world();
    world.add_rider("Ana", line_coords(0), true);
    world.add_rider("Bruno", line_coords(1), false);
    world.add_vehicle("AAA-0001", 4, CostTier::Low, Tenure::Fleet, true);

    let mut request = world.plan_request();
    request.vehicle_id = Some(999_999);
    assert!(matches!(
        generate_route(&world.db, &world.geocoder, &request),
        Err(PlannerError::Validation(_))
    ));
}
