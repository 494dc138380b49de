//! Route optimization: pickup ordering and capacitated vehicle routing.
//!
//! Two entry points, both over integer distance matrices:
//!
//! - [`solve_pickup_order`]: traveling-salesman ordering with a fixed start
//!   (node 0) and a fixed end node, for a single vehicle.
//! - [`solve_vrp`]: capacitated multi-vehicle routing out of a shared depot
//!   (node 0) with unit demand per stop and optional drops at a fixed
//!   penalty.
//!
//! Both use greedy construction followed by local search (2-opt, relocate,
//! swap, reinsertion) bounded by a wall-clock limit. Small instances
//! converge long before the limit; the limit exists to bound pathological
//! ones.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Penalty for leaving a stop unserved; must dwarf any realistic distance.
pub const DEFAULT_DROP_PENALTY: i64 = 10_000_000;

/// Time limit for single-vehicle pickup ordering.
pub const PICKUP_TIME_LIMIT: Duration = Duration::from_secs(5);

/// Time limit for the multi-vehicle solve.
pub const VRP_TIME_LIMIT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolverError {
    #[error("invalid solver input: {0}")]
    InvalidInput(String),
    #[error("no feasible solution found within the time limit")]
    NoSolution,
}

/// Result of a multi-vehicle solve. `vehicle_routes[v]` lists the matrix
/// node indexes visited by vehicle `v`, in order, excluding the depot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VrpSolution {
    pub vehicle_routes: Vec<Vec<usize>>,
    pub dropped: Vec<usize>,
    pub total_distance: i64,
}

fn check_square(matrix: &[Vec<i64>]) -> Result<(), SolverError> {
    let n = matrix.len();
    if matrix.iter().any(|row| row.len() != n) {
        return Err(SolverError::InvalidInput(
            "distance matrix is not square".into(),
        ));
    }
    Ok(())
}

// ============================================================================
// Pickup ordering (TSP with fixed start and end)
// ============================================================================

/// Orders the intermediate stops of `start -> stops... -> end`.
///
/// Node 0 is the fixed start and `end` the fixed final node; every other
/// index is an intermediate stop. Returns the stop indexes in visit order.
pub fn solve_pickup_order(
    matrix: &[Vec<i64>],
    end: usize,
    time_limit: Duration,
) -> Result<Vec<usize>, SolverError> {
    check_square(matrix)?;
    let n = matrix.len();
    if end == 0 || end >= n {
        return Err(SolverError::InvalidInput(format!(
            "end node {end} out of range for {n} nodes"
        )));
    }
    if n <= 2 {
        return Ok(Vec::new());
    }

    let deadline = Instant::now() + time_limit;

    // Nearest-neighbor construction from the start node.
    let mut remaining: BTreeSet<usize> = (1..n).filter(|&i| i != end).collect();
    let mut order = Vec::with_capacity(remaining.len());
    let mut current = 0usize;
    while let Some(&next) = remaining.iter().min_by_key(|&&j| (matrix[current][j], j)) {
        remaining.remove(&next);
        order.push(next);
        current = next;
    }

    while two_opt_open(matrix, &mut order, end) {
        if Instant::now() >= deadline {
            break;
        }
    }

    Ok(order)
}

fn open_path_cost(matrix: &[Vec<i64>], order: &[usize], end: usize) -> i64 {
    let mut cost = 0;
    let mut current = 0usize;
    for &node in order {
        cost += matrix[current][node];
        current = node;
    }
    cost + matrix[current][end]
}

/// One first-improvement 2-opt pass over an open path. Returns true when a
/// segment reversal reduced the cost.
fn two_opt_open(matrix: &[Vec<i64>], order: &mut [usize], end: usize) -> bool {
    let k = order.len();
    if k < 2 {
        return false;
    }
    let current_cost = open_path_cost(matrix, order, end);
    for i in 0..k - 1 {
        for j in i + 1..k {
            order[i..=j].reverse();
            if open_path_cost(matrix, order, end) < current_cost {
                return true;
            }
            order[i..=j].reverse();
        }
    }
    false
}

// ============================================================================
// Capacitated VRP with drops
// ============================================================================

/// Solves a capacitated VRP out of depot node 0 with unit demand per stop.
///
/// `capacities[v]` is the number of stops vehicle `v` may serve. Stops the
/// fleet cannot (or should not, given `drop_penalty`) serve are reported in
/// `dropped`.
pub fn solve_vrp(
    matrix: &[Vec<i64>],
    capacities: &[i64],
    drop_penalty: i64,
    time_limit: Duration,
) -> Result<VrpSolution, SolverError> {
    check_square(matrix)?;
    if matrix.is_empty() {
        return Err(SolverError::InvalidInput("empty distance matrix".into()));
    }
    if capacities.is_empty() {
        return Err(SolverError::InvalidInput("no vehicles".into()));
    }

    let deadline = Instant::now() + time_limit;
    let capacities: Vec<usize> = capacities.iter().map(|&c| c.max(1) as usize).collect();

    // Greedy seeding: fill each vehicle with its nearest remaining stops.
    let mut remaining: BTreeSet<usize> = (1..matrix.len()).collect();
    let mut routes: Vec<Vec<usize>> = Vec::with_capacity(capacities.len());
    for &capacity in &capacities {
        let mut route = Vec::new();
        let mut current = 0usize;
        while route.len() < capacity {
            let Some(&next) = remaining.iter().min_by_key(|&&j| (matrix[current][j], j)) else {
                break;
            };
            remaining.remove(&next);
            route.push(next);
            current = next;
        }
        routes.push(route);
    }
    let mut dropped: Vec<usize> = remaining.into_iter().collect();

    loop {
        let mut improved = false;

        improved |= reinsert_dropped(matrix, &mut routes, &capacities, &mut dropped, drop_penalty);
        for route in routes.iter_mut() {
            improved |= two_opt_closed(matrix, route);
        }
        improved |= relocate_between_routes(matrix, &mut routes, &capacities);
        improved |= swap_between_routes(matrix, &mut routes);

        if !improved || Instant::now() >= deadline {
            break;
        }
    }

    dropped.sort_unstable();
    let total_distance = routes
        .iter()
        .map(|route| closed_route_cost(matrix, route))
        .sum();

    Ok(VrpSolution {
        vehicle_routes: routes,
        dropped,
        total_distance,
    })
}

/// Round-trip cost depot -> stops... -> depot.
pub fn closed_route_cost(matrix: &[Vec<i64>], route: &[usize]) -> i64 {
    let mut cost = 0;
    let mut current = 0usize;
    for &node in route {
        cost += matrix[current][node];
        current = node;
    }
    cost + matrix[current][0]
}

/// Moves dropped stops back into routes with spare capacity, cheapest
/// insertion first. An insertion is only taken when its detour is cheaper
/// than paying the drop penalty.
fn reinsert_dropped(
    matrix: &[Vec<i64>],
    routes: &mut [Vec<usize>],
    capacities: &[usize],
    dropped: &mut Vec<usize>,
    drop_penalty: i64,
) -> bool {
    let mut improved = false;
    let mut index = 0;
    while index < dropped.len() {
        let node = dropped[index];
        let mut best: Option<(usize, usize, i64)> = None;
        for (route_index, route) in routes.iter().enumerate() {
            if route.len() >= capacities[route_index] {
                continue;
            }
            for position in 0..=route.len() {
                let delta = insertion_delta(matrix, route, position, node);
                if delta >= drop_penalty {
                    continue;
                }
                if best.map(|(_, _, cost)| delta < cost).unwrap_or(true) {
                    best = Some((route_index, position, delta));
                }
            }
        }
        if let Some((route_index, position, _)) = best {
            routes[route_index].insert(position, node);
            dropped.remove(index);
            improved = true;
        } else {
            index += 1;
        }
    }
    improved
}

fn insertion_delta(matrix: &[Vec<i64>], route: &[usize], position: usize, node: usize) -> i64 {
    let before = if position == 0 { 0 } else { route[position - 1] };
    let after = if position == route.len() { 0 } else { route[position] };
    matrix[before][node] + matrix[node][after] - matrix[before][after]
}

/// First-improvement 2-opt over a closed (depot round-trip) route.
fn two_opt_closed(matrix: &[Vec<i64>], route: &mut [usize]) -> bool {
    let m = route.len();
    if m < 3 {
        return false;
    }
    let current_cost = closed_route_cost(matrix, route);
    for i in 0..m - 1 {
        for j in i + 1..m {
            route[i..=j].reverse();
            if closed_route_cost(matrix, route) < current_cost {
                return true;
            }
            route[i..=j].reverse();
        }
    }
    false
}

/// Moves one stop to another route with spare capacity when the combined
/// cost drops. First improvement.
fn relocate_between_routes(
    matrix: &[Vec<i64>],
    routes: &mut [Vec<usize>],
    capacities: &[usize],
) -> bool {
    for from_index in 0..routes.len() {
        for stop_index in 0..routes[from_index].len() {
            let node = routes[from_index][stop_index];
            let from_cost = closed_route_cost(matrix, &routes[from_index]);
            let mut from_candidate = routes[from_index].clone();
            from_candidate.remove(stop_index);
            let from_new_cost = closed_route_cost(matrix, &from_candidate);

            for to_index in 0..routes.len() {
                if to_index == from_index {
                    continue;
                }
                if routes[to_index].len() >= capacities[to_index] {
                    continue;
                }
                for position in 0..=routes[to_index].len() {
                    let delta = insertion_delta(matrix, &routes[to_index], position, node);
                    if from_new_cost + delta < from_cost {
                        routes[from_index].remove(stop_index);
                        routes[to_index].insert(position, node);
                        return true;
                    }
                }
            }
        }
    }
    false
}

/// Exchanges a pair of stops between two routes when it lowers total cost.
fn swap_between_routes(matrix: &[Vec<i64>], routes: &mut [Vec<usize>]) -> bool {
    for a_index in 0..routes.len() {
        for b_index in a_index + 1..routes.len() {
            let base_cost = closed_route_cost(matrix, &routes[a_index])
                + closed_route_cost(matrix, &routes[b_index]);
            for a_stop in 0..routes[a_index].len() {
                for b_stop in 0..routes[b_index].len() {
                    let mut a_candidate = routes[a_index].clone();
                    let mut b_candidate = routes[b_index].clone();
                    std::mem::swap(&mut a_candidate[a_stop], &mut b_candidate[b_stop]);
                    let candidate_cost = closed_route_cost(matrix, &a_candidate)
                        + closed_route_cost(matrix, &b_candidate);
                    if candidate_cost < base_cost {
                        routes[a_index] = a_candidate;
                        routes[b_index] = b_candidate;
                        return true;
                    }
                }
            }
        }
    }
    false
}
