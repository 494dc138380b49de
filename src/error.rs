//! Error taxonomy for planning and edit operations.

use thiserror::Error;

use crate::geocode::GeocodeError;
use crate::matrix::RoutingServiceError;
use crate::selection::VehicleSuggestion;
use crate::solver::SolverError;

/// Top-level error for every public planner and edit operation.
///
/// Conflict and solver failures also leave an `ErrorLog` row behind; the
/// transaction that produced them is rolled back first.
#[derive(Debug, Error)]
pub enum PlannerError {
    /// Bad or mismatched input: unknown entities, wrong ownership, past
    /// dates, incomplete destination addresses, invalid manual picks.
    #[error("{0}")]
    Validation(String),

    #[error("no employees available for the group, date and shift")]
    NoEligibleEmployees,

    #[error("no licensed driver available among the candidates")]
    NoEligibleDriver,

    #[error("no passengers remain besides the selected driver")]
    NoPassengers,

    /// The chosen vehicle (or fleet) cannot seat everyone. Carries the
    /// combinatorial suggestion list for the caller's UI.
    #[error("vehicle capacity insufficient for {required} seats")]
    CapacityInsufficient {
        required: usize,
        suggestions: Vec<VehicleSuggestion>,
    },

    /// Employee or vehicle already booked for the date and shift.
    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Geocode(#[from] GeocodeError),

    #[error(transparent)]
    RoutingService(#[from] RoutingServiceError),

    #[error(transparent)]
    Solver(#[from] SolverError),

    #[error("storage failure: {0}")]
    Repository(String),
}
