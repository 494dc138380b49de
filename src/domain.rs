//! Domain entities for the transport planner.
//!
//! Field layouts mirror the persisted tables; enum wire values are stable
//! pt-BR strings because they participate in the VRP cache key.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

pub type CompanyId = i64;
pub type EmployeeId = i64;
pub type DestinationId = i64;
pub type GroupId = i64;
pub type VehicleId = i64;
pub type AvailabilityId = i64;
pub type RouteId = i64;

/// Weekday index used across schedules and masks (0 = Monday .. 6 = Sunday).
pub fn weekday_index(date: NaiveDate) -> u32 {
    chrono::Datelike::weekday(&date).num_days_from_monday()
}

// ============================================================================
// Enums (stable wire values)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Shift {
    #[serde(rename = "manha")]
    Morning,
    #[serde(rename = "tarde")]
    Afternoon,
    #[serde(rename = "noite")]
    Night,
}

impl Shift {
    pub fn as_str(&self) -> &'static str {
        match self {
            Shift::Morning => "manha",
            Shift::Afternoon => "tarde",
            Shift::Night => "noite",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupRegime {
    #[serde(rename = "diario")]
    Daily,
    #[serde(rename = "embarque")]
    Boarding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostTier {
    #[serde(rename = "baixo")]
    Low,
    #[serde(rename = "medio")]
    Medium,
    #[serde(rename = "alto")]
    High,
}

impl CostTier {
    /// Relative cost multiplier applied to driven kilometers.
    pub fn factor(&self) -> f64 {
        match self {
            CostTier::Low => 1.0,
            CostTier::Medium => 1.2,
            CostTier::High => 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tenure {
    #[serde(rename = "fixo")]
    Fleet,
    #[serde(rename = "aluguel")]
    Rental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnavailabilityKind {
    #[serde(rename = "ferias")]
    Vacation,
    #[serde(rename = "atestado")]
    MedicalLeave,
    #[serde(rename = "home_office")]
    HomeOffice,
    #[serde(rename = "treinamento")]
    Training,
    #[serde(rename = "outros")]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteStatus {
    #[serde(rename = "rascunho")]
    Draft,
    #[serde(rename = "agendada")]
    Scheduled,
    #[serde(rename = "em_andamento")]
    InProgress,
    #[serde(rename = "concluida")]
    Completed,
    #[serde(rename = "cancelada")]
    Canceled,
}

impl RouteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteStatus::Draft => "rascunho",
            RouteStatus::Scheduled => "agendada",
            RouteStatus::InProgress => "em_andamento",
            RouteStatus::Completed => "concluida",
            RouteStatus::Canceled => "cancelada",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanningMode {
    #[serde(rename = "manual")]
    Manual,
    #[serde(rename = "automatico")]
    Automatic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentRole {
    #[serde(rename = "motorista")]
    Driver,
    #[serde(rename = "passageiro")]
    Passenger,
    #[serde(rename = "reserva")]
    Reserve,
}

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Company {
    pub id: CompanyId,
    pub code: String,
    pub name: String,
    pub base_address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Employee {
    pub id: EmployeeId,
    pub company_id: CompanyId,
    pub full_name: String,
    pub national_id: String,
    pub street: String,
    pub number: String,
    pub complement: Option<String>,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub licensed: bool,
    pub license_class: Option<String>,
    pub license_expiry: Option<NaiveDate>,
    pub apt_to_drive: bool,
    pub active: bool,
}

impl Employee {
    /// Concatenated address used as the geocoding query.
    pub fn full_address(&self) -> String {
        join_address(&[
            Some(self.street.as_str()),
            Some(self.number.as_str()),
            self.complement.as_deref(),
            Some(self.neighborhood.as_str()),
            Some(self.city.as_str()),
            Some(self.state.as_str()),
            Some(self.zip.as_str()),
        ])
    }

    /// Whether the employee may be placed behind the wheel.
    pub fn can_drive(&self) -> bool {
        self.apt_to_drive && self.licensed
    }

    /// Display name with an id fallback for log and error text.
    pub fn display_name(&self) -> String {
        let trimmed = self.full_name.trim();
        if trimmed.is_empty() {
            format!("ID {}", self.id)
        } else {
            trimmed.to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
    pub id: DestinationId,
    pub company_id: CompanyId,
    pub name: String,
    pub street: String,
    pub number: String,
    pub complement: Option<String>,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub active: bool,
}

impl Destination {
    pub fn full_address(&self) -> String {
        let city_state = format!("{} - {}", self.city, self.state);
        join_address(&[
            Some(self.street.as_str()),
            Some(self.number.as_str()),
            self.complement.as_deref(),
            Some(self.neighborhood.as_str()),
            Some(city_state.as_str()),
            Some(self.zip.as_str()),
            Some("Brasil"),
        ])
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteGroup {
    pub id: GroupId,
    pub company_id: CompanyId,
    pub name: String,
    pub regime: GroupRegime,
    /// Weekdays the group normally runs; empty means every day.
    pub default_weekdays: Vec<u32>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupMembership {
    pub id: i64,
    pub employee_id: EmployeeId,
    pub group_id: GroupId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkSchedule {
    pub id: i64,
    pub employee_id: EmployeeId,
    pub weekday: u32,
    pub shift: Shift,
    pub available: bool,
    pub start: Option<NaiveTime>,
    pub end: Option<NaiveTime>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unavailability {
    pub id: i64,
    pub employee_id: EmployeeId,
    pub kind: UnavailabilityKind,
    pub reason: Option<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Unavailability {
    pub fn active_on(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vehicle {
    pub id: VehicleId,
    pub company_id: CompanyId,
    pub plate: String,
    pub kind: String,
    pub seat_capacity: u32,
    pub fuel_efficiency_km_l: f64,
    pub cost_tier: CostTier,
    pub active: bool,
}

impl Vehicle {
    pub fn cost_factor(&self) -> f64 {
        self.cost_tier.factor()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleAvailability {
    pub id: AvailabilityId,
    pub vehicle_id: VehicleId,
    /// `None` means the vehicle may serve any group.
    pub group_id: Option<GroupId>,
    pub tenure: Tenure,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    /// Comma-separated weekday indexes, e.g. "1,2,3". Empty means all days.
    pub weekdays: Option<String>,
    pub monthly_renewal: bool,
    pub notes: Option<String>,
    pub active: bool,
}

impl VehicleAvailability {
    pub fn weekday_set(&self) -> BTreeSet<u32> {
        self.weekdays
            .as_deref()
            .unwrap_or("")
            .split(',')
            .filter_map(|part| part.trim().parse().ok())
            .collect()
    }

    /// Whether this window admits the given calendar date.
    pub fn covers(&self, date: NaiveDate) -> bool {
        if !self.active || date < self.period_start || date > self.period_end {
            return false;
        }
        let days = self.weekday_set();
        days.is_empty() || days.contains(&weekday_index(date))
    }

    pub fn is_rental(&self) -> bool {
        self.tenure == Tenure::Rental
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub id: RouteId,
    pub company_id: CompanyId,
    pub group_id: GroupId,
    pub vehicle_id: Option<VehicleId>,
    pub driver_id: Option<EmployeeId>,
    pub availability_id: Option<AvailabilityId>,
    pub destination_id: Option<DestinationId>,
    pub date: NaiveDate,
    pub shift: Shift,
    pub status: RouteStatus,
    pub mode: PlanningMode,
    pub sequence: u32,
    pub distance_km: Option<f64>,
    pub cost: Option<f64>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub id: i64,
    pub route_id: RouteId,
    pub employee_id: EmployeeId,
    pub role: AssignmentRole,
    pub boarding_order: Option<u32>,
    pub boarding_time: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingEmployee {
    pub id: i64,
    pub route_id: Option<RouteId>,
    pub employee_id: EmployeeId,
    pub date: NaiveDate,
    pub shift: Shift,
    pub reason: String,
    pub group_id: Option<GroupId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationLog {
    pub id: i64,
    pub route_id: RouteId,
    pub generated_at: DateTime<Utc>,
    pub employee_count: u32,
    pub vehicle_id: Option<VehicleId>,
    pub driver_id: Option<EmployeeId>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdminLog {
    pub id: i64,
    pub route_id: RouteId,
    pub actor: String,
    pub action: String,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorLog {
    pub id: i64,
    pub route_id: Option<RouteId>,
    pub logged_at: DateTime<Utc>,
    pub context: String,
    pub message: String,
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeEntry {
    pub id: i64,
    pub normalized_address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VrpCacheEntry {
    pub id: i64,
    pub context_key: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn join_address(parts: &[Option<&str>]) -> String {
    parts
        .iter()
        .filter_map(|part| *part)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}
