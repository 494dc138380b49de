//! Eligibility filter: who may ride for a group on a given date and shift.

use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::domain::{weekday_index, Employee, RouteGroup, Shift};
use crate::store::Store;

/// Employees of the group who are active, scheduled for the weekday and
/// shift, not unavailable on the date and not already booked. Sorted by id.
pub fn eligible_employees(
    store: &Store,
    group: &RouteGroup,
    date: NaiveDate,
    shift: Shift,
) -> Vec<Employee> {
    let weekday = weekday_index(date);
    if !group.default_weekdays.is_empty() && !group.default_weekdays.contains(&weekday) {
        return Vec::new();
    }

    let member_ids: BTreeSet<i64> = store
        .memberships_of_group(group.id)
        .into_iter()
        .map(|membership| membership.employee_id)
        .collect();

    member_ids
        .into_iter()
        .filter_map(|employee_id| store.employees.get(&employee_id))
        .filter(|employee| employee.active)
        .filter(|employee| {
            store.schedules.values().any(|schedule| {
                schedule.employee_id == employee.id
                    && schedule.weekday == weekday
                    && schedule.shift == shift
                    && schedule.available
            })
        })
        .filter(|employee| {
            !store.unavailabilities.values().any(|unavailability| {
                unavailability.employee_id == employee.id && unavailability.active_on(date)
            })
        })
        .filter(|employee| !store.employee_has_route(employee.id, date, shift, &[]))
        .cloned()
        .collect()
}
