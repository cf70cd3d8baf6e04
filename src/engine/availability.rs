use std::collections::HashSet;

use crate::model::*;

/// Slot numbers in `1..=SLOTS_PER_DAY` not present in `booked`, ascending.
pub fn free_slots(booked: &[u8]) -> Vec<u8> {
    (1..=SLOTS_PER_DAY).filter(|n| !booked.contains(n)).collect()
}

/// Free slots for one stylist-day, or `None` when the stylist is on leave.
/// A day with no recorded state is entirely free.
pub fn day_availability(ds: Option<&DayState>) -> Option<Vec<u8>> {
    match ds {
        Some(ds) if ds.on_leave() => None,
        Some(ds) => Some(free_slots(&ds.booked_slots())),
        None => Some(free_slots(&[])),
    }
}

/// Stylists not on leave, sorted by name then id. Slot exhaustion is not considered.
pub fn available_stylists(stylists: &[User], on_leave: &HashSet<ObjectId>) -> Vec<User> {
    let mut free: Vec<User> = stylists
        .iter()
        .filter(|u| u.role == Role::Stylist && !on_leave.contains(&u.id))
        .cloned()
        .collect();
    sort_users(&mut free);
    free
}

pub(crate) fn sort_users(users: &mut [User]) {
    users.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
}

pub(crate) fn sort_services(services: &mut [Service]) {
    services.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
}

/// Newest day first, earliest slot first within a day.
pub(crate) fn sort_newest_first(appointments: &mut [Appointment]) {
    appointments.sort_by(|a, b| b.date.cmp(&a.date).then(a.slot_number.cmp(&b.slot_number)));
}

/// Oldest day first, earliest slot first within a day.
pub(crate) fn sort_oldest_first(appointments: &mut [Appointment]) {
    appointments.sort_by(|a, b| a.date.cmp(&b.date).then(a.slot_number.cmp(&b.slot_number)));
}
