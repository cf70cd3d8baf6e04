use std::collections::HashSet;

use chrono::NaiveDate;

use crate::model::*;

use super::availability::{
    available_stylists, day_availability, sort_newest_first, sort_oldest_first, sort_services,
    sort_users,
};
use super::{Engine, EngineError, SharedDayState};

impl Engine {
    // ── Leave registry reads ─────────────────────────────

    pub fn has_leave(&self, stylist_id: ObjectId, date: NaiveDate) -> bool {
        self.leave_index
            .get(&date)
            .is_some_and(|on_leave| on_leave.contains(&stylist_id))
    }

    pub fn leave_stylists(&self, date: NaiveDate) -> HashSet<ObjectId> {
        self.leave_index
            .get(&date)
            .map(|on_leave| on_leave.value().clone())
            .unwrap_or_default()
    }

    // ── Availability ─────────────────────────────────────

    /// Free slot numbers for a stylist on `date`, ascending. A snapshot, not a reservation.
    ///
    /// A client or admin id names no stylist, so it is `NotFound` like an unknown id.
    pub async fn available_slots(
        &self,
        stylist_id: ObjectId,
        date: NaiveDate,
    ) -> Result<Vec<u8>, EngineError> {
        if !self.get_user(&stylist_id).is_some_and(|u| u.role == Role::Stylist) {
            return Err(EngineError::NotFound { entity: "stylist", id: stylist_id });
        }
        let free = match self.get_day(&DayKey::new(stylist_id, date)) {
            Some(ds) => day_availability(Some(&*ds.read().await)),
            None => day_availability(None),
        };
        free.ok_or(EngineError::StylistOnLeave { stylist_id, date })
    }

    pub fn available_stylists(&self, date: NaiveDate) -> Vec<User> {
        available_stylists(&self.stylists_unsorted(), &self.leave_stylists(date))
    }

    pub fn list_stylists(&self) -> Vec<User> {
        let mut stylists = self.stylists_unsorted();
        sort_users(&mut stylists);
        stylists
    }

    fn stylists_unsorted(&self) -> Vec<User> {
        self.users
            .iter()
            .filter(|u| u.role == Role::Stylist)
            .map(|u| u.value().clone())
            .collect()
    }

    // ── Service catalog ──────────────────────────────────

    pub fn list_services(&self) -> Vec<Service> {
        let mut services: Vec<Service> = self.services.iter().map(|s| s.value().clone()).collect();
        sort_services(&mut services);
        services
    }

    pub fn get_service(&self, id: &str) -> Result<Service, EngineError> {
        let id: ObjectId = id.trim().parse()?;
        self.services
            .get(&id)
            .map(|s| s.value().clone())
            .ok_or(EngineError::NotFound { entity: "service", id })
    }

    // ── Appointment listings ─────────────────────────────

    pub async fn get_appointment(&self, id: &str) -> Result<Appointment, EngineError> {
        let id: ObjectId = id.trim().parse()?;
        let not_found = EngineError::NotFound {
            entity: "appointment",
            id,
        };
        let key = self
            .appointment_index
            .get(&id)
            .map(|k| *k.value())
            .ok_or(not_found.clone())?;
        let ds = self.get_day(&key).ok_or(not_found.clone())?;
        let guard = ds.read().await;
        guard.get(&id).cloned().ok_or(not_found)
    }

    /// Every appointment matching `keep`, read day by day.
    async fn collect_appointments(
        &self,
        days: Vec<SharedDayState>,
        keep: impl Fn(&Appointment) -> bool,
    ) -> Vec<Appointment> {
        let mut out = Vec::new();
        for ds in days {
            let guard = ds.read().await;
            out.extend(guard.appointments.iter().filter(|a| keep(a)).cloned());
        }
        out
    }

    fn all_days(&self) -> Vec<SharedDayState> {
        self.days.iter().map(|e| e.value().clone()).collect()
    }

    fn stylist_days(&self, stylist_id: ObjectId) -> Vec<SharedDayState> {
        self.days
            .iter()
            .filter(|e| e.key().stylist_id == stylist_id)
            .map(|e| e.value().clone())
            .collect()
    }

    pub async fn list_pending_for_client(&self, client_id: ObjectId) -> Vec<Appointment> {
        self.list_for_client(client_id, AppointmentStatus::Pending).await
    }

    pub async fn list_approved_for_client(&self, client_id: ObjectId) -> Vec<Appointment> {
        self.list_for_client(client_id, AppointmentStatus::Accepted).await
    }

    async fn list_for_client(
        &self,
        client_id: ObjectId,
        status: AppointmentStatus,
    ) -> Vec<Appointment> {
        let mut list = self
            .collect_appointments(self.all_days(), |a| {
                a.client_id == client_id && a.status == status
            })
            .await;
        sort_newest_first(&mut list);
        list
    }

    /// Pending requests awaiting the stylist's decision.
    pub async fn list_requested_for_stylist(&self, stylist_id: ObjectId) -> Vec<Appointment> {
        let mut list = self
            .collect_appointments(self.stylist_days(stylist_id), |a| {
                a.status == AppointmentStatus::Pending
            })
            .await;
        sort_oldest_first(&mut list);
        list
    }

    /// Accepted appointments on or after `today`.
    pub async fn list_upcoming_for_stylist(
        &self,
        stylist_id: ObjectId,
        today: NaiveDate,
    ) -> Vec<Appointment> {
        let mut list = self
            .collect_appointments(self.stylist_days(stylist_id), |a| {
                a.status == AppointmentStatus::Accepted && a.date >= today
            })
            .await;
        sort_oldest_first(&mut list);
        list
    }

    pub async fn list_all_appointments(&self) -> Vec<Appointment> {
        let mut list = self.collect_appointments(self.all_days(), |_| true).await;
        sort_newest_first(&mut list);
        list
    }
}
