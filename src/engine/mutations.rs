use chrono::NaiveDate;
use tokio::sync::oneshot;
use tracing::debug;

use crate::limits::*;
use crate::model::*;
use crate::observability::{BOOKINGS_TOTAL, SETTLEMENTS_TOTAL, TRANSITIONS_TOTAL};

use super::conflict::{
    check_slot_free, check_transition, now_ms, settled_status, validate_date, validate_service,
    validate_slot,
};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    // ── User directory ───────────────────────────────────

    pub async fn register_user(
        &self,
        id: ObjectId,
        name: String,
        role: Role,
    ) -> Result<User, EngineError> {
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("user name too long"));
        }
        let _gate = self.write_gate.read().await;
        let _directory = self.user_lock.lock().await;
        if self.users.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.users.len() >= MAX_USERS {
            return Err(EngineError::LimitExceeded("too many users"));
        }

        let event = Event::UserRegistered { id, name: name.clone(), role };
        self.persist_global(&event).await?;
        debug!("registered {role} {id}");
        Ok(User { id, name, role })
    }

    // ── Service catalog ──────────────────────────────────

    pub async fn create_service(
        &self,
        name: String,
        duration: i64,
        price: i64,
        image_url: Option<String>,
    ) -> Result<Service, EngineError> {
        let duration = validate_service(&name, duration, price, image_url.as_deref())?;
        let _gate = self.write_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        if self.service_named(&name).is_some() {
            return Err(EngineError::ServiceExists(name));
        }
        if self.services.len() >= MAX_SERVICES {
            return Err(EngineError::LimitExceeded("too many services"));
        }

        let service = Service {
            id: ObjectId::new(),
            name,
            duration,
            price,
            image_url,
        };
        self.persist_global(&Event::ServiceCreated { service: service.clone() })
            .await?;
        debug!("service {} created: {}", service.id, service.name);
        Ok(service)
    }

    /// Apply `patch` to a service. The result is validated as a whole, and a
    /// rename may not take another service's name.
    pub async fn update_service(
        &self,
        id: &str,
        patch: ServicePatch,
    ) -> Result<Service, EngineError> {
        let id: ObjectId = id.trim().parse()?;
        let _gate = self.write_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        let current = self
            .services
            .get(&id)
            .map(|s| s.value().clone())
            .ok_or(EngineError::NotFound { entity: "service", id })?;

        let name = patch.name.unwrap_or(current.name);
        let duration = patch.duration.unwrap_or(i64::from(current.duration));
        let price = patch.price.unwrap_or(current.price);
        let image_url = patch.image_url.unwrap_or(current.image_url);
        let duration = validate_service(&name, duration, price, image_url.as_deref())?;
        if self.service_named(&name).is_some_and(|other| other != id) {
            return Err(EngineError::ServiceExists(name));
        }

        let service = Service {
            id,
            name,
            duration,
            price,
            image_url,
        };
        self.persist_global(&Event::ServiceUpdated { service: service.clone() })
            .await?;
        debug!("service {id} updated");
        Ok(service)
    }

    /// Remove a service from the catalog and return it as it was.
    pub async fn delete_service(&self, id: &str) -> Result<Service, EngineError> {
        let id: ObjectId = id.trim().parse()?;
        let _gate = self.write_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        let removed = self
            .services
            .get(&id)
            .map(|s| s.value().clone())
            .ok_or(EngineError::NotFound { entity: "service", id })?;

        self.persist_global(&Event::ServiceDeleted { id }).await?;
        debug!("service {id} deleted");
        Ok(removed)
    }

    // ── Leave registry ───────────────────────────────────

    pub async fn record_leave(
        &self,
        stylist_id: ObjectId,
        date: NaiveDate,
    ) -> Result<Leave, EngineError> {
        validate_date(date)?;
        self.resolve_user(stylist_id, Role::Stylist)?;

        let _gate = self.write_gate.read().await;
        let ds = self.day_or_insert(DayKey::new(stylist_id, date));
        let mut guard = ds.write().await;
        if guard.on_leave() {
            return Err(EngineError::LeaveExists { stylist_id, date });
        }

        let leave = Leave {
            id: ObjectId::new(),
            stylist_id,
            date,
        };
        let event = Event::LeaveRecorded { leave: leave.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!("stylist {stylist_id} on leave {date}");
        Ok(leave)
    }

    // ── Booking ──────────────────────────────────────────

    /// Book `slot_number` with a stylist on `date` as a `pending` appointment.
    ///
    /// The stylist-day write lock is held from the leave check through the
    /// durable append, so two requests for the same slot cannot both pass
    /// the availability check.
    pub async fn create_appointment(
        &self,
        client_id: ObjectId,
        stylist_id: ObjectId,
        date: NaiveDate,
        slot_number: i64,
    ) -> Result<BookingOutcome, EngineError> {
        let slot = validate_slot(slot_number)?;
        validate_date(date)?;
        // An unknown stylist has no leave and no bookings; reject before touching the store.
        self.resolve_user(stylist_id, Role::Stylist)?;

        let _gate = self.write_gate.read().await;
        let ds = self.day_or_insert(DayKey::new(stylist_id, date));
        let mut guard = ds.write().await;

        if guard.on_leave() {
            metrics::counter!(BOOKINGS_TOTAL, "outcome" => "on_leave").increment(1);
            return Ok(BookingOutcome::StylistOnLeave);
        }
        if let Err(e) = check_slot_free(&guard, slot, None) {
            metrics::counter!(BOOKINGS_TOTAL, "outcome" => "slot_taken").increment(1);
            return Err(e);
        }
        self.resolve_user(client_id, Role::Client)?;

        let now = now_ms();
        let appointment = Appointment {
            id: ObjectId::new(),
            client_id,
            stylist_id,
            date,
            slot_number: slot,
            status: AppointmentStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        let event = Event::AppointmentBooked { appointment: appointment.clone() };
        self.persist_and_apply(&mut guard, &event).await?;

        metrics::counter!(BOOKINGS_TOTAL, "outcome" => "booked").increment(1);
        debug!("booked {} slot {slot} with {stylist_id} on {date}", appointment.id);
        Ok(BookingOutcome::Booked(appointment))
    }

    // ── Lifecycle ────────────────────────────────────────

    pub async fn accept_appointment(&self, id: &str) -> Result<Appointment, EngineError> {
        self.transition(id, AppointmentStatus::Accepted).await
    }

    pub async fn reject_appointment(&self, id: &str) -> Result<Appointment, EngineError> {
        self.transition(id, AppointmentStatus::Rejected).await
    }

    pub async fn cancel_appointment(&self, id: &str) -> Result<Appointment, EngineError> {
        self.transition(id, AppointmentStatus::Cancelled).await
    }

    async fn transition(
        &self,
        raw_id: &str,
        target: AppointmentStatus,
    ) -> Result<Appointment, EngineError> {
        let _gate = self.write_gate.read().await;
        let (id, mut guard) = self.resolve_appointment_write(raw_id).await?;
        let current = guard.get(&id).cloned().ok_or(EngineError::NotFound {
            entity: "appointment",
            id,
        })?;
        check_transition(&guard, &current, target)?;

        let at = now_ms();
        let event = Event::AppointmentStatusChanged { id, status: target, at };
        self.persist_and_apply(&mut guard, &event).await?;

        metrics::counter!(TRANSITIONS_TOTAL, "status" => target.as_str()).increment(1);
        debug!("appointment {id}: {} -> {target}", current.status);
        Ok(Appointment {
            status: target,
            updated_at: at,
            ..current
        })
    }

    // ── Settlement ───────────────────────────────────────

    /// Pending or accepted appointments dated before `today`.
    /// Days locked by a writer right now are skipped; the next pass picks them up.
    pub fn collect_unsettled(&self, today: NaiveDate) -> Vec<ObjectId> {
        let mut unsettled = Vec::new();
        for entry in self.days.iter() {
            if entry.key().date >= today {
                continue;
            }
            if let Ok(guard) = entry.value().try_read() {
                unsettled.extend(
                    guard
                        .appointments
                        .iter()
                        .filter(|a| settled_status(a.status).is_some())
                        .map(|a| a.id),
                );
            }
        }
        unsettled
    }

    /// Move a past-dated appointment to `expired` (was pending) or `completed`
    /// (was accepted). Returns `None` when there was nothing to settle.
    pub async fn settle_appointment(
        &self,
        id: ObjectId,
        today: NaiveDate,
    ) -> Result<Option<Appointment>, EngineError> {
        let _gate = self.write_gate.read().await;
        let (_, mut guard) = self.resolve_appointment_write(&id.to_string()).await?;
        let Some(current) = guard.get(&id).cloned() else {
            return Ok(None);
        };
        if current.date >= today {
            return Ok(None);
        }
        let Some(target) = settled_status(current.status) else {
            return Ok(None);
        };

        let at = now_ms();
        let event = Event::AppointmentStatusChanged { id, status: target, at };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(SETTLEMENTS_TOTAL, "status" => target.as_str()).increment(1);
        Ok(Some(Appointment {
            status: target,
            updated_at: at,
            ..current
        }))
    }

    // ── WAL maintenance ──────────────────────────────────

    /// Rewrite the WAL as the minimal event list recreating the current state.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        let _gate = self.write_gate.write().await;

        let mut users: Vec<User> = self.users.iter().map(|u| u.value().clone()).collect();
        users.sort_by_key(|u| u.id);
        let mut events: Vec<Event> = users
            .into_iter()
            .map(|u| Event::UserRegistered { id: u.id, name: u.name, role: u.role })
            .collect();

        let mut services: Vec<Service> = self.services.iter().map(|s| s.value().clone()).collect();
        services.sort_by_key(|s| s.id);
        events.extend(services.into_iter().map(|service| Event::ServiceCreated { service }));

        let mut days: Vec<_> = self
            .days
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        days.sort_by_key(|(key, _)| *key);
        for (_, ds) in days {
            let guard = ds.read().await;
            if let Some(leave) = &guard.leave {
                events.push(Event::LeaveRecorded { leave: leave.clone() });
            }
            events.extend(
                guard
                    .appointments
                    .iter()
                    .map(|a| Event::AppointmentBooked { appointment: a.clone() }),
            );
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        Ok(count)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
