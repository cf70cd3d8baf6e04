mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use availability::{available_stylists, day_availability, free_slots};
pub use error::{EngineError, ErrorKind};

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};

use crate::model::*;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

pub type SharedDayState = Arc<RwLock<DayState>>;

// ── Group-commit WAL channel ─────────────────────────────

type Ack = oneshot::Sender<io::Result<()>>;

pub(super) enum WalCommand {
    Append { event: Event, response: Ack },
    Compact { events: Vec<Event>, response: Ack },
    AppendsSinceCompact { response: oneshot::Sender<u64> },
}

/// Owns the WAL. Appends that are already queued when one arrives are
/// committed together with a single fsync; other commands run between batches.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut batch: Vec<(Event, Ack)> = Vec::new();
    while let Some(cmd) = rx.recv().await {
        let mut next = Some(cmd);
        while let Some(cmd) = next.take() {
            match cmd {
                WalCommand::Append { event, response } => {
                    batch.push((event, response));
                    next = rx.try_recv().ok();
                }
                other => {
                    commit_batch(&mut wal, &mut batch);
                    run_command(&mut wal, other);
                }
            }
        }
        commit_batch(&mut wal, &mut batch);
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, Ack)>) {
    if batch.is_empty() {
        return;
    }
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so no half-written batch leaks into the next one.
    let flushed = wal.flush_sync();
    let result = appended.and(flushed);

    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    for (_, ack) in batch.drain(..) {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = ack.send(reply);
    }
}

fn run_command(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut single = vec![(event, response)];
            commit_batch(wal, &mut single);
        }
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    pub(super) users: DashMap<ObjectId, User>,
    pub(super) days: DashMap<DayKey, SharedDayState>,
    /// appointment id → the stylist-day holding it
    pub(super) appointment_index: DashMap<ObjectId, DayKey>,
    /// date → stylists on leave that day
    pub(super) leave_index: DashMap<NaiveDate, HashSet<ObjectId>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations commit under a read guard; compaction takes the write side
    /// so its snapshot and the log swap see no commits in between.
    pub(super) write_gate: RwLock<()>,
    /// Serializes user registration (the directory is not partitioned by day).
    pub(super) user_lock: Mutex<()>,
    pub(super) services: DashMap<ObjectId, Service>,
    /// Serializes catalog writes so name uniqueness holds.
    pub(super) catalog_lock: Mutex<()>,
}

/// Apply an event to its stylist-day (caller holds the lock).
fn apply_to_day(ds: &mut DayState, event: &Event) {
    match event {
        Event::LeaveRecorded { leave } => ds.leave = Some(leave.clone()),
        Event::AppointmentBooked { appointment } => ds.appointments.push(appointment.clone()),
        Event::AppointmentStatusChanged { id, status, at } => {
            if let Some(appt) = ds.get_mut(id) {
                appt.status = *status;
                appt.updated_at = *at;
            }
        }
        Event::UserRegistered { .. }
        | Event::ServiceCreated { .. }
        | Event::ServiceUpdated { .. }
        | Event::ServiceDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            users: DashMap::new(),
            days: DashMap::new(),
            appointment_index: DashMap::new(),
            leave_index: DashMap::new(),
            wal_tx,
            write_gate: RwLock::new(()),
            user_lock: Mutex::new(()),
            services: DashMap::new(),
            catalog_lock: Mutex::new(()),
        };

        // Rebuild day states unlocked, then publish them.
        let mut days: HashMap<DayKey, DayState> = HashMap::new();
        for event in &events {
            engine.index_event(event);
            if let Some(key) = engine.event_day(event) {
                let ds = days.entry(key).or_insert_with(|| DayState::new(key));
                apply_to_day(ds, event);
            }
        }
        for (key, ds) in days {
            engine.days.insert(key, Arc::new(RwLock::new(ds)));
        }

        if !events.is_empty() {
            tracing::info!(
                "replayed {} WAL events: {} users, {} services, {} appointments",
                events.len(),
                engine.users.len(),
                engine.services.len(),
                engine.appointment_index.len()
            );
        }
        Ok(engine)
    }

    /// Stylist-day an event belongs to, if any.
    fn event_day(&self, event: &Event) -> Option<DayKey> {
        match event {
            Event::LeaveRecorded { leave } => Some(DayKey::new(leave.stylist_id, leave.date)),
            Event::AppointmentBooked { appointment } => Some(appointment.day_key()),
            Event::AppointmentStatusChanged { id, .. } => {
                self.appointment_index.get(id).map(|k| *k.value())
            }
            Event::UserRegistered { .. }
            | Event::ServiceCreated { .. }
            | Event::ServiceUpdated { .. }
            | Event::ServiceDeleted { .. } => None,
        }
    }

    /// Keep the engine-wide maps in step with an applied event.
    fn index_event(&self, event: &Event) {
        match event {
            Event::UserRegistered { id, name, role } => {
                self.users.insert(
                    *id,
                    User {
                        id: *id,
                        name: name.clone(),
                        role: *role,
                    },
                );
            }
            Event::LeaveRecorded { leave } => {
                self.leave_index
                    .entry(leave.date)
                    .or_default()
                    .insert(leave.stylist_id);
            }
            Event::AppointmentBooked { appointment } => {
                self.appointment_index
                    .insert(appointment.id, appointment.day_key());
            }
            Event::AppointmentStatusChanged { .. } => {}
            Event::ServiceCreated { service } | Event::ServiceUpdated { service } => {
                self.services.insert(service.id, service.clone());
            }
            Event::ServiceDeleted { id } => {
                self.services.remove(id);
            }
        }
    }

    /// Write an event through the group-commit writer and wait for the fsync.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Durably log `event`, then apply it to `ds` and the indices.
    pub(super) async fn persist_and_apply(
        &self,
        ds: &mut DayState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_day(ds, event);
        self.index_event(event);
        Ok(())
    }

    /// Log and index an event that has no stylist-day (users, services).
    pub(super) async fn persist_global(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.index_event(event);
        Ok(())
    }

    pub fn get_day(&self, key: &DayKey) -> Option<SharedDayState> {
        self.days.get(key).map(|e| e.value().clone())
    }

    pub(super) fn day_or_insert(&self, key: DayKey) -> SharedDayState {
        self.days
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(DayState::new(key))))
            .value()
            .clone()
    }

    pub fn get_user(&self, id: &ObjectId) -> Option<User> {
        self.users.get(id).map(|u| u.value().clone())
    }

    /// Id of the service called exactly `name`.
    pub(super) fn service_named(&self, name: &str) -> Option<ObjectId> {
        self.services
            .iter()
            .find(|s| s.name == name)
            .map(|s| *s.key())
    }

    /// The user behind `id`, required to hold `role`.
    pub(super) fn resolve_user(&self, id: ObjectId, role: Role) -> Result<User, EngineError> {
        let entity = match role {
            Role::Client => "client",
            Role::Stylist => "stylist",
            Role::Admin => "user",
        };
        let user = self
            .get_user(&id)
            .ok_or(EngineError::NotFound { entity, id })?;
        if user.role != role {
            return Err(EngineError::RoleMismatch { id, expected: role });
        }
        Ok(user)
    }

    /// Parse a raw appointment id, find its stylist-day and take the write lock.
    pub(super) async fn resolve_appointment_write(
        &self,
        raw_id: &str,
    ) -> Result<(ObjectId, OwnedRwLockWriteGuard<DayState>), EngineError> {
        let id: ObjectId = raw_id.trim().parse()?;
        let not_found = EngineError::NotFound {
            entity: "appointment",
            id,
        };
        let key = self
            .appointment_index
            .get(&id)
            .map(|k| *k.value())
            .ok_or(not_found.clone())?;
        let ds = self.get_day(&key).ok_or(not_found)?;
        Ok((id, ds.write_owned().await))
    }
}
