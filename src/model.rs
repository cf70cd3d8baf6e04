use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Used for record timestamps only; scheduling works on calendar days.
pub type Ms = i64;

/// Bookable slots per stylist per day, numbered `1..=SLOTS_PER_DAY`.
pub const SLOTS_PER_DAY: u8 = 8;

// ── Identifiers ──────────────────────────────────────────────────

/// 12-byte identifier rendered as 24 lowercase hex characters.
///
/// Generated ids lead with the creation second (big-endian) so they sort
/// roughly by age; the remaining 8 bytes come from a ULID's random part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    pub fn new() -> Self {
        let ulid = Ulid::new();
        let secs = (ulid.timestamp_ms() / 1000) as u32;
        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..].copy_from_slice(&(ulid.random() as u64).to_be_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// A string that is not a 24-character hex identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidObjectId(pub String);

impl fmt::Display for InvalidObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid resource id: {}", self.0)
    }
}

impl std::error::Error for InvalidObjectId {}

impl FromStr for ObjectId {
    type Err = InvalidObjectId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 24 {
            return Err(InvalidObjectId(s.to_string()));
        }
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| InvalidObjectId(s.to_string()))?;
        Ok(Self(bytes))
    }
}

// ── Users ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Stylist,
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Stylist => "stylist",
            Role::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "stylist" => Ok(Role::Stylist),
            "client" => Ok(Role::Client),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A user as known to the booking engine. Authentication lives elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: ObjectId,
    pub name: String,
    pub role: Role,
}

// ── Leave ────────────────────────────────────────────────────────

/// A full day a stylist is unavailable. At most one per (stylist, date); never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leave {
    pub id: ObjectId,
    pub stylist_id: ObjectId,
    pub date: NaiveDate,
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
    Completed,
    Expired,
}

impl AppointmentStatus {
    /// Statuses that occupy their slot. Every conflict check uses this one set.
    pub const ACTIVE: [AppointmentStatus; 2] = [AppointmentStatus::Pending, AppointmentStatus::Accepted];

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Accepted => "accepted",
            AppointmentStatus::Rejected => "rejected",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(AppointmentStatus::Pending),
            "accepted" => Ok(AppointmentStatus::Accepted),
            "rejected" => Ok(AppointmentStatus::Rejected),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            "completed" => Ok(AppointmentStatus::Completed),
            "expired" => Ok(AppointmentStatus::Expired),
            other => Err(format!("unknown appointment status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: ObjectId,
    pub client_id: ObjectId,
    pub stylist_id: ObjectId,
    pub date: NaiveDate,
    /// Always within `1..=SLOTS_PER_DAY`.
    pub slot_number: u8,
    pub status: AppointmentStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Appointment {
    pub fn day_key(&self) -> DayKey {
        DayKey::new(self.stylist_id, self.date)
    }
}

/// Result of a booking request. Leave is an expected answer, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingOutcome {
    Booked(Appointment),
    StylistOnLeave,
}

// ── Services ─────────────────────────────────────────────────────

/// A catalog entry. Names are unique across the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ObjectId,
    pub name: String,
    /// Minutes.
    pub duration: u32,
    /// Minor currency units.
    pub price: i64,
    pub image_url: Option<String>,
}

/// Fields to change on a service; `None` keeps the current value.
/// `image_url: Some(None)` clears the image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServicePatch {
    pub name: Option<String>,
    pub duration: Option<i64>,
    pub price: Option<i64>,
    pub image_url: Option<Option<String>>,
}

// ── Per stylist-day state ────────────────────────────────────────

/// Partition key of the store: one stylist on one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DayKey {
    pub stylist_id: ObjectId,
    pub date: NaiveDate,
}

impl DayKey {
    pub fn new(stylist_id: ObjectId, date: NaiveDate) -> Self {
        Self { stylist_id, date }
    }
}

/// Everything recorded for one stylist on one day: the leave, if any, and
/// every appointment ever booked there in booking order.
#[derive(Debug, Clone)]
pub struct DayState {
    pub key: DayKey,
    pub leave: Option<Leave>,
    pub appointments: Vec<Appointment>,
}

impl DayState {
    pub fn new(key: DayKey) -> Self {
        Self {
            key,
            leave: None,
            appointments: Vec::new(),
        }
    }

    pub fn on_leave(&self) -> bool {
        self.leave.is_some()
    }

    /// The appointment holding `slot`, if one is active.
    pub fn active_in_slot(&self, slot: u8) -> Option<&Appointment> {
        self.appointments
            .iter()
            .find(|a| a.slot_number == slot && a.status.is_active())
    }

    pub fn booked_slots(&self) -> Vec<u8> {
        self.appointments
            .iter()
            .filter(|a| a.status.is_active())
            .map(|a| a.slot_number)
            .collect()
    }

    pub fn get(&self, id: &ObjectId) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == *id)
    }

    pub fn get_mut(&mut self, id: &ObjectId) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == *id)
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: ObjectId,
        name: String,
        role: Role,
    },
    LeaveRecorded {
        leave: Leave,
    },
    /// Carries the full record so compaction can re-emit settled appointments as-is.
    AppointmentBooked {
        appointment: Appointment,
    },
    AppointmentStatusChanged {
        id: ObjectId,
        status: AppointmentStatus,
        at: Ms,
    },
    ServiceCreated {
        service: Service,
    },
    /// The service as it reads after the change.
    ServiceUpdated {
        service: Service,
    },
    ServiceDeleted {
        id: ObjectId,
    },
}
