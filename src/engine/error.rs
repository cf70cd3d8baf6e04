use chrono::NaiveDate;

use crate::model::{AppointmentStatus, InvalidObjectId, ObjectId, Role};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    NotFound { entity: &'static str, id: ObjectId },
    InvalidId(String),
    InvalidSlot(i64),
    RoleMismatch { id: ObjectId, expected: Role },
    AlreadyExists(ObjectId),
    LeaveExists { stylist_id: ObjectId, date: NaiveDate },
    SlotTaken { stylist_id: ObjectId, date: NaiveDate, slot: u8 },
    AlreadyInState { id: ObjectId, status: AppointmentStatus },
    StylistOnLeave { stylist_id: ObjectId, date: NaiveDate },
    ServiceExists(String),
    InvalidService(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

/// Coarse classification of an [`EngineError`], stable across message wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidId,
    Invalid,
    Conflict,
    Unavailable,
    Internal,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::InvalidId(_) => ErrorKind::InvalidId,
            EngineError::InvalidSlot(_)
            | EngineError::RoleMismatch { .. }
            | EngineError::InvalidService(_)
            | EngineError::LimitExceeded(_) => ErrorKind::Invalid,
            EngineError::AlreadyExists(_)
            | EngineError::ServiceExists(_)
            | EngineError::LeaveExists { .. }
            | EngineError::SlotTaken { .. }
            | EngineError::AlreadyInState { .. } => ErrorKind::Conflict,
            EngineError::StylistOnLeave { .. } => ErrorKind::Unavailable,
            EngineError::WalError(_) => ErrorKind::Internal,
        }
    }

    /// HTTP-style status: 404 for missing records, 500 for storage failures, 400 otherwise.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::Internal => 500,
            _ => 400,
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

impl From<InvalidObjectId> for EngineError {
    fn from(e: InvalidObjectId) -> Self {
        EngineError::InvalidId(e.0)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            EngineError::InvalidId(raw) => write!(f, "invalid resource id: {raw:?}"),
            EngineError::InvalidSlot(slot) => {
                write!(f, "slot number {slot} out of range 1..={}", crate::model::SLOTS_PER_DAY)
            }
            EngineError::RoleMismatch { id, expected } => {
                write!(f, "user {id} is not a {expected}")
            }
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::LeaveExists { stylist_id, date } => {
                write!(f, "leave already exists for stylist {stylist_id} on {date}")
            }
            EngineError::SlotTaken { stylist_id, date, slot } => write!(
                f,
                "appointment already exists for stylist {stylist_id} on {date} at slot {slot}"
            ),
            EngineError::AlreadyInState { status, .. } => write!(f, "appointment already {status}"),
            EngineError::StylistOnLeave { stylist_id, date } => {
                write!(f, "stylist {stylist_id} is on leave on {date}")
            }
            EngineError::ServiceExists(name) => write!(f, "service already exists: {name}"),
            EngineError::InvalidService(msg) => write!(f, "invalid service: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
