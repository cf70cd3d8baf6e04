use chrono::{NaiveDate, Utc};

use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

/// Current calendar day. The salon runs on a single clock, taken as UTC.
pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub(crate) fn validate_slot(slot: i64) -> Result<u8, EngineError> {
    match u8::try_from(slot) {
        Ok(n) if (1..=SLOTS_PER_DAY).contains(&n) => Ok(n),
        _ => Err(EngineError::InvalidSlot(slot)),
    }
}

pub(crate) fn validate_date(date: NaiveDate) -> Result<(), EngineError> {
    use crate::limits::{MAX_VALID_DATE, MIN_VALID_DATE};
    let bound = |(y, m, d): (i32, u32, u32)| NaiveDate::from_ymd_opt(y, m, d);
    match (bound(MIN_VALID_DATE), bound(MAX_VALID_DATE)) {
        (Some(min), Some(max)) if date >= min && date <= max => Ok(()),
        _ => Err(EngineError::LimitExceeded("date out of range")),
    }
}

/// Field checks for a catalog entry. Returns the duration as minutes.
pub(crate) fn validate_service(
    name: &str,
    duration: i64,
    price: i64,
    image_url: Option<&str>,
) -> Result<u32, EngineError> {
    use crate::limits::{MAX_NAME_LEN, MAX_SERVICE_MINUTES, MAX_URL_LEN};
    if name.trim().is_empty() {
        return Err(EngineError::InvalidService("name is empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("service name too long"));
    }
    let minutes = match u32::try_from(duration) {
        Ok(m) if (1..=MAX_SERVICE_MINUTES).contains(&m) => m,
        _ => return Err(EngineError::InvalidService("duration out of range")),
    };
    if price < 0 {
        return Err(EngineError::InvalidService("price is negative"));
    }
    if image_url.is_some_and(|url| url.len() > MAX_URL_LEN) {
        return Err(EngineError::LimitExceeded("image url too long"));
    }
    Ok(minutes)
}

/// Fails with `SlotTaken` when an active appointment other than `except` holds `slot`.
pub(crate) fn check_slot_free(
    ds: &DayState,
    slot: u8,
    except: Option<ObjectId>,
) -> Result<(), EngineError> {
    match ds.active_in_slot(slot) {
        Some(holder) if Some(holder.id) != except => Err(EngineError::SlotTaken {
            stylist_id: ds.key.stylist_id,
            date: ds.key.date,
            slot,
        }),
        _ => Ok(()),
    }
}

/// Guard for a status change on `current`. Repeating the current status is
/// refused; any other move is allowed unless it would put a second active
/// appointment into an occupied slot.
pub(crate) fn check_transition(
    ds: &DayState,
    current: &Appointment,
    target: AppointmentStatus,
) -> Result<(), EngineError> {
    if current.status == target {
        return Err(EngineError::AlreadyInState {
            id: current.id,
            status: target,
        });
    }
    if target.is_active() && !current.status.is_active() {
        check_slot_free(ds, current.slot_number, Some(current.id))?;
    }
    Ok(())
}

/// Status an unsettled appointment moves to once its day has passed.
pub(crate) fn settled_status(status: AppointmentStatus) -> Option<AppointmentStatus> {
    match status {
        AppointmentStatus::Pending => Some(AppointmentStatus::Expired),
        AppointmentStatus::Accepted => Some(AppointmentStatus::Completed),
        _ => None,
    }
}
