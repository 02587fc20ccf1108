use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Turn caller-supplied bounds into a [`TimeRange`], rejecting empty,
/// inverted, and out-of-range intervals.
pub(crate) fn validate_range(start: Ms, end: Ms) -> Result<TimeRange, EngineError> {
    if end <= start {
        return Err(EngineError::invalid("end must be after start"));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let range = TimeRange::new(start, end);
    if range.duration_ms() > MAX_RANGE_DURATION_MS {
        return Err(EngineError::LimitExceeded("range too wide"));
    }
    Ok(range)
}

/// First accepted reservation overlapping `range`, if any.
pub(crate) fn accepted_overlap(acc: &AccommodationState, range: &TimeRange) -> Option<Ulid> {
    acc.reservations_overlapping(range)
        .find(|r| r.status == ReservationStatus::Accepted)
        .map(|r| r.id)
}

/// Only accepted reservations block; pending ones are settled at accept time.
pub(crate) fn check_no_accepted_overlap(
    acc: &AccommodationState,
    range: &TimeRange,
) -> Result<(), EngineError> {
    match accepted_overlap(acc, range) {
        Some(id) => Err(EngineError::AlreadyExists(id)),
        None => Ok(()),
    }
}

/// Pending reservations that lose to `winner` when it is accepted: every other
/// pending request on the same accommodation whose range overlaps it.
pub(crate) fn cascade_losers(acc: &AccommodationState, winner: &Reservation) -> Vec<Ulid> {
    acc.reservations_overlapping(&winner.range)
        .filter(|r| r.id != winner.id && r.status == ReservationStatus::Pending)
        .map(|r| r.id)
        .collect()
}

/// Guests may cancel only while `now < start - cutoff`. Exactly at the cutoff
/// is already too late.
pub(crate) fn check_cancel_cutoff(reservation: &Reservation, now: Ms) -> Result<(), EngineError> {
    if now >= reservation.range.start - CANCELLATION_CUTOFF_MS {
        return Err(EngineError::invalid("cannot cancel within cutoff"));
    }
    Ok(())
}
