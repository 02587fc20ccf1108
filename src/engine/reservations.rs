//! Reservation rules and the state machine:
//!
//! ```text
//! PENDING ──accept──▶ ACCEPTED ──decline / cancel──▶ DECLINED
//!    │                                                 ▲
//!    └──────decline / cancel / lost cascade────────────┘
//! ```
//!
//! `DECLINED` is terminal. `ACCEPTED` becomes terminal once its range ends.

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::find_covering;
use super::conflict::{cascade_losers, check_cancel_cutoff, check_no_accepted_overlap};
use super::EngineError;

/// Combinable predicate over reservations. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub accommodation_id: Option<Ulid>,
    pub host_id: Option<Ulid>,
    pub guest_id: Option<Ulid>,
    pub status: Option<ReservationStatus>,
    pub overlapping: Option<TimeRange>,
    /// Only reservations whose range ends strictly after this instant.
    pub ends_after: Option<Ms>,
}

impl ReservationFilter {
    pub fn accommodation(mut self, id: Ulid) -> Self {
        self.accommodation_id = Some(id);
        self
    }

    pub fn host(mut self, id: Ulid) -> Self {
        self.host_id = Some(id);
        self
    }

    pub fn guest(mut self, id: Ulid) -> Self {
        self.guest_id = Some(id);
        self
    }

    pub fn status(mut self, status: ReservationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn overlapping(mut self, range: TimeRange) -> Self {
        self.overlapping = Some(range);
        self
    }

    pub fn ends_after(mut self, instant: Ms) -> Self {
        self.ends_after = Some(instant);
        self
    }

    pub fn matches(&self, r: &Reservation) -> bool {
        self.accommodation_id.is_none_or(|id| r.accommodation_id == id)
            && self.host_id.is_none_or(|id| r.host_id == id)
            && self.guest_id.is_none_or(|id| r.guest_id == id)
            && self.status.is_none_or(|s| r.status == s)
            && self.overlapping.is_none_or(|range| r.range.overlaps(&range))
            && self.ends_after.is_none_or(|t| r.range.end > t)
    }
}

/// Decide a new reservation request. Checks run in a fixed order so the
/// reported failure is deterministic: guest count, start in the future,
/// covering window, accepted overlap.
pub(crate) fn plan_reserve(
    acc: &AccommodationState,
    id: Ulid,
    req: &ReserveRequest,
    range: TimeRange,
    now: Ms,
) -> Result<(Event, i64), EngineError> {
    check_guest_count(req.guest_count)?;
    if range.start <= now {
        return Err(EngineError::invalid("start date must be in the future"));
    }
    if acc.reservations.len() >= MAX_RESERVATIONS_PER_ACCOMMODATION {
        return Err(EngineError::LimitExceeded("too many reservations on accommodation"));
    }
    let window = find_covering(acc, &range).ok_or_else(not_available)?;
    check_no_accepted_overlap(acc, &range)?;

    let event = Event::ReservationRequested {
        id,
        accommodation_id: acc.id,
        host_id: req.host_id,
        guest_id: req.guest_id,
        guest_count: req.guest_count,
        range,
    };
    Ok((event, window.price))
}

pub(crate) fn check_guest_count(guest_count: u32) -> Result<(), EngineError> {
    if guest_count == 0 {
        return Err(EngineError::invalid("guest count must be at least 1"));
    }
    if guest_count > MAX_GUEST_COUNT {
        return Err(EngineError::LimitExceeded("guest count too large"));
    }
    Ok(())
}

pub(crate) fn not_available() -> EngineError {
    EngineError::invalid("not available for this date range")
}

/// First host approval wins: the winner flips to `ACCEPTED` and every
/// overlapping pending competitor is declined in the same event. Returns the
/// event and the declined ids.
///
/// A pending request never overlaps an accepted stay while the cascade holds,
/// but a journal that disagrees with that is refused rather than double-booked.
pub(crate) fn plan_accept(acc: &AccommodationState, id: Ulid) -> Result<(Event, Vec<Ulid>), EngineError> {
    let reservation = acc.reservation(id).ok_or(EngineError::NotFound(id))?;
    match reservation.status {
        ReservationStatus::Pending => {}
        ReservationStatus::Accepted | ReservationStatus::Declined => {
            return Err(EngineError::NotFound(id));
        }
    }
    check_no_accepted_overlap(acc, &reservation.range)?;
    let declined = cascade_losers(acc, reservation);
    let event = Event::ReservationAccepted {
        id,
        accommodation_id: acc.id,
        declined: declined.clone(),
    };
    Ok((event, declined))
}

/// Host rejection of a pending request, or host cancellation of an upcoming
/// accepted stay.
pub(crate) fn plan_decline(acc: &AccommodationState, id: Ulid, now: Ms) -> Result<Event, EngineError> {
    let reservation = acc.reservation(id).ok_or(EngineError::NotFound(id))?;
    if reservation.is_terminal(now) {
        return Err(EngineError::NotFound(id));
    }
    Ok(Event::ReservationDeclined {
        id,
        accommodation_id: acc.id,
    })
}

/// Guest withdrawal, allowed until the cancellation cutoff.
pub(crate) fn plan_cancel(acc: &AccommodationState, id: Ulid, now: Ms) -> Result<Event, EngineError> {
    let reservation = acc.reservation(id).ok_or(EngineError::NotFound(id))?;
    match reservation.status {
        ReservationStatus::Pending | ReservationStatus::Accepted => {}
        ReservationStatus::Declined => return Err(EngineError::NotFound(id)),
    }
    check_cancel_cutoff(reservation, now)?;
    Ok(Event::ReservationCancelled {
        id,
        accommodation_id: acc.id,
    })
}
