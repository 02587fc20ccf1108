//! Availability windows: the host-owned, priced spans a reservation must fit in.
//!
//! The `plan_*` functions decide an operation against a locked
//! [`AccommodationState`] and return the single [`Event`] that commits it.
//! They never mutate; the engine journals and applies the event.

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::accepted_overlap;
use super::EngineError;

/// Windows overlapping `range`, optionally ignoring one (the window being edited).
pub fn find_overlapping<'a>(
    acc: &'a AccommodationState,
    range: &TimeRange,
    exclude: Option<Ulid>,
) -> Vec<&'a AvailabilityWindow> {
    acc.windows_overlapping(range)
        .filter(|w| Some(w.id) != exclude)
        .collect()
}

/// The window whose range fully contains `range`. `None` means "not bookable".
pub fn find_covering<'a>(
    acc: &'a AccommodationState,
    range: &TimeRange,
) -> Option<&'a AvailabilityWindow> {
    acc.covering_window(range)
}

pub(crate) fn plan_add_window(
    acc: &AccommodationState,
    id: Ulid,
    price: i64,
    range: TimeRange,
) -> Result<Event, EngineError> {
    if price < 0 {
        return Err(EngineError::invalid("price must not be negative"));
    }
    if acc.windows.len() >= MAX_WINDOWS_PER_ACCOMMODATION {
        return Err(EngineError::LimitExceeded("too many windows on accommodation"));
    }
    if let Some(other) = find_overlapping(acc, &range, None).first() {
        return Err(EngineError::Conflict(other.id));
    }
    Ok(Event::WindowAdded {
        id,
        accommodation_id: acc.id,
        price,
        range,
    })
}

/// An edit may not overlap a sibling window, may not overlap an accepted
/// reservation, and may not strand an upcoming accepted reservation that the
/// old range covered.
pub(crate) fn plan_edit_window(
    acc: &AccommodationState,
    window_id: Ulid,
    range: TimeRange,
    now: Ms,
) -> Result<Event, EngineError> {
    let window = acc.window(window_id).ok_or(EngineError::NotFound(window_id))?;

    if let Some(other) = find_overlapping(acc, &range, Some(window_id)).first() {
        return Err(EngineError::Conflict(other.id));
    }
    if let Some(booked) = accepted_overlap(acc, &range) {
        return Err(EngineError::Conflict(booked));
    }
    if let Some(stranded) = acc
        .reservations_overlapping(&window.range)
        .find(|r| r.is_active(now) && window.range.contains_range(&r.range))
    {
        return Err(EngineError::Conflict(stranded.id));
    }

    Ok(Event::WindowEdited {
        id: window_id,
        accommodation_id: acc.id,
        range,
    })
}
