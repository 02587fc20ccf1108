use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::SharedAccommodation;

/// In-memory record store: one lock-guarded [`AccommodationState`] per
/// accommodation plus reverse indices from window and reservation ids.
///
/// The per-accommodation `RwLock` is the transaction boundary. Callers hold the
/// write guard across check, journal append and [`BookingStore::apply_event`].
pub struct BookingStore {
    accommodations: DashMap<Ulid, SharedAccommodation>,
    window_to_accommodation: DashMap<Ulid, Ulid>,
    reservation_to_accommodation: DashMap<Ulid, Ulid>,
}

impl Default for BookingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingStore {
    pub fn new() -> Self {
        Self {
            accommodations: DashMap::new(),
            window_to_accommodation: DashMap::new(),
            reservation_to_accommodation: DashMap::new(),
        }
    }

    // ── Accommodations ───────────────────────────────────────

    pub fn accommodation_count(&self) -> usize {
        self.accommodations.len()
    }

    pub fn get(&self, id: &Ulid) -> Option<SharedAccommodation> {
        self.accommodations.get(id).map(|e| e.value().clone())
    }

    /// Accommodations come into existence with their first window.
    pub fn get_or_create(&self, id: Ulid) -> SharedAccommodation {
        self.accommodations
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(AccommodationState::new(id))))
            .value()
            .clone()
    }

    pub fn accommodation_ids(&self) -> Vec<Ulid> {
        self.accommodations.iter().map(|e| *e.key()).collect()
    }

    /// Snapshot of all handles, so callers never await while holding a shard lock.
    pub fn all(&self) -> Vec<SharedAccommodation> {
        self.accommodations.iter().map(|e| e.value().clone()).collect()
    }

    // ── Entity index ─────────────────────────────────────────

    pub fn accommodation_for_window(&self, window_id: &Ulid) -> Option<Ulid> {
        self.window_to_accommodation.get(window_id).map(|e| *e.value())
    }

    pub fn accommodation_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_accommodation
            .get(reservation_id)
            .map(|e| *e.value())
    }

    // ── Event application ────────────────────────────────────

    /// Apply a committed event. The caller holds the accommodation's write lock.
    pub fn apply_event(&self, acc: &mut AccommodationState, event: &Event) {
        match event {
            Event::WindowAdded {
                id,
                accommodation_id,
                price,
                range,
            } => {
                acc.insert_window(AvailabilityWindow {
                    id: *id,
                    accommodation_id: *accommodation_id,
                    price: *price,
                    range: *range,
                });
                self.window_to_accommodation.insert(*id, *accommodation_id);
            }
            Event::WindowEdited { id, range, .. } => {
                acc.set_window_range(*id, *range);
            }
            Event::ReservationRequested {
                id,
                accommodation_id,
                host_id,
                guest_id,
                guest_count,
                range,
            } => {
                acc.insert_reservation(Reservation {
                    id: *id,
                    accommodation_id: *accommodation_id,
                    host_id: *host_id,
                    guest_id: *guest_id,
                    guest_count: *guest_count,
                    range: *range,
                    status: ReservationStatus::Pending,
                });
                self.reservation_to_accommodation
                    .insert(*id, *accommodation_id);
            }
            Event::ReservationAccepted { id, declined, .. } => {
                set_status(acc, *id, ReservationStatus::Accepted);
                for loser in declined {
                    set_status(acc, *loser, ReservationStatus::Declined);
                }
            }
            Event::ReservationDeclined { id, .. } | Event::ReservationCancelled { id, .. } => {
                set_status(acc, *id, ReservationStatus::Declined);
            }
        }
    }
}

fn set_status(acc: &mut AccommodationState, id: Ulid, status: ReservationStatus) {
    if let Some(r) = acc.reservation_mut(id) {
        r.status = status;
    }
}
