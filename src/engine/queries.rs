use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::find_covering;
use super::conflict::{accepted_overlap, validate_range};
use super::{Engine, EngineError, ReservationFilter};

impl Engine {
    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let shared = self
            .store
            .accommodation_for_reservation(&id)
            .and_then(|acc_id| self.store.get(&acc_id))
            .ok_or(EngineError::NotFound(id))?;
        let guard = shared.read().await;
        guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Windows of one accommodation ordered by start. Unknown accommodations
    /// simply have none.
    pub async fn list_windows(&self, accommodation_id: Ulid) -> Vec<AvailabilityWindow> {
        match self.store.get(&accommodation_id) {
            Some(shared) => shared.read().await.windows.clone(),
            None => Vec::new(),
        }
    }

    /// Reservations matching `filter`, ordered by start then id.
    pub async fn find_reservations(&self, filter: &ReservationFilter) -> Vec<Reservation> {
        let handles = match filter.accommodation_id {
            Some(id) => self.store.get(&id).into_iter().collect(),
            None => self.store.all(),
        };

        let mut out = Vec::new();
        for shared in handles {
            let guard = shared.read().await;
            out.extend(guard.reservations.iter().filter(|r| filter.matches(r)).cloned());
        }
        out.sort_by_key(|r| (r.range.start, r.id));
        out
    }

    pub async fn pending_for_host(&self, host_id: Ulid) -> Vec<Reservation> {
        let filter = ReservationFilter::default()
            .host(host_id)
            .status(ReservationStatus::Pending);
        self.find_reservations(&filter).await
    }

    pub async fn pending_for_guest(&self, guest_id: Ulid) -> Vec<Reservation> {
        let filter = ReservationFilter::default()
            .guest(guest_id)
            .status(ReservationStatus::Pending);
        self.find_reservations(&filter).await
    }

    pub async fn pending_for_accommodation(&self, accommodation_id: Ulid) -> Vec<Reservation> {
        let filter = ReservationFilter::default()
            .accommodation(accommodation_id)
            .status(ReservationStatus::Pending);
        self.find_reservations(&filter).await
    }

    /// Accepted stays that have not ended yet.
    pub async fn active_for_host(&self, host_id: Ulid) -> Vec<Reservation> {
        let filter = ReservationFilter::default()
            .host(host_id)
            .status(ReservationStatus::Accepted)
            .ends_after(self.now_ms());
        self.find_reservations(&filter).await
    }

    pub async fn active_for_guest(&self, guest_id: Ulid) -> Vec<Reservation> {
        let filter = ReservationFilter::default()
            .guest(guest_id)
            .status(ReservationStatus::Accepted)
            .ends_after(self.now_ms());
        self.find_reservations(&filter).await
    }

    /// Batch availability check. Each `(accommodation, start, end)` yields a
    /// quote when a window covers the range and no accepted stay overlaps it;
    /// anything else is left out of the result.
    pub async fn quote_available(&self, requests: &[(Ulid, Ms, Ms)]) -> Result<Vec<Quote>, EngineError> {
        if requests.len() > MAX_QUOTE_IDS {
            return Err(EngineError::LimitExceeded("too many accommodations in quote"));
        }
        let ranges = requests
            .iter()
            .map(|&(id, start, end)| validate_range(start, end).map(|range| (id, range)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut quotes = Vec::new();
        for (accommodation_id, range) in ranges {
            let Some(shared) = self.store.get(&accommodation_id) else {
                continue;
            };
            let guard = shared.read().await;
            if accepted_overlap(&guard, &range).is_some() {
                continue;
            }
            if let Some(window) = find_covering(&guard, &range) {
                quotes.push(Quote {
                    accommodation_id,
                    price: window.price,
                });
            }
        }
        Ok(quotes)
    }
}
