use tokio::sync::oneshot;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::availability::{plan_add_window, plan_edit_window};
use super::conflict::validate_range;
use super::reservations::{not_available, plan_accept, plan_cancel, plan_decline, plan_reserve};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Publish a priced window. The accommodation is created on its first window.
    pub async fn add_availability(
        &self,
        accommodation_id: Ulid,
        price: i64,
        start: Ms,
        end: Ms,
    ) -> Result<Ulid, EngineError> {
        let range = validate_range(start, end)?;
        let gate = tokio::time::timeout(self.lock_timeout, self.compaction_gate.clone().read_owned())
            .await
            .map_err(|_| EngineError::Timeout)?;

        let shared = match self.store.get(&accommodation_id) {
            Some(shared) => shared,
            None => {
                if self.store.accommodation_count() >= MAX_ACCOMMODATIONS {
                    return Err(EngineError::LimitExceeded("too many accommodations"));
                }
                self.store.get_or_create(accommodation_id)
            }
        };
        let guard = self.lock(shared).await?;

        let id = Ulid::new();
        let event = plan_add_window(&guard, id, price, range)?;
        self.persist_and_apply(guard, event, Some(gate)).await?;
        info!(window = %id, accommodation = %accommodation_id, price, "window added");
        Ok(id)
    }

    pub async fn edit_availability(&self, window_id: Ulid, start: Ms, end: Ms) -> Result<(), EngineError> {
        let range = validate_range(start, end)?;
        let guard = self.lock_for_window(window_id).await?;
        let now = self.now_ms();
        let event = plan_edit_window(&guard, window_id, range, now)?;
        self.persist_and_apply(guard, event, None).await?;
        info!(window = %window_id, start, end, "window edited");
        Ok(())
    }

    /// Request a stay. The new reservation is `PENDING` and priced from the
    /// covering window.
    pub async fn reserve(&self, req: ReserveRequest) -> Result<ReserveReceipt, EngineError> {
        let range = validate_range(req.start, req.end)?;
        let id = Ulid::new();

        let Some(shared) = self.store.get(&req.accommodation_id) else {
            // Nothing is published for this accommodation: run the same checks
            // against an empty one so the failure matches a known accommodation.
            let empty = AccommodationState::new(req.accommodation_id);
            plan_reserve(&empty, id, &req, range, self.now_ms())?;
            return Err(not_available());
        };
        let guard = self.lock(shared).await?;
        let now = self.now_ms();
        let (event, price) = plan_reserve(&guard, id, &req, range, now)?;
        self.persist_and_apply(guard, event, None).await?;

        metrics::counter!(observability::RESERVATIONS_REQUESTED_TOTAL).increment(1);
        info!(
            reservation = %id,
            accommodation = %req.accommodation_id,
            guest = %req.guest_id,
            price,
            "reservation requested"
        );
        Ok(ReserveReceipt { id, price })
    }

    /// Host approval. Overlapping pending requests are declined in the same commit.
    pub async fn accept(&self, id: Ulid) -> Result<AcceptOutcome, EngineError> {
        let guard = self.lock_for_reservation(id).await?;
        let (event, declined) = plan_accept(&guard, id)?;
        self.persist_and_apply(guard, event, None).await?;

        metrics::counter!(observability::RESERVATIONS_ACCEPTED_TOTAL).increment(1);
        metrics::counter!(observability::RESERVATIONS_CASCADE_DECLINED_TOTAL)
            .increment(declined.len() as u64);
        info!(reservation = %id, cascade_declined = declined.len(), "reservation accepted");
        Ok(AcceptOutcome { id, declined })
    }

    pub async fn decline(&self, id: Ulid) -> Result<(), EngineError> {
        let guard = self.lock_for_reservation(id).await?;
        let now = self.now_ms();
        let event = plan_decline(&guard, id, now)?;
        self.persist_and_apply(guard, event, None).await?;
        metrics::counter!(observability::RESERVATIONS_DECLINED_TOTAL).increment(1);
        info!(reservation = %id, "reservation declined");
        Ok(())
    }

    pub async fn cancel_by_guest(&self, id: Ulid) -> Result<(), EngineError> {
        let guard = self.lock_for_reservation(id).await?;
        let now = self.now_ms();
        let event = plan_cancel(&guard, id, now)?;
        self.persist_and_apply(guard, event, None).await?;
        metrics::counter!(observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
        info!(reservation = %id, "reservation cancelled by guest");
        Ok(())
    }

    /// Rewrite the WAL as the shortest event sequence that rebuilds the current
    /// state. Declined reservations are kept.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;

        // Read guards stay held until the compacted file is in place, so no
        // append can land in the old file after its state was snapshotted.
        let mut guards = Vec::new();
        for shared in self.store.all() {
            guards.push(shared.read_owned().await);
        }

        let mut events = Vec::new();
        for acc in &guards {
            for w in &acc.windows {
                events.push(Event::WindowAdded {
                    id: w.id,
                    accommodation_id: acc.id,
                    price: w.price,
                    range: w.range,
                });
            }
            for r in &acc.reservations {
                events.push(Event::ReservationRequested {
                    id: r.id,
                    accommodation_id: acc.id,
                    host_id: r.host_id,
                    guest_id: r.guest_id,
                    guest_count: r.guest_count,
                    range: r.range,
                });
                match r.status {
                    ReservationStatus::Pending => {}
                    ReservationStatus::Accepted => events.push(Event::ReservationAccepted {
                        id: r.id,
                        accommodation_id: acc.id,
                        declined: Vec::new(),
                    }),
                    ReservationStatus::Declined => events.push(Event::ReservationDeclined {
                        id: r.id,
                        accommodation_id: acc.id,
                    }),
                }
            }
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Internal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Internal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Internal(format!("WAL compaction: {e}")))?;

        metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!(events = count, accommodations = guards.len(), "WAL compacted");
        Ok(())
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
