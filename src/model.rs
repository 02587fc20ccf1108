use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Ms,
    pub end: Ms,
}

impl TimeRange {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_range(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Reservation lifecycle. `Declined` is terminal; `Accepted` becomes terminal
/// once its range has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Accepted,
    Declined,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Accepted => "accepted",
            ReservationStatus::Declined => "declined",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(ReservationStatus::Pending),
            "accepted" => Some(ReservationStatus::Accepted),
            "declined" => Some(ReservationStatus::Declined),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A priced span during which the host allows bookings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub id: Ulid,
    pub accommodation_id: Ulid,
    /// Minor currency units.
    pub price: i64,
    pub range: TimeRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub accommodation_id: Ulid,
    pub host_id: Ulid,
    pub guest_id: Ulid,
    pub guest_count: u32,
    pub range: TimeRange,
    pub status: ReservationStatus,
}

impl Reservation {
    pub fn is_terminal(&self, now: Ms) -> bool {
        match self.status {
            ReservationStatus::Pending => false,
            ReservationStatus::Accepted => self.range.end <= now,
            ReservationStatus::Declined => true,
        }
    }

    pub fn is_active(&self, now: Ms) -> bool {
        self.status == ReservationStatus::Accepted && self.range.end > now
    }
}

/// Everything the engine knows about one accommodation. Both lists are kept
/// sorted by `range.start`; windows are pairwise disjoint, reservations are not.
#[derive(Debug, Clone)]
pub struct AccommodationState {
    pub id: Ulid,
    pub windows: Vec<AvailabilityWindow>,
    pub reservations: Vec<Reservation>,
}

impl AccommodationState {
    pub fn new(id: Ulid) -> Self {
        Self {
            id,
            windows: Vec::new(),
            reservations: Vec::new(),
        }
    }

    // ── Windows ──────────────────────────────────────────────

    /// Insert window maintaining sort order by range.start.
    pub fn insert_window(&mut self, window: AvailabilityWindow) {
        let pos = self
            .windows
            .partition_point(|w| w.range.start < window.range.start);
        self.windows.insert(pos, window);
    }

    pub fn window(&self, id: Ulid) -> Option<&AvailabilityWindow> {
        self.windows.iter().find(|w| w.id == id)
    }

    /// Replace a window's range, re-sorting it into place.
    pub fn set_window_range(&mut self, id: Ulid, range: TimeRange) -> bool {
        let Some(pos) = self.windows.iter().position(|w| w.id == id) else {
            return false;
        };
        let mut window = self.windows.remove(pos);
        window.range = range;
        self.insert_window(window);
        true
    }

    /// Windows whose range overlaps `query`.
    pub fn windows_overlapping(&self, query: &TimeRange) -> impl Iterator<Item = &AvailabilityWindow> {
        let right_bound = self.windows.partition_point(|w| w.range.start < query.end);
        self.windows[..right_bound]
            .iter()
            .filter(move |w| w.range.end > query.start)
    }

    /// The window that fully contains `query`, if any. Windows are disjoint, so
    /// at most one can.
    pub fn covering_window(&self, query: &TimeRange) -> Option<&AvailabilityWindow> {
        // Last window starting at or before query.start is the only candidate.
        let idx = self.windows.partition_point(|w| w.range.start <= query.start);
        if idx == 0 {
            return None;
        }
        let candidate = &self.windows[idx - 1];
        candidate.range.contains_range(query).then_some(candidate)
    }

    // ── Reservations ─────────────────────────────────────────

    /// Insert reservation maintaining sort order by range.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.range.start <= reservation.range.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Reservations (any status) whose range overlaps `query`.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn reservations_overlapping(&self, query: &TimeRange) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.range.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.range.end > query.start)
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
/// Every committed engine operation is exactly one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    WindowAdded {
        id: Ulid,
        accommodation_id: Ulid,
        price: i64,
        range: TimeRange,
    },
    WindowEdited {
        id: Ulid,
        accommodation_id: Ulid,
        range: TimeRange,
    },
    ReservationRequested {
        id: Ulid,
        accommodation_id: Ulid,
        host_id: Ulid,
        guest_id: Ulid,
        guest_count: u32,
        range: TimeRange,
    },
    /// Acceptance and its cascade travel together so they commit as one record.
    ReservationAccepted {
        id: Ulid,
        accommodation_id: Ulid,
        declined: Vec<Ulid>,
    },
    ReservationDeclined {
        id: Ulid,
        accommodation_id: Ulid,
    },
    ReservationCancelled {
        id: Ulid,
        accommodation_id: Ulid,
    },
}

impl Event {
    pub fn accommodation_id(&self) -> Ulid {
        match self {
            Event::WindowAdded { accommodation_id, .. }
            | Event::WindowEdited { accommodation_id, .. }
            | Event::ReservationRequested { accommodation_id, .. }
            | Event::ReservationAccepted { accommodation_id, .. }
            | Event::ReservationDeclined { accommodation_id, .. }
            | Event::ReservationCancelled { accommodation_id, .. } => *accommodation_id,
        }
    }
}

// ── Operation inputs and results ─────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveRequest {
    pub accommodation_id: Ulid,
    pub guest_id: Ulid,
    pub host_id: Ulid,
    pub guest_count: u32,
    pub start: Ms,
    pub end: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReserveReceipt {
    pub id: Ulid,
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptOutcome {
    pub id: Ulid,
    /// Pending reservations that lost the slot.
    pub declined: Vec<Ulid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub accommodation_id: Ulid,
    pub price: i64,
}
