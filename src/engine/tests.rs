use super::*;
use crate::clock::ManualClock;
use crate::limits::*;

const M: Ms = 60_000; // 1 minute in ms
const H: Ms = 60 * M;
const DAY: Ms = 24 * H;
const NOW: Ms = 1_800_000_000_000;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("roomkeep_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn options(clock: &Arc<ManualClock>) -> EngineOptions {
    EngineOptions {
        clock: clock.clone(),
        lock_timeout: DEFAULT_LOCK_TIMEOUT,
    }
}

fn test_engine(name: &str) -> (Engine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(NOW));
    let engine = Engine::with_options(test_wal_path(name), options(&clock)).unwrap();
    (engine, clock)
}

fn day(n: i64) -> Ms {
    NOW + n * DAY
}

fn request(accommodation_id: Ulid, start: Ms, end: Ms) -> ReserveRequest {
    ReserveRequest {
        accommodation_id,
        guest_id: Ulid::new(),
        host_id: Ulid::new(),
        guest_count: 2,
        start,
        end,
    }
}

async fn status_of(engine: &Engine, id: Ulid) -> ReservationStatus {
    engine.get_reservation(id).await.unwrap().status
}

/// One accommodation with a single window `[day1, day10)` priced at 100.
async fn listed(engine: &Engine) -> (Ulid, Ulid) {
    let acc = Ulid::new();
    let window = engine.add_availability(acc, 100, day(1), day(10)).await.unwrap();
    (acc, window)
}

// ── Availability ─────────────────────────────────────────

#[tokio::test]
async fn add_availability_rejects_overlap_allows_touching() {
    let (engine, _) = test_engine("add_overlap.wal");
    let (acc, window) = listed(&engine).await;

    let result = engine.add_availability(acc, 80, day(9), day(12)).await;
    assert!(matches!(result, Err(EngineError::Conflict(id)) if id == window));

    engine.add_availability(acc, 80, day(10), day(12)).await.unwrap();
    // Another accommodation's windows are independent.
    engine.add_availability(Ulid::new(), 80, day(1), day(10)).await.unwrap();

    assert_eq!(engine.list_windows(acc).await.len(), 2);
}

#[tokio::test]
async fn add_availability_validates_input() {
    let (engine, _) = test_engine("add_invalid.wal");
    let acc = Ulid::new();

    let inverted = engine.add_availability(acc, 100, day(3), day(2)).await;
    assert!(matches!(inverted, Err(EngineError::InvalidArgument(_))));

    let empty = engine.add_availability(acc, 100, day(3), day(3)).await;
    assert!(matches!(empty, Err(EngineError::InvalidArgument(_))));

    let negative = engine.add_availability(acc, -5, day(1), day(2)).await;
    assert!(matches!(negative, Err(EngineError::InvalidArgument(_))));

    let ancient = engine.add_availability(acc, 100, 0, 1_000).await;
    assert!(matches!(ancient, Err(EngineError::LimitExceeded(_))));

    assert!(engine.list_windows(acc).await.is_empty());
}

#[tokio::test]
async fn edit_availability_moves_window() {
    let (engine, _) = test_engine("edit_moves.wal");
    let (acc, window) = listed(&engine).await;

    engine.edit_availability(window, day(2), day(20)).await.unwrap();
    let windows = engine.list_windows(acc).await;
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].range, TimeRange::new(day(2), day(20)));
    assert_eq!(windows[0].price, 100);
}

#[tokio::test]
async fn edit_unknown_window_not_found() {
    let (engine, _) = test_engine("edit_unknown.wal");
    let missing = Ulid::new();
    let result = engine.edit_availability(missing, day(1), day(2)).await;
    assert!(matches!(result, Err(EngineError::NotFound(id)) if id == missing));
}

#[tokio::test]
async fn edit_ignores_pending_but_not_accepted() {
    let (engine, _) = test_engine("edit_pending.wal");
    let (acc, window) = listed(&engine).await;

    engine.reserve(request(acc, day(2), day(4))).await.unwrap();
    engine.edit_availability(window, day(1), day(3)).await.unwrap();

    let (acc, window) = listed(&engine).await;
    let booked = engine.reserve(request(acc, day(2), day(4))).await.unwrap();
    engine.accept(booked.id).await.unwrap();
    let result = engine.edit_availability(window, day(1), day(3)).await;
    assert!(matches!(result, Err(EngineError::Conflict(id)) if id == booked.id));
}

// ── Reserve ──────────────────────────────────────────────

#[tokio::test]
async fn reserve_creates_pending_priced_from_window() {
    let (engine, _) = test_engine("reserve_pending.wal");
    let (acc, _) = listed(&engine).await;

    let req = request(acc, day(2), day(4));
    let receipt = engine.reserve(req.clone()).await.unwrap();
    assert_eq!(receipt.price, 100);

    let r = engine.get_reservation(receipt.id).await.unwrap();
    assert_eq!(r.status, ReservationStatus::Pending);
    assert_eq!(r.accommodation_id, acc);
    assert_eq!(r.guest_id, req.guest_id);
    assert_eq!(r.host_id, req.host_id);
    assert_eq!(r.guest_count, 2);
    assert_eq!(r.range, TimeRange::new(day(2), day(4)));
}

#[tokio::test]
async fn reserve_start_must_be_strictly_in_future() {
    let (engine, clock) = test_engine("reserve_future.wal");
    let (acc, _) = listed(&engine).await;

    clock.set(day(2));
    let at_now = engine.reserve(request(acc, day(2), day(3))).await;
    assert!(matches!(at_now, Err(EngineError::InvalidArgument(_))));

    engine.reserve(request(acc, day(2) + 1, day(3))).await.unwrap();
}

#[tokio::test]
async fn reserve_inverted_range_invalid() {
    let (engine, _) = test_engine("reserve_inverted.wal");
    let (acc, _) = listed(&engine).await;
    let result = engine.reserve(request(acc, day(4), day(2))).await;
    assert!(matches!(result, Err(EngineError::InvalidArgument(m)) if m == "end must be after start"));
}

#[tokio::test]
async fn reserve_without_covering_window_not_available() {
    let (engine, _) = test_engine("reserve_uncovered.wal");
    let (acc, _) = listed(&engine).await;

    let spills_over = engine.reserve(request(acc, day(9), day(11))).await;
    assert!(matches!(
        spills_over,
        Err(EngineError::InvalidArgument(m)) if m == "not available for this date range"
    ));

    let unknown = engine.reserve(request(Ulid::new(), day(2), day(3))).await;
    assert!(matches!(
        unknown,
        Err(EngineError::InvalidArgument(m)) if m == "not available for this date range"
    ));
}

#[tokio::test]
async fn reserve_does_not_span_adjacent_windows() {
    let (engine, _) = test_engine("reserve_adjacent.wal");
    let (acc, _) = listed(&engine).await;
    engine.add_availability(acc, 150, day(10), day(20)).await.unwrap();

    let result = engine.reserve(request(acc, day(9), day(11))).await;
    assert!(matches!(result, Err(EngineError::InvalidArgument(_))));

    let second = engine.reserve(request(acc, day(10), day(11))).await.unwrap();
    assert_eq!(second.price, 150);
}

#[tokio::test]
async fn reserve_pending_overlap_allowed_accepted_overlap_rejected() {
    let (engine, _) = test_engine("reserve_overlap.wal");
    let (acc, _) = listed(&engine).await;

    let first = engine.reserve(request(acc, day(2), day(4))).await.unwrap();
    engine.reserve(request(acc, day(3), day(5))).await.unwrap();

    engine.accept(first.id).await.unwrap();
    let result = engine.reserve(request(acc, day(3), day(6))).await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(id)) if id == first.id));

    // Touching the accepted stay is fine.
    engine.reserve(request(acc, day(4), day(6))).await.unwrap();
}

#[tokio::test]
async fn reserve_rejects_bad_guest_count() {
    let (engine, _) = test_engine("reserve_guests.wal");
    let (acc, _) = listed(&engine).await;

    let mut zero = request(acc, day(2), day(3));
    zero.guest_count = 0;
    assert!(matches!(engine.reserve(zero).await, Err(EngineError::InvalidArgument(_))));

    let mut crowd = request(acc, day(2), day(3));
    crowd.guest_count = MAX_GUEST_COUNT + 1;
    assert!(matches!(engine.reserve(crowd).await, Err(EngineError::LimitExceeded(_))));
}

// ── Accept / decline ─────────────────────────────────────

#[tokio::test]
async fn accept_declines_overlapping_pending_in_same_commit() {
    let (engine, _) = test_engine("accept_cascade.wal");
    let (acc, _) = listed(&engine).await;

    let r = engine.reserve(request(acc, day(3), day(6))).await.unwrap();
    let p1 = engine.reserve(request(acc, day(2), day(4))).await.unwrap();
    let p2 = engine.reserve(request(acc, day(5), day(7))).await.unwrap();
    let touching = engine.reserve(request(acc, day(6), day(8))).await.unwrap();
    let appends_before = engine.wal_appends_since_compact().await;

    let outcome = engine.accept(r.id).await.unwrap();
    assert_eq!(outcome.id, r.id);
    let mut declined = outcome.declined.clone();
    declined.sort();
    let mut expected = vec![p1.id, p2.id];
    expected.sort();
    assert_eq!(declined, expected);

    assert_eq!(engine.wal_appends_since_compact().await, appends_before + 1);
    assert_eq!(status_of(&engine, r.id).await, ReservationStatus::Accepted);
    assert_eq!(status_of(&engine, p1.id).await, ReservationStatus::Declined);
    assert_eq!(status_of(&engine, p2.id).await, ReservationStatus::Declined);
    assert_eq!(status_of(&engine, touching.id).await, ReservationStatus::Pending);
}

#[tokio::test]
async fn accept_requires_pending() {
    let (engine, _) = test_engine("accept_twice.wal");
    let (acc, _) = listed(&engine).await;
    let r = engine.reserve(request(acc, day(2), day(4))).await.unwrap();

    engine.accept(r.id).await.unwrap();
    assert!(matches!(engine.accept(r.id).await, Err(EngineError::NotFound(_))));

    let declined = engine.reserve(request(acc, day(5), day(6))).await.unwrap();
    engine.decline(declined.id).await.unwrap();
    assert!(matches!(engine.accept(declined.id).await, Err(EngineError::NotFound(_))));

    let missing = Ulid::new();
    assert!(matches!(engine.accept(missing).await, Err(EngineError::NotFound(id)) if id == missing));
}

#[tokio::test]
async fn decline_pending_and_accepted() {
    let (engine, _) = test_engine("decline.wal");
    let (acc, _) = listed(&engine).await;

    let pending = engine.reserve(request(acc, day(2), day(3))).await.unwrap();
    engine.decline(pending.id).await.unwrap();
    assert_eq!(status_of(&engine, pending.id).await, ReservationStatus::Declined);
    assert!(matches!(engine.decline(pending.id).await, Err(EngineError::NotFound(_))));

    // Host cancellation of an accepted stay frees the range.
    let stay = engine.reserve(request(acc, day(4), day(6))).await.unwrap();
    engine.accept(stay.id).await.unwrap();
    engine.decline(stay.id).await.unwrap();
    assert_eq!(status_of(&engine, stay.id).await, ReservationStatus::Declined);
    engine.reserve(request(acc, day(4), day(6))).await.unwrap();
}

#[tokio::test]
async fn decline_finished_stay_not_found() {
    let (engine, clock) = test_engine("decline_finished.wal");
    let (acc, _) = listed(&engine).await;
    let stay = engine.reserve(request(acc, day(2), day(3))).await.unwrap();
    engine.accept(stay.id).await.unwrap();

    clock.set(day(3));
    assert!(matches!(engine.decline(stay.id).await, Err(EngineError::NotFound(_))));
    assert_eq!(status_of(&engine, stay.id).await, ReservationStatus::Accepted);
}

// ── Guest cancellation ───────────────────────────────────

#[tokio::test]
async fn cancel_cutoff_boundaries() {
    let (engine, clock) = test_engine("cancel_cutoff.wal");
    let (acc, _) = listed(&engine).await;
    let start = day(5);
    let r = engine.reserve(request(acc, start, day(7))).await.unwrap();

    clock.set(start - (23 * H + 59 * M));
    let result = engine.cancel_by_guest(r.id).await;
    assert!(matches!(result, Err(EngineError::InvalidArgument(m)) if m == "cannot cancel within cutoff"));

    clock.set(start - 24 * H);
    assert!(matches!(
        engine.cancel_by_guest(r.id).await,
        Err(EngineError::InvalidArgument(_))
    ));
    assert_eq!(status_of(&engine, r.id).await, ReservationStatus::Pending);

    clock.set(start - (24 * H + M));
    engine.cancel_by_guest(r.id).await.unwrap();
    assert_eq!(status_of(&engine, r.id).await, ReservationStatus::Declined);
}

#[tokio::test]
async fn cancel_accepted_frees_range() {
    let (engine, _) = test_engine("cancel_accepted.wal");
    let (acc, _) = listed(&engine).await;
    let r = engine.reserve(request(acc, day(5), day(7))).await.unwrap();
    engine.accept(r.id).await.unwrap();

    engine.cancel_by_guest(r.id).await.unwrap();
    assert!(matches!(engine.cancel_by_guest(r.id).await, Err(EngineError::NotFound(_))));
    engine.reserve(request(acc, day(5), day(7))).await.unwrap();
}

#[tokio::test]
async fn cancel_unknown_not_found() {
    let (engine, _) = test_engine("cancel_unknown.wal");
    let result = engine.cancel_by_guest(Ulid::new()).await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

// ── End-to-end scenario ──────────────────────────────────

#[tokio::test]
async fn booking_scenario() {
    let (engine, _) = test_engine("scenario.wal");
    let (acc, window) = listed(&engine).await;

    let g1 = engine.reserve(request(acc, day(2), day(4))).await.unwrap();
    let g2 = engine.reserve(request(acc, day(3), day(5))).await.unwrap();
    assert_eq!(status_of(&engine, g1.id).await, ReservationStatus::Pending);
    assert_eq!(status_of(&engine, g2.id).await, ReservationStatus::Pending);

    let outcome = engine.accept(g1.id).await.unwrap();
    assert_eq!(outcome.declined, vec![g2.id]);
    assert_eq!(status_of(&engine, g2.id).await, ReservationStatus::Declined);

    let g3 = engine.reserve(request(acc, day(2), day(4))).await;
    assert!(matches!(g3, Err(EngineError::AlreadyExists(id)) if id == g1.id));

    let edit = engine.edit_availability(window, day(1), day(3)).await;
    assert!(matches!(edit, Err(EngineError::Conflict(_))));
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn pending_and_active_queries() {
    let (engine, clock) = test_engine("queries.wal");
    let (acc, _) = listed(&engine).await;
    let host = Ulid::new();
    let guest = Ulid::new();

    let mut early = request(acc, day(2), day(3));
    early.host_id = host;
    early.guest_id = guest;
    let mut late = request(acc, day(5), day(6));
    late.host_id = host;
    let mut other_host = request(acc, day(7), day(8));
    other_host.guest_id = guest;

    let early = engine.reserve(early).await.unwrap();
    let late = engine.reserve(late).await.unwrap();
    let other = engine.reserve(other_host).await.unwrap();

    let ids = |rs: Vec<Reservation>| rs.into_iter().map(|r| r.id).collect::<Vec<_>>();
    assert_eq!(ids(engine.pending_for_host(host).await), vec![early.id, late.id]);
    assert_eq!(ids(engine.pending_for_guest(guest).await), vec![early.id, other.id]);
    assert_eq!(
        ids(engine.pending_for_accommodation(acc).await),
        vec![early.id, late.id, other.id]
    );
    assert!(engine.active_for_host(host).await.is_empty());

    engine.accept(early.id).await.unwrap();
    engine.accept(late.id).await.unwrap();
    assert_eq!(ids(engine.active_for_host(host).await), vec![early.id, late.id]);
    assert_eq!(ids(engine.active_for_guest(guest).await), vec![early.id]);
    assert_eq!(ids(engine.pending_for_host(host).await), Vec::<Ulid>::new());

    // A stay stops being active the moment it ends.
    clock.set(day(3));
    assert_eq!(ids(engine.active_for_host(host).await), vec![late.id]);
    assert!(engine.active_for_guest(guest).await.is_empty());
}

#[tokio::test]
async fn find_reservations_by_overlap() {
    let (engine, _) = test_engine("find_overlap.wal");
    let (acc, _) = listed(&engine).await;
    let a = engine.reserve(request(acc, day(2), day(4))).await.unwrap();
    engine.reserve(request(acc, day(6), day(8))).await.unwrap();

    let filter = ReservationFilter::default()
        .accommodation(acc)
        .overlapping(TimeRange::new(day(3), day(6)));
    let found = engine.find_reservations(&filter).await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, a.id);
}

#[tokio::test]
async fn get_reservation_unknown_not_found() {
    let (engine, _) = test_engine("get_unknown.wal");
    let missing = Ulid::new();
    let result = engine.get_reservation(missing).await;
    assert!(matches!(result, Err(EngineError::NotFound(id)) if id == missing));
    assert!(engine.list_windows(Ulid::new()).await.is_empty());
}

#[tokio::test]
async fn quote_available_filters_unbookable() {
    let (engine, _) = test_engine("quote.wal");
    let (free, _) = listed(&engine).await;
    let (booked, _) = listed(&engine).await;
    let (short, _) = listed(&engine).await;
    engine.edit_availability(
        engine.list_windows(short).await[0].id,
        day(1),
        day(3),
    )
    .await
    .unwrap();

    let stay = engine.reserve(request(booked, day(4), day(5))).await.unwrap();
    engine.accept(stay.id).await.unwrap();

    let ask = |id| (id, day(2), day(6));
    let quotes = engine
        .quote_available(&[ask(free), ask(booked), ask(short), ask(Ulid::new())])
        .await
        .unwrap();
    assert_eq!(
        quotes,
        vec![Quote {
            accommodation_id: free,
            price: 100
        }]
    );
}

#[tokio::test]
async fn quote_available_limits_batch() {
    let (engine, _) = test_engine("quote_limit.wal");
    let requests: Vec<_> = (0..=MAX_QUOTE_IDS)
        .map(|_| (Ulid::new(), day(1), day(2)))
        .collect();
    let result = engine.quote_available(&requests).await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));

    let bad = engine.quote_available(&[(Ulid::new(), day(2), day(1))]).await;
    assert!(matches!(bad, Err(EngineError::InvalidArgument(_))));
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_accepts_exactly_one_wins() {
    let (engine, _) = test_engine("concurrent_accept.wal");
    let engine = Arc::new(engine);
    let (acc, _) = listed(&engine).await;

    let mut ids = Vec::new();
    for i in 0..16 {
        let r = engine
            .reserve(request(acc, day(2) + i * H, day(4) + i * H))
            .await
            .unwrap();
        ids.push(r.id);
    }

    let mut handles = Vec::new();
    for id in ids.clone() {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move { eng.accept(id).await }));
    }
    let mut winners = Vec::new();
    for h in handles {
        match h.await.unwrap() {
            Ok(outcome) => winners.push(outcome),
            Err(EngineError::NotFound(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    // All sixteen ranges share [day2 + 15h, day4), so only one can win.
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].declined.len(), ids.len() - 1);
    let accepted = engine
        .find_reservations(&ReservationFilter::default().status(ReservationStatus::Accepted))
        .await;
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].id, winners[0].id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reserve_and_accept_never_double_book() {
    let (engine, _) = test_engine("concurrent_reserve.wal");
    let engine = Arc::new(engine);
    let (acc, _) = listed(&engine).await;
    let seed = engine.reserve(request(acc, day(2), day(4))).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..32 {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            if let Ok(r) = eng.reserve(request(acc, day(3), day(5))).await {
                let _ = eng.accept(r.id).await;
            }
        }));
    }
    let eng = engine.clone();
    handles.push(tokio::spawn(async move {
        let _ = eng.accept(seed.id).await;
    }));
    for h in handles {
        h.await.unwrap();
    }

    let accepted = engine
        .find_reservations(
            &ReservationFilter::default()
                .accommodation(acc)
                .status(ReservationStatus::Accepted),
        )
        .await;
    for (i, a) in accepted.iter().enumerate() {
        for b in &accepted[i + 1..] {
            assert!(!a.range.overlaps(&b.range), "{} and {} both accepted", a.id, b.id);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_windows_exactly_one_wins() {
    let (engine, _) = test_engine("concurrent_add.wal");
    let engine = Arc::new(engine);
    let acc = Ulid::new();

    let mut handles = Vec::new();
    for i in 0..16 {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.add_availability(acc, 100 + i, day(1) + i * H, day(5) + i * H).await
        }));
    }

    let mut won = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => won += 1,
            Err(EngineError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(engine.list_windows(acc).await.len(), 1);
    assert_eq!(engine.wal_appends_since_compact().await, 1);
}

#[tokio::test]
async fn lock_timeout_writes_nothing() {
    let path = test_wal_path("lock_timeout.wal");
    let clock = Arc::new(ManualClock::new(NOW));
    let engine = Engine::with_options(
        path,
        EngineOptions {
            clock,
            lock_timeout: Duration::from_millis(20),
        },
    )
    .unwrap();
    let (acc, _) = listed(&engine).await;
    let appends = engine.wal_appends_since_compact().await;

    let held = engine.store.get(&acc).unwrap().write_owned().await;
    let result = engine.reserve(request(acc, day(2), day(3))).await;
    assert!(matches!(result, Err(EngineError::Timeout)));
    assert_eq!(engine.wal_appends_since_compact().await, appends);
    drop(held);

    engine.reserve(request(acc, day(2), day(3))).await.unwrap();
}

// ── Journal replay and compaction ────────────────────────

#[tokio::test]
async fn replay_restores_statuses() {
    let path = test_wal_path("replay.wal");
    let clock = Arc::new(ManualClock::new(NOW));

    let (acc, window, winner, loser, cancelled) = {
        let engine = Engine::with_options(path.clone(), options(&clock)).unwrap();
        let (acc, window) = listed(&engine).await;
        engine.edit_availability(window, day(1), day(9)).await.unwrap();
        let winner = engine.reserve(request(acc, day(2), day(4))).await.unwrap();
        let loser = engine.reserve(request(acc, day(3), day(5))).await.unwrap();
        let cancelled = engine.reserve(request(acc, day(6), day(7))).await.unwrap();
        engine.accept(winner.id).await.unwrap();
        engine.cancel_by_guest(cancelled.id).await.unwrap();
        (acc, window, winner.id, loser.id, cancelled.id)
    };

    let engine = Engine::with_options(path, options(&clock)).unwrap();
    let windows = engine.list_windows(acc).await;
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].id, window);
    assert_eq!(windows[0].range, TimeRange::new(day(1), day(9)));
    assert_eq!(status_of(&engine, winner).await, ReservationStatus::Accepted);
    assert_eq!(status_of(&engine, loser).await, ReservationStatus::Declined);
    assert_eq!(status_of(&engine, cancelled).await, ReservationStatus::Declined);

    // Rebuilt indices still resolve ids to their accommodation.
    let again = engine.reserve(request(acc, day(3), day(5))).await;
    assert!(matches!(again, Err(EngineError::AlreadyExists(id)) if id == winner));
}

#[tokio::test]
async fn compact_wal_preserves_state_and_audit_trail() {
    let path = test_wal_path("compact.wal");
    let clock = Arc::new(ManualClock::new(NOW));

    let (acc, winner, declined) = {
        let engine = Engine::with_options(path.clone(), options(&clock)).unwrap();
        let (acc, window) = listed(&engine).await;

        // Churn: repeated edits collapse to one window event.
        for i in 0..20 {
            engine.edit_availability(window, day(1), day(10) + i).await.unwrap();
        }
        let winner = engine.reserve(request(acc, day(2), day(4))).await.unwrap();
        let declined = engine.reserve(request(acc, day(3), day(5))).await.unwrap();
        engine.accept(winner.id).await.unwrap();

        let before = engine.find_reservations(&ReservationFilter::default()).await;
        let size_before = std::fs::metadata(&path).unwrap().len();
        engine.compact_wal().await.unwrap();
        let size_after = std::fs::metadata(&path).unwrap().len();
        assert!(size_after < size_before, "compacted {size_after} >= original {size_before}");
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(engine.find_reservations(&ReservationFilter::default()).await, before);

        // Appends after compaction land in the new file.
        engine.add_availability(acc, 300, day(20), day(30)).await.unwrap();
        (acc, winner.id, declined.id)
    };

    let engine = Engine::with_options(path, options(&clock)).unwrap();
    let windows = engine.list_windows(acc).await;
    assert_eq!(windows.len(), 2);
    assert_eq!(windows[0].range, TimeRange::new(day(1), day(10) + 19));
    assert_eq!(windows[1].price, 300);
    assert_eq!(status_of(&engine, winner).await, ReservationStatus::Accepted);
    assert_eq!(status_of(&engine, declined).await, ReservationStatus::Declined);
}

#[tokio::test]
async fn wal_appends_since_compact_counts_commits() {
    let (engine, _) = test_engine("appends_counter.wal");
    assert_eq!(engine.wal_appends_since_compact().await, 0);

    let (acc, _) = listed(&engine).await;
    let r = engine.reserve(request(acc, day(2), day(3))).await.unwrap();
    engine.accept(r.id).await.unwrap();
    // Rejected operations journal nothing.
    let _ = engine.accept(r.id).await;

    assert_eq!(engine.wal_appends_since_compact().await, 3);
}

// ── Commit durability ────────────────────────────────────

#[tokio::test]
async fn abandoned_operations_keep_memory_and_journal_in_step() {
    let path = test_wal_path("abandoned.wal");
    let clock = Arc::new(ManualClock::new(NOW));
    let engine = Engine::with_options(path.clone(), options(&clock)).unwrap();
    let (acc, _) = listed(&engine).await;

    // The callers give up immediately; whatever was journaled must also be
    // visible in memory.
    let _ = tokio::time::timeout(Duration::ZERO, engine.reserve(request(acc, day(2), day(4)))).await;
    let second = engine.reserve(request(acc, day(3), day(5))).await.unwrap();
    let _ = tokio::time::timeout(Duration::ZERO, engine.accept(second.id)).await;

    let all = ReservationFilter::default().accommodation(acc);
    let live = engine.find_reservations(&all).await;
    assert_eq!(live.len(), 2);
    let first = live.iter().find(|r| r.id != second.id).unwrap().id;
    assert_eq!(status_of(&engine, second.id).await, ReservationStatus::Accepted);
    assert_eq!(status_of(&engine, first).await, ReservationStatus::Declined);

    let replayed = Engine::with_options(path, options(&clock)).unwrap();
    assert_eq!(replayed.find_reservations(&all).await, live);
    assert!(matches!(replayed.accept(first).await, Err(EngineError::NotFound(_))));

    let accepted = replayed
        .find_reservations(&all.clone().status(ReservationStatus::Accepted))
        .await;
    assert_eq!(accepted.len(), 1);
}

#[tokio::test]
async fn journal_failure_is_internal_and_leaves_state_untouched() {
    let (mut engine, _) = test_engine("journal_failure.wal");
    let (acc, _) = listed(&engine).await;
    let winner = engine.reserve(request(acc, day(2), day(4))).await.unwrap();
    let loser = engine.reserve(request(acc, day(3), day(5))).await.unwrap();

    let (closed_tx, closed_rx) = mpsc::channel(1);
    drop(closed_rx);
    let live_tx = std::mem::replace(&mut engine.wal_tx, closed_tx);

    let result = engine.accept(winner.id).await;
    assert!(matches!(result, Err(EngineError::Internal(_))));
    assert_eq!(status_of(&engine, winner.id).await, ReservationStatus::Pending);
    assert_eq!(status_of(&engine, loser.id).await, ReservationStatus::Pending);
    let reserve = engine.reserve(request(acc, day(6), day(7))).await;
    assert!(matches!(reserve, Err(EngineError::Internal(_))));
    assert_eq!(engine.pending_for_accommodation(acc).await.len(), 2);

    // Safe to retry once the journal is back.
    engine.wal_tx = live_tx;
    let outcome = engine.accept(winner.id).await.unwrap();
    assert_eq!(outcome.declined, vec![loser.id]);
    assert_eq!(status_of(&engine, loser.id).await, ReservationStatus::Declined);
}
