//! Duplicate, ordering, calendar and empty-cycle guards. Every rejection
//! must leave the store exactly as it was.

use chrono::{NaiveDate, NaiveDateTime, Weekday};
use lottery_core::{
    config::EngineConfig,
    cycle::CycleStage,
    engine::CycleEngine,
    error::{EngineError, ValidationError},
    parser::TicketRow,
    types::{MobileNumber, Session},
};

fn day(n: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 4, n).unwrap()
}

fn at(n: u32, h: u32) -> NaiveDateTime {
    day(n).and_hms_opt(h, 15, 0).unwrap()
}

fn row(mobile: &str, when: NaiveDateTime, qty: u32, session: Session) -> TicketRow {
    TicketRow {
        mobile: MobileNumber::normalize(mobile, &EngineConfig::default_test().mobile).unwrap(),
        last_name: "Asante".into(),
        other_names: "Yaa".into(),
        promotional_consent: true,
        first_seen: when,
        quantity: qty,
        session,
        cycle: when.date(),
        ticket_id: None,
        draw_id: None,
        line: None,
    }
}

fn both_sessions(n: u32) -> (Vec<TicketRow>, Vec<TicketRow>) {
    (
        vec![row("0541000001", at(n, 13), 2, Session::Morning)],
        vec![
            row("0541000001", at(n, 19), 1, Session::Evening),
            row("0541000002", at(n, 20), 4, Session::Evening),
        ],
    )
}

fn submit(engine: &mut CycleEngine, n: u32) -> lottery_core::cycle::CycleOutcome {
    let (m, e) = both_sessions(n);
    engine.submit_cycle(day(n), m, e)
}

#[test]
fn duplicate_cycle_changes_nothing() {
    let mut engine = CycleEngine::build_test().unwrap();
    assert!(submit(&mut engine, 1).is_consolidated());
    assert!(submit(&mut engine, 2).is_consolidated());

    let before_players = engine.store().all_players(engine.config().early_window).unwrap();
    let before_snapshot = engine.get_current_snapshot().unwrap();
    let before_events = engine.events_for_cycle(day(2)).unwrap().len();

    for _ in 0..3 {
        let outcome = submit(&mut engine, 2);
        let rejection = outcome.rejection().expect("duplicate rejected");
        assert!(matches!(rejection.error, EngineError::DuplicateCycle { .. }));
        assert_eq!(rejection.stage, CycleStage::Validating);
    }
    // An older cycle is a duplicate too, not an ordering fault.
    let outcome = submit(&mut engine, 1);
    assert!(matches!(
        outcome.rejection().map(|r| &r.error),
        Some(EngineError::DuplicateCycle { .. })
    ));

    let after_players = engine.store().all_players(engine.config().early_window).unwrap();
    assert_eq!(before_players, after_players);
    assert_eq!(before_snapshot, engine.get_current_snapshot().unwrap());
    assert_eq!(before_events, engine.events_for_cycle(day(2)).unwrap().len());
    assert_eq!(engine.cycle_ledger().unwrap().len(), 2);
}

#[test]
fn skipped_cycle_is_out_of_order() {
    let mut engine = CycleEngine::build_test().unwrap();
    assert!(submit(&mut engine, 1).is_consolidated());
    let before = engine.get_player("0541000002").unwrap();

    let outcome = submit(&mut engine, 3);
    match outcome.rejection().map(|r| &r.error) {
        Some(EngineError::OutOfOrderCycle { cycle, expected, .. }) => {
            assert_eq!(*cycle, day(3));
            assert_eq!(*expected, day(2));
        }
        other => panic!("expected out-of-order rejection, got {other:?}"),
    }
    assert_eq!(engine.get_player("0541000002").unwrap(), before);
    assert_eq!(engine.store().latest_consolidated_cycle().unwrap(), Some(day(1)));

    // Backfilling the gap lets the later cycle through.
    assert!(submit(&mut engine, 2).is_consolidated());
    assert!(submit(&mut engine, 3).is_consolidated());
}

#[test]
fn gaps_allowed_without_contiguity_but_never_going_back() {
    let mut config = EngineConfig::default_test();
    config.calendar.enforce_contiguity = false;
    let mut engine = CycleEngine::build_test_with(config).unwrap();

    assert!(submit(&mut engine, 1).is_consolidated());
    assert!(submit(&mut engine, 5).is_consolidated());
    let outcome = submit(&mut engine, 3);
    assert!(matches!(
        outcome.rejection().map(|r| &r.error),
        Some(EngineError::OutOfOrderCycle { .. })
    ));
    let p = engine.get_player("0541000001").unwrap();
    assert_eq!(p.window().len(), 2);
    assert_eq!(p.e_score, 6);
}

#[test]
fn closed_weekdays_are_skipped_by_the_calendar() {
    // 2024-04-06 is a Saturday and 2024-04-07 a Sunday.
    let mut config = EngineConfig::default_test();
    config.calendar.closed_weekdays = vec![Weekday::Sun];
    let mut engine = CycleEngine::build_test_with(config).unwrap();

    assert!(submit(&mut engine, 6).is_consolidated());
    let outcome = submit(&mut engine, 7);
    assert!(matches!(
        outcome.rejection().map(|r| &r.error),
        Some(EngineError::Validation(ValidationError::NonTradingDay { weekday: Weekday::Sun, .. }))
            | Some(EngineError::OutOfOrderCycle { .. })
    ));
    // Monday follows Saturday directly.
    assert!(submit(&mut engine, 8).is_consolidated());
}

#[test]
fn empty_cycle_is_rejected() {
    let mut engine = CycleEngine::build_test().unwrap();
    let outcome = engine.submit_cycle(day(1), Vec::new(), Vec::new());
    assert!(matches!(
        outcome.rejection().map(|r| &r.error),
        Some(EngineError::Validation(ValidationError::EmptyCycle { .. }))
    ));
    assert!(engine.cycle_ledger().unwrap().is_empty());
    assert!(engine.get_current_snapshot().unwrap().is_none());
}

#[test]
fn rows_from_another_day_or_session_are_rejected() {
    let mut engine = CycleEngine::build_test().unwrap();

    let stray = vec![row("0541000001", at(2, 13), 1, Session::Morning)];
    let outcome = engine.submit_cycle(day(1), stray, Vec::new());
    assert!(matches!(
        outcome.rejection().map(|r| &r.error),
        Some(EngineError::Validation(ValidationError::InconsistentRows { .. }))
    ));

    let misfiled = vec![row("0541000001", at(1, 19), 1, Session::Evening)];
    let outcome = engine.submit_cycle(day(1), misfiled, Vec::new());
    assert!(matches!(
        outcome.rejection().map(|r| &r.error),
        Some(EngineError::Validation(ValidationError::InconsistentRows { .. }))
    ));
    assert!(engine.cycle_ledger().unwrap().is_empty());
}

#[test]
fn duplicate_ticket_numbers_reject_the_cycle() {
    let mut engine = CycleEngine::build_test().unwrap();
    let mut a = row("0541000001", at(1, 13), 1, Session::Morning);
    a.ticket_id = Some("787-000000001A".into());
    let mut b = row("0541000002", at(1, 19), 1, Session::Evening);
    b.ticket_id = Some("787-000000001A".into());

    let outcome = engine.submit_cycle(day(1), vec![a], vec![b]);
    match outcome.rejection().map(|r| &r.error) {
        Some(EngineError::Validation(ValidationError::InconsistentRows { rows, .. })) => {
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].session, Some(Session::Evening));
        }
        other => panic!("expected inconsistent rows, got {other:?}"),
    }
}

#[test]
fn ledger_records_each_cycle_once_with_row_counts() {
    let mut engine = CycleEngine::build_test().unwrap();
    for n in 1..=3 {
        assert!(submit(&mut engine, n).is_consolidated());
    }
    let ledger = engine.cycle_ledger().unwrap();
    assert_eq!(ledger.iter().map(|e| e.cycle).collect::<Vec<_>>(), vec![day(1), day(2), day(3)]);
    for entry in &ledger {
        assert_eq!(entry.status, CycleStage::Consolidated);
        assert!(!entry.partial);
        assert_eq!(entry.morning_rows, 1);
        assert_eq!(entry.evening_rows, 2);
        assert!(!entry.attempt_id.is_empty());
    }
}
