//! Tests for models module

use primedist::models::{CandidateCheck, DispatchMode, SubComputation, WorkUnit};
use std::time::Duration;
use uuid::Uuid;

#[test]
fn test_sub_computation_wire_shape() {
    let unit = SubComputation::new(25, 5, 1, Uuid::nil());
    let json = serde_json::to_value(&unit).unwrap();

    assert_eq!(json["candidate"], 25);
    assert_eq!(json["divisor"], 5);
    assert_eq!(json["sequence_id"], 1);
    assert!(json["divides"].is_null());
}

#[test]
fn test_unanswered_payload_without_optional_fields() {
    let json = format!(
        r#"{{"candidate": 9, "divisor": 3, "sequence_id": 0, "token": "{}"}}"#,
        Uuid::new_v4()
    );
    let unit: SubComputation = serde_json::from_str(&json).unwrap();

    assert_eq!(unit.divides, None);
    assert_eq!(unit.elapsed, Duration::ZERO);
}

#[test]
fn test_evaluate_fills_verdicts() {
    let unit = WorkUnit::Division(SubComputation::new(25, 5, 1, Uuid::new_v4())).evaluate();
    assert!(unit.has_verdict());
    assert!(matches!(unit, WorkUnit::Division(ref s) if s.divides == Some(true)));

    let unit = WorkUnit::Whole(CandidateCheck::new(97)).evaluate();
    assert!(matches!(unit, WorkUnit::Whole(ref c) if c.is_prime == Some(true)));
}

#[test]
fn test_unit_mode_and_key() {
    let division = WorkUnit::Division(SubComputation::new(49, 7, 2, Uuid::new_v4()));
    assert_eq!(division.mode(), DispatchMode::Split);
    assert_eq!(division.key().sequence_id, 2);

    let whole = WorkUnit::Whole(CandidateCheck::new(49));
    assert_eq!(whole.mode(), DispatchMode::Whole);
    assert_eq!(whole.key().sequence_id, 0);
    assert_eq!(whole.candidate(), 49);
}

#[test]
fn test_dispatch_mode_serde() {
    assert_eq!(serde_json::to_string(&DispatchMode::Whole).unwrap(), "\"whole\"");
    let mode: DispatchMode = serde_json::from_str("\"split\"").unwrap();
    assert_eq!(mode, DispatchMode::Split);
}
