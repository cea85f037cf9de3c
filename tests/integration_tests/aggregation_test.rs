//! Verdict aggregation is independent of arrival order

use std::time::Duration;

use primedist::coordinator::{CandidateBoard, Outcome};
use primedist::models::SubComputation;
use primedist::primes::{is_prime, splitter};
use proptest::prelude::*;

use super::fixtures::{MULTI_FACTOR_COMPOSITES, SQUARES_OF_PRIMES};

fn answered(candidate: u64) -> Vec<SubComputation> {
    splitter::split(candidate)
        .map(|unit| {
            let divides = candidate % unit.divisor == 0;
            unit.with_verdict(divides, Duration::from_millis(1))
        })
        .collect()
}

/// Fold every verdict and return the single terminal outcome
fn resolve(board: &mut CandidateBoard, units: &[SubComputation]) -> Outcome {
    let mut terminal = None;
    for unit in units {
        match board.apply_division(unit).unwrap() {
            Outcome::Progress { .. } | Outcome::Stale | Outcome::Duplicate => {}
            outcome => {
                assert!(terminal.is_none(), "candidate resolved twice");
                terminal = Some(outcome);
            }
        }
    }
    terminal.expect("candidate never resolved")
}

fn candidate_with_order() -> impl Strategy<Value = (u64, Vec<SubComputation>)> {
    (5u64..20_000)
        .prop_map(|n| 2 * n + 1)
        .prop_flat_map(|n| (Just(n), Just(answered(n)).prop_shuffle()))
}

proptest! {
    #[test]
    fn any_arrival_order_yields_the_same_verdict((n, units) in candidate_with_order()) {
        let mut board = CandidateBoard::default();
        board.register(n, units.len() as u64, None);

        match resolve(&mut board, &units) {
            Outcome::Confirmed(r) => {
                prop_assert!(is_prime(n));
                prop_assert_eq!(r.value, n);
            }
            Outcome::Rejected(r) => {
                prop_assert!(!is_prime(n));
                let divisor = r.divisor.unwrap();
                prop_assert_eq!(n % divisor, 0);
            }
            other => prop_assert!(false, "unexpected outcome {:?}", other),
        }
        prop_assert!(!board.is_pending(n));
    }
}

#[test]
fn test_square_of_prime_needs_last_divisor() {
    for &n in SQUARES_OF_PRIMES {
        let mut units = answered(n);
        units.reverse();
        let mut board = CandidateBoard::default();
        board.register(n, units.len() as u64, None);

        let Outcome::Rejected(resolution) = resolve(&mut board, &units) else {
            panic!("{n} was not rejected");
        };
        assert_eq!(resolution.divisor.unwrap().pow(2), n);
    }
}

#[test]
fn test_later_divisors_are_stale_after_rejection() {
    for &n in MULTI_FACTOR_COMPOSITES {
        let units = answered(n);
        let mut board = CandidateBoard::default();
        board.register(n, units.len() as u64, None);

        // 3 divides every fixture, so the first verdict settles it
        assert!(matches!(
            board.apply_division(&units[0]).unwrap(),
            Outcome::Rejected(r) if r.divisor == Some(3)
        ));
        for unit in &units[1..] {
            assert_eq!(board.apply_division(unit).unwrap(), Outcome::Stale);
        }
        assert_eq!(board.counters().rejected, 1);
        assert_eq!(board.counters().stale, units.len() as u64 - 1);
    }
}

#[test]
fn test_repeated_verdicts_count_once() {
    let units = answered(97);
    let mut board = CandidateBoard::default();
    board.register(97, units.len() as u64, None);

    let first = board.apply_division(&units[0]).unwrap();
    assert_eq!(first, Outcome::Progress { remaining: 3 });
    assert_eq!(board.apply_division(&units[0]).unwrap(), Outcome::Duplicate);
    assert_eq!(board.outstanding(97), Some(3));

    for unit in &units[1..] {
        board.apply_division(unit).unwrap();
    }
    assert_eq!(board.counters().confirmed, 1);
    assert_eq!(board.counters().duplicate, 1);
    assert_eq!(board.apply_division(&units[0]).unwrap(), Outcome::Stale);
}
