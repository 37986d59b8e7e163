//! End-to-end decision scenarios, expressed against the pure logic the
//! scanners and the validator drive.

use std::collections::HashMap;

use crate::services::fk_validator::{StepMeasurement, Termination, early_termination};
use crate::services::grain_discovery::varying_chase::find_varying_columns;
use crate::services::pk_discovery::models::{
    ColumnCandidate, CompositeCandidate, DEFAULT_STEPS, Verdict,
};
use crate::services::pk_discovery::{DecisionEngine, pk_priority};

fn sels(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

/// Small table with a truly unique OrderID: the scan is over at step 1
/// with no further steps taken.
#[test]
fn single_column_pk_confirms_at_step_1() {
    let mut candidates = vec![
        ColumnCandidate::new("OrderID", "int", 1, pk_priority("OrderID")),
        ColumnCandidate::new("CustomerID", "int", 2, pk_priority("CustomerID")),
        ColumnCandidate::new("Amount", "decimal", 3, pk_priority("Amount")),
        ColumnCandidate::new("Status", "varchar", 4, pk_priority("Status")),
    ];
    let mut composites = Vec::new();
    let table = sels(&[
        ("OrderID", 1.0),
        ("CustomerID", 0.21),
        ("Amount", 0.6),
        ("Status", 0.002),
    ]);

    let decision =
        DecisionEngine::decide(&DEFAULT_STEPS[0], &mut candidates, &mut composites, &table);
    match decision.verdict {
        Some(Verdict::Confirmed { columns, selectivity }) => {
            assert_eq!(columns, vec!["OrderID".to_string()]);
            assert_eq!(selectivity, 1.0);
        }
        other => panic!("expected step-1 confirmation, got {other:?}"),
    }
}

/// Near-unique OrderID with a perfect (OrderID, LineNo) pair: steps 1-2
/// keep scanning, step 3 generates the composite and confirms it.
#[test]
fn composite_pk_confirms_once_composites_generate() {
    let mut candidates = vec![
        ColumnCandidate::new("OrderID", "int", 1, pk_priority("OrderID")),
        ColumnCandidate::new("LineNo", "int", 2, pk_priority("LineNo")),
        ColumnCandidate::new("ProductID", "int", 3, pk_priority("ProductID")),
        ColumnCandidate::new("Qty", "int", 4, pk_priority("Qty")),
    ];
    let mut composites: Vec<CompositeCandidate> = Vec::new();

    // Steps 1 and 2: OrderID leads but stays below the perfect bar
    for step in &DEFAULT_STEPS[..2] {
        let table = sels(&[
            ("OrderID", 0.998),
            ("LineNo", 0.6),
            ("ProductID", 0.4),
            ("Qty", 0.31),
        ]);
        let decision =
            DecisionEngine::decide(step, &mut candidates, &mut composites, &table);
        assert!(decision.verdict.is_none(), "no verdict before composites exist");
        assert_eq!(decision.best_candidate.as_deref(), Some("OrderID"));
    }

    // Step 3: composite generation kicks in over the surviving actives
    let generated = DecisionEngine::generate_composites(&candidates, &composites, 3, 2);
    assert!(generated.iter().any(|c| c.key_string() == "OrderID + LineNo"));
    composites.extend(generated);

    let table = sels(&[
        ("OrderID", 0.998),
        ("LineNo", 0.6),
        ("ProductID", 0.4),
        ("Qty", 0.31),
        ("OrderID + LineNo", 1.0),
    ]);
    let decision =
        DecisionEngine::decide(&DEFAULT_STEPS[2], &mut candidates, &mut composites, &table);
    match decision.verdict {
        Some(Verdict::Confirmed { columns, .. }) => {
            assert_eq!(columns, vec!["OrderID".to_string(), "LineNo".to_string()]);
        }
        other => panic!("expected composite confirmation, got {other:?}"),
    }
}

/// The chase scenario: a 99.9%-selective (PostPeriod, ExtractDTS) whose
/// duplicate groups are discriminated by OrderID.
#[test]
fn chase_identifies_the_discriminating_column() {
    let result_columns = vec![
        "PostPeriod".to_string(),
        "ExtractDTS".to_string(),
        "OrderID".to_string(),
        "Qty".to_string(),
    ];
    // Three dupe groups; OrderID differs inside every group, Qty in none.
    let mut rows = Vec::new();
    for group in 0..3 {
        for member in 0..2 {
            rows.push(vec![
                Some(format!("2024-{group:02}")),
                Some(format!("ts-{group}")),
                Some(format!("{}", group * 10 + member)),
                Some("1".to_string()),
            ]);
        }
    }

    let varying = find_varying_columns(
        &result_columns,
        rows,
        &["PostPeriod".to_string(), "ExtractDTS".to_string()],
        &["OrderID".to_string(), "Qty".to_string()],
    );
    assert_eq!(varying.len(), 1);
    assert_eq!(varying[0].0, "OrderID");
    assert_eq!(varying[0].1, 1.0);
}

/// Disjoint FK populations: 0% match at steps 1 and 2 terminates the
/// validator at step 2.
#[test]
fn fk_disjoint_terminates_at_step_2() {
    let mut history = vec![StepMeasurement { step_number: 1, match_pct: 0.0 }];
    assert_eq!(early_termination(&history), None, "step 1 alone keeps sampling");

    history.push(StepMeasurement { step_number: 2, match_pct: 0.0 });
    assert_eq!(early_termination(&history), Some(Termination::Disjoint));
}

/// A 99.9%-clean FK: steps 1 and 2 both land at or above 99% within two
/// points, so the validator confirms at step 2.
#[test]
fn fk_confirms_early_when_stable_high() {
    let history = vec![
        StepMeasurement { step_number: 1, match_pct: 99.8 },
        StepMeasurement { step_number: 2, match_pct: 99.9 },
    ];
    assert_eq!(early_termination(&history), Some(Termination::ConfirmedStable));
}

/// Every recorded early return must satisfy one of the three predicates.
#[test]
fn early_termination_is_consistent_with_history() {
    let terminated_histories: Vec<Vec<StepMeasurement>> = vec![
        vec![
            StepMeasurement { step_number: 1, match_pct: 12.0 },
            StepMeasurement { step_number: 2, match_pct: 0.0 },
        ],
        vec![
            StepMeasurement { step_number: 1, match_pct: 99.1 },
            StepMeasurement { step_number: 2, match_pct: 99.3 },
        ],
        vec![
            StepMeasurement { step_number: 1, match_pct: 30.0 },
            StepMeasurement { step_number: 2, match_pct: 33.0 },
            StepMeasurement { step_number: 3, match_pct: 31.0 },
        ],
    ];
    for history in &terminated_histories {
        assert!(
            early_termination(history).is_some(),
            "termination predicate must hold for {history:?}"
        );
    }
}
