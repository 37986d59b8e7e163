//! Decision engine for progressive PK discovery.
//!
//! Pure logic over the per-step selectivity table: promotion, elimination,
//! escalation, skip-to-validation, and composite generation. No I/O.
//!
//! Rules:
//! - Any candidate at selectivity 1.0 confirms immediately.
//! - Singles below the per-step threshold are eliminated with a reason;
//!   composites below it are dropped without eliminating their members.
//! - Step >= 4 with best selectivity < 0.8 escalates.
//! - Step >= 3 with best selectivity >= 0.99 confirms (skip to validation).

use std::collections::{HashMap, HashSet};

use crate::services::pk_discovery::models::{
    ColumnCandidate, CompositeCandidate, Decision, ScanStep, Verdict, parse_candidate,
};

pub struct DecisionEngine;

impl DecisionEngine {
    pub const PERFECT_SELECTIVITY: f64 = 1.0;
    pub const SKIP_TO_VALIDATION_THRESHOLD: f64 = 0.99;
    pub const SKIP_TO_VALIDATION_STEP: u32 = 3;
    pub const ESCALATION_THRESHOLD: f64 = 0.8;
    pub const ESCALATION_STEP: u32 = 4;
    pub const COMPOSITE_START_STEP: u32 = 3;
    pub const MAX_COMPOSITES_PER_STEP: usize = 50;
    const COMPOSITE_POOL: usize = 10;

    /// Per-step elimination threshold.
    pub fn threshold(step_number: u32) -> f64 {
        match step_number {
            1 => 0.5,
            2 => 0.3,
            3 => 0.2,
            4 => 0.1,
            5 | 6 => 0.05,
            _ => 0.0,
        }
    }

    /// Evaluate one step's selectivity table.
    ///
    /// Mutates candidates (selectivity history, elimination marks) and
    /// retains only promoted composites.
    pub fn decide(
        step: &ScanStep,
        candidates: &mut [ColumnCandidate],
        composites: &mut Vec<CompositeCandidate>,
        selectivities: &HashMap<String, f64>,
    ) -> Decision {
        let mut decision = Decision::default();

        // Record this step's measurements before anything else so the
        // history survives early returns.
        for candidate in candidates.iter_mut().filter(|c| !c.is_eliminated()) {
            if let Some(sel) = selectivities.get(&candidate.column_name) {
                candidate.selectivity.insert(step.step_number, *sel);
            }
        }
        for composite in composites.iter_mut() {
            if let Some(sel) = selectivities.get(&composite.key_string()) {
                composite.selectivity.insert(step.step_number, *sel);
            }
        }

        if let Some(perfect) = Self::find_perfect(candidates, composites, selectivities) {
            tracing::info!(
                "Step {}: perfect candidate {}",
                step.step_number,
                perfect.join(" + ")
            );
            decision.best_candidate = Some(perfect.join(" + "));
            decision.best_selectivity = 1.0;
            decision.verdict = Some(Verdict::Confirmed { columns: perfect, selectivity: 1.0 });
            return decision;
        }

        let (best_name, best_sel) = Self::best_of(candidates, composites, selectivities);

        if step.step_number >= Self::ESCALATION_STEP && best_sel < Self::ESCALATION_THRESHOLD {
            tracing::warn!(
                "Step {}: best selectivity {:.1}% below {:.0}% threshold, escalating",
                step.step_number,
                best_sel * 100.0,
                Self::ESCALATION_THRESHOLD * 100.0
            );
            decision.best_candidate = best_name;
            decision.best_selectivity = best_sel;
            decision.verdict = Some(Verdict::Escalate {
                reason: format!(
                    "best selectivity {:.1}% < {:.0}% at step {}",
                    best_sel * 100.0,
                    Self::ESCALATION_THRESHOLD * 100.0,
                    step.step_number
                ),
            });
            return decision;
        }

        // Promote / eliminate against the per-step threshold
        let threshold = Self::threshold(step.step_number);
        for candidate in candidates.iter_mut() {
            if candidate.is_eliminated() {
                continue;
            }
            let sel = selectivities.get(&candidate.column_name).copied().unwrap_or(0.0);
            if sel < threshold {
                candidate.eliminated_at_step = Some(step.step_number);
                candidate.elimination_reason = Some(format!(
                    "selectivity {:.1}% < {:.0}% threshold",
                    sel * 100.0,
                    threshold * 100.0
                ));
                decision.eliminated.push(candidate.column_name.clone());
            }
        }

        // Composites below threshold are dropped; their members stay alive
        composites.retain(|comp| {
            selectivities.get(&comp.key_string()).copied().unwrap_or(0.0) >= threshold
        });

        decision.best_candidate = best_name.clone();
        decision.best_selectivity = best_sel;

        if best_sel >= Self::SKIP_TO_VALIDATION_THRESHOLD
            && step.step_number >= Self::SKIP_TO_VALIDATION_STEP
            && let Some(name) = best_name
        {
            tracing::info!(
                "Step {}: selectivity {:.1}% high enough to skip ahead",
                step.step_number,
                best_sel * 100.0
            );
            decision.verdict = Some(Verdict::Confirmed {
                columns: parse_candidate(&name),
                selectivity: best_sel,
            });
        }

        decision
    }

    /// Generate composite candidates over the top actives by latest
    /// selectivity: pairs from step 3, triples from step 4, capped.
    pub fn generate_composites(
        candidates: &[ColumnCandidate],
        existing: &[CompositeCandidate],
        step_number: u32,
        max_cols: usize,
    ) -> Vec<CompositeCandidate> {
        if step_number < Self::COMPOSITE_START_STEP {
            return Vec::new();
        }

        let mut active: Vec<&ColumnCandidate> =
            candidates.iter().filter(|c| !c.is_eliminated()).collect();
        active.sort_by(|a, b| {
            b.latest_selectivity()
                .partial_cmp(&a.latest_selectivity())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let top: Vec<&str> = active
            .iter()
            .take(Self::COMPOSITE_POOL)
            .map(|c| c.column_name.as_str())
            .collect();

        let seen: HashSet<String> = existing.iter().map(|c| c.key_string()).collect();
        let mut generated = Vec::new();

        // Combinations over the distinct top columns are duplicate-free by
        // construction; only cross-step key collisions need filtering.
        let mut push = |columns: Vec<String>, generated: &mut Vec<CompositeCandidate>| {
            if generated.len() >= Self::MAX_COMPOSITES_PER_STEP {
                return;
            }
            let comp = CompositeCandidate::new(columns);
            if !seen.contains(&comp.key_string()) {
                generated.push(comp);
            }
        };

        for i in 0..top.len() {
            for j in (i + 1)..top.len() {
                push(vec![top[i].to_string(), top[j].to_string()], &mut generated);
            }
        }
        if max_cols >= 3 {
            for i in 0..top.len() {
                for j in (i + 1)..top.len() {
                    for k in (j + 1)..top.len() {
                        push(
                            vec![top[i].to_string(), top[j].to_string(), top[k].to_string()],
                            &mut generated,
                        );
                    }
                }
            }
        }

        tracing::debug!("Step {}: generated {} composites", step_number, generated.len());
        generated
    }

    pub fn selectivity(distinct_count: i64, total_rows: i64) -> f64 {
        if total_rows == 0 {
            return 0.0;
        }
        distinct_count as f64 / total_rows as f64
    }

    fn find_perfect(
        candidates: &[ColumnCandidate],
        composites: &[CompositeCandidate],
        selectivities: &HashMap<String, f64>,
    ) -> Option<Vec<String>> {
        for candidate in candidates.iter().filter(|c| !c.is_eliminated()) {
            let sel = selectivities.get(&candidate.column_name).copied().unwrap_or(0.0);
            if sel >= Self::PERFECT_SELECTIVITY {
                return Some(vec![candidate.column_name.clone()]);
            }
        }
        for composite in composites {
            let sel = selectivities.get(&composite.key_string()).copied().unwrap_or(0.0);
            if sel >= Self::PERFECT_SELECTIVITY {
                return Some(composite.columns.clone());
            }
        }
        None
    }

    fn best_of(
        candidates: &[ColumnCandidate],
        composites: &[CompositeCandidate],
        selectivities: &HashMap<String, f64>,
    ) -> (Option<String>, f64) {
        let mut best_name = None;
        let mut best_sel = 0.0;
        for candidate in candidates.iter().filter(|c| !c.is_eliminated()) {
            let sel = selectivities.get(&candidate.column_name).copied().unwrap_or(0.0);
            if sel > best_sel {
                best_sel = sel;
                best_name = Some(candidate.column_name.clone());
            }
        }
        for composite in composites {
            let key = composite.key_string();
            let sel = selectivities.get(&key).copied().unwrap_or(0.0);
            if sel > best_sel {
                best_sel = sel;
                best_name = Some(key);
            }
        }
        (best_name, best_sel)
    }
}
