//! Confidence scoring algebra.
//!
//! A pure, single-pass accumulator over the ordered evidence list. The
//! evidence must be scored in the order it was recorded; sorting it first
//! changes the result.

use tracing::warn;

use crate::types::EvidenceItem;

/// Default score when the model did not supply an explicit probability.
pub const DEFAULT_INITIAL_SCORE: f64 = 0.5;

/// Fixed score assigned to findings recovered by the regex fallback.
pub const UNRELIABLE_PARSE_SCORE: f64 = 0.25;

/// Multiplicative boost applied for each agreeing evidence item.
const AGREEMENT_BOOST: f64 = 0.2;

/// Multiplicative penalty applied for each disagreeing evidence item.
const DISAGREEMENT_PENALTY: f64 = 0.5;

/// Result of reconciling all evidence for one relationship.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinalScore {
    pub final_score: f64,
    pub has_conflict: bool,
}

/// Initial score for a single finding.
///
/// Uses the model's explicit probability when present, clamped into [0, 1];
/// otherwise logs and falls back to the default.
pub fn initial_score_from_finding(confidence: Option<f64>) -> f64 {
    match confidence {
        Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
        Some(c) => {
            warn!(confidence = c, "non-finite confidence from model, using default");
            DEFAULT_INITIAL_SCORE
        }
        None => {
            warn!("finding carried no explicit confidence, using default");
            DEFAULT_INITIAL_SCORE
        }
    }
}

/// Fold the ordered evidence list into a final score and conflict flag.
///
/// The first item seeds the score with its initial score; every subsequent
/// item either boosts (`score += (1 - score) * 0.2`) or halves it. Malformed
/// items (scores outside [0, 1]) are skipped with a warning.
pub fn calculate_final_score(evidence: &[EvidenceItem]) -> FinalScore {
    let Some(first) = evidence.first() else {
        return FinalScore {
            final_score: 0.0,
            has_conflict: false,
        };
    };

    if !is_well_formed(first) {
        warn!(
            relationship_hash = %first.relationship_hash,
            "first evidence item is malformed, scoring as absent"
        );
        return FinalScore {
            final_score: 0.0,
            has_conflict: false,
        };
    }

    let mut score = first.initial_score;
    let mut agree = if first.found { 1u32 } else { 0 };
    let mut disagree = if first.found { 0u32 } else { 1 };

    for item in &evidence[1..] {
        if !is_well_formed(item) {
            warn!(
                relationship_hash = %item.relationship_hash,
                source_worker = item.source_worker.as_str(),
                "skipping malformed evidence item"
            );
            continue;
        }
        if item.found {
            score += (1.0 - score) * AGREEMENT_BOOST;
            agree += 1;
        } else {
            score *= DISAGREEMENT_PENALTY;
            disagree += 1;
        }
    }

    FinalScore {
        final_score: score.clamp(0.0, 1.0),
        has_conflict: agree > 0 && disagree > 0,
    }
}

fn is_well_formed(item: &EvidenceItem) -> bool {
    item.initial_score.is_finite()
        && (0.0..=1.0).contains(&item.initial_score)
        && !item.relationship_hash.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceWorker;

    fn item(found: bool, initial_score: f64) -> EvidenceItem {
        EvidenceItem {
            relationship_hash: "h".repeat(64),
            source_worker: SourceWorker::FileAnalysis,
            found,
            initial_score,
            job_id: "job".into(),
            source_file: "a.js".into(),
            target_file: "b.js".into(),
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn empty_evidence_scores_zero() {
        let out = calculate_final_score(&[]);
        assert_eq!(out.final_score, 0.0);
        assert!(!out.has_conflict);
    }

    #[test]
    fn single_agreeing_item_is_identity() {
        let out = calculate_final_score(&[item(true, 0.7)]);
        assert_eq!(out.final_score, 0.7);
        assert!(!out.has_conflict);
    }

    #[test]
    fn agreement_boost() {
        // 0.8 + (1 - 0.8) * 0.2 = 0.84
        let out = calculate_final_score(&[item(true, 0.8), item(true, 0.3)]);
        assert!((out.final_score - 0.84).abs() < 1e-12);
        assert!(!out.has_conflict);
    }

    #[test]
    fn disagreement_penalty() {
        // 0.8 * 0.5 = 0.4
        let out = calculate_final_score(&[item(true, 0.8), item(false, 0.9)]);
        assert!((out.final_score - 0.4).abs() < 1e-12);
        assert!(out.has_conflict);
    }

    #[test]
    fn fully_conflicting_default_scores() {
        // 0.5 * 0.5 = 0.25, conflict set
        let out = calculate_final_score(&[item(true, 0.5), item(false, 0.5)]);
        assert!((out.final_score - 0.25).abs() < 1e-12);
        assert!(out.has_conflict);
    }

    #[test]
    fn cross_file_import_agreement() {
        // 0.5 + (1 - 0.5) * 0.2 = 0.6
        let out = calculate_final_score(&[item(true, 0.5), item(true, 0.5)]);
        assert!((out.final_score - 0.6).abs() < 1e-12);
        assert!(!out.has_conflict);
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let mut evidence = vec![item(true, 0.99)];
        for _ in 0..50 {
            evidence.push(item(true, 0.5));
        }
        let out = calculate_final_score(&evidence);
        assert!(out.final_score <= 1.0 && out.final_score >= 0.0);

        let mut evidence = vec![item(false, 0.01)];
        for _ in 0..50 {
            evidence.push(item(false, 0.5));
        }
        let out = calculate_final_score(&evidence);
        assert!(out.final_score >= 0.0);
        assert!(!out.has_conflict);
    }

    #[test]
    fn order_matters() {
        let forward = calculate_final_score(&[item(true, 0.8), item(false, 0.5)]);
        let reverse = calculate_final_score(&[item(false, 0.5), item(true, 0.8)]);
        // 0.4 vs 0.5 + 0.5*0.2 = 0.6
        assert!((forward.final_score - 0.4).abs() < 1e-12);
        assert!((reverse.final_score - 0.6).abs() < 1e-12);
    }

    #[test]
    fn malformed_first_item_scores_zero() {
        let out = calculate_final_score(&[item(true, 1.5)]);
        assert_eq!(out.final_score, 0.0);
        assert!(!out.has_conflict);
    }

    #[test]
    fn malformed_middle_item_is_skipped() {
        let out = calculate_final_score(&[item(true, 0.8), item(true, f64::NAN), item(true, 0.5)]);
        // NaN item skipped: 0.8 then one boost -> 0.84
        assert!((out.final_score - 0.84).abs() < 1e-12);
    }

    #[test]
    fn first_item_disagreeing_counts_as_disagreement() {
        let out = calculate_final_score(&[item(false, 0.5), item(true, 0.9)]);
        assert!(out.has_conflict);
    }

    #[test]
    fn initial_score_clamps_and_defaults() {
        assert_eq!(initial_score_from_finding(Some(0.8)), 0.8);
        assert_eq!(initial_score_from_finding(Some(3.0)), 1.0);
        assert_eq!(initial_score_from_finding(Some(-1.0)), 0.0);
        assert_eq!(initial_score_from_finding(None), DEFAULT_INITIAL_SCORE);
        assert_eq!(
            initial_score_from_finding(Some(f64::NAN)),
            DEFAULT_INITIAL_SCORE
        );
    }
}
