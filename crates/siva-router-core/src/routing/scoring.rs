//! Deterministic candidate scoring
//!
//! `score = stability*0.5 + (100 - cost_rank*10)*0.3 + (100 - latency_rank*10)*0.2`
//!
//! Ranks are 1-based among the candidates being scored. Equal values share a
//! rank (rank = 1 + number of candidates strictly better), so the result does
//! not depend on input order. Ties on score go to the lexicographically
//! smallest `model_id`.

use std::cmp::Ordering;

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::types::{ScoreBreakdown, ScoredCandidate};
use crate::catalog::Model;

pub const STABILITY_WEIGHT: f64 = 0.5;
pub const COST_WEIGHT: f64 = 0.3;
pub const LATENCY_WEIGHT: f64 = 0.2;
/// Points lost per rank position
pub const RANK_STEP: f64 = 10.0;

/// Score and order candidates, best first
pub fn rank_candidates(candidates: &[&Model]) -> Vec<ScoredCandidate> {
    let mut scored: Vec<ScoredCandidate> = candidates
        .iter()
        .map(|model| {
            let cost_rank = 1 + candidates
                .iter()
                .filter(|other| other.cost_per_call < model.cost_per_call)
                .count() as u32;
            let latency_rank = 1 + candidates
                .iter()
                .filter(|other| other.avg_latency_ms < model.avg_latency_ms)
                .count() as u32;

            ScoredCandidate {
                model_id: model.model_id.clone(),
                cost_per_call: model.cost_per_call,
                avg_latency_ms: model.avg_latency_ms,
                stability_score: model.stability_score,
                breakdown: score(model.stability_score, cost_rank, latency_rank),
            }
        })
        .collect();

    scored.sort_by(compare_candidates);
    scored
}

/// Apply the scoring formula to one candidate's inputs
pub fn score(stability_score: u8, cost_rank: u32, latency_rank: u32) -> ScoreBreakdown {
    let stability_component = f64::from(stability_score) * STABILITY_WEIGHT;
    let cost_component = (100.0 - f64::from(cost_rank) * RANK_STEP) * COST_WEIGHT;
    let latency_component = (100.0 - f64::from(latency_rank) * RANK_STEP) * LATENCY_WEIGHT;

    ScoreBreakdown {
        cost_rank,
        latency_rank,
        stability_component,
        cost_component,
        latency_component,
        score: stability_component + cost_component + latency_component,
    }
}

/// Higher score first, then smaller model id
fn compare_candidates(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.breakdown
        .score
        .total_cmp(&a.breakdown.score)
        .then_with(|| a.model_id.cmp(&b.model_id))
}

#[derive(Serialize)]
struct DigestInput<'a> {
    capability_key: &'a str,
    persona_id: &'a str,
    candidates: Vec<DigestCandidate<'a>>,
}

#[derive(Serialize)]
struct DigestCandidate<'a> {
    model_id: &'a str,
    cost_per_call: f64,
    avg_latency_ms: u64,
    stability_score: u8,
}

/// SHA-256 (hex) over the inputs a decision was computed from
///
/// Candidates are digested in `model_id` order so the digest only depends on
/// the candidate set, not on its ranking.
pub fn inputs_digest(capability_key: &str, persona_id: &str, candidates: &[ScoredCandidate]) -> String {
    let mut ordered: Vec<&ScoredCandidate> = candidates.iter().collect();
    ordered.sort_by(|a, b| a.model_id.cmp(&b.model_id));

    let input = DigestInput {
        capability_key,
        persona_id,
        candidates: ordered
            .into_iter()
            .map(|c| DigestCandidate {
                model_id: &c.model_id,
                cost_per_call: c.cost_per_call,
                avg_latency_ms: c.avg_latency_ms,
                stability_score: c.stability_score,
            })
            .collect(),
    };

    // Serializing plain structs of strings and numbers cannot fail
    let canonical = serde_json::to_vec(&input).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: &str, cost: f64, latency: u64, stability: u8) -> Model {
        Model::new(id)
            .with_capabilities(["summarize_fast"])
            .with_cost(cost)
            .with_latency_ms(latency)
            .with_stability(stability)
    }

    #[test]
    fn test_formula() {
        let b = score(95, 2, 1);
        assert!((b.stability_component - 47.5).abs() < 1e-9);
        assert!((b.cost_component - 24.0).abs() < 1e-9);
        assert!((b.latency_component - 18.0).abs() < 1e-9);
        assert!((b.score - 89.5).abs() < 1e-9);
    }

    #[test]
    fn test_cheaper_slightly_less_stable_model_wins() {
        let a = model("model-a", 0.0004, 300, 95);
        let b = model("model-b", 0.0002, 300, 90);

        let ranked = rank_candidates(&[&a, &b]);
        assert_eq!(ranked[0].model_id, "model-b");
        assert!((ranked[0].breakdown.score - 90.0).abs() < 1e-9);
        assert!((ranked[1].breakdown.score - 89.5).abs() < 1e-9);
    }

    #[test]
    fn test_equal_values_share_rank() {
        let a = model("a", 0.001, 100, 80);
        let b = model("b", 0.001, 200, 80);
        let c = model("c", 0.002, 200, 80);

        let ranked = rank_candidates(&[&c, &b, &a]);
        let by_id = |id: &str| ranked.iter().find(|r| r.model_id == id).unwrap().breakdown;

        assert_eq!(by_id("a").cost_rank, 1);
        assert_eq!(by_id("b").cost_rank, 1);
        assert_eq!(by_id("c").cost_rank, 3);
        assert_eq!(by_id("b").latency_rank, 2);
        assert_eq!(by_id("c").latency_rank, 2);
    }

    #[test]
    fn test_ties_go_to_smallest_model_id() {
        let x = model("zeta", 0.001, 100, 80);
        let y = model("alpha", 0.001, 100, 80);

        let ranked = rank_candidates(&[&x, &y]);
        assert_eq!(ranked[0].model_id, "alpha");
        assert_eq!(ranked[0].breakdown.score, ranked[1].breakdown.score);
    }

    #[test]
    fn test_ranking_independent_of_input_order() {
        let a = model("a", 0.003, 900, 70);
        let b = model("b", 0.001, 400, 85);
        let c = model("c", 0.002, 100, 90);

        let first = rank_candidates(&[&a, &b, &c]);
        let second = rank_candidates(&[&c, &a, &b]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_input() {
        assert!(rank_candidates(&[]).is_empty());
    }

    #[test]
    fn test_digest_ignores_ranking_order() {
        let a = model("a", 0.003, 900, 70);
        let b = model("b", 0.001, 400, 85);

        let ranked = rank_candidates(&[&a, &b]);
        let mut reversed = ranked.clone();
        reversed.reverse();

        let d1 = inputs_digest("summarize_fast", "p1", &ranked);
        let d2 = inputs_digest("summarize_fast", "p1", &reversed);
        assert_eq!(d1, d2);
        assert_eq!(d1.len(), 64);
        assert_ne!(d1, inputs_digest("summarize_fast", "p2", &ranked));
    }
}
