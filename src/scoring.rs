//! Scoring and ranking of context candidates

use crate::types::*;

/// Replace NaN and infinities with 0 so they never reach the sort
pub fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() { x } else { 0.0 }
}

/// Compute the final score of one candidate.
///
/// `alpha * similarity + beta * (verified + manual) + language + domain`,
/// where the language and domain bonuses add their full multiplier whenever
/// the corresponding boost signal is positive.
pub fn compute_final_score(cand: &RankCandidate, weights: &ScoringWeights) -> f64 {
    let similarity = finite_or_zero(cand.similarity);
    let trust = finite_or_zero(cand.verified_weight) + finite_or_zero(cand.manual_academic_weight);

    let language_bonus = if finite_or_zero(cand.lang_boost_da) > 0.0 {
        finite_or_zero(weights.m_lang)
    } else {
        0.0
    };
    let domain_bonus = if finite_or_zero(cand.domain_boost_dk) > 0.0 {
        finite_or_zero(weights.m_domain)
    } else {
        0.0
    };

    let score = finite_or_zero(weights.alpha) * similarity
        + finite_or_zero(weights.beta) * trust
        + language_bonus
        + domain_bonus;

    finite_or_zero(score)
}

/// Score every candidate, best first. Ties keep their input order.
pub fn score_and_sort(
    candidates: &[RankCandidate],
    weights: &ScoringWeights,
) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = candidates
        .iter()
        .map(|cand| RankedCandidate {
            candidate: cand.clone(),
            final_score: compute_final_score(cand, weights),
        })
        .collect();

    // Vec::sort_by is stable
    ranked.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
    ranked
}

/// Join candidate texts in order, skipping blank chunks
pub fn join_texts(items: &[RankedCandidate], separator: &str) -> String {
    items
        .iter()
        .map(|item| item.candidate.text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
        .trim()
        .to_string()
}

/// Rank candidates, keep the best `top_n` and join their text.
pub fn rank(
    candidates: &[RankCandidate],
    weights: &ScoringWeights,
    top_n: usize,
    separator: &str,
) -> RankOutput {
    if candidates.is_empty() || top_n == 0 {
        return RankOutput {
            total_candidates: candidates.len(),
            ..RankOutput::empty()
        };
    }

    let mut ranked = score_and_sort(candidates, weights);
    ranked.truncate(top_n);

    let ranked_text = join_texts(&ranked, separator);

    RankOutput {
        ranked,
        ranked_text,
        total_candidates: candidates.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(id: &str, similarity: f64, verified: f64) -> RankCandidate {
        RankCandidate {
            similarity,
            verified_weight: verified,
            ..RankCandidate::new(id, format!("text {}", id))
        }
    }

    #[test]
    fn test_score_formula() {
        let c = RankCandidate {
            similarity: 0.8,
            verified_weight: 50.0,
            lang_boost_da: 1.0,
            ..RankCandidate::new("a", "x")
        };
        let score = compute_final_score(&c, &ScoringWeights::default());
        assert!((score - 15.61).abs() < 1e-9, "got {}", score);
    }

    #[test]
    fn test_domain_bonus_and_manual_weight() {
        let c = RankCandidate {
            similarity: 0.5,
            manual_academic_weight: 10.0,
            domain_boost_dk: 1.0,
            ..RankCandidate::new("a", "x")
        };
        let weights = ScoringWeights {
            alpha: 1.0,
            beta: 1.0,
            m_lang: 2.0,
            m_domain: 3.0,
        };
        // 0.5 + 10 + 3, language bonus does not fire
        assert!((compute_final_score(&c, &weights) - 13.5).abs() < 1e-9);
    }

    #[test]
    fn test_fractional_boost_adds_full_multiplier() {
        let c = RankCandidate {
            lang_boost_da: 0.4,
            ..RankCandidate::new("a", "x")
        };
        let weights = ScoringWeights {
            alpha: 0.0,
            beta: 0.0,
            m_lang: 0.25,
            m_domain: 0.0,
        };
        assert_eq!(compute_final_score(&c, &weights), 0.25);
    }

    #[test]
    fn test_nan_fields_score_as_zero() {
        let mut c = cand("nan", f64::NAN, f64::INFINITY);
        c.lang_boost_da = f64::NAN;
        let score = compute_final_score(&c, &ScoringWeights::default());
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_rank_sorts_and_truncates() {
        let candidates = vec![cand("low", 0.1, 0.0), cand("high", 0.9, 0.0), cand("mid", 0.5, 0.0)];
        let out = rank(&candidates, &ScoringWeights::default(), 2, DEFAULT_SEPARATOR);

        let ids: Vec<_> = out.ranked.iter().map(|r| r.candidate.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid"]);
        assert_eq!(out.ranked_text, "text high\n\n---\n\ntext mid");
        assert_eq!(out.total_candidates, 3);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let candidates = vec![
            cand("first", 0.5, 1.0),
            cand("second", 0.5, 1.0),
            cand("third", 0.5, 1.0),
        ];
        let out = rank(&candidates, &ScoringWeights::default(), 10, DEFAULT_SEPARATOR);
        let ids: Vec<_> = out.ranked.iter().map(|r| r.candidate.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_top_n_zero_and_empty_input() {
        let candidates = vec![cand("a", 0.5, 0.0)];
        let out = rank(&candidates, &ScoringWeights::default(), 0, DEFAULT_SEPARATOR);
        assert!(out.ranked.is_empty());
        assert!(out.ranked_text.is_empty());

        let out = rank(&[], &ScoringWeights::default(), 20, DEFAULT_SEPARATOR);
        assert!(out.ranked.is_empty());
        assert_eq!(out.ranked_text, "");
    }

    #[test]
    fn test_join_skips_blank_and_trims() {
        let mut blank = cand("blank", 0.9, 0.0);
        blank.text = "   ".to_string();
        let mut padded = cand("padded", 0.1, 0.0);
        padded.text = "  body  \n".to_string();

        let out = rank(&[blank, padded], &ScoringWeights::default(), 5, " | ");
        assert_eq!(out.ranked.len(), 2);
        assert_eq!(out.ranked_text, "body");
    }
}
