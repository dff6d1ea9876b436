//! Source-diversity mixing over an already ranked candidate list

use crate::types::*;
use std::collections::{HashMap, HashSet};

/// Assumed number of chunks one file contributes to a good context
const CHUNKS_PER_FILE: usize = 3;

/// Select up to `target_total` candidates spread across several source files.
///
/// `ranked` must be best first. Rank order stays the primary signal: files are
/// chosen in order of their best candidate, each file is capped, and leftover
/// slots are backfilled by rank. The result keeps the input's rank order.
pub fn mix_sources(
    ranked: &[RankedCandidate],
    target_total: usize,
    opts: &MixOptions,
) -> Vec<RankedCandidate> {
    let keep_unfiled = opts.unfiled == UnfiledPolicy::Backfill;
    if ranked.len() <= target_total {
        return ranked
            .iter()
            .filter(|item| keep_unfiled || item.candidate.file_id.is_some())
            .cloned()
            .collect();
    }
    if target_total == 0 {
        return Vec::new();
    }

    // Files in order of first appearance, plus each file's candidate positions
    let mut file_order: Vec<&str> = Vec::new();
    let mut by_file: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut seen_ids: HashSet<&str> = HashSet::new();
    let mut eligible: Vec<usize> = Vec::new();

    for (idx, item) in ranked.iter().enumerate() {
        // Duplicate ids would break the subset guarantee; keep the best one
        if !seen_ids.insert(item.candidate.id.as_str()) {
            continue;
        }
        match item.candidate.file_id.as_deref() {
            Some(file) => {
                let positions = by_file.entry(file).or_insert_with(|| {
                    file_order.push(file);
                    Vec::new()
                });
                positions.push(idx);
                eligible.push(idx);
            }
            None => {
                if keep_unfiled {
                    eligible.push(idx);
                }
            }
        }
    }

    let desired_files = desired_file_count(target_total, opts, file_order.len());
    let mut taken: HashSet<usize> = HashSet::new();

    if desired_files > 0 {
        let per_file_cap = target_total.div_ceil(desired_files);
        let chosen = &file_order[..desired_files];
        let mut cursors = vec![0usize; chosen.len()];

        // Round robin: one candidate per file per pass
        loop {
            let mut progressed = false;
            for (slot, file) in chosen.iter().enumerate() {
                if taken.len() >= target_total {
                    break;
                }
                let positions = &by_file[file];
                if cursors[slot] >= per_file_cap || cursors[slot] >= positions.len() {
                    continue;
                }
                taken.insert(positions[cursors[slot]]);
                cursors[slot] += 1;
                progressed = true;
            }
            if !progressed || taken.len() >= target_total {
                break;
            }
        }

        tracing::debug!(
            "Mixed {} candidates from {} files (cap {} per file)",
            taken.len(),
            desired_files,
            per_file_cap
        );
    }

    // Backfill by overall rank from whatever is left
    for idx in &eligible {
        if taken.len() >= target_total {
            break;
        }
        taken.insert(*idx);
    }

    let mut picked: Vec<usize> = taken.into_iter().collect();
    picked.sort_unstable();
    picked.into_iter().map(|idx| ranked[idx].clone()).collect()
}

/// `clamp(ceil(target / 3), min_files, min(max_files, available))`, where the
/// upper bound wins when `min_files` exceeds it.
pub fn desired_file_count(target_total: usize, opts: &MixOptions, available_files: usize) -> usize {
    let upper = opts.max_files.min(available_files);
    target_total
        .div_ceil(CHUNKS_PER_FILE)
        .max(opts.min_files)
        .min(upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked_item(id: &str, file: Option<&str>, score: f64) -> RankedCandidate {
        RankedCandidate {
            candidate: RankCandidate {
                file_id: file.map(str::to_string),
                ..RankCandidate::new(id, format!("chunk {}", id))
            },
            final_score: score,
        }
    }

    fn ids(items: &[RankedCandidate]) -> Vec<&str> {
        items.iter().map(|i| i.candidate.id.as_str()).collect()
    }

    #[test]
    fn test_small_input_returned_unchanged() {
        let input = vec![
            ranked_item("a1", Some("A"), 3.0),
            ranked_item("a2", Some("A"), 2.0),
            ranked_item("x", None, 1.0),
        ];
        let out = mix_sources(&input, 3, &MixOptions::default());
        assert_eq!(out, input);
    }

    #[test]
    fn test_second_file_gets_represented() {
        let mut input = Vec::new();
        for i in 0..10 {
            input.push(ranked_item(&format!("a{}", i), Some("A"), 100.0 - i as f64));
        }
        for i in 0..5 {
            input.push(ranked_item(&format!("b{}", i), Some("B"), 50.0 - i as f64));
        }

        let opts = MixOptions {
            min_files: 2,
            ..Default::default()
        };
        let out = mix_sources(&input, 6, &opts);

        assert_eq!(out.len(), 6);
        assert!(out.iter().any(|c| c.candidate.file_id.as_deref() == Some("B")));
        // Cap is ceil(6 / 2) = 3 per file, output in rank order
        assert_eq!(ids(&out), vec!["a0", "a1", "a2", "b0", "b1", "b2"]);
    }

    #[test]
    fn test_backfill_when_chosen_files_run_dry() {
        // File B has a single chunk, so the cap leaves a slot for backfill
        let input = vec![
            ranked_item("a0", Some("A"), 9.0),
            ranked_item("a1", Some("A"), 8.0),
            ranked_item("b0", Some("B"), 7.0),
            ranked_item("a2", Some("A"), 6.0),
            ranked_item("a3", Some("A"), 5.0),
            ranked_item("c0", Some("C"), 4.0),
        ];
        let opts = MixOptions {
            min_files: 2,
            max_files: 2,
            unfiled: UnfiledPolicy::Backfill,
        };
        let out = mix_sources(&input, 5, &opts);

        // desired = 2 (A, B), cap = 3: a0 b0 a1 a2, then backfill a3
        assert_eq!(ids(&out), vec!["a0", "a1", "b0", "a2", "a3"]);
    }

    #[test]
    fn test_unfiled_candidates_only_backfill() {
        let input = vec![
            ranked_item("loose", None, 10.0),
            ranked_item("a0", Some("A"), 9.0),
            ranked_item("a1", Some("A"), 8.0),
            ranked_item("stray", None, 7.0),
        ];
        let opts = MixOptions {
            min_files: 1,
            max_files: 3,
            unfiled: UnfiledPolicy::Backfill,
        };
        // File A runs dry after two chunks, "loose" fills the last slot
        let out = mix_sources(&input, 3, &opts);
        assert_eq!(ids(&out), vec!["loose", "a0", "a1"]);

        let drop = MixOptions {
            unfiled: UnfiledPolicy::Drop,
            ..opts
        };
        let out = mix_sources(&input, 3, &drop);
        assert_eq!(ids(&out), vec!["a0", "a1"]);
    }

    #[test]
    fn test_drop_policy_applies_below_target() {
        let input = vec![
            ranked_item("loose", None, 10.0),
            ranked_item("a0", Some("A"), 9.0),
            ranked_item("a1", Some("A"), 8.0),
        ];
        let drop = MixOptions {
            unfiled: UnfiledPolicy::Drop,
            ..Default::default()
        };
        assert_eq!(ids(&mix_sources(&input, 3, &drop)), vec!["a0", "a1"]);
        assert_eq!(ids(&mix_sources(&input, 10, &drop)), vec!["a0", "a1"]);

        // Backfill still returns small inputs unchanged
        let out = mix_sources(&input, 3, &MixOptions::default());
        assert_eq!(out, input);
    }

    #[test]
    fn test_all_unfiled_falls_back_to_rank_order() {
        let input: Vec<_> = (0..5)
            .map(|i| ranked_item(&format!("u{}", i), None, 10.0 - i as f64))
            .collect();
        let out = mix_sources(&input, 2, &MixOptions::default());
        assert_eq!(ids(&out), vec!["u0", "u1"]);
    }

    #[test]
    fn test_output_is_bounded_subset_without_duplicates() {
        let mut input = Vec::new();
        for i in 0..30 {
            let file = format!("F{}", i % 7);
            input.push(ranked_item(&format!("c{}", i), Some(&file), 100.0 - i as f64));
        }
        // Duplicate id further down the list
        input.push(ranked_item("c0", Some("F3"), 1.0));

        for target in [0, 1, 4, 9, 17, 30] {
            let out = mix_sources(&input, target, &MixOptions::default());
            assert!(out.len() <= target);

            let mut seen = HashSet::new();
            for item in &out {
                assert!(seen.insert(item.candidate.id.clone()), "duplicate {}", item.candidate.id);
                assert!(input.iter().any(|c| c.candidate.id == item.candidate.id));
            }
        }
    }

    #[test]
    fn test_desired_file_count_bounds() {
        let opts = MixOptions {
            min_files: 2,
            max_files: 5,
            unfiled: UnfiledPolicy::Backfill,
        };
        assert_eq!(desired_file_count(6, &opts, 10), 2);
        assert_eq!(desired_file_count(12, &opts, 10), 4);
        assert_eq!(desired_file_count(30, &opts, 10), 5);
        assert_eq!(desired_file_count(3, &opts, 10), 2);
        // Only one file exists: the minimum cannot be met
        assert_eq!(desired_file_count(12, &opts, 1), 1);
        assert_eq!(desired_file_count(12, &opts, 0), 0);
    }
}
