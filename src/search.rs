//! Searching for the smallest batch bound the verifier can satisfy.
//!
//! Every check rewrites the bound of the same query and asks the verifier again.
//! The strategy returned for the smallest satisfied bound is decoded into the
//! update schedule.

use std::sync::OnceLock;

use log::{debug, info};
use regex::Regex;

use crate::error::VerifierError;
use crate::petri::{Query, CONUP};
use crate::types::{Batch, Switch};
use crate::verifier::{Verdict, Verifier};

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum SearchStrategy {
    /// Check the upper bound, then count down from five, then from the top.
    #[default]
    Sequential,
    /// Integer bisection between a lower bound and the upper bound.
    Bisection,
}

fn firing_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\["(\w+)"\]"#).expect("firing pattern is valid"))
}

fn switch_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"_(\d+)").expect("switch id pattern is valid"))
}

/// Decodes a strategy into batches.
///
/// Transition firings appear as `["NAME"]` in firing order; the final firing is
/// the commit of the last batch and is ignored. Each `UPDATE_T_CONUP` starts a new
/// batch, and the switch ids embedded in `SWITCH_*` names go into the current one.
pub fn parse_strategy(strategy: &str) -> Vec<Batch> {
    let names: Vec<&str> = firing_regex()
        .captures_iter(strategy)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect();

    let mut batches = vec![Batch::new()];
    for &name in names.iter().take(names.len().saturating_sub(1)) {
        if name == CONUP {
            batches.push(Batch::new());
        } else if name.starts_with("SWITCH_") {
            let ids = switch_id_regex()
                .captures_iter(name)
                .filter_map(|c| c.get(1))
                .filter_map(|m| m.as_str().parse::<i32>().ok())
                .map(Switch::new);
            if let Some(batch) = batches.last_mut() {
                batch.extend(ids);
            }
        }
    }
    batches
}

fn check<V: Verifier + ?Sized>(
    verifier: &mut V,
    query: &Query,
    bound: usize,
    strategy: &mut Option<String>,
) -> Result<bool, VerifierError> {
    let verdict = verifier.verify(&query.with_bound(bound))?;
    debug!(
        "Verification {} with <= {} batches",
        if verdict.is_satisfied() { "succeeded" } else { "failed" },
        bound
    );
    match verdict {
        Verdict::Satisfied { strategy: s } => {
            *strategy = Some(s);
            Ok(true)
        }
        Verdict::Unsatisfied => Ok(false),
    }
}

/// Sequential search below `upper`.
///
/// The upper bound is checked first; with a batch cap of 1 that answer is final.
/// Otherwise the bounds from 5 down are checked one at a time until one fails. If
/// even 5 fails, the bounds from `upper - 1` down are checked instead.
pub fn sequential_search<V: Verifier + ?Sized>(
    verifier: &mut V,
    query: &Query,
    upper: usize,
    max_switches_per_batch: usize,
) -> Result<Option<Vec<Batch>>, VerifierError> {
    let mut strategy = None;
    let mut verified = check(verifier, query, upper, &mut strategy)?;
    if max_switches_per_batch == 1 {
        info!(
            "Subproblem verification {}",
            if verified { "succeeded" } else { "failed" }
        );
        return Ok(strategy.map(|s| parse_strategy(&s)));
    }

    if verified {
        let mut case = match upper {
            u if u > 5 => 5,
            5 => 4,
            u => u.saturating_sub(1),
        };
        while case > 0 {
            verified = check(verifier, query, case, &mut strategy)?;
            if verified {
                case -= 1;
            } else if case == 5 {
                case = upper - 1;
                break;
            } else {
                break;
            }
        }
        if !verified {
            while case > 5 {
                verified = check(verifier, query, case, &mut strategy)?;
                if !verified {
                    break;
                }
                case -= 1;
            }
        }
    }

    Ok(strategy.map(|s| parse_strategy(&s)))
}

/// Bisection search between `max(upper / cap, min_batches)` and `upper`, starting at 5.
///
/// The lower bound is treated as already refuted and is never checked itself.
/// When the first check fails the upper bound is checked right away, since large
/// schedules are rare and this settles infeasible problems quickly.
pub fn bisection_search<V: Verifier + ?Sized>(
    verifier: &mut V,
    query: &Query,
    upper: usize,
    min_batches: usize,
    max_switches_per_batch: usize,
) -> Result<Option<Vec<Batch>>, VerifierError> {
    let mid = |hi: usize, lo: usize| (hi + lo + 1) / 2;

    let mut lower = if max_switches_per_batch != 0 {
        upper / max_switches_per_batch
    } else {
        0
    };
    lower = lower.max(min_batches);
    let mut k = upper.min(5).max(lower);
    let mut upper = upper;
    let mut lowest = usize::MAX;
    let mut strategy = None;
    let mut first = true;

    while k < lowest {
        if check(verifier, query, k, &mut strategy)? {
            upper = k;
            lowest = k;
            k = mid(upper, lower);
        } else {
            lower = k;
            if first && k != upper {
                k = upper;
            } else if k == upper {
                break;
            } else {
                k = mid(upper, lower);
            }
        }
        first = false;
    }

    Ok(strategy.map(|s| parse_strategy(&s)))
}

/// Runs the chosen search strategy.
pub fn search<V: Verifier + ?Sized>(
    strategy: SearchStrategy,
    verifier: &mut V,
    query: &Query,
    upper: usize,
    max_switches_per_batch: usize,
) -> Result<Option<Vec<Batch>>, VerifierError> {
    match strategy {
        SearchStrategy::Sequential => sequential_search(verifier, query, upper, max_switches_per_batch),
        SearchStrategy::Bisection => bisection_search(verifier, query, upper, 0, max_switches_per_batch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    /// Satisfied exactly from `minimum` batches on; answers with the schedule
    /// `{1}, {2}, ..., {minimum}`.
    struct Threshold {
        minimum: usize,
        asked: Vec<usize>,
    }

    impl Threshold {
        fn new(minimum: usize) -> Self {
            Self {
                minimum,
                asked: Vec::new(),
            }
        }
    }

    impl Verifier for Threshold {
        fn verify(&mut self, query: &Query) -> Result<Verdict, VerifierError> {
            self.asked.push(query.batch_bound);
            if query.batch_bound < self.minimum {
                return Ok(Verdict::Unsatisfied);
            }
            let strategy = (1..=self.minimum)
                .map(|i| format!(r#"["SWITCH_T_{}_QUEUE"] ["UPDATE_T_CONUP"]"#, i))
                .collect::<Vec<_>>()
                .join("\n");
            Ok(Verdict::Satisfied { strategy })
        }
    }

    fn query() -> Query {
        Query {
            final_places: vec!["DFA_Pstate_1".into()],
            batch_bound: 0,
        }
    }

    fn batch(ids: &[i32]) -> Batch {
        ids.iter().map(|&i| Switch::new(i)).collect()
    }

    #[test]
    fn test_parse_strategy() {
        let s = r#"
            ["SWITCH_T_3_QUEUE"] ["SWITCH_T_4_5_QUEUE"] ["UPDATE_T_CONUP"]
            ["SWITCH_T_2_QUEUE"] ["UPDATE_T_CONUP"]
        "#;
        assert_eq!(parse_strategy(s), vec![batch(&[3, 4, 5]), batch(&[2])]);
    }

    #[test]
    fn test_parse_empty_strategy() {
        assert_eq!(parse_strategy(""), vec![Batch::new()]);
    }

    #[test]
    fn test_sequential_counts_down_from_five() {
        let mut v = Threshold::new(3);
        let result = sequential_search(&mut v, &query(), 8, 0).unwrap().unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(v.asked, vec![8, 5, 4, 3, 2]);
    }

    #[test]
    fn test_sequential_counts_down_from_top() {
        let mut v = Threshold::new(7);
        let result = sequential_search(&mut v, &query(), 8, 0).unwrap().unwrap();
        assert_eq!(result.len(), 7);
        assert_eq!(v.asked, vec![8, 5, 7, 6]);
    }

    #[test]
    fn test_sequential_small_upper() {
        let mut v = Threshold::new(2);
        let result = sequential_search(&mut v, &query(), 3, 0).unwrap().unwrap();
        assert_eq!(result, vec![batch(&[1]), batch(&[2])]);
        assert_eq!(v.asked, vec![3, 2, 1]);
    }

    #[test]
    fn test_sequential_infeasible() {
        let mut v = Threshold::new(10);
        assert!(sequential_search(&mut v, &query(), 8, 0).unwrap().is_none());
        assert_eq!(v.asked, vec![8]);
    }

    #[test]
    fn test_sequential_single_switch_batches() {
        let mut v = Threshold::new(3);
        let result = sequential_search(&mut v, &query(), 8, 1).unwrap().unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(v.asked, vec![8]);
    }

    #[test]
    fn test_bisection() {
        let mut v = Threshold::new(3);
        let result = bisection_search(&mut v, &query(), 8, 1, 0).unwrap().unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(v.asked, vec![5, 3, 2]);

        let mut v = Threshold::new(7);
        let result = bisection_search(&mut v, &query(), 8, 1, 0).unwrap().unwrap();
        assert_eq!(result.len(), 7);
        assert_eq!(v.asked, vec![5, 8, 7, 6]);
    }

    #[test]
    fn test_bisection_infeasible() {
        let mut v = Threshold::new(10);
        assert!(bisection_search(&mut v, &query(), 8, 1, 0).unwrap().is_none());
        assert_eq!(v.asked, vec![5, 8]);
    }

    #[test]
    fn test_strategies_agree() {
        for minimum in 1..=9 {
            let mut a = Threshold::new(minimum);
            let mut b = Threshold::new(minimum);
            let seq = search(SearchStrategy::Sequential, &mut a, &query(), 9, 0).unwrap();
            let bis = search(SearchStrategy::Bisection, &mut b, &query(), 9, 0).unwrap();
            assert_eq!(seq, bis, "minimum {}", minimum);
        }
    }

    struct Broken;

    impl Verifier for Broken {
        fn verify(&mut self, _: &Query) -> Result<Verdict, VerifierError> {
            Err(VerifierError::ToolFailure {
                diagnostics: "crashed".into(),
            })
        }
    }

    #[test]
    fn test_tool_failure_propagates() {
        assert!(sequential_search(&mut Broken, &query(), 4, 0).is_err());
        assert!(bisection_search(&mut Broken, &query(), 4, 1, 0).is_err());
    }
}
