//! End-to-end synthesis: policy composition, decomposition, per-subproblem
//! compilation and batch search, and merging of the partial schedules.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{debug, info};

use crate::cusp::{Cusp, Cuspt};
use crate::decompose::topological_decomposition;
use crate::equivalence::{discover_equivalence_classes, BatchOrder, EquivalenceClass};
use crate::error::SynthesisError;
use crate::model::UpdateSynthesisModel;
use crate::petri::compile;
use crate::policy::{generate_policy, network_topology};
use crate::search::{search, SearchStrategy};
use crate::topology::Topology;
use crate::types::{Batch, StateId, Switch};
use crate::verifier::Engine;

/// Which reductions to apply and how to search.
#[derive(Debug, Clone)]
pub struct Options {
    /// Split the problem at bottleneck switches.
    pub decomposition: bool,
    /// Pin switches routing in only one configuration to the first or last batch.
    pub initial_final_classes: bool,
    /// Merge the interior of reversible chains into one update component.
    pub chain_classes: bool,
    /// Order waypoint automata by network phase while intersecting them.
    pub automaton_reduction: bool,
    /// Most update components per batch; 0 means unlimited.
    pub max_switches_per_batch: usize,
    pub search: SearchStrategy,
    /// Write each subproblem's model and query to `<prefix>_model<i>.pnml` and
    /// `<prefix>_query<i>.q`.
    pub debug_prefix: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            decomposition: true,
            initial_final_classes: true,
            chain_classes: true,
            automaton_reduction: true,
            max_switches_per_batch: 0,
            search: SearchStrategy::Sequential,
            debug_prefix: None,
        }
    }
}

impl Options {
    pub fn with_decomposition(mut self, enabled: bool) -> Self {
        self.decomposition = enabled;
        self
    }

    pub fn with_initial_final_classes(mut self, enabled: bool) -> Self {
        self.initial_final_classes = enabled;
        self
    }

    pub fn with_chain_classes(mut self, enabled: bool) -> Self {
        self.chain_classes = enabled;
        self
    }

    pub fn with_automaton_reduction(mut self, enabled: bool) -> Self {
        self.automaton_reduction = enabled;
        self
    }

    pub fn with_max_switches_per_batch(mut self, max: usize) -> Self {
        self.max_switches_per_batch = max;
        self
    }

    pub fn with_search(mut self, search: SearchStrategy) -> Self {
        self.search = search;
        self
    }

    pub fn with_debug_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.debug_prefix = Some(prefix.into());
        self
    }
}

/// Result of a synthesis run. Infeasibility is a regular outcome.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Outcome {
    Solved { batches: Vec<Batch> },
    Unsolvable,
}

impl Outcome {
    pub fn batches(&self) -> Option<&[Batch]> {
        match self {
            Outcome::Solved { batches } => Some(batches),
            Outcome::Unsolvable => None,
        }
    }

    pub fn is_solved(&self) -> bool {
        matches!(self, Outcome::Solved { .. })
    }
}

/// Synthesizes a minimal consistent update schedule for `usm`.
pub fn synthesize<E: Engine>(
    usm: &UpdateSynthesisModel,
    options: &Options,
    engine: &mut E,
) -> Result<Outcome, SynthesisError> {
    let time_total = Instant::now();

    let time = Instant::now();
    let topology = network_topology(usm);
    let policy = generate_policy(usm, options.automaton_reduction.then_some(&topology));
    info!(
        "Policy generation took {:.3} s: {} states, {} transitions",
        time.elapsed().as_secs_f64(),
        policy.num_states(),
        policy.num_transitions()
    );
    if policy.is_empty() {
        info!("Policy accepts no path, problem is unsolvable");
        return Ok(Outcome::Unsolvable);
    }

    let cuspt = Cusp::from_model(usm, policy).with_pseudo_nodes();
    info!("Switches to update: {}", cuspt.updatable_switches().len());

    let time = Instant::now();
    let subproblems = if options.decomposition {
        topological_decomposition(&cuspt, &topology)
    } else {
        vec![cuspt]
    };
    info!(
        "Topological decomposition took {:.3} s, {} subproblems",
        time.elapsed().as_secs_f64(),
        subproblems.len()
    );

    let mut schedule: Vec<Batch> = Vec::new();
    for (i, sub) in subproblems.iter().enumerate() {
        let time = Instant::now();
        let solved = solve_subproblem(i, sub, options, engine)?;
        info!(
            "Subproblem {} verification time: {:.3} s",
            i,
            time.elapsed().as_secs_f64()
        );
        match solved {
            Some(batches) => {
                debug!("Subproblem {} solvable with {} batches: {:?}", i, batches.len(), batches);
                merge_by_index(&mut schedule, batches);
            }
            None => {
                info!("Subproblem {} unsolvable", i);
                return Ok(Outcome::Unsolvable);
            }
        }
    }

    info!(
        "Synthesized {} batches in {:.3} s",
        schedule.len(),
        time_total.elapsed().as_secs_f64()
    );
    Ok(Outcome::Solved { batches: schedule })
}

fn solve_subproblem<E: Engine>(
    i: usize,
    sub: &Cuspt,
    options: &Options,
    engine: &mut E,
) -> Result<Option<Vec<Batch>>, SynthesisError> {
    debug!("Solving subproblem {} ({} -> {})", i, sub.ingress, sub.egress);
    if sub.policy.is_empty() {
        return Ok(None);
    }

    let topology = Topology::new(sub);
    let classes = discover_equivalence_classes(
        sub,
        &topology,
        options.initial_final_classes,
        options.chain_classes,
    );
    for class in &classes {
        debug!("{}", class);
    }

    let time = Instant::now();
    let compiled = compile(sub, &classes, options.max_switches_per_batch);
    debug!(
        "Translation to Petri game took {:.3} s",
        time.elapsed().as_secs_f64()
    );

    if compiled.components == 0 {
        debug!("Subproblem {} has no switch to update", i);
        return Ok(fixed_routing_accepted(sub).then(Vec::new));
    }

    if let Some(prefix) = &options.debug_prefix {
        let pnml = compiled
            .game
            .to_pnml()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        write_debug_file(prefix, &format!("_model{}.pnml", i), &pnml)?;
        let query = format!("{}\n", compiled.query.with_bound(compiled.components));
        write_debug_file(prefix, &format!("_query{}.q", i), &query)?;
    }

    let mut session = engine.load(&compiled.game)?;
    let batches = search(
        options.search,
        &mut session,
        &compiled.query,
        compiled.components,
        options.max_switches_per_batch,
    )?;
    Ok(batches.map(|b| with_ordered_classes(b, &classes)))
}

fn write_debug_file(prefix: &Path, suffix: &str, contents: &str) -> std::io::Result<()> {
    let mut name = prefix.as_os_str().to_owned();
    name.push(suffix);
    let path = PathBuf::from(name);
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    debug!("Writing {}", path.display());
    fs::write(path, contents)
}

/// Checks, for a subproblem whose routing never changes, that every forwarding path
/// from the ingress drives the policy into an accepting state.
fn fixed_routing_accepted(sub: &Cuspt) -> bool {
    fn walk(sub: &Cuspt, s: Switch, state: StateId, path: &mut BTreeSet<Switch>) -> bool {
        if sub.policy.is_final(state) {
            return true;
        }
        let next = sub.initial_hops(s);
        if state.is_dead() || s == sub.egress || next.is_empty() || !path.insert(s) {
            return false;
        }
        let ok = next
            .iter()
            .all(|&t| walk(sub, t, sub.policy.lookup(state, &t), path));
        path.remove(&s);
        ok
    }
    walk(sub, sub.ingress, sub.policy.initial(), &mut BTreeSet::new())
}

/// Adds FIRST classes to the first batch and LAST classes to the last one.
///
/// A schedule with a single batch receives both, rather than only the FIRST
/// classes. An empty schedule with pinned classes gets one batch holding them all.
pub fn with_ordered_classes(mut batches: Vec<Batch>, classes: &[EquivalenceClass]) -> Vec<Batch> {
    let pinned = |order: BatchOrder| -> Batch {
        classes
            .iter()
            .filter(|c| c.batch_order == order)
            .flat_map(|c| c.switches.iter().copied())
            .collect()
    };
    let (first, last) = (pinned(BatchOrder::First), pinned(BatchOrder::Last));
    if batches.is_empty() && !(first.is_empty() && last.is_empty()) {
        batches.push(Batch::new());
    }
    if let Some(b) = batches.first_mut() {
        b.extend(first);
    }
    if let Some(b) = batches.last_mut() {
        b.extend(last);
    }
    batches
}

/// Unions `batches` into `schedule` position by position.
pub fn merge_by_index(schedule: &mut Vec<Batch>, batches: Vec<Batch>) {
    for (i, batch) in batches.into_iter().enumerate() {
        match schedule.get_mut(i) {
            Some(existing) => existing.extend(batch),
            None => schedule.push(batch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    fn batch(ids: &[i32]) -> Batch {
        ids.iter().map(|&i| Switch::new(i)).collect()
    }

    #[test]
    fn test_merge_by_index() {
        let mut schedule = vec![batch(&[1]), batch(&[2])];
        merge_by_index(&mut schedule, vec![batch(&[5]), batch(&[6]), batch(&[7])]);
        assert_eq!(schedule, vec![batch(&[1, 5]), batch(&[2, 6]), batch(&[7])]);
        merge_by_index(&mut schedule, vec![]);
        assert_eq!(schedule.len(), 3);
    }

    #[test]
    fn test_ordered_classes() {
        let classes = vec![
            EquivalenceClass::new(batch(&[8]), BatchOrder::First),
            EquivalenceClass::new(batch(&[9]), BatchOrder::Last),
            EquivalenceClass::new(batch(&[3, 4]), BatchOrder::Unknown),
        ];
        let out = with_ordered_classes(vec![batch(&[3, 4]), batch(&[1])], &classes);
        assert_eq!(out, vec![batch(&[3, 4, 8]), batch(&[1, 9])]);

        // A single batch receives both.
        let out = with_ordered_classes(vec![batch(&[1])], &classes);
        assert_eq!(out, vec![batch(&[1, 8, 9])]);

        let out = with_ordered_classes(vec![], &classes);
        assert_eq!(out, vec![batch(&[8, 9])]);

        assert!(with_ordered_classes(vec![], &[]).is_empty());
    }

    #[test]
    fn test_options_builder() {
        let o = Options::default()
            .with_decomposition(false)
            .with_chain_classes(false)
            .with_max_switches_per_batch(2)
            .with_search(SearchStrategy::Bisection)
            .with_debug_prefix("out/run");
        assert!(!o.decomposition);
        assert!(o.initial_final_classes);
        assert!(!o.chain_classes);
        assert!(o.automaton_reduction);
        assert_eq!(o.max_switches_per_batch, 2);
        assert_eq!(o.search, SearchStrategy::Bisection);
        assert_eq!(o.debug_prefix, Some(PathBuf::from("out/run")));
    }
}
