//! Switches that may be updated together as one unit.
//!
//! Merging switches into classes shrinks the number of update components in the
//! Petri game. Three rules produce classes:
//!
//! - switches that only route in the initial configuration must go in the last batch,
//! - switches that only route in the final configuration must go in the first batch,
//! - the interior of a strongly connected "chain" can flip in one step.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use crate::cusp::Cuspt;
use crate::topology::Topology;
use crate::types::Switch;

/// Constraint on the batch a class is scheduled in.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum BatchOrder {
    Unknown,
    First,
    Last,
}

impl fmt::Display for BatchOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchOrder::Unknown => write!(f, "UNKNOWN"),
            BatchOrder::First => write!(f, "FIRST"),
            BatchOrder::Last => write!(f, "LAST"),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EquivalenceClass {
    pub switches: BTreeSet<Switch>,
    pub batch_order: BatchOrder,
}

impl EquivalenceClass {
    pub fn new(switches: impl IntoIterator<Item = Switch>, batch_order: BatchOrder) -> Self {
        Self {
            switches: switches.into_iter().collect(),
            batch_order,
        }
    }

    /// Component name used in the Petri game: switch ids joined by `_`.
    pub fn name(&self) -> String {
        self.switches
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl fmt::Display for EquivalenceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Equivalence class {{{}}} {}", self.name().replace('_', ", "), self.batch_order)
    }
}

/// Switches that stop routing after the update; they must be updated last.
pub fn only_in_initial(cuspt: &Cuspt) -> EquivalenceClass {
    EquivalenceClass::new(
        cuspt
            .all_switches()
            .into_iter()
            .filter(|&s| !cuspt.initial_hops(s).is_empty() && cuspt.final_hops(s).is_empty()),
        BatchOrder::Last,
    )
}

/// Switches that only start routing after the update; they must be updated first.
pub fn only_in_final(cuspt: &Cuspt) -> EquivalenceClass {
    EquivalenceClass::new(
        cuspt
            .all_switches()
            .into_iter()
            .filter(|&s| cuspt.initial_hops(s).is_empty() && !cuspt.final_hops(s).is_empty()),
        BatchOrder::First,
    )
}

/// Checks that the initial edges inside `scc` together with the reversed final edges
/// form no cycle.
fn acyclic_with_final_reversed(cuspt: &Cuspt, scc: &BTreeSet<Switch>) -> bool {
    let mut succ: BTreeMap<Switch, Vec<Switch>> = BTreeMap::new();
    let mut indegree: BTreeMap<Switch, usize> = scc.iter().map(|&s| (s, 0)).collect();
    for &u in scc {
        let forward = cuspt.initial_hops(u).iter().filter(|v| scc.contains(*v)).map(|&v| (u, v));
        let backward = cuspt.final_hops(u).iter().filter(|v| scc.contains(*v)).map(|&v| (v, u));
        for (a, b) in forward.chain(backward) {
            succ.entry(a).or_default().push(b);
            *indegree.entry(b).or_default() += 1;
        }
    }

    let mut queue: VecDeque<Switch> = indegree.iter().filter(|(_, &d)| d == 0).map(|(&s, _)| s).collect();
    let mut removed = 0;
    while let Some(u) = queue.pop_front() {
        removed += 1;
        for v in succ.get(&u).into_iter().flatten() {
            if let Some(d) = indegree.get_mut(v) {
                *d -= 1;
                if *d == 0 {
                    queue.push_back(*v);
                }
            }
        }
    }
    removed == scc.len()
}

/// Chain classes: for each component of at least four switches with exactly two
/// switches routing out of it, the updatable interior switches.
pub fn chain_classes(cuspt: &Cuspt, topology: &Topology) -> Vec<EquivalenceClass> {
    topology
        .sccs()
        .iter()
        .filter(|scc| scc.len() >= 4)
        .filter_map(|scc| {
            let boundary: BTreeSet<Switch> = scc
                .iter()
                .copied()
                .filter(|&s| cuspt.next_hops(s).iter().any(|t| !scc.contains(t)))
                .collect();
            if boundary.len() != 2 || !acyclic_with_final_reversed(cuspt, scc) {
                return None;
            }
            Some(EquivalenceClass::new(
                scc.iter()
                    .copied()
                    .filter(|s| !boundary.contains(s) && cuspt.is_updatable(*s)),
                BatchOrder::Unknown,
            ))
        })
        .filter(|c| !c.switches.is_empty())
        .collect()
}

/// Applies the enabled rules and reconciles their results.
///
/// Switches claimed by the initial/final classes are removed from chain classes, and
/// empty classes are dropped.
///
/// # Panics
///
/// Panics if the resulting classes overlap.
pub fn discover_equivalence_classes(
    cuspt: &Cuspt,
    topology: &Topology,
    initial_final: bool,
    chain: bool,
) -> Vec<EquivalenceClass> {
    let (last, first) = if initial_final {
        (only_in_initial(cuspt), only_in_final(cuspt))
    } else {
        (
            EquivalenceClass::new([], BatchOrder::Last),
            EquivalenceClass::new([], BatchOrder::First),
        )
    };
    let chains = if chain { chain_classes(cuspt, topology) } else { Vec::new() };

    let claimed: BTreeSet<Switch> = last.switches.union(&first.switches).copied().collect();
    let mut classes: Vec<EquivalenceClass> = chains
        .into_iter()
        .map(|c| EquivalenceClass::new(c.switches.difference(&claimed).copied(), c.batch_order))
        .collect();
    classes.push(last);
    classes.push(first);
    classes.retain(|c| !c.switches.is_empty());

    let mut seen = BTreeSet::new();
    for class in &classes {
        for &s in &class.switches {
            assert!(seen.insert(s), "Switch {} belongs to two equivalence classes", s);
        }
    }
    classes
}
