//! Splitting a problem into independent subproblems at bottleneck switches.
//!
//! A switch that forms a narrowness-1 component on its own is passed by every
//! packet. When the policy is also in one known state whenever a packet reaches
//! it, the schedules before and after it can be synthesized separately and
//! merged batch by batch.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};
use num_traits::One;

use crate::automaton::Automaton;
use crate::cusp::{Cuspt, Routing};
use crate::topology::Topology;
use crate::types::{StateId, Switch};

/// Policy states a packet can be in when it reaches each switch.
///
/// States are propagated along the union of both routings in topological order,
/// iterating inside each component until every internal path has been followed.
/// A state is then kept only if the policy can still accept from it without
/// reading any relevant label of an earlier component again. The egress
/// pseudo-node gets the final states of the policy.
pub fn possible_states(cuspt: &Cuspt, topology: &Topology) -> BTreeMap<Switch, BTreeSet<StateId>> {
    let policy = &cuspt.policy;
    let step = |states: &BTreeSet<StateId>, s: Switch| -> BTreeSet<StateId> {
        states.iter().map(|&q| policy.lookup(q, &s)).collect()
    };

    let mut pos: BTreeMap<Switch, BTreeSet<StateId>> =
        cuspt.all_switches().into_iter().map(|s| (s, BTreeSet::new())).collect();
    pos.insert(cuspt.ingress, BTreeSet::from([policy.lookup(policy.initial(), &cuspt.ingress)]));

    let propagate = |pos: &mut BTreeMap<Switch, BTreeSet<StateId>>, s: Switch, t: Switch| {
        let from = pos.get(&s).cloned().unwrap_or_default();
        pos.entry(t).or_default().extend(step(&from, t));
    };

    for scc in topology.sccs() {
        for _ in 1..scc.len() {
            for &s in scc {
                for t in cuspt.next_hops(s).into_iter().filter(|t| scc.contains(t)) {
                    propagate(&mut pos, s, t);
                }
            }
        }
        for &s in scc {
            for t in cuspt.next_hops(s).into_iter().filter(|t| !scc.contains(t)) {
                propagate(&mut pos, s, t);
            }
        }
    }

    let relevant = policy.relevant_labels();
    let mut earlier = BTreeSet::new();
    for scc in topology.sccs() {
        let blacklist: BTreeSet<Switch> = relevant.intersection(&earlier).copied().collect();
        for s in scc {
            if let Some(states) = pos.get_mut(s) {
                states.retain(|&q| policy.can_reach_final(q, &blacklist));
            }
        }
        earlier.extend(scc.iter().copied());
    }

    if pos.contains_key(&Switch::EGRESS) {
        pos.insert(Switch::EGRESS, policy.finals().clone());
    }
    pos
}

#[derive(Debug, Clone)]
struct Subproblem {
    switches: BTreeSet<Switch>,
    entry: Switch,
    exit: Switch,
}

/// Splits `cuspt` at every bottleneck switch with a single possible policy state.
///
/// Subproblems with at most two switches have nothing to decide and are dropped.
/// Each remaining subproblem gets the policy restricted to its own switches, starting
/// in the state known at its entry and accepting in the states possible at its exit,
/// intersected with the requirement to reach the exit.
///
/// A policy that accepts nothing is not split: the result is `cuspt` itself.
pub fn topological_decomposition(cuspt: &Cuspt, topology: &Topology) -> Vec<Cuspt> {
    if cuspt.policy.is_empty() {
        info!("Policy accepts nothing, not decomposing");
        return vec![cuspt.clone()];
    }
    let pos = possible_states(cuspt, topology);
    let narrowness = topology.narrowness();

    let mut subproblems = Vec::new();
    let mut current = Subproblem {
        switches: BTreeSet::new(),
        entry: cuspt.ingress,
        exit: cuspt.egress,
    };
    for (scc, weight) in topology.sccs().iter().zip(narrowness) {
        let cut = match scc.first() {
            Some(&s) if weight.is_one() && scc.len() == 1 => Some(s),
            _ => None,
        };
        if let Some(s) = cut {
            let single_state = pos.get(&s).map_or(false, |states| states.len() == 1);
            if s != cuspt.egress && single_state && !current.switches.is_empty() {
                current.switches.insert(s);
                current.exit = s;
                debug!("cut at switch {}", s);
                subproblems.push(std::mem::replace(
                    &mut current,
                    Subproblem {
                        switches: BTreeSet::new(),
                        entry: s,
                        exit: cuspt.egress,
                    },
                ));
            }
        }
        current.switches.extend(scc.iter().copied());
    }
    subproblems.push(current);
    subproblems.retain(|sp| sp.switches.len() > 2);
    info!("Decomposed topology into {} subproblems", subproblems.len());

    subproblems.iter().filter_map(|sp| slice(cuspt, &pos, sp)).collect()
}

/// `None` unless the entry of `sp` has exactly one possible policy state.
fn slice(cuspt: &Cuspt, pos: &BTreeMap<Switch, BTreeSet<StateId>>, sp: &Subproblem) -> Option<Cuspt> {
    let policy = &cuspt.policy;
    let initial = match pos.get(&sp.entry) {
        Some(states) if states.len() == 1 => states.iter().next().copied()?,
        other => {
            debug!("cannot slice at entry {}: states {:?}", sp.entry, other);
            return None;
        }
    };
    let empty = BTreeSet::new();
    let finals = pos.get(&sp.exit).unwrap_or(&empty);

    let sliced = Automaton::build(sp.switches.iter().copied(), |b| {
        let handles: BTreeMap<StateId, _> = policy
            .states()
            .into_iter()
            .filter(|q| !q.is_dead())
            .map(|q| (q, b.new_state(q == initial, finals.contains(&q))))
            .collect();
        for (from, &label, to) in policy.edges() {
            if sp.switches.contains(&label) {
                let target = handles.get(&to).copied().unwrap_or_else(|| b.dead());
                b.edge(handles[&from], target, [label]);
            }
        }
    });
    let reach_exit = Automaton::build(sp.switches.iter().copied(), |b| {
        let start = b.new_state(true, false);
        let done = b.new_state(false, true);
        b.edge(start, done, [sp.exit]);
    });

    let restrict = |routing: &Routing| -> Routing {
        routing
            .iter()
            .filter(|(s, _)| **s != sp.exit && sp.switches.contains(s))
            .map(|(&s, next)| (s, next.clone()))
            .chain(std::iter::once((sp.exit, BTreeSet::new())))
            .collect()
    };

    Some(Cuspt {
        ingress: sp.entry,
        egress: sp.exit,
        initial_routing: restrict(&cuspt.initial_routing),
        final_routing: restrict(&cuspt.final_routing),
        policy: sliced.intersect(&reach_exit),
    })
}
