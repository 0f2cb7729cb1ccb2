//! Policy automata over the switch alphabet.
//!
//! Every property of the model becomes a small automaton reading the sequence of
//! switches a packet visits. The policy of a problem is the intersection of all of
//! them. Intersections of waypoint automata can be kept small by additionally
//! intersecting with a phase automaton derived from the topological order of the
//! network (see [`topological_order_reduction`]).

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::automaton::Automaton;
use crate::cusp::Cusp;
use crate::model::{AlternativeWaypoint, AutomatonLiteral, ConditionalEnforcement, UpdateSynthesisModel};
use crate::topology::Topology;
use crate::types::Switch;

/// The goal must be visited, and nothing may follow it.
pub fn reachability_dfa(usm: &UpdateSynthesisModel) -> Automaton<Switch> {
    let switches = usm.switches();
    let goal = usm.reachability().goal;
    Automaton::build(switches.iter().copied(), |b| {
        let start = b.new_state(true, false);
        let done = b.new_state(false, true);
        b.edge(start, done, [goal]);
        b.edge_to_dead(done, switches.iter().copied());
    })
}

/// `w` must be visited exactly once.
pub fn waypoint_dfa(usm: &UpdateSynthesisModel, w: Switch) -> Automaton<Switch> {
    Automaton::build(usm.switches(), |b| {
        let start = b.new_state(true, false);
        let seen = b.new_state(false, true);
        b.edge(start, seen, [w]);
        b.edge_to_dead(seen, [w]);
    })
}

/// Once `s` is seen, `s'` must follow; once `s'` is seen, `s` may not appear again.
pub fn conditional_enforcement_dfa(usm: &UpdateSynthesisModel, ce: &ConditionalEnforcement) -> Automaton<Switch> {
    Automaton::build(usm.switches(), |b| {
        let start = b.new_state(true, true);
        let pending = b.new_state(false, false);
        let done = b.new_state(false, true);
        b.edge(start, pending, [ce.s]);
        b.edge(pending, done, [ce.s_prime]);
        b.edge(start, done, [ce.s_prime]);
        b.edge_to_dead(done, [ce.s]);
    })
}

/// At least one of the two switches must be visited.
pub fn alternative_waypoint_dfa(usm: &UpdateSynthesisModel, aw: &AlternativeWaypoint) -> Automaton<Switch> {
    Automaton::build(usm.switches(), |b| {
        let start = b.new_state(true, false);
        let done = b.new_state(false, true);
        b.edge(start, done, [aw.s1, aw.s2]);
    })
}

/// Copies a caller-supplied automaton, keeping its initial and final markings.
pub fn arbitrary_dfa(usm: &UpdateSynthesisModel, literal: &AutomatonLiteral) -> Automaton<Switch> {
    let finals: BTreeSet<i32> = literal.final_states.iter().copied().collect();
    let mut states: BTreeSet<i32> = BTreeSet::from([literal.initial_state]);
    states.extend(finals.iter().copied());
    states.extend(literal.edges.iter().flat_map(|e| [e.from, e.to]));

    Automaton::build(usm.switches(), |b| {
        let handles: BTreeMap<i32, _> = states
            .iter()
            .map(|&s| (s, b.new_state(s == literal.initial_state, finals.contains(&s))))
            .collect();
        for e in &literal.edges {
            b.edge(handles[&e.from], handles[&e.to], [e.label]);
        }
    })
}

/// Restricts `dfa` to words that visit its relevant labels in the order of `bunches`.
///
/// The phase automaton has one state per bunch that meets the relevant labels, plus
/// a final state. Reading a label of the current bunch advances to the next phase,
/// labels of the bunch just left loop, and every other relevant label is fatal. This
/// is the identity when at most one bunch meets the relevant labels.
///
/// Labels of the bunch just left self-loop instead of leading to the dead state, so
/// a waypoint shared by two adjacent phases is not rejected. This is looser than
/// routing every label outside the current bunch to the dead state.
///
/// Only sound when every relevant label must be visited, as with waypoints.
pub fn topological_order_reduction(dfa: &Automaton<Switch>, bunches: &[BTreeSet<Switch>]) -> Automaton<Switch> {
    let relevant = dfa.relevant_labels();
    let order: Vec<BTreeSet<Switch>> = bunches
        .iter()
        .map(|b| b.intersection(&relevant).copied().collect::<BTreeSet<_>>())
        .filter(|b| !b.is_empty())
        .collect();
    if order.len() <= 1 {
        return dfa.clone();
    }

    let phases = Automaton::build(dfa.alphabet().iter().copied(), |b| {
        let states: Vec<_> = (0..=order.len())
            .map(|i| b.new_state(i == 0, i == order.len()))
            .collect();
        for (i, window) in states.windows(2).enumerate() {
            let (current, next) = (window[0], window[1]);
            b.edge(current, next, order[i].iter().copied());
            let previous = if i > 0 { Some(&order[i - 1]) } else { None };
            let fatal = relevant
                .iter()
                .filter(|&&l| !order[i].contains(&l) && previous.map_or(true, |p| !p.contains(&l)))
                .copied();
            b.edge_to_dead(current, fatal);
        }
        let last = order.len() - 1;
        let fatal = relevant.iter().filter(|&&l| !order[last].contains(&l)).copied();
        b.edge_to_dead(states[order.len()], fatal);
    });

    dfa.intersect(&phases)
}

/// Topology of the network itself: both routings plus pseudo nodes.
///
/// It does not depend on the policy, so it can be shared by policy generation and
/// decomposition of the whole problem.
pub fn network_topology(usm: &UpdateSynthesisModel) -> Topology {
    let pseudo = Cusp::from_model(usm, Automaton::accepting_all([])).with_pseudo_nodes();
    Topology::new(&pseudo)
}

/// Intersection of all waypoint automata, kept in the phase order of `reduction`
/// when given.
pub fn combined_waypoint_dfa(usm: &UpdateSynthesisModel, reduction: Option<&Topology>) -> Automaton<Switch> {
    let waypoints: BTreeSet<Switch> = usm.waypoints().iter().copied().collect();
    let mut dfas = waypoints.iter().map(|&w| waypoint_dfa(usm, w));
    let Some(first) = dfas.next() else {
        return Automaton::accepting_all(usm.switches());
    };

    match reduction {
        Some(topology) if waypoints.len() > 1 => {
            let bunches = topology.bunches();
            dfas.fold(first, |acc, dfa| topological_order_reduction(&acc.intersect(&dfa), bunches))
        }
        _ => dfas.fold(first, |acc, dfa| acc.intersect(&dfa)),
    }
}

fn compose(usm: &UpdateSynthesisModel, reduction: Option<&Topology>, with_reachability: bool) -> Automaton<Switch> {
    let mut policy = combined_waypoint_dfa(usm, reduction);
    if with_reachability {
        policy = policy.intersect(&reachability_dfa(usm));
    }
    let props = usm.properties();
    for ce in &props.conditional_enforcements {
        policy = policy.intersect(&conditional_enforcement_dfa(usm, ce));
    }
    for aw in &props.alternative_waypoints {
        policy = policy.intersect(&alternative_waypoint_dfa(usm, aw));
    }
    if let Some(literal) = &props.automaton {
        policy = policy.intersect(&arbitrary_dfa(usm, literal));
    }
    debug!(
        "policy: {} states, {} transitions",
        policy.num_states(),
        policy.num_transitions()
    );
    policy
}

/// The policy of the whole model.
///
/// `reduction` is the [`network_topology`] of `usm`, or `None` to intersect the
/// waypoint automata without the phase order.
pub fn generate_policy(usm: &UpdateSynthesisModel, reduction: Option<&Topology>) -> Automaton<Switch> {
    compose(usm, reduction, true)
}

/// The policy without the reachability requirement.
pub fn generate_policy_without_reachability(
    usm: &UpdateSynthesisModel,
    reduction: Option<&Topology>,
) -> Automaton<Switch> {
    compose(usm, reduction, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    use crate::model::{Properties, Reachability};

    fn sw(ids: &[i32]) -> Vec<Switch> {
        ids.iter().map(|&i| Switch::new(i)).collect()
    }

    /// 1 -> 2 -> 3 -> 4 -> 5 in both routings.
    fn chain_model(waypoints: &[i32]) -> UpdateSynthesisModel {
        let edges: Vec<_> = (1..5).map(|i| (Switch::new(i), Switch::new(i + 1))).collect();
        let properties = Properties {
            reachability: Reachability {
                start: Switch::new(1),
                goal: Switch::new(5),
            },
            waypoint: None,
            conditional_enforcements: vec![],
            alternative_waypoints: vec![],
            automaton: None,
            loop_freedom: None,
        };
        UpdateSynthesisModel::new(edges.clone(), edges, properties).with_waypoints(sw(waypoints))
    }

    #[test]
    fn test_reachability() {
        let usm = chain_model(&[]);
        let dfa = reachability_dfa(&usm);
        assert!(dfa.accepts(&sw(&[1, 2, 3, 4, 5])));
        assert!(!dfa.accepts(&sw(&[1, 2, 3])));
        assert!(!dfa.accepts(&sw(&[5, 1])));
    }

    #[test]
    fn test_waypoint() {
        let usm = chain_model(&[3]);
        let dfa = waypoint_dfa(&usm, Switch::new(3));
        assert!(dfa.accepts(&sw(&[1, 3, 5])));
        assert!(!dfa.accepts(&sw(&[1, 2, 5])));
        assert!(!dfa.accepts(&sw(&[3, 3])));
    }

    #[test]
    fn test_conditional_enforcement() {
        let usm = chain_model(&[]);
        let ce = ConditionalEnforcement {
            s: Switch::new(2),
            s_prime: Switch::new(4),
        };
        let dfa = conditional_enforcement_dfa(&usm, &ce);
        assert!(dfa.accepts(&sw(&[1, 3, 5])));
        assert!(dfa.accepts(&sw(&[2, 4])));
        assert!(dfa.accepts(&sw(&[4])));
        assert!(!dfa.accepts(&sw(&[2, 3])));
        assert!(!dfa.accepts(&sw(&[4, 2])));
        assert!(!dfa.accepts(&sw(&[2, 4, 2])));
    }

    #[test]
    fn test_alternative_waypoint() {
        let usm = chain_model(&[]);
        let aw = AlternativeWaypoint {
            s1: Switch::new(2),
            s2: Switch::new(3),
        };
        let dfa = alternative_waypoint_dfa(&usm, &aw);
        assert!(dfa.accepts(&sw(&[2])));
        assert!(dfa.accepts(&sw(&[1, 3])));
        assert!(!dfa.accepts(&sw(&[1, 4])));
    }

    #[test]
    fn test_arbitrary_literal() {
        use crate::model::AutomatonEdge;

        let usm = chain_model(&[]);
        let literal = AutomatonLiteral {
            initial_state: 7,
            final_states: vec![7, 9],
            edges: vec![AutomatonEdge {
                from: 7,
                to: 9,
                label: Switch::new(2),
            }],
        };
        let dfa = arbitrary_dfa(&usm, &literal);
        assert!(dfa.is_final(dfa.initial()));
        assert!(dfa.accepts(&sw(&[1, 2, 3])));
        assert_eq!(dfa.num_states(), 2);
    }

    #[test]
    fn test_reduction_keeps_ordered_words() {
        let usm = chain_model(&[2, 4]);
        let plain = combined_waypoint_dfa(&usm, None);
        let reduced = combined_waypoint_dfa(&usm, Some(&network_topology(&usm)));
        assert!(plain.accepts(&sw(&[1, 2, 3, 4, 5])));
        assert!(reduced.accepts(&sw(&[1, 2, 3, 4, 5])));
        // Out of topological order: allowed by the plain product only.
        assert!(plain.accepts(&sw(&[4, 2])));
        assert!(!reduced.accepts(&sw(&[4, 2])));
        assert!(reduced.num_states() <= plain.num_states());
    }

    #[test]
    fn test_reduction_lets_the_previous_bunch_repeat() {
        let usm = chain_model(&[]);
        let aw = AlternativeWaypoint {
            s1: Switch::new(2),
            s2: Switch::new(4),
        };
        let dfa = alternative_waypoint_dfa(&usm, &aw);
        let bunches = vec![BTreeSet::from([Switch::new(2)]), BTreeSet::from([Switch::new(4)])];
        let reduced = topological_order_reduction(&dfa, &bunches);
        assert!(reduced.accepts(&sw(&[2, 4])));
        assert!(reduced.accepts(&sw(&[2, 2, 4])));
        assert!(!reduced.accepts(&sw(&[4])));
        assert!(!reduced.accepts(&sw(&[2, 4, 2])));
    }

    #[test]
    fn test_reduction_identity_on_single_bunch() {
        let usm = chain_model(&[3]);
        let dfa = waypoint_dfa(&usm, Switch::new(3));
        let bunches = vec![BTreeSet::from([Switch::new(3)])];
        assert_eq!(topological_order_reduction(&dfa, &bunches), dfa);
    }

    #[test]
    fn test_generate_policy() {
        let usm = chain_model(&[3]);
        let topology = network_topology(&usm);
        let policy = generate_policy(&usm, Some(&topology));
        assert!(policy.accepts(&sw(&[1, 2, 3, 4, 5])));
        assert!(!policy.accepts(&sw(&[1, 2, 4, 5])));
        assert!(!policy.accepts(&sw(&[1, 2, 3, 4])));

        let relaxed = generate_policy_without_reachability(&usm, Some(&topology));
        assert!(relaxed.accepts(&sw(&[1, 2, 3])));
    }

    #[test]
    fn test_network_topology_ignores_policy() {
        let usm = chain_model(&[2, 4]);
        let topology = network_topology(&usm);
        let cuspt = Cusp::from_model(&usm, generate_policy(&usm, Some(&topology))).with_pseudo_nodes();
        assert_eq!(Topology::new(&cuspt), topology);
        let order: Vec<Switch> = topology
            .bunches()
            .iter()
            .flatten()
            .copied()
            .filter(|s| !s.is_pseudo())
            .collect();
        assert_eq!(order, sw(&[1, 2, 3, 4, 5]));
    }
}
