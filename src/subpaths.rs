//! Enumeration of the policy-conforming paths through the network.
//!
//! Used to feed external tools that schedule updates per waypoint segment: each
//! path starts at a switch the policy reacts to in its initial state and ends at a
//! switch whose reading makes the policy accept.

use std::collections::BTreeSet;

use crate::automaton::Automaton;
use crate::cusp::Cusp;
use crate::types::{StateId, Switch};

struct Walk<'a> {
    policy: &'a Automaton<Switch>,
    cusp: &'a Cusp,
    final_labels: BTreeSet<Switch>,
    path: Vec<Switch>,
    found: Vec<Vec<Switch>>,
}

impl Walk<'_> {
    fn visit(&mut self, switch: Switch, state: StateId) {
        if state.is_dead() {
            return;
        }
        self.path.push(switch);
        if self.final_labels.contains(&switch) && self.policy.is_final(state) {
            self.found.push(self.path.clone());
        } else {
            let next: BTreeSet<Switch> = self
                .cusp
                .initial_hops(switch)
                .union(self.cusp.final_hops(switch))
                .copied()
                .collect();
            for t in next {
                if !self.path.contains(&t) {
                    let state = self.policy.lookup(state, &t);
                    self.visit(t, state);
                }
            }
        }
        self.path.pop();
    }
}

/// Every simple path through the union of both routings along which `policy` goes
/// from an initial-state label to an accepting label without dying.
pub fn waypoint_subpaths(policy: &Automaton<Switch>, cusp: &Cusp) -> Vec<Vec<Switch>> {
    let initial = policy.initial();
    let start: Vec<(Switch, StateId)> = policy
        .transitions(initial)
        .filter(|(_, t)| !t.is_dead())
        .map(|(&l, t)| (l, t))
        .collect();
    let final_labels = policy
        .edges()
        .filter(|(_, _, to)| policy.is_final(*to))
        .map(|(_, &l, _)| l)
        .collect();

    let mut walk = Walk {
        policy,
        cusp,
        final_labels,
        path: Vec::new(),
        found: Vec::new(),
    };
    for (label, state) in start {
        walk.visit(label, state);
    }
    walk.found
}

/// Renders paths as `a,b,c;d,e`.
pub fn format_subpaths(paths: &[Vec<Switch>]) -> String {
    paths
        .iter()
        .map(|p| p.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(","))
        .collect::<Vec<_>>()
        .join(";")
}
