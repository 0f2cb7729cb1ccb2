//! Routing problems handed between the pipeline stages.
//!
//! A [`Cusp`] is the consistent-update problem straight from the model: sets of ingress
//! and egress switches, both routings as next-hop maps, and the composed policy.
//! A [`Cuspt`] adds the two pseudo-nodes [`Switch::INGRESS`] and [`Switch::EGRESS`] so
//! that the routing graph has exactly one source and one sink for topology analysis.

use std::collections::{BTreeMap, BTreeSet};

use crate::automaton::Automaton;
use crate::model::UpdateSynthesisModel;
use crate::types::Switch;

/// Next hops of every switch. Switches without a next hop map to the empty set.
pub type Routing = BTreeMap<Switch, BTreeSet<Switch>>;

static NO_HOPS: BTreeSet<Switch> = BTreeSet::new();

fn hops(routing: &Routing, switch: Switch) -> &BTreeSet<Switch> {
    routing.get(&switch).unwrap_or(&NO_HOPS)
}

fn endpoints<'a>(routings: impl IntoIterator<Item = &'a Routing>) -> BTreeSet<Switch> {
    routings
        .into_iter()
        .flat_map(|r| r.iter())
        .flat_map(|(&s, next)| std::iter::once(s).chain(next.iter().copied()))
        .collect()
}

#[derive(Debug, Clone)]
pub struct Cusp {
    pub ingress: BTreeSet<Switch>,
    pub egress: BTreeSet<Switch>,
    pub initial_routing: Routing,
    pub final_routing: Routing,
    pub policy: Automaton<Switch>,
}

impl Cusp {
    /// Routes flow from the reachability start to its goal.
    pub fn from_model(usm: &UpdateSynthesisModel, policy: Automaton<Switch>) -> Self {
        let switches = usm.switches();
        let reach = usm.reachability();
        Self {
            ingress: BTreeSet::from([reach.start]),
            egress: BTreeSet::from([reach.goal]),
            initial_routing: switches.iter().map(|&s| (s, usm.initial_next_hops(s))).collect(),
            final_routing: switches.iter().map(|&s| (s, usm.final_next_hops(s))).collect(),
            policy,
        }
    }

    pub fn all_switches(&self) -> BTreeSet<Switch> {
        endpoints([&self.initial_routing, &self.final_routing])
    }

    pub fn initial_hops(&self, switch: Switch) -> &BTreeSet<Switch> {
        hops(&self.initial_routing, switch)
    }

    pub fn final_hops(&self, switch: Switch) -> &BTreeSet<Switch> {
        hops(&self.final_routing, switch)
    }

    /// Attaches the ingress/egress pseudo-nodes.
    ///
    /// Egress switches are redirected to [`Switch::EGRESS`] in both routings.
    pub fn with_pseudo_nodes(self) -> Cuspt {
        let extend = |mut routing: Routing| {
            routing.insert(Switch::INGRESS, self.ingress.clone());
            for &e in &self.egress {
                routing.insert(e, BTreeSet::from([Switch::EGRESS]));
            }
            routing.insert(Switch::EGRESS, BTreeSet::new());
            routing
        };
        Cuspt {
            ingress: Switch::INGRESS,
            egress: Switch::EGRESS,
            initial_routing: extend(self.initial_routing.clone()),
            final_routing: extend(self.final_routing.clone()),
            policy: self.policy,
        }
    }
}

/// A routing problem with a single ingress and a single egress switch.
#[derive(Debug, Clone)]
pub struct Cuspt {
    pub ingress: Switch,
    pub egress: Switch,
    pub initial_routing: Routing,
    pub final_routing: Routing,
    pub policy: Automaton<Switch>,
}

impl Cuspt {
    pub fn all_switches(&self) -> BTreeSet<Switch> {
        endpoints([&self.initial_routing, &self.final_routing])
    }

    pub fn initial_hops(&self, switch: Switch) -> &BTreeSet<Switch> {
        hops(&self.initial_routing, switch)
    }

    pub fn final_hops(&self, switch: Switch) -> &BTreeSet<Switch> {
        hops(&self.final_routing, switch)
    }

    /// Next hops under either routing.
    pub fn next_hops(&self, switch: Switch) -> BTreeSet<Switch> {
        self.initial_hops(switch).union(self.final_hops(switch)).copied().collect()
    }

    /// The union of both routings as one graph.
    pub fn union_graph(&self) -> Routing {
        self.all_switches()
            .into_iter()
            .map(|s| (s, self.next_hops(s)))
            .collect()
    }

    /// Pseudo-nodes are not real switches and are never updated.
    pub fn is_updatable(&self, switch: Switch) -> bool {
        !switch.is_pseudo() && self.initial_hops(switch) != self.final_hops(switch)
    }

    /// Switches whose next hops differ between the two routings.
    pub fn updatable_switches(&self) -> BTreeSet<Switch> {
        self.all_switches()
            .into_iter()
            .filter(|&s| self.is_updatable(s))
            .collect()
    }
}
