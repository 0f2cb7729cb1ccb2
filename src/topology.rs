//! Structure of the routing graph.
//!
//! The union of both routings is condensed into strongly connected components,
//! listed in topological order. Each component gets a *narrowness*: the share of
//! all flow from the ingress that must pass through it. A component with narrowness
//! exactly 1 is a bottleneck every path goes through, which makes it a safe point to
//! split the problem or to order the policy alphabet into phases.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;

use log::debug;
use num_bigint::BigUint;
use num_rational::Ratio;
use num_traits::{One, Zero};

use crate::cusp::{Cuspt, Routing};
use crate::types::Switch;

pub type Scc = BTreeSet<Switch>;

/// Exact share of the ingress flow.
pub type Weight = Ratio<BigUint>;

/// Tarjan's algorithm over `graph`, rooted at `start` first.
///
/// Every node (key or next hop) lands in exactly one component. Components are
/// returned in reverse completion order, which is a topological order of the
/// condensation: no edge leads from a later component to an earlier one.
pub fn strongly_connected_components(graph: &Routing, start: Switch) -> Vec<Scc> {
    let nodes: Vec<Switch> = graph
        .iter()
        .flat_map(|(&s, next)| std::iter::once(s).chain(next.iter().copied()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let position: BTreeMap<Switch, usize> = nodes.iter().enumerate().map(|(i, &s)| (s, i)).collect();
    let adjacency: Vec<Vec<usize>> = nodes
        .iter()
        .map(|s| {
            graph
                .get(s)
                .into_iter()
                .flatten()
                .map(|t| position[t])
                .collect()
        })
        .collect();

    let n = nodes.len();
    let mut index: Vec<Option<usize>> = vec![None; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0;
    let mut completed: Vec<Scc> = Vec::new();

    let roots = position.get(&start).copied().into_iter().chain(0..n);
    for root in roots {
        if index[root].is_some() {
            continue;
        }
        // (node, position of the next successor to look at)
        let mut frames: Vec<(usize, usize)> = Vec::new();
        index[root] = Some(next_index);
        lowlink[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root] = true;
        frames.push((root, 0));

        while let Some(&mut (v, ref mut pos)) = frames.last_mut() {
            if let Some(&w) = adjacency[v].get(*pos) {
                *pos += 1;
                match index[w] {
                    None => {
                        index[w] = Some(next_index);
                        lowlink[w] = next_index;
                        next_index += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        frames.push((w, 0));
                    }
                    Some(iw) if on_stack[w] => lowlink[v] = lowlink[v].min(iw),
                    Some(_) => {}
                }
                continue;
            }

            frames.pop();
            if Some(lowlink[v]) == index[v] {
                let mut scc = Scc::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    scc.insert(nodes[w]);
                    if w == v {
                        break;
                    }
                }
                completed.push(scc);
            }
            if let Some(&(parent, _)) = frames.last() {
                lowlink[parent] = lowlink[parent].min(lowlink[v]);
            }
        }
    }

    completed.reverse();
    completed
}

/// Narrowness of every component in `sccs`, which must be in topological order.
///
/// The component holding `start` gets weight 1. Each component splits its weight
/// evenly over its distinct successor components. A component without successors
/// passes nothing on.
pub fn narrowness(sccs: &[Scc], graph: &Routing, start: Switch) -> Vec<Weight> {
    let scc_of = component_index(sccs);
    let mut weight = vec![Weight::zero(); sccs.len()];
    if let Some(&i) = scc_of.get(&start) {
        weight[i] = Weight::one();
    }

    for (i, scc) in sccs.iter().enumerate() {
        let targets: BTreeSet<usize> = scc
            .iter()
            .filter_map(|s| graph.get(s))
            .flatten()
            .filter_map(|t| scc_of.get(t).copied())
            .filter(|&j| j != i)
            .collect();
        if targets.is_empty() {
            continue;
        }
        let share = &weight[i] / Weight::from_integer(BigUint::from(targets.len()));
        for j in targets {
            weight[j] = &weight[j] + &share;
        }
    }
    weight
}

/// Groups the topological sequence into phases separated by bottlenecks.
///
/// Every narrowness-1 component is a phase of its own; the components between two
/// bottlenecks are merged into one phase. Empty phases are dropped.
pub fn total_order_bunches(sccs: &[Scc], narrowness: &[Weight]) -> Vec<BTreeSet<Switch>> {
    let mut bunches = Vec::new();
    let mut run = BTreeSet::new();
    for (scc, weight) in sccs.iter().zip(narrowness) {
        if weight.is_one() {
            bunches.push(mem::take(&mut run));
            bunches.push(scc.clone());
        } else {
            run.extend(scc.iter().copied());
        }
    }
    bunches.push(run);
    bunches.retain(|b| !b.is_empty());
    bunches
}

fn component_index(sccs: &[Scc]) -> BTreeMap<Switch, usize> {
    sccs.iter()
        .enumerate()
        .flat_map(|(i, scc)| scc.iter().map(move |&s| (s, i)))
        .collect()
}

/// Condensed view of one routing problem, computed once and shared by the stages
/// that need it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Topology {
    sccs: Vec<Scc>,
    scc_of: BTreeMap<Switch, usize>,
    narrowness: Vec<Weight>,
    bunches: Vec<BTreeSet<Switch>>,
}

impl Topology {
    pub fn new(cuspt: &Cuspt) -> Self {
        let graph = cuspt.union_graph();
        let sccs = strongly_connected_components(&graph, cuspt.ingress);
        let narrowness = narrowness(&sccs, &graph, cuspt.ingress);
        debug!(
            "topology: {} switches in {} components, {} bottlenecks",
            graph.len(),
            sccs.len(),
            narrowness.iter().filter(|w| w.is_one()).count()
        );
        let bunches = total_order_bunches(&sccs, &narrowness);
        Self {
            scc_of: component_index(&sccs),
            sccs,
            narrowness,
            bunches,
        }
    }

    /// Components in topological order.
    pub fn sccs(&self) -> &[Scc] {
        &self.sccs
    }

    pub fn narrowness(&self) -> &[Weight] {
        &self.narrowness
    }

    /// Index of the component containing `switch`.
    pub fn scc_index(&self, switch: Switch) -> Option<usize> {
        self.scc_of.get(&switch).copied()
    }

    /// Phases of the topological order, see [`total_order_bunches`].
    pub fn bunches(&self) -> &[BTreeSet<Switch>] {
        &self.bunches
    }
}
