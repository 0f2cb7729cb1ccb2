//! The input problem: two routing configurations and a bundle of policy properties.
//!
//! Models are loaded from JSON:
//!
//! ```json
//! {
//!   "Initial_routing": [[1, 2], [2, 3]],
//!   "Final_routing":   [[1, 2], [2, 4]],
//!   "Properties": {
//!     "Reachability": { "startNode": 1, "finalNode": 4 },
//!     "Waypoint": { "startNode": 1, "finalNode": 4, "waypoint": 2 },
//!     "LoopFreedom": { "startNode": 1 }
//!   }
//! }
//! ```
//!
//! `ConditionalEnforcement` and `AlternativeWaypoint` accept either one object or a list
//! of objects; `waypoint` accepts either one switch or a list. An `Automaton` literal
//! may supply an arbitrary policy automaton over switch labels.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ModelError;
use crate::types::Switch;

/// A directed hop `(source, target)`.
pub type Edge = (Switch, Switch);

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Reachability {
    #[serde(rename = "startNode")]
    pub start: Switch,
    #[serde(rename = "finalNode")]
    pub goal: Switch,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    #[serde(rename = "startNode")]
    pub start: Switch,
    #[serde(rename = "finalNode")]
    pub goal: Switch,
    #[serde(rename = "waypoint", deserialize_with = "one_or_many")]
    pub waypoints: Vec<Switch>,
}

/// If `s` is visited then `s_prime` must follow; `s_prime` alone is fine.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConditionalEnforcement {
    pub s: Switch,
    #[serde(rename = "sPrime")]
    pub s_prime: Switch,
}

/// At least one of `s1` and `s2` must be visited.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct AlternativeWaypoint {
    pub s1: Switch,
    pub s2: Switch,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct LoopFreedom {
    #[serde(rename = "startNode")]
    pub start: Switch,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct AutomatonEdge {
    pub from: i32,
    pub to: i32,
    pub label: Switch,
}

/// A caller-supplied policy automaton.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct AutomatonLiteral {
    #[serde(rename = "initialState")]
    pub initial_state: i32,
    #[serde(rename = "finalStates")]
    pub final_states: Vec<i32>,
    pub edges: Vec<AutomatonEdge>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Properties {
    pub reachability: Reachability,
    pub waypoint: Option<Waypoint>,
    pub conditional_enforcements: Vec<ConditionalEnforcement>,
    pub alternative_waypoints: Vec<AlternativeWaypoint>,
    pub automaton: Option<AutomatonLiteral>,
    /// Accepted but never composed: reachability already implies a loop-free path.
    pub loop_freedom: Option<LoopFreedom>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(x)) => vec![x],
        Some(OneOrMany::Many(xs)) => xs,
    })
}

#[derive(Serialize, Deserialize)]
struct RawProperties {
    #[serde(rename = "Reachability", default)]
    reachability: Option<Reachability>,
    #[serde(rename = "Waypoint", default, skip_serializing_if = "Option::is_none")]
    waypoint: Option<Waypoint>,
    #[serde(
        rename = "ConditionalEnforcement",
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    conditional_enforcements: Vec<ConditionalEnforcement>,
    #[serde(
        rename = "AlternativeWaypoint",
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    alternative_waypoints: Vec<AlternativeWaypoint>,
    #[serde(rename = "Automaton", default, skip_serializing_if = "Option::is_none")]
    automaton: Option<AutomatonLiteral>,
    #[serde(rename = "LoopFreedom", default, skip_serializing_if = "Option::is_none")]
    loop_freedom: Option<LoopFreedom>,
}

#[derive(Serialize, Deserialize)]
struct RawModel {
    #[serde(rename = "Initial_routing")]
    initial_routing: Vec<Vec<i32>>,
    #[serde(rename = "Final_routing")]
    final_routing: Vec<Vec<i32>>,
    #[serde(rename = "Properties")]
    properties: RawProperties,
}

/// The immutable problem instance.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UpdateSynthesisModel {
    initial_routing: BTreeSet<Edge>,
    final_routing: BTreeSet<Edge>,
    properties: Properties,
}

fn edges(raw: &[Vec<i32>]) -> Result<BTreeSet<Edge>, ModelError> {
    raw.iter()
        .map(|e| match e.as_slice() {
            &[a, b] => Ok((Switch::new(a), Switch::new(b))),
            _ => Err(ModelError::MalformedEdge(e.clone())),
        })
        .collect()
}

impl UpdateSynthesisModel {
    /// Builds a model from already-validated parts.
    pub fn new(
        initial_routing: impl IntoIterator<Item = Edge>,
        final_routing: impl IntoIterator<Item = Edge>,
        properties: Properties,
    ) -> Self {
        Self {
            initial_routing: initial_routing.into_iter().collect(),
            final_routing: final_routing.into_iter().collect(),
            properties,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ModelError> {
        let raw: RawModel = serde_json::from_str(json)?;
        let p = raw.properties;
        let model = Self {
            initial_routing: edges(&raw.initial_routing)?,
            final_routing: edges(&raw.final_routing)?,
            properties: Properties {
                reachability: p.reachability.ok_or(ModelError::MissingReachability)?,
                waypoint: p.waypoint,
                conditional_enforcements: p.conditional_enforcements,
                alternative_waypoints: p.alternative_waypoints,
                automaton: p.automaton,
                loop_freedom: p.loop_freedom,
            },
        };
        if let Some(literal) = &model.properties.automaton {
            model.check_automaton(literal)?;
        }
        Ok(model)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String, ModelError> {
        fn raw_edges(edges: &BTreeSet<Edge>) -> Vec<Vec<i32>> {
            edges.iter().map(|&(a, b)| vec![a.id(), b.id()]).collect()
        }
        let p = &self.properties;
        let raw = RawModel {
            initial_routing: raw_edges(&self.initial_routing),
            final_routing: raw_edges(&self.final_routing),
            properties: RawProperties {
                reachability: Some(p.reachability.clone()),
                waypoint: p.waypoint.clone(),
                conditional_enforcements: p.conditional_enforcements.clone(),
                alternative_waypoints: p.alternative_waypoints.clone(),
                automaton: p.automaton.clone(),
                loop_freedom: p.loop_freedom.clone(),
            },
        };
        Ok(serde_json::to_string(&raw)?)
    }

    fn check_automaton(&self, literal: &AutomatonLiteral) -> Result<(), ModelError> {
        if literal.final_states.is_empty() {
            return Err(ModelError::InvalidAutomaton("no final state".into()));
        }
        let switches = self.switches();
        if let Some(e) = literal.edges.iter().find(|e| !switches.contains(&e.label)) {
            return Err(ModelError::InvalidAutomaton(format!(
                "label {} is not a switch of the network",
                e.label
            )));
        }

        let mut succ: BTreeMap<i32, Vec<i32>> = BTreeMap::new();
        for e in &literal.edges {
            succ.entry(e.from).or_default().push(e.to);
        }
        let mut reached = BTreeSet::from([literal.initial_state]);
        let mut queue = VecDeque::from([literal.initial_state]);
        while let Some(s) = queue.pop_front() {
            for &t in succ.get(&s).into_iter().flatten() {
                if reached.insert(t) {
                    queue.push_back(t);
                }
            }
        }
        if let Some(e) = literal.edges.iter().find(|e| !reached.contains(&e.from)) {
            return Err(ModelError::InvalidAutomaton(format!(
                "edge {} -[{}]-> {} leaves a state unreachable from the initial state",
                e.from, e.label, e.to
            )));
        }
        Ok(())
    }

    pub fn initial_routing(&self) -> &BTreeSet<Edge> {
        &self.initial_routing
    }

    pub fn final_routing(&self) -> &BTreeSet<Edge> {
        &self.final_routing
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn reachability(&self) -> &Reachability {
        &self.properties.reachability
    }

    /// Waypoints to enforce, empty when the property is absent.
    pub fn waypoints(&self) -> &[Switch] {
        self.properties
            .waypoint
            .as_ref()
            .map(|w| w.waypoints.as_slice())
            .unwrap_or(&[])
    }

    /// Every endpoint of either routing.
    pub fn switches(&self) -> BTreeSet<Switch> {
        self.initial_routing
            .iter()
            .chain(self.final_routing.iter())
            .flat_map(|&(a, b)| [a, b])
            .collect()
    }

    /// Next hops of `switch` under the initial routing.
    pub fn initial_next_hops(&self, switch: Switch) -> BTreeSet<Switch> {
        next_hops(&self.initial_routing, switch)
    }

    /// Next hops of `switch` under the final routing.
    pub fn final_next_hops(&self, switch: Switch) -> BTreeSet<Switch> {
        next_hops(&self.final_routing, switch)
    }

    /// A copy with `extra` appended to the waypoints.
    pub fn with_waypoints(&self, extra: impl IntoIterator<Item = Switch>) -> Self {
        let mut model = self.clone();
        let reach = model.properties.reachability.clone();
        let waypoint = model.properties.waypoint.get_or_insert_with(|| Waypoint {
            start: reach.start,
            goal: reach.goal,
            waypoints: Vec::new(),
        });
        waypoint.waypoints.extend(extra);
        model
    }

    /// A copy with one more conditional enforcement pair.
    pub fn with_conditional_enforcement(&self, s: Switch, s_prime: Switch) -> Self {
        let mut model = self.clone();
        model
            .properties
            .conditional_enforcements
            .push(ConditionalEnforcement { s, s_prime });
        model
    }

    /// A copy with one more alternative waypoint pair.
    pub fn with_alternative_waypoint(&self, s1: Switch, s2: Switch) -> Self {
        let mut model = self.clone();
        model
            .properties
            .alternative_waypoints
            .push(AlternativeWaypoint { s1, s2 });
        model
    }
}

fn next_hops(routing: &BTreeSet<Edge>, switch: Switch) -> BTreeSet<Switch> {
    routing
        .iter()
        .filter(|&&(a, _)| a == switch)
        .map(|&(_, b)| b)
        .collect()
}
