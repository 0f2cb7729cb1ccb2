//! Automata and networks to DOT (Graphviz) conversion.
//!
//! # DOT Format
//!
//! Automata:
//! - The **initial state** is drawn in the initial colour (red by default)
//! - **Final states** are double circles
//! - Parallel transitions between two states are merged into one edge whose label
//!   lists all symbols, or reads `many` when there are too many of them
//! - Edges into the **dead state** are hidden for large automata
//!
//! Networks:
//! - Initial routing edges are blue, final routing edges are red
//! - The reachability start is a hexagon and its goal a double circle
//! - Waypoints are houses; conditional enforcement pairs are an arrow and a box
//!
//! # Examples
//!
//! ```
//! use conupsyn::automaton::Automaton;
//!
//! let dfa = Automaton::build([1, 2], |b| {
//!     let s0 = b.new_state(true, false);
//!     let s1 = b.new_state(false, true);
//!     b.edge(s0, s1, [1, 2]);
//! });
//!
//! let dot = dfa.to_dot().unwrap();
//! // Render with: dot -Tsvg dfa.dot -o dfa.svg
//! assert!(dot.contains("label=\"1,2\""));
//! ```

use std::collections::BTreeMap;
use std::fmt::{Display, Write as _};

use crate::automaton::Automaton;
use crate::model::UpdateSynthesisModel;
use crate::types::StateId;

/// Configuration options for DOT output generation.
#[derive(Debug, Clone)]
pub struct DotConfig {
    /// Shape for ordinary automaton states (default: "circle")
    pub state_shape: &'static str,
    /// Shape for final automaton states (default: "doublecircle")
    pub final_shape: &'static str,
    /// Colour of the initial automaton state (default: "red")
    pub initial_color: &'static str,
    /// Dead-state edges are hidden above this many states (default: 20)
    pub dead_edges_up_to: usize,
    /// Edge labels with more symbols are abbreviated (default: 5)
    pub max_edge_symbols: usize,
    /// Colour of initial routing edges (default: "blue")
    pub initial_routing_color: &'static str,
    /// Colour of final routing edges (default: "red")
    pub final_routing_color: &'static str,
    /// Shape of the reachability start (default: "hexagon")
    pub start_shape: &'static str,
    /// Shape of the reachability goal (default: "doublecircle")
    pub goal_shape: &'static str,
    /// Shape of waypoints (default: "house")
    pub waypoint_shape: &'static str,
    /// Shape of the triggering switch of a conditional enforcement (default: "rarrow")
    pub condition_shape: &'static str,
    /// Shape of the enforced switch of a conditional enforcement (default: "box")
    pub enforced_shape: &'static str,
}

impl Default for DotConfig {
    fn default() -> Self {
        Self {
            state_shape: "circle",
            final_shape: "doublecircle",
            initial_color: "red",
            dead_edges_up_to: 20,
            max_edge_symbols: 5,
            initial_routing_color: "blue",
            final_routing_color: "red",
            start_shape: "hexagon",
            goal_shape: "doublecircle",
            waypoint_shape: "house",
            condition_shape: "rarrow",
            enforced_shape: "box",
        }
    }
}

impl<L: Ord + Clone + Display> Automaton<L> {
    pub fn to_dot(&self) -> Result<String, std::fmt::Error> {
        self.to_dot_with_config(&DotConfig::default())
    }

    /// Converts the explicit transitions to DOT; implicit self-loops are not drawn.
    pub fn to_dot_with_config(&self, config: &DotConfig) -> Result<String, std::fmt::Error> {
        let mut dot = String::new();
        writeln!(dot, "digraph {{")?;
        writeln!(dot, "node [shape={}];", config.state_shape)?;

        for state in self.states() {
            let mut attrs = Vec::new();
            if self.is_final(state) {
                attrs.push(format!("shape={}", config.final_shape));
            }
            if state == self.initial() {
                attrs.push(format!("color={}", config.initial_color));
            }
            writeln!(dot, "\"{}\" [{}];", state, attrs.join(", "))?;
        }

        let hide_dead = self.num_states() > config.dead_edges_up_to;
        for from in self.states() {
            // Merge parallel edges.
            let mut targets = BTreeMap::<StateId, Vec<&L>>::new();
            for (label, to) in self.transitions(from) {
                targets.entry(to).or_default().push(label);
            }
            for (to, labels) in targets {
                if hide_dead && to.is_dead() {
                    continue;
                }
                let label = if labels.len() > config.max_edge_symbols {
                    "many".to_string()
                } else {
                    labels.iter().map(|l| l.to_string()).collect::<Vec<_>>().join(",")
                };
                writeln!(dot, "\"{}\" -> \"{}\" [label=\"{}\"];", from, to, label)?;
            }
        }

        writeln!(dot, "}}")?;
        Ok(dot)
    }
}

impl UpdateSynthesisModel {
    pub fn to_dot(&self) -> Result<String, std::fmt::Error> {
        self.to_dot_with_config(&DotConfig::default())
    }

    /// Draws both routings over one set of switches, marking the property switches.
    pub fn to_dot_with_config(&self, config: &DotConfig) -> Result<String, std::fmt::Error> {
        let props = self.properties();
        let mut shapes = BTreeMap::new();
        for &w in self.waypoints() {
            shapes.insert(w, config.waypoint_shape);
        }
        for ce in &props.conditional_enforcements {
            shapes.insert(ce.s, config.condition_shape);
            shapes.insert(ce.s_prime, config.enforced_shape);
        }
        shapes.insert(props.reachability.start, config.start_shape);
        shapes.insert(props.reachability.goal, config.goal_shape);

        let mut dot = String::new();
        writeln!(dot, "digraph {{")?;
        for s in self.switches() {
            match shapes.get(&s) {
                Some(shape) => writeln!(dot, "\"{}\" [shape={}];", s, shape)?,
                None => writeln!(dot, "\"{}\";", s)?,
            }
        }
        for (a, b) in self.initial_routing() {
            writeln!(dot, "\"{}\" -> \"{}\" [color={}];", a, b, config.initial_routing_color)?;
        }
        for (a, b) in self.final_routing() {
            writeln!(dot, "\"{}\" -> \"{}\" [color={}];", a, b, config.final_routing_color)?;
        }
        writeln!(dot, "}}")?;
        Ok(dot)
    }
}
