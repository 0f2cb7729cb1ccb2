//! Compilation of a routing problem into a two-player Petri game.
//!
//! The updater controls which switch components are queued and when a batch is
//! committed; the environment forwards packets along the topology. The policy
//! automaton runs in lockstep with the packet: every topology transition into a
//! relevant switch deposits a token in that switch's *track* place, and the packet
//! cannot move again until the automaton has consumed it.
//!
//! # Components
//!
//! - **Topology**: `TOPOLOGY_P_s` holds the packet, `TOPOLOGY_UV_s` marks `s` as not yet
//!   visited, and `TOPOLOGY_T_s_t` forwards along either routing.
//! - **Update counter**: `UPDATE_P_*` places and the `UPDATE_T_CONUP` (controllable) and
//!   `UPDATE_T_READY` transitions alternate between queueing and updating phases and
//!   count committed batches.
//! - **Switch components**: one per equivalence class and per remaining updatable switch,
//!   with `INIT`/`QUEUE`/`FINAL`/`LIMITER` places and `QUEUE`/`UPDATE` transitions. The
//!   `INIT` and `FINAL` places enable the routing-specific topology transitions.
//! - **Injection**: `PACKET_INJECT_T` releases a packet at the ingress once updating starts.
//! - **Automaton**: `DFA_Pstate_q` per state, `DFA_T{i}_Switch{l}` per relevant action,
//!   interlocked through `DFA_TURN` and `DFA_TRACK_Pswitch{l}`.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as _};

use log::debug;

use crate::cusp::Cuspt;
use crate::equivalence::{BatchOrder, EquivalenceClass};
use crate::types::{StateId, Switch};

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Place {
    pub name: String,
    pub initial_tokens: usize,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Transition {
    pub name: String,
    /// Fired by the updater (player 0) rather than the network.
    pub controllable: bool,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Arc {
    pub source: String,
    pub target: String,
    pub weight: usize,
}

/// A place/transition net with a controllable and an uncontrollable player.
///
/// Nodes are identified by name. Re-adding a node or an arc between the same two
/// nodes keeps the first version.
#[derive(Debug, Clone, Default)]
pub struct PetriGame {
    places: Vec<Place>,
    transitions: Vec<Transition>,
    arcs: Vec<Arc>,
    place_index: BTreeMap<String, usize>,
    transition_index: BTreeMap<String, usize>,
    arc_index: BTreeMap<(String, String), usize>,
}

impl PetriGame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_place(&mut self, name: impl Into<String>, initial_tokens: usize) -> String {
        let name = name.into();
        if !self.place_index.contains_key(&name) {
            self.place_index.insert(name.clone(), self.places.len());
            self.places.push(Place {
                name: name.clone(),
                initial_tokens,
            });
        }
        name
    }

    pub fn add_transition(&mut self, name: impl Into<String>, controllable: bool) -> String {
        let name = name.into();
        if !self.transition_index.contains_key(&name) {
            self.transition_index.insert(name.clone(), self.transitions.len());
            self.transitions.push(Transition {
                name: name.clone(),
                controllable,
            });
        }
        name
    }

    /// Adds an arc; weights below 1 are raised to 1.
    pub fn add_arc(&mut self, source: &str, target: &str, weight: usize) {
        let key = (source.to_string(), target.to_string());
        if !self.arc_index.contains_key(&key) {
            self.arc_index.insert(key, self.arcs.len());
            self.arcs.push(Arc {
                source: source.to_string(),
                target: target.to_string(),
                weight: weight.max(1),
            });
        }
    }

    /// Adds a pair of arcs so that `transition` only tests `place` without consuming it.
    pub fn add_test_arc(&mut self, place: &str, transition: &str) {
        self.add_arc(place, transition, 1);
        self.add_arc(transition, place, 1);
    }

    pub fn places(&self) -> &[Place] {
        &self.places
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn arcs(&self) -> &[Arc] {
        &self.arcs
    }

    pub fn place(&self, name: &str) -> Option<&Place> {
        self.place_index.get(name).map(|&i| &self.places[i])
    }

    pub fn transition(&self, name: &str) -> Option<&Transition> {
        self.transition_index.get(name).map(|&i| &self.transitions[i])
    }

    pub fn arc(&self, source: &str, target: &str) -> Option<&Arc> {
        self.arc_index
            .get(&(source.to_string(), target.to_string()))
            .map(|&i| &self.arcs[i])
    }

    /// Total number of tokens in the initial marking.
    pub fn initial_tokens(&self) -> usize {
        self.places.iter().map(|p| p.initial_tokens).sum()
    }

    /// Serializes the game as a PNML document.
    ///
    /// Transitions carry a `<player>` element: 0 for controllable, 1 for environment.
    /// Arc weights are written only when greater than 1.
    pub fn to_pnml(&self) -> Result<String, fmt::Error> {
        let mut out = String::new();
        writeln!(out, r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>"#)?;
        writeln!(out, r#"<pnml xmlns="http://www.pnml.org/version-2009/grammar/pnml">"#)?;
        writeln!(
            out,
            r#"  <net id="ComposedModel" type="http://www.pnml.org/version-2009/grammar/ptnet">"#
        )?;
        writeln!(out, r#"    <page id="page0">"#)?;
        for p in &self.places {
            let name = escape(&p.name);
            writeln!(out, r#"      <place id="{}">"#, name)?;
            writeln!(out, r#"        <graphics><position x="0" y="0"/></graphics>"#)?;
            writeln!(
                out,
                r#"        <name><graphics><offset x="0" y="0"/></graphics><text>{}</text></name>"#,
                name
            )?;
            writeln!(out, "        <initialMarking><text>{}</text></initialMarking>", p.initial_tokens)?;
            writeln!(out, "      </place>")?;
        }
        for t in &self.transitions {
            let name = escape(&t.name);
            writeln!(out, r#"      <transition id="{}">"#, name)?;
            writeln!(out, "        <player><value>{}</value></player>", if t.controllable { 0 } else { 1 })?;
            writeln!(
                out,
                r#"        <name><graphics><offset x="0" y="0"/></graphics><text>{}</text></name>"#,
                name
            )?;
            writeln!(out, r#"        <graphics><position x="0" y="0"/></graphics>"#)?;
            writeln!(out, "      </transition>")?;
        }
        for (i, a) in self.arcs.iter().enumerate() {
            let (source, target) = (escape(&a.source), escape(&a.target));
            if a.weight > 1 {
                writeln!(
                    out,
                    r#"      <arc id="A{}" source="{}" target="{}" type="normal">"#,
                    i, source, target
                )?;
                writeln!(out, "        <inscription><text>{}</text></inscription>", a.weight)?;
                writeln!(out, "      </arc>")?;
            } else {
                writeln!(
                    out,
                    r#"      <arc id="A{}" source="{}" target="{}" type="normal"/>"#,
                    i, source, target
                )?;
            }
        }
        writeln!(out, "    </page>")?;
        writeln!(out, "    <name><text>ComposedModel</text></name>")?;
        writeln!(out, "  </net>")?;
        writeln!(out, "</pnml>")?;
        Ok(out)
    }
}

/// Escapes the XML special characters of `s` for use in text and attribute values.
fn escape(s: &str) -> Cow<'_, str> {
    if !s.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Reachability query: a strategy exists that reaches an accepting automaton place
/// within the batch bound.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Query {
    pub final_places: Vec<String>,
    pub batch_bound: usize,
}

impl Query {
    pub fn with_bound(&self, batch_bound: usize) -> Self {
        Self {
            final_places: self.final_places.clone(),
            batch_bound,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EF ({} <= {} and (", BATCHES, self.batch_bound)?;
        if self.final_places.is_empty() {
            write!(f, "false")?;
        }
        for (i, p) in self.final_places.iter().enumerate() {
            if i > 0 {
                write!(f, " or ")?;
            }
            write!(f, "{} == 1", p)?;
        }
        write!(f, "))")
    }
}

/// Name of the controllable transition that commits a batch.
pub const CONUP: &str = "UPDATE_T_CONUP";
const READY: &str = "UPDATE_T_READY";
const QUEUEING: &str = "UPDATE_P_QUEUEING";
const UPDATING: &str = "UPDATE_P_UPDATING";
const BATCHES: &str = "UPDATE_P_BATCHES";
const INVCOUNT: &str = "UPDATE_P_INVCOUNT";
const COUNT: &str = "UPDATE_P_COUNT";
const TOTAL_QUEUED: &str = "UPDATE_P_TOTAL_QUEUED";
const INV_TOTAL_UPDATED: &str = "UPDATE_P_INV_TOTAL_UPDATED";
const INJECT: &str = "PACKET_INJECT_T";
const TURN: &str = "DFA_TURN";

fn topology_place(s: Switch) -> String {
    format!("TOPOLOGY_P_{}", s)
}

fn unvisited_place(s: Switch) -> String {
    format!("TOPOLOGY_UV_{}", s)
}

fn topology_transition(s: Switch, t: Switch) -> String {
    format!("TOPOLOGY_T_{}_{}", s, t)
}

fn state_place(q: StateId) -> String {
    format!("DFA_Pstate_{}", q)
}

fn track_place(l: Switch) -> String {
    format!("DFA_TRACK_Pswitch{}", l)
}

/// A compiled subproblem.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub game: PetriGame,
    pub query: Query,
    /// Number of switch components; no schedule needs more batches than this.
    pub components: usize,
}

/// Builds the Petri game and query for `cuspt`.
///
/// `max_switches_per_batch` caps how many components can be queued in one batch;
/// 0 means no cap.
pub fn compile(cuspt: &Cuspt, classes: &[EquivalenceClass], max_switches_per_batch: usize) -> Compiled {
    let mut game = PetriGame::new();

    // Topology
    for s in cuspt.all_switches() {
        game.add_place(topology_place(s), 0);
        game.add_place(unvisited_place(s), 1);
    }
    let mut edges: BTreeSet<(Switch, Switch)> = BTreeSet::new();
    for routing in [&cuspt.initial_routing, &cuspt.final_routing] {
        for (&s, next) in routing {
            for &t in next {
                edges.insert((s, t));
                let tr = game.add_transition(topology_transition(s, t), false);
                game.add_arc(&topology_place(s), &tr, 1);
                game.add_arc(&unvisited_place(s), &tr, 1);
                game.add_arc(&tr, &topology_place(t), 1);
            }
        }
    }

    // Update counter
    let classed: BTreeSet<Switch> = classes.iter().flat_map(|c| c.switches.iter().copied()).collect();
    let singles: Vec<EquivalenceClass> = cuspt
        .updatable_switches()
        .into_iter()
        .filter(|s| !classed.contains(s))
        .map(|s| EquivalenceClass::new([s], BatchOrder::Unknown))
        .collect();
    let components = singles.len() + classes.len();
    let max_in_batch = if max_switches_per_batch != 0 {
        max_switches_per_batch
    } else {
        components
    };
    let first_count = classes.iter().filter(|c| c.batch_order == BatchOrder::First).count();

    game.add_place(QUEUEING, 1);
    game.add_place(UPDATING, 0);
    game.add_place(BATCHES, 0);
    game.add_place(INVCOUNT, max_in_batch.saturating_sub(first_count));
    game.add_place(COUNT, first_count);
    game.add_place(TOTAL_QUEUED, first_count);
    game.add_place(INV_TOTAL_UPDATED, components);
    game.add_transition(CONUP, true);
    game.add_transition(READY, false);

    game.add_test_arc(COUNT, CONUP);
    game.add_arc(QUEUEING, CONUP, 1);
    game.add_arc(CONUP, UPDATING, 1);
    game.add_arc(CONUP, BATCHES, 1);
    game.add_arc(UPDATING, READY, 1);
    game.add_arc(READY, QUEUEING, 1);
    game.add_arc(INVCOUNT, READY, max_in_batch);
    game.add_arc(READY, INVCOUNT, max_in_batch);
    game.add_test_arc(INV_TOTAL_UPDATED, READY);

    for class in classes.iter().chain(&singles) {
        add_switch_component(&mut game, cuspt, class, components);
    }

    // Packet injection
    game.add_transition(INJECT, false);
    game.add_arc(UPDATING, INJECT, 1);
    game.add_arc(INJECT, &topology_place(cuspt.ingress), 1);

    // Automaton
    let policy = &cuspt.policy;
    let relevant = policy.relevant_labels();
    for q in policy.states() {
        game.add_place(state_place(q), usize::from(q == policy.initial()));
    }
    game.add_place(TURN, 0);
    for &l in &relevant {
        game.add_place(track_place(l), 0);
    }
    let actions = policy.actions().into_iter().filter(|a| relevant.contains(&a.label));
    for (i, action) in actions.enumerate() {
        let tr = game.add_transition(format!("DFA_T{}_Switch{}", i, action.label), false);
        game.add_arc(&state_place(action.from), &tr, 1);
        game.add_arc(&tr, &state_place(action.to), 1);
        game.add_arc(&track_place(action.label), &tr, 1);
        game.add_arc(&tr, TURN, 1);
    }
    for &(s, t) in edges.iter().filter(|(_, t)| relevant.contains(t)) {
        let tr = topology_transition(s, t);
        game.add_arc(&tr, &track_place(t), 1);
        game.add_arc(TURN, &tr, 1);
    }
    game.add_arc(INJECT, TURN, 1);

    let query = Query {
        final_places: policy.finals().iter().map(|&q| state_place(q)).collect(),
        batch_bound: 0,
    };

    debug!(
        "petri game: {} places, {} transitions, {} arcs, {} initial tokens, {} components",
        game.places().len(),
        game.transitions().len(),
        game.arcs().len(),
        game.initial_tokens(),
        components
    );

    Compiled {
        game,
        query,
        components,
    }
}

fn add_switch_component(game: &mut PetriGame, cuspt: &Cuspt, class: &EquivalenceClass, components: usize) {
    let name = class.name();
    let first = class.batch_order == BatchOrder::First;

    let init = game.add_place(format!("SWITCH_P_{}_INIT", name), 1);
    let queue = game.add_place(format!("SWITCH_P_{}_QUEUE", name), usize::from(first));
    let fin = game.add_place(format!("SWITCH_P_{}_FINAL", name), 0);
    let limiter = game.add_place(format!("SWITCH_P_{}_LIMITER", name), usize::from(!first));
    let t_queue = game.add_transition(format!("SWITCH_T_{}_QUEUE", name), true);
    let t_update = game.add_transition(format!("SWITCH_T_{}_UPDATE", name), false);

    game.add_arc(&t_queue, COUNT, 1);
    game.add_arc(COUNT, &t_update, 1);
    game.add_test_arc(&init, &t_queue);
    game.add_arc(&limiter, &t_queue, 1);
    game.add_arc(&t_queue, &queue, 1);
    game.add_arc(&init, &t_update, 1);
    game.add_arc(&queue, &t_update, 1);
    game.add_arc(&t_update, &fin, 1);
    game.add_arc(INVCOUNT, &t_queue, 1);
    game.add_test_arc(QUEUEING, &t_queue);
    game.add_test_arc(UPDATING, &t_update);
    game.add_arc(&t_update, INVCOUNT, 1);
    game.add_arc(&t_queue, TOTAL_QUEUED, 1);
    game.add_arc(INV_TOTAL_UPDATED, &t_update, 1);

    // Every other component has to be queued before the last one.
    if class.batch_order == BatchOrder::Last && components > 1 {
        game.add_arc(TOTAL_QUEUED, &t_queue, components - 1);
    }

    for &s in &class.switches {
        let initial = cuspt.initial_hops(s);
        let fin_hops = cuspt.final_hops(s);
        for &t in initial.difference(fin_hops) {
            game.add_test_arc(&init, &topology_transition(s, t));
        }
        for &t in fin_hops.difference(initial) {
            game.add_test_arc(&fin, &topology_transition(s, t));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    use crate::automaton::Automaton;
    use crate::cusp::Routing;

    fn sw(id: i32) -> Switch {
        Switch::new(id)
    }

    /// 1 -> 2 -> 3 initially, 1 -> 2 -> 4 finally, reach 4.
    fn small() -> Cuspt {
        let mut initial = Routing::new();
        let mut fin = Routing::new();
        for s in 1..=4 {
            initial.insert(sw(s), BTreeSet::new());
            fin.insert(sw(s), BTreeSet::new());
        }
        initial.get_mut(&sw(1)).unwrap().insert(sw(2));
        initial.get_mut(&sw(2)).unwrap().insert(sw(3));
        fin.get_mut(&sw(1)).unwrap().insert(sw(2));
        fin.get_mut(&sw(2)).unwrap().insert(sw(4));
        let policy = Automaton::build([1, 2, 3, 4].map(sw), |b| {
            let s0 = b.new_state(true, false);
            let s1 = b.new_state(false, true);
            b.edge(s0, s1, [sw(4)]);
        });
        Cuspt {
            ingress: sw(1),
            egress: sw(4),
            initial_routing: initial,
            final_routing: fin,
            policy,
        }
    }

    #[test]
    fn test_topology_component() {
        let compiled = compile(&small(), &[], 0);
        let g = &compiled.game;
        assert_eq!(g.place("TOPOLOGY_UV_3").unwrap().initial_tokens, 1);
        assert_eq!(g.place("TOPOLOGY_P_1").unwrap().initial_tokens, 0);
        let t = g.transition("TOPOLOGY_T_2_4").unwrap();
        assert!(!t.controllable);
        assert!(g.arc("TOPOLOGY_P_2", "TOPOLOGY_T_2_4").is_some());
        assert!(g.arc("TOPOLOGY_T_2_4", "TOPOLOGY_P_4").is_some());
        // The shared transition 1 -> 2 exists once.
        assert_eq!(
            g.transitions().iter().filter(|t| t.name == "TOPOLOGY_T_1_2").count(),
            1
        );
    }

    #[test]
    fn test_switch_component() {
        let compiled = compile(&small(), &[], 0);
        let g = &compiled.game;
        assert_eq!(compiled.components, 1);
        assert!(g.transition("SWITCH_T_2_QUEUE").unwrap().controllable);
        assert!(g.arc("SWITCH_P_2_INIT", "TOPOLOGY_T_2_3").is_some());
        assert!(g.arc("TOPOLOGY_T_2_3", "SWITCH_P_2_INIT").is_some());
        assert!(g.arc("SWITCH_P_2_FINAL", "TOPOLOGY_T_2_4").is_some());
        assert!(g.arc("SWITCH_P_2_INIT", "TOPOLOGY_T_1_2").is_none());
        assert_eq!(g.place("UPDATE_P_INV_TOTAL_UPDATED").unwrap().initial_tokens, 1);
    }

    #[test]
    fn test_first_and_last_classes() {
        let classes = vec![
            EquivalenceClass::new([sw(2)], BatchOrder::First),
            EquivalenceClass::new([sw(1)], BatchOrder::Last),
        ];
        let compiled = compile(&small(), &classes, 0);
        let g = &compiled.game;
        assert_eq!(compiled.components, 2);
        assert_eq!(g.place("SWITCH_P_2_QUEUE").unwrap().initial_tokens, 1);
        assert_eq!(g.place("SWITCH_P_2_LIMITER").unwrap().initial_tokens, 0);
        assert_eq!(g.place("UPDATE_P_COUNT").unwrap().initial_tokens, 1);
        assert_eq!(g.place("UPDATE_P_INVCOUNT").unwrap().initial_tokens, 1);
        assert_eq!(g.arc("UPDATE_P_TOTAL_QUEUED", "SWITCH_T_1_QUEUE").unwrap().weight, 1);
    }

    #[test]
    fn test_batch_cap() {
        let compiled = compile(&small(), &[], 3);
        let g = &compiled.game;
        assert_eq!(g.place("UPDATE_P_INVCOUNT").unwrap().initial_tokens, 3);
        assert_eq!(g.arc("UPDATE_P_INVCOUNT", "UPDATE_T_READY").unwrap().weight, 3);
    }

    #[test]
    fn test_automaton_component() {
        let compiled = compile(&small(), &[], 0);
        let g = &compiled.game;
        assert_eq!(g.place("DFA_Pstate_0").unwrap().initial_tokens, 1);
        assert!(g.place("DFA_TRACK_Pswitch4").is_some());
        assert!(g.place("DFA_TRACK_Pswitch3").is_none());
        assert!(g.arc("TOPOLOGY_T_2_4", "DFA_TRACK_Pswitch4").is_some());
        assert!(g.arc("DFA_TURN", "TOPOLOGY_T_2_4").is_some());
        assert!(g.arc("DFA_TURN", "TOPOLOGY_T_2_3").is_none());
        assert!(g.arc("PACKET_INJECT_T", "TOPOLOGY_P_1").is_some());
        // Two states, one relevant label.
        let dfa_transitions = g.transitions().iter().filter(|t| t.name.starts_with("DFA_T")).count();
        assert_eq!(dfa_transitions, 2);
    }

    #[test]
    fn test_query_text() {
        let compiled = compile(&small(), &[], 0);
        assert_eq!(
            compiled.query.with_bound(3).to_string(),
            "EF (UPDATE_P_BATCHES <= 3 and (DFA_Pstate_1 == 1))"
        );
        let empty = Query {
            final_places: vec![],
            batch_bound: 1,
        };
        assert_eq!(empty.to_string(), "EF (UPDATE_P_BATCHES <= 1 and (false))");
    }

    #[test]
    fn test_pnml() {
        let compiled = compile(&small(), &[], 0);
        let pnml = compiled.game.to_pnml().unwrap();
        assert!(pnml.starts_with("<?xml"));
        assert!(pnml.contains(r#"<place id="UPDATE_P_QUEUEING">"#));
        assert!(pnml.contains("<player><value>0</value></player>"));
        assert!(pnml.trim_end().ends_with("</pnml>"));
        assert_eq!(pnml.matches("<arc ").count(), compiled.game.arcs().len());
    }

    #[test]
    fn test_duplicate_arcs_keep_first() {
        let mut g = PetriGame::new();
        let p = g.add_place("p", 1);
        let t = g.add_transition("t", true);
        g.add_arc(&p, &t, 2);
        g.add_arc(&p, &t, 5);
        g.add_arc(&t, &p, 0);
        assert_eq!(g.arcs().len(), 2);
        assert_eq!(g.arc("p", "t").unwrap().weight, 2);
        assert_eq!(g.arc("t", "p").unwrap().weight, 1);
    }

    #[test]
    fn test_pnml_escapes_names() {
        let mut g = PetriGame::new();
        let p = g.add_place("P_a&b", 1);
        let t = g.add_transition(r#"T_<"x">'"#, false);
        g.add_arc(&p, &t, 1);
        let pnml = g.to_pnml().unwrap();
        assert!(pnml.contains(r#"<place id="P_a&amp;b">"#));
        assert!(pnml.contains(r#"<transition id="T_&lt;&quot;x&quot;&gt;&apos;">"#));
        assert!(pnml.contains(r#"source="P_a&amp;b" target="T_&lt;&quot;x&quot;&gt;&apos;""#));
        assert!(!pnml.contains("a&b"));
        assert_eq!(escape("SWITCH_T_1_QUEUE"), Cow::Borrowed("SWITCH_T_1_QUEUE"));
    }
}
