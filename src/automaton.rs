//! Partial deterministic automata over a generic label alphabet.
//!
//! # Representation
//!
//! An [`Automaton`] stores only the transitions that were explicitly declared.
//! Every other `(state, label)` pair is an implicit self-loop: reading a label the
//! state does not care about leaves it where it is. This is how the policy automata
//! ignore switches that are irrelevant to them without materialising huge tables.
//!
//! The reserved [`StateId::DEAD`] state is the rejecting sink. It is never final, has
//! no outgoing transitions, and is only ever reached through transitions that were
//! explicitly routed to it (see [`AutomatonBuilder::edge_to_dead`]).
//!
//! # Construction
//!
//! Automata are built once through [`Automaton::build`], which hands an
//! [`AutomatonBuilder`] arena to a constructor closure:
//!
//! ```
//! use conupsyn::automaton::Automaton;
//!
//! // Accept once label 2 has been seen, and reject any further 2.
//! let dfa = Automaton::build([1, 2, 3], |b| {
//!     let s0 = b.new_state(true, false);
//!     let s1 = b.new_state(false, true);
//!     b.edge(s0, s1, [2]);
//!     b.edge_to_dead(s1, [2]);
//! });
//!
//! assert!(dfa.accepts(&[1, 2, 3]));
//! assert!(!dfa.accepts(&[1, 3]));
//! assert!(!dfa.accepts(&[2, 2]));
//! ```
//!
//! # Intersection
//!
//! [`Automaton::intersect`] builds the synchronous product of two automata, keeping
//! only product states from which an accepting state stays reachable. Transitions
//! into hopeless product states are redirected to the dead state, so repeated
//! intersections do not accumulate states that can never accept.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::{Debug, Display, Write as _};
use std::str::FromStr;

use log::debug;

use crate::cache::MemoTable;
use crate::error::ModelError;
use crate::types::StateId;

/// Opaque handle to a state allocated by an [`AutomatonBuilder`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct StateHandle(StateId);

impl StateHandle {
    pub fn id(self) -> StateId {
        self.0
    }
}

/// A single (possibly implicit) transition of an automaton.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Action<L> {
    pub from: StateId,
    pub label: L,
    pub to: StateId,
}

/// Arena owning the states of one automaton under construction.
pub struct AutomatonBuilder<L> {
    next_id: usize,
    initial: Option<StateId>,
    finals: BTreeSet<StateId>,
    delta: BTreeMap<StateId, BTreeMap<L, StateId>>,
}

impl<L: Ord + Clone> AutomatonBuilder<L> {
    fn new() -> Self {
        Self {
            next_id: 0,
            initial: None,
            finals: BTreeSet::new(),
            delta: BTreeMap::new(),
        }
    }

    /// Allocates a fresh state.
    ///
    /// # Panics
    ///
    /// Panics if a second initial state is requested.
    pub fn new_state(&mut self, initial: bool, is_final: bool) -> StateHandle {
        let id = StateId::new(self.next_id);
        self.next_id += 1;
        self.delta.insert(id, BTreeMap::new());
        if initial {
            assert!(self.initial.is_none(), "Automaton already has an initial state");
            self.initial = Some(id);
        }
        if is_final {
            self.finals.insert(id);
        }
        StateHandle(id)
    }

    /// Handle of the dead state, for callers that map foreign states onto this arena.
    pub fn dead(&self) -> StateHandle {
        StateHandle(StateId::DEAD)
    }

    /// Adds a transition `from --l--> to` for every label `l`.
    ///
    /// A later declaration for the same `(from, l)` pair overrides an earlier one.
    pub fn edge(&mut self, from: StateHandle, to: StateHandle, labels: impl IntoIterator<Item = L>) {
        assert!(!from.0.is_dead(), "The dead state has no outgoing transitions");
        let out = self.delta.entry(from.0).or_default();
        for label in labels {
            out.insert(label, to.0);
        }
    }

    /// Routes every given label from `from` into the dead state.
    pub fn edge_to_dead(&mut self, from: StateHandle, labels: impl IntoIterator<Item = L>) {
        self.edge(from, StateHandle(StateId::DEAD), labels);
    }

    fn finish(self, alphabet: BTreeSet<L>) -> Automaton<L> {
        let initial = self.initial.expect("Automaton must declare an initial state");
        Automaton {
            delta: self.delta,
            initial,
            finals: self.finals,
            alphabet,
        }
    }
}

/// An immutable partial DFA. See the [module documentation](self) for the semantics.
#[derive(Clone, Eq, PartialEq)]
pub struct Automaton<L> {
    delta: BTreeMap<StateId, BTreeMap<L, StateId>>,
    initial: StateId,
    finals: BTreeSet<StateId>,
    alphabet: BTreeSet<L>,
}

impl<L: Ord + Clone> Automaton<L> {
    /// Builds an automaton by running `f` against a fresh builder arena.
    ///
    /// # Panics
    ///
    /// Panics if `f` does not allocate an initial state.
    pub fn build(alphabet: impl IntoIterator<Item = L>, f: impl FnOnce(&mut AutomatonBuilder<L>)) -> Self {
        let mut builder = AutomatonBuilder::new();
        f(&mut builder);
        builder.finish(alphabet.into_iter().collect())
    }

    /// The one-state automaton accepting every word; identity for [`intersect`](Self::intersect).
    pub fn accepting_all(alphabet: impl IntoIterator<Item = L>) -> Self {
        Self::build(alphabet, |b| {
            b.new_state(true, true);
        })
    }

    pub fn initial(&self) -> StateId {
        self.initial
    }

    pub fn finals(&self) -> &BTreeSet<StateId> {
        &self.finals
    }

    pub fn is_final(&self, state: StateId) -> bool {
        self.finals.contains(&state)
    }

    pub fn alphabet(&self) -> &BTreeSet<L> {
        &self.alphabet
    }

    /// All states, including the dead state when some transition leads into it.
    pub fn states(&self) -> BTreeSet<StateId> {
        let mut states: BTreeSet<StateId> = self.delta.keys().copied().collect();
        states.extend(self.delta.values().flat_map(|out| out.values().copied()));
        states
    }

    /// Number of allocated (non-dead) states.
    pub fn num_states(&self) -> usize {
        self.delta.len()
    }

    /// Number of explicitly stored transitions.
    pub fn num_transitions(&self) -> usize {
        self.delta.values().map(|out| out.len()).sum()
    }

    /// Explicit transitions leaving `state`.
    pub fn transitions(&self, state: StateId) -> impl Iterator<Item = (&L, StateId)> + '_ {
        self.delta.get(&state).into_iter().flat_map(|out| out.iter().map(|(l, &t)| (l, t)))
    }

    /// All explicit transitions.
    pub fn edges(&self) -> impl Iterator<Item = (StateId, &L, StateId)> + '_ {
        self.delta
            .iter()
            .flat_map(|(&from, out)| out.iter().map(move |(l, &to)| (from, l, to)))
    }

    /// Successor of `state` on `label`; `state` itself when no transition is declared.
    pub fn lookup(&self, state: StateId, label: &L) -> StateId {
        if state.is_dead() {
            return StateId::DEAD;
        }
        self.delta
            .get(&state)
            .and_then(|out| out.get(label))
            .copied()
            .unwrap_or(state)
    }

    /// Runs the automaton over `word` from the initial state.
    pub fn run<'a>(&self, word: impl IntoIterator<Item = &'a L>) -> StateId
    where
        L: 'a,
    {
        word.into_iter().fold(self.initial, |s, l| self.lookup(s, l))
    }

    pub fn accepts<'a>(&self, word: impl IntoIterator<Item = &'a L>) -> bool
    where
        L: 'a,
    {
        self.is_final(self.run(word))
    }

    /// Labels with at least one explicit transition into a non-dead state.
    pub fn relevant_labels(&self) -> BTreeSet<L> {
        self.edges()
            .filter(|(_, _, to)| !to.is_dead())
            .map(|(_, l, _)| l.clone())
            .collect()
    }

    /// Every transition of every allocated state, with implicit self-loops made explicit
    /// for all labels of the alphabet.
    pub fn actions(&self) -> Vec<Action<L>> {
        let mut actions = Vec::new();
        for (&from, out) in self.delta.iter() {
            let labels: BTreeSet<&L> = self.alphabet.iter().chain(out.keys()).collect();
            for label in labels {
                let to = out.get(label).copied().unwrap_or(from);
                actions.push(Action {
                    from,
                    label: label.clone(),
                    to,
                });
            }
        }
        actions
    }

    /// Checks whether some final state is reachable from `state` through explicit
    /// transitions, never reading a label from `blacklist`.
    pub fn can_reach_final(&self, state: StateId, blacklist: &BTreeSet<L>) -> bool {
        if state.is_dead() {
            return false;
        }
        let mut visited = BTreeSet::from([state]);
        let mut queue = VecDeque::from([state]);
        while let Some(s) = queue.pop_front() {
            if self.is_final(s) {
                return true;
            }
            for (label, t) in self.transitions(s) {
                if t == s || t.is_dead() || blacklist.contains(label) {
                    continue;
                }
                if visited.insert(t) {
                    queue.push_back(t);
                }
            }
        }
        false
    }

    /// Checks whether the automaton accepts no word at all.
    pub fn is_empty(&self) -> bool {
        !self.can_reach_final(self.initial, &BTreeSet::new())
    }

    /// Synchronous product, pruned to product states that can still accept.
    ///
    /// A product state is final iff both components are final. Pairs involving the
    /// dead state collapse into the single dead state of the result. Labels declared
    /// by neither component remain implicit self-loops.
    pub fn intersect(&self, other: &Self) -> Self {
        type Pair = (StateId, StateId);

        // Explore every reachable product pair.
        let mut index: MemoTable<Pair, usize> = MemoTable::new();
        let mut pairs: Vec<Pair> = Vec::new();
        let mut succ: Vec<Vec<(L, Option<usize>)>> = Vec::new();
        let start = (self.initial, other.initial);
        index.insert(start, 0);
        pairs.push(start);
        succ.push(Vec::new());

        let mut queue = VecDeque::from([0usize]);
        while let Some(i) = queue.pop_front() {
            let (a, b) = pairs[i];
            let labels: BTreeSet<&L> = self
                .transitions(a)
                .map(|(l, _)| l)
                .chain(other.transitions(b).map(|(l, _)| l))
                .collect();
            let mut out = Vec::with_capacity(labels.len());
            for label in labels {
                let next = (self.lookup(a, label), other.lookup(b, label));
                if next.0.is_dead() || next.1.is_dead() {
                    out.push((label.clone(), None));
                    continue;
                }
                let j = match index.get(&next) {
                    Some(&j) => j,
                    None => {
                        let j = pairs.len();
                        index.insert(next, j);
                        pairs.push(next);
                        succ.push(Vec::new());
                        queue.push_back(j);
                        j
                    }
                };
                out.push((label.clone(), Some(j)));
            }
            succ[i] = out;
        }

        // Backward closure from accepting pairs.
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); pairs.len()];
        for (i, out) in succ.iter().enumerate() {
            for &(_, j) in out {
                if let Some(j) = j {
                    preds[j].push(i);
                }
            }
        }
        let mut live = vec![false; pairs.len()];
        let mut queue: VecDeque<usize> = VecDeque::new();
        for (i, &(a, b)) in pairs.iter().enumerate() {
            if self.is_final(a) && other.is_final(b) {
                live[i] = true;
                queue.push_back(i);
            }
        }
        while let Some(j) = queue.pop_front() {
            for &i in &preds[j] {
                if !live[i] {
                    live[i] = true;
                    queue.push_back(i);
                }
            }
        }

        let alphabet: BTreeSet<L> = self.alphabet.union(&other.alphabet).cloned().collect();
        let result = Self::build(alphabet, |b| {
            if !live[0] {
                // Nothing is accepted: keep a lone rejecting initial state.
                b.new_state(true, false);
                return;
            }
            let mut handles: BTreeMap<usize, StateHandle> = BTreeMap::new();
            for (i, &(sa, sb)) in pairs.iter().enumerate() {
                if live[i] {
                    let h = b.new_state(i == 0, self.is_final(sa) && other.is_final(sb));
                    handles.insert(i, h);
                }
            }
            for (i, out) in succ.iter().enumerate() {
                let Some(&from) = handles.get(&i) else {
                    continue;
                };
                for (label, j) in out {
                    match j.and_then(|j| handles.get(&j)) {
                        Some(&to) => b.edge(from, to, [label.clone()]),
                        None => b.edge_to_dead(from, [label.clone()]),
                    }
                }
            }
        });

        debug!(
            "intersect: {} x {} states -> {} pairs explored, {} kept (memo hits: {}, misses: {}, hit rate {:.2})",
            self.num_states(),
            other.num_states(),
            index.size(),
            result.num_states(),
            index.hits(),
            index.misses(),
            index.hit_rate()
        );
        result
    }
}

impl<L: Ord + Clone + Display> Automaton<L> {
    /// Deterministic plain-text dump of the automaton.
    ///
    /// ```text
    /// States:0,1,-1
    /// Initial state:0
    /// Final states:1
    /// Alphabet:1,2,3
    /// Actions:0,2,1;1,2,-1
    /// ```
    pub fn to_text(&self) -> String {
        fn join<T: Display>(items: impl IntoIterator<Item = T>, sep: &str) -> String {
            items.into_iter().map(|x| x.to_string()).collect::<Vec<_>>().join(sep)
        }

        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = writeln!(out, "States:{}", join(self.states(), ","));
        let _ = writeln!(out, "Initial state:{}", self.initial);
        let _ = writeln!(out, "Final states:{}", join(&self.finals, ","));
        let _ = writeln!(out, "Alphabet:{}", join(&self.alphabet, ","));
        let _ = write!(
            out,
            "Actions:{}",
            join(self.edges().map(|(f, l, t)| format!("{},{},{}", f, l, t)), ";")
        );
        out
    }
}

impl<L: Ord + Clone + FromStr> Automaton<L> {
    /// Parses the format produced by [`to_text`](Self::to_text).
    pub fn from_text(text: &str) -> Result<Self, ModelError> {
        fn invalid(msg: impl Into<String>) -> ModelError {
            ModelError::InvalidAutomaton(msg.into())
        }
        fn parse<T: FromStr>(s: &str, what: &str) -> Result<T, ModelError> {
            s.trim()
                .parse()
                .map_err(|_| ModelError::InvalidAutomaton(format!("cannot parse {} '{}'", what, s)))
        }
        fn list<'a>(s: &'a str, sep: char) -> impl Iterator<Item = &'a str> {
            s.split(sep).map(str::trim).filter(|x| !x.is_empty())
        }

        let mut delta: BTreeMap<StateId, BTreeMap<L, StateId>> = BTreeMap::new();
        let mut initial = None;
        let mut finals = BTreeSet::new();
        let mut alphabet = BTreeSet::new();

        for line in text.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("States:") {
                for s in list(rest, ',') {
                    let s: StateId = parse(s, "state")?;
                    if !s.is_dead() {
                        delta.entry(s).or_default();
                    }
                }
            } else if let Some(rest) = line.strip_prefix("Initial state:") {
                initial = Some(parse::<StateId>(rest, "state")?);
            } else if let Some(rest) = line.strip_prefix("Final states:") {
                for s in list(rest, ',') {
                    finals.insert(parse::<StateId>(s, "state")?);
                }
            } else if let Some(rest) = line.strip_prefix("Alphabet:") {
                for l in list(rest, ',') {
                    alphabet.insert(parse::<L>(l, "label")?);
                }
            } else if let Some(rest) = line.strip_prefix("Actions:") {
                for action in list(rest, ';') {
                    let parts: Vec<&str> = action.split(',').collect();
                    if parts.len() != 3 {
                        return Err(invalid(format!("malformed action '{}'", action)));
                    }
                    let from: StateId = parse(parts[0], "state")?;
                    let label: L = parse(parts[1], "label")?;
                    let to: StateId = parse(parts[2], "state")?;
                    if from.is_dead() {
                        return Err(invalid("the dead state cannot have outgoing actions"));
                    }
                    alphabet.insert(label.clone());
                    delta.entry(from).or_default().insert(label, to);
                    if !to.is_dead() {
                        delta.entry(to).or_default();
                    }
                }
            } else if !line.is_empty() {
                return Err(invalid(format!("unexpected line '{}'", line)));
            }
        }

        let initial = initial.ok_or_else(|| invalid("missing initial state"))?;
        if initial.is_dead() {
            return Err(invalid("the dead state cannot be initial"));
        }
        if finals.contains(&StateId::DEAD) {
            return Err(invalid("the dead state cannot be final"));
        }
        delta.entry(initial).or_default();
        for &f in &finals {
            delta.entry(f).or_default();
        }

        Ok(Self {
            delta,
            initial,
            finals,
            alphabet,
        })
    }
}

impl<L: Debug> Debug for Automaton<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Automaton")
            .field("states", &self.delta.len())
            .field("transitions", &self.delta.values().map(|o| o.len()).sum::<usize>())
            .field("initial", &self.initial)
            .field("finals", &self.finals)
            .finish()
    }
}
