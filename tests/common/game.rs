//! Exhaustive solver for compiled Petri games.
//!
//! Markings are explored depth-first with memoization. A marking is won by the
//! updater if the query holds in it, or if the network has an enabled transition
//! and every one of them leads to a won marking, or if the network has none and
//! some updater transition does. Apart from `UPDATE_T_READY`, every transition
//! either uses up a token that never comes back or commits a batch, and the updater
//! must commit a batch before the network can get ready again. No marking repeats,
//! so the recursion terminates.

use std::collections::HashMap;
use std::rc::Rc;

use conupsyn::error::VerifierError;
use conupsyn::petri::{PetriGame, Query, CONUP};
use conupsyn::verifier::{Engine, Verdict, Verifier};

use super::AnswerLog;

const BATCHES: &str = "UPDATE_P_BATCHES";
const INJECT: &str = "PACKET_INJECT_T";

type Marking = Vec<usize>;

struct Move {
    name: String,
    controllable: bool,
    input: Vec<(usize, usize)>,
    output: Vec<(usize, usize)>,
}

/// A game flattened to index-based arcs.
pub struct Net {
    place_index: HashMap<String, usize>,
    initial: Marking,
    moves: Vec<Move>,
}

impl Net {
    pub fn new(game: &PetriGame) -> Self {
        let place_index: HashMap<String, usize> = game
            .places()
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect();
        let move_index: HashMap<&str, usize> = game
            .transitions()
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.as_str(), i))
            .collect();
        let mut moves: Vec<Move> = game
            .transitions()
            .iter()
            .map(|t| Move {
                name: t.name.clone(),
                controllable: t.controllable,
                input: Vec::new(),
                output: Vec::new(),
            })
            .collect();
        for arc in game.arcs() {
            match (place_index.get(&arc.source), move_index.get(arc.target.as_str())) {
                (Some(&p), Some(&t)) => moves[t].input.push((p, arc.weight)),
                _ => {
                    let t = move_index[arc.source.as_str()];
                    let p = place_index[&arc.target];
                    moves[t].output.push((p, arc.weight));
                }
            }
        }
        Self {
            initial: game.places().iter().map(|p| p.initial_tokens).collect(),
            place_index,
            moves,
        }
    }

    fn enabled(&self, m: &Marking, controllable: bool) -> Vec<usize> {
        (0..self.moves.len())
            .filter(|&t| self.moves[t].controllable == controllable)
            .filter(|&t| self.moves[t].input.iter().all(|&(p, w)| m[p] >= w))
            .collect()
    }

    fn fire(&self, m: &Marking, t: usize) -> Marking {
        let mut next = m.clone();
        for &(p, w) in &self.moves[t].input {
            next[p] -= w;
        }
        for &(p, w) in &self.moves[t].output {
            next[p] += w;
        }
        next
    }

    /// Solves `query` from the initial marking.
    pub fn solve(&self, query: &Query) -> Solver<'_> {
        Solver {
            net: self,
            batches: self.place_index[BATCHES],
            finals: query.final_places.iter().map(|p| self.place_index[p]).collect(),
            bound: query.batch_bound,
            memo: HashMap::new(),
        }
    }
}

pub struct Solver<'a> {
    net: &'a Net,
    batches: usize,
    finals: Vec<usize>,
    bound: usize,
    memo: HashMap<Marking, bool>,
}

impl Solver<'_> {
    fn reached(&self, m: &Marking) -> bool {
        m[self.batches] <= self.bound && self.finals.iter().any(|&p| m[p] >= 1)
    }

    fn wins(&mut self, m: &Marking) -> bool {
        if let Some(&won) = self.memo.get(m) {
            return won;
        }
        let net = self.net;
        let won = self.reached(m) || {
            let network = net.enabled(m, false);
            if network.is_empty() {
                net.enabled(m, true).into_iter().any(|t| self.wins(&net.fire(m, t)))
            } else {
                network.into_iter().all(|t| self.wins(&net.fire(m, t)))
            }
        };
        self.memo.insert(m.clone(), won);
        won
    }

    pub fn winning(&mut self) -> bool {
        let initial = self.net.initial.clone();
        self.wins(&initial)
    }

    /// The updater's firings along the play in which the packet is injected last.
    ///
    /// Written in the verifier's strategy format, one bracketed name per line.
    pub fn strategy(&mut self) -> Option<String> {
        let net = self.net;
        let mut m = net.initial.clone();
        if !self.wins(&m) {
            return None;
        }
        let mut out = String::new();
        while !self.reached(&m) {
            let network = net.enabled(&m, false);
            let t = if network.is_empty() {
                let t = net
                    .enabled(&m, true)
                    .into_iter()
                    .find(|&t| self.wins(&net.fire(&m, t)))?;
                out.push_str(&format!("[\"{}\"]\n", net.moves[t].name));
                t
            } else {
                match network.into_iter().find(|&t| net.moves[t].name != INJECT) {
                    Some(t) => t,
                    None => break,
                }
            };
            m = net.fire(&m, t);
        }
        Some(out)
    }
}

/// An engine that answers every query by solving the loaded game itself.
#[derive(Default)]
pub struct GameEngine {
    pub answers: AnswerLog,
    pub loaded: usize,
}

impl Engine for GameEngine {
    type Session = GameSession;

    fn load(&mut self, game: &PetriGame) -> Result<GameSession, VerifierError> {
        if game.transition(CONUP).is_none() || game.place(BATCHES).is_none() {
            return Err(VerifierError::ToolFailure {
                diagnostics: "game has no batch counter".to_string(),
            });
        }
        self.loaded += 1;
        Ok(GameSession {
            net: Net::new(game),
            answers: Rc::clone(&self.answers),
        })
    }
}

pub struct GameSession {
    net: Net,
    answers: AnswerLog,
}

impl Verifier for GameSession {
    fn verify(&mut self, query: &Query) -> Result<Verdict, VerifierError> {
        let verdict = match self.net.solve(query).strategy() {
            Some(strategy) => Verdict::Satisfied { strategy },
            None => Verdict::Unsatisfied,
        };
        self.answers
            .borrow_mut()
            .push((query.batch_bound, verdict.is_satisfied()));
        Ok(verdict)
    }
}
