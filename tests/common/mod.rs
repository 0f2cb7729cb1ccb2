//! A brute-force stand-in for the external model checker.
//!
//! The oracle is handed the subproblems the pipeline is going to solve, in order.
//! For each query it enumerates every assignment of the updatable switches to at
//! most `bound` batches and checks every configuration a packet can observe: all
//! earlier batches applied plus any subset of the current one.

#![allow(dead_code)]

mod game;

pub use game::{GameEngine, Net};

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;

use conupsyn::cusp::{Cusp, Cuspt};
use conupsyn::decompose::topological_decomposition;
use conupsyn::error::VerifierError;
use conupsyn::model::UpdateSynthesisModel;
use conupsyn::petri::{PetriGame, Query, CONUP};
use conupsyn::policy::{generate_policy, network_topology};
use conupsyn::types::{Batch, StateId, Switch};
use conupsyn::verifier::{Engine, Verdict, Verifier};

pub fn sw(id: i32) -> Switch {
    Switch::new(id)
}

pub fn batch(ids: &[i32]) -> Batch {
    ids.iter().map(|&i| sw(i)).collect()
}

/// The problems the pipeline will hand to the engine.
pub fn subproblems(usm: &UpdateSynthesisModel, decomposition: bool) -> Vec<Cuspt> {
    let topology = network_topology(usm);
    let cuspt = Cusp::from_model(usm, generate_policy(usm, Some(&topology))).with_pseudo_nodes();
    if decomposition {
        topological_decomposition(&cuspt, &topology)
    } else {
        vec![cuspt]
    }
}

/// Every `(bound, satisfied)` pair an engine answered, across all sessions.
pub type AnswerLog = Rc<RefCell<Vec<(usize, bool)>>>;

pub struct Oracle {
    pending: VecDeque<Cuspt>,
    pub answers: AnswerLog,
    pub loaded: usize,
}

impl Oracle {
    pub fn new(subproblems: Vec<Cuspt>) -> Self {
        Self {
            pending: subproblems.into(),
            answers: AnswerLog::default(),
            loaded: 0,
        }
    }
}

impl Engine for Oracle {
    type Session = OracleSession;

    fn load(&mut self, game: &PetriGame) -> Result<OracleSession, VerifierError> {
        if game.transition(CONUP).is_none() {
            return Err(VerifierError::ToolFailure {
                diagnostics: "game has no batch commit transition".to_string(),
            });
        }
        let cuspt = self.pending.pop_front().ok_or_else(|| VerifierError::ToolFailure {
            diagnostics: "unexpected subproblem".to_string(),
        })?;
        self.loaded += 1;
        Ok(OracleSession {
            cuspt,
            answers: Rc::clone(&self.answers),
        })
    }
}

pub struct OracleSession {
    cuspt: Cuspt,
    answers: AnswerLog,
}

impl OracleSession {
    fn accepted(&self, updated: &BTreeSet<Switch>) -> bool {
        fn walk(
            cuspt: &Cuspt,
            updated: &BTreeSet<Switch>,
            s: Switch,
            state: StateId,
            path: &mut BTreeSet<Switch>,
        ) -> bool {
            if cuspt.policy.is_final(state) {
                return true;
            }
            let next = if updated.contains(&s) {
                cuspt.final_hops(s)
            } else {
                cuspt.initial_hops(s)
            };
            if state.is_dead() || s == cuspt.egress || next.is_empty() || !path.insert(s) {
                return false;
            }
            let ok = next
                .iter()
                .all(|&t| walk(cuspt, updated, t, cuspt.policy.lookup(state, &t), path));
            path.remove(&s);
            ok
        }
        walk(
            &self.cuspt,
            updated,
            self.cuspt.ingress,
            self.cuspt.policy.initial(),
            &mut BTreeSet::new(),
        )
    }

    fn consistent(&self, batches: &[Batch]) -> bool {
        let mut done = BTreeSet::new();
        for b in batches {
            let members: Vec<Switch> = b.iter().copied().collect();
            for mask in 0u32..(1 << members.len()) {
                let mut updated = done.clone();
                updated.extend(
                    members
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| mask & (1 << i) != 0)
                        .map(|(_, &s)| s),
                );
                if !self.accepted(&updated) {
                    return false;
                }
            }
            done.extend(members);
        }
        true
    }

    /// The shortest consistent schedule with at most `bound` batches.
    pub fn schedule(&self, bound: usize) -> Option<Vec<Batch>> {
        let switches: Vec<Switch> = self.cuspt.updatable_switches().into_iter().collect();
        let n = switches.len() as u32;
        for k in 1..=bound {
            for code in 0..k.pow(n) {
                let mut batches = vec![Batch::new(); k];
                let mut rest = code;
                for &s in &switches {
                    batches[rest % k].insert(s);
                    rest /= k;
                }
                if batches.iter().all(|b| !b.is_empty()) && self.consistent(&batches) {
                    return Some(batches);
                }
            }
        }
        None
    }
}

fn strategy_text(batches: &[Batch]) -> String {
    let mut out = String::new();
    for b in batches {
        for s in b {
            out.push_str(&format!("[\"SWITCH_T_{}_QUEUE\"]\n", s));
        }
        out.push_str(&format!("[\"{}\"]\n", CONUP));
    }
    out
}

impl Verifier for OracleSession {
    fn verify(&mut self, query: &Query) -> Result<Verdict, VerifierError> {
        let verdict = match self.schedule(query.batch_bound) {
            Some(batches) => Verdict::Satisfied {
                strategy: strategy_text(&batches),
            },
            None => Verdict::Unsatisfied,
        };
        self.answers
            .borrow_mut()
            .push((query.batch_bound, verdict.is_satisfied()));
        Ok(verdict)
    }
}
