//! # conupsyn: Consistent Network Update Synthesis
//!
//! **`conupsyn`** computes how to move a network from one routing configuration to another
//! in as few *batches* of simultaneous switch updates as possible, such that every packet
//! in flight during the transition still satisfies the network's policy.
//!
//! ## How it works
//!
//! 1. Every property of the input model (reachability, waypoints, conditional enforcement,
//!    alternative waypoints, or a custom automaton) becomes a small deterministic automaton
//!    over switch identifiers; their intersection is the **policy**.
//! 2. The union of both routings is condensed into strongly connected components, each
//!    weighted by its **narrowness**. Bottleneck switches split the problem into
//!    independent subproblems.
//! 3. Switches that must be updated together, first, or last are merged into
//!    **equivalence classes**.
//! 4. Each subproblem is compiled into a two-player **Petri game** in which the updater
//!    schedules batches and the network forwards a packet. An external model checker
//!    (`verifypn-games`) decides whether a strategy exists within a batch bound, and a
//!    search over bounds finds the minimum.
//! 5. The partial schedules are merged batch by batch.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use conupsyn::model::UpdateSynthesisModel;
//! use conupsyn::pipeline::{synthesize, Options, Outcome};
//! use conupsyn::verifier::VerifyPn;
//!
//! let usm = UpdateSynthesisModel::from_path("network.json")?;
//! let mut engine = VerifyPn::new("/opt/verifypn-games");
//!
//! match synthesize(&usm, &Options::default(), &mut engine)? {
//!     Outcome::Solved { batches } => println!("{} batches: {:?}", batches.len(), batches),
//!     Outcome::Unsolvable => println!("no consistent schedule exists"),
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Core Components
//!
//! - **[`automaton`]**: Partial DFAs with implicit self-loops, intersection and pruning.
//! - **[`policy`]**: Property automata and their composition.
//! - **[`topology`]**: SCCs, narrowness and phase bunches.
//! - **[`decompose`]**: Splitting at bottlenecks.
//! - **[`equivalence`]**: Grouping switches into update components.
//! - **[`petri`]**: The Petri game and its PNML serialization.
//! - **[`verifier`]** and **[`search`]**: Driving the model checker.
//! - **[`pipeline`]**: Everything above, end to end.

pub mod automaton;
pub mod cache;
pub mod cusp;
pub mod decompose;
pub mod dot;
pub mod equivalence;
pub mod error;
pub mod generator;
pub mod model;
pub mod petri;
pub mod pipeline;
pub mod policy;
pub mod search;
pub mod subpaths;
pub mod topology;
pub mod types;
pub mod verifier;
