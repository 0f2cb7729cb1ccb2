//! Error types.
//!
//! Infeasible problems are not errors; see [`Outcome`](crate::pipeline::Outcome).

use std::io;

use thiserror::Error;

/// Malformed input model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// An edge list whose length is not 2.
    #[error("Edge must have exactly two endpoints, got {0:?}")]
    MalformedEdge(Vec<i32>),
    /// The mandatory reachability property is absent.
    #[error("Model has no reachability property")]
    MissingReachability,
    /// Inconsistent automaton literal.
    #[error("Invalid automaton: {0}")]
    InvalidAutomaton(String),
}

/// Failure to obtain an answer from the external verifier.
#[derive(Debug, Error)]
pub enum VerifierError {
    /// Could not write inputs or spawn the engine.
    #[error("I/O error while running verifier: {0}")]
    Io(#[from] io::Error),
    /// The engine ran but produced no recognizable verdict.
    #[error("Verifier produced no verdict:\n{diagnostics}")]
    ToolFailure { diagnostics: String },
}

/// Fatal failure of the synthesis pipeline.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("{0}")]
    Verifier(#[from] VerifierError),
    /// Writing debug artifacts failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
