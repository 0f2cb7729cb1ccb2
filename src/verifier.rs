//! Interface to the external Petri-game model checker.
//!
//! An [`Engine`] loads one compiled game and hands out a [`Verifier`] session that
//! answers queries against it. [`VerifyPn`] drives the `verifypn-games` binary as a
//! subprocess; tests substitute their own engines.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use log::{debug, info};
use regex::Regex;
use tempfile::NamedTempFile;

use crate::error::VerifierError;
use crate::petri::{PetriGame, Query};

const BEGIN_STRATEGY: &str = "##BEGIN STRATEGY##";
const END_STRATEGY: &str = "##END STRATEGY##";

/// Answer to a single query.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Verdict {
    /// A winning strategy exists; `strategy` is the engine's textual description.
    Satisfied { strategy: String },
    Unsatisfied,
}

impl Verdict {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Verdict::Satisfied { .. })
    }
}

/// A loaded game that can be queried repeatedly with different bounds.
pub trait Verifier {
    fn verify(&mut self, query: &Query) -> Result<Verdict, VerifierError>;
}

/// Factory for verifier sessions.
pub trait Engine {
    type Session: Verifier;

    fn load(&mut self, game: &PetriGame) -> Result<Self::Session, VerifierError>;
}

/// The `verifypn-games` command-line engine.
#[derive(Debug, Clone)]
pub struct VerifyPn {
    path: PathBuf,
    echo: bool,
}

impl VerifyPn {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            echo: false,
        }
    }

    /// Logs the command line and raw engine output at info level.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Engine for VerifyPn {
    type Session = VerifyPnSession;

    fn load(&mut self, game: &PetriGame) -> Result<Self::Session, VerifierError> {
        let pnml = game.to_pnml().map_err(|_| VerifierError::ToolFailure {
            diagnostics: "could not render the Petri game".to_string(),
        })?;
        let mut model = tempfile::Builder::new().prefix("model").suffix(".pnml").tempfile()?;
        model.write_all(pnml.as_bytes())?;
        model.flush()?;
        Ok(VerifyPnSession {
            engine: self.path.clone(),
            echo: self.echo,
            model,
            last_time: None,
        })
    }
}

/// A PNML model on disk, queried through repeated engine invocations.
#[derive(Debug)]
pub struct VerifyPnSession {
    engine: PathBuf,
    echo: bool,
    model: NamedTempFile,
    last_time: Option<f64>,
}

impl VerifyPnSession {
    pub fn model_path(&self) -> &Path {
        self.model.path()
    }

    /// Engine-reported solving time of the last query, in seconds.
    pub fn last_time(&self) -> Option<f64> {
        self.last_time
    }
}

impl Verifier for VerifyPnSession {
    fn verify(&mut self, query: &Query) -> Result<Verdict, VerifierError> {
        let mut query_file = tempfile::Builder::new().prefix("query").suffix(".q").tempfile()?;
        writeln!(query_file, "{}", query)?;
        query_file.flush()?;

        let mut cmd = Command::new(&self.engine);
        cmd.arg("--strategy-output")
            .arg("_")
            .arg(self.model.path())
            .arg(query_file.path())
            .args(["-q", "0", "-r", "0", "-s", "RDFS"]);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        if self.echo {
            info!("{:?}", cmd);
        }

        let output = cmd.output()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if self.echo {
            info!("{}", stdout);
        }
        self.last_time = reported_time(&stdout);
        debug!(
            "verifypn finished with {} in {:?} seconds",
            output.status, self.last_time
        );
        parse_output(&stdout, &stderr)
    }
}

fn time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Time \(seconds\) *: (\d+\.\d+)").expect("time pattern is valid"))
}

/// The `Time (seconds) : x` figure printed by the engine, if any.
pub fn reported_time(output: &str) -> Option<f64> {
    time_regex()
        .captures(output)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Interprets the engine's standard output.
///
/// A satisfied query yields the text of the last strategy block. Output that
/// carries neither verdict marker is a tool failure reporting `stderr`.
pub fn parse_output(stdout: &str, stderr: &str) -> Result<Verdict, VerifierError> {
    if stdout.contains("is satisfied") {
        let from = stdout.rfind(BEGIN_STRATEGY).map_or(0, |i| i + BEGIN_STRATEGY.len());
        let rest = &stdout[from..];
        let to = rest.find(END_STRATEGY).unwrap_or(rest.len());
        Ok(Verdict::Satisfied {
            strategy: rest[..to].to_string(),
        })
    } else if stdout.contains("is NOT satisfied") {
        Ok(Verdict::Unsatisfied)
    } else {
        Err(VerifierError::ToolFailure {
            diagnostics: stderr.to_string(),
        })
    }
}
