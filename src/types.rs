//! Identifier newtypes shared by every stage of the synthesis pipeline.
//!
//! Switches and automaton states are both plain integers in the input format,
//! so we wrap them to keep the two from being mixed up.
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A switch identifier.
///
/// Real switches carry the (non-negative) identifiers from the input model.
/// Two negative identifiers are reserved for the pseudo-nodes that collapse all
/// ingress and all egress switches into single topology endpoints.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Switch(i32);

impl Switch {
    /// Pseudo-node routing into every ingress switch.
    pub const INGRESS: Switch = Switch(-1);
    /// Pseudo-node every egress switch routes into.
    pub const EGRESS: Switch = Switch(-2);

    pub const fn new(id: i32) -> Self {
        Switch(id)
    }

    /// Returns the raw identifier.
    pub const fn id(self) -> i32 {
        self.0
    }

    /// Checks whether this is one of the two topology pseudo-nodes.
    pub const fn is_pseudo(self) -> bool {
        self.0 == Self::INGRESS.0 || self.0 == Self::EGRESS.0
    }
}

impl fmt::Display for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Switch {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Switch)
    }
}

impl From<i32> for Switch {
    fn from(id: i32) -> Self {
        Switch(id)
    }
}

impl From<Switch> for i32 {
    fn from(switch: Switch) -> Self {
        switch.0
    }
}

/// An automaton state identifier.
///
/// # Invariants
///
/// - Ordinary states are allocated from 0 upwards, once per construction.
/// - [`StateId::DEAD`] is the reserved rejecting sink and is never allocated.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct StateId(i32);

impl StateId {
    /// The implicit rejecting sink.
    pub const DEAD: StateId = StateId(-1);

    /// Creates a state identifier for an ordinary (allocated) state.
    ///
    /// # Panics
    ///
    /// Panics if `index` does not fit the identifier range.
    pub fn new(index: usize) -> Self {
        assert!(index < i32::MAX as usize, "State index out of range: {}", index);
        StateId(index as i32)
    }

    /// Returns the raw identifier.
    pub const fn id(self) -> i32 {
        self.0
    }

    pub const fn is_dead(self) -> bool {
        self.0 == Self::DEAD.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StateId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(StateId)
    }
}

/// A set of switches updated atomically in one step of the rollout.
pub type Batch = BTreeSet<Switch>;
