use std::fmt;

use serde::{Deserialize, Serialize};

/// Block number. Dense and strictly increasing across the reconciled history.
pub type UnitKey = u64;

/// Which of the two nodes a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The legacy node whose history is authoritative.
    Reference,
    /// The migrated node under test.
    Candidate,
}

impl Role {
    pub const BOTH: [Role; 2] = [Role::Reference, Role::Candidate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Reference => "reference",
            Role::Candidate => "candidate",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value per [`Role`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pair<T> {
    pub reference: T,
    pub candidate: T,
}

impl<T> Pair<T> {
    pub fn new(reference: T, candidate: T) -> Self {
        Self {
            reference,
            candidate,
        }
    }

    pub fn get(&self, role: Role) -> &T {
        match role {
            Role::Reference => &self.reference,
            Role::Candidate => &self.candidate,
        }
    }

    pub fn get_mut(&mut self, role: Role) -> &mut T {
        match role {
            Role::Reference => &mut self.reference,
            Role::Candidate => &mut self.candidate,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(Role, T) -> U) -> Pair<U> {
        Pair {
            reference: f(Role::Reference, self.reference),
            candidate: f(Role::Candidate, self.candidate),
        }
    }

    pub fn as_ref(&self) -> Pair<&T> {
        Pair {
            reference: &self.reference,
            candidate: &self.candidate,
        }
    }
}
