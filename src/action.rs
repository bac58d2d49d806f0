//! Rule actions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Action represents what happens to a request when a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Action {
    /// Let the request through
    #[default]
    Allow,
    /// Refuse the request
    Deny,
}

impl Action {
    /// Whether this action lets the request through.
    pub fn is_allowed(self) -> bool {
        matches!(self, Action::Allow)
    }

    /// Whether this action refuses the request.
    pub fn is_restricted(self) -> bool {
        !self.is_allowed()
    }

    /// Short code used by stored rules (`A` or `D`).
    pub fn code(self) -> char {
        match self {
            Action::Allow => 'A',
            Action::Deny => 'D',
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Allow => "ALLOW",
            Action::Deny => "DENY",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "A" | "ALLOW" => Ok(Action::Allow),
            "D" | "DENY" => Ok(Action::Deny),
            _ => Err(format!("unknown action: {s}")),
        }
    }
}

impl TryFrom<String> for Action {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.as_str().to_lowercase()
    }
}
