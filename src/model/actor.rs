//! Author attribution for document versions and comment resolutions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Who authored a [`super::review::DocumentVersion`] or resolved a comment.
///
/// Narrower than the teacher's `ActorKind` (human/agent/system/mcp_client):
/// the review protocol only ever attributes content to a human reviewer or
/// the submitting agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    Human,
    Agent,
}

impl Author {
    pub fn as_str(&self) -> &'static str {
        match self {
            Author::Human => "human",
            Author::Agent => "agent",
        }
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Author {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" => Ok(Author::Human),
            "agent" => Ok(Author::Agent),
            other => Err(format!("unknown author kind: {other}")),
        }
    }
}
