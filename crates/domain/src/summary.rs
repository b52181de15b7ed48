use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted rolling summary covering the inclusive turn range
/// `[start_turn_number, end_turn_number]`. Append-only; newer summaries
/// supersede older ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub token_count: u32,
    pub start_turn_number: u32,
    pub end_turn_number: u32,
    pub created_at: DateTime<Utc>,
}

/// A summary produced by the provider that has not been written yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSummary {
    pub content: String,
    #[serde(default)]
    pub token_count: u32,
    pub start_turn_number: u32,
    pub end_turn_number: u32,
}

/// The summary a turn carries forward: either the one already on disk or a
/// freshly generated one awaiting persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CarriedSummary {
    Stored(Summary),
    Fresh(GeneratedSummary),
}

impl CarriedSummary {
    pub fn content(&self) -> &str {
        match self {
            Self::Stored(s) => &s.content,
            Self::Fresh(g) => &g.content,
        }
    }

    /// Id of the stored summary. `None` until a fresh one is written.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Stored(s) => Some(&s.id),
            Self::Fresh(_) => None,
        }
    }

    pub fn end_turn_number(&self) -> u32 {
        match self {
            Self::Stored(s) => s.end_turn_number,
            Self::Fresh(g) => g.end_turn_number,
        }
    }
}
