//! Comments anchored to a text span within a specific document version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::digest::ContentDigest;

/// UTF-8 character offset range `[startOffset, endOffset)` into the document
/// version the comment was attached to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextPosition {
    pub start_offset: u32,
    pub end_offset: u32,
}

impl TextPosition {
    pub fn new(start_offset: u32, end_offset: u32) -> Result<Self, String> {
        if end_offset < start_offset {
            return Err(format!(
                "end_offset {end_offset} precedes start_offset {start_offset}"
            ));
        }
        Ok(Self {
            start_offset,
            end_offset,
        })
    }
}

/// Drift status of a comment's anchor relative to the document version it
/// was attached to.
///
/// Nothing in this crate mutates this field after creation: position
/// migration across revisions is an open question (see the design notes),
/// so every comment stays `valid` for its own lifetime. The variant set is
/// carried in full for forward compatibility with a future implementation
/// that does perform migration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Valid,
    Adjusted,
    Stale,
}

impl Default for PositionStatus {
    fn default() -> Self {
        PositionStatus::Valid
    }
}

/// Type of follow-up question an agent can attach to a comment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Clarification,
    Choice,
    MultiChoice,
    /// Terminal acknowledgement. A comment carrying an `Accepted` question
    /// resolves immediately and must never remain unresolved (invariant 3).
    Accepted,
}

impl QuestionType {
    pub fn requires_options(&self) -> bool {
        matches!(self, QuestionType::Choice | QuestionType::MultiChoice)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QuestionType::Accepted)
    }
}

impl std::str::FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clarification" => Ok(QuestionType::Clarification),
            "choice" => Ok(QuestionType::Choice),
            "multiChoice" | "multi_choice" => Ok(QuestionType::MultiChoice),
            "accepted" => Ok(QuestionType::Accepted),
            other => Err(format!("unknown question type: {other}")),
        }
    }
}

/// An agent-originated follow-up attached to a comment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommentQuestion {
    #[serde(rename = "type")]
    pub kind: QuestionType,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

impl CommentQuestion {
    pub fn new(
        kind: QuestionType,
        message: impl Into<String>,
        options: Option<Vec<String>>,
    ) -> Result<Self, String> {
        if kind.requires_options() && options.as_ref().is_none_or(|o| o.is_empty()) {
            return Err(format!("question of type {kind:?} requires non-empty options"));
        }
        Ok(Self {
            kind,
            message: message.into(),
            options,
        })
    }
}

/// Metadata recorded when a comment is resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub resolved_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_in_version: Option<ContentDigest>,
    pub message: String,
}

/// Default resolution message applied when `update_plan` auto-resolves a
/// comment without an explicit override (scenario S2).
pub const DEFAULT_RESOLUTION_MESSAGE: &str = "已在修订版本中处理";

/// Human feedback anchored to a text span in a specific document version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Display-only copy of the text the comment was anchored to.
    pub quote: String,
    /// Free-form commenter text.
    pub comment: String,
    pub position: TextPosition,
    /// Digest of the document version this comment's offsets are relative to.
    pub document_version: ContentDigest,
    #[serde(default)]
    pub position_status: PositionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<CommentQuestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

impl Comment {
    pub fn new(
        quote: impl Into<String>,
        comment: impl Into<String>,
        position: TextPosition,
        document_version: ContentDigest,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            quote: quote.into(),
            comment: comment.into(),
            position,
            document_version,
            position_status: PositionStatus::Valid,
            question: None,
            answer: None,
            resolved: false,
            resolution: None,
        }
    }

    /// Resolve the comment, recording resolution metadata (invariant 3 callers
    /// must ensure this is invoked before leaving an `accepted`-typed
    /// question unresolved).
    pub fn resolve(
        &mut self,
        resolved_in_version: Option<ContentDigest>,
        message: impl Into<String>,
    ) {
        self.resolved = true;
        self.resolution = Some(Resolution {
            resolved_at: Utc::now(),
            resolved_in_version,
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_position_rejects_inverted_range() {
        assert!(TextPosition::new(8, 0).is_err());
        assert!(TextPosition::new(0, 8).is_ok());
    }

    #[test]
    fn test_question_requires_options_for_choice() {
        assert!(CommentQuestion::new(QuestionType::Choice, "which?", None).is_err());
        assert!(
            CommentQuestion::new(
                QuestionType::Choice,
                "which?",
                Some(vec!["a".into(), "b".into()])
            )
            .is_ok()
        );
        assert!(CommentQuestion::new(QuestionType::Clarification, "why?", None).is_ok());
    }

    #[test]
    fn test_accepted_question_is_terminal() {
        assert!(QuestionType::Accepted.is_terminal());
        assert!(!QuestionType::Clarification.is_terminal());
    }

    #[test]
    fn test_comment_resolve_sets_metadata() {
        let digest = ContentDigest::compute("content");
        let position = TextPosition::new(0, 8).unwrap();
        let mut comment = Comment::new("line one", "rename", position, digest);
        assert!(!comment.resolved);

        let new_digest = ContentDigest::compute("content v2");
        comment.resolve(Some(new_digest), DEFAULT_RESOLUTION_MESSAGE);

        assert!(comment.resolved);
        let resolution = comment.resolution.expect("resolution set");
        assert_eq!(resolution.resolved_in_version, Some(new_digest));
        assert_eq!(resolution.message, DEFAULT_RESOLUTION_MESSAGE);
    }
}
