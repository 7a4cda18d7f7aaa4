//! The Review aggregate and its state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::digest::ContentDigest;
use crate::model::actor::Author;
use crate::model::comment::Comment;

/// Lifecycle status of a [`Review`]. See the transition table on
/// [`ReviewStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Open,
    ChangesRequested,
    Discussing,
    Updated,
    Approved,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Open => "open",
            ReviewStatus::ChangesRequested => "changes_requested",
            ReviewStatus::Discussing => "discussing",
            ReviewStatus::Updated => "updated",
            ReviewStatus::Approved => "approved",
        }
    }

    /// `approved` is the only terminal state (invariant 4).
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReviewStatus::Approved)
    }

    pub fn is_human_mutable(&self) -> bool {
        matches!(
            self,
            ReviewStatus::Open | ReviewStatus::Updated | ReviewStatus::Discussing
        )
    }

    /// Validates a transition against the edge set in the component design
    /// (§4.2), including the `discussing → changes_requested` handback that
    /// fires once every posted question has been answered. `approve` is
    /// intentionally excluded here: it is unconditional from any non-terminal
    /// state and is checked separately by callers via
    /// [`ReviewStatus::can_approve`].
    pub fn can_transition_to(&self, target: ReviewStatus) -> bool {
        use ReviewStatus::*;
        matches!(
            (self, target),
            (Open, ChangesRequested)
                | (ChangesRequested, Discussing)
                | (ChangesRequested, Updated)
                | (Discussing, Updated)
                | (Discussing, ChangesRequested)
                | (Updated, ChangesRequested)
        )
    }

    /// `approve` transitions to `approved` from any non-terminal state.
    pub fn can_approve(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable, content-addressed snapshot of the plan document.
///
/// Versions are append-only (invariant 5): duplicate content never creates a
/// new entry, and rollback appends a new version equal in content to the
/// target rather than truncating history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentVersion {
    pub digest: ContentDigest,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub author: Author,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<ContentDigest>,
}

impl DocumentVersion {
    pub fn new(
        content: impl Into<String>,
        author: Author,
        description: Option<String>,
        previous: Option<ContentDigest>,
    ) -> Self {
        let content = content.into();
        let digest = ContentDigest::compute(&content);
        Self {
            digest,
            content,
            created_at: Utc::now(),
            description,
            author,
            previous,
        }
    }
}

/// The aggregate root: a single human-review session over an evolving plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Review {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    pub status: ReviewStatus,
    /// The materialized current version's content, kept denormalized
    /// alongside `document_versions` so readers don't have to resolve the
    /// current digest through the version list.
    pub plan_content: String,
    pub document_versions: Vec<DocumentVersion>,
    pub current_version: ContentDigest,
    pub comments: Vec<Comment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_directly: Option<bool>,
}

impl Review {
    pub fn new(plan: impl Into<String>, project_path: Option<String>) -> Self {
        let version = DocumentVersion::new(plan, Author::Agent, None, None);
        let current_version = version.digest;
        let plan_content = version.content.clone();
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            project_path,
            status: ReviewStatus::Open,
            plan_content,
            document_versions: vec![version],
            current_version,
            comments: Vec::new(),
            approval_note: None,
            approved_directly: None,
        }
    }

    /// Returns the version record matching `digest`, if it exists among
    /// this review's versions (invariant 1/2 support).
    pub fn version(&self, digest: &ContentDigest) -> Option<&DocumentVersion> {
        self.document_versions.iter().find(|v| v.digest == *digest)
    }

    pub fn comment_mut(&mut self, id: Uuid) -> Option<&mut Comment> {
        self.comments.iter_mut().find(|c| c.id == id)
    }

    pub fn unresolved_comments(&self) -> impl Iterator<Item = &Comment> {
        self.comments.iter().filter(|c| !c.resolved)
    }

    pub fn has_unresolved_comments(&self) -> bool {
        self.comments.iter().any(|c| !c.resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table_matches_component_design() {
        use ReviewStatus::*;
        assert!(Open.can_transition_to(ChangesRequested));
        assert!(ChangesRequested.can_transition_to(Discussing));
        assert!(ChangesRequested.can_transition_to(Updated));
        assert!(Discussing.can_transition_to(Updated));
        assert!(Discussing.can_transition_to(ChangesRequested));
        assert!(Updated.can_transition_to(ChangesRequested));

        // Not legal edges.
        assert!(!Open.can_transition_to(Updated));
        assert!(!ChangesRequested.can_transition_to(ChangesRequested));
        assert!(!Approved.can_transition_to(ChangesRequested));
    }

    #[test]
    fn test_approve_is_unconditional_from_non_terminal() {
        use ReviewStatus::*;
        assert!(Open.can_approve());
        assert!(ChangesRequested.can_approve());
        assert!(Discussing.can_approve());
        assert!(Updated.can_approve());
        assert!(!Approved.can_approve());
    }

    #[test]
    fn test_new_review_has_single_version_matching_current() {
        let review = Review::new("# Step 1\nDo X", None);
        assert_eq!(review.document_versions.len(), 1);
        assert_eq!(review.current_version, review.document_versions[0].digest);
        assert_eq!(review.status, ReviewStatus::Open);
    }

    #[test]
    fn test_version_lookup() {
        let review = Review::new("content", None);
        let digest = review.current_version;
        assert!(review.version(&digest).is_some());
        let bogus = ContentDigest::compute("not in this review");
        assert!(review.version(&bogus).is_none());
    }
}
