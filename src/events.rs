//! In-process typed publish/subscribe, keyed by review ID.
//!
//! One `tokio::sync::broadcast` channel per review (grounded on the
//! single-global-channel SSE pattern in the `gg` web mode example, widened
//! to one channel per topic so a lagging subscriber on review A can never
//! cause review B's subscribers to drop frames). No persistence, no replay:
//! a subscriber only sees events published after it subscribes.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::digest::ContentDigest;
use crate::model::{Author, ReviewStatus};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionSummary {
    pub digest: ContentDigest,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub author: Author,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedComment {
    pub comment_id: Uuid,
    pub resolution: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionEntry {
    pub comment_id: Uuid,
    pub question: crate::model::CommentQuestion,
}

/// Typed events the Bus fans out. `connected` is synthesized per-connection
/// by the Gateway rather than published through the Bus (it carries a
/// snapshot private to that one subscriber), so it is not a variant here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReviewEvent {
    StatusChanged {
        status: ReviewStatus,
        previous_status: ReviewStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        plan_content: Option<String>,
    },
    VersionUpdated {
        version: VersionSummary,
        content: String,
        resolved_comments: Vec<ResolvedComment>,
    },
    QuestionsUpdated {
        questions: Vec<QuestionEntry>,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
}

impl ReviewEvent {
    /// The `event: <type>` SSE frame name (§6 wire format).
    pub fn type_name(&self) -> &'static str {
        match self {
            ReviewEvent::StatusChanged { .. } => "status_changed",
            ReviewEvent::VersionUpdated { .. } => "version_updated",
            ReviewEvent::QuestionsUpdated { .. } => "questions_updated",
            ReviewEvent::Heartbeat { .. } => "heartbeat",
        }
    }
}

/// Per-review publish/subscribe registry.
///
/// A subscriber's unsubscription is scoped to the lifetime of its
/// `broadcast::Receiver`: dropping it (e.g. when a Gateway connection
/// closes) removes it from the channel with no separate handle needed.
#[derive(Clone, Default)]
pub struct EventBus {
    channels: DashMap<Uuid, broadcast::Sender<ReviewEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a review's event stream, creating its channel on first use.
    pub fn subscribe(&self, review_id: Uuid) -> broadcast::Receiver<ReviewEvent> {
        self.channels
            .entry(review_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Dispatch synchronously to every current subscriber of `review_id`.
    /// A send with no receivers is not an error — it simply means nobody is
    /// watching yet (per-topic ordering is preserved regardless).
    pub fn publish(&self, review_id: Uuid, event: ReviewEvent) {
        if let Some(sender) = self.channels.get(&review_id) {
            // SendError means no receivers; that is not a failure to report,
            // matching the "handler failures must not affect other
            // subscribers" contract — there are simply no handlers.
            let _ = sender.send(event);
        }
    }
}
