use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type ContentId = i64;
pub type CommentId = i64;
pub type ConversationId = i64;
pub type MessageId = i64;

/// Embedding produced by the provider. Length is fixed per deployment.
pub type Vector = Vec<f32>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub avatar_url: Option<String>,
    pub bio: String,
    pub created_at: DateTime<Utc>,
}

/// Stored thought, including its vector. Never leaves the service layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentItem {
    pub id: ContentId,
    pub user_id: UserId,
    pub body: String,
    pub vector: Vector,
    pub created_at: DateTime<Utc>,
}

impl ContentItem {
    pub fn view(&self) -> ContentView {
        ContentView {
            id: self.id,
            user_id: self.user_id,
            body: self.body.clone(),
            created_at: self.created_at,
        }
    }
}

/// Thought as returned to callers: no vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentView {
    pub id: ContentId,
    pub user_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerFlags {
    pub is_liked: bool,
    pub is_saved: bool,
}

/// Content joined with its engagement counters, as read for feeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSnapshot {
    pub content: ContentView,
    pub username: String,
    pub like_count: u64,
    pub comment_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer: Option<ViewerFlags>,
}

impl ContentSnapshot {
    /// `likes + 2 x comments`
    pub fn engagement_score(&self) -> u64 {
        self.like_count + 2 * self.comment_count
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedContent {
    #[serde(flatten)]
    pub snapshot: ContentSnapshot,
    pub engagement_score: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredContent {
    pub content: ContentView,
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    #[serde(flatten)]
    pub snapshot: ContentSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

/// Directional match row. Both directions are written with the same score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffinityRecord {
    pub user_id: UserId,
    pub other_user_id: UserId,
    pub score: f32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thoughtmate {
    pub user: User,
    pub score: f32,
    pub is_following: bool,
    pub thoughts_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub content_id: ContentId,
    pub user_id: UserId,
    pub username: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub user1_id: UserId,
    pub user2_id: UserId,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.user1_id == user_id || self.user2_id == user_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub other_user_id: UserId,
    pub other_username: String,
    pub last_message: Option<String>,
    pub unread_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Outcome of an owner-scoped delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    NotOwner,
}

/// Events fanned out to connected observers. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastEvent {
    ContentCreated {
        content: ContentView,
    },
    ContentDeleted {
        content_id: ContentId,
    },
    ContentLiked {
        content_id: ContentId,
        user_id: UserId,
        like_count: u64,
    },
    ContentUnliked {
        content_id: ContentId,
        user_id: UserId,
        like_count: u64,
    },
    CommentPosted {
        content_id: ContentId,
        comment: Comment,
    },
    CommentDeleted {
        content_id: ContentId,
        comment_id: CommentId,
    },
    MessageSent {
        conversation_id: ConversationId,
        message: Message,
    },
    ConversationDeleted {
        conversation_id: ConversationId,
    },
    MatchesUpdated {
        user_id: UserId,
        stored: usize,
    },
}

impl BroadcastEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BroadcastEvent::ContentCreated { .. } => "content_created",
            BroadcastEvent::ContentDeleted { .. } => "content_deleted",
            BroadcastEvent::ContentLiked { .. } => "content_liked",
            BroadcastEvent::ContentUnliked { .. } => "content_unliked",
            BroadcastEvent::CommentPosted { .. } => "comment_posted",
            BroadcastEvent::CommentDeleted { .. } => "comment_deleted",
            BroadcastEvent::MessageSent { .. } => "message_sent",
            BroadcastEvent::ConversationDeleted { .. } => "conversation_deleted",
            BroadcastEvent::MatchesUpdated { .. } => "matches_updated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engagement_score_weights_comments_double() {
        let snapshot = ContentSnapshot {
            content: ContentView {
                id: 1,
                user_id: 1,
                body: "rust".to_string(),
                created_at: Utc::now(),
            },
            username: "ada".to_string(),
            like_count: 1,
            comment_count: 3,
            viewer: None,
        };
        assert_eq!(snapshot.engagement_score(), 7);
    }

    #[test]
    fn test_content_view_drops_vector() {
        let item = ContentItem {
            id: 9,
            user_id: 2,
            body: "hello".to_string(),
            vector: vec![0.1, 0.2],
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(item.view()).unwrap();
        assert!(json.get("vector").is_none());
        assert_eq!(json["id"], 9);
    }

    #[test]
    fn test_broadcast_event_is_tagged() {
        let event = BroadcastEvent::ContentDeleted { content_id: 4 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "content_deleted");
        assert_eq!(json["content_id"], 4);
        assert_eq!(event.name(), "content_deleted");
    }
}
