//! Persistence seams. The SQLite implementation lives in the `database`
//! crate; the engine and service only see these traits.

use crate::{
    AffinityRecord, Comment, CommentId, ContentId, ContentItem, ContentSnapshot, Conversation,
    ConversationId, ConversationSummary, CoreError, DeleteOutcome, Message, User, UserId, Vector,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(
        &self,
        username: &str,
        avatar_url: Option<&str>,
        bio: &str,
    ) -> Result<User, CoreError>;

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>, CoreError>;

    async fn update_bio(&self, user_id: UserId, bio: &str) -> Result<bool, CoreError>;

    /// Every user, oldest account first.
    async fn all_users(&self) -> Result<Vec<User>, CoreError>;

    /// Users other than `exclude` that have at least one thought, most
    /// recently active first, bounded by `limit`.
    async fn users_with_content(
        &self,
        exclude: UserId,
        limit: usize,
    ) -> Result<Vec<UserId>, CoreError>;
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn insert_content(
        &self,
        user_id: UserId,
        body: &str,
        vector: &Vector,
        created_at: DateTime<Utc>,
    ) -> Result<ContentItem, CoreError>;

    async fn get_content(&self, content_id: ContentId) -> Result<Option<ContentItem>, CoreError>;

    /// Newest first.
    async fn user_content(&self, user_id: UserId) -> Result<Vec<ContentItem>, CoreError>;

    async fn user_content_count(&self, user_id: UserId) -> Result<u64, CoreError>;

    /// Every thought not authored by `user_id`.
    async fn content_excluding_user(&self, user_id: UserId)
        -> Result<Vec<ContentItem>, CoreError>;

    /// Owner-scoped hard delete; cascades likes, comments and saves.
    async fn delete_content(
        &self,
        content_id: ContentId,
        owner: UserId,
    ) -> Result<DeleteOutcome, CoreError>;

    /// Snapshots created at or after `since`, newest first.
    async fn snapshots_since(
        &self,
        since: DateTime<Utc>,
        viewer: Option<UserId>,
    ) -> Result<Vec<ContentSnapshot>, CoreError>;

    /// All snapshots, newest first.
    async fn all_snapshots(&self, viewer: Option<UserId>)
        -> Result<Vec<ContentSnapshot>, CoreError>;

    async fn following_snapshots(&self, user_id: UserId)
        -> Result<Vec<ContentSnapshot>, CoreError>;

    async fn saved_snapshots(&self, user_id: UserId) -> Result<Vec<ContentSnapshot>, CoreError>;

    /// Insert-or-ignore; returns whether a new like was recorded.
    async fn like(&self, content_id: ContentId, user_id: UserId) -> Result<bool, CoreError>;

    async fn unlike(&self, content_id: ContentId, user_id: UserId) -> Result<bool, CoreError>;

    async fn like_count(&self, content_id: ContentId) -> Result<u64, CoreError>;

    /// Users who liked the thought, earliest like first.
    async fn likers(&self, content_id: ContentId) -> Result<Vec<User>, CoreError>;

    /// Insert-or-ignore; returns whether a new save was recorded.
    async fn save(&self, user_id: UserId, content_id: ContentId) -> Result<bool, CoreError>;

    async fn unsave(&self, user_id: UserId, content_id: ContentId) -> Result<bool, CoreError>;

    async fn add_comment(
        &self,
        content_id: ContentId,
        user_id: UserId,
        body: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Comment, CoreError>;

    async fn get_comment(&self, comment_id: CommentId) -> Result<Option<Comment>, CoreError>;

    /// Oldest first.
    async fn comments(&self, content_id: ContentId) -> Result<Vec<Comment>, CoreError>;

    async fn delete_comment(
        &self,
        comment_id: CommentId,
        owner: UserId,
    ) -> Result<DeleteOutcome, CoreError>;
}

#[async_trait]
pub trait SocialStore: Send + Sync {
    /// Insert-or-ignore; returns whether a new edge was created.
    async fn follow(&self, follower: UserId, following: UserId) -> Result<bool, CoreError>;

    async fn unfollow(&self, follower: UserId, following: UserId) -> Result<bool, CoreError>;

    async fn is_following(&self, follower: UserId, following: UserId) -> Result<bool, CoreError>;

    async fn followers(&self, user_id: UserId) -> Result<Vec<User>, CoreError>;

    async fn following(&self, user_id: UserId) -> Result<Vec<User>, CoreError>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Create-or-get; the pair is order-insensitive.
    async fn conversation_between(&self, a: UserId, b: UserId) -> Result<Conversation, CoreError>;

    async fn get_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<Conversation>, CoreError>;

    async fn user_conversations(&self, user_id: UserId)
        -> Result<Vec<ConversationSummary>, CoreError>;

    async fn insert_message(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        body: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Message, CoreError>;

    /// Oldest first; marks messages not sent by `reader` as read.
    async fn conversation_messages(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
    ) -> Result<Vec<Message>, CoreError>;

    async fn unread_count(&self, user_id: UserId) -> Result<u64, CoreError>;

    async fn delete_conversation(&self, conversation_id: ConversationId)
        -> Result<bool, CoreError>;
}

#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Last-write-wins on `(user_id, other_user_id)`.
    async fn upsert(
        &self,
        user_id: UserId,
        other_user_id: UserId,
        score: f32,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError>;

    /// Writes `(a, b)` and `(b, a)` with the same score in one transaction.
    async fn upsert_symmetric(
        &self,
        a: UserId,
        b: UserId,
        score: f32,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError>;

    /// Removes both directions; returns the number of rows deleted.
    async fn remove_symmetric(&self, a: UserId, b: UserId) -> Result<u64, CoreError>;

    async fn get_match(
        &self,
        user_id: UserId,
        other_user_id: UserId,
    ) -> Result<Option<AffinityRecord>, CoreError>;

    /// Score descending, then most recently updated, then other user id.
    async fn top_matches(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<AffinityRecord>, CoreError>;
}

/// Everything the service layer needs besides matches.
pub trait ThoughtStore: UserStore + ContentStore + SocialStore + MessageStore {}

impl<T> ThoughtStore for T where T: UserStore + ContentStore + SocialStore + MessageStore {}
