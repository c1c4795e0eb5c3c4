//! Query surface and write paths consumed by the transport layer.
//!
//! Every mutation validates its input, then checks that referenced entities
//! exist, then checks ownership. Events are published after the write
//! succeeds; publishing never fails the operation.

use crate::broadcaster::{EventBroadcaster, Subscription};
use crate::metrics::MatchingStats;
use crate::trending::TrendingRanker;
use crate::worker::RecomputeQueue;
use chrono::Utc;
use embedding_engine::{
    cosine_similarity, find_similar, merge_similar, CircuitBreakerState, EmbeddingEngine,
    RetryMetrics,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thoughtmates_core::{
    BroadcastEvent, Comment, CommentId, ContentId, ContentSnapshot, ContentView, Conversation,
    ConversationId, ConversationSummary, CoreError, DeleteOutcome, FeedConfig, FeedItem,
    MatchStore, Message, RankedContent, ScoredContent, ThoughtStore, Thoughtmate, User, UserId,
    Vector,
};
use tracing::{debug, info};

/// Counters for the matching workers and the embedding provider.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub matching: MatchingStats,
    pub embedding: RetryMetrics,
    pub embedding_circuit: CircuitBreakerState,
}

pub struct ThoughtService {
    store: Arc<dyn ThoughtStore>,
    matches: Arc<dyn MatchStore>,
    trending: TrendingRanker,
    embeddings: Arc<EmbeddingEngine>,
    recompute: RecomputeQueue,
    broadcaster: EventBroadcaster,
    feed: FeedConfig,
}

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str, CoreError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CoreError::invalid_input(format!("{field} is required")));
    }
    Ok(trimmed)
}

impl ThoughtService {
    pub fn new(
        store: Arc<dyn ThoughtStore>,
        matches: Arc<dyn MatchStore>,
        trending: TrendingRanker,
        embeddings: Arc<EmbeddingEngine>,
        recompute: RecomputeQueue,
        broadcaster: EventBroadcaster,
        feed: FeedConfig,
    ) -> Self {
        Self {
            store,
            matches,
            trending,
            embeddings,
            recompute,
            broadcaster,
            feed,
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.broadcaster.subscribe()
    }

    pub async fn matching_stats(&self) -> MatchingStats {
        self.recompute.metrics().get_stats().await
    }

    pub async fn stats(&self) -> ServiceStats {
        ServiceStats {
            matching: self.matching_stats().await,
            embedding: self.embeddings.retry_metrics(),
            embedding_circuit: self.embeddings.circuit_state(),
        }
    }

    async fn require_user(&self, user_id: UserId) -> Result<User, CoreError> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("user {user_id}")))
    }

    async fn require_content(&self, content_id: ContentId) -> Result<ContentView, CoreError> {
        self.store
            .get_content(content_id)
            .await?
            .map(|item| item.view())
            .ok_or_else(|| CoreError::not_found(format!("thought {content_id}")))
    }

    async fn require_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        operation: &str,
    ) -> Result<Conversation, CoreError> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("conversation {conversation_id}")))?;
        if !conversation.has_participant(user_id) {
            return Err(CoreError::permission_denied(format!(
                "{operation} conversation {conversation_id}"
            )));
        }
        Ok(conversation)
    }

    // Users

    pub async fn register_user(
        &self,
        username: &str,
        avatar_url: Option<&str>,
        bio: &str,
    ) -> Result<User, CoreError> {
        let username = required(username, "username")?;
        let user = self.store.create_user(username, avatar_url, bio.trim()).await?;
        info!("Registered user {} ({})", user.id, user.username);
        Ok(user)
    }

    pub async fn user(&self, user_id: UserId) -> Result<User, CoreError> {
        self.require_user(user_id).await
    }

    pub async fn users(&self) -> Result<Vec<User>, CoreError> {
        self.store.all_users().await
    }

    pub async fn update_bio(&self, user_id: UserId, bio: &str) -> Result<User, CoreError> {
        self.require_user(user_id).await?;
        self.store.update_bio(user_id, bio.trim()).await?;
        self.require_user(user_id).await
    }

    // Thoughts

    /// Embeds and stores a thought, then queues the author's recomputation.
    ///
    /// An embedding failure fails the post and nothing is stored. Matching
    /// runs later on the worker pool and cannot fail the post.
    pub async fn create_thought(
        &self,
        user_id: UserId,
        body: &str,
    ) -> Result<ContentView, CoreError> {
        let body = required(body, "thought body")?;
        self.require_user(user_id).await?;

        let vector = self.embeddings.generate_embedding(body).await?;
        let item = self
            .store
            .insert_content(user_id, body, &vector, Utc::now())
            .await?;

        let outcome = self.recompute.enqueue(user_id).await;
        debug!("Thought {} posted, recomputation {:?}", item.id, outcome);

        let view = item.view();
        self.broadcaster.publish(BroadcastEvent::ContentCreated {
            content: view.clone(),
        });
        Ok(view)
    }

    /// Removes the thought with its likes, comments and saves. Stored
    /// matches are left as they are.
    pub async fn delete_thought(
        &self,
        content_id: ContentId,
        actor: UserId,
    ) -> Result<(), CoreError> {
        match self.store.delete_content(content_id, actor).await? {
            DeleteOutcome::Deleted => {
                self.broadcaster
                    .publish(BroadcastEvent::ContentDeleted { content_id });
                Ok(())
            }
            DeleteOutcome::NotFound => Err(CoreError::not_found(format!("thought {content_id}"))),
            DeleteOutcome::NotOwner => Err(CoreError::permission_denied(format!(
                "delete thought {content_id}"
            ))),
        }
    }

    pub async fn thought(&self, content_id: ContentId) -> Result<ContentView, CoreError> {
        self.require_content(content_id).await
    }

    pub async fn user_thoughts(&self, user_id: UserId) -> Result<Vec<ContentView>, CoreError> {
        self.require_user(user_id).await?;
        let items = self.store.user_content(user_id).await?;
        Ok(items.iter().map(|item| item.view()).collect())
    }

    /// Returns the fresh like count.
    pub async fn like(&self, content_id: ContentId, user_id: UserId) -> Result<u64, CoreError> {
        self.require_user(user_id).await?;
        self.require_content(content_id).await?;

        self.store.like(content_id, user_id).await?;
        let like_count = self.store.like_count(content_id).await?;
        self.broadcaster.publish(BroadcastEvent::ContentLiked {
            content_id,
            user_id,
            like_count,
        });
        Ok(like_count)
    }

    pub async fn unlike(&self, content_id: ContentId, user_id: UserId) -> Result<u64, CoreError> {
        self.require_user(user_id).await?;
        self.require_content(content_id).await?;

        self.store.unlike(content_id, user_id).await?;
        let like_count = self.store.like_count(content_id).await?;
        self.broadcaster.publish(BroadcastEvent::ContentUnliked {
            content_id,
            user_id,
            like_count,
        });
        Ok(like_count)
    }

    pub async fn likers(&self, content_id: ContentId) -> Result<Vec<User>, CoreError> {
        self.require_content(content_id).await?;
        self.store.likers(content_id).await
    }

    pub async fn save(&self, user_id: UserId, content_id: ContentId) -> Result<bool, CoreError> {
        self.require_user(user_id).await?;
        self.require_content(content_id).await?;
        self.store.save(user_id, content_id).await
    }

    pub async fn unsave(&self, user_id: UserId, content_id: ContentId) -> Result<bool, CoreError> {
        self.store.unsave(user_id, content_id).await
    }

    pub async fn saved_thoughts(&self, user_id: UserId) -> Result<Vec<ContentSnapshot>, CoreError> {
        self.require_user(user_id).await?;
        self.store.saved_snapshots(user_id).await
    }

    // Comments

    pub async fn comment(
        &self,
        content_id: ContentId,
        user_id: UserId,
        body: &str,
    ) -> Result<Comment, CoreError> {
        let body = required(body, "comment body")?;
        self.require_user(user_id).await?;
        self.require_content(content_id).await?;

        let comment = self
            .store
            .add_comment(content_id, user_id, body, Utc::now())
            .await?;
        self.broadcaster.publish(BroadcastEvent::CommentPosted {
            content_id,
            comment: comment.clone(),
        });
        Ok(comment)
    }

    pub async fn comments(&self, content_id: ContentId) -> Result<Vec<Comment>, CoreError> {
        self.require_content(content_id).await?;
        self.store.comments(content_id).await
    }

    pub async fn delete_comment(
        &self,
        comment_id: CommentId,
        actor: UserId,
    ) -> Result<(), CoreError> {
        let comment = self
            .store
            .get_comment(comment_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("comment {comment_id}")))?;

        match self.store.delete_comment(comment_id, actor).await? {
            DeleteOutcome::Deleted => {
                self.broadcaster.publish(BroadcastEvent::CommentDeleted {
                    content_id: comment.content_id,
                    comment_id,
                });
                Ok(())
            }
            DeleteOutcome::NotFound => Err(CoreError::not_found(format!("comment {comment_id}"))),
            DeleteOutcome::NotOwner => Err(CoreError::permission_denied(format!(
                "delete comment {comment_id}"
            ))),
        }
    }

    // Social graph

    /// Returns whether a new follow edge was created.
    pub async fn follow(&self, follower: UserId, following: UserId) -> Result<bool, CoreError> {
        if follower == following {
            return Err(CoreError::invalid_input("users cannot follow themselves"));
        }
        self.require_user(follower).await?;
        self.require_user(following).await?;
        self.store.follow(follower, following).await
    }

    pub async fn unfollow(&self, follower: UserId, following: UserId) -> Result<bool, CoreError> {
        self.store.unfollow(follower, following).await
    }

    pub async fn is_following(
        &self,
        follower: UserId,
        following: UserId,
    ) -> Result<bool, CoreError> {
        self.store.is_following(follower, following).await
    }

    pub async fn followers(&self, user_id: UserId) -> Result<Vec<User>, CoreError> {
        self.require_user(user_id).await?;
        self.store.followers(user_id).await
    }

    pub async fn following(&self, user_id: UserId) -> Result<Vec<User>, CoreError> {
        self.require_user(user_id).await?;
        self.store.following(user_id).await
    }

    pub async fn following_feed(&self, user_id: UserId) -> Result<Vec<ContentSnapshot>, CoreError> {
        self.require_user(user_id).await?;
        self.store.following_snapshots(user_id).await
    }

    // Messaging

    pub async fn open_conversation(&self, a: UserId, b: UserId) -> Result<Conversation, CoreError> {
        if a == b {
            return Err(CoreError::invalid_input(
                "a conversation needs two different users",
            ));
        }
        self.require_user(a).await?;
        self.require_user(b).await?;
        self.store.conversation_between(a, b).await
    }

    pub async fn conversations(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationSummary>, CoreError> {
        self.require_user(user_id).await?;
        self.store.user_conversations(user_id).await
    }

    pub async fn send_message(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        body: &str,
    ) -> Result<Message, CoreError> {
        let body = required(body, "message body")?;
        self.require_participant(conversation_id, sender_id, "send to")
            .await?;

        let message = self
            .store
            .insert_message(conversation_id, sender_id, body, Utc::now())
            .await?;
        self.broadcaster.publish(BroadcastEvent::MessageSent {
            conversation_id,
            message: message.clone(),
        });
        Ok(message)
    }

    /// Oldest first. Marks messages from the other participant as read.
    pub async fn conversation_messages(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
    ) -> Result<Vec<Message>, CoreError> {
        self.require_participant(conversation_id, reader, "read")
            .await?;
        self.store.conversation_messages(conversation_id, reader).await
    }

    pub async fn unread_count(&self, user_id: UserId) -> Result<u64, CoreError> {
        self.store.unread_count(user_id).await
    }

    pub async fn delete_conversation(
        &self,
        conversation_id: ConversationId,
        actor: UserId,
    ) -> Result<(), CoreError> {
        self.require_participant(conversation_id, actor, "delete")
            .await?;
        if self.store.delete_conversation(conversation_id).await? {
            self.broadcaster
                .publish(BroadcastEvent::ConversationDeleted { conversation_id });
        }
        Ok(())
    }

    // Ranked reads

    /// Top matches with profile, follow state and thought count.
    pub async fn thoughtmates(
        &self,
        user_id: UserId,
        limit: Option<usize>,
    ) -> Result<Vec<Thoughtmate>, CoreError> {
        self.require_user(user_id).await?;
        let limit = limit.unwrap_or(self.feed.thoughtmates_limit);
        let records = self.matches.top_matches(user_id, limit).await?;

        let mut thoughtmates = Vec::with_capacity(records.len());
        for record in records {
            let Some(user) = self.store.get_user(record.other_user_id).await? else {
                continue;
            };
            thoughtmates.push(Thoughtmate {
                is_following: self.store.is_following(user_id, user.id).await?,
                thoughts_count: self.store.user_content_count(user.id).await?,
                score: record.score,
                user,
            });
        }
        Ok(thoughtmates)
    }

    pub async fn trending(
        &self,
        for_user: Option<UserId>,
        window_hours: Option<u32>,
    ) -> Result<Vec<RankedContent>, CoreError> {
        let window_hours = window_hours.unwrap_or(self.feed.trending_window_hours);
        self.trending.trending(for_user, window_hours).await
    }

    /// Other users' thoughts close to any of `user_id`'s own thoughts.
    pub async fn similar_thoughts(
        &self,
        user_id: UserId,
        threshold: Option<f32>,
    ) -> Result<Vec<ScoredContent>, CoreError> {
        let threshold = threshold.unwrap_or(self.feed.similar_threshold);
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(CoreError::invalid_input(format!(
                "threshold {threshold} is outside [-1, 1]"
            )));
        }
        self.require_user(user_id).await?;

        let own = self.store.user_content(user_id).await?;
        if own.is_empty() {
            return Ok(Vec::new());
        }
        let pool = self.store.content_excluding_user(user_id).await?;

        let batches = own
            .iter()
            .map(|item| find_similar(&item.vector, &pool, threshold));
        Ok(merge_similar(batches, self.feed.similar_limit))
    }

    /// Every thought, newest first. With a viewer, items carry the viewer's
    /// like/save flags and, for other users' thoughts, the best similarity
    /// against the viewer's own thoughts.
    pub async fn feed(&self, viewer: Option<UserId>) -> Result<Vec<FeedItem>, CoreError> {
        let snapshots = self.store.all_snapshots(viewer).await?;

        let Some(viewer_id) = viewer else {
            return Ok(snapshots
                .into_iter()
                .map(|snapshot| FeedItem {
                    snapshot,
                    similarity: None,
                })
                .collect());
        };

        let own: Vec<Vector> = self
            .store
            .user_content(viewer_id)
            .await?
            .into_iter()
            .map(|item| item.vector)
            .collect();
        let others: HashMap<ContentId, Vector> = if own.is_empty() {
            HashMap::new()
        } else {
            self.store
                .content_excluding_user(viewer_id)
                .await?
                .into_iter()
                .map(|item| (item.id, item.vector))
                .collect()
        };

        Ok(snapshots
            .into_iter()
            .map(|snapshot| {
                let similarity = others
                    .get(&snapshot.content.id)
                    .and_then(|vector| best_similarity(vector, &own));
                FeedItem {
                    snapshot,
                    similarity,
                }
            })
            .collect())
    }
}

fn best_similarity(vector: &[f32], own: &[Vector]) -> Option<f32> {
    own.iter()
        .filter(|mine| mine.len() == vector.len())
        .map(|mine| cosine_similarity(vector, mine))
        .max_by(|a, b| a.total_cmp(b))
}
