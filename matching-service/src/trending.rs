use chrono::{DateTime, Duration, Utc};
use std::cmp::Reverse;
use std::sync::Arc;
use thoughtmates_core::{ContentSnapshot, ContentStore, CoreError, RankedContent, UserId};

/// Engagement score descending, then newest first, capped at `page_size`.
pub fn rank_trending(snapshots: Vec<ContentSnapshot>, page_size: usize) -> Vec<RankedContent> {
    let mut ranked: Vec<RankedContent> = snapshots
        .into_iter()
        .map(|snapshot| RankedContent {
            engagement_score: snapshot.engagement_score(),
            snapshot,
        })
        .collect();

    ranked.sort_by_key(|r| {
        (
            Reverse(r.engagement_score),
            Reverse(r.snapshot.content.created_at),
            Reverse(r.snapshot.content.id),
        )
    });
    ranked.truncate(page_size);
    ranked
}

/// Start of a window ending at `now`. Windows reaching before the earliest
/// representable time are rejected.
pub fn window_start(now: DateTime<Utc>, window_hours: u32) -> Result<DateTime<Utc>, CoreError> {
    if window_hours == 0 {
        return Err(CoreError::invalid_input("window_hours must be positive"));
    }
    now.checked_sub_signed(Duration::hours(i64::from(window_hours)))
        .ok_or_else(|| {
            CoreError::invalid_input(format!("window of {window_hours} hours is out of range"))
        })
}

pub struct TrendingRanker {
    store: Arc<dyn ContentStore>,
    page_size: usize,
}

impl TrendingRanker {
    pub fn new(store: Arc<dyn ContentStore>, page_size: usize) -> Self {
        Self { store, page_size }
    }

    /// Content from the last `window_hours`. With `for_user` set each item
    /// carries that user's like/save flags.
    pub async fn trending(
        &self,
        for_user: Option<UserId>,
        window_hours: u32,
    ) -> Result<Vec<RankedContent>, CoreError> {
        let since = window_start(Utc::now(), window_hours)?;
        let snapshots = self.store.snapshots_since(since, for_user).await?;
        Ok(rank_trending(snapshots, self.page_size))
    }
}
