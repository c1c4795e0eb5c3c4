use crate::similarity::cosine_similarity;
use std::collections::HashSet;
use thoughtmates_core::{ContentId, ContentItem, ScoredContent};
use tracing::warn;

/// Items whose similarity to `target` is at least `threshold`, most similar
/// first. Items with a different vector length are skipped.
pub fn find_similar(target: &[f32], pool: &[ContentItem], threshold: f32) -> Vec<ScoredContent> {
    let mut scored: Vec<ScoredContent> = pool
        .iter()
        .filter_map(|item| {
            if item.vector.len() != target.len() {
                warn!(
                    "Skipping thought {}: vector length {} does not match {}",
                    item.id,
                    item.vector.len(),
                    target.len()
                );
                return None;
            }

            let similarity = cosine_similarity(target, &item.vector);
            (similarity >= threshold).then(|| ScoredContent {
                content: item.view(),
                similarity,
            })
        })
        .collect();

    sort_by_similarity(&mut scored);
    scored
}

/// Unions several result lists, keeping the first occurrence of each item,
/// then re-sorts and truncates to `limit`.
pub fn merge_similar<I>(batches: I, limit: usize) -> Vec<ScoredContent>
where
    I: IntoIterator<Item = Vec<ScoredContent>>,
{
    let mut seen: HashSet<ContentId> = HashSet::new();
    let mut merged: Vec<ScoredContent> = batches
        .into_iter()
        .flatten()
        .filter(|scored| seen.insert(scored.content.id))
        .collect();

    sort_by_similarity(&mut merged);
    merged.truncate(limit);
    merged
}

fn sort_by_similarity(items: &mut [ScoredContent]) {
    // Stable, so equal scores keep pool order
    items.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(id: ContentId, vector: Vec<f32>) -> ContentItem {
        ContentItem {
            id,
            user_id: 100 + id,
            body: format!("thought {id}"),
            vector,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let target = [1.0, 0.0, 0.0, 0.0];
        // norm is exactly 10, so similarity is exactly 0.7
        let pool = vec![item(1, vec![7.0, 1.0, 5.0, 5.0])];

        let results = find_similar(&target, &pool, 0.7);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content.id, 1);
    }

    #[test]
    fn test_just_below_threshold_is_excluded() {
        let target = [1.0, 0.0, 0.0, 0.0];
        let pool = vec![item(1, vec![6.99999, 1.0, 5.0, 5.0])];

        assert!(find_similar(&target, &pool, 0.7).is_empty());
    }

    #[test]
    fn test_results_sorted_descending() {
        let target = [1.0, 0.0];
        let pool = vec![
            item(1, vec![0.8, 0.6]),
            item(2, vec![1.0, 0.0]),
            item(3, vec![0.0, 1.0]),
            item(4, vec![0.9, 0.1]),
        ];

        let ids: Vec<ContentId> = find_similar(&target, &pool, 0.5)
            .iter()
            .map(|s| s.content.id)
            .collect();
        assert_eq!(ids, vec![2, 4, 1]);
    }

    #[test]
    fn test_mismatched_vectors_are_skipped() {
        let target = [1.0, 0.0];
        let pool = vec![item(1, vec![1.0, 0.0, 0.0]), item(2, vec![1.0, 0.0])];

        let results = find_similar(&target, &pool, 0.0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content.id, 2);
    }

    #[test]
    fn test_merge_keeps_first_occurrence_and_limit() {
        let pool = vec![item(1, vec![1.0, 0.0]), item(2, vec![0.8, 0.6])];
        let first = find_similar(&[1.0, 0.0], &pool, 0.0);
        let second = find_similar(&[0.0, 1.0], &pool, 0.0);

        let merged = merge_similar(vec![first, second], 20);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].content.id, 1);
        assert!((merged[0].similarity - 1.0).abs() < 1e-6);
        // id 2 keeps the 0.8 from the first batch, not 0.6
        assert!((merged[1].similarity - 0.8).abs() < 1e-6);

        let capped = merge_similar(vec![merged], 1);
        assert_eq!(capped.len(), 1);
    }
}
