//! Reorderings applied to a finished list. None of them drop items.

use crate::models::Recommendation;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Move low-popularity items to the front when fewer than
/// `max(1, floor(n * quota))` of them are present.
///
/// An event is popular when its interaction total exceeds `popularity_threshold`.
pub fn enforce_non_popular_quota(
    items: Vec<Recommendation>,
    totals: &HashMap<Uuid, i64>,
    popularity_threshold: i64,
    quota: f64,
) -> Vec<Recommendation> {
    if items.is_empty() {
        return items;
    }

    let is_popular = |item: &Recommendation| {
        totals.get(&item.event_id()).copied().unwrap_or(0) > popularity_threshold
    };

    let required = ((items.len() as f64 * quota).floor() as usize).max(1);
    let available = items.iter().filter(|item| !is_popular(item)).count();
    if available >= required {
        return items;
    }

    let (popular, mut out): (Vec<_>, Vec<_>) = items.into_iter().partition(|item| is_popular(item));
    out.extend(popular);
    out
}

/// Admit the first item of each new category until `min_categories`
/// distinct categories lead the list; everything else follows in order.
///
/// Uncategorized items count as one category.
pub fn enforce_category_diversity(
    items: Vec<Recommendation>,
    min_categories: usize,
) -> Vec<Recommendation> {
    let mut seen: HashSet<Option<Uuid>> = HashSet::new();
    let mut head = Vec::with_capacity(min_categories);
    let mut rest = Vec::with_capacity(items.len());

    for item in items {
        let category = item.category_id();
        if seen.len() < min_categories && !seen.contains(&category) {
            seen.insert(category);
            head.push(item);
        } else {
            rest.push(item);
        }
    }

    head.extend(rest);
    head
}

/// Cap each source at `max(1, floor(n * max_share))` items; overflow moves
/// to the tail in its original order.
///
/// Items without a source share one bucket.
pub fn enforce_source_rotation(items: Vec<Recommendation>, max_share: f64) -> Vec<Recommendation> {
    if items.is_empty() {
        return items;
    }

    let cap = ((items.len() as f64 * max_share).floor() as usize).max(1);
    let mut per_source: HashMap<Option<Uuid>, usize> = HashMap::new();
    let mut kept = Vec::with_capacity(items.len());
    let mut overflow = Vec::new();

    for item in items {
        let count = per_source.entry(item.source_id()).or_insert(0);
        if *count < cap {
            *count += 1;
            kept.push(item);
        } else {
            overflow.push(item);
        }
    }

    kept.extend(overflow);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::diversity::tests::rec;

    fn with_source(mut item: Recommendation, source: Uuid) -> Recommendation {
        item.event.source_id = Some(source);
        item
    }

    fn ids(items: &[Recommendation]) -> Vec<Uuid> {
        items.iter().map(Recommendation::event_id).collect()
    }

    #[test]
    fn test_quota_satisfied_keeps_order() {
        let items: Vec<Recommendation> = (0..5).map(|i| rec(&format!("e{}", i), None)).collect();
        let totals: HashMap<Uuid, i64> = items[..4].iter().map(|r| (r.event_id(), 50)).collect();

        let out = enforce_non_popular_quota(items.clone(), &totals, 10, 0.20);
        assert_eq!(out, items);
    }

    #[test]
    fn test_quota_promotes_low_popularity() {
        let items: Vec<Recommendation> = (0..10).map(|i| rec(&format!("e{}", i), None)).collect();
        // Only the last item is unpopular; quota needs 2.
        let totals: HashMap<Uuid, i64> = items[..9].iter().map(|r| (r.event_id(), 11)).collect();

        let out = enforce_non_popular_quota(items.clone(), &totals, 10, 0.20);
        assert_eq!(out.len(), items.len());
        assert_eq!(out[0], items[9]);
        assert_eq!(ids(&out[1..]), ids(&items[..9]));
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let items = vec![rec("a", None), rec("b", None)];
        let totals: HashMap<Uuid, i64> = items.iter().map(|r| (r.event_id(), 10)).collect();
        assert_eq!(enforce_non_popular_quota(items.clone(), &totals, 10, 0.20), items);
    }

    #[test]
    fn test_category_diversity_leads_with_new_categories() {
        let (music, theater) = (Uuid::new_v4(), Uuid::new_v4());
        let m1 = rec("m1", Some(music));
        let m2 = rec("m2", Some(music));
        let t1 = rec("t1", Some(theater));
        let m3 = rec("m3", Some(music));

        let out = enforce_category_diversity(vec![m1.clone(), m2.clone(), t1.clone(), m3.clone()], 2);
        assert_eq!(out, vec![m1, t1, m2, m3]);
    }

    #[test]
    fn test_source_rotation_demotes_overflow() {
        let (big, small) = (Uuid::new_v4(), Uuid::new_v4());
        let items: Vec<Recommendation> = vec![
            with_source(rec("b1", None), big),
            with_source(rec("b2", None), big),
            with_source(rec("b3", None), big),
            with_source(rec("s1", None), small),
        ];

        // cap = floor(4 * 0.5) = 2
        let out = enforce_source_rotation(items.clone(), 0.50);
        assert_eq!(
            ids(&out),
            vec![
                items[0].event_id(),
                items[1].event_id(),
                items[3].event_id(),
                items[2].event_id()
            ]
        );
    }

    #[test]
    fn test_empty_lists() {
        assert!(enforce_non_popular_quota(Vec::new(), &HashMap::new(), 10, 0.2).is_empty());
        assert!(enforce_category_diversity(Vec::new(), 2).is_empty());
        assert!(enforce_source_rotation(Vec::new(), 0.5).is_empty());
    }
}
