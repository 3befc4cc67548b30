use crate::models::Recommendation;
use std::collections::HashMap;
use uuid::Uuid;

/// Output of a category-capped rerank.
///
/// `admitted` never holds more than the cap per category and never more than
/// the requested limit. Everything else is kept, in order, in `overflow`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diversified {
    pub admitted: Vec<Recommendation>,
    pub overflow: Vec<Recommendation>,
}

/// Diversity Layer - caps how many items of one category a list may show.
///
/// Items without a category share a single bucket.
#[derive(Debug, Clone, Copy)]
pub struct DiversityLayer {
    max_per_category: usize,
}

impl DiversityLayer {
    pub fn new(max_per_category: usize) -> Self {
        Self {
            max_per_category: max_per_category.max(1),
        }
    }

    /// Walk `items` in rank order, admitting an item while its category is
    /// under the cap and `limit` is not reached; demote the rest.
    pub fn rerank(&self, items: Vec<Recommendation>, limit: usize) -> Diversified {
        let mut admitted_per_category: HashMap<Option<Uuid>, usize> = HashMap::new();
        let mut result = Diversified::default();

        for item in items {
            let count = admitted_per_category.entry(item.category_id()).or_insert(0);
            if result.admitted.len() < limit && *count < self.max_per_category {
                *count += 1;
                result.admitted.push(item);
            } else {
                result.overflow.push(item);
            }
        }

        result
    }

    /// Convenience for callers that only want the capped top of the list.
    pub fn top(&self, items: Vec<Recommendation>, limit: usize) -> Vec<Recommendation> {
        self.rerank(items, limit).admitted
    }
}

impl Default for DiversityLayer {
    fn default() -> Self {
        Self::new(3)
    }
}
