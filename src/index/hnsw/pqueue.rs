use std::cmp::Ordering;

/// Heap entry ordered by score, then by item in reverse so that among equal
/// scores the smaller item ranks higher.
#[derive(Debug, Clone, Copy)]
pub struct ScoredItem<T> {
    pub score: f32,
    pub item: T,
}

impl<T: Ord> PartialEq for ScoredItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: Ord> Eq for ScoredItem<T> {}

impl<T: Ord> PartialOrd for ScoredItem<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Ord> Ord for ScoredItem<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.item.cmp(&self.item))
    }
}
