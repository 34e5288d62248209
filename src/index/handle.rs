use std::sync::Arc;

use parking_lot::RwLock;

use super::Index;

/// Shared pointer to the live index.
///
/// Queries clone the inner `Arc` and search without holding the lock, so a
/// swap never waits on a search and in-flight searches keep the index they
/// started with.
#[derive(Debug, Default)]
pub struct IndexHandle {
    current: RwLock<Option<Arc<Index>>>,
}

impl IndexHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(index: Index) -> Self {
        Self {
            current: RwLock::new(Some(Arc::new(index))),
        }
    }

    pub fn current(&self) -> Option<Arc<Index>> {
        self.current.read().clone()
    }

    /// Replace the live index, returning the previous one.
    pub fn swap(&self, index: Arc<Index>) -> Option<Arc<Index>> {
        self.current.write().replace(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tests::{chunk, spec};
    use crate::index::{IndexBackend, VectorMatrix};

    fn index(text: &str) -> Index {
        let vectors = VectorMatrix::from_flat(2, vec![1.0, 0.0]).unwrap();
        Index::build(&spec(IndexBackend::Exact), vec![chunk("a.md", text)], vectors).unwrap()
    }

    #[test]
    fn test_swap_keeps_old_readers_valid() {
        let handle = IndexHandle::new();
        assert!(handle.current().is_none());

        handle.swap(Arc::new(index("first")));
        let reader = handle.current().unwrap();

        let previous = handle.swap(Arc::new(index("second"))).unwrap();
        assert!(Arc::ptr_eq(&previous, &reader));
        assert_eq!(reader.chunks()[0].text, "first");
        assert_eq!(handle.current().unwrap().chunks()[0].text, "second");
    }
}
