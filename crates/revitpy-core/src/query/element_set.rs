//! Lazily evaluated, memoized element collections.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, OnceLock};

type Source<E> = Arc<dyn Fn() -> Vec<E> + Send + Sync>;

struct Inner<E> {
    source: Option<Source<E>>,
    items: OnceLock<Vec<E>>,
}

/// Result of a query.
///
/// Evaluation runs at most once, on first access (`count`, `iter`, `get`,
/// `contains`, ...), and the materialized list is kept for the lifetime of
/// the set. Clones share that cache. `filter`, `select` and `order_by_key`
/// return new deferred sets layered on this one.
pub struct ElementSet<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for ElementSet<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> ElementSet<E> {
    /// Already-materialized set.
    pub fn from_vec(items: Vec<E>) -> Self {
        Self {
            inner: Arc::new(Inner {
                source: None,
                items: OnceLock::from(items),
            }),
        }
    }

    /// Set whose contents are produced by `source` on first access.
    pub fn deferred<F>(source: F) -> Self
    where
        F: Fn() -> Vec<E> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                source: Some(Arc::new(source)),
                items: OnceLock::new(),
            }),
        }
    }

    pub fn is_evaluated(&self) -> bool {
        self.inner.items.get().is_some()
    }

    fn items(&self) -> &[E] {
        self.inner.items.get_or_init(|| {
            self.inner
                .source
                .as_ref()
                .map(|source| source())
                .unwrap_or_default()
        })
    }

    pub fn count(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.items().iter()
    }

    pub fn get(&self, index: usize) -> Option<&E> {
        self.items().get(index)
    }

    pub fn first(&self) -> Option<&E> {
        self.items().first()
    }

    pub fn contains(&self, element: &E) -> bool
    where
        E: PartialEq,
    {
        self.items().contains(element)
    }

    pub fn all<P: Fn(&E) -> bool>(&self, predicate: P) -> bool {
        self.items().iter().all(predicate)
    }

    pub fn any_where<P: Fn(&E) -> bool>(&self, predicate: P) -> bool {
        self.items().iter().any(predicate)
    }

    /// Groups in first-seen key order.
    pub fn group_by<K, F>(&self, key: F) -> Vec<(K, Vec<E>)>
    where
        K: Eq + Hash + Clone,
        F: Fn(&E) -> K,
        E: Clone,
    {
        let mut index: HashMap<K, usize> = HashMap::new();
        let mut groups: Vec<(K, Vec<E>)> = Vec::new();
        for item in self.items() {
            let k = key(item);
            let slot = *index.entry(k.clone()).or_insert_with(|| {
                groups.push((k, Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(item.clone());
        }
        groups
    }

    pub fn to_vec(&self) -> Vec<E>
    where
        E: Clone,
    {
        self.items().to_vec()
    }
}

impl<E: Clone + Send + Sync + 'static> ElementSet<E> {
    pub fn filter<P>(&self, predicate: P) -> ElementSet<E>
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        let parent = self.clone();
        ElementSet::deferred(move || parent.iter().filter(|e| predicate(e)).cloned().collect())
    }

    pub fn select<U, F>(&self, projection: F) -> ElementSet<U>
    where
        F: Fn(&E) -> U + Send + Sync + 'static,
    {
        let parent = self.clone();
        ElementSet::deferred(move || parent.iter().map(&projection).collect())
    }

    /// Stable sort by a derived key.
    pub fn order_by_key<K, F>(&self, key: F) -> ElementSet<E>
    where
        K: Ord,
        F: Fn(&E) -> K + Send + Sync + 'static,
    {
        let parent = self.clone();
        ElementSet::deferred(move || {
            let mut items = parent.to_vec();
            items.sort_by_key(|e| key(e));
            items
        })
    }
}

impl<'a, E> IntoIterator for &'a ElementSet<E> {
    type Item = &'a E;
    type IntoIter = std::slice::Iter<'a, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<E> From<Vec<E>> for ElementSet<E> {
    fn from(items: Vec<E>) -> Self {
        Self::from_vec(items)
    }
}

impl<E: fmt::Debug> fmt::Debug for ElementSet<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.items.get() {
            Some(items) => f.debug_list().entries(items).finish(),
            None => f.write_str("ElementSet(<deferred>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting(items: Vec<i32>) -> (ElementSet<i32>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let set = ElementSet::deferred(move || {
            c.fetch_add(1, Ordering::SeqCst);
            items.clone()
        });
        (set, calls)
    }

    #[test]
    fn evaluation_happens_once_on_first_access() {
        let (set, calls) = counting(vec![3, 1, 2]);
        assert!(!set.is_evaluated());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(set.count(), 3);
        assert_eq!(set.get(1), Some(&1));
        assert!(set.contains(&2));
        assert_eq!(set.iter().copied().collect::<Vec<_>>(), vec![3, 1, 2]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let clone = set.clone();
        assert_eq!(clone.count(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn derived_sets_stay_deferred() {
        let (set, calls) = counting(vec![5, 2, 8, 1]);
        let evens = set.filter(|n| n % 2 == 0);
        let doubled = evens.select(|n| n * 2);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(doubled.to_vec(), vec![4, 16]);
        assert_eq!(set.order_by_key(|n| *n).to_vec(), vec![1, 2, 5, 8]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn group_by_keeps_first_seen_order() {
        let set = ElementSet::from_vec(vec!["wall-a", "door-a", "wall-b"]);
        let groups = set.group_by(|s| s.split('-').next().unwrap_or_default().to_owned());
        assert_eq!(
            groups,
            vec![
                ("wall".to_owned(), vec!["wall-a", "wall-b"]),
                ("door".to_owned(), vec!["door-a"]),
            ]
        );
    }

    #[test]
    fn predicates_and_empty_sets() {
        let set = ElementSet::from(vec![2, 4, 6]);
        assert!(set.all(|n| n % 2 == 0));
        assert!(set.any_where(|n| *n > 5));
        assert_eq!(set.first(), Some(&2));

        let empty: ElementSet<i32> = ElementSet::deferred(Vec::new);
        assert!(empty.is_empty());
        assert_eq!(empty.first(), None);
        assert!(empty.all(|_| false));
    }
}
