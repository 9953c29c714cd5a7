use std::sync::{Mutex, MutexGuard, PoisonError};

/// Values that can be stored in a [`SortedUniqueList`].
pub trait Item: Clone + Send {
    fn equals(&self, other: &Self) -> bool;
}

/// Returns true when `a` should be placed before `b`.
pub type CompareFn<T> = Box<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// A mutex-guarded list kept in comparator order.
///
/// Uniqueness is only checked against the neighbours of the insertion point,
/// so the comparator must place equal items next to each other. Without a
/// comparator items keep insertion order and only the tail is checked.
pub struct SortedUniqueList<T: Item> {
    items: Mutex<Vec<T>>,
    compare: Option<CompareFn<T>>,
}

impl<T: Item> SortedUniqueList<T> {
    pub fn new(compare: Option<CompareFn<T>>) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            compare,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts `item` unless a neighbour at the insertion point equals it.
    /// Returns whether the item was inserted.
    pub fn add(&self, item: T) -> bool {
        let mut items = self.lock();

        let idx = match &self.compare {
            Some(compare) => items
                .iter()
                .position(|existing| compare(&item, existing))
                .unwrap_or(items.len()),
            None => items.len(),
        };

        let prev_equal = idx > 0 && item.equals(&items[idx - 1]);
        let next_equal = items.get(idx).is_some_and(|next| item.equals(next));
        if prev_equal || next_equal {
            return false;
        }

        items.insert(idx, item);
        true
    }

    /// Removes the first item equal to `item`. Returns whether one was found.
    pub fn delete(&self, item: &T) -> bool {
        let mut items = self.lock();
        match items.iter().position(|existing| existing.equals(item)) {
            Some(idx) => {
                items.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn first(&self) -> Option<T> {
        self.lock().first().cloned()
    }

    /// Visits items front to back while holding the list lock. `f` must not
    /// call back into this list.
    pub fn for_each<F: FnMut(&T)>(&self, mut f: F) {
        for item in self.lock().iter() {
            f(item);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Read-only access to a [`SortedUniqueList`].
pub struct ListView<'a, T: Item> {
    list: &'a SortedUniqueList<T>,
}

impl<'a, T: Item> ListView<'a, T> {
    pub fn new(list: &'a SortedUniqueList<T>) -> Self {
        Self { list }
    }

    pub fn first(&self) -> Option<T> {
        self.list.first()
    }

    pub fn for_each<F: FnMut(&T)>(&self, f: F) {
        self.list.for_each(f)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}
