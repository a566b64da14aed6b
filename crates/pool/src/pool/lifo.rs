//! LIFO storage shared by the synchronous and asynchronous pools.

/// Stack of pooled items. The most recently pushed item is handed out first.
#[derive(Debug)]
pub(crate) struct LifoStack<T> {
    items: Vec<T>,
}

impl<T> LifoStack<T> {
    pub(crate) fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub(crate) fn pop(&mut self) -> Option<T> {
        self.items.pop()
    }

    /// Remove and return everything, most recent first.
    pub(crate) fn drain(&mut self) -> Vec<T> {
        let mut items = std::mem::take(&mut self.items);
        items.reverse();
        items
    }

    /// Pop up to `n` items, most recent first.
    pub(crate) fn pop_many(&mut self, n: usize) -> Vec<T> {
        let keep = self.items.len().saturating_sub(n);
        let mut popped = self.items.split_off(keep);
        popped.reverse();
        popped
    }
}

impl<T: PartialEq> LifoStack<T> {
    pub(crate) fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }
}

impl<T> Default for LifoStack<T> {
    fn default() -> Self {
        Self::new()
    }
}
