/// Fixed-size batches over a slice, numbered from zero.
///
/// Batch boundaries depend only on the slice and the size, so a run that
/// stopped after batch `n` can pick up with `starting_at(n + 1)` and see
/// exactly the batches it has not committed yet.
#[derive(Debug, Clone)]
pub struct Batches<'a, T> {
    items: &'a [T],
    size: usize,
    next: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Batch<'a, T> {
    pub index: usize,
    /// Position of the first item within the full slice
    pub offset: usize,
    pub items: &'a [T],
}

impl<'a, T> Batches<'a, T> {
    /// A zero size is treated as one.
    pub fn new(items: &'a [T], size: usize) -> Self {
        Self {
            items,
            size: size.max(1),
            next: 0,
        }
    }

    /// Skip the first `index` batches.
    pub fn starting_at(mut self, index: usize) -> Self {
        self.next = index.min(self.total());
        self
    }

    /// Number of batches in the whole sequence, including skipped ones.
    pub fn total(&self) -> usize {
        self.items.len().div_ceil(self.size)
    }

    pub fn remaining(&self) -> usize {
        self.total() - self.next
    }
}

impl<'a, T> Iterator for Batches<'a, T> {
    type Item = Batch<'a, T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total() {
            return None;
        }
        let index = self.next;
        let offset = index * self.size;
        let end = (offset + self.size).min(self.items.len());
        self.next += 1;
        Some(Batch {
            index,
            offset,
            items: &self.items[offset..end],
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining();
        (n, Some(n))
    }
}

impl<T> ExactSizeIterator for Batches<'_, T> {}
