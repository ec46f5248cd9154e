//! Identifier sources and chunking

use std::num::NonZeroUsize;

use crate::models::Identifier;

/// Half-open range of identifiers, consumed once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdRange {
    next: Identifier,
    end: Identifier,
}

impl IdRange {
    /// `[start, end)`
    pub fn new(start: Identifier, end: Identifier) -> Self {
        Self { next: start, end }
    }

    /// `[start, end]`
    pub fn inclusive(start: Identifier, end: Identifier) -> Self {
        Self::new(start, end.saturating_add(1))
    }

    /// Split into chunks of `size`; the last one may be shorter
    pub fn chunks(self, size: NonZeroUsize) -> Chunks<Self> {
        chunked(self, size)
    }
}

impl Iterator for IdRange {
    type Item = Identifier;

    fn next(&mut self) -> Option<Identifier> {
        if self.next >= self.end {
            return None;
        }
        let id = self.next;
        self.next += 1;
        Some(id)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.end.saturating_sub(self.next)).unwrap_or(0);
        (remaining, Some(remaining))
    }
}

/// Lazily groups any identifier sequence into fixed-size chunks
#[derive(Debug)]
pub struct Chunks<I> {
    inner: I,
    size: NonZeroUsize,
}

pub fn chunked<I>(ids: I, size: NonZeroUsize) -> Chunks<I::IntoIter>
where
    I: IntoIterator<Item = Identifier>,
{
    Chunks {
        inner: ids.into_iter(),
        size,
    }
}

impl<I> Iterator for Chunks<I>
where
    I: Iterator<Item = Identifier>,
{
    type Item = Vec<Identifier>;

    fn next(&mut self) -> Option<Vec<Identifier>> {
        let chunk: Vec<Identifier> = self.inner.by_ref().take(self.size.get()).collect();
        (!chunk.is_empty()).then_some(chunk)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn cap(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn test_range_is_half_open() {
        let ids: Vec<_> = IdRange::new(1, 4).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(IdRange::new(1, 100).count(), 99);
    }

    #[test]
    fn test_inclusive_range() {
        let ids: Vec<_> = IdRange::inclusive(1, 5).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_empty_and_inverted_ranges() {
        assert_eq!(IdRange::new(5, 5).count(), 0);
        assert_eq!(IdRange::new(9, 2).count(), 0);
        assert_eq!(IdRange::new(9, 2).size_hint(), (0, Some(0)));
    }

    #[test]
    fn test_chunks_with_short_tail() {
        let chunks: Vec<_> = IdRange::inclusive(1, 5).chunks(cap(2)).collect();
        assert_eq!(chunks, vec![vec![1, 2], vec![3, 4], vec![5]]);
    }

    #[test]
    fn test_chunks_preserve_source_order() {
        let chunks: Vec<_> = chunked(vec![7, 3, 9, 1], cap(3)).collect();
        assert_eq!(chunks, vec![vec![7, 3, 9], vec![1]]);
    }

    #[test]
    fn test_chunks_are_lazy() {
        let mut chunks = chunked(1.., cap(4));
        assert_eq!(chunks.next(), Some(vec![1, 2, 3, 4]));
        assert_eq!(chunks.next(), Some(vec![5, 6, 7, 8]));
    }
}
