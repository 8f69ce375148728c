//! Lazy inclusive integer ranges produced by the `..` operator.

use std::fmt;

/// An inclusive range of 64-bit integers, ascending or descending.
///
/// `1..4` iterates `1, 2, 3, 4`; `4..1` iterates `4, 3, 2, 1`. The range is
/// a value: iterating does not consume it, and a fresh iterator starts from
/// the beginning every time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct IntRange {
    from: i64,
    to: i64,
}

impl IntRange {
    /// Creates an inclusive range between two bounds.
    #[must_use]
    pub fn new(from: i64, to: i64) -> Self {
        Self { from, to }
    }

    /// The first value produced.
    #[must_use]
    pub fn from(&self) -> i64 {
        self.from
    }

    /// The last value produced.
    #[must_use]
    pub fn to(&self) -> i64 {
        self.to
    }

    /// Number of values in the range (always at least 1).
    #[must_use]
    pub fn len(&self) -> u64 {
        self.from.abs_diff(self.to) + 1
    }

    /// Ranges are inclusive, so they are never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Membership test without iteration.
    #[must_use]
    pub fn contains(&self, value: i64) -> bool {
        if self.from <= self.to {
            (self.from..=self.to).contains(&value)
        } else {
            (self.to..=self.from).contains(&value)
        }
    }

    /// Starts a fresh iteration from the first bound.
    #[must_use]
    pub fn iter(&self) -> IntRangeIter {
        IntRangeIter {
            range: *self,
            next: Some(self.from),
        }
    }
}

impl fmt::Display for IntRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.from, self.to)
    }
}

/// Iterator state for one pass over an [`IntRange`].
#[derive(Debug, Clone)]
pub struct IntRangeIter {
    range: IntRange,
    next: Option<i64>,
}

impl Iterator for IntRangeIter {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        let current = self.next?;
        self.next = if current == self.range.to {
            None
        } else if self.range.from <= self.range.to {
            current.checked_add(1)
        } else {
            current.checked_sub(1)
        };
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.next {
            None => (0, Some(0)),
            Some(next) => {
                let remaining = usize::try_from(next.abs_diff(self.range.to) + 1).ok();
                (remaining.unwrap_or(usize::MAX), remaining)
            }
        }
    }
}

impl IntoIterator for &IntRange {
    type Item = i64;
    type IntoIter = IntRangeIter;

    fn into_iter(self) -> IntRangeIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascending_iteration() {
        let r = IntRange::new(1, 4);
        assert_eq!(r.iter().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(r.len(), 4);
    }

    #[test]
    fn descending_iteration() {
        let r = IntRange::new(3, 0);
        assert_eq!(r.iter().collect::<Vec<_>>(), vec![3, 2, 1, 0]);
    }

    #[test]
    fn restartable() {
        let r = IntRange::new(5, 7);
        let first: Vec<_> = r.iter().collect();
        let second: Vec<_> = r.iter().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn contains_either_direction() {
        assert!(IntRange::new(1, 10).contains(10));
        assert!(IntRange::new(10, 1).contains(10));
        assert!(!IntRange::new(1, 10).contains(0));
    }
}
