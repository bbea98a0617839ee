//! Incremental Fibonacci computation.
//!
//! The engine never re-derives values below the cached frontier. Given a
//! frontier snapshot (the highest contiguously cached index and its two
//! anchor values) it extends the sequence linearly up to the requested
//! index, so the cost of a request is proportional to the gap between the
//! frontier and the target, not to the target itself.

use std::collections::BTreeMap;

use thiserror::Error;

/// Largest index whose value fits in a `u64`.
///
/// `fib(94)` exceeds `u64::MAX`; requests past this point are rejected
/// rather than silently wrapped.
pub const MAX_SUPPORTED_INDEX: u64 = 93;

/// Errors that can occur while extending the sequence.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FibError {
    #[error("Index {0} exceeds the largest representable index {max}", max = MAX_SUPPORTED_INDEX)]
    IndexOutOfRange(u64),

    #[error("Value overflow while computing index {0}")]
    Overflow(u64),
}

/// Snapshot of the computation frontier.
///
/// `curr` is the value at `max_index`, `prev` the value at `max_index - 1`.
/// The pair is everything the recurrence needs to continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frontier {
    pub max_index: u64,
    pub curr: u64,
    pub prev: u64,
}

impl Frontier {
    /// Base-case frontier used when no values have been cached yet.
    pub const SEED: Frontier = Frontier {
        max_index: 1,
        curr: 1,
        prev: 0,
    };
}

/// Computes every missing value between the frontier and `n` inclusive.
///
/// Returns an empty map when `n` does not extend past the frontier.
/// Addition is checked; an inconsistent frontier that would overflow a
/// `u64` produces `FibError::Overflow` instead of a wrapped value.
pub fn extend(frontier: Frontier, n: u64) -> Result<BTreeMap<u64, u64>, FibError> {
    if n > MAX_SUPPORTED_INDEX {
        return Err(FibError::IndexOutOfRange(n));
    }

    let mut values = BTreeMap::new();
    if n <= frontier.max_index {
        return Ok(values);
    }

    let mut prev = frontier.prev;
    let mut curr = frontier.curr;

    for i in frontier.max_index + 1..=n {
        let next = prev.checked_add(curr).ok_or(FibError::Overflow(i))?;
        prev = curr;
        curr = next;
        values.insert(i, curr);
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_base(n: u64) -> u64 {
        if n == 0 {
            return 0;
        }
        let (mut prev, mut curr) = (0u64, 1u64);
        for _ in 1..n {
            let next = prev + curr;
            prev = curr;
            curr = next;
        }
        curr
    }

    #[test]
    fn test_extend_from_seed_to_five() {
        let values = extend(Frontier::SEED, 5).expect("extension should succeed");

        let expected: BTreeMap<u64, u64> = [(2, 1), (3, 2), (4, 3), (5, 5)].into_iter().collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn test_extend_noop_when_frontier_covers_target() {
        assert!(extend(Frontier::SEED, 0).expect("should succeed").is_empty());
        assert!(extend(Frontier::SEED, 1).expect("should succeed").is_empty());

        let frontier = Frontier {
            max_index: 10,
            curr: 55,
            prev: 34,
        };
        assert!(extend(frontier, 7).expect("should succeed").is_empty());
    }

    #[test]
    fn test_extend_agrees_with_base_case() {
        // Any valid intermediate frontier must produce the same tail as
        // computing from scratch.
        let frontier = Frontier {
            max_index: 20,
            curr: from_base(20),
            prev: from_base(19),
        };

        let values = extend(frontier, 30).expect("extension should succeed");
        assert_eq!(values.len(), 10);
        for (i, v) in values {
            assert_eq!(v, from_base(i), "mismatch at index {i}");
        }
    }

    #[test]
    fn test_extend_covers_full_supported_range() {
        let values = extend(Frontier::SEED, MAX_SUPPORTED_INDEX).expect("should succeed");

        assert_eq!(values[&MAX_SUPPORTED_INDEX], 12_200_160_415_121_876_738);
        assert_eq!(values[&50], 12_586_269_025);
    }

    #[test]
    fn test_extend_rejects_index_past_u64_range() {
        let err = extend(Frontier::SEED, MAX_SUPPORTED_INDEX + 1).expect_err("must be rejected");
        assert_eq!(err, FibError::IndexOutOfRange(94));
    }

    #[test]
    fn test_extend_detects_overflow_from_corrupt_frontier() {
        let frontier = Frontier {
            max_index: 2,
            curr: u64::MAX,
            prev: u64::MAX,
        };

        let err = extend(frontier, 3).expect_err("must overflow");
        assert_eq!(err, FibError::Overflow(3));
    }

    #[test]
    fn test_error_display() {
        let err = FibError::IndexOutOfRange(100);
        assert!(err.to_string().contains("100"));

        let err = FibError::Overflow(94);
        assert!(err.to_string().contains("94"));
    }
}
