//! Null sentinel selection for integer columns.
//!
//! A nullable integer column with no declared TNULLn needs an on-disk bit
//! pattern that no real value uses. The scanner watches every raw value a
//! write pass produces and picks the sentinel afterwards, so the choice is
//! a deterministic function of the written data.

use alloc::vec;
use alloc::vec::Vec;

/// Widest raw range for which every written value is remembered
/// individually; beyond it only the low/high candidates are tracked.
const DENSE_RANGE: i64 = 1 << 16;

/// The sentinel the scanner settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sentinel {
    /// The raw on-disk value to write for null cells.
    pub value: i64,
    /// False when every representable pattern was in use and `value` is
    /// the reserved fallback instead of a guaranteed-unused pattern.
    pub fresh: bool,
}

/// Observes raw integer values during a write pass and chooses an unused
/// pattern at end-of-write.
///
/// `lo..=hi` is the representable raw range of the column's disk type
/// (e.g. `0..=255` for `B`, `i16::MIN..=i16::MAX` for `I`). For narrow
/// ranges the scanner keeps a per-value bitmap so a hole inside the
/// written span can still be found; for wide ranges the span endpoints
/// alone decide.
#[derive(Debug, Clone)]
pub struct SentinelScanner {
    lo: i64,
    hi: i64,
    low_seen: Option<i64>,
    high_seen: Option<i64>,
    used: Option<Vec<u64>>,
}

impl SentinelScanner {
    /// Create a scanner for the raw range `lo..=hi`.
    ///
    /// # Panics
    ///
    /// Panics if `lo > hi`.
    pub fn new(lo: i64, hi: i64) -> SentinelScanner {
        assert!(lo <= hi, "empty raw range");
        let width = hi as i128 - lo as i128;
        let used = if width < DENSE_RANGE as i128 {
            Some(vec![0u64; (width as usize + 1).div_ceil(64)])
        } else {
            None
        };
        SentinelScanner {
            lo,
            hi,
            low_seen: None,
            high_seen: None,
            used,
        }
    }

    /// Record one written raw value. Values outside the range are ignored;
    /// the disk type cannot produce them.
    pub fn observe(&mut self, value: i64) {
        if value < self.lo || value > self.hi {
            return;
        }
        self.low_seen = Some(self.low_seen.map_or(value, |lo| lo.min(value)));
        self.high_seen = Some(self.high_seen.map_or(value, |hi| hi.max(value)));
        if let Some(used) = &mut self.used {
            let bit = (value - self.lo) as usize;
            used[bit / 64] |= 1u64 << (bit % 64);
        }
    }

    /// Number of distinct candidates below and above the observed span.
    fn span(&self) -> Option<(i64, i64)> {
        Some((self.low_seen?, self.high_seen?))
    }

    /// Choose the sentinel.
    ///
    /// Preference order: the pattern just below the observed span, then
    /// just above it, then (narrow ranges only) the first unused pattern
    /// inside the span. When nothing is free, the range minimum is
    /// returned as the reserved fallback, flagged not-fresh, and a warning
    /// is logged once here.
    pub fn choose(&self) -> Sentinel {
        let (low, high) = match self.span() {
            // Nothing written: the whole range is free.
            None => {
                return Sentinel {
                    value: self.lo,
                    fresh: true,
                }
            }
            Some(span) => span,
        };

        if low > self.lo {
            return Sentinel {
                value: low - 1,
                fresh: true,
            };
        }
        if high < self.hi {
            return Sentinel {
                value: high + 1,
                fresh: true,
            };
        }
        if let Some(used) = &self.used {
            for (word_idx, word) in used.iter().enumerate() {
                if *word != u64::MAX {
                    let bit = word_idx as i64 * 64 + (!word).trailing_zeros() as i64;
                    let candidate = self.lo + bit;
                    if candidate <= self.hi {
                        return Sentinel {
                            value: candidate,
                            fresh: true,
                        };
                    }
                }
            }
        }

        tracing::warn!(
            lo = self.lo,
            hi = self.hi,
            "no unused null sentinel pattern; falling back to the range minimum"
        );
        Sentinel {
            value: self.lo,
            fresh: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_span_picks_below() {
        let mut scanner = SentinelScanner::new(-128, 127);
        for v in -5..=5 {
            scanner.observe(v);
        }
        let s = scanner.choose();
        assert!(s.fresh);
        assert_eq!(s.value, -6);
        assert!(!(-5..=5).contains(&s.value));
    }

    #[test]
    fn choice_is_deterministic() {
        let run = || {
            let mut scanner = SentinelScanner::new(-128, 127);
            for v in [3, -5, 0, 5, -1] {
                scanner.observe(v);
            }
            scanner.choose()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn span_at_range_bottom_picks_above() {
        let mut scanner = SentinelScanner::new(0, 255);
        for v in 0..=10 {
            scanner.observe(v);
        }
        let s = scanner.choose();
        assert!(s.fresh);
        assert_eq!(s.value, 11);
    }

    #[test]
    fn hole_inside_full_span_is_found() {
        let mut scanner = SentinelScanner::new(0, 255);
        for v in 0..=255 {
            if v != 100 {
                scanner.observe(v);
            }
        }
        let s = scanner.choose();
        assert!(s.fresh);
        assert_eq!(s.value, 100);
    }

    #[test]
    fn exhausted_range_falls_back() {
        let mut scanner = SentinelScanner::new(0, 255);
        for v in 0..=255 {
            scanner.observe(v);
        }
        let s = scanner.choose();
        assert!(!s.fresh);
        assert_eq!(s.value, 0);
    }

    #[test]
    fn nothing_written_uses_range_minimum() {
        let scanner = SentinelScanner::new(-32768, 32767);
        let s = scanner.choose();
        assert!(s.fresh);
        assert_eq!(s.value, -32768);
    }

    #[test]
    fn wide_range_tracks_endpoints_only() {
        let mut scanner = SentinelScanner::new(i64::MIN, i64::MAX);
        scanner.observe(i64::MIN);
        scanner.observe(42);
        let s = scanner.choose();
        assert!(s.fresh);
        assert_eq!(s.value, 43);
    }

    #[test]
    fn wide_range_full_span_falls_back() {
        let mut scanner = SentinelScanner::new(i64::MIN, i64::MAX);
        scanner.observe(i64::MIN);
        scanner.observe(i64::MAX);
        // Only the endpoints are tracked, so the span is considered full
        // even though interior holes exist.
        let s = scanner.choose();
        assert!(!s.fresh);
        assert_eq!(s.value, i64::MIN);
    }

    #[test]
    fn out_of_range_values_ignored() {
        let mut scanner = SentinelScanner::new(0, 255);
        scanner.observe(-1);
        scanner.observe(300);
        let s = scanner.choose();
        assert_eq!(s.value, 0);
        assert!(s.fresh);
    }
}
