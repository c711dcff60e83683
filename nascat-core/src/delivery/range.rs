//! HTTP single byte-range parsing (RFC 9110 §14.1).
//!
//! Only one `bytes` range per request is supported. Every rejection maps
//! to 416 at the delivery layer; the variants exist for logging.

/// Why a `Range` header value cannot be served.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("malformed range: {value}")]
    Malformed { value: String },

    #[error("multiple ranges are not supported")]
    MultipleRanges,

    #[error("range not satisfiable for resource of {total} bytes")]
    Unsatisfiable { total: u64 },
}

/// Inclusive byte interval within a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Interval covering a whole resource, or `None` when it is empty.
    pub fn full(total: u64) -> Option<Self> {
        (total > 0).then(|| Self {
            start: 0,
            end: total - 1,
        })
    }

    /// Parses a `Range` header value against a resource of `total` bytes.
    ///
    /// Accepts `bytes=start-end`, `bytes=start-` and `bytes=-suffix`. The end
    /// is clamped to the last byte; a suffix longer than the resource covers
    /// all of it.
    ///
    /// # Errors
    ///
    /// - `RangeError::Malformed` - Wrong unit or non-numeric bounds
    /// - `RangeError::MultipleRanges` - Comma-separated range set
    /// - `RangeError::Unsatisfiable` - Empty suffix, end before start, or start past the end
    pub fn parse(header: &str, total: u64) -> Result<Self, RangeError> {
        let malformed = || RangeError::Malformed {
            value: header.to_string(),
        };
        let unsatisfiable = RangeError::Unsatisfiable { total };

        let (unit, ranges) = header.trim().split_once('=').ok_or_else(malformed)?;
        if !unit.trim().eq_ignore_ascii_case("bytes") {
            return Err(malformed());
        }
        if ranges.contains(',') {
            return Err(RangeError::MultipleRanges);
        }

        let (first, last) = ranges.trim().split_once('-').ok_or_else(malformed)?;
        let (first, last) = (first.trim(), last.trim());

        if first.is_empty() {
            let suffix = parse_bound(last).ok_or_else(malformed)?;
            if suffix == 0 || total == 0 {
                return Err(unsatisfiable);
            }
            return Ok(Self {
                start: total.saturating_sub(suffix),
                end: total - 1,
            });
        }

        let start = parse_bound(first).ok_or_else(malformed)?;
        let end = if last.is_empty() {
            None
        } else {
            Some(parse_bound(last).ok_or_else(malformed)?)
        };

        if end.is_some_and(|end| end < start) || start >= total {
            return Err(unsatisfiable);
        }

        let last_byte = total - 1;
        Ok(Self {
            start,
            end: end.map_or(last_byte, |end| end.min(last_byte)),
        })
    }

    /// Number of bytes in the interval.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false: an inclusive interval holds at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// `Content-Range` value for a 206 response.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{total}", self.start, self.end)
    }

    /// `Content-Range` value for a 416 response.
    pub fn unsatisfied_content_range(total: u64) -> String {
        format!("bytes */{total}")
    }
}

fn parse_bound(digits: &str) -> Option<u64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn range(start: u64, end: u64) -> ByteRange {
        ByteRange { start, end }
    }

    #[test]
    fn test_parse_supported_forms() {
        assert_eq!(ByteRange::parse("bytes=0-99", 1000), Ok(range(0, 99)));
        assert_eq!(ByteRange::parse("bytes=500-", 1000), Ok(range(500, 999)));
        assert_eq!(ByteRange::parse("bytes=-100", 1000), Ok(range(900, 999)));
    }

    #[test]
    fn test_parse_rejections() {
        assert_eq!(
            ByteRange::parse("bytes=2000-3000", 1000),
            Err(RangeError::Unsatisfiable { total: 1000 })
        );
        assert_eq!(
            ByteRange::parse("bytes=100-50", 1000),
            Err(RangeError::Unsatisfiable { total: 1000 })
        );
        assert_eq!(
            ByteRange::parse("bytes=0-10,20-30", 1000),
            Err(RangeError::MultipleRanges)
        );
    }

    #[test]
    fn test_parse_clamps() {
        assert_eq!(ByteRange::parse("bytes=900-5000", 1000), Ok(range(900, 999)));
        assert_eq!(ByteRange::parse("bytes=-5000", 1000), Ok(range(0, 999)));
        assert_eq!(ByteRange::parse("bytes=999-999", 1000), Ok(range(999, 999)));
    }

    #[test]
    fn test_parse_edge_cases() {
        assert_eq!(
            ByteRange::parse("bytes=1000-", 1000),
            Err(RangeError::Unsatisfiable { total: 1000 })
        );
        assert_eq!(
            ByteRange::parse("bytes=-0", 1000),
            Err(RangeError::Unsatisfiable { total: 1000 })
        );
        assert_eq!(
            ByteRange::parse("bytes=0-", 0),
            Err(RangeError::Unsatisfiable { total: 0 })
        );
        assert_eq!(
            ByteRange::parse("bytes=-10", 0),
            Err(RangeError::Unsatisfiable { total: 0 })
        );
        assert_eq!(ByteRange::parse("Bytes=0-0", 10), Ok(range(0, 0)));
    }

    #[test]
    fn test_parse_malformed() {
        for value in [
            "items=0-10",
            "bytes 0-10",
            "bytes=",
            "bytes=-",
            "bytes=abc-10",
            "bytes=0-x",
            "bytes=+5-10",
            "bytes=-+5",
            "bytes=5",
        ] {
            assert!(
                matches!(
                    ByteRange::parse(value, 1000),
                    Err(RangeError::Malformed { .. })
                ),
                "{value} should be malformed"
            );
        }
    }

    #[test]
    fn test_content_range_headers() {
        let r = range(100, 199);
        assert_eq!(r.len(), 100);
        assert_eq!(r.content_range(1000), "bytes 100-199/1000");
        assert_eq!(ByteRange::unsatisfied_content_range(1000), "bytes */1000");
        assert_eq!(ByteRange::full(0), None);
        assert_eq!(ByteRange::full(10), Some(range(0, 9)));
    }

    proptest! {
        #[test]
        fn prop_accepted_range_lies_within_resource(
            total in 1u64..1_000_000,
            a in 0u64..2_000_000,
            b in 0u64..2_000_000,
        ) {
            if let Ok(r) = ByteRange::parse(&format!("bytes={a}-{b}"), total) {
                prop_assert!(r.start <= r.end);
                prop_assert!(r.end < total);
                prop_assert_eq!(r.start, a);
            }
        }

        #[test]
        fn prop_suffix_covers_tail(total in 1u64..1_000_000, n in 1u64..2_000_000) {
            let r = ByteRange::parse(&format!("bytes=-{n}"), total).unwrap();
            prop_assert_eq!(r.end, total - 1);
            prop_assert_eq!(r.len(), n.min(total));
        }

        #[test]
        fn prop_open_range_accepted_iff_start_in_bounds(
            total in 0u64..1_000_000,
            start in 0u64..2_000_000,
        ) {
            let parsed = ByteRange::parse(&format!("bytes={start}-"), total);
            prop_assert_eq!(parsed.is_ok(), start < total);
        }
    }
}
