//! HTTP Range parsing
//!
//! Single `bytes=<start>-<end>` ranges only. Anything that does not match
//! that shape is served in full.

/// Inclusive byte interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered; never zero
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for a resource of `size` bytes
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

/// What to send for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeDecision {
    /// 200 with the whole resource
    Full,
    /// 206 with the given interval
    Partial(ByteRange),
    /// 416 with `Content-Range: bytes */<size>`
    Unsatisfiable,
}

/// Decide how to answer a `Range` header for a resource of `size` bytes
pub fn parse_range(header: Option<&str>, size: u64) -> RangeDecision {
    let Some((start, end)) = header.and_then(split_spec) else {
        return RangeDecision::Full;
    };

    match (start, end) {
        (None, None) => RangeDecision::Full,
        (None, Some(suffix)) => {
            if suffix == 0 {
                RangeDecision::Full
            } else if size == 0 {
                RangeDecision::Unsatisfiable
            } else {
                RangeDecision::Partial(ByteRange {
                    start: size.saturating_sub(suffix),
                    end: size - 1,
                })
            }
        }
        (Some(start), end) => {
            if start >= size {
                return RangeDecision::Unsatisfiable;
            }
            let last = size - 1;
            let end = end.map_or(last, |e| e.min(last));
            if start > end {
                RangeDecision::Unsatisfiable
            } else {
                RangeDecision::Partial(ByteRange { start, end })
            }
        }
    }
}

/// Split `bytes=<digits?>-<digits?>` into its two optional numbers.
/// Returns `None` when the header has any other shape.
fn split_spec(header: &str) -> Option<(Option<u64>, Option<u64>)> {
    let spec = header.trim().strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    Some((parse_digits(start)?, parse_digits(end)?))
}

/// `Some(None)` for an empty side, `Some(Some(n))` for digits, `None` for
/// anything else. Values too large for u64 saturate.
fn parse_digits(s: &str) -> Option<Option<u64>> {
    if s.is_empty() {
        return Some(None);
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(Some(s.parse().unwrap_or(u64::MAX)))
}
