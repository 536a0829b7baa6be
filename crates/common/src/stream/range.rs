use std::fmt;
use std::str::FromStr;

use crate::error::StreamError;

/// Half-open span `[start, end)` of a file's plaintext
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSpan {
    pub start: u64,
    pub end: u64,
}

impl ByteSpan {
    /// Check `[from, to)` against a file of `total_size` bytes. An omitted `to` means the end
    ///  of the file. `from` must address an existing byte even when the span is empty.
    pub fn checked(from: u64, to: Option<u64>, total_size: u64) -> Result<Self, StreamError> {
        let out_of_bounds = || StreamError::RangeOutOfBounds {
            from,
            to,
            total_size,
        };
        if from >= total_size {
            return Err(out_of_bounds());
        }
        let end = to.unwrap_or(total_size);
        if end < from || end > total_size {
            return Err(out_of_bounds());
        }
        Ok(Self { start: from, end })
    }

    /// The whole of a file, including an empty one
    pub fn whole(total_size: u64) -> Self {
        Self {
            start: 0,
            end: total_size,
        }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// `Content-Range` header value for this span of a file of `total_size` bytes
    pub fn content_range(&self, total_size: u64) -> String {
        if self.is_empty() {
            return format!("bytes */{}", total_size);
        }
        format!("bytes {}-{}/{}", self.start, self.end - 1, total_size)
    }
}

impl fmt::Display for ByteSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeHeaderError {
    #[error("unsupported range unit: {0}")]
    UnsupportedUnit(String),
    #[error("multiple ranges are not supported")]
    MultipleRanges,
    #[error("malformed range: {0}")]
    Malformed(String),
}

/// A single-range HTTP `Range` header, e.g. `bytes=0-499`, `bytes=500-`, `bytes=-500`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeHeader {
    /// `bytes=a-b`, both inclusive
    Bounded { first: u64, last: u64 },
    /// `bytes=a-`
    From(u64),
    /// `bytes=-n`, the final `n` bytes
    Suffix(u64),
}

impl FromStr for RangeHeader {
    type Err = RangeHeaderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        let (unit, set) = value
            .split_once('=')
            .ok_or_else(|| RangeHeaderError::Malformed(value.to_string()))?;
        if !unit.trim().eq_ignore_ascii_case("bytes") {
            return Err(RangeHeaderError::UnsupportedUnit(unit.trim().to_string()));
        }
        if set.contains(',') {
            return Err(RangeHeaderError::MultipleRanges);
        }

        let malformed = || RangeHeaderError::Malformed(value.to_string());
        let (first, last) = set.trim().split_once('-').ok_or_else(malformed)?;
        let parse = |s: &str| s.trim().parse::<u64>().map_err(|_| malformed());

        match (first.trim().is_empty(), last.trim().is_empty()) {
            (true, true) => Err(malformed()),
            (true, false) => Ok(Self::Suffix(parse(last)?)),
            (false, true) => Ok(Self::From(parse(first)?)),
            (false, false) => {
                let (first, last) = (parse(first)?, parse(last)?);
                if last < first {
                    return Err(malformed());
                }
                Ok(Self::Bounded { first, last })
            }
        }
    }
}

impl RangeHeader {
    /// Resolve against a file of `total_size` bytes. A last byte past the end is clamped;
    ///  a first byte past the end, or an empty suffix, is unsatisfiable.
    pub fn resolve(&self, total_size: u64) -> Result<ByteSpan, StreamError> {
        match *self {
            Self::Bounded { first, last } => {
                let end = last.saturating_add(1).min(total_size);
                ByteSpan::checked(first, Some(end.max(first)), total_size)
            }
            Self::From(first) => ByteSpan::checked(first, None, total_size),
            Self::Suffix(len) => {
                if len == 0 {
                    return Err(StreamError::RangeOutOfBounds {
                        from: total_size,
                        to: Some(total_size),
                        total_size,
                    });
                }
                ByteSpan::checked(total_size.saturating_sub(len), None, total_size)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            "bytes=0-499".parse::<RangeHeader>(),
            Ok(RangeHeader::Bounded { first: 0, last: 499 })
        );
        assert_eq!("bytes=500-".parse::<RangeHeader>(), Ok(RangeHeader::From(500)));
        assert_eq!("bytes=-500".parse::<RangeHeader>(), Ok(RangeHeader::Suffix(500)));
        assert_eq!(
            " Bytes = 1 - 2 ".parse::<RangeHeader>(),
            Ok(RangeHeader::Bounded { first: 1, last: 2 })
        );
    }

    #[test]
    fn test_parse_rejects() {
        assert_eq!(
            "bytes=0-1,5-6".parse::<RangeHeader>(),
            Err(RangeHeaderError::MultipleRanges)
        );
        assert!(matches!(
            "items=0-1".parse::<RangeHeader>(),
            Err(RangeHeaderError::UnsupportedUnit(_))
        ));
        assert!(matches!(
            "bytes=5-1".parse::<RangeHeader>(),
            Err(RangeHeaderError::Malformed(_))
        ));
        assert!(matches!(
            "bytes=-".parse::<RangeHeader>(),
            Err(RangeHeaderError::Malformed(_))
        ));
        assert!(matches!(
            "bytes=a-b".parse::<RangeHeader>(),
            Err(RangeHeaderError::Malformed(_))
        ));
    }

    #[test]
    fn test_resolve_converts_to_exclusive_end() {
        let span = RangeHeader::Bounded { first: 10, last: 19 }.resolve(100).unwrap();
        assert_eq!(span, ByteSpan { start: 10, end: 20 });
        assert_eq!(span.content_range(100), "bytes 10-19/100");

        let clamped = RangeHeader::Bounded { first: 90, last: 500 }.resolve(100).unwrap();
        assert_eq!(clamped, ByteSpan { start: 90, end: 100 });

        assert_eq!(
            RangeHeader::Suffix(30).resolve(100).unwrap(),
            ByteSpan { start: 70, end: 100 }
        );
        assert_eq!(
            RangeHeader::Suffix(300).resolve(100).unwrap(),
            ByteSpan { start: 0, end: 100 }
        );
    }

    #[test]
    fn test_resolve_unsatisfiable() {
        assert!(matches!(
            RangeHeader::From(100).resolve(100),
            Err(StreamError::RangeOutOfBounds { .. })
        ));
        assert!(matches!(
            RangeHeader::Suffix(0).resolve(100),
            Err(StreamError::RangeOutOfBounds { .. })
        ));
        assert!(matches!(
            RangeHeader::Suffix(5).resolve(0),
            Err(StreamError::RangeOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_checked_bounds() {
        assert_eq!(ByteSpan::checked(5, Some(5), 10).unwrap().len(), 0);
        assert!(ByteSpan::checked(10, Some(10), 10).is_err());
        assert!(ByteSpan::checked(5, Some(4), 10).is_err());
        assert!(ByteSpan::checked(5, Some(11), 10).is_err());
        assert_eq!(
            ByteSpan::checked(3, None, 10).unwrap(),
            ByteSpan { start: 3, end: 10 }
        );
    }
}
