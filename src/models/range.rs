/// `Content-Range` forms accepted on the session endpoint.
///
/// `bytes */*` is the probe sentinel ("how much do you have?");
/// `bytes <start>-<end>/<total>` carries one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentRange {
    Probe,
    Span { start: u64, end: u64, total: u64 },
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RangeParseError {
    #[error("content range must start with a `bytes ` unit")]
    MissingUnit,
    #[error("malformed content range: {0}")]
    Malformed(String),
    #[error("inverted range: {start} > {end}")]
    Inverted { start: u64, end: u64 },
    #[error("range end {end} is not below total {total}")]
    EndBeyondTotal { end: u64, total: u64 },
}

impl ContentRange {
    pub fn parse(raw: &str) -> Result<Self, RangeParseError> {
        let rest = raw
            .strip_prefix("bytes ")
            .ok_or(RangeParseError::MissingUnit)?
            .trim();
        if rest == "*/*" {
            return Ok(ContentRange::Probe);
        }
        let (span, total) = rest
            .split_once('/')
            .ok_or_else(|| RangeParseError::Malformed(raw.to_string()))?;
        let (start, end) = span
            .split_once('-')
            .ok_or_else(|| RangeParseError::Malformed(raw.to_string()))?;
        let start: u64 = start
            .parse()
            .map_err(|_| RangeParseError::Malformed(raw.to_string()))?;
        let end: u64 = end
            .parse()
            .map_err(|_| RangeParseError::Malformed(raw.to_string()))?;
        let total: u64 = total
            .parse()
            .map_err(|_| RangeParseError::Malformed(raw.to_string()))?;
        if start > end {
            return Err(RangeParseError::Inverted { start, end });
        }
        if end >= total {
            return Err(RangeParseError::EndBeyondTotal { end, total });
        }
        Ok(ContentRange::Span { start, end, total })
    }

    /// Byte length of the chunk a `Span` announces.
    pub fn len(&self) -> u64 {
        match self {
            ContentRange::Probe => 0,
            ContentRange::Span { start, end, .. } => end - start + 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_sentinel() {
        assert_eq!(ContentRange::parse("bytes */*").unwrap(), ContentRange::Probe);
    }

    #[test]
    fn plain_span() {
        let r = ContentRange::parse("bytes 0-8388607/10485760").unwrap();
        assert_eq!(
            r,
            ContentRange::Span {
                start: 0,
                end: 8_388_607,
                total: 10_485_760
            }
        );
        assert_eq!(r.len(), 8 * 1024 * 1024);
    }

    #[test]
    fn one_byte_file() {
        let r = ContentRange::parse("bytes 0-0/1").unwrap();
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn rejects_missing_unit() {
        assert_eq!(
            ContentRange::parse("0-1/2").unwrap_err(),
            RangeParseError::MissingUnit
        );
    }

    #[test]
    fn rejects_unknown_total_span() {
        assert!(matches!(
            ContentRange::parse("bytes 0-10/*").unwrap_err(),
            RangeParseError::Malformed(_)
        ));
    }

    #[test]
    fn rejects_inverted_span() {
        assert_eq!(
            ContentRange::parse("bytes 10-2/100").unwrap_err(),
            RangeParseError::Inverted { start: 10, end: 2 }
        );
    }

    #[test]
    fn rejects_end_at_or_beyond_total() {
        assert_eq!(
            ContentRange::parse("bytes 0-100/100").unwrap_err(),
            RangeParseError::EndBeyondTotal {
                end: 100,
                total: 100
            }
        );
    }
}
