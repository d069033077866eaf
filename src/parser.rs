//! Plaintext Graphite line protocol: `metric SP value SP timestamp LF`.

use thiserror::Error;

/// A single metric observation.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub metric: String,
    pub value: f64,
    pub timestamp: i64,
}

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum ParseError {
    /// A line could not be decoded: wrong field count, bad number, or NaN.
    #[error("bad_message")]
    BadMessage,
    /// The buffer ended without a trailing newline; the caller should
    /// accumulate more bytes before calling again.
    #[error("unfinished_line")]
    UnfinishedLine,
}

/// Parses a single already-trimmed line into `(metric, value, timestamp)`.
fn parse_line(line: &[u8]) -> Result<(&[u8], f64, i64), ParseError> {
    let line = trim_ascii(line);

    let i1 = line
        .iter()
        .position(|&b| b == b' ')
        .ok_or(ParseError::BadMessage)?;
    if i1 < 1 {
        return Err(ParseError::BadMessage);
    }

    let rest = &line[i1 + 1..];
    let i2 = rest
        .iter()
        .position(|&b| b == b' ')
        .ok_or(ParseError::BadMessage)?;
    if i2 < 1 {
        return Err(ParseError::BadMessage);
    }

    let metric = &line[..i1];
    let value_bytes = &rest[..i2];
    let timestamp_bytes = &rest[i2 + 1..];

    let value_str = std::str::from_utf8(value_bytes).map_err(|_| ParseError::BadMessage)?;
    let value: f64 = value_str.parse().map_err(|_| ParseError::BadMessage)?;
    if value.is_nan() {
        return Err(ParseError::BadMessage);
    }

    let ts_str = std::str::from_utf8(timestamp_bytes).map_err(|_| ParseError::BadMessage)?;
    let ts_float: f64 = ts_str.parse().map_err(|_| ParseError::BadMessage)?;
    if ts_float.is_nan() {
        return Err(ParseError::BadMessage);
    }

    Ok((metric, value, ts_float as i64))
}

fn trim_ascii(mut b: &[u8]) -> &[u8] {
    while matches!(b.first(), Some(b' ' | b'\n' | b'\r')) {
        b = &b[1..];
    }
    while matches!(b.last(), Some(b' ' | b'\n' | b'\r')) {
        b = &b[..b.len() - 1];
    }
    b
}

/// Parses every newline-terminated line in `body` into datapoints.
///
/// Stops at the first malformed or trailing-partial line and returns the
/// error alongside the datapoints already accepted.
pub fn parse_plain_graphite_protocol(body: &[u8]) -> (Vec<DataPoint>, Option<ParseError>) {
    let mut result = Vec::new();
    let size = body.len();
    let mut offset = 0;

    while offset < size {
        let line_end = body[offset..size].iter().position(|&b| b == b'\n');
        let line_end = match line_end {
            None => return (result, Some(ParseError::UnfinishedLine)),
            Some(0) => {
                offset += 1;
                continue;
            }
            Some(n) => n,
        };

        let line = &body[offset..offset + line_end + 1];
        offset += line_end + 1;

        match parse_line(line) {
            Ok((metric, value, timestamp)) => {
                result.push(DataPoint {
                    metric: String::from_utf8_lossy(metric).into_owned(),
                    value,
                    timestamp,
                });
            }
            Err(e) => return (result, Some(e)),
        }
    }

    (result, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_single_valid_line() {
        let (dps, err) = parse_plain_graphite_protocol(b"cpu.load 1.5 1700000000\n");
        assert_eq!(err, None);
        assert_eq!(
            dps,
            vec![DataPoint {
                metric: "cpu.load".to_string(),
                value: 1.5,
                timestamp: 1_700_000_000
            }]
        );
    }

    #[test]
    fn s2_bad_line_keeps_earlier_valid_lines() {
        let (dps, err) =
            parse_plain_graphite_protocol(b"cpu.load 1.5 1700000000\nbad line\nmem 2 1700000001\n");
        assert_eq!(err, Some(ParseError::BadMessage));
        assert_eq!(dps.len(), 1);
        assert_eq!(dps[0].metric, "cpu.load");
    }

    #[test]
    fn s3_nan_value_rejected() {
        let (dps, err) = parse_plain_graphite_protocol(b"cpu.load NaN 1700000000\n");
        assert_eq!(err, Some(ParseError::BadMessage));
        assert!(dps.is_empty());
    }

    #[test]
    fn empty_lines_are_skipped() {
        let (dps, err) = parse_plain_graphite_protocol(b"\n\ncpu.load 1 1\n\n");
        assert_eq!(err, None);
        assert_eq!(dps.len(), 1);
    }

    #[test]
    fn trailing_partial_line_is_unfinished() {
        let (dps, err) = parse_plain_graphite_protocol(b"cpu.load 1 1\nmem 2 2");
        assert_eq!(err, Some(ParseError::UnfinishedLine));
        assert_eq!(dps.len(), 1);
    }

    #[test]
    fn too_few_spaces_is_bad_message() {
        let (dps, err) = parse_plain_graphite_protocol(b"cpu.load 1\n");
        assert_eq!(err, Some(ParseError::BadMessage));
        assert!(dps.is_empty());
    }

    #[test]
    fn round_trip_formats_and_reparses() {
        let dp = DataPoint {
            metric: "a.b.c".to_string(),
            value: 42.5,
            timestamp: 1_700_000_123,
        };
        let line = format!("{} {} {}\n", dp.metric, dp.value, dp.timestamp);
        let (dps, err) = parse_plain_graphite_protocol(line.as_bytes());
        assert_eq!(err, None);
        assert_eq!(dps, vec![dp]);
    }

    #[test]
    fn deterministic_for_same_input() {
        let body: &[u8] = b"a 1 1\nb 2 2\nc 3 3\n";
        let (first, _) = parse_plain_graphite_protocol(body);
        let (second, _) = parse_plain_graphite_protocol(body);
        assert_eq!(first, second);
    }
}
