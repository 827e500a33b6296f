//! Capture log format
//!
//! Plain text, one frame per line:
//! `<timestampMillis>\t<hex byte>\t<hex byte>...`

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::CaptureRecord;
use crate::protocol::ProtocolError;

/// Render a record as one log line (without the newline)
pub fn format_line(record: &CaptureRecord) -> String {
    let mut line = record.timestamp_ms.to_string();
    for byte in &record.frame {
        line.push('\t');
        line.push_str(&format!("{:02X}", byte));
    }
    line
}

/// Parse one log line. Lines with fewer than two fields are skipped (`None`).
///
/// `line_no` is 1-based and only used for error reporting.
pub fn parse_line(line: &str, line_no: usize) -> Result<Option<CaptureRecord>, ProtocolError> {
    let parts: Vec<&str> = line.trim().split('\t').collect();
    if parts.len() < 2 {
        return Ok(None);
    }

    let timestamp_ms = parts[0]
        .trim()
        .parse::<i64>()
        .map_err(|e| ProtocolError::InvalidLogLine {
            line: line_no,
            reason: format!("bad timestamp '{}': {}", parts[0], e),
        })?;

    let frame = parts[1..]
        .iter()
        .map(|field| {
            u8::from_str_radix(field.trim(), 16).map_err(|e| ProtocolError::InvalidLogLine {
                line: line_no,
                reason: format!("bad byte '{}': {}", field, e),
            })
        })
        .collect::<Result<Vec<u8>, _>>()?;

    Ok(Some(CaptureRecord::new(timestamp_ms, frame)))
}

/// Read every record from a capture log file
pub fn read_log<P: AsRef<Path>>(path: P) -> Result<Vec<CaptureRecord>, ProtocolError> {
    let file = File::open(path)?;
    read_log_from(BufReader::new(file))
}

/// Read every record from a reader holding capture log text
pub fn read_log_from<R: BufRead>(reader: R) -> Result<Vec<CaptureRecord>, ProtocolError> {
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        if let Some(record) = parse_line(&line?, idx + 1)? {
            records.push(record);
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_line_layout() {
        let record = CaptureRecord::new(1717171717123, vec![0x55, 0x0A, 0x04, 0x9c]);
        assert_eq!(format_line(&record), "1717171717123\t55\t0A\t04\t9C");
    }

    #[test]
    fn test_parse_skips_short_lines() {
        assert_eq!(parse_line("", 1).unwrap(), None);
        assert_eq!(parse_line("1717171717123", 2).unwrap(), None);
    }

    #[test]
    fn test_parse_accepts_lowercase_and_crlf() {
        let record = parse_line("42\t55\t0e\tab\r", 1).unwrap().unwrap();
        assert_eq!(record, CaptureRecord::new(42, vec![0x55, 0x0E, 0xAB]));
    }

    #[test]
    fn test_parse_reports_line_number() {
        let err = parse_line("42\t55\tZZ", 7).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidLogLine { line: 7, .. }));

        let err = parse_line("soon\t55", 3).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidLogLine { line: 3, .. }));
    }

    #[test]
    fn test_read_log_from_text() {
        let text = "100\t55\t0A\n\n150\n200\tAB\tCD\n";
        let records = read_log_from(text.as_bytes()).unwrap();
        assert_eq!(
            records,
            vec![
                CaptureRecord::new(100, vec![0x55, 0x0A]),
                CaptureRecord::new(200, vec![0xAB, 0xCD]),
            ]
        );
    }
}
