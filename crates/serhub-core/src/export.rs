//! Filtered export of captured lines as text, CSV or JSON.

use chrono::{DateTime, SecondsFormat, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::ExportError;
use crate::logbuf::{CapturedLine, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    #[serde(alias = "txt")]
    Text,
    Csv,
    Json,
}

impl std::str::FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "txt" | "text" => Ok(Self::Text),
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Text => "text/plain",
            Self::Csv => "text/csv",
            Self::Json => "application/json",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

/// Inclusive bounds in epoch milliseconds. A missing bound is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl TimeRange {
    pub fn contains(&self, timestamp: i64) -> bool {
        self.start.map_or(true, |s| timestamp >= s) && self.end.map_or(true, |e| timestamp <= e)
    }
}

/// Payload filter.
///
/// A leading `#` makes the rest a case-insensitive regular expression;
/// anything else is a case-insensitive substring.
#[derive(Debug, Clone)]
pub enum LineFilter {
    Regex(Regex),
    Substring(String),
}

impl LineFilter {
    /// `None` for an empty filter.
    pub fn parse(filter: &str) -> Result<Option<Self>, ExportError> {
        if filter.is_empty() {
            return Ok(None);
        }
        Ok(Some(match filter.strip_prefix('#') {
            Some(pattern) => {
                Self::Regex(RegexBuilder::new(pattern).case_insensitive(true).build()?)
            }
            None => Self::Substring(filter.to_lowercase()),
        }))
    }

    pub fn matches(&self, payload: &str) -> bool {
        match self {
            Self::Regex(re) => re.is_match(payload),
            Self::Substring(needle) => payload.to_lowercase().contains(needle.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exported {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub extension: &'static str,
}

/// Serializes the lines that pass `range` and `filter`. The input is not
/// modified.
pub fn export(
    lines: &[CapturedLine],
    format: ExportFormat,
    filter: Option<&str>,
    range: TimeRange,
) -> Result<Exported, ExportError> {
    let filter = match filter {
        Some(f) => LineFilter::parse(f)?,
        None => None,
    };

    let selected: Vec<&CapturedLine> = lines
        .iter()
        .filter(|l| range.contains(l.timestamp))
        .filter(|l| filter.as_ref().map_or(true, |f| f.matches(&l.data)))
        .collect();

    let bytes = match format {
        ExportFormat::Json => serde_json::to_vec_pretty(&selected)?,
        ExportFormat::Csv => to_csv(&selected).into_bytes(),
        ExportFormat::Text => to_text(&selected).into_bytes(),
    };

    Ok(Exported {
        bytes,
        content_type: format.content_type(),
        extension: format.extension(),
    })
}

fn to_csv(lines: &[&CapturedLine]) -> String {
    let rows: Vec<String> = lines
        .iter()
        .map(|l| {
            format!(
                "{},{},\"{}\"",
                l.timestamp,
                direction_name(l.direction),
                l.data.replace('"', "\"\"")
            )
        })
        .collect();
    format!("Timestamp,Direction,Data\n{}", rows.join("\n"))
}

fn to_text(lines: &[&CapturedLine]) -> String {
    lines
        .iter()
        .map(|l| {
            let glyph = match l.direction {
                Direction::Tx => '▶',
                Direction::Rx => '◀',
            };
            format!("[{}] {glyph} {}", iso_timestamp(l.timestamp), l.data)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn direction_name(direction: Direction) -> &'static str {
    match direction {
        Direction::Rx => "rx",
        Direction::Tx => "tx",
    }
}

fn iso_timestamp(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serhub_decode::DecodedFrame;

    fn line(ts: i64, direction: Direction, data: &str) -> CapturedLine {
        CapturedLine {
            timestamp: ts,
            direction,
            data: data.to_string(),
            raw: None,
            frames: Vec::new(),
        }
    }

    fn sample() -> Vec<CapturedLine> {
        vec![
            line(1_700_000_000_000, Direction::Rx, "ERR: overheat"),
            line(1_700_000_000_500, Direction::Tx, "status"),
            line(1_700_000_001_000, Direction::Rx, "no error here"),
            line(1_700_000_002_000, Direction::Rx, "err lowercase"),
        ]
    }

    fn text_of(e: &Exported) -> &str {
        std::str::from_utf8(&e.bytes).unwrap()
    }

    #[test]
    fn regex_filter_is_anchored_and_case_insensitive() {
        let out =
            export(&sample(), ExportFormat::Text, Some("#^ERR"), TimeRange::default()).unwrap();
        let text = text_of(&out);
        assert!(text.contains("ERR: overheat"));
        assert!(text.contains("err lowercase"));
        assert!(!text.contains("no error here"));
    }

    #[test]
    fn substring_filter_matches_anywhere() {
        let out = export(&sample(), ExportFormat::Text, Some("err"), TimeRange::default()).unwrap();
        assert_eq!(text_of(&out).lines().count(), 3);
        assert!(!text_of(&out).contains("status"));
    }

    #[test]
    fn malformed_regex_fails_export() {
        let result =
            export(&sample(), ExportFormat::Json, Some("#(unclosed"), TimeRange::default());
        assert!(matches!(result, Err(ExportError::FilterSyntax(_))));
    }

    #[test]
    fn empty_filter_keeps_everything() {
        let out = export(&sample(), ExportFormat::Text, Some(""), TimeRange::default()).unwrap();
        assert_eq!(text_of(&out).lines().count(), 4);
    }

    #[test]
    fn text_format() {
        let out = export(&sample()[..2], ExportFormat::Text, None, TimeRange::default()).unwrap();
        assert_eq!(out.content_type, "text/plain");
        assert_eq!(out.extension, "txt");
        assert_eq!(
            text_of(&out),
            "[2023-11-14T22:13:20.000Z] ◀ ERR: overheat\n[2023-11-14T22:13:20.500Z] ▶ status"
        );
    }

    #[test]
    fn csv_doubles_quotes_only() {
        let lines = vec![line(5, Direction::Rx, r#"say "hi", ok"#), line(6, Direction::Tx, "a\tb")];
        let out = export(&lines, ExportFormat::Csv, None, TimeRange::default()).unwrap();
        assert_eq!(out.content_type, "text/csv");
        assert_eq!(
            text_of(&out),
            "Timestamp,Direction,Data\n5,rx,\"say \"\"hi\"\", ok\"\n6,tx,\"a\tb\""
        );
    }

    #[test]
    fn json_round_trips_filtered_lines() {
        let mut lines = sample();
        lines[0].frames.push(
            DecodedFrame::new("SLIP")
                .with_field("decodedHex", "01c002")
                .with_field("escapedBytes", 1usize)
                .with_summary("[SLIP] 3 bytes decoded (4 encoded)"),
        );
        lines[1].raw = Some(b"status\r\n".to_vec());
        let before = lines.clone();

        let out = export(&lines, ExportFormat::Json, Some("er"), TimeRange::default()).unwrap();
        assert_eq!(out.content_type, "application/json");
        let parsed: Vec<CapturedLine> = serde_json::from_slice(&out.bytes).unwrap();
        let expected: Vec<CapturedLine> =
            lines.iter().filter(|l| l.data.contains("er")).cloned().collect();
        assert_eq!(parsed, expected);
        assert_eq!(lines, before);
    }

    #[test]
    fn json_keeps_field_order() {
        let out = export(&sample()[..1], ExportFormat::Json, None, TimeRange::default()).unwrap();
        let text = text_of(&out);
        let ts = text.find("\"timestamp\"").unwrap();
        let dir = text.find("\"direction\"").unwrap();
        let data = text.find("\"data\"").unwrap();
        assert!(ts < dir && dir < data);
    }

    #[test]
    fn time_range_is_inclusive() {
        let range = TimeRange {
            start: Some(1_700_000_000_500),
            end: Some(1_700_000_001_000),
        };
        let out = export(&sample(), ExportFormat::Csv, None, range).unwrap();
        let rows: Vec<&str> = text_of(&out).lines().skip(1).collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].contains("status"));
    }

    #[test]
    fn format_names() {
        assert_eq!("txt".parse::<ExportFormat>().unwrap(), ExportFormat::Text);
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!(matches!("xml".parse::<ExportFormat>(), Err(ExportError::UnknownFormat(_))));
    }
}
