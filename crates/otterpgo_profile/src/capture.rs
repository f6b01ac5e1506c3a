//! Extraction of the structured profiling report from captured console output
//!
//! The target prints its report between two marker lines on the serial
//! console, surrounded by arbitrary boot chatter. [`ReportScanner`] walks the
//! output line by line with an explicit state so that repeated or partial
//! markers are handled predictably:
//!
//! - a BEGIN seen while already inside a report restarts the block,
//! - a later complete block supersedes an earlier one,
//! - a BEGIN without a matching END is an error, not an empty report.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ProfileError;
use crate::model::Profile;

/// Lines delimiting the report in captured output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportMarkers {
    pub begin: String,
    pub end: String,
}

impl Default for ReportMarkers {
    fn default() -> Self {
        Self {
            begin: "--- BEGIN JSON ---".to_string(),
            end: "--- END JSON ---".to_string(),
        }
    }
}

impl ReportMarkers {
    pub fn new(begin: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            begin: begin.into(),
            end: end.into(),
        }
    }
}

/// Why captured output did not yield a report
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureIssue {
    #[error("no `{begin}` marker found in captured output")]
    MissingBegin { begin: String },

    #[error("report opened by `{begin}` was never closed by `{end}`")]
    Unterminated { begin: String, end: String },

    #[error("report between markers is empty")]
    Empty,

    #[error("report between markers is malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Searching,
    InReport,
    Done,
}

/// Line-oriented scanner for marker-delimited reports
#[derive(Debug)]
pub struct ReportScanner<'m> {
    markers: &'m ReportMarkers,
    state: ScanState,
    current: Vec<String>,
    complete: Option<Vec<String>>,
}

impl<'m> ReportScanner<'m> {
    pub fn new(markers: &'m ReportMarkers) -> Self {
        Self {
            markers,
            state: ScanState::Searching,
            current: Vec::new(),
            complete: None,
        }
    }

    pub fn feed_line(&mut self, line: &str) {
        let trimmed = line.trim();
        match self.state {
            ScanState::Searching | ScanState::Done => {
                if trimmed == self.markers.begin {
                    self.current.clear();
                    self.state = ScanState::InReport;
                }
            }
            ScanState::InReport => {
                if trimmed == self.markers.begin {
                    self.current.clear();
                } else if trimmed == self.markers.end {
                    self.complete = Some(std::mem::take(&mut self.current));
                    self.state = ScanState::Done;
                } else {
                    self.current.push(line.trim_end_matches('\r').to_string());
                }
            }
        }
    }

    /// Finish scanning and return the body of the last complete report
    pub fn finish(self) -> Result<String, CaptureIssue> {
        match (self.complete, self.state) {
            (Some(lines), _) => {
                let body = lines.join("\n");
                if body.trim().is_empty() {
                    Err(CaptureIssue::Empty)
                } else {
                    Ok(body)
                }
            }
            (None, ScanState::InReport) => Err(CaptureIssue::Unterminated {
                begin: self.markers.begin.clone(),
                end: self.markers.end.clone(),
            }),
            (None, _) => Err(CaptureIssue::MissingBegin {
                begin: self.markers.begin.clone(),
            }),
        }
    }
}

/// Locate the report body within captured output
pub fn extract_report(output: &str, markers: &ReportMarkers) -> Result<String, CaptureIssue> {
    let mut scanner = ReportScanner::new(markers);
    for line in output.lines() {
        scanner.feed_line(line);
    }
    scanner.finish()
}

/// Extract and parse the report from one captured run.
///
/// Any defect of the enclosed content (bad JSON, failed validation) is a
/// capture failure carrying the invoked command and both output streams.
pub fn parse_captured_profile(
    stdout: &str,
    stderr: &str,
    command: &str,
    markers: &ReportMarkers,
) -> Result<Profile, ProfileError> {
    let capture_error = |issue: CaptureIssue| ProfileError::CaptureFormat {
        issue,
        command: command.to_string(),
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    };

    let body = extract_report(stdout, markers).map_err(capture_error)?;
    Profile::from_json_str(&body, "captured report").map_err(|err| {
        let detail = match &err {
            ProfileError::Json { source, .. } => source.to_string(),
            other => other.to_string(),
        };
        capture_error(CaptureIssue::Malformed(detail))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serial_log(body: &str) -> String {
        format!(
            "[serial] init ok\r\nBooting modules...\n=== PROFILING DATA EXPORT ===\n--- BEGIN JSON ---\n{body}\n--- END JSON ---\n\nWorkflow:\n1. Save JSON\n"
        )
    }

    #[test]
    fn test_extracts_body_between_markers() {
        let markers = ReportMarkers::default();
        let body = extract_report(&serial_log(r#"{"modules": []}"#), &markers).unwrap();
        assert_eq!(body, r#"{"modules": []}"#);
    }

    #[test]
    fn test_missing_markers() {
        let markers = ReportMarkers::default();
        let issue = extract_report("kernel panic\n", &markers).unwrap_err();
        assert!(matches!(issue, CaptureIssue::MissingBegin { .. }));

        let only_end = extract_report("--- END JSON ---\n", &markers).unwrap_err();
        assert!(matches!(only_end, CaptureIssue::MissingBegin { .. }));
    }

    #[test]
    fn test_unterminated_report() {
        let markers = ReportMarkers::default();
        let issue = extract_report("--- BEGIN JSON ---\n{\"modules\": [", &markers).unwrap_err();
        assert!(matches!(issue, CaptureIssue::Unterminated { .. }));
    }

    #[test]
    fn test_repeated_begin_restarts_block() {
        let markers = ReportMarkers::default();
        let output = "--- BEGIN JSON ---\n{\"trunc\n--- BEGIN JSON ---\n{\"modules\": []}\n--- END JSON ---\n";
        assert_eq!(extract_report(output, &markers).unwrap(), "{\"modules\": []}");
    }

    #[test]
    fn test_later_complete_block_wins() {
        let markers = ReportMarkers::default();
        let output = "--- BEGIN JSON ---\nfirst\n--- END JSON ---\n--- BEGIN JSON ---\nsecond\n--- END JSON ---\n";
        assert_eq!(extract_report(output, &markers).unwrap(), "second");

        let dangling = "--- BEGIN JSON ---\nfirst\n--- END JSON ---\n--- BEGIN JSON ---\npartial";
        assert_eq!(extract_report(dangling, &markers).unwrap(), "first");
    }

    #[test]
    fn test_empty_block_is_an_issue() {
        let markers = ReportMarkers::default();
        let issue = extract_report("--- BEGIN JSON ---\n\n--- END JSON ---\n", &markers).unwrap_err();
        assert_eq!(issue, CaptureIssue::Empty);
    }

    #[test]
    fn test_parse_captured_profile() {
        let markers = ReportMarkers::default();
        let stdout = serial_log(r#"{"modules": [{"name": "sum", "calls": 4, "total_cycles": 400}]}"#);
        let profile = parse_captured_profile(&stdout, "", "qemu", &markers).unwrap();
        assert_eq!(profile.total_cycles(), 400);
    }

    #[test]
    fn test_malformed_body_is_capture_error() {
        let markers = ReportMarkers::default();
        let stdout = serial_log("{\"modules\": [ {\"name\": ");
        let err = parse_captured_profile(&stdout, "warn", "qemu -serial stdio", &markers).unwrap_err();
        match err {
            ProfileError::CaptureFormat {
                issue,
                command,
                stderr,
                ..
            } => {
                assert!(matches!(issue, CaptureIssue::Malformed(_)));
                assert_eq!(command, "qemu -serial stdio");
                assert_eq!(stderr, "warn");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_body_is_capture_error() {
        let markers = ReportMarkers::default();
        let stdout = serial_log(r#"{"timestamp_cycles": 5}"#);
        let err = parse_captured_profile(&stdout, "", "qemu", &markers).unwrap_err();
        assert!(matches!(err, ProfileError::CaptureFormat { .. }));
    }
}
