//! Scan verdicts and the tag they are recorded under.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default name of the object tag that carries the verdict.
pub const DEFAULT_SCAN_TAG_NAME: &str = "scan-status";

/// Verdict recorded on a scanned object.
///
/// The string form is the literal tag value. Bucket policies and tag-change
/// subscribers match on it, so the names must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    /// Scan completed and found nothing.
    Clean,
    /// Scan completed and found malware.
    Infected,
    /// Object was larger than the configured ceiling and was not scanned.
    FileSizeExceeded,
    /// Scan is in progress.
    Scanning,
    /// Scan could not produce a verdict.
    Error,
}

impl ScanStatus {
    /// Literal tag value for this verdict.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Clean => "CLEAN",
            ScanStatus::Infected => "INFECTED",
            ScanStatus::FileSizeExceeded => "FILE_SIZE_EXCEEDED",
            ScanStatus::Scanning => "SCANNING",
            ScanStatus::Error => "ERROR",
        }
    }

    /// Map a clamscan exit status to a verdict.
    ///
    /// clamscan exits 0 when nothing was found and 1 when a signature
    /// matched. Every other code, and termination by signal (`None`), is an
    /// error.
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => ScanStatus::Clean,
            Some(1) => ScanStatus::Infected,
            _ => ScanStatus::Error,
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a tag value is not a known verdict.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown scan status `{0}`")]
pub struct UnknownStatus(pub String);

impl FromStr for ScanStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLEAN" => Ok(ScanStatus::Clean),
            "INFECTED" => Ok(ScanStatus::Infected),
            "FILE_SIZE_EXCEEDED" => Ok(ScanStatus::FileSizeExceeded),
            "SCANNING" => Ok(ScanStatus::Scanning),
            "ERROR" => Ok(ScanStatus::Error),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}
