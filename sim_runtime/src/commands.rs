use std::fmt;

use serde::{Deserialize, Serialize};

/// Report kinds a driver can ask a unit to prepare on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportRequest {
    Sitrep,
    Intsum,
}

impl fmt::Display for ReportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportRequest::Sitrep => f.write_str("sitrep"),
            ReportRequest::Intsum => f.write_str("intsum"),
        }
    }
}

/// Commands accepted by the interactive driver loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum DriverCommand {
    /// Advance the world clock by `seconds`.
    Simulate { seconds: i64 },
    Save { name: Option<String> },
    Status,
    Cancel { unit: u64, task: u64 },
    Codeword { side: String, word: String },
    Report { unit: u64, kind: ReportRequest },
    Quit,
}

impl DriverCommand {
    pub fn verb(&self) -> &'static str {
        match self {
            DriverCommand::Simulate { .. } => "simulate",
            DriverCommand::Save { .. } => "save",
            DriverCommand::Status => "status",
            DriverCommand::Cancel { .. } => "cancel",
            DriverCommand::Codeword { .. } => "codeword",
            DriverCommand::Report { .. } => "report",
            DriverCommand::Quit => "quit",
        }
    }

    /// Whether executing the command advances or mutates world state.
    pub fn mutates_world(&self) -> bool {
        matches!(
            self,
            DriverCommand::Simulate { .. }
                | DriverCommand::Cancel { .. }
                | DriverCommand::Codeword { .. }
        )
    }
}
