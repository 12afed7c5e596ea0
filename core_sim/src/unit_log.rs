//! Per-unit log buffers, flushed as JSON lines during the WriteLogs phase.

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::resources::SimTime;

pub const DEFAULT_TAIL: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEnvelope {
    pub timestamp: SimTime,
    pub level: LogLevel,
    pub target: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "map_is_empty")]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Records waiting for the next flush plus a bounded tail of recent ones.
#[derive(Debug, Clone)]
pub struct UnitLog {
    pending: Vec<LogEnvelope>,
    tail: VecDeque<LogEnvelope>,
    tail_limit: usize,
}

impl Default for UnitLog {
    fn default() -> Self {
        Self::with_tail(DEFAULT_TAIL)
    }
}

impl UnitLog {
    pub fn with_tail(tail_limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            tail: VecDeque::with_capacity(tail_limit.min(256)),
            tail_limit,
        }
    }

    pub fn set_tail_limit(&mut self, limit: usize) {
        self.tail_limit = limit;
        while self.tail.len() > limit {
            self.tail.pop_front();
        }
    }

    pub fn push(
        &mut self,
        timestamp: SimTime,
        level: LogLevel,
        target: &str,
        message: impl Into<String>,
        fields: serde_json::Map<String, serde_json::Value>,
    ) {
        let envelope = LogEnvelope {
            timestamp,
            level,
            target: target.to_string(),
            message: message.into(),
            fields,
        };
        if self.tail_limit > 0 {
            if self.tail.len() == self.tail_limit {
                self.tail.pop_front();
            }
            self.tail.push_back(envelope.clone());
        }
        self.pending.push(envelope);
    }

    pub fn info(&mut self, timestamp: SimTime, target: &str, message: impl Into<String>) {
        self.push(timestamp, LogLevel::Info, target, message, serde_json::Map::new());
    }

    pub fn warn(&mut self, timestamp: SimTime, target: &str, message: impl Into<String>) {
        self.push(timestamp, LogLevel::Warn, target, message, serde_json::Map::new());
    }

    pub fn tail(&self) -> impl Iterator<Item = &LogEnvelope> {
        self.tail.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Append pending records to `path` as JSON lines.
    pub fn flush_to(&mut self, path: &Path) -> io::Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut written = 0;
        for envelope in &self.pending {
            let line = serde_json::to_string(envelope)?;
            writeln!(file, "{line}")?;
            written += 1;
        }
        self.pending.clear();
        Ok(written)
    }

    /// Drop pending records without writing them.
    pub fn discard_pending(&mut self) {
        self.pending.clear();
    }
}

/// `<log_dir>/<side>/<safe-name>.log`
pub fn log_path(log_dir: &Path, side: &str, safe_name: &str) -> PathBuf {
    log_dir.join(side).join(format!("{safe_name}.log"))
}

fn map_is_empty(map: &serde_json::Map<String, serde_json::Value>) -> bool {
    map.is_empty()
}
