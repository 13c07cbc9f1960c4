use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    #[serde(rename = "NOT_RUN")]
    NotRun,
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERR")]
    Err,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::NotRun => "NOT_RUN",
            RunStatus::Ok => "OK",
            RunStatus::Err => "ERR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::NotRun)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "NOT_RUN" => Ok(RunStatus::NotRun),
            "OK" => Ok(RunStatus::Ok),
            "ERR" => Ok(RunStatus::Err),
            other => Err(format!("unknown run status: {}", other)),
        }
    }
}

/// Settings a result needs next to its metrics to be interpreted later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunExtra {
    pub faster_copy: bool,
    pub parallelism: u32,
}

/// Decoded output of a successful run, stored verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub metrics: Value,
    pub extra: RunExtra,
}

/// Execution record of one configuration within a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub series: String,
    pub index: usize,
    pub status: RunStatus,
    pub result: Option<RunResult>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl Run {
    pub(crate) fn not_run(series: &str, index: usize) -> Self {
        Self {
            series: series.to_string(),
            index,
            status: RunStatus::NotRun,
            result: None,
            stdout: None,
            stderr: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_tags_match_storage_strings() {
        for status in [RunStatus::NotRun, RunStatus::Ok, RunStatus::Err] {
            let encoded = serde_json::to_value(status).expect("encode");
            assert_eq!(encoded.as_str(), Some(status.as_str()));
            assert_eq!(status.as_str().parse::<RunStatus>().expect("parse"), status);
        }
        assert!("DONE".parse::<RunStatus>().is_err());
    }

    #[test]
    fn only_not_run_is_non_terminal() {
        assert!(!RunStatus::NotRun.is_terminal());
        assert!(RunStatus::Ok.is_terminal());
        assert!(RunStatus::Err.is_terminal());
    }
}
