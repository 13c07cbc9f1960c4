//! Gradle-driven Nexmark executions and decoding of their results file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Configuration;
use crate::run::{RunExtra, RunResult};
use crate::runner::{DecodeError, Decoder, Execution, Executor};

const FLINK_RUNNER_PROJECT: &str = ":runners:flink:1.10";
const NEXMARK_TASK: &str = ":sdks:java:testing:nexmark:run";

/// Locations of the external tooling, passed in rather than compiled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPaths {
    pub gradle: PathBuf,
    pub beam_dir: PathBuf,
    /// Where the job writes its JavaScript results file.
    pub results_js: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Snapshot {
    pub num_events: i64,
    pub num_results: i64,
    pub runtime_sec: f64,
    pub sec_since_start: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Perf {
    pub errors: Vec<Value>,
    pub event_bytes_per_sec: f64,
    pub events_per_sec: f64,
    pub job_id: Value,
    pub num_events: i64,
    pub num_results: i64,
    pub processing_delay_sec: f64,
    pub result_bytes_per_sec: f64,
    pub results_per_sec: f64,
    pub runtime_sec: f64,
    pub shutdown_delay_sec: f64,
    pub snapshots: Vec<Snapshot>,
    pub startup_delay_sec: f64,
    pub time_dilation: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NexmarkResult {
    pub config: Value,
    pub perf: Perf,
}

/// Pipeline options handed to the Nexmark launcher. Overrides absent from
/// the configuration are left out so the launcher's defaults apply.
pub fn nexmark_args(config: &Configuration, results_js: &Path) -> Vec<String> {
    let mut args = vec![
        "--runner=FlinkRunner".to_string(),
        "--streaming".to_string(),
        "--streamTimeout=60".to_string(),
        "--manageResources=false".to_string(),
        "--monitorJobs=true".to_string(),
        "--debug=true".to_string(),
        format!("--flinkMaster={}", config.flink_master),
        format!("--query={}", config.query),
        format!("--javascriptFilename={}", results_js.display()),
        format!("--fasterCopy={}", config.faster_copy),
        format!("--parallelism={}", config.parallelism),
    ];
    if let Some(n) = config.num_events {
        args.push(format!("--numEvents={}", n));
    }
    if let Some(n) = config.num_event_generators {
        args.push(format!("--numEventGenerators={}", n));
    }
    if !config.coder_strategy.is_empty() {
        args.push(format!("--coderStrategy={}", config.coder_strategy));
    }
    if let Some(size) = config.avg_person_byte_size {
        args.push(format!("--avgPersonByteSize={}", size));
    }
    if let Some(size) = config.avg_auction_byte_size {
        args.push(format!("--avgAuctionByteSize={}", size));
    }
    if let Some(size) = config.avg_bid_byte_size {
        args.push(format!("--avgBidByteSize={}", size));
    }
    args
}

pub fn gradle_args(config: &Configuration, paths: &ToolPaths) -> Vec<String> {
    vec![
        "-p".to_string(),
        paths.beam_dir.display().to_string(),
        format!("-Pnexmark.runner={}", FLINK_RUNNER_PROJECT),
        format!(
            "-Pnexmark.args={}",
            nexmark_args(config, &paths.results_js).join("\n")
        ),
        NEXMARK_TASK.to_string(),
    ]
}

pub struct GradleExecutor {
    paths: ToolPaths,
}

impl GradleExecutor {
    pub fn new(paths: ToolPaths) -> Self {
        Self { paths }
    }
}

impl Executor for GradleExecutor {
    fn execute(&mut self, config: &Configuration) -> Execution {
        // A results file left by an earlier job must not pass for this one.
        if let Err(err) = remove_if_exists(&self.paths.results_js) {
            return Execution {
                stdout: Vec::new(),
                stderr: Vec::new(),
                outcome: Err(format!(
                    "failed to clear {}: {}",
                    self.paths.results_js.display(),
                    err
                )),
            };
        }
        let mut cmd = Command::new(&self.paths.gradle);
        cmd.args(gradle_args(config, &self.paths));
        tracing::debug!(gradle = %self.paths.gradle.display(), "spawning gradle");
        match cmd.output() {
            Ok(output) => {
                let outcome = if output.status.success() {
                    Ok(())
                } else {
                    Err(format!("gradle exited with {}", output.status))
                };
                Execution {
                    stdout: output.stdout,
                    stderr: output.stderr,
                    outcome,
                }
            }
            Err(err) => Execution {
                stdout: Vec::new(),
                stderr: Vec::new(),
                outcome: Err(format!(
                    "failed to spawn {}: {}",
                    self.paths.gradle.display(),
                    err
                )),
            },
        }
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Reads the results file the job wrote and pairs its single entry with the
/// copy mode and parallelism the run used.
pub struct NexmarkDecoder {
    results_js: PathBuf,
}

impl NexmarkDecoder {
    pub fn new(results_js: PathBuf) -> Self {
        Self { results_js }
    }
}

impl Decoder for NexmarkDecoder {
    fn decode(
        &mut self,
        config: &Configuration,
        _stdout: &[u8],
    ) -> std::result::Result<RunResult, DecodeError> {
        let source = fs::read_to_string(&self.results_js).map_err(|err| {
            format!(
                "failed to read results file {}: {}",
                self.results_js.display(),
                err
            )
        })?;
        let mut entries = extract_results(&source)?;
        if entries.len() != 1 {
            return Err(format!("expected exactly one result, found {}", entries.len()).into());
        }
        let result = entries.remove(0);
        Ok(RunResult {
            metrics: serde_json::to_value(&result)?,
            extra: RunExtra {
                faster_copy: config.faster_copy,
                parallelism: config.parallelism,
            },
        })
    }
}

/// Parses the array assigned to `all` in a Nexmark JavaScript results file.
/// Non-finite rates (`NaN`, `Infinity`, `-Infinity`) decode as such.
pub fn extract_results(source: &str) -> std::result::Result<Vec<NexmarkResult>, DecodeError> {
    let start = find_all_assignment(source).ok_or("results file has no `all` array")?;
    let literal =
        array_literal(&source[start..]).ok_or("results file has an unterminated `all` array")?;
    Ok(json5::from_str(literal)?)
}

fn find_all_assignment(source: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(pos) = source[from..].find("all") {
        let at = from + pos;
        from = at + 3;
        let before_ok = source[..at]
            .chars()
            .next_back()
            .map_or(true, |c| !is_ident_char(c));
        let rest = source[from..].trim_start();
        if before_ok && rest.starts_with('=') && !rest.starts_with("==") {
            let after_eq = &rest[1..];
            let bracket = after_eq.find('[')?;
            if after_eq[..bracket].trim().is_empty() {
                return Some(source.len() - after_eq.len() + bracket);
            }
        }
    }
    None
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// The bracketed literal `src` starts with, up to its matching `]`.
fn array_literal(src: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in src.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&src[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
