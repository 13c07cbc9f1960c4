use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::Configuration;
use crate::error::{Result, SweepError};
use crate::run::{RunResult, RunStatus};
use crate::store::SeriesStore;

/// Captured output of one benchmark invocation. `outcome` is `Err` when the
/// job itself failed; the output is kept either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub outcome: std::result::Result<(), String>,
}

pub trait Executor {
    fn execute(&mut self, config: &Configuration) -> Execution;
}

impl<F> Executor for F
where
    F: FnMut(&Configuration) -> Execution,
{
    fn execute(&mut self, config: &Configuration) -> Execution {
        self(config)
    }
}

pub type DecodeError = Box<dyn std::error::Error + Send + Sync>;

pub trait Decoder {
    fn decode(
        &mut self,
        config: &Configuration,
        stdout: &[u8],
    ) -> std::result::Result<RunResult, DecodeError>;
}

impl<F> Decoder for F
where
    F: FnMut(&Configuration, &[u8]) -> std::result::Result<RunResult, DecodeError>,
{
    fn decode(
        &mut self,
        config: &Configuration,
        stdout: &[u8],
    ) -> std::result::Result<RunResult, DecodeError> {
        self(config, stdout)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Drives a stored series to completion, one run at a time.
pub struct SeriesRunner<'s, E, D> {
    store: &'s mut SeriesStore,
    executor: E,
    decoder: D,
}

impl<'s, E, D> SeriesRunner<'s, E, D>
where
    E: Executor,
    D: Decoder,
{
    pub fn new(store: &'s mut SeriesStore, executor: E, decoder: D) -> Self {
        Self {
            store,
            executor,
            decoder,
        }
    }

    /// Executes every run of `key` still in `NOT_RUN`, in index order.
    ///
    /// A failed execution is recorded as `ERR` and the series moves on. A
    /// decode or storage failure aborts the call and leaves the current run
    /// `NOT_RUN`, so calling again resumes from it.
    pub fn run_series(&mut self, key: &str) -> Result<RunSummary> {
        let configs = self.store.series_configurations(key)?;
        let mut summary = RunSummary {
            total: configs.len(),
            ..RunSummary::default()
        };

        for (index, config) in configs.iter().enumerate() {
            let status = self.store.run_status(key, index)?;
            if status.is_terminal() {
                tracing::debug!(series_key = key, index, %status, "skipping finished run");
                summary.skipped += 1;
                continue;
            }

            match self.run_one(key, index, config)? {
                RunStatus::Ok => summary.succeeded += 1,
                _ => summary.failed += 1,
            }
        }

        tracing::info!(
            series_key = key,
            total = summary.total,
            skipped = summary.skipped,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "series finished"
        );
        Ok(summary)
    }

    fn run_one(&mut self, key: &str, index: usize, config: &Configuration) -> Result<RunStatus> {
        let _span = tracing::info_span!(
            "run",
            series_key = key,
            index,
            query = %config.query,
            parallelism = config.parallelism,
            coder = %config.coder_strategy,
            faster_copy = config.faster_copy
        )
        .entered();
        tracing::info!("running benchmark");
        let started = Instant::now();
        let execution = self.executor.execute(config);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if let Err(err) = &execution.outcome {
            tracing::error!(error = %err, elapsed_ms, "benchmark failed");
            self.store.record_run_outcome(
                key,
                index,
                RunStatus::Err,
                &execution.stdout,
                &execution.stderr,
                None,
            )?;
            return Ok(RunStatus::Err);
        }

        let result = self
            .decoder
            .decode(config, &execution.stdout)
            .map_err(|source| SweepError::Decode { index, source })?;
        self.store.record_run_outcome(
            key,
            index,
            RunStatus::Ok,
            &execution.stdout,
            &execution.stderr,
            Some(&result),
        )?;
        tracing::info!(elapsed_ms, "benchmark finished");
        Ok(RunStatus::Ok)
    }
}
