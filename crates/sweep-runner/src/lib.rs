//! Resumable benchmark sweeps.
//!
//! A sweep is declared by nesting combinators from [`mutators`] around a
//! materializer, stored as a named series in a [`SeriesStore`], and driven
//! to completion by a [`SeriesRunner`] that skips every run already recorded.

pub mod battery;
pub mod config;
pub mod error;
pub mod export;
pub mod mutators;
pub mod nexmark;
pub mod plan;
pub mod run;
pub mod runner;
pub mod store;

pub use battery::Battery;
pub use config::{
    Configuration, Query, DEFAULT_AVG_AUCTION_BYTE_SIZE, DEFAULT_AVG_BID_BYTE_SIZE,
    DEFAULT_AVG_PERSON_BYTE_SIZE, MAX_EVENTS,
};
pub use error::{Result, SweepError};
pub use export::{write_jsonl, write_jsonl_file};
pub use mutators::{compose, materialize, materialize_into, Middleware, Mutator};
pub use nexmark::{GradleExecutor, NexmarkDecoder, NexmarkResult, ToolPaths};
pub use plan::{Dimension, SweepPlan};
pub use run::{Run, RunExtra, RunResult, RunStatus};
pub use runner::{DecodeError, Decoder, Execution, Executor, RunSummary, SeriesRunner};
pub use store::{plan_digest, SeriesInfo, SeriesStore};
