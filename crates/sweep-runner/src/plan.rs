use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{Configuration, Query};
use crate::error::{Result, SweepError};
use crate::mutators::{self, Middleware};

/// A sweep described as data: a base configuration and the dimensions to
/// vary, first dimension outermost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepPlan {
    #[serde(default)]
    pub base: Configuration,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Dimension {
    Query { values: Vec<Query> },
    Coder { values: Vec<String> },
    Parallelism { values: Vec<u32> },
    ParallelismRange(Range),
    EventGenerators(Range),
    AvgPersonSize(Range),
    AvgAuctionSize(Range),
    AvgBidSize(Range),
    Repeat { times: usize },
    SwapFasterCopy,
    Timer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: u32,
    pub end: u32,
    pub step: u32,
}

impl Dimension {
    pub fn middleware<'a>(&self) -> Middleware<'a> {
        match self {
            Dimension::Query { values } => mutators::vary_query(values.clone()),
            Dimension::Coder { values } => mutators::vary_coder_strategy(values.clone()),
            Dimension::Parallelism { values } => mutators::use_parallelism(values.clone()),
            Dimension::ParallelismRange(r) => mutators::vary_parallelism(r.start, r.end, r.step),
            Dimension::EventGenerators(r) => {
                mutators::vary_event_generators(r.start, r.end, r.step)
            }
            Dimension::AvgPersonSize(r) => mutators::vary_avg_person_size(r.start, r.end, r.step),
            Dimension::AvgAuctionSize(r) => {
                mutators::vary_avg_auction_size(r.start, r.end, r.step)
            }
            Dimension::AvgBidSize(r) => mutators::vary_avg_bid_size(r.start, r.end, r.step),
            Dimension::Repeat { times } => mutators::repeat_runs(*times),
            Dimension::SwapFasterCopy => mutators::swap_faster_copy(),
            Dimension::Timer => mutators::timed(),
        }
    }
}

impl SweepPlan {
    /// Reads a plan from YAML, or JSON when the extension is `.json`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            return Ok(serde_json::from_str(&raw)?);
        }
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw)
            .map_err(|err| SweepError::InvalidSweep(format!("invalid sweep plan: {}", err)))
    }

    pub fn configurations(&self) -> Result<Vec<Configuration>> {
        mutators::materialize(&self.base, |terminal| {
            let middlewares = self.dimensions.iter().map(Dimension::middleware).collect();
            mutators::compose(middlewares, terminal)
        })
    }
}
