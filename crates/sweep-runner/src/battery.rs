use std::fmt;
use std::str::FromStr;

use crate::config::{Configuration, Query, DEFAULT_AVG_BID_BYTE_SIZE, MAX_EVENTS};
use crate::error::Result;
use crate::mutators::{
    materialize, repeat_runs, swap_faster_copy, timed, use_parallelism, vary_avg_bid_size,
    vary_coder_strategy, vary_query,
};

const REPEATS: usize = 10;

/// Built-in sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Battery {
    /// Every query against every coder strategy.
    Battery03,
    /// How the copy-mode difference moves as parallelism grows.
    Battery04,
    /// How the copy-mode difference moves as bids grow.
    Battery05,
}

impl Battery {
    pub const ALL: [Battery; 3] = [Battery::Battery03, Battery::Battery04, Battery::Battery05];

    pub fn name(&self) -> &'static str {
        match self {
            Battery::Battery03 => "battery03",
            Battery::Battery04 => "battery04",
            Battery::Battery05 => "battery05",
        }
    }

    pub fn configurations(&self) -> Result<Vec<Configuration>> {
        match self {
            Battery::Battery03 => battery03(),
            Battery::Battery04 => battery04(),
            Battery::Battery05 => battery05(),
        }
    }
}

impl fmt::Display for Battery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Battery {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Battery::ALL
            .iter()
            .find(|b| b.name() == s)
            .copied()
            .ok_or_else(|| {
                let known: Vec<&str> = Battery::ALL.iter().map(|b| b.name()).collect();
                format!("unknown battery '{}' (expected one of {})", s, known.join(", "))
            })
    }
}

fn battery03() -> Result<Vec<Configuration>> {
    let mut base = Configuration {
        num_events: Some(MAX_EVENTS),
        parallelism: 2,
        ..Configuration::default()
    };
    let mut configs = Vec::new();
    for query in Query::ALL {
        base.query = query;
        let coders: Vec<String> = if query == Query::LocalItemSuggestion {
            vec!["HAND".into(), "AVRO".into()]
        } else {
            vec!["HAND".into(), "AVRO".into(), "JAVA".into()]
        };
        configs.extend(materialize(&base, |t| {
            vary_coder_strategy(coders)(swap_faster_copy()(repeat_runs(REPEATS)(timed()(t))))
        })?);
    }
    Ok(configs)
}

fn battery04() -> Result<Vec<Configuration>> {
    let base = Configuration {
        num_events: Some(MAX_EVENTS * 5),
        coder_strategy: "HAND".to_string(),
        ..Configuration::default()
    };
    materialize(&base, |t| {
        use_parallelism(vec![1, 2, 4, 8])(vary_query(Query::NORMAL.to_vec())(swap_faster_copy()(
            repeat_runs(REPEATS)(t),
        )))
    })
}

fn battery05() -> Result<Vec<Configuration>> {
    let base = Configuration {
        num_events: Some(MAX_EVENTS * 5),
        coder_strategy: "HAND".to_string(),
        parallelism: 8,
        query: Query::CurrencyConversion,
        ..Configuration::default()
    };
    materialize(&base, |t| {
        vary_avg_bid_size(
            DEFAULT_AVG_BID_BYTE_SIZE,
            10 * DEFAULT_AVG_BID_BYTE_SIZE,
            DEFAULT_AVG_BID_BYTE_SIZE,
        )(swap_faster_copy()(repeat_runs(REPEATS)(t)))
    })
}
