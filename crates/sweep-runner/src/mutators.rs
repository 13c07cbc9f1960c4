//! Sweep combinators.
//!
//! A [`Mutator`] is invoked once per fully expanded configuration. A
//! [`Middleware`] wraps a mutator with one more dimension of variation, so
//! `outer(inner(terminal))` iterates `outer` slowest. Each step hands the
//! inner mutator its own clone of the configuration.

use std::fmt::Display;
use std::time::Instant;

use crate::config::{Configuration, Query};
use crate::error::{Result, SweepError};

pub type Mutator<'a> = Box<dyn FnMut(&Configuration) -> Result<()> + 'a>;
pub type Middleware<'a> = Box<dyn FnOnce(Mutator<'a>) -> Mutator<'a> + 'a>;

/// Folds `middlewares` around `terminal`, first element outermost.
pub fn compose<'a>(middlewares: Vec<Middleware<'a>>, terminal: Mutator<'a>) -> Mutator<'a> {
    middlewares
        .into_iter()
        .rev()
        .fold(terminal, |inner, middleware| middleware(inner))
}

/// Terminal mutator appending every configuration it sees to `out`.
pub fn materialize_into<'a>(out: &'a mut Vec<Configuration>) -> Mutator<'a> {
    Box::new(move |config: &Configuration| -> Result<()> {
        out.push(config.clone());
        Ok(())
    })
}

/// Expands `base` through the mutator chain built by `build` and returns the
/// configurations in visit order.
pub fn materialize<F>(base: &Configuration, build: F) -> Result<Vec<Configuration>>
where
    F: for<'a> FnOnce(Mutator<'a>) -> Mutator<'a>,
{
    let mut out = Vec::new();
    {
        let mut mutator = build(materialize_into(&mut out));
        mutator(base)?;
    }
    Ok(out)
}

pub fn vary_query<'a>(queries: Vec<Query>) -> Middleware<'a> {
    vary_list("query", queries, |config, query| config.query = query)
}

pub fn vary_coder_strategy<'a>(strategies: Vec<String>) -> Middleware<'a> {
    vary_list("coder", strategies, |config, coder| {
        config.coder_strategy = coder
    })
}

pub fn use_parallelism<'a>(values: Vec<u32>) -> Middleware<'a> {
    vary_list("parallelism", values, |config, parallelism| {
        config.parallelism = parallelism
    })
}

pub fn vary_parallelism<'a>(start: u32, end: u32, step: u32) -> Middleware<'a> {
    vary_range("parallelism", start, end, step, |config, parallelism| {
        config.parallelism = parallelism
    })
}

pub fn vary_event_generators<'a>(start: u32, end: u32, step: u32) -> Middleware<'a> {
    vary_range("num_event_generators", start, end, step, |config, n| {
        config.num_event_generators = Some(n)
    })
}

pub fn vary_avg_person_size<'a>(start: u32, end: u32, step: u32) -> Middleware<'a> {
    vary_range("avg_person_byte_size", start, end, step, |config, size| {
        config.avg_person_byte_size = Some(size)
    })
}

pub fn vary_avg_auction_size<'a>(start: u32, end: u32, step: u32) -> Middleware<'a> {
    vary_range("avg_auction_byte_size", start, end, step, |config, size| {
        config.avg_auction_byte_size = Some(size)
    })
}

pub fn vary_avg_bid_size<'a>(start: u32, end: u32, step: u32) -> Middleware<'a> {
    vary_range("avg_bid_byte_size", start, end, step, |config, size| {
        config.avg_bid_byte_size = Some(size)
    })
}

/// Invokes the inner mutator `times` times with the same configuration.
/// Every repeat is a separate run, not a duplicate.
pub fn repeat_runs<'a>(times: usize) -> Middleware<'a> {
    Box::new(move |mut inner: Mutator<'a>| -> Mutator<'a> {
        Box::new(move |config: &Configuration| -> Result<()> {
            for run in 0..times {
                let _span = tracing::debug_span!("repeat", run).entered();
                tracing::debug!("starting run");
                if let Err(err) = inner(config) {
                    tracing::debug!(error = %err, "sweep step failed");
                    return Err(err);
                }
            }
            Ok(())
        })
    })
}

/// Invokes the inner mutator with `faster_copy` false, then true.
pub fn swap_faster_copy<'a>() -> Middleware<'a> {
    vary_list("faster_copy", vec![false, true], |config, flag| {
        config.faster_copy = flag
    })
}

/// Logs the wall-clock time spent in the inner mutator.
pub fn timed<'a>() -> Middleware<'a> {
    Box::new(|mut inner: Mutator<'a>| -> Mutator<'a> {
        Box::new(move |config: &Configuration| -> Result<()> {
            let started = Instant::now();
            inner(config)?;
            tracing::debug!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "timer finished"
            );
            Ok(())
        })
    })
}

fn vary_list<'a, T>(
    dimension: &'static str,
    values: Vec<T>,
    apply: fn(&mut Configuration, T),
) -> Middleware<'a>
where
    T: Clone + Display + 'a,
{
    Box::new(move |mut inner: Mutator<'a>| -> Mutator<'a> {
        Box::new(move |config: &Configuration| -> Result<()> {
            for value in &values {
                let mut next = config.clone();
                apply(&mut next, value.clone());
                let _span = tracing::debug_span!("sweep", dimension, value = %value).entered();
                if let Err(err) = inner(&next) {
                    tracing::debug!(error = %err, "sweep step failed");
                    return Err(err);
                }
            }
            Ok(())
        })
    })
}

fn vary_range<'a>(
    dimension: &'static str,
    start: u32,
    end: u32,
    step: u32,
    apply: fn(&mut Configuration, u32),
) -> Middleware<'a> {
    Box::new(move |mut inner: Mutator<'a>| -> Mutator<'a> {
        Box::new(move |config: &Configuration| -> Result<()> {
            if step == 0 {
                return Err(SweepError::InvalidSweep(format!(
                    "{} range {}..{} has a zero step",
                    dimension, start, end
                )));
            }
            for value in steps(start, end, step) {
                let mut next = config.clone();
                apply(&mut next, value);
                let _span = tracing::debug_span!("sweep", dimension, value).entered();
                if let Err(err) = inner(&next) {
                    tracing::debug!(error = %err, "sweep step failed");
                    return Err(err);
                }
            }
            Ok(())
        })
    })
}

/// `start, start + step, ...` while strictly below `end`.
fn steps(start: u32, end: u32, step: u32) -> impl Iterator<Item = u32> {
    std::iter::successors(Some(start), move |v| v.checked_add(step)).take_while(move |v| *v < end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Configuration {
        Configuration {
            query: Query::CurrencyConversion,
            parallelism: 8,
            coder_strategy: "HAND".to_string(),
            ..Configuration::default()
        }
    }

    #[test]
    fn range_yields_values_strictly_below_end() {
        let configs =
            materialize(&base(), |t| vary_avg_bid_size(100, 1000, 100)(t)).expect("materialize");
        let sizes: Vec<u32> = configs
            .iter()
            .map(|c| c.avg_bid_byte_size.expect("size set"))
            .collect();
        assert_eq!(sizes, vec![100, 200, 300, 400, 500, 600, 700, 800, 900]);
    }

    #[test]
    fn empty_range_yields_nothing() {
        let configs =
            materialize(&base(), |t| vary_event_generators(100, 100, 10)(t)).expect("materialize");
        assert!(configs.is_empty());
        let configs =
            materialize(&base(), |t| vary_parallelism(8, 2, 1)(t)).expect("materialize");
        assert!(configs.is_empty());
    }

    #[test]
    fn zero_step_is_rejected() {
        let err = materialize(&base(), |t| vary_avg_person_size(1, 10, 0)(t))
            .expect_err("zero step must fail");
        assert!(matches!(err, SweepError::InvalidSweep(_)), "{}", err);
    }

    #[test]
    fn nested_dimensions_multiply_and_outer_varies_slowest() {
        let configs = materialize(&base(), |t| {
            use_parallelism(vec![1, 2, 4])(vary_coder_strategy(vec![
                "HAND".to_string(),
                "AVRO".to_string(),
            ])(swap_faster_copy()(t)))
        })
        .expect("materialize");
        assert_eq!(configs.len(), 3 * 2 * 2);
        assert_eq!(configs[0].parallelism, 1);
        assert_eq!(configs[3].parallelism, 1);
        assert_eq!(configs[4].parallelism, 2);
        assert_eq!(configs[0].coder_strategy, "HAND");
        assert_eq!(configs[2].coder_strategy, "AVRO");
        let flags: Vec<bool> = configs.iter().take(4).map(|c| c.faster_copy).collect();
        assert_eq!(flags, vec![false, true, false, true]);
    }

    #[test]
    fn empty_list_dimension_empties_the_whole_sweep() {
        let configs = materialize(&base(), |t| {
            repeat_runs(3)(vary_query(Vec::new())(swap_faster_copy()(t)))
        })
        .expect("materialize");
        assert!(configs.is_empty());
    }

    #[test]
    fn list_then_repeat_keeps_repeats_adjacent() {
        let configs = materialize(&base(), |t| {
            vary_coder_strategy(vec!["A".to_string(), "B".to_string()])(repeat_runs(2)(t))
        })
        .expect("materialize");
        let coders: Vec<&str> = configs.iter().map(|c| c.coder_strategy.as_str()).collect();
        assert_eq!(coders, vec!["A", "A", "B", "B"]);
        assert_eq!(configs[0], configs[1]);
    }

    #[test]
    fn toggle_emits_false_before_true_for_each_inner_call() {
        let configs = materialize(&base(), |t| repeat_runs(2)(swap_faster_copy()(t)))
            .expect("materialize");
        let flags: Vec<bool> = configs.iter().map(|c| c.faster_copy).collect();
        assert_eq!(flags, vec![false, true, false, true]);
    }

    #[test]
    fn later_steps_do_not_leak_into_earlier_configurations() {
        let configs = materialize(&base(), |t| {
            vary_query(vec![Query::Selection, Query::HotItems])(vary_avg_person_size(
                100, 300, 100,
            )(t))
        })
        .expect("materialize");
        assert_eq!(configs.len(), 4);
        assert_eq!(configs[0].query, Query::Selection);
        assert_eq!(configs[0].avg_person_byte_size, Some(100));
        assert_eq!(configs[1].avg_person_byte_size, Some(200));
        assert_eq!(configs[2].query, Query::HotItems);
        assert_eq!(configs[2].avg_person_byte_size, Some(100));
        assert_eq!(configs[0].avg_auction_byte_size, None);
    }

    #[test]
    fn compose_matches_hand_nesting() {
        let by_hand = materialize(&base(), |t| {
            use_parallelism(vec![2, 4])(swap_faster_copy()(repeat_runs(2)(t)))
        })
        .expect("by hand");
        let composed = materialize(&base(), |t| {
            compose(
                vec![use_parallelism(vec![2, 4]), swap_faster_copy(), repeat_runs(2)],
                t,
            )
        })
        .expect("composed");
        assert_eq!(by_hand, composed);
    }

    #[test]
    fn inner_failure_stops_iteration_and_propagates_unchanged() {
        let mut seen = Vec::new();
        let err = {
            let failing: Mutator<'_> = Box::new(|config: &Configuration| -> Result<()> {
                seen.push(config.parallelism);
                if config.parallelism == 2 {
                    return Err(SweepError::InvalidSweep("boom".to_string()));
                }
                Ok(())
            });
            let mut mutator = use_parallelism(vec![1, 2, 3])(timed()(failing));
            let err = mutator(&base()).expect_err("must fail");
            err
        };
        assert_eq!(seen, vec![1, 2]);
        match err {
            SweepError::InvalidSweep(msg) => assert_eq!(msg, "boom"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn timer_is_transparent_on_success() {
        let plain = materialize(&base(), |t| repeat_runs(3)(t)).expect("plain");
        let timed_configs = materialize(&base(), |t| timed()(repeat_runs(3)(t))).expect("timed");
        assert_eq!(plain, timed_configs);
    }
}
