use std::collections::BTreeMap;

use serde::Serialize;

use super::types::{BatchResult, Termination, TrialOutcome};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearSummary {
    pub year: i32,
    /// Trials whose trajectory contains this year.
    pub trials_reached: usize,
    /// Share of all trials that reached this year with total assets at or
    /// above the goal. Errored and insolvent trials count as misses.
    pub success_probability: f64,
    pub p10_total: f64,
    pub median_total: f64,
    pub p90_total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub trials: usize,
    pub succeeded: usize,
    pub completed: usize,
    pub insolvent: usize,
    pub errored: usize,
    pub success_rate: f64,
    pub years: Vec<YearSummary>,
}

pub fn summarize_batch(batch: &BatchResult, financial_goal: f64) -> BatchSummary {
    let trials = batch.outcomes.len();
    let mut succeeded = 0;
    let mut completed = 0;
    let mut insolvent = 0;
    let mut errored = 0;
    let mut totals: BTreeMap<i32, Vec<f64>> = BTreeMap::new();

    for outcome in &batch.outcomes {
        match outcome {
            TrialOutcome::Finished(run) => {
                match run.termination {
                    Termination::Completed => completed += 1,
                    Termination::Insolvent { .. } => insolvent += 1,
                }
                if run.success {
                    succeeded += 1;
                }
            }
            TrialOutcome::Errored(_) => errored += 1,
        }
        for year in outcome.trajectory() {
            totals.entry(year.year).or_default().push(year.total_assets());
        }
    }

    let years = totals
        .into_iter()
        .map(|(year, mut values)| {
            let met = values.iter().filter(|v| **v >= financial_goal).count();
            YearSummary {
                year,
                trials_reached: values.len(),
                success_probability: ratio(met, trials),
                p10_total: percentile(&mut values, 10.0),
                median_total: percentile(&mut values, 50.0),
                p90_total: percentile(&mut values, 90.0),
            }
        })
        .collect();

    BatchSummary {
        trials,
        succeeded,
        completed,
        insolvent,
        errored,
        success_rate: ratio(succeeded, trials),
        years,
    }
}

fn ratio(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

/// Linear-interpolated percentile; sorts `values` in place.
pub(crate) fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}
