use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::engine::{SimulationContext, run_trial};
use super::error::ConfigError;
use super::sampler::derive_seed;
use super::tax::{RmdTableProvider, TaxDataProvider};
use super::types::{
    BatchResult, Scenario, Termination, TrialError, TrialErrorKind, TrialOutcome,
};
use super::validation::validate_scenario;

pub const DEFAULT_TRIALS: u32 = 1_000;
pub const DEFAULT_SEED: u64 = 42;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchConfig {
    pub trials: u32,
    pub workers: usize,
    pub seed: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            trials: DEFAULT_TRIALS,
            workers: default_workers(),
            seed: DEFAULT_SEED,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trials == 0 {
            return Err(ConfigError::InvalidBatch("trials must be > 0".to_string()));
        }
        if self.workers == 0 {
            return Err(ConfigError::InvalidBatch("workers must be > 0".to_string()));
        }
        Ok(())
    }
}

pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(4)
}

pub async fn run_batch(
    scenario: Arc<Scenario>,
    tax: &dyn TaxDataProvider,
    rmd_tables: Arc<dyn RmdTableProvider>,
    config: BatchConfig,
) -> Result<BatchResult, ConfigError> {
    config.validate()?;
    validate_scenario(&scenario)?;
    let tax_data = tax.tax_data(scenario.residence_state.as_deref())?;
    let ctx = Arc::new(SimulationContext::new(tax_data, rmd_tables));

    info!(
        scenario = %scenario.name,
        trials = config.trials,
        workers = config.workers,
        seed = config.seed,
        "batch started"
    );

    let semaphore = Arc::new(Semaphore::new(config.workers));
    let mut tasks = JoinSet::new();
    for trial_id in 0..config.trials {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ConfigError::InvalidBatch("worker pool closed".to_string()))?;
        let trial_scenario = Scenario::clone(&scenario);
        let ctx = Arc::clone(&ctx);
        let seed = derive_seed(config.seed, trial_id);
        tasks.spawn_blocking(move || {
            let outcome = run_trial(trial_id, seed, trial_scenario, &ctx);
            drop(permit);
            outcome
        });
    }

    let mut slots: Vec<Option<TrialOutcome>> = (0..config.trials).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => {
                let idx = outcome.trial_id() as usize;
                slots[idx] = Some(outcome);
            }
            Err(err) => warn!(error = %err, "trial worker failed"),
        }
    }

    let outcomes: Vec<TrialOutcome> = slots
        .into_iter()
        .enumerate()
        .map(|(idx, slot)| {
            slot.unwrap_or_else(|| {
                let trial_id = idx as u32;
                TrialOutcome::Errored(TrialError {
                    trial_id,
                    seed: derive_seed(config.seed, trial_id),
                    kind: TrialErrorKind::Fault,
                    message: "trial worker stopped without reporting".to_string(),
                    context: "worker".to_string(),
                    years_completed: 0,
                    backtrace: None,
                })
            })
        })
        .collect();

    let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
    let insolvent = outcomes
        .iter()
        .filter(|o| {
            matches!(
                o,
                TrialOutcome::Finished(run) if matches!(run.termination, Termination::Insolvent { .. })
            )
        })
        .count();
    let errored = outcomes
        .iter()
        .filter(|o| matches!(o, TrialOutcome::Errored(_)))
        .count();
    info!(
        trials = outcomes.len(),
        succeeded,
        insolvent,
        errored,
        "batch finished"
    );

    Ok(BatchResult { outcomes })
}
