use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once};

use tracing::{debug, warn};

use super::error::{ConfigError, StageError};
use super::sampler::trial_rng;
use super::stages::{Stage, run_year};
use super::state::TrialState;
use super::tax::{RmdTableProvider, TaxData};
use super::types::{
    Scenario, Termination, TrialError, TrialErrorKind, TrialOutcome, TrialRun, YearlyResult,
};

#[derive(Clone)]
pub struct SimulationContext {
    pub tax_data: TaxData,
    pub rmd_tables: Arc<dyn RmdTableProvider>,
}

impl SimulationContext {
    pub fn new(tax_data: TaxData, rmd_tables: Arc<dyn RmdTableProvider>) -> Self {
        Self {
            tax_data,
            rmd_tables,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum TrialPhase {
    Initializing,
    Running(i32),
    Completed,
    Failed,
}

#[derive(Debug)]
struct Progress {
    phase: TrialPhase,
    stage: Option<Stage>,
    years_completed: usize,
}

impl Progress {
    fn new() -> Self {
        Self {
            phase: TrialPhase::Initializing,
            stage: None,
            years_completed: 0,
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.phase, self.stage) {
            (TrialPhase::Initializing, _) => f.write_str("initialization"),
            (TrialPhase::Running(year), Some(stage)) => write!(f, "year {year}, stage {stage}"),
            (TrialPhase::Running(year), None) => write!(f, "year {year}"),
            (TrialPhase::Completed, _) => f.write_str("completed"),
            (TrialPhase::Failed, _) => f.write_str("failed"),
        }
    }
}

struct Simulated {
    termination: Termination,
    trajectory: Vec<YearlyResult>,
    final_net_worth: f64,
    financial_goal: f64,
}

thread_local! {
    static IN_TRIAL: Cell<bool> = const { Cell::new(false) };
    static FAULT_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static FAULT_HOOK: Once = Once::new();

// Panics inside a trial record a backtrace instead of printing; any other
// panic goes to the previous hook.
fn install_fault_hook() {
    FAULT_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if IN_TRIAL.with(Cell::get) {
                let trace = Backtrace::force_capture().to_string();
                FAULT_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            } else {
                previous(info);
            }
        }));
    });
}

pub fn run_trial(
    trial_id: u32,
    seed: u64,
    scenario: Scenario,
    ctx: &SimulationContext,
) -> TrialOutcome {
    install_fault_hook();
    let mut progress = Progress::new();
    FAULT_TRACE.with(|slot| slot.borrow_mut().take());
    IN_TRIAL.with(|flag| flag.set(true));
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        simulate(scenario, seed, ctx, &mut progress)
    }));
    IN_TRIAL.with(|flag| flag.set(false));

    match result {
        Ok(Ok(simulated)) => {
            let success = simulated.termination == Termination::Completed
                && simulated.final_net_worth >= simulated.financial_goal;
            if let Termination::Insolvent { year, shortfall } = simulated.termination {
                warn!(trial_id, year, shortfall, "trial insolvent");
            }
            debug!(
                trial_id,
                seed,
                years = simulated.trajectory.len(),
                success,
                "trial finished"
            );
            TrialOutcome::Finished(TrialRun {
                trial_id,
                seed,
                success,
                termination: simulated.termination,
                trajectory: simulated.trajectory,
            })
        }
        Ok(Err(err)) => {
            warn!(trial_id, context = %progress, error = %err, "trial configuration error");
            TrialOutcome::Errored(TrialError {
                trial_id,
                seed,
                kind: TrialErrorKind::Configuration,
                message: err.to_string(),
                context: progress.to_string(),
                years_completed: progress.years_completed,
                backtrace: None,
            })
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            let backtrace = FAULT_TRACE.with(|slot| slot.borrow_mut().take());
            warn!(trial_id, context = %progress, %message, "trial fault");
            debug!(trial_id, backtrace = backtrace.as_deref().unwrap_or(""), "trial fault backtrace");
            TrialOutcome::Errored(TrialError {
                trial_id,
                seed,
                kind: TrialErrorKind::Fault,
                message,
                context: progress.to_string(),
                years_completed: progress.years_completed,
                backtrace,
            })
        }
    }
}

fn simulate(
    scenario: Scenario,
    seed: u64,
    ctx: &SimulationContext,
    progress: &mut Progress,
) -> Result<Simulated, ConfigError> {
    let financial_goal = scenario.financial_goal;
    let mut state = TrialState::new(scenario, ctx.tax_data.clone(), trial_rng(seed))?;
    let first_year = state.year;
    let final_year = state.final_year();
    let mut trajectory = Vec::with_capacity((final_year - first_year + 1).max(0) as usize);

    for year in first_year..=final_year {
        progress.phase = TrialPhase::Running(year);
        progress.stage = None;
        state.begin_year(year);
        match run_year(&mut state, ctx.rmd_tables.as_ref(), &mut progress.stage) {
            Ok(()) => {
                trajectory.push(state.snapshot());
                progress.years_completed = trajectory.len();
            }
            Err(StageError::Insolvent { year, shortfall }) => {
                progress.phase = TrialPhase::Failed;
                return Ok(Simulated {
                    termination: Termination::Insolvent { year, shortfall },
                    trajectory,
                    final_net_worth: state.net_worth(),
                    financial_goal,
                });
            }
            Err(StageError::Config(err)) => {
                progress.phase = TrialPhase::Failed;
                return Err(err);
            }
        }
    }

    progress.phase = TrialPhase::Completed;
    Ok(Simulated {
        termination: Termination::Completed,
        trajectory,
        final_net_worth: state.net_worth(),
        financial_goal,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "trial panicked".to_string()
    }
}
