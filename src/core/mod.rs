mod activation;
mod batch;
mod engine;
mod error;
mod sampler;
mod stages;
mod state;
mod stats;
mod tax;
mod types;
mod validation;

pub use activation::{ActivationWindow, resolve_windows};
pub use batch::{BatchConfig, DEFAULT_SEED, DEFAULT_TRIALS, default_workers, run_batch};
pub use engine::{SimulationContext, run_trial};
pub use error::{ConfigError, StageError};
pub use sampler::{TrialRng, derive_seed, sample, trial_rng};
pub use stages::{
    AllocationSlot, RequiredDistribution, Stage, distribution_factor, plan_distribution,
    plan_purchases, rebalance_targets,
};
pub use stats::{BatchSummary, YearSummary, summarize_batch};
pub use tax::{
    BracketSchedule, ByStatus, FilingStatus, RmdTable, RmdTableProvider, StateTaxData, TaxBill,
    TaxBracket, TaxData, TaxDataProvider, TaxTables, TaxableYear, UniformLifetimeTable,
};
pub use types::{
    AssetAllocation, BatchResult, CASH_INVESTMENT_TYPE, Event, EventDuration, EventKind,
    EventStart, ExpenseEvent, FixedTarget, GlideTarget, IncomeEvent, InvestEvent, Investment,
    InvestmentBalance, InvestmentType, Person, RebalanceEvent, RothConversionPlan, Scenario,
    StochasticValue, TaxStatus, Termination, TrialError, TrialErrorKind, TrialOutcome, TrialRun,
    ValueType, YearlyResult,
};
pub use validation::validate_scenario;
