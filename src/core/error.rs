use thiserror::Error;

/// Precondition violations in a scenario, its tax data or the batch setup.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("scenario has no cash account (an investment of type \"cash\")")]
    MissingCashAccount,

    #[error("duplicate investment id {0}")]
    DuplicateInvestment(String),

    #[error("investment {investment} references unknown investment type {investment_type}")]
    UnknownInvestmentType {
        investment: String,
        investment_type: String,
    },

    #[error("{context} references unknown investment {id}")]
    UnknownInvestment { context: String, id: String },

    #[error("duplicate event name {0}")]
    DuplicateEvent(String),

    #[error("event {event} references unknown event {reference}")]
    UnknownEvent { event: String, reference: String },

    #[error("event {event} has an invalid activation window: {reason}")]
    InvalidEventWindow { event: String, reason: String },

    #[error("event {0} has a cyclic start reference")]
    CyclicEventReference(String),

    #[error("spending strategy entry {0} is not a discretionary expense event")]
    NotDiscretionary(String),

    #[error("malformed allocation in event {event}: {reason}")]
    MalformedAllocation { event: String, reason: String },

    #[error("no RMD table for tax year {0}")]
    MissingRmdTable(i32),

    #[error("no RMD distribution period for age {age} in the {year} table")]
    MissingRmdFactor { age: u32, year: i32 },

    #[error("no {schedule} tax bracket contains income {income:.2}")]
    MissingTaxBracket { schedule: &'static str, income: f64 },

    #[error("no tax data for state {0}")]
    UnknownState(String),

    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    #[error("invalid batch configuration: {0}")]
    InvalidBatch(String),
}

/// Why a year-step stage stopped the trial.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StageError {
    #[error("insolvent in {year}: short {shortfall:.2} after exhausting the withdrawal strategy")]
    Insolvent { year: i32, shortfall: f64 },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
