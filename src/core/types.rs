use serde::{Deserialize, Serialize};

/// Investment type name reserved for the household's cash account.
pub const CASH_INVESTMENT_TYPE: &str = "cash";

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueType {
    #[default]
    Amount,
    Percentage,
}

/// A declared stochastic quantity. Percentages are expressed in percent
/// units, so `5.0` means five percent.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StochasticValue {
    #[serde(rename_all = "camelCase")]
    Fixed {
        value: f64,
        #[serde(default)]
        value_type: ValueType,
    },
    #[serde(rename_all = "camelCase")]
    Normal {
        mean: f64,
        std_dev: f64,
        #[serde(default)]
        value_type: ValueType,
    },
    #[serde(rename_all = "camelCase")]
    Uniform {
        min: f64,
        max: f64,
        #[serde(default)]
        value_type: ValueType,
    },
}

impl StochasticValue {
    pub fn fixed(value: f64) -> Self {
        Self::Fixed {
            value,
            value_type: ValueType::Amount,
        }
    }

    pub fn fixed_percent(value: f64) -> Self {
        Self::Fixed {
            value,
            value_type: ValueType::Percentage,
        }
    }

    pub fn value_type(&self) -> ValueType {
        match *self {
            Self::Fixed { value_type, .. }
            | Self::Normal { value_type, .. }
            | Self::Uniform { value_type, .. } => value_type,
        }
    }

    pub fn apply(&self, base: f64, sample: f64) -> f64 {
        match self.value_type() {
            ValueType::Percentage => base * (1.0 + sample / 100.0),
            ValueType::Amount => base + sample,
        }
    }

    pub fn delta(&self, base: f64, sample: f64) -> f64 {
        match self.value_type() {
            ValueType::Percentage => base * sample / 100.0,
            ValueType::Amount => sample,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaxStatus {
    NonRetirement,
    PreTax,
    AfterTax,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentType {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub expected_annual_return: StochasticValue,
    #[serde(default)]
    pub expense_ratio: f64,
    pub expected_annual_income: StochasticValue,
    #[serde(default = "default_true")]
    pub taxable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Investment {
    pub id: String,
    pub investment_type: String,
    pub value: f64,
    /// Cost basis; defaults to the current value when omitted.
    #[serde(default)]
    pub purchase_price: Option<f64>,
    pub tax_status: TaxStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventStart {
    Fixed {
        year: i32,
    },
    #[serde(rename_all = "camelCase")]
    Normal {
        mean: f64,
        std_dev: f64,
    },
    Uniform {
        lower: f64,
        upper: f64,
    },
    StartWith {
        event: String,
    },
    StartAfter {
        event: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventDuration {
    Fixed {
        years: u32,
    },
    #[serde(rename_all = "camelCase")]
    Normal {
        mean: f64,
        std_dev: f64,
    },
    Uniform {
        lower: f64,
        upper: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeEvent {
    pub initial_amount: f64,
    pub annual_change: StochasticValue,
    #[serde(default)]
    pub inflation_adjusted: bool,
    #[serde(default = "default_user_fraction")]
    pub user_fraction: f64,
    #[serde(default)]
    pub social_security: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseEvent {
    pub initial_amount: f64,
    pub annual_change: StochasticValue,
    #[serde(default)]
    pub inflation_adjusted: bool,
    #[serde(default = "default_user_fraction")]
    pub user_fraction: f64,
    #[serde(default)]
    pub discretionary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixedTarget {
    pub investment: String,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlideTarget {
    pub investment: String,
    pub initial_percent: f64,
    pub final_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AssetAllocation {
    Fixed { targets: Vec<FixedTarget> },
    GlidePath { targets: Vec<GlideTarget> },
}

impl AssetAllocation {
    /// Target percentages at `progress` (0 at the event's start, 1 at its end).
    pub fn percentages(&self, progress: f64) -> Vec<(&str, f64)> {
        match self {
            Self::Fixed { targets } => targets
                .iter()
                .map(|t| (t.investment.as_str(), t.percent))
                .collect(),
            Self::GlidePath { targets } => {
                let progress = progress.clamp(0.0, 1.0);
                targets
                    .iter()
                    .map(|t| {
                        let pct = t.initial_percent + (t.final_percent - t.initial_percent) * progress;
                        (t.investment.as_str(), pct)
                    })
                    .collect()
            }
        }
    }

    pub fn investments(&self) -> Vec<&str> {
        match self {
            Self::Fixed { targets } => targets.iter().map(|t| t.investment.as_str()).collect(),
            Self::GlidePath { targets } => targets.iter().map(|t| t.investment.as_str()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestEvent {
    pub allocations: Vec<AssetAllocation>,
    pub max_cash: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceEvent {
    pub allocations: Vec<AssetAllocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventKind {
    Income(IncomeEvent),
    Expense(ExpenseEvent),
    Invest(InvestEvent),
    Rebalance(RebalanceEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub start: EventStart,
    pub duration: EventDuration,
    pub kind: EventKind,
}

impl Event {
    pub fn is_discretionary_expense(&self) -> bool {
        matches!(&self.kind, EventKind::Expense(e) if e.discretionary)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub birth_year: i32,
    pub life_expectancy: StochasticValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RothConversionPlan {
    pub start_year: i32,
    pub end_year: i32,
    pub strategy: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub name: String,
    pub start_year: i32,
    pub owner: Person,
    #[serde(default)]
    pub spouse: Option<Person>,
    #[serde(default)]
    pub investment_types: Vec<InvestmentType>,
    pub investments: Vec<Investment>,
    #[serde(default)]
    pub events: Vec<Event>,
    pub inflation: StochasticValue,
    #[serde(default)]
    pub after_tax_contribution_limit: f64,
    #[serde(default)]
    pub spending_strategy: Vec<String>,
    #[serde(default)]
    pub expense_withdrawal_strategy: Vec<String>,
    #[serde(default)]
    pub rmd_strategy: Vec<String>,
    #[serde(default)]
    pub roth_conversion: Option<RothConversionPlan>,
    pub financial_goal: f64,
    #[serde(default)]
    pub residence_state: Option<String>,
    #[serde(default = "default_rmd_start_age")]
    pub rmd_start_age: u32,
    #[serde(default = "default_early_withdrawal_age")]
    pub early_withdrawal_age: u32,
}

impl Scenario {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

fn default_true() -> bool {
    true
}

fn default_user_fraction() -> f64 {
    1.0
}

fn default_rmd_start_age() -> u32 {
    73
}

fn default_early_withdrawal_age() -> u32 {
    59
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentBalance {
    pub id: String,
    pub investment_type: String,
    pub tax_status: TaxStatus,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyResult {
    pub year: i32,
    pub investments: Vec<InvestmentBalance>,
    pub inflation: f64,
    pub active_events: Vec<String>,
    pub income: f64,
    pub early_withdrawals: f64,
    pub social_security: f64,
    pub capital_gains: f64,
    pub taxes_paid: f64,
    pub expenses_paid: f64,
    pub discretionary_paid: f64,
}

impl YearlyResult {
    pub fn total_assets(&self) -> f64 {
        self.investments.iter().map(|i| i.value.max(0.0)).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Termination {
    Completed,
    Insolvent { year: i32, shortfall: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialRun {
    pub trial_id: u32,
    pub seed: u64,
    pub success: bool,
    pub termination: Termination,
    pub trajectory: Vec<YearlyResult>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TrialErrorKind {
    Configuration,
    Fault,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialError {
    pub trial_id: u32,
    pub seed: u64,
    pub kind: TrialErrorKind,
    pub message: String,
    /// Where the trial stopped, e.g. `year 2041, stage rebalance`.
    pub context: String,
    pub years_completed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backtrace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum TrialOutcome {
    Finished(TrialRun),
    Errored(TrialError),
}

impl TrialOutcome {
    pub fn trial_id(&self) -> u32 {
        match self {
            Self::Finished(run) => run.trial_id,
            Self::Errored(err) => err.trial_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Finished(run) if run.success)
    }

    pub fn trajectory(&self) -> &[YearlyResult] {
        match self {
            Self::Finished(run) => &run.trajectory,
            Self::Errored(_) => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub outcomes: Vec<TrialOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stochastic_value_parses_tagged_json() {
        let value: StochasticValue =
            serde_json::from_str(r#"{"type":"normal","mean":5,"stdDev":2,"valueType":"percentage"}"#)
                .expect("valid stochastic value");
        assert_eq!(
            value,
            StochasticValue::Normal {
                mean: 5.0,
                std_dev: 2.0,
                value_type: ValueType::Percentage
            }
        );

        let fixed: StochasticValue =
            serde_json::from_str(r#"{"type":"fixed","value":1000}"#).expect("valid fixed value");
        assert_eq!(fixed.value_type(), ValueType::Amount);
    }

    #[test]
    fn percentage_samples_compound_and_amounts_add() {
        let pct = StochasticValue::fixed_percent(10.0);
        assert!((pct.apply(200.0, 10.0) - 220.0).abs() < 1e-9);
        assert!((pct.delta(200.0, 10.0) - 20.0).abs() < 1e-9);

        let amount = StochasticValue::fixed(10.0);
        assert!((amount.apply(200.0, 10.0) - 210.0).abs() < 1e-9);
    }

    #[test]
    fn glide_path_interpolates_linearly() {
        let allocation = AssetAllocation::GlidePath {
            targets: vec![
                GlideTarget {
                    investment: "stocks".to_string(),
                    initial_percent: 80.0,
                    final_percent: 20.0,
                },
                GlideTarget {
                    investment: "bonds".to_string(),
                    initial_percent: 20.0,
                    final_percent: 80.0,
                },
            ],
        };
        let halfway = allocation.percentages(0.5);
        assert_eq!(halfway, vec![("stocks", 50.0), ("bonds", 50.0)]);
        let clamped = allocation.percentages(3.0);
        assert_eq!(clamped, vec![("stocks", 20.0), ("bonds", 80.0)]);
    }

    #[test]
    fn event_kind_parses_income_event() {
        let event: Event = serde_json::from_str(
            r#"{
              "name": "salary",
              "start": {"type": "fixed", "year": 2025},
              "duration": {"type": "uniform", "lower": 10, "upper": 20},
              "kind": {
                "type": "income",
                "initialAmount": 90000,
                "annualChange": {"type": "fixed", "value": 3, "valueType": "percentage"},
                "inflationAdjusted": true,
                "socialSecurity": false
              }
            }"#,
        )
        .expect("valid event");
        let EventKind::Income(income) = &event.kind else {
            panic!("expected income event");
        };
        assert_eq!(income.user_fraction, 1.0);
        assert!(income.inflation_adjusted);
        assert!(!event.is_discretionary_expense());
    }
}
