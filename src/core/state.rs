use std::collections::HashMap;

use super::activation::{ActivationWindow, resolve_windows};
use super::error::{ConfigError, StageError};
use super::sampler::{TrialRng, sample, whole_years};
use super::tax::{FilingStatus, TaxData, TaxableYear};
use super::types::{
    CASH_INVESTMENT_TYPE, Event, EventKind, InvestmentBalance, InvestmentType, Person,
    RothConversionPlan, Scenario, StochasticValue, TaxStatus, YearlyResult,
};

/// Balances below this are treated as settled.
pub(crate) const EPS: f64 = 1e-6;

/// Oldest age a sampled life expectancy can reach.
pub const MAX_AGE: u32 = 130;

#[derive(Debug, Clone)]
pub(crate) struct InvestmentRecord {
    pub id: String,
    pub type_index: usize,
    pub tax_status: TaxStatus,
    pub value: f64,
    pub purchase_price: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct EventRecord {
    pub event: Event,
    pub window: ActivationWindow,
    /// Current unscaled amount for income and expense events.
    pub amount: f64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub(crate) struct YearAccumulators {
    pub income: f64,
    pub social_security: f64,
    pub capital_gains: f64,
    pub early_withdrawals: f64,
    pub after_tax_contributions: f64,
    pub taxes_paid: f64,
    pub expenses_paid: f64,
    pub discretionary_paid: f64,
}

impl YearAccumulators {
    pub fn taxable(&self) -> TaxableYear {
        TaxableYear {
            income: self.income,
            social_security: self.social_security,
            capital_gains: self.capital_gains,
            early_withdrawals: self.early_withdrawals,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct Lifespan {
    pub birth_year: i32,
    pub death_year: i32,
}

impl Lifespan {
    fn sample(person: &Person, rng: &mut TrialRng) -> Result<Self, ConfigError> {
        let age_at_death = whole_years(sample(&person.life_expectancy, rng), MAX_AGE);
        let death_year = i32::try_from(age_at_death)
            .ok()
            .and_then(|age| person.birth_year.checked_add(age))
            .ok_or_else(|| {
                ConfigError::InvalidScenario(format!(
                    "birth year {} is out of range",
                    person.birth_year
                ))
            })?;
        Ok(Self {
            birth_year: person.birth_year,
            death_year,
        })
    }

    pub fn alive_in(&self, year: i32) -> bool {
        year <= self.death_year
    }

    pub fn age_in(&self, year: i32) -> u32 {
        (year - self.birth_year).max(0) as u32
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ResolvedStrategies {
    pub spending: Vec<usize>,
    pub withdrawal: Vec<usize>,
    pub rmd: Vec<usize>,
    pub roth: Vec<usize>,
}

/// Mutable working set of one trial. Built from a private copy of the
/// scenario; nothing in here is shared with other trials.
pub(crate) struct TrialState {
    pub year: i32,
    pub inflation: f64,
    pub investment_types: Vec<InvestmentType>,
    pub investments: Vec<InvestmentRecord>,
    index: HashMap<String, usize>,
    pub cash: usize,
    pub events: Vec<EventRecord>,
    pub strategies: ResolvedStrategies,
    pub roth_plan: Option<RothConversionPlan>,
    pub current: YearAccumulators,
    pub prior: YearAccumulators,
    pub tax: TaxData,
    /// Tables the prior year's income is taxed with.
    pub prior_tax: TaxData,
    pub contribution_limit: f64,
    pub financial_goal: f64,
    pub rmd_start_age: u32,
    pub early_withdrawal_age: u32,
    inflation_spec: StochasticValue,
    pub owner: Lifespan,
    pub spouse: Option<Lifespan>,
    pub rng: TrialRng,
}

impl TrialState {
    /// Takes ownership of the trial's scenario copy and samples every
    /// per-trial quantity: lifespans first, then event windows.
    pub fn new(scenario: Scenario, tax: TaxData, mut rng: TrialRng) -> Result<Self, ConfigError> {
        let owner = Lifespan::sample(&scenario.owner, &mut rng)?;
        let spouse = scenario
            .spouse
            .as_ref()
            .map(|p| Lifespan::sample(p, &mut rng))
            .transpose()?;
        let windows = resolve_windows(&scenario.events, &mut rng)?;

        let type_index: HashMap<&str, usize> = scenario
            .investment_types
            .iter()
            .enumerate()
            .map(|(idx, t)| (t.name.as_str(), idx))
            .collect();

        let mut investments = Vec::with_capacity(scenario.investments.len() + 2);
        let mut index = HashMap::with_capacity(scenario.investments.len() + 2);
        let mut cash = None;
        for investment in &scenario.investments {
            let Some(&type_idx) = type_index.get(investment.investment_type.as_str()) else {
                return Err(ConfigError::UnknownInvestmentType {
                    investment: investment.id.clone(),
                    investment_type: investment.investment_type.clone(),
                });
            };
            if index.insert(investment.id.clone(), investments.len()).is_some() {
                return Err(ConfigError::DuplicateInvestment(investment.id.clone()));
            }
            if cash.is_none() && investment.investment_type == CASH_INVESTMENT_TYPE {
                cash = Some(investments.len());
            }
            investments.push(InvestmentRecord {
                id: investment.id.clone(),
                type_index: type_idx,
                tax_status: investment.tax_status,
                value: investment.value,
                purchase_price: investment.purchase_price.unwrap_or(investment.value),
            });
        }
        let cash = cash.ok_or(ConfigError::MissingCashAccount)?;

        let events: Vec<EventRecord> = scenario
            .events
            .into_iter()
            .zip(windows)
            .map(|(event, window)| {
                let amount = match &event.kind {
                    EventKind::Income(income) => income.initial_amount,
                    EventKind::Expense(expense) => expense.initial_amount,
                    EventKind::Invest(_) | EventKind::Rebalance(_) => 0.0,
                };
                EventRecord {
                    event,
                    window,
                    amount,
                }
            })
            .collect();

        let lookup = |context: &str, id: &String| {
            index.get(id).copied().ok_or_else(|| ConfigError::UnknownInvestment {
                context: context.to_string(),
                id: id.clone(),
            })
        };
        let withdrawal = scenario
            .expense_withdrawal_strategy
            .iter()
            .map(|id| lookup("expense withdrawal strategy", id))
            .collect::<Result<Vec<_>, _>>()?;
        let rmd = scenario
            .rmd_strategy
            .iter()
            .map(|id| lookup("RMD strategy", id))
            .collect::<Result<Vec<_>, _>>()?;
        let roth = match &scenario.roth_conversion {
            Some(plan) => plan
                .strategy
                .iter()
                .map(|id| lookup("Roth conversion strategy", id))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        let spending = scenario
            .spending_strategy
            .iter()
            .map(|name| {
                events
                    .iter()
                    .position(|r| &r.event.name == name)
                    .ok_or_else(|| ConfigError::UnknownEvent {
                        event: "spending strategy".to_string(),
                        reference: name.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            year: scenario.start_year,
            inflation: 0.0,
            investment_types: scenario.investment_types,
            investments,
            index,
            cash,
            events,
            strategies: ResolvedStrategies {
                spending,
                withdrawal,
                rmd,
                roth,
            },
            roth_plan: scenario.roth_conversion,
            current: YearAccumulators::default(),
            prior: YearAccumulators::default(),
            prior_tax: tax.clone(),
            tax,
            contribution_limit: scenario.after_tax_contribution_limit,
            financial_goal: scenario.financial_goal,
            rmd_start_age: scenario.rmd_start_age,
            early_withdrawal_age: scenario.early_withdrawal_age,
            inflation_spec: scenario.inflation,
            owner,
            spouse,
            rng,
        })
    }

    pub fn final_year(&self) -> i32 {
        match self.spouse {
            Some(spouse) => self.owner.death_year.max(spouse.death_year),
            None => self.owner.death_year,
        }
    }

    pub fn begin_year(&mut self, year: i32) {
        self.year = year;
        self.prior = self.current;
        self.current = YearAccumulators::default();
        self.inflation = sample(&self.inflation_spec, &mut self.rng);
    }

    /// Age of the surviving household member whose accounts drive RMDs and
    /// early-withdrawal penalties; the owner while alive.
    pub fn primary_age(&self) -> u32 {
        match self.spouse {
            Some(spouse) if !self.owner.alive_in(self.year) => spouse.age_in(self.year),
            _ => self.owner.age_in(self.year),
        }
    }

    pub fn filing_status(&self) -> FilingStatus {
        match self.spouse {
            Some(spouse) if spouse.alive_in(self.year) && self.owner.alive_in(self.year) => {
                FilingStatus::MarriedJoint
            }
            _ => FilingStatus::Single,
        }
    }

    /// Share of a couple's cash flow that still applies this year.
    pub fn household_share(&self, user_fraction: f64) -> f64 {
        let Some(spouse) = self.spouse else {
            return 1.0;
        };
        match (self.owner.alive_in(self.year), spouse.alive_in(self.year)) {
            (true, true) => 1.0,
            (true, false) => user_fraction,
            (false, true) => 1.0 - user_fraction,
            (false, false) => 0.0,
        }
    }

    pub fn investment_index(&self, id: &str, context: &str) -> Result<usize, ConfigError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| ConfigError::UnknownInvestment {
                context: context.to_string(),
                id: id.to_string(),
            })
    }

    pub fn cash_value(&self) -> f64 {
        self.investments[self.cash].value
    }

    pub fn credit_cash(&mut self, amount: f64) {
        let cash = &mut self.investments[self.cash];
        cash.value += amount;
        cash.purchase_price += amount;
    }

    pub fn debit_cash(&mut self, amount: f64) {
        let cash = &mut self.investments[self.cash];
        cash.value -= amount;
        cash.purchase_price = cash.purchase_price.min(cash.value).max(0.0);
    }

    pub fn net_worth(&self) -> f64 {
        self.investments.iter().map(|i| i.value.max(0.0)).sum()
    }

    pub fn is_active(&self, event_idx: usize) -> bool {
        self.events[event_idx].window.is_active(self.year)
    }

    /// Applies this year's annual change to an income or expense event and
    /// returns the household's payable share. Other event kinds yield 0.
    pub fn advance_cash_flow(&mut self, event_idx: usize) -> f64 {
        let (change, inflation_adjusted, user_fraction) = match &self.events[event_idx].event.kind {
            EventKind::Income(e) => (e.annual_change, e.inflation_adjusted, e.user_fraction),
            EventKind::Expense(e) => (e.annual_change, e.inflation_adjusted, e.user_fraction),
            EventKind::Invest(_) | EventKind::Rebalance(_) => return 0.0,
        };
        let drawn = sample(&change, &mut self.rng);
        let mut amount = change.apply(self.events[event_idx].amount, drawn);
        if inflation_adjusted {
            amount *= 1.0 + self.inflation / 100.0;
        }
        let amount = amount.max(0.0);
        self.events[event_idx].amount = amount;
        amount * self.household_share(user_fraction)
    }

    pub fn add_investment(&mut self, record: InvestmentRecord) -> usize {
        let idx = self.investments.len();
        self.index.insert(record.id.clone(), idx);
        self.investments.push(record);
        idx
    }

    /// Sells up to `amount` of an investment into the cash account and books
    /// the tax consequences. Returns the amount actually raised.
    pub fn liquidate(&mut self, idx: usize, amount: f64) -> f64 {
        if idx == self.cash || amount <= 0.0 {
            return 0.0;
        }
        let early = self.primary_age() < self.early_withdrawal_age;
        let record = &mut self.investments[idx];
        if record.value <= 0.0 {
            return 0.0;
        }
        let taken = amount.min(record.value);
        let fraction = taken / record.value;
        let basis = record.purchase_price * fraction;
        record.value -= taken;
        record.purchase_price -= basis;
        let status = record.tax_status;

        match status {
            TaxStatus::NonRetirement => self.current.capital_gains += taken - basis,
            TaxStatus::PreTax => self.current.income += taken,
            TaxStatus::AfterTax => {}
        }
        if early && status != TaxStatus::NonRetirement {
            self.current.early_withdrawals += taken;
        }
        self.credit_cash(taken);
        taken
    }

    pub fn cover_shortfall(&mut self) -> Result<(), StageError> {
        let order = self.strategies.withdrawal.clone();
        for idx in order {
            let deficit = -self.cash_value();
            if deficit <= EPS {
                break;
            }
            self.liquidate(idx, deficit);
        }
        let deficit = -self.cash_value();
        if deficit > EPS {
            return Err(StageError::Insolvent {
                year: self.year,
                shortfall: deficit,
            });
        }
        Ok(())
    }

    pub fn pay(&mut self, amount: f64) -> Result<(), StageError> {
        self.debit_cash(amount);
        self.cover_shortfall()
    }

    pub fn snapshot(&self) -> YearlyResult {
        YearlyResult {
            year: self.year,
            investments: self
                .investments
                .iter()
                .map(|i| InvestmentBalance {
                    id: i.id.clone(),
                    investment_type: self.investment_types[i.type_index].name.clone(),
                    tax_status: i.tax_status,
                    value: i.value,
                })
                .collect(),
            inflation: self.inflation,
            active_events: self
                .events
                .iter()
                .filter(|r| r.window.is_active(self.year))
                .map(|r| r.event.name.clone())
                .collect(),
            income: self.current.income,
            early_withdrawals: self.current.early_withdrawals,
            social_security: self.current.social_security,
            capital_gains: self.current.capital_gains,
            taxes_paid: self.current.taxes_paid,
            expenses_paid: self.current.expenses_paid,
            discretionary_paid: self.current.discretionary_paid,
        }
    }
}
