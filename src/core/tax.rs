use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// Penalty rate on retirement-account withdrawals before the early
/// withdrawal age.
pub const EARLY_WITHDRAWAL_PENALTY_RATE: f64 = 0.10;

/// Share of Social Security income excluded from ordinary taxable income.
pub const SOCIAL_SECURITY_EXCLUDED_SHARE: f64 = 0.15;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilingStatus {
    Single,
    MarriedJoint,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByStatus<T> {
    pub single: T,
    pub married_joint: T,
}

impl<T> ByStatus<T> {
    pub fn get(&self, status: FilingStatus) -> &T {
        match status {
            FilingStatus::Single => &self.single,
            FilingStatus::MarriedJoint => &self.married_joint,
        }
    }

    fn each_mut(&mut self, mut f: impl FnMut(&mut T)) {
        f(&mut self.single);
        f(&mut self.married_joint);
    }
}

/// One band of a schedule; `upper = None` means unbounded. Rates are
/// fractions (`0.22` is 22%).
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBracket {
    pub lower: f64,
    #[serde(default)]
    pub upper: Option<f64>,
    pub rate: f64,
}

impl TaxBracket {
    pub fn contains(&self, income: f64) -> bool {
        income >= self.lower && self.upper.is_none_or(|upper| income < upper)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BracketSchedule {
    pub brackets: Vec<TaxBracket>,
}

impl BracketSchedule {
    pub fn new(brackets: Vec<TaxBracket>) -> Self {
        Self { brackets }
    }

    /// Builds a contiguous schedule from `(upper bound, rate)` pairs; the
    /// last band is unbounded.
    fn from_bounds(bounds: &[f64], rates: &[f64]) -> Self {
        let mut brackets = Vec::with_capacity(rates.len());
        let mut lower = 0.0;
        for (idx, rate) in rates.iter().enumerate() {
            let upper = bounds.get(idx).copied();
            brackets.push(TaxBracket {
                lower,
                upper,
                rate: *rate,
            });
            lower = upper.unwrap_or(lower);
        }
        Self { brackets }
    }

    pub fn bracket_for(&self, income: f64) -> Option<&TaxBracket> {
        self.brackets.iter().find(|b| b.contains(income))
    }

    pub fn progressive_tax(&self, income: f64) -> f64 {
        if income <= 0.0 {
            return 0.0;
        }
        self.brackets
            .iter()
            .map(|b| {
                let top = b.upper.map_or(income, |u| income.min(u));
                (top - b.lower).max(0.0) * b.rate
            })
            .sum()
    }

    pub fn index(&mut self, factor: f64) {
        for bracket in &mut self.brackets {
            bracket.lower *= factor;
            bracket.upper = bracket.upper.map(|u| u * factor);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTaxData {
    pub code: String,
    pub brackets: ByStatus<BracketSchedule>,
}

/// Tax tables for one tax year, as handed to a trial. Each trial owns a
/// copy and indexes it forward with its own inflation draws.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxData {
    pub tax_year: i32,
    pub federal: ByStatus<BracketSchedule>,
    pub standard_deductions: ByStatus<f64>,
    pub capital_gains: ByStatus<BracketSchedule>,
    #[serde(default)]
    pub state: Option<StateTaxData>,
}

impl TaxData {
    pub fn index(&mut self, inflation_pct: f64) {
        let factor = 1.0 + inflation_pct / 100.0;
        self.federal.each_mut(|s| s.index(factor));
        self.capital_gains.each_mut(|s| s.index(factor));
        self.standard_deductions.each_mut(|d| *d *= factor);
        if let Some(state) = &mut self.state {
            state.brackets.each_mut(|s| s.index(factor));
        }
    }

    /// Federal income tax is the rate of the bracket the taxable base falls
    /// in, applied to the whole base.
    pub fn bill(&self, status: FilingStatus, year: &TaxableYear) -> Result<TaxBill, ConfigError> {
        let ordinary = year.ordinary_income();
        let deduction = *self.standard_deductions.get(status);
        let federal_base = (ordinary - deduction).max(0.0);
        let federal_bracket = self
            .federal
            .get(status)
            .bracket_for(federal_base)
            .ok_or(ConfigError::MissingTaxBracket {
                schedule: "federal",
                income: federal_base,
            })?;
        let federal = federal_bracket.rate * federal_base;

        let capital_gains = if year.capital_gains > 0.0 {
            let bracket = self
                .capital_gains
                .get(status)
                .bracket_for(federal_base)
                .ok_or(ConfigError::MissingTaxBracket {
                    schedule: "capital gains",
                    income: federal_base,
                })?;
            bracket.rate * year.capital_gains
        } else {
            0.0
        };

        let state = match &self.state {
            Some(state) => {
                let base = (year.income - year.social_security).max(0.0) + year.capital_gains.max(0.0);
                state.brackets.get(status).progressive_tax(base)
            }
            None => 0.0,
        };

        Ok(TaxBill {
            federal,
            state,
            capital_gains,
            early_withdrawal_penalty: EARLY_WITHDRAWAL_PENALTY_RATE * year.early_withdrawals.max(0.0),
        })
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TaxableYear {
    /// Ordinary income, Social Security included.
    pub income: f64,
    pub social_security: f64,
    pub capital_gains: f64,
    pub early_withdrawals: f64,
}

impl TaxableYear {
    pub fn ordinary_income(&self) -> f64 {
        (self.income - SOCIAL_SECURITY_EXCLUDED_SHARE * self.social_security).max(0.0)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TaxBill {
    pub federal: f64,
    pub state: f64,
    pub capital_gains: f64,
    pub early_withdrawal_penalty: f64,
}

impl TaxBill {
    pub fn total(&self) -> f64 {
        self.federal + self.state + self.capital_gains + self.early_withdrawal_penalty
    }
}

/// Supplies base-year tax tables. Implementations are read concurrently by
/// every trial of a batch.
pub trait TaxDataProvider: Send + Sync {
    fn tax_data(&self, state_code: Option<&str>) -> Result<TaxData, ConfigError>;
}

pub trait RmdTableProvider: Send + Sync {
    fn rmd_table(&self, year: i32) -> Option<&RmdTable>;
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RmdTable {
    pub periods: BTreeMap<u32, f64>,
}

impl RmdTable {
    pub fn from_pairs(pairs: &[(u32, f64)]) -> Self {
        Self {
            periods: pairs.iter().copied().collect(),
        }
    }

    pub fn distribution_period(&self, age: u32) -> Option<f64> {
        self.periods.get(&age).copied()
    }
}

/// IRS Uniform Lifetime Table (2022 onwards), ages 72 to 120.
const UNIFORM_LIFETIME: [(u32, f64); 49] = [
    (72, 27.4), (73, 26.5), (74, 25.5), (75, 24.6), (76, 23.7), (77, 22.9), (78, 22.0),
    (79, 21.1), (80, 20.2), (81, 19.4), (82, 18.5), (83, 17.7), (84, 16.8), (85, 16.0),
    (86, 15.2), (87, 14.4), (88, 13.7), (89, 12.9), (90, 12.2), (91, 11.5), (92, 10.8),
    (93, 10.1), (94, 9.5), (95, 8.9), (96, 8.4), (97, 7.8), (98, 7.3), (99, 6.8),
    (100, 6.4), (101, 6.0), (102, 5.6), (103, 5.2), (104, 4.9), (105, 4.6), (106, 4.3),
    (107, 4.1), (108, 3.9), (109, 3.7), (110, 3.5), (111, 3.4), (112, 3.3), (113, 3.1),
    (114, 3.0), (115, 2.9), (116, 2.8), (117, 2.7), (118, 2.5), (119, 2.3), (120, 2.0),
];

#[derive(Clone, Debug, PartialEq)]
pub struct UniformLifetimeTable {
    table: RmdTable,
}

impl UniformLifetimeTable {
    pub fn new(table: RmdTable) -> Self {
        Self { table }
    }
}

impl Default for UniformLifetimeTable {
    fn default() -> Self {
        Self::new(RmdTable::from_pairs(&UNIFORM_LIFETIME))
    }
}

impl RmdTableProvider for UniformLifetimeTable {
    fn rmd_table(&self, _year: i32) -> Option<&RmdTable> {
        Some(&self.table)
    }
}

/// A full set of base-year tables: federal schedules plus any number of
/// state schedules. Loadable from JSON, or the embedded 2024 set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxTables {
    pub tax_year: i32,
    pub federal: ByStatus<BracketSchedule>,
    pub standard_deductions: ByStatus<f64>,
    pub capital_gains: ByStatus<BracketSchedule>,
    #[serde(default)]
    pub states: HashMap<String, ByStatus<BracketSchedule>>,
}

impl TaxTables {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// 2024 federal tables and the New York state schedule.
    pub fn embedded() -> Self {
        let federal = ByStatus {
            single: BracketSchedule::from_bounds(
                &[11_600.0, 47_150.0, 100_525.0, 191_950.0, 243_725.0, 609_350.0],
                &[0.10, 0.12, 0.22, 0.24, 0.32, 0.35, 0.37],
            ),
            married_joint: BracketSchedule::from_bounds(
                &[23_200.0, 94_300.0, 201_050.0, 383_900.0, 487_450.0, 731_200.0],
                &[0.10, 0.12, 0.22, 0.24, 0.32, 0.35, 0.37],
            ),
        };
        let capital_gains = ByStatus {
            single: BracketSchedule::from_bounds(&[47_025.0, 518_900.0], &[0.0, 0.15, 0.20]),
            married_joint: BracketSchedule::from_bounds(&[94_050.0, 583_750.0], &[0.0, 0.15, 0.20]),
        };
        let ny_rates = [0.04, 0.045, 0.0525, 0.055, 0.06, 0.0685, 0.0965, 0.103, 0.109];
        let new_york = ByStatus {
            single: BracketSchedule::from_bounds(
                &[8_500.0, 11_700.0, 13_900.0, 80_650.0, 215_400.0, 1_077_550.0, 5_000_000.0, 25_000_000.0],
                &ny_rates,
            ),
            married_joint: BracketSchedule::from_bounds(
                &[17_150.0, 23_600.0, 27_900.0, 161_550.0, 323_200.0, 2_155_350.0, 5_000_000.0, 25_000_000.0],
                &ny_rates,
            ),
        };

        Self {
            tax_year: 2024,
            federal,
            standard_deductions: ByStatus {
                single: 14_600.0,
                married_joint: 29_200.0,
            },
            capital_gains,
            states: HashMap::from([("NY".to_string(), new_york)]),
        }
    }
}

impl Default for TaxTables {
    fn default() -> Self {
        Self::embedded()
    }
}

impl TaxDataProvider for TaxTables {
    fn tax_data(&self, state_code: Option<&str>) -> Result<TaxData, ConfigError> {
        let state = match state_code {
            Some(code) => {
                let key = code.to_ascii_uppercase();
                let brackets = self
                    .states
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownState(code.to_string()))?;
                Some(StateTaxData {
                    code: key,
                    brackets,
                })
            }
            None => None,
        };
        Ok(TaxData {
            tax_year: self.tax_year,
            federal: self.federal.clone(),
            standard_deductions: self.standard_deductions.clone(),
            capital_gains: self.capital_gains.clone(),
            state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn progressive_tax_matches_hand_calculation() {
        let tables = TaxTables::embedded();
        let single = tables.federal.get(FilingStatus::Single);
        // 11,600 * 10% + (47,150 - 11,600) * 12% + (60,000 - 47,150) * 22%
        let expected = 1_160.0 + 4_266.0 + 2_827.0;
        assert_approx(single.progressive_tax(60_000.0), expected);
        assert_approx(single.progressive_tax(0.0), 0.0);
    }

    #[test]
    fn bracket_lookup_uses_half_open_bands() {
        let tables = TaxTables::embedded();
        let single = tables.federal.get(FilingStatus::Single);
        assert_approx(single.bracket_for(11_599.0).expect("bracket").rate, 0.10);
        assert_approx(single.bracket_for(11_600.0).expect("bracket").rate, 0.12);
        let top = single.bracket_for(10_000_000.0).expect("bracket");
        assert!(top.upper.is_none());
        assert!(single.bracket_for(-1.0).is_none());
    }

    #[test]
    fn indexing_scales_thresholds_and_deductions() {
        let mut data = TaxTables::embedded().tax_data(Some("ny")).expect("known state");
        data.index(10.0);
        let first = data.federal.get(FilingStatus::Single).brackets[0];
        assert_approx(first.upper.expect("bounded"), 12_760.0);
        assert_approx(*data.standard_deductions.get(FilingStatus::Single), 16_060.0);
        let state = data.state.as_ref().expect("state tables");
        assert_approx(
            state.brackets.get(FilingStatus::Single).brackets[0].upper.expect("bounded"),
            9_350.0,
        );
    }

    #[test]
    fn unknown_state_is_a_configuration_error() {
        let err = TaxTables::embedded().tax_data(Some("ZZ")).expect_err("unknown state");
        assert_eq!(err, ConfigError::UnknownState("ZZ".to_string()));
    }

    #[test]
    fn bill_combines_federal_gains_and_penalty() {
        let data = TaxTables::embedded().tax_data(None).expect("federal only");
        let year = TaxableYear {
            income: 74_600.0,
            social_security: 0.0,
            capital_gains: 10_000.0,
            early_withdrawals: 5_000.0,
        };
        let bill = data.bill(FilingStatus::Single, &year).expect("bill");
        // taxable 60,000 after the 14,600 deduction, all of it at 22%
        assert_approx(bill.federal, 13_200.0);
        assert_approx(bill.capital_gains, 1_500.0);
        assert_approx(bill.early_withdrawal_penalty, 500.0);
        assert_approx(bill.state, 0.0);
        assert_approx(bill.total(), 13_200.0 + 1_500.0 + 500.0);
    }

    #[test]
    fn federal_tax_applies_containing_bracket_rate_to_whole_base() {
        let data = TaxTables::embedded().tax_data(None).expect("federal only");
        let taxed = |income: f64, social_security: f64| {
            data.bill(
                FilingStatus::Single,
                &TaxableYear {
                    income,
                    social_security,
                    ..TaxableYear::default()
                },
            )
            .expect("bill")
            .federal
        };
        // 10,000 taxable sits in the 10% band
        assert_approx(taxed(24_600.0, 0.0), 1_000.0);
        // 11,600 taxable is the first dollar of the 12% band
        assert_approx(taxed(26_200.0, 0.0), 1_392.0);
        // 40,000 SS leaves 34,000 ordinary, 19,400 taxable at 12%
        assert_approx(taxed(40_000.0, 40_000.0), 2_328.0);
        assert_approx(taxed(10_000.0, 0.0), 0.0);
    }

    #[test]
    fn social_security_is_partially_excluded() {
        let year = TaxableYear {
            income: 40_000.0,
            social_security: 20_000.0,
            ..TaxableYear::default()
        };
        assert_approx(year.ordinary_income(), 37_000.0);
    }

    #[test]
    fn uniform_lifetime_table_covers_72_to_120() {
        let provider = UniformLifetimeTable::default();
        let table = provider.rmd_table(2030).expect("table");
        assert_eq!(table.periods.len(), 49);
        assert_eq!(table.distribution_period(73), Some(26.5));
        assert_eq!(table.distribution_period(120), Some(2.0));
        assert_eq!(table.distribution_period(71), None);
    }

    #[test]
    fn tax_tables_round_trip_through_json() {
        let json = serde_json::to_string(&TaxTables::embedded()).expect("serializable");
        let parsed = TaxTables::from_json(&json).expect("parsable");
        assert_eq!(parsed, TaxTables::embedded());
    }
}
