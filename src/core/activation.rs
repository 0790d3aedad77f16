use std::collections::HashMap;

use rand::Rng;

use super::error::ConfigError;
use super::sampler::{normal, uniform, whole_years};
use super::types::{Event, EventDuration, EventStart};

/// Longest activation window, in years after the start year.
pub const MAX_EVENT_YEARS: u32 = 200;

/// Range a sampled start year must fall in.
pub const START_YEARS: std::ops::RangeInclusive<i32> = 1900..=2500;

/// An event's activation window, frozen for the lifetime of one trial.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ActivationWindow {
    pub start_year: i32,
    pub duration: u32,
}

impl ActivationWindow {
    pub fn end_year(&self) -> i32 {
        let duration = i32::try_from(self.duration).unwrap_or(i32::MAX);
        self.start_year.saturating_add(duration)
    }

    /// Active iff `start <= year <= start + duration`.
    pub fn is_active(&self, year: i32) -> bool {
        self.start_year <= year && year <= self.end_year()
    }

    /// Elapsed fraction of the window, used by glide paths.
    pub fn progress(&self, year: i32) -> f64 {
        if self.duration == 0 {
            return 1.0;
        }
        ((year - self.start_year) as f64 / self.duration as f64).clamp(0.0, 1.0)
    }
}

/// Resolves every event's start year and duration once, in declaration
/// order. Event-relative starts pull the referenced event's window first.
pub fn resolve_windows<R: Rng + ?Sized>(
    events: &[Event],
    rng: &mut R,
) -> Result<Vec<ActivationWindow>, ConfigError> {
    let mut resolver = Resolver::new(events)?;
    for idx in 0..events.len() {
        resolver.resolve(idx, rng)?;
    }
    Ok(resolver.windows.into_iter().flatten().collect())
}

struct Resolver<'a> {
    events: &'a [Event],
    by_name: HashMap<&'a str, usize>,
    windows: Vec<Option<ActivationWindow>>,
    visiting: Vec<bool>,
}

impl<'a> Resolver<'a> {
    fn new(events: &'a [Event]) -> Result<Self, ConfigError> {
        let mut by_name = HashMap::with_capacity(events.len());
        for (idx, event) in events.iter().enumerate() {
            if by_name.insert(event.name.as_str(), idx).is_some() {
                return Err(ConfigError::DuplicateEvent(event.name.clone()));
            }
        }
        Ok(Self {
            events,
            by_name,
            windows: vec![None; events.len()],
            visiting: vec![false; events.len()],
        })
    }

    fn resolve<R: Rng + ?Sized>(
        &mut self,
        idx: usize,
        rng: &mut R,
    ) -> Result<ActivationWindow, ConfigError> {
        if let Some(window) = self.windows[idx] {
            return Ok(window);
        }
        let events = self.events;
        let event = &events[idx];
        if self.visiting[idx] {
            return Err(ConfigError::CyclicEventReference(event.name.clone()));
        }
        self.visiting[idx] = true;

        let duration = match event.duration {
            EventDuration::Fixed { years } => years,
            EventDuration::Normal { mean, std_dev } => {
                whole_years(normal(mean, std_dev, rng), MAX_EVENT_YEARS)
            }
            EventDuration::Uniform { lower, upper } => {
                whole_years(uniform(lower, upper, rng), MAX_EVENT_YEARS)
            }
        };
        if duration > MAX_EVENT_YEARS {
            return Err(invalid_window(
                &event.name,
                format!("duration {duration} exceeds {MAX_EVENT_YEARS} years"),
            ));
        }

        let start_year = match &event.start {
            EventStart::Fixed { year } => *year,
            EventStart::Normal { mean, std_dev } => {
                sampled_year(&event.name, normal(*mean, *std_dev, rng))?
            }
            EventStart::Uniform { lower, upper } => {
                sampled_year(&event.name, uniform(*lower, *upper, rng))?
            }
            EventStart::StartWith { event: reference } => {
                let target = self.lookup(&event.name, reference)?;
                self.resolve(target, rng)?.start_year
            }
            EventStart::StartAfter { event: reference } => {
                let target = self.lookup(&event.name, reference)?;
                let window = self.resolve(target, rng)?;
                checked_end(&self.events[target].name, window)?
                    .checked_add(1)
                    .ok_or_else(|| invalid_window(&event.name, "start year overflows".to_string()))?
            }
        };

        let window = ActivationWindow {
            start_year,
            duration,
        };
        checked_end(&event.name, window)?;
        self.visiting[idx] = false;
        self.windows[idx] = Some(window);
        Ok(window)
    }

    fn lookup(&self, event: &str, reference: &str) -> Result<usize, ConfigError> {
        self.by_name
            .get(reference)
            .copied()
            .ok_or_else(|| ConfigError::UnknownEvent {
                event: event.to_string(),
                reference: reference.to_string(),
            })
    }
}

fn invalid_window(event: &str, reason: String) -> ConfigError {
    ConfigError::InvalidEventWindow {
        event: event.to_string(),
        reason,
    }
}

fn sampled_year(event: &str, sampled: f64) -> Result<i32, ConfigError> {
    let rounded = sampled.round();
    if rounded.is_finite()
        && rounded >= *START_YEARS.start() as f64
        && rounded <= *START_YEARS.end() as f64
    {
        Ok(rounded as i32)
    } else {
        Err(invalid_window(event, format!("sampled start year {sampled} out of range")))
    }
}

fn checked_end(event: &str, window: ActivationWindow) -> Result<i32, ConfigError> {
    i32::try_from(window.duration)
        .ok()
        .and_then(|duration| window.start_year.checked_add(duration))
        .ok_or_else(|| invalid_window(event, "end year overflows".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sampler::trial_rng;
    use crate::core::types::{EventKind, ExpenseEvent, StochasticValue};

    fn expense(name: &str, start: EventStart, duration: EventDuration) -> Event {
        Event {
            name: name.to_string(),
            description: String::new(),
            start,
            duration,
            kind: EventKind::Expense(ExpenseEvent {
                initial_amount: 1_000.0,
                annual_change: StochasticValue::fixed(0.0),
                inflation_adjusted: false,
                user_fraction: 1.0,
                discretionary: false,
            }),
        }
    }

    #[test]
    fn fixed_window_is_inclusive_of_both_ends() {
        let window = ActivationWindow {
            start_year: 2030,
            duration: 5,
        };
        assert!(!window.is_active(2029));
        assert!(window.is_active(2030));
        assert!(window.is_active(2035));
        assert!(!window.is_active(2036));
    }

    #[test]
    fn progress_runs_from_zero_to_one() {
        let window = ActivationWindow {
            start_year: 2030,
            duration: 4,
        };
        assert_eq!(window.progress(2030), 0.0);
        assert_eq!(window.progress(2032), 0.5);
        assert_eq!(window.progress(2034), 1.0);
        assert_eq!(window.progress(2040), 1.0);
        let instant = ActivationWindow {
            start_year: 2030,
            duration: 0,
        };
        assert_eq!(instant.progress(2030), 1.0);
    }

    #[test]
    fn relative_starts_follow_referenced_window() {
        let events = vec![
            expense("after", EventStart::StartAfter { event: "job".into() }, EventDuration::Fixed { years: 3 }),
            expense("job", EventStart::Fixed { year: 2025 }, EventDuration::Fixed { years: 10 }),
            expense("with", EventStart::StartWith { event: "job".into() }, EventDuration::Fixed { years: 1 }),
        ];
        let mut rng = trial_rng(3);
        let windows = resolve_windows(&events, &mut rng).expect("resolvable");
        assert_eq!(windows[1].start_year, 2025);
        assert_eq!(windows[0].start_year, 2036);
        assert_eq!(windows[2].start_year, 2025);
    }

    #[test]
    fn cyclic_reference_is_a_configuration_error() {
        let events = vec![
            expense("a", EventStart::StartWith { event: "b".into() }, EventDuration::Fixed { years: 1 }),
            expense("b", EventStart::StartAfter { event: "a".into() }, EventDuration::Fixed { years: 1 }),
        ];
        let mut rng = trial_rng(3);
        let err = resolve_windows(&events, &mut rng).expect_err("cycle");
        assert!(matches!(err, ConfigError::CyclicEventReference(_)));
    }

    #[test]
    fn unknown_reference_is_a_configuration_error() {
        let events = vec![expense(
            "a",
            EventStart::StartWith { event: "missing".into() },
            EventDuration::Fixed { years: 1 },
        )];
        let mut rng = trial_rng(3);
        let err = resolve_windows(&events, &mut rng).expect_err("unknown");
        assert_eq!(
            err,
            ConfigError::UnknownEvent {
                event: "a".into(),
                reference: "missing".into()
            }
        );
    }

    #[test]
    fn sampled_durations_are_capped() {
        let events = vec![expense(
            "forever",
            EventStart::Fixed { year: 2025 },
            EventDuration::Uniform { lower: 1.0e9, upper: 2.0e9 },
        )];
        let windows = resolve_windows(&events, &mut trial_rng(5)).expect("resolvable");
        assert_eq!(windows[0].duration, MAX_EVENT_YEARS);
        assert_eq!(windows[0].end_year(), 2025 + MAX_EVENT_YEARS as i32);
    }

    #[test]
    fn oversized_fixed_duration_is_a_configuration_error() {
        let events = vec![expense(
            "forever",
            EventStart::Fixed { year: 2025 },
            EventDuration::Fixed { years: u32::MAX },
        )];
        let err = resolve_windows(&events, &mut trial_rng(5)).expect_err("too long");
        assert!(matches!(err, ConfigError::InvalidEventWindow { .. }));
    }

    #[test]
    fn window_past_the_last_representable_year_is_rejected() {
        let events = vec![
            expense("late", EventStart::Fixed { year: i32::MAX - 1 }, EventDuration::Fixed { years: 1 }),
            expense("after", EventStart::StartAfter { event: "late".into() }, EventDuration::Fixed { years: 0 }),
        ];
        let err = resolve_windows(&events, &mut trial_rng(5)).expect_err("overflow");
        assert!(matches!(err, ConfigError::InvalidEventWindow { ref event, .. } if event == "after"));
    }

    #[test]
    fn sampled_start_outside_calendar_is_rejected() {
        let events = vec![expense(
            "someday",
            EventStart::Normal { mean: 1.0e12, std_dev: 1.0 },
            EventDuration::Fixed { years: 1 },
        )];
        let err = resolve_windows(&events, &mut trial_rng(5)).expect_err("out of range");
        assert!(matches!(err, ConfigError::InvalidEventWindow { .. }));
    }

    #[test]
    fn stochastic_windows_are_sampled_once_and_then_fixed() {
        let events = vec![expense(
            "travel",
            EventStart::Uniform { lower: 2030.0, upper: 2040.0 },
            EventDuration::Normal { mean: 5.0, std_dev: 2.0 },
        )];
        let mut rng = trial_rng(11);
        let windows = resolve_windows(&events, &mut rng).expect("resolvable");
        let window = windows[0];
        assert!((2030..=2040).contains(&window.start_year));
        let active: Vec<bool> = (2025..2060).map(|y| window.is_active(y)).collect();
        let again: Vec<bool> = (2025..2060).map(|y| window.is_active(y)).collect();
        assert_eq!(active, again);
    }
}
