//! Result classes: which collection, keys and rules apply to each result type.

use crate::error::{CacheError, CacheResult};
use std::collections::BTreeMap;
use wattsync_protocol::{Granularity, Period, PeriodRange, ProtocolResult};

/// Default absolute tolerance between cached and reference values.
pub const DEFAULT_TOLERANCE: f64 = 2.0;

/// Months covered by a windowed view, counted back from the requested period.
pub const DEFAULT_WINDOW_MONTHS: u32 = 13;

/// Classes covered by a report with no class filter, in report order.
pub const REPORT_CLASSES: [&str; 4] = ["ot101", "ot201", "ot103", "ot503"];

/// Which cached rows `cached` returns for a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheView {
    /// The row of that period.
    Single,
    /// The rows of the `n` months ending at that period, lower bound excluded.
    Window(u32),
    /// The daily rows of that period's month.
    MonthDays,
}

/// How cached rows are compared to reference values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationRule {
    /// One cached row per reference period.
    PerPeriod,
    /// Daily rows summed per month against monthly reference totals.
    DailyTotals,
}

/// Description of one result class.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultClass {
    /// Class code; also the cache collection name.
    pub code: String,
    /// Document field holding the period.
    pub period_key: String,
    /// Document field holding the compared value.
    pub value_key: String,
    /// Period granularity of cached rows.
    pub granularity: Granularity,
    /// Cached view.
    pub view: CacheView,
    /// Validation rule.
    pub rule: ValidationRule,
    /// Absolute tolerance.
    pub tolerance: f64,
}

impl ResultClass {
    /// A monthly class compared row by row.
    pub fn monthly(code: impl Into<String>, value_key: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            period_key: "month".into(),
            value_key: value_key.into(),
            granularity: Granularity::Month,
            view: CacheView::Single,
            rule: ValidationRule::PerPeriod,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    /// A daily class validated against monthly totals.
    pub fn daily_totals(code: impl Into<String>, value_key: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            period_key: "day".into(),
            value_key: value_key.into(),
            granularity: Granularity::Day,
            view: CacheView::MonthDays,
            rule: ValidationRule::DailyTotals,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    /// Sets the cached view.
    pub fn with_view(mut self, view: CacheView) -> Self {
        self.view = view;
        self
    }

    /// Sets the tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Returns true if `cached` is within tolerance of `reference`.
    pub fn accepts(&self, reference: f64, cached: f64) -> bool {
        (reference - cached).abs() < self.tolerance
    }

    /// Range of rows the cached view returns for `period`.
    pub fn view_range(&self, period: Period) -> ProtocolResult<PeriodRange> {
        Ok(match self.view {
            CacheView::Single => PeriodRange::exact(period),
            CacheView::Window(months) => {
                let end = period.month_of();
                PeriodRange::after_until(end.add_months(-(months as i32))?, end)
            }
            CacheView::MonthDays => period.days(),
        })
    }
}

/// Registry of result classes, keyed by code.
#[derive(Debug, Clone, Default)]
pub struct ResultClasses {
    classes: BTreeMap<String, ResultClass>,
}

impl ResultClasses {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in result classes.
    pub fn builtin() -> Self {
        Self::new()
            .with(ResultClass::monthly("ot101", "consumption"))
            .with(
                ResultClass::monthly("ot103", "consumption")
                    .with_view(CacheView::Window(DEFAULT_WINDOW_MONTHS)),
            )
            .with(ResultClass::monthly("ot201", "actualConsumption"))
            .with(ResultClass::monthly("ot401", "consumption"))
            .with(ResultClass::daily_totals("ot503", "consumption"))
    }

    /// Registers a class, replacing any class with the same code.
    pub fn with(mut self, class: ResultClass) -> Self {
        self.insert(class);
        self
    }

    /// Registers a class in place.
    pub fn insert(&mut self, class: ResultClass) {
        self.classes.insert(class.code.clone(), class);
    }

    /// Returns the class registered under `code`.
    pub fn get(&self, code: &str) -> CacheResult<&ResultClass> {
        self.classes
            .get(code)
            .ok_or_else(|| CacheError::UnknownClass(code.to_string()))
    }

    /// Registered codes, sorted.
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }
}
