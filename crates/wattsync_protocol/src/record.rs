//! Validation error records and the filters used to report and clear them.

use crate::result::Period;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a drift between cached and reference values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Cached and reference values disagree beyond tolerance.
    WrongValue,
    /// A reference value exists with no cached remote result.
    NoResult,
    /// A cached remote result exists with no reference value.
    NoStored,
}

impl ErrorKind {
    /// Kinds in report order.
    pub const ALL: [ErrorKind; 3] =
        [ErrorKind::WrongValue, ErrorKind::NoResult, ErrorKind::NoStored];

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::WrongValue => "Wrong value",
            ErrorKind::NoResult => "No remote result",
            ErrorKind::NoStored => "No stored value to compare with",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Expected versus cached value for a `WrongValue` error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Drift {
    /// Reference value.
    pub expected: f64,
    /// Cached remote value.
    pub cached: f64,
}

/// A drift recorded by a validation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Result class code (for example `ot101`).
    pub class: String,
    /// Contract code.
    pub contract: String,
    /// Affected period.
    pub period: Period,
    /// Classification.
    pub kind: ErrorKind,
    /// Day the validation ran.
    pub validation_date: NaiveDate,
    /// Values involved, for `WrongValue`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift: Option<Drift>,
}

impl ErrorRecord {
    /// Creates a record without drift details.
    pub fn new(
        class: impl Into<String>,
        contract: impl Into<String>,
        period: Period,
        kind: ErrorKind,
        validation_date: NaiveDate,
    ) -> Self {
        Self {
            class: class.into(),
            contract: contract.into(),
            period,
            kind,
            validation_date,
            drift: None,
        }
    }

    /// Attaches drift details.
    pub fn with_drift(mut self, expected: f64, cached: f64) -> Self {
        self.drift = Some(Drift { expected, cached });
        self
    }
}

/// Validation-date condition of an [`ErrorQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateMatch {
    /// Any date.
    #[default]
    Any,
    /// Exactly this date.
    On(NaiveDate),
    /// Every date except this one.
    Except(NaiveDate),
}

impl DateMatch {
    /// Returns true if `date` satisfies the condition.
    pub fn matches(&self, date: NaiveDate) -> bool {
        match self {
            DateMatch::Any => true,
            DateMatch::On(on) => date == *on,
            DateMatch::Except(except) => date != *except,
        }
    }
}

/// Filter over error records; unset dimensions match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorQuery {
    /// Result class code.
    pub class: Option<String>,
    /// Contract code.
    pub contract: Option<String>,
    /// Period.
    pub period: Option<Period>,
    /// Error kind.
    pub kind: Option<ErrorKind>,
    /// Validation date.
    pub date: DateMatch,
}

impl ErrorQuery {
    /// Matches every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts to a result class.
    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    /// Restricts to a contract.
    pub fn contract(mut self, contract: impl Into<String>) -> Self {
        self.contract = Some(contract.into());
        self
    }

    /// Restricts to a period.
    pub fn period(mut self, period: Period) -> Self {
        self.period = Some(period);
        self
    }

    /// Restricts to an error kind.
    pub fn kind(mut self, kind: ErrorKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Sets the validation-date condition.
    pub fn date(mut self, date: DateMatch) -> Self {
        self.date = date;
        self
    }

    /// Returns true if `record` satisfies every set dimension.
    pub fn matches(&self, record: &ErrorRecord) -> bool {
        self.class.as_deref().map_or(true, |c| c == record.class)
            && self.contract.as_deref().map_or(true, |c| c == record.contract)
            && self.period.map_or(true, |p| p == record.period)
            && self.kind.map_or(true, |k| k == record.kind)
            && self.date.matches(record.validation_date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 5, d).unwrap()
    }

    fn record(contract: &str, kind: ErrorKind, date: NaiveDate) -> ErrorRecord {
        ErrorRecord::new("ot101", contract, "202301".parse().unwrap(), kind, date)
    }

    #[test]
    fn empty_query_matches_everything() {
        assert!(ErrorQuery::all().matches(&record("C1", ErrorKind::NoResult, day(1))));
    }

    #[test]
    fn query_dimensions() {
        let r = record("C1", ErrorKind::WrongValue, day(2));

        assert!(ErrorQuery::all().class("ot101").contract("C1").matches(&r));
        assert!(!ErrorQuery::all().class("ot503").matches(&r));
        assert!(!ErrorQuery::all().contract("C2").matches(&r));
        assert!(!ErrorQuery::all().kind(ErrorKind::NoStored).matches(&r));
        assert!(ErrorQuery::all().date(DateMatch::On(day(2))).matches(&r));
        assert!(!ErrorQuery::all().date(DateMatch::Except(day(2))).matches(&r));
        assert!(!ErrorQuery::all()
            .period("202302".parse().unwrap())
            .matches(&r));
    }

    #[test]
    fn drift_is_part_of_identity() {
        let a = record("C1", ErrorKind::WrongValue, day(1)).with_drift(10.0, 20.0);
        let b = record("C1", ErrorKind::WrongValue, day(1)).with_drift(10.0, 25.0);
        assert_ne!(a, b);
        assert_eq!(a.clone(), a);
    }

    #[test]
    fn labels() {
        assert_eq!(ErrorKind::NoStored.to_string(), "No stored value to compare with");
        assert_eq!(ErrorKind::ALL[0], ErrorKind::WrongValue);
    }
}
