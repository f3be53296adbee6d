//! Cached remote results and their period keys.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::ops::Bound;
use std::str::FromStr;

/// Storage bookkeeping fields never exposed to result consumers.
pub const HIDDEN_KEYS: [&str; 6] = ["companyId", "_updated", "_etag", "_id", "_created", "_links"];

/// Field holding the contract code in result documents.
const CONTRACT_FIELD: &str = "contractId";

/// Coarseness of a period key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// `YYYYMM`.
    Month,
    /// `YYYYMMDD`.
    Day,
}

/// A period key: a month (`YYYYMM`) or a day (`YYYYMMDD`).
///
/// Periods of the same granularity order chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Period(u32);

impl Period {
    /// Creates a month period.
    pub fn month(year: i32, month: u32) -> ProtocolResult<Self> {
        if !(1000..=9999).contains(&year) || !(1..=12).contains(&month) {
            return Err(ProtocolError::InvalidPeriod(format!("{year:04}{month:02}")));
        }
        Ok(Self(year as u32 * 100 + month))
    }

    /// Creates a day period.
    pub fn day(date: NaiveDate) -> Self {
        Self(date.year() as u32 * 10_000 + date.month() * 100 + date.day())
    }

    /// Returns the raw numeric key.
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Returns whether this is a month or a day.
    pub fn granularity(&self) -> Granularity {
        if self.0 >= 1_000_000 {
            Granularity::Day
        } else {
            Granularity::Month
        }
    }

    /// Returns the first calendar day covered by this period.
    pub fn first_day(&self) -> NaiveDate {
        let (year, month, day) = match self.granularity() {
            Granularity::Month => (self.0 / 100, self.0 % 100, 1),
            Granularity::Day => (self.0 / 10_000, (self.0 / 100) % 100, self.0 % 100),
        };
        NaiveDate::from_ymd_opt(year as i32, month, day).unwrap_or_default()
    }

    /// Returns the month containing this period.
    pub fn month_of(&self) -> Period {
        match self.granularity() {
            Granularity::Month => *self,
            Granularity::Day => Self(self.0 / 100),
        }
    }

    /// Returns the inclusive range of day periods in this period's month.
    pub fn days(&self) -> PeriodRange {
        let first = self.month_of().first_day();
        let last = first
            .checked_add_months(Months::new(1))
            .and_then(|next| next.pred_opt())
            .unwrap_or(first);
        PeriodRange::inclusive(Period::day(first), Period::day(last))
    }

    /// Shifts a month period by `months` (negative goes back).
    pub fn add_months(&self, months: i32) -> ProtocolResult<Period> {
        let first = self.month_of().first_day();
        let shifted = if months >= 0 {
            first.checked_add_months(Months::new(months as u32))
        } else {
            first.checked_sub_months(Months::new(months.unsigned_abs()))
        };
        let shifted =
            shifted.ok_or_else(|| ProtocolError::InvalidPeriod(format!("{self}{months:+}")))?;
        Period::month(shifted.year(), shifted.month())
    }
}

impl TryFrom<u32> for Period {
    type Error = ProtocolError;

    fn try_from(raw: u32) -> ProtocolResult<Self> {
        let invalid = || ProtocolError::InvalidPeriod(raw.to_string());
        match raw {
            100_001..=999_912 => {
                Period::month((raw / 100) as i32, raw % 100).map_err(|_| invalid())
            }
            10_000_101..=99_991_231 => {
                NaiveDate::from_ymd_opt((raw / 10_000) as i32, (raw / 100) % 100, raw % 100)
                    .map(Period::day)
                    .ok_or_else(invalid)
            }
            _ => Err(invalid()),
        }
    }
}

impl From<Period> for u32 {
    fn from(period: Period) -> u32 {
        period.0
    }
}

impl FromStr for Period {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProtocolError::InvalidPeriod(s.to_string()));
        }
        let raw: u32 = trimmed
            .parse()
            .map_err(|_| ProtocolError::InvalidPeriod(s.to_string()))?;
        Period::try_from(raw)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A range of periods with independent lower and upper bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodRange {
    /// Lower bound.
    pub lower: Bound<Period>,
    /// Upper bound.
    pub upper: Bound<Period>,
}

impl PeriodRange {
    /// Matches every period.
    pub fn all() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    /// Matches exactly one period.
    pub fn exact(period: Period) -> Self {
        Self::inclusive(period, period)
    }

    /// Matches `start..=end`.
    pub fn inclusive(start: Period, end: Period) -> Self {
        Self {
            lower: Bound::Included(start),
            upper: Bound::Included(end),
        }
    }

    /// Matches periods after `start` up to and including `end`.
    pub fn after_until(start: Period, end: Period) -> Self {
        Self {
            lower: Bound::Excluded(start),
            upper: Bound::Included(end),
        }
    }

    /// Matches `period` exactly if given, everything otherwise.
    pub fn from_option(period: Option<Period>) -> Self {
        period.map_or_else(Self::all, Self::exact)
    }

    /// Returns true if `period` falls in this range.
    pub fn contains(&self, period: Period) -> bool {
        let above = match self.lower {
            Bound::Included(lower) => period >= lower,
            Bound::Excluded(lower) => period > lower,
            Bound::Unbounded => true,
        };
        let below = match self.upper {
            Bound::Included(upper) => period <= upper,
            Bound::Excluded(upper) => period < upper,
            Bound::Unbounded => true,
        };
        above && below
    }
}

/// A result previously pulled from the remote service and cached locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResult {
    /// Contract code.
    pub contract_id: String,
    /// Period key.
    pub period: Period,
    /// Compared value.
    pub value: f64,
    /// Every other field of the remote document.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl CachedResult {
    /// Creates a result without metadata.
    pub fn new(contract_id: impl Into<String>, period: Period, value: f64) -> Self {
        Self {
            contract_id: contract_id.into(),
            period,
            value,
            metadata: Map::new(),
        }
    }

    /// Adds a metadata field.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Builds a cached result from a remote document.
    ///
    /// The period may be stored as a number or a digit string.
    pub fn from_document(doc: &Value, period_key: &str, value_key: &str) -> ProtocolResult<Self> {
        let map = doc
            .as_object()
            .ok_or_else(|| ProtocolError::invalid_field("<document>", "expected an object"))?;

        let contract_id = map
            .get(CONTRACT_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::invalid_field(CONTRACT_FIELD, "missing or not a string"))?
            .to_string();

        let period = match map.get(period_key) {
            Some(Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().map(|f| f as u64))
                .and_then(|raw| u32::try_from(raw).ok())
                .ok_or_else(|| ProtocolError::invalid_field(period_key, "not a period"))
                .and_then(Period::try_from)?,
            Some(Value::String(s)) => s.parse()?,
            _ => return Err(ProtocolError::invalid_field(period_key, "missing")),
        };

        let value = map
            .get(value_key)
            .and_then(Value::as_f64)
            .ok_or_else(|| ProtocolError::invalid_field(value_key, "missing or not a number"))?;

        let metadata = map
            .iter()
            .filter(|(k, _)| ![CONTRACT_FIELD, period_key, value_key].contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            contract_id,
            period,
            value,
            metadata,
        })
    }

    /// Renders the result as a document, hidden bookkeeping fields included.
    pub fn to_document(&self, period_key: &str, value_key: &str) -> Value {
        let mut map = self.metadata.clone();
        map.insert(CONTRACT_FIELD.into(), Value::String(self.contract_id.clone()));
        map.insert(period_key.into(), Value::from(self.period.value()));
        map.insert(value_key.into(), Value::from(self.value));
        Value::Object(map)
    }

    /// Renders the result for external consumers, hidden fields stripped.
    pub fn public_document(&self, period_key: &str, value_key: &str) -> Value {
        let mut doc = self.to_document(period_key, value_key);
        if let Value::Object(map) = &mut doc {
            for hidden in HIDDEN_KEYS {
                map.remove(hidden);
            }
        }
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn p(raw: u32) -> Period {
        Period::try_from(raw).unwrap()
    }

    #[test]
    fn parse_periods() {
        assert_eq!("202301".parse::<Period>().unwrap().granularity(), Granularity::Month);
        assert_eq!("20230115".parse::<Period>().unwrap().granularity(), Granularity::Day);
        assert!("202313".parse::<Period>().is_err());
        assert!("20230230".parse::<Period>().is_err());
        assert!("2023-01".parse::<Period>().is_err());
        assert!("".parse::<Period>().is_err());
    }

    #[test]
    fn month_days_cover_the_calendar_month() {
        let february = p(202402).days();
        assert!(february.contains(p(20240201)));
        assert!(february.contains(p(20240229)));
        assert!(!february.contains(p(20240301)));
        assert!(!february.contains(p(20240131)));

        assert_eq!(p(20231231).month_of(), p(202312));
    }

    #[test]
    fn shift_months_across_years() {
        assert_eq!(p(202301).add_months(-13).unwrap(), p(202112));
        assert_eq!(p(202311).add_months(2).unwrap(), p(202401));
    }

    #[test]
    fn range_bounds() {
        let window = PeriodRange::after_until(p(202201), p(202301));
        assert!(!window.contains(p(202201)));
        assert!(window.contains(p(202202)));
        assert!(window.contains(p(202301)));
        assert!(!window.contains(p(202302)));
        assert!(PeriodRange::all().contains(p(190001)));
    }

    #[test]
    fn serde_validates_periods() {
        assert_eq!(serde_json::to_string(&p(202301)).unwrap(), "202301");
        assert!(serde_json::from_str::<Period>("202399").is_err());
    }

    #[test]
    fn document_roundtrip_strips_hidden_keys() {
        let doc = json!({
            "contractId": "C1",
            "month": 202301,
            "consumption": 120.5,
            "_etag": "abc",
            "_id": "x",
            "companyId": 42,
            "peerGroup": "residential"
        });

        let result = CachedResult::from_document(&doc, "month", "consumption").unwrap();
        assert_eq!(result.contract_id, "C1");
        assert_eq!(result.period, p(202301));
        assert_eq!(result.value, 120.5);
        assert_eq!(result.metadata.len(), 4);

        let public = result.public_document("month", "consumption");
        assert_eq!(public["peerGroup"], "residential");
        assert!(public.get("_etag").is_none());
        assert!(public.get("companyId").is_none());
        assert_eq!(public["month"], 202301);
    }

    #[test]
    fn document_period_may_be_text() {
        let doc = json!({"contractId": "C1", "day": "20230105", "consumption": 3});
        let result = CachedResult::from_document(&doc, "day", "consumption").unwrap();
        assert_eq!(result.period, p(20230105));
        assert_eq!(result.value, 3.0);
    }

    #[test]
    fn document_missing_value_is_rejected() {
        let doc = json!({"contractId": "C1", "month": 202301});
        let err = CachedResult::from_document(&doc, "month", "consumption").unwrap_err();
        assert!(err.to_string().contains("consumption"));
    }

    proptest! {
        #[test]
        fn month_shift_is_reversible(
            year in 1900i32..2100,
            month in 1u32..=12,
            shift in -240i32..240,
        ) {
            let start = Period::month(year, month).unwrap();
            let shifted = start.add_months(shift).unwrap();
            prop_assert_eq!(shifted.granularity(), Granularity::Month);
            prop_assert_eq!(shifted.add_months(-shift).unwrap(), start);
            prop_assert_eq!(start < shifted, shift > 0);
        }

        #[test]
        fn every_day_falls_in_its_month(days in 0i64..80_000) {
            let date =
                NaiveDate::from_ymd_opt(1900, 1, 1).unwrap() + chrono::Duration::days(days);
            let day = Period::day(date);
            let month = day.month_of();
            prop_assert!(month.days().contains(day));
            prop_assert_eq!(month.first_day().month(), date.month());
            prop_assert_eq!(day.to_string().parse::<Period>().unwrap(), day);
        }
    }
}
