//! Error report and clear.

use crate::class::REPORT_CLASSES;
use crate::error::CacheResult;
use chrono::NaiveDate;
use std::fmt;
use std::sync::Arc;
use tracing::info;
use wattsync_protocol::{Clock, DateMatch, ErrorKind, ErrorQuery, Period, SystemClock};
use wattsync_storage::ErrorStore;

/// Validation date a report or clear is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportDate {
    /// The current day.
    #[default]
    Today,
    /// A specific day.
    On(NaiveDate),
    /// Every day.
    Any,
}

/// Dimensions shared by [`ErrorReporter::report`] and [`ErrorReporter::clear`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportFilter {
    /// Result class code.
    pub class: Option<String>,
    /// Contract code.
    pub contract: Option<String>,
    /// Period.
    pub period: Option<Period>,
    /// Validation date.
    pub date: ReportDate,
}

impl ReportFilter {
    /// Today's errors of every class.
    pub fn today() -> Self {
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

    /// Sets the validation date.
    pub fn date(mut self, date: ReportDate) -> Self {
        self.date = date;
        self
    }
}

/// Error counts of one result class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassCounts {
    /// Result class code.
    pub class: String,
    /// Count per kind, in [`ErrorKind::ALL`] order.
    pub counts: Vec<(ErrorKind, usize)>,
}

/// A rendered error report.
///
/// `Display` produces the plain-text form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    /// Errors stored for other validation dates.
    pub stale: usize,
    /// Resolved validation date, `None` for every date.
    pub date: Option<NaiveDate>,
    /// Class filter.
    pub class: Option<String>,
    /// Contract filter.
    pub contract: Option<String>,
    /// Period filter.
    pub period: Option<Period>,
    /// Counts per class, in report order.
    pub classes: Vec<ClassCounts>,
}

impl ErrorReport {
    /// Total matching errors across classes.
    pub fn total(&self) -> usize {
        self.classes
            .iter()
            .flat_map(|c| c.counts.iter())
            .map(|(_, n)| n)
            .sum()
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.stale > 0 {
            writeln!(f, "WARNING: There are {} stored old errors.", self.stale)?;
        }
        writeln!(
            f,
            "REPORT FILTER: {} ot - {} contract {} period {} date",
            self.class.as_deref().unwrap_or("all"),
            self.contract.as_deref().unwrap_or("all"),
            self.period.map_or_else(|| "all".to_string(), |p| p.to_string()),
            self.date.map_or_else(|| "all".to_string(), |d| d.format("%Y-%m-%d").to_string()),
        )?;
        for section in &self.classes {
            writeln!(f, "{}", section.class)?;
            for (kind, count) in &section.counts {
                writeln!(f, "\t{}: {}", kind.label(), count)?;
            }
        }
        Ok(())
    }
}

/// Aggregates and clears recorded validation errors.
pub struct ErrorReporter {
    errors: Arc<dyn ErrorStore>,
    clock: Arc<dyn Clock>,
}

impl ErrorReporter {
    /// Creates a reporter resolving "today" with the wall clock.
    pub fn new(errors: Arc<dyn ErrorStore>) -> Self {
        Self {
            errors,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn resolve(&self, date: ReportDate) -> Option<NaiveDate> {
        match date {
            ReportDate::Today => Some(self.clock.today()),
            ReportDate::On(day) => Some(day),
            ReportDate::Any => None,
        }
    }

    fn query(&self, filter: &ReportFilter, date: Option<NaiveDate>) -> ErrorQuery {
        ErrorQuery {
            class: filter.class.clone(),
            contract: filter.contract.clone(),
            period: filter.period,
            kind: None,
            date: date.map_or(DateMatch::Any, DateMatch::On),
        }
    }

    /// The fixed report classes, then any other class with matching errors.
    fn report_classes(&self, base: &ErrorQuery) -> CacheResult<Vec<String>> {
        let mut codes: Vec<String> = REPORT_CLASSES.iter().map(|c| c.to_string()).collect();
        let mut extra: Vec<String> = self
            .errors
            .find_errors(base)?
            .into_iter()
            .map(|record| record.class)
            .filter(|class| !codes.contains(class))
            .collect();
        extra.sort();
        extra.dedup();
        codes.extend(extra);
        Ok(codes)
    }

    /// Counts errors per class and kind.
    pub fn report(&self, filter: &ReportFilter) -> CacheResult<ErrorReport> {
        let date = self.resolve(filter.date);
        let stale = match date {
            Some(day) => self
                .errors
                .count_errors(&ErrorQuery::all().date(DateMatch::Except(day)))?,
            None => 0,
        };

        let base = self.query(filter, date);
        let codes = match &filter.class {
            Some(class) => vec![class.clone()],
            None => self.report_classes(&base)?,
        };

        let mut classes = Vec::with_capacity(codes.len());
        for code in codes {
            let mut counts = Vec::with_capacity(ErrorKind::ALL.len());
            for kind in ErrorKind::ALL {
                let query = ErrorQuery {
                    class: Some(code.clone()),
                    kind: Some(kind),
                    ..base.clone()
                };
                counts.push((kind, self.errors.count_errors(&query)?));
            }
            classes.push(ClassCounts { class: code, counts });
        }

        Ok(ErrorReport {
            stale,
            date,
            class: filter.class.clone(),
            contract: filter.contract.clone(),
            period: filter.period,
            classes,
        })
    }

    /// Deletes the errors matching `filter`; meant to follow a report with
    /// the same filter. Returns how many were deleted.
    pub fn clear(&self, filter: &ReportFilter) -> CacheResult<usize> {
        let date = self.resolve(filter.date);
        let removed = self.errors.remove_errors(&self.query(filter, date))?;
        info!(
            class = filter.class.as_deref().unwrap_or("all"),
            contract = filter.contract.as_deref().unwrap_or("all"),
            removed,
            "cleared errors"
        );
        Ok(removed)
    }
}

impl std::fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorReporter").finish_non_exhaustive()
    }
}
