//! Drift detection between cached results and reference values.

use crate::class::{ResultClass, ResultClasses, ValidationRule};
use crate::error::CacheResult;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};
use wattsync_protocol::{Clock, ErrorKind, ErrorRecord, Period, PeriodRange, SystemClock};
use wattsync_storage::{ErrorStore, ResultStore};

/// Reconciler settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileConfig {
    /// Store classified drift in the error log.
    pub log_errors: bool,
}

impl ReconcileConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self { log_errors: true }
    }

    /// Sets whether drift is logged.
    pub fn with_log_errors(mut self, log_errors: bool) -> Self {
        self.log_errors = log_errors;
        self
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one validation run.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    /// Result class code.
    pub class: String,
    /// Contract validated.
    pub contract: String,
    /// Periods whose cache matched the reference.
    pub matched: Vec<Period>,
    /// Cached rows deleted.
    pub removed: usize,
    /// Drift found, in discovery order.
    pub errors: Vec<ErrorRecord>,
    /// Error records newly written to the log.
    pub recorded: usize,
}

impl ValidationReport {
    fn new(class: &str, contract: &str) -> Self {
        Self {
            class: class.to_string(),
            contract: contract.to_string(),
            matched: Vec::new(),
            removed: 0,
            errors: Vec::new(),
            recorded: 0,
        }
    }

    /// Number of errors of `kind`.
    pub fn count(&self, kind: ErrorKind) -> usize {
        self.errors.iter().filter(|e| e.kind == kind).count()
    }

    /// Returns true if no drift was found.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Compares cached results against freshly computed reference values,
/// deletes invalid cache rows and records the drift.
pub struct Reconciler {
    store: Arc<dyn ResultStore>,
    errors: Arc<dyn ErrorStore>,
    classes: ResultClasses,
    clock: Arc<dyn Clock>,
    config: ReconcileConfig,
}

impl Reconciler {
    /// Creates a reconciler using the wall clock for validation dates.
    pub fn new(
        store: Arc<dyn ResultStore>,
        errors: Arc<dyn ErrorStore>,
        classes: ResultClasses,
    ) -> Self {
        Self {
            store,
            errors,
            classes,
            clock: Arc::new(SystemClock),
            config: ReconcileConfig::default(),
        }
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, config: ReconcileConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the cached results of `contract` against `values`.
    ///
    /// With `period` set, only that period is validated and other
    /// reference values are ignored.
    ///
    /// # Errors
    ///
    /// Storage failures abort the run; rows already deleted stay deleted.
    pub fn validate(
        &self,
        code: &str,
        contract: &str,
        values: &BTreeMap<Period, f64>,
        period: Option<Period>,
    ) -> CacheResult<ValidationReport> {
        let class = self.classes.get(code)?;
        let report = match class.rule {
            ValidationRule::PerPeriod => self.validate_periods(class, contract, values, period)?,
            ValidationRule::DailyTotals => self.validate_daily(class, contract, values, period)?,
        };
        info!(
            class = code,
            contract,
            matched = report.matched.len(),
            removed = report.removed,
            errors = report.errors.len(),
            "validation finished"
        );
        Ok(report)
    }

    fn validate_periods(
        &self,
        class: &ResultClass,
        contract: &str,
        values: &BTreeMap<Period, f64>,
        period: Option<Period>,
    ) -> CacheResult<ValidationReport> {
        let code = class.code.as_str();
        let mut report = ValidationReport::new(code, contract);
        let mut remaining: BTreeMap<Period, f64> = values
            .iter()
            .filter(|(p, _)| period.map_or(true, |only| **p == only))
            .map(|(p, v)| (*p, *v))
            .collect();

        for row in self.store.find(code, contract, PeriodRange::from_option(period))? {
            let error = match remaining.remove(&row.period) {
                None => Some(self.error(code, contract, row.period, ErrorKind::NoStored)),
                Some(expected) if !class.accepts(expected, row.value) => Some(
                    self.error(code, contract, row.period, ErrorKind::WrongValue)
                        .with_drift(expected, row.value),
                ),
                Some(_) => {
                    report.matched.push(row.period);
                    None
                }
            };

            if let Some(error) = error {
                report.removed +=
                    self.store.remove(code, contract, PeriodRange::exact(row.period))?;
                self.classify(&mut report, error)?;
            }
        }

        for missing in remaining.into_keys() {
            let error = self.error(code, contract, missing, ErrorKind::NoResult);
            self.classify(&mut report, error)?;
        }
        Ok(report)
    }

    fn validate_daily(
        &self,
        class: &ResultClass,
        contract: &str,
        values: &BTreeMap<Period, f64>,
        period: Option<Period>,
    ) -> CacheResult<ValidationReport> {
        let code = class.code.as_str();
        let mut report = ValidationReport::new(code, contract);
        let target = period.map(|p| p.month_of());
        let reference: BTreeMap<Period, f64> = values
            .iter()
            .map(|(p, v)| (p.month_of(), *v))
            .filter(|(p, _)| target.map_or(true, |only| *p == only))
            .collect();

        for (&month, &expected) in &reference {
            match self.store.sum(code, contract, month.days())? {
                None => {
                    let error = self.error(code, contract, month, ErrorKind::NoResult);
                    self.classify(&mut report, error)?;
                }
                Some(total) if !class.accepts(expected, total) => {
                    report.removed += self.store.remove(code, contract, month.days())?;
                    let error = self
                        .error(code, contract, month, ErrorKind::WrongValue)
                        .with_drift(expected, total);
                    self.classify(&mut report, error)?;
                }
                Some(_) => report.matched.push(month),
            }
        }

        match target {
            Some(month) if !report.matched.contains(&month) => {
                report.removed += self.store.remove(code, contract, month.days())?;
            }
            Some(_) => {}
            None => {
                let keep: Vec<PeriodRange> = report.matched.iter().map(Period::days).collect();
                let purged = self.store.remove_except(code, contract, &keep)?;
                report.removed += purged.len();
                let months: BTreeSet<Period> = purged.iter().map(Period::month_of).collect();
                for month in months {
                    let error = self.error(code, contract, month, ErrorKind::NoStored);
                    self.classify(&mut report, error)?;
                }
            }
        }
        Ok(report)
    }

    fn error(&self, code: &str, contract: &str, period: Period, kind: ErrorKind) -> ErrorRecord {
        ErrorRecord::new(code, contract, period, kind, self.clock.today())
    }

    fn classify(&self, report: &mut ValidationReport, error: ErrorRecord) -> CacheResult<()> {
        warn!(
            class = %error.class,
            contract = %error.contract,
            period = %error.period,
            kind = %error.kind,
            "cached result drift"
        );
        if self.config.log_errors && self.errors.record_unique(error.clone())? {
            report.recorded += 1;
        }
        report.errors.push(error);
        Ok(())
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
