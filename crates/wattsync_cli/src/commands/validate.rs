//! Validate command implementation.

use super::{open_store, CommandResult};
use std::collections::BTreeMap;
use std::path::Path;
use wattsync_cache::{ReconcileConfig, Reconciler, ResultClasses, ValidationReport};
use wattsync_protocol::{ErrorKind, Period};

/// Parses reference values given as `{"202301": 120.5, ...}`.
pub fn parse_values(raw: &str) -> CommandResult<BTreeMap<Period, f64>> {
    let parsed: BTreeMap<String, f64> = serde_json::from_str(raw)?;
    parsed
        .into_iter()
        .map(|(period, value)| -> CommandResult<(Period, f64)> { Ok((period.parse()?, value)) })
        .collect()
}

/// Validates one contract's cached results.
pub fn execute(
    path: &Path,
    class: &str,
    contract: &str,
    period: Option<Period>,
    values: &BTreeMap<Period, f64>,
    log_errors: bool,
) -> CommandResult<ValidationReport> {
    let store = open_store(path)?;
    let reconciler = Reconciler::new(store.clone(), store, ResultClasses::builtin())
        .with_config(ReconcileConfig::new().with_log_errors(log_errors));
    Ok(reconciler.validate(class, contract, values, period)?)
}

/// Runs the validate command.
pub fn run(
    path: &Path,
    class: &str,
    contract: &str,
    period: Option<Period>,
    values: &BTreeMap<Period, f64>,
    log_errors: bool,
) -> CommandResult<()> {
    let report = execute(path, class, contract, period, values, log_errors)?;

    println!("Validated {} for {}", report.class, report.contract);
    println!("  Matched periods: {}", report.matched.len());
    println!("  Removed rows:    {}", report.removed);
    for kind in ErrorKind::ALL {
        println!("  {}: {}", kind.label(), report.count(kind));
    }
    println!("  Recorded:        {}", report.recorded);

    if report.is_clean() {
        println!("✓ Cache matches reference values");
    } else {
        println!("✗ Cache drift found");
    }
    Ok(())
}
