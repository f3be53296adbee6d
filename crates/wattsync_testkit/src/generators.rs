//! Property-based test generators using proptest.

use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;
use std::collections::BTreeMap;
use wattsync_protocol::{Period, VersionTag};

use crate::fixtures::start_time;

/// Strategy for month periods between 2020 and 2025.
pub fn month_strategy() -> impl Strategy<Value = Period> {
    (2020i32..2026, 1u32..=12).prop_filter_map("valid month", |(year, month)| {
        Period::month(year, month).ok()
    })
}

/// Strategy for reference values keyed by month.
pub fn reference_values_strategy(max: usize) -> impl Strategy<Value = BTreeMap<Period, f64>> {
    prop::collection::btree_map(month_strategy(), (0u32..10_000).prop_map(f64::from), 0..max)
}

/// Strategy for opaque version tags.
pub fn version_tag_strategy() -> impl Strategy<Value = VersionTag> {
    "[0-9a-f]{16}".prop_map(VersionTag::new)
}

/// Strategy for distinct instants after the fixture start, unordered.
pub fn instants_strategy(max: usize) -> impl Strategy<Value = Vec<DateTime<Utc>>> {
    prop::collection::btree_set(1i64..10_000, 1..max).prop_flat_map(|minutes| {
        let instants: Vec<DateTime<Utc>> = minutes
            .into_iter()
            .map(|m| start_time() + Duration::minutes(m))
            .collect();
        Just(instants).prop_shuffle()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn months_are_month_granularity(period in month_strategy()) {
            prop_assert_eq!(period.month_of(), period);
        }

        #[test]
        fn instants_are_distinct(instants in instants_strategy(20)) {
            let unique: std::collections::BTreeSet<_> = instants.iter().collect();
            prop_assert_eq!(unique.len(), instants.len());
        }
    }
}
