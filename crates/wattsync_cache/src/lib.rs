//! # wattsync cache
//!
//! Cached remote results and their validation against local truth.
//!
//! This crate provides:
//! - [`ResultCache`] to pull results and read them back through class views
//! - [`Reconciler`] to classify drift, repair the cache and log errors
//! - [`ErrorReporter`] to report and clear logged errors
//! - [`ResultClasses`] describing each result type
//!
//! ## Drift taxonomy
//!
//! - `WrongValue`: cached and reference values disagree beyond tolerance
//! - `NoResult`: a reference value has no cached result
//! - `NoStored`: a cached result has no reference value
//!
//! Drift is data, not an error: validation returns it and records it in
//! the error log at most once per validation day.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod class;
mod error;
mod reconciler;
mod reporter;
mod source;

pub use cache::ResultCache;
pub use class::{
    CacheView, ResultClass, ResultClasses, ValidationRule, DEFAULT_TOLERANCE, DEFAULT_WINDOW_MONTHS,
    REPORT_CLASSES,
};
pub use error::{CacheError, CacheResult};
pub use reconciler::{ReconcileConfig, Reconciler, ValidationReport};
pub use reporter::{ClassCounts, ErrorReport, ErrorReporter, ReportDate, ReportFilter};
pub use source::{MemoryResultSource, RemoteResultSource, ResultSource};
