//! Core traits for authping.
//!
//! The receiver produces measurements and the sender produces start-up
//! banners; where they end up is decided by a [`RecordSink`].

use std::time::Duration;

use crate::output::MeasurementRecord;

/// Destination of verified measurements.
///
/// Implementations must write each record as one indivisible unit: records
/// come from two receiver tasks concurrently and downstream parsers are
/// line-oriented.
///
/// # Example
///
/// ```ignore
/// struct Collect(std::sync::Mutex<Vec<MeasurementRecord>>);
///
/// impl RecordSink for Collect {
///     fn emit(&self, record: &MeasurementRecord) {
///         self.0.lock().unwrap().push(record.clone());
///     }
/// }
/// ```
pub trait RecordSink: Send + Sync + 'static {
    /// Emit one verified measurement.
    fn emit(&self, record: &MeasurementRecord);

    /// Announce that probing of `destination` starts after `delay`.
    fn announce(&self, _destination: &str, _size: u16, _delay: Duration) {}
}
