//! Measurement values produced by one poll cycle.
//!
//! - [`stats`]: reduction of a band sweep to max/min/mean/median/stddev
//! - [`datapoint`]: the timestamped, tagged unit handed to the sink

pub mod datapoint;
pub mod stats;

pub use datapoint::{DataPoint, FieldValue};
pub use stats::{aggregate, AggregateStats};
