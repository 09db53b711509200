//! Prober: turns HTTP fetches into Availability and Latency samples

pub mod probe;
pub mod worker;

pub use probe::{CycleReport, ProbeConfig, ProbeError, ProbeOutcome, ProbeResult, Prober};
pub use worker::ProbeWorker;
