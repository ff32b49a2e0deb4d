// src/control/mod.rs - Peltier control loop
pub mod controller;
pub mod law;

pub use controller::{ExperimentController, RunSummary, StopReason, TickReport};
pub use law::{CURRENT_LIMIT, ProportionalLaw, REFERENCE_SIGNAL_MV, accuracy_ratio, compute_next_current};
