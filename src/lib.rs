// src/lib.rs - Remote Peltier experiment controller
pub mod config;
pub mod control;
pub mod rpc;
pub mod simulator;

pub use config::{Config, ConfigError, ControlConfig, ServerConfig, load_config};
pub use control::{ExperimentController, RunSummary, StopReason, TickReport};
pub use rpc::{ExperimentTransport, RemoteFault, XmlRpcClient};
