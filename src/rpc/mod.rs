//! Remote experiment interface.
//!
//! The controller only ever talks to the experiment server through
//! [`ExperimentTransport`]. [`client::XmlRpcClient`] is the network
//! implementation; tests substitute their own.

pub mod client;
pub mod xmlrpc;

use async_trait::async_trait;
use thiserror::Error;

pub use client::XmlRpcClient;
pub use xmlrpc::Value;

/// Remote method names exposed by the experiment server.
pub mod methods {
    pub const RUN_EXPERIMENT: &str = "run_experiment";
    pub const GET_THERMOCOUPLE_SIGNAL: &str = "get_thermocouple_signal_mV";
    pub const SET_CURRENT: &str = "set_current";
}

/// Client-side fault codes, numbered the way xmlrpc-c numbers them.
pub mod fault_codes {
    pub const INTERNAL_ERROR: i32 = -500;
    pub const TYPE_ERROR: i32 = -501;
    pub const PARSE_ERROR: i32 = -503;
    pub const NETWORK_ERROR: i32 = -504;
}

/// A remote call could not be completed, or the server reported an error.
///
/// Network, protocol and application failures all collapse into this one
/// type; the code tells them apart for diagnostics only.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} ({code})")]
pub struct RemoteFault {
    pub message: String,
    pub code: i32,
}

impl RemoteFault {
    pub fn new(message: impl Into<String>, code: i32) -> Self {
        Self { message: message.into(), code }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(message, fault_codes::NETWORK_ERROR)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(message, fault_codes::PARSE_ERROR)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(message, fault_codes::TYPE_ERROR)
    }
}

/// The three calls the controller needs from the experiment server.
#[async_trait]
pub trait ExperimentTransport: Send {
    /// Reset the remote simulation to a clean initial state.
    async fn run_experiment(&mut self) -> Result<(), RemoteFault>;

    /// Current thermocouple reading in millivolts.
    async fn get_thermocouple_signal_mv(&mut self) -> Result<f64, RemoteFault>;

    /// Command the Peltier current in amperes.
    async fn set_current(&mut self, amps: f64) -> Result<(), RemoteFault>;
}
