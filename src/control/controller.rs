// src/control/controller.rs - Experiment controller driving the remote Peltier rig
use super::law::ProportionalLaw;
use crate::config::ControlConfig;
use crate::rpc::{ExperimentTransport, RemoteFault};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::broadcast;

/// Outcome of one control iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub at: DateTime<Utc>,
    pub signal_mv: f64,
    pub reference_mv: f64,
    pub accuracy_percent: f64,
    /// Current commanded during this tick (A), already clamped.
    pub current: f64,
}

impl std::fmt::Display for TickReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Thermocouple signal: {:.6} mV, expected: {:.6} mV, accuracy: {:.2}%, current: {:.4} A",
            self.signal_mv, self.reference_mv, self.accuracy_percent, self.current
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The shutdown channel fired (or every sender was dropped).
    Shutdown,
    /// `max_ticks` iterations completed.
    TickLimit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub ticks: u64,
    pub final_current: f64,
    pub reason: StopReason,
}

/// Sequential sample → compute → actuate loop over an [`ExperimentTransport`].
///
/// Every remote fault is handed back to the caller untouched; nothing here
/// retries.
pub struct ExperimentController<T: ExperimentTransport> {
    transport: T,
    law: ProportionalLaw,
    current: f64,
    poll_interval: Duration,
    max_ticks: Option<u64>,
    ticks: u64,
}

impl<T: ExperimentTransport> ExperimentController<T> {
    pub fn new(transport: T, config: &ControlConfig) -> Self {
        let law = ProportionalLaw::new(config.reference_signal_mv, config.current_limit);
        Self {
            transport,
            current: law.clamp(config.initial_current),
            law,
            poll_interval: config.poll_interval(),
            max_ticks: config.max_ticks,
            ticks: 0,
        }
    }

    /// Last commanded current (A).
    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn law(&self) -> &ProportionalLaw {
        &self.law
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Hand the transport back for teardown.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Reset the remote simulation.
    pub async fn start_experiment(&mut self) -> Result<(), RemoteFault> {
        tracing::info!("Starting experiment");
        self.transport.run_experiment().await
    }

    pub async fn read_signal(&mut self) -> Result<f64, RemoteFault> {
        let signal = self.transport.get_thermocouple_signal_mv().await?;
        tracing::debug!("Thermocouple signal: {} mV", signal);
        Ok(signal)
    }

    /// Clamp `amps` into the safe range and push it to the actuator.
    /// Returns the value actually sent.
    pub async fn set_current(&mut self, amps: f64) -> Result<f64, RemoteFault> {
        let clamped = self.law.clamp(amps);
        if clamped != amps {
            tracing::warn!(
                "Requested current {:.4} A saturated to {:.4} A",
                amps,
                clamped
            );
        }
        self.transport.set_current(clamped).await?;
        Ok(clamped)
    }

    /// One iteration: read, compute, actuate.
    pub async fn tick(&mut self) -> Result<TickReport, RemoteFault> {
        let signal_mv = self.read_signal().await?;
        let next = self.law.next_current(self.current, signal_mv);
        let sent = self.set_current(next).await?;
        self.current = sent;
        self.ticks += 1;

        let report = TickReport {
            tick: self.ticks,
            at: Utc::now(),
            signal_mv,
            reference_mv: self.law.reference_signal_mv,
            accuracy_percent: self.law.accuracy_percent(signal_mv),
            current: sent,
        };
        tracing::debug!("Tick {}: {}", report.tick, report);
        Ok(report)
    }

    /// Connectivity smoke test: start the experiment and read the sensor once.
    /// Never actuates.
    pub async fn probe(&mut self) -> Result<f64, RemoteFault> {
        self.start_experiment().await?;
        self.read_signal().await
    }

    /// Start the experiment, then tick with a `poll_interval` pause after each
    /// iteration until `shutdown` fires, the tick limit is reached, or a call
    /// faults. The pause starts once the tick's calls have returned.
    pub async fn run<F>(
        &mut self,
        mut shutdown: broadcast::Receiver<()>,
        mut on_tick: F,
    ) -> Result<RunSummary, RemoteFault>
    where
        F: FnMut(&TickReport),
    {
        self.start_experiment().await?;
        tracing::info!(
            "Control loop running with {:?} between ticks (reference {} mV, limit ±{} A)",
            self.poll_interval,
            self.law.reference_signal_mv,
            self.law.current_limit
        );

        // First tick goes out right after the experiment starts.
        let mut pause = Duration::ZERO;
        loop {
            if let Some(max) = self.max_ticks {
                if self.ticks >= max {
                    tracing::info!("Tick limit {} reached", max);
                    return Ok(self.summary(StopReason::TickLimit));
                }
            }
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::info!("Control loop shutting down after {} ticks", self.ticks);
                    return Ok(self.summary(StopReason::Shutdown));
                }
                _ = tokio::time::sleep(pause) => {}
            }
            let report = self.tick().await?;
            on_tick(&report);
            pause = self.poll_interval;
        }
    }

    fn summary(&self, reason: StopReason) -> RunSummary {
        RunSummary {
            ticks: self.ticks,
            final_current: self.current,
            reason,
        }
    }
}
