//! Local stand-in for the remote thermoelectric experiment.
//!
//! A lumped thermal model of a plate on a Peltier module, read through a
//! type-K thermocouple, served over the same XML-RPC methods as the real rig.
//! Positive current pumps heat out of the plate; Joule heating and leakage to
//! ambient work against it.

pub mod server;

pub use server::{SharedSimulator, create_router, serve};

use crate::control::CURRENT_LIMIT;
use crate::rpc::{RemoteFault, Value, methods};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Application fault codes reported by the simulator.
pub mod sim_fault_codes {
    pub const INVALID_TOKEN: i32 = 1;
    pub const NOT_STARTED: i32 = 2;
    pub const CURRENT_OUT_OF_RANGE: i32 = 3;
    pub const PARSE_ERROR: i32 = -32700;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
}

/// Type-K sensitivity around room temperature (mV/°C).
pub const SEEBECK_MV_PER_C: f64 = 0.0399;

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub tokens: Vec<String>,
    pub ambient_c: f64,
    /// Peak-to-peak uniform noise added to each reading (mV).
    pub noise_mv: f64,
    /// Integration step (s).
    pub step: f64,
    /// Longest gap between calls that is simulated; older time is dropped.
    pub max_catch_up: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            tokens: vec!["local_server_token".to_string()],
            ambient_c: 25.0,
            noise_mv: 0.0,
            step: 0.1,
            max_catch_up: Duration::from_secs(600),
        }
    }
}

/// Plate thermal state.
#[derive(Debug, Clone)]
pub struct PlateState {
    pub temp_c: f64,
    /// Heat capacity (J/K)
    pub heat_capacity: f64,
    /// Peltier heat pumped per ampere (W/A)
    pub pump_coefficient: f64,
    /// Module electrical resistance (Ω)
    pub resistance: f64,
    /// Thermal conductance to ambient (W/K)
    pub loss_coefficient: f64,
}

impl PlateState {
    pub fn at(temp_c: f64) -> Self {
        Self {
            temp_c,
            heat_capacity: 40.0,
            pump_coefficient: 4.0,
            resistance: 2.0,
            loss_coefficient: 0.4,
        }
    }

    pub fn update(&mut self, current: f64, ambient_c: f64, dt: f64) {
        let pumped = self.pump_coefficient * current;
        // Half of the Joule heat ends up on the plate side.
        let joule = 0.5 * self.resistance * current * current;
        let leak = self.loss_coefficient * (self.temp_c - ambient_c);
        self.temp_c += (joule - pumped - leak) / self.heat_capacity * dt;
    }

    /// Temperature the plate settles at for a constant current.
    pub fn equilibrium(&self, current: f64, ambient_c: f64) -> f64 {
        let joule = 0.5 * self.resistance * current * current;
        ambient_c + (joule - self.pump_coefficient * current) / self.loss_coefficient
    }
}

/// Thermocouple with first-order lag and uniform noise.
#[derive(Debug, Clone)]
pub struct ThermocoupleState {
    pub measured_c: f64,
    pub lag: f64,
    pub noise_mv: f64,
}

impl ThermocoupleState {
    pub fn update(&mut self, true_temp_c: f64, dt: f64) {
        let alpha = (self.lag * dt).min(1.0);
        self.measured_c += alpha * (true_temp_c - self.measured_c);
    }

    pub fn signal_mv(&self) -> f64 {
        let mut signal = SEEBECK_MV_PER_C * self.measured_c;
        if self.noise_mv > 0.0 {
            signal += self.noise_mv * (rand::random::<f64>() - 0.5);
        }
        signal
    }
}

/// One running experiment, owned by a session token.
#[derive(Debug, Clone)]
pub struct Experiment {
    pub run_id: Uuid,
    pub plate: PlateState,
    pub sensor: ThermocoupleState,
    pub current: f64,
    last_update: Instant,
}

impl Experiment {
    fn new(config: &SimulatorConfig, now: Instant) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            plate: PlateState::at(config.ambient_c),
            sensor: ThermocoupleState {
                measured_c: config.ambient_c,
                lag: 0.8,
                noise_mv: config.noise_mv,
            },
            current: 0.0,
            last_update: now,
        }
    }

    /// Integrate the model for `elapsed` seconds of simulated time.
    pub fn advance(&mut self, elapsed: f64, ambient_c: f64, step: f64) {
        let mut remaining = elapsed;
        while remaining > 0.0 {
            let dt = remaining.min(step);
            self.plate.update(self.current, ambient_c, dt);
            self.sensor.update(self.plate.temp_c, dt);
            remaining -= dt;
        }
    }

    fn catch_up(&mut self, now: Instant, config: &SimulatorConfig) {
        let elapsed = now.saturating_duration_since(self.last_update).min(config.max_catch_up);
        self.advance(elapsed.as_secs_f64(), config.ambient_c, config.step);
        self.last_update = now;
    }
}

/// Session table and method dispatch.
#[derive(Debug)]
pub struct Simulator {
    config: SimulatorConfig,
    tokens: HashSet<String>,
    sessions: HashMap<String, Experiment>,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let tokens = config.tokens.iter().cloned().collect();
        Self {
            config,
            tokens,
            sessions: HashMap::new(),
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn experiment(&self, token: &str) -> Option<&Experiment> {
        self.sessions.get(token)
    }

    /// Execute one remote call at time `now`.
    pub fn handle(&mut self, method: &str, params: &[Value], now: Instant) -> Result<Value, RemoteFault> {
        let token = params.first().and_then(Value::as_str).ok_or_else(|| {
            RemoteFault::new("missing experiment token", sim_fault_codes::INVALID_PARAMS)
        })?;
        if !self.tokens.contains(token) {
            tracing::warn!("Rejected call to {} with unknown token", method);
            return Err(RemoteFault::new("invalid experiment token", sim_fault_codes::INVALID_TOKEN));
        }

        match method {
            methods::RUN_EXPERIMENT => {
                expect_arity(method, params, 1)?;
                let experiment = Experiment::new(&self.config, now);
                let run_id = experiment.run_id.to_string();
                self.sessions.insert(token.to_string(), experiment);
                tracing::info!("Experiment {} started", run_id);
                Ok(Value::String(run_id))
            }
            methods::GET_THERMOCOUPLE_SIGNAL => {
                expect_arity(method, params, 1)?;
                let experiment = self.sessions.get_mut(token).ok_or_else(not_started)?;
                experiment.catch_up(now, &self.config);
                Ok(Value::Double(experiment.sensor.signal_mv()))
            }
            methods::SET_CURRENT => {
                expect_arity(method, params, 2)?;
                let amps = params[1].as_f64().ok_or_else(|| {
                    RemoteFault::new(
                        format!("current must be a double, got {}", params[1].kind()),
                        sim_fault_codes::INVALID_PARAMS,
                    )
                })?;
                if !amps.is_finite() || amps.abs() > CURRENT_LIMIT {
                    return Err(RemoteFault::new(
                        format!("current {} A outside [-{limit}, {limit}] A", amps, limit = CURRENT_LIMIT),
                        sim_fault_codes::CURRENT_OUT_OF_RANGE,
                    ));
                }
                let experiment = self.sessions.get_mut(token).ok_or_else(not_started)?;
                experiment.catch_up(now, &self.config);
                experiment.current = amps;
                tracing::debug!("Peltier current set to {} A", amps);
                Ok(Value::Boolean(true))
            }
            other => Err(RemoteFault::new(
                format!("method '{}' not found", other),
                sim_fault_codes::METHOD_NOT_FOUND,
            )),
        }
    }
}

fn not_started() -> RemoteFault {
    RemoteFault::new(
        "experiment not started, call run_experiment first",
        sim_fault_codes::NOT_STARTED,
    )
}

fn expect_arity(method: &str, params: &[Value], expected: usize) -> Result<(), RemoteFault> {
    if params.len() != expected {
        return Err(RemoteFault::new(
            format!("{} expects {} params, got {}", method, expected, params.len()),
            sim_fault_codes::INVALID_PARAMS,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> Value {
        Value::from("local_server_token")
    }

    #[test]
    fn test_plate_settles_at_equilibrium() {
        let mut plate = PlateState::at(25.0);
        for _ in 0..20_000 {
            plate.update(1.0, 25.0, 0.1);
        }
        let expected = plate.equilibrium(1.0, 25.0);
        assert!((expected - 17.5).abs() < 1e-9);
        assert!((plate.temp_c - expected).abs() < 0.01, "plate at {}", plate.temp_c);
    }

    #[test]
    fn test_joule_heating_dominates_at_high_reverse_current() {
        let plate = PlateState::at(25.0);
        assert!(plate.equilibrium(-6.4, 25.0) > plate.equilibrium(0.0, 25.0));
        assert_eq!(plate.equilibrium(0.0, 25.0), 25.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_lifecycle() {
        let mut sim = Simulator::new(SimulatorConfig::default());
        let start = Instant::now();

        let fault = sim.handle(methods::GET_THERMOCOUPLE_SIGNAL, &[token()], start).unwrap_err();
        assert_eq!(fault.code, sim_fault_codes::NOT_STARTED);

        let run_id = sim.handle(methods::RUN_EXPERIMENT, &[token()], start).unwrap();
        assert!(Uuid::parse_str(run_id.as_str().unwrap()).is_ok());

        let signal = sim.handle(methods::GET_THERMOCOUPLE_SIGNAL, &[token()], start).unwrap();
        assert!((signal.as_f64().unwrap() - 25.0 * SEEBECK_MV_PER_C).abs() < 1e-12);

        sim.handle(methods::SET_CURRENT, &[token(), Value::Double(2.0)], start).unwrap();
        let later = start + Duration::from_secs(60);
        let cooled = sim.handle(methods::GET_THERMOCOUPLE_SIGNAL, &[token()], later).unwrap();
        assert!(cooled.as_f64().unwrap() < 25.0 * SEEBECK_MV_PER_C);

        // Restart resets to ambient.
        sim.handle(methods::RUN_EXPERIMENT, &[token()], later).unwrap();
        let experiment = sim.experiment("local_server_token").unwrap();
        assert_eq!(experiment.plate.temp_c, 25.0);
        assert_eq!(experiment.current, 0.0);
    }

    #[test]
    fn test_rejects_bad_calls() {
        let mut sim = Simulator::new(SimulatorConfig::default());
        let now = Instant::now();

        let fault = sim.handle(methods::RUN_EXPERIMENT, &[Value::from("stolen")], now).unwrap_err();
        assert_eq!(fault.code, sim_fault_codes::INVALID_TOKEN);

        let fault = sim.handle(methods::RUN_EXPERIMENT, &[], now).unwrap_err();
        assert_eq!(fault.code, sim_fault_codes::INVALID_PARAMS);

        let fault = sim.handle("shutdown_lab", &[token()], now).unwrap_err();
        assert_eq!(fault.code, sim_fault_codes::METHOD_NOT_FOUND);

        sim.handle(methods::RUN_EXPERIMENT, &[token()], now).unwrap();
        let fault = sim.handle(methods::SET_CURRENT, &[token(), Value::Double(7.0)], now).unwrap_err();
        assert_eq!(fault.code, sim_fault_codes::CURRENT_OUT_OF_RANGE);
        let fault = sim.handle(methods::SET_CURRENT, &[token(), Value::from("hot")], now).unwrap_err();
        assert_eq!(fault.code, sim_fault_codes::INVALID_PARAMS);
        let fault = sim.handle(methods::SET_CURRENT, &[token()], now).unwrap_err();
        assert_eq!(fault.code, sim_fault_codes::INVALID_PARAMS);
    }

    #[test]
    fn test_noise_stays_within_band() {
        let sensor = ThermocoupleState {
            measured_c: 20.0,
            lag: 0.8,
            noise_mv: 0.01,
        };
        for _ in 0..1000 {
            let signal = sensor.signal_mv();
            assert!((signal - 0.798).abs() <= 0.005 + 1e-12);
        }
    }
}
