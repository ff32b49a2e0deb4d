//! HTTP transport for the experiment server.

use super::xmlrpc::{self, Value};
use super::{ExperimentTransport, RemoteFault, fault_codes, methods};
use crate::config::ServerConfig;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;

/// XML-RPC client bound to one server endpoint and one session token.
pub struct XmlRpcClient {
    client: Client,
    uri: String,
    token: String,
}

impl XmlRpcClient {
    /// Build the HTTP client. Fails only if the underlying client cannot be
    /// constructed; no request is sent.
    pub fn initialize(config: &ServerConfig) -> Result<Self, RemoteFault> {
        let mut builder = Client::builder().user_agent(config.user_agent());
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| {
            RemoteFault::new(format!("Failed to create HTTP client: {}", e), fault_codes::INTERNAL_ERROR)
        })?;

        tracing::info!("XML-RPC client '{}' ready for {}", config.user_agent(), config.uri);
        Ok(Self {
            client,
            uri: config.uri.clone(),
            token: config.token.clone(),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Invoke `method` with the session token followed by `args`.
    pub async fn call(&self, method: &str, args: &[Value]) -> Result<Value, RemoteFault> {
        let mut params = Vec::with_capacity(args.len() + 1);
        params.push(Value::String(self.token.clone()));
        params.extend_from_slice(args);
        let body = xmlrpc::encode_call(method, &params);

        tracing::debug!("RPC -> {}({} args)", method, args.len());
        let response = self
            .client
            .post(&self.uri)
            .header(CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| RemoteFault::network(format!("Network error calling {}: {}", method, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteFault::network(format!(
                "HTTP {} from {} calling {}",
                status.as_u16(),
                self.uri,
                method
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| RemoteFault::network(format!("Failed to read response to {}: {}", method, e)))?;
        let result = xmlrpc::decode_result(&text);
        match &result {
            Ok(value) => tracing::debug!("RPC <- {}: {}", method, value.kind()),
            Err(fault) => tracing::warn!("RPC <- {} fault: {}", method, fault),
        }
        result
    }

    /// Release the transport. Taking `self` makes a second teardown impossible.
    pub fn teardown(self) {
        tracing::info!("XML-RPC client for {} shut down", self.uri);
    }
}

#[async_trait]
impl ExperimentTransport for XmlRpcClient {
    async fn run_experiment(&mut self) -> Result<(), RemoteFault> {
        let run = self.call(methods::RUN_EXPERIMENT, &[]).await?;
        if let Some(run_id) = run.as_str() {
            tracing::debug!("Experiment run id: {}", run_id);
        }
        Ok(())
    }

    async fn get_thermocouple_signal_mv(&mut self) -> Result<f64, RemoteFault> {
        let value = self.call(methods::GET_THERMOCOUPLE_SIGNAL, &[]).await?;
        let signal = value.as_f64().ok_or_else(|| {
            RemoteFault::type_error(format!(
                "{} returned {}, expected double",
                methods::GET_THERMOCOUPLE_SIGNAL,
                value.kind()
            ))
        })?;
        if !signal.is_finite() {
            return Err(RemoteFault::type_error(format!(
                "{} returned non-finite value {}",
                methods::GET_THERMOCOUPLE_SIGNAL,
                signal
            )));
        }
        Ok(signal)
    }

    async fn set_current(&mut self, amps: f64) -> Result<(), RemoteFault> {
        self.call(methods::SET_CURRENT, &[Value::Double(amps)]).await?;
        Ok(())
    }
}

impl std::fmt::Debug for XmlRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlRpcClient").field("uri", &self.uri).finish()
    }
}
