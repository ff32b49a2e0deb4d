//! Axum endpoint exposing the simulator over XML-RPC.

use super::{Simulator, sim_fault_codes};
use crate::rpc::RemoteFault;
use crate::rpc::xmlrpc;
use axum::{
    Router,
    extract::State,
    http::header,
    response::IntoResponse,
    routing::post,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub type SharedSimulator = Arc<Mutex<Simulator>>;

/// Creates the router serving `POST /RPC2`.
pub fn create_router(simulator: SharedSimulator) -> Router {
    Router::new()
        .route("/RPC2", post(handle_rpc))
        .with_state(simulator)
}

/// Serve the simulator until the listener fails.
pub async fn serve(listener: TcpListener, simulator: SharedSimulator) -> std::io::Result<()> {
    tracing::info!("Simulation server listening on http://{}/RPC2", listener.local_addr()?);
    axum::serve(listener, create_router(simulator)).await
}

/// Faults travel in-band, so every reply is HTTP 200.
async fn handle_rpc(State(simulator): State<SharedSimulator>, body: String) -> impl IntoResponse {
    let reply = match xmlrpc::decode_call(&body) {
        Ok(call) => {
            let mut simulator = simulator.lock().await;
            match simulator.handle(&call.method, &call.params, Instant::now()) {
                Ok(value) => xmlrpc::encode_response(&value),
                Err(fault) => {
                    tracing::debug!("{} -> fault {}", call.method, fault);
                    xmlrpc::encode_fault(&fault)
                }
            }
        }
        Err(e) => {
            tracing::warn!("Malformed XML-RPC request: {}", e);
            xmlrpc::encode_fault(&RemoteFault::new(
                format!("parse error: {}", e),
                sim_fault_codes::PARSE_ERROR,
            ))
        }
    };
    ([(header::CONTENT_TYPE, "text/xml")], reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{Value, methods};
    use crate::simulator::SimulatorConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt; // for .collect().await
    use tower::util::ServiceExt; // for `oneshot`

    fn app() -> Router {
        create_router(Arc::new(Mutex::new(Simulator::new(SimulatorConfig::default()))))
    }

    async fn call(app: Router, body: String) -> Result<Value, RemoteFault> {
        let request = Request::builder()
            .method("POST")
            .uri("/RPC2")
            .header("content-type", "text/xml")
            .body(Body::from(body))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/xml");
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        xmlrpc::decode_result(std::str::from_utf8(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_run_experiment_returns_run_id() {
        let body = xmlrpc::encode_call(methods::RUN_EXPERIMENT, &[Value::from("local_server_token")]);
        let value = call(app(), body).await.unwrap();
        assert_eq!(value.as_str().map(str::len), Some(36));
    }

    #[tokio::test]
    async fn test_invalid_token_is_a_fault() {
        let body = xmlrpc::encode_call(methods::RUN_EXPERIMENT, &[Value::from("nope")]);
        let fault = call(app(), body).await.unwrap_err();
        assert_eq!(fault.code, sim_fault_codes::INVALID_TOKEN);
        assert_eq!(fault.message, "invalid experiment token");
    }

    #[tokio::test]
    async fn test_state_persists_across_requests() {
        let app = app();
        let token = Value::from("local_server_token");
        call(app.clone(), xmlrpc::encode_call(methods::RUN_EXPERIMENT, &[token.clone()]))
            .await
            .unwrap();
        let signal = call(app, xmlrpc::encode_call(methods::GET_THERMOCOUPLE_SIGNAL, &[token]))
            .await
            .unwrap();
        assert!(signal.as_f64().unwrap() > 0.9);
    }

    #[tokio::test]
    async fn test_malformed_request_is_a_parse_fault() {
        let fault = call(app(), "<methodCall><oops".to_string()).await.unwrap_err();
        assert_eq!(fault.code, sim_fault_codes::PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_deeply_nested_request_is_a_parse_fault() {
        let body = format!(
            "<?xml version=\"1.0\"?><methodCall><methodName>set_current</methodName><params>\
             <param><value><string>local_server_token</string></value></param><param>{}</param></params></methodCall>",
            "<value><array><data>".repeat(20_000)
        );
        let app = app();
        let fault = call(app.clone(), body).await.unwrap_err();
        assert_eq!(fault.code, sim_fault_codes::PARSE_ERROR);

        // The server keeps answering afterwards.
        let body = xmlrpc::encode_call(methods::RUN_EXPERIMENT, &[Value::from("local_server_token")]);
        assert!(call(app, body).await.is_ok());
    }
}
