//! Process-level tests for the `peltier-host` binary

use peltier_control::simulator::{self, Simulator, SimulatorConfig};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tokio::sync::Mutex;

fn write_config(addr: SocketAddr) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[server]\nuri = 'http://{}/RPC2'\ntimeout_secs = 5\n\n[control]\npoll_interval_ms = 10",
        addr
    )
    .unwrap();
    file.flush().unwrap();
    file
}

async fn host(config: &NamedTempFile, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_peltier-host"))
        .arg("--config")
        .arg(config.path())
        .args(args)
        .output()
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_probe_exits_cleanly() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let sim = Arc::new(Mutex::new(Simulator::new(SimulatorConfig::default())));
    tokio::spawn(simulator::serve(listener, sim));

    let config = write_config(addr);
    let output = host(&config, &["probe"]).await;

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("Thermocouple signal: "), "stdout: {}", stdout);
    assert_eq!(stdout.lines().count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_prints_each_tick() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let sim = Arc::new(Mutex::new(Simulator::new(SimulatorConfig::default())));
    tokio::spawn(simulator::serve(listener, sim));

    let config = write_config(addr);
    let output = host(&config, &["run", "--max-ticks", "3"]).await;

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 3);
    for line in lines {
        assert!(line.contains("expected: 0.798000 mV"), "line: {}", line);
        assert!(line.contains("accuracy: "), "line: {}", line);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remote_fault_exits_non_zero() {
    let addr = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let config = write_config(addr);

    for args in [&["probe"][..], &["run", "--max-ticks", "3"][..]] {
        let output = host(&config, args).await;
        assert_eq!(output.status.code(), Some(1));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("ERROR: "), "stderr: {}", stderr);
        assert!(stderr.contains("(-504)"), "stderr: {}", stderr);
        assert!(output.stdout.is_empty());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_config_exits_non_zero() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[control]\ncurrent_limit = -1.0").unwrap();
    file.flush().unwrap();

    let output = host(&file, &["probe"]).await;
    assert_eq!(output.status.code(), Some(1));
}
