//! HTTP health probing for instance servers.

use std::time::Duration;

use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;
use tokio::process::Child;
use tokio::time::sleep;

use super::HEALTH_REQUEST_TIMEOUT;
use crate::error::{LauncherError, Result};

/// Shape of the server's health endpoint response.
#[derive(Debug, Deserialize)]
struct HealthResponse {
    message: String,
}

/// Build the probe client with its per-request timeout.
pub fn health_client() -> Result<Client> {
    Client::builder()
        .timeout(HEALTH_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| LauncherError::network(e.to_string()))
}

/// One readiness probe: 2xx from the health endpoint with the expected JSON
/// body shape. OS-level liveness is the supervisor's concern, not handled
/// here.
pub async fn check_health(client: &Client, port: u16) -> bool {
    let url = format!("http://127.0.0.1:{}/health", port);
    let Ok(response) = client.get(&url).send().await else {
        return false;
    };
    if !response.status().is_success() {
        return false;
    }
    match response.json::<HealthResponse>().await {
        Ok(body) => {
            debug!("health probe on port {}: {}", port, body.message);
            true
        }
        Err(_) => false,
    }
}

/// Result of the startup probe window.
#[derive(Debug)]
pub enum StartupProbe {
    /// The health endpoint answered.
    Ready,
    /// The process is still alive but never answered within the timeout.
    TimedOut,
    /// The process exited before becoming healthy.
    Exited(std::process::ExitStatus),
}

/// Poll the health endpoint until the instance answers, the child exits, or
/// the timeout elapses. The child is only observed, never killed: a
/// slow-to-start process is left running.
pub async fn await_ready(
    client: &Client,
    child: &mut Child,
    port: u16,
    timeout: Duration,
    interval: Duration,
) -> Result<StartupProbe> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|e| LauncherError::io(format!("Failed to poll child status: {}", e)))?
        {
            return Ok(StartupProbe::Exited(status));
        }
        if check_health(client, port).await {
            return Ok(StartupProbe::Ready);
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(
                "instance on port {} not healthy after {}s",
                port,
                timeout.as_secs()
            );
            return Ok(StartupProbe::TimedOut);
        }
        sleep(interval).await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::{Read as _, Write as _};
    use std::net::TcpListener;
    use std::time::Duration;

    use tokio::process::Command;

    use super::{await_ready, check_health, health_client, StartupProbe};

    /// Minimal HTTP responder answering every request with one canned
    /// response.
    fn spawn_http_stub(status_line: &'static str, body: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let response = format!(
                    "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        port
    }

    fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn healthy_endpoint_answers_probe() {
        let port = spawn_http_stub("HTTP/1.1 200 OK", r#"{"message":"Service is healthy"}"#);
        let client = health_client().unwrap();
        assert!(check_health(&client, port).await);
    }

    #[tokio::test]
    async fn error_status_fails_probe() {
        let port = spawn_http_stub(
            "HTTP/1.1 503 Service Unavailable",
            r#"{"message":"starting"}"#,
        );
        let client = health_client().unwrap();
        assert!(!check_health(&client, port).await);
    }

    #[tokio::test]
    async fn non_json_body_fails_probe() {
        let port = spawn_http_stub("HTTP/1.1 200 OK", "it works");
        let client = health_client().unwrap();
        assert!(!check_health(&client, port).await);
    }

    #[tokio::test]
    async fn unreachable_port_fails_probe() {
        let client = health_client().unwrap();
        assert!(!check_health(&client, free_port()).await);
    }

    #[tokio::test]
    async fn await_ready_reports_ready_once_endpoint_answers() {
        let port = spawn_http_stub("HTTP/1.1 200 OK", r#"{"message":"Service is healthy"}"#);
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let client = health_client().unwrap();

        let probe = await_ready(
            &client,
            &mut child,
            port,
            Duration::from_secs(5),
            Duration::from_millis(50),
        )
        .await
        .unwrap();
        assert!(matches!(probe, StartupProbe::Ready));

        let _ = child.kill().await;
        let _ = child.wait().await;
    }

    #[tokio::test]
    async fn await_ready_reports_exit_during_startup() {
        let mut child = Command::new("true").spawn().unwrap();
        let client = health_client().unwrap();

        let probe = await_ready(
            &client,
            &mut child,
            free_port(),
            Duration::from_secs(5),
            Duration::from_millis(20),
        )
        .await
        .unwrap();
        assert!(matches!(probe, StartupProbe::Exited(status) if status.success()));
    }

    #[tokio::test]
    async fn await_ready_times_out_on_silent_process() {
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let client = health_client().unwrap();

        let probe = await_ready(
            &client,
            &mut child,
            free_port(),
            Duration::from_millis(300),
            Duration::from_millis(50),
        )
        .await
        .unwrap();
        assert!(matches!(probe, StartupProbe::TimedOut));

        let _ = child.kill().await;
        let _ = child.wait().await;
    }
}
