//! Probe implementations, one per target kind.
//!
//! Every checker upholds the same contract: `check` never returns an error.
//! Network failures, timeouts, missing processes, non-zero exits, and
//! malformed target config all become a failure [`HealthCheckResult`] with a
//! human-readable message.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::timeout;

use super::types::{HealthCheckResult, ResolvedTarget, TargetSpec};

/// Byte budget for captured stdout/stderr in command-check metadata.
const OUTPUT_BYTE_BUDGET: usize = 4_096;

/// Uniform probe contract across all target kinds.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self, target: &ResolvedTarget) -> HealthCheckResult;
}

/// HTTP checker: request with the configured method and headers, success iff
/// the response status equals the expected status.
pub struct HttpChecker {
    client: reqwest::Client,
}

impl HttpChecker {
    pub fn new() -> Result<Self, reqwest::Error> {
        // Per-request timeouts come from the target config.
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Probe for HttpChecker {
    async fn check(&self, target: &ResolvedTarget) -> HealthCheckResult {
        let TargetSpec::Http { url, method, expected_status, headers } = &target.spec else {
            return HealthCheckResult::unhealthy("target is not an http runtime");
        };

        let method = match reqwest::Method::from_bytes(method.to_uppercase().as_bytes()) {
            Ok(m) => m,
            Err(_) => {
                return HealthCheckResult::unhealthy(format!("invalid HTTP method: {method}"));
            }
        };

        let mut request = self.client.request(method, url).timeout(target.timeout());
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let start = Instant::now();
        match request.send().await {
            Ok(response) => {
                let elapsed = start.elapsed().as_millis() as u64;
                let status = response.status().as_u16();
                if status == *expected_status {
                    HealthCheckResult::healthy(elapsed).with_status_code(status)
                } else {
                    HealthCheckResult::unhealthy(format!(
                        "unexpected status {status} (expected {expected_status})"
                    ))
                    .with_status_code(status)
                    .with_response_time(elapsed)
                    .with_metadata("actualStatus", status)
                }
            }
            Err(e) if e.is_timeout() => HealthCheckResult::unhealthy(format!(
                "request timed out after {}ms",
                target.timeout_ms
            )),
            Err(e) => HealthCheckResult::unhealthy(format!("request failed: {e}")),
        }
    }
}

/// TCP checker: raw connect with the target timeout; success on connect.
pub struct TcpChecker;

#[async_trait]
impl Probe for TcpChecker {
    async fn check(&self, target: &ResolvedTarget) -> HealthCheckResult {
        let TargetSpec::Tcp { host, port } = &target.spec else {
            return HealthCheckResult::unhealthy("target is not a tcp runtime");
        };

        let start = Instant::now();
        let connect = tokio::net::TcpStream::connect((host.as_str(), *port));

        match timeout(target.timeout(), connect).await {
            Ok(Ok(_stream)) => {
                HealthCheckResult::healthy(start.elapsed().as_millis() as u64)
            }
            Ok(Err(e)) => HealthCheckResult::unhealthy(format!(
                "connection to {host}:{port} failed: {e}"
            ))
            .with_response_time(start.elapsed().as_millis() as u64),
            Err(_) => HealthCheckResult::unhealthy(format!(
                "connection to {host}:{port} timed out after {}ms",
                target.timeout_ms
            ))
            .with_response_time(start.elapsed().as_millis() as u64),
        }
    }
}

/// Process checker: scans live processes for a name/cmdline substring match.
pub struct ProcessChecker;

#[async_trait]
impl Probe for ProcessChecker {
    async fn check(&self, target: &ResolvedTarget) -> HealthCheckResult {
        let TargetSpec::Process { pattern } = &target.spec else {
            return HealthCheckResult::unhealthy("target is not a process runtime");
        };

        let needle = pattern.clone();
        let start = Instant::now();
        // sysinfo scans synchronously; keep it off the runtime threads.
        let scan = tokio::task::spawn_blocking(move || {
            let sys = sysinfo::System::new_all();
            let mut pids: Vec<u32> = Vec::new();
            for (pid, process) in sys.processes() {
                let name = process.name().to_string_lossy();
                let matches_name = name.contains(needle.as_str());
                let matches_cmd = process
                    .cmd()
                    .iter()
                    .any(|arg| arg.to_string_lossy().contains(needle.as_str()));
                if matches_name || matches_cmd {
                    pids.push(pid.as_u32());
                }
            }
            pids
        })
        .await;

        let elapsed = start.elapsed().as_millis() as u64;
        match scan {
            Ok(pids) if !pids.is_empty() => {
                let count = pids.len();
                HealthCheckResult::healthy(elapsed)
                    .with_metadata("pids", pids)
                    .with_metadata("matchCount", count)
            }
            Ok(_) => {
                HealthCheckResult::unhealthy(format!("no process matching '{pattern}' found"))
                    .with_metadata("matchCount", 0)
            }
            Err(e) => HealthCheckResult::unhealthy(format!("process scan failed: {e}")),
        }
    }
}

/// Docker checker: inspects container state by name via the docker CLI.
pub struct DockerChecker;

#[async_trait]
impl Probe for DockerChecker {
    async fn check(&self, target: &ResolvedTarget) -> HealthCheckResult {
        let TargetSpec::Docker { container } = &target.spec else {
            return HealthCheckResult::unhealthy("target is not a docker runtime");
        };

        let start = Instant::now();
        let inspect = tokio::process::Command::new("docker")
            .args(["inspect", "--format", "{{json .State}}", container])
            .kill_on_drop(true)
            .output();

        let output = match timeout(target.timeout(), inspect).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return HealthCheckResult::unhealthy(format!("failed to run docker: {e}"));
            }
            Err(_) => {
                return HealthCheckResult::unhealthy(format!(
                    "docker inspect timed out after {}ms",
                    target.timeout_ms
                ));
            }
        };
        let elapsed = start.elapsed().as_millis() as u64;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // The CLI reports missing containers as "No such object/container".
            if stderr.contains("No such") {
                return HealthCheckResult::unhealthy(format!(
                    "container '{container}' not found"
                ));
            }
            return HealthCheckResult::unhealthy(format!(
                "docker inspect failed: {}",
                stderr.trim()
            ));
        }

        let state: serde_json::Value = match serde_json::from_slice(&output.stdout) {
            Ok(v) => v,
            Err(e) => {
                return HealthCheckResult::unhealthy(format!(
                    "unparseable docker state for '{container}': {e}"
                ));
            }
        };

        let status = state.get("Status").and_then(|s| s.as_str()).unwrap_or("unknown");
        if status != "running" {
            return HealthCheckResult::unhealthy(format!(
                "container '{container}' is not running (state: {status})"
            ))
            .with_metadata("state", status);
        }

        match state.get("Health").and_then(|h| h.get("Status")).and_then(|s| s.as_str()) {
            // No health subsystem configured: running is enough.
            None => HealthCheckResult::healthy(elapsed).with_metadata("state", status),
            Some("healthy") => HealthCheckResult::healthy(elapsed)
                .with_metadata("state", status)
                .with_metadata("health", "healthy"),
            Some(health) => HealthCheckResult::unhealthy(format!(
                "container '{container}' is running but health is {health}"
            ))
            .with_metadata("state", status)
            .with_metadata("health", health),
        }
    }
}

/// Command checker: runs a shell command in the project directory; success is
/// the configured exit code, not merely zero.
pub struct CommandChecker;

#[async_trait]
impl Probe for CommandChecker {
    async fn check(&self, target: &ResolvedTarget) -> HealthCheckResult {
        let TargetSpec::Command { command, success_exit_code } = &target.spec else {
            return HealthCheckResult::unhealthy("target is not a command runtime");
        };

        let start = Instant::now();
        let run = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&target.project_path)
            .kill_on_drop(true)
            .output();

        match timeout(target.timeout(), run).await {
            Err(_) => HealthCheckResult::unhealthy(format!(
                "command timed out after {}ms",
                target.timeout_ms
            )),
            Ok(Err(e)) => HealthCheckResult::unhealthy(format!("failed to spawn command: {e}")),
            Ok(Ok(output)) => {
                let elapsed = start.elapsed().as_millis() as u64;
                let code = output.status.code().unwrap_or(-1);
                let stdout = truncate_output(&output.stdout);
                let stderr = truncate_output(&output.stderr);

                if code == *success_exit_code {
                    HealthCheckResult::healthy(elapsed)
                        .with_metadata("exitCode", code)
                        .with_metadata("stdout", stdout)
                        .with_metadata("stderr", stderr)
                } else {
                    HealthCheckResult::unhealthy(format!(
                        "exit code {code} (expected {success_exit_code})"
                    ))
                    .with_response_time(elapsed)
                    .with_metadata("exitCode", code)
                    .with_metadata("stdout", stdout)
                    .with_metadata("stderr", stderr)
                }
            }
        }
    }
}

fn truncate_output(bytes: &[u8]) -> String {
    let end = bytes.len().min(OUTPUT_BYTE_BUDGET);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Owns one checker per target kind and dispatches exhaustively.
pub struct CheckerSet {
    http: HttpChecker,
    tcp: TcpChecker,
    process: ProcessChecker,
    docker: DockerChecker,
    command: CommandChecker,
}

impl CheckerSet {
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: HttpChecker::new()?,
            tcp: TcpChecker,
            process: ProcessChecker,
            docker: DockerChecker,
            command: CommandChecker,
        })
    }
}

#[async_trait]
impl Probe for CheckerSet {
    async fn check(&self, target: &ResolvedTarget) -> HealthCheckResult {
        match &target.spec {
            TargetSpec::Http { .. } => self.http.check(target).await,
            TargetSpec::Tcp { .. } => self.tcp.check(target).await,
            TargetSpec::Process { .. } => self.process.check(target).await,
            TargetSpec::Docker { .. } => self.docker.check(target).await,
            TargetSpec::Command { .. } => self.command.check(target).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tokio::io::AsyncWriteExt;

    fn target(spec: TargetSpec, project_path: PathBuf, timeout_ms: u64) -> ResolvedTarget {
        ResolvedTarget {
            project_id: "p1".to_string(),
            project_path,
            project_name: "test".to_string(),
            name: "t".to_string(),
            spec,
            interval_ms: 30_000,
            timeout_ms,
            enabled: true,
        }
    }

    /// One-shot HTTP server answering every connection with a fixed status.
    async fn serve_status(status_line: &'static str) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                use tokio::io::AsyncReadExt;
                let _ = stream.read(&mut buf).await;
                let response =
                    format!("HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn http_unexpected_status_is_failure_with_code() {
        let addr = serve_status("500 Internal Server Error").await;
        let spec = TargetSpec::Http {
            url: format!("http://{addr}/health"),
            method: "GET".to_string(),
            expected_status: 200,
            headers: HashMap::new(),
        };
        let result = HttpChecker::new()
            .unwrap()
            .check(&target(spec, PathBuf::from("/tmp"), 2_000))
            .await;

        assert!(!result.success);
        assert_eq!(result.status_code, Some(500));
        assert!(result.error_message.as_deref().unwrap().contains("500"));
    }

    #[tokio::test]
    async fn http_expected_status_is_success() {
        let addr = serve_status("204 No Content").await;
        let spec = TargetSpec::Http {
            url: format!("http://{addr}/health"),
            method: "GET".to_string(),
            expected_status: 204,
            headers: HashMap::new(),
        };
        let result = HttpChecker::new()
            .unwrap()
            .check(&target(spec, PathBuf::from("/tmp"), 2_000))
            .await;

        assert!(result.success);
        assert_eq!(result.status_code, Some(204));
        assert!(result.response_time_ms.is_some());
    }

    #[tokio::test]
    async fn tcp_connect_success_and_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let open = TargetSpec::Tcp { host: "127.0.0.1".to_string(), port: addr.port() };
        let result = TcpChecker.check(&target(open, PathBuf::from("/tmp"), 1_000)).await;
        assert!(result.success);

        drop(listener);
        let closed = TargetSpec::Tcp { host: "127.0.0.1".to_string(), port: addr.port() };
        let result = TcpChecker.check(&target(closed, PathBuf::from("/tmp"), 1_000)).await;
        assert!(!result.success);
        assert!(result.error_message.is_some());
    }

    #[tokio::test]
    async fn command_custom_success_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let spec = TargetSpec::Command { command: "exit 2".to_string(), success_exit_code: 2 };
        let result = CommandChecker
            .check(&target(spec, dir.path().to_path_buf(), 5_000))
            .await;
        assert!(result.success, "exit 2 must succeed when successExitCode=2");
        assert_eq!(result.metadata.get("exitCode"), Some(&serde_json::json!(2)));
    }

    #[tokio::test]
    async fn command_wrong_exit_code_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let spec = TargetSpec::Command { command: "echo out; exit 3".to_string(), success_exit_code: 0 };
        let result = CommandChecker
            .check(&target(spec, dir.path().to_path_buf(), 5_000))
            .await;
        assert!(!result.success);
        assert!(result.error_message.as_deref().unwrap().contains("exit code 3"));
        assert_eq!(result.metadata.get("stdout"), Some(&serde_json::json!("out\n")));
    }

    #[tokio::test]
    async fn command_runs_in_project_directory() {
        let dir = tempfile::tempdir().unwrap();
        let spec = TargetSpec::Command { command: "test -e vigil-probe-marker".to_string(), success_exit_code: 0 };
        std::fs::write(dir.path().join("vigil-probe-marker"), "x").unwrap();
        let result = CommandChecker
            .check(&target(spec, dir.path().to_path_buf(), 5_000))
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn command_timeout_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let spec = TargetSpec::Command { command: "sleep 5".to_string(), success_exit_code: 0 };
        let result = CommandChecker
            .check(&target(spec, dir.path().to_path_buf(), 100))
            .await;
        assert!(!result.success);
        assert!(result.error_message.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn process_checker_finds_own_process() {
        // The test runner itself always matches an empty-ish unique pattern:
        // use the current binary name.
        let me = std::env::current_exe().unwrap();
        let name = me.file_name().unwrap().to_string_lossy().into_owned();
        let spec = TargetSpec::Process { pattern: name };
        let result = ProcessChecker.check(&target(spec, PathBuf::from("/tmp"), 5_000)).await;
        assert!(result.success);
        assert!(result.metadata.get("matchCount").is_some());
    }

    #[test]
    fn truncate_output_respects_budget() {
        let big = vec![b'a'; OUTPUT_BYTE_BUDGET + 100];
        assert_eq!(truncate_output(&big).len(), OUTPUT_BYTE_BUDGET);
    }
}
