use std::fs;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use tokio::process::Command;

use super::io::Pipes;
use super::{ExecutionRequest, RunOutcome, Sandbox, exit_code_of, spawn_cleanup};

const MOUNT_POINT: &str = "/workspace";
const MEMORY_PEAK_FILE: &str = ".memory_peak";
const RUNTIME_PROCESSES: u32 = 64;
/// Exit code of `docker run` itself failing, as opposed to the container
const DOCKER_RUN_FAILURE: i32 = 125;
const CONTAINER_STARTUP: Duration = Duration::from_secs(3);

/// Runs the command under `timeout` and records the container's peak memory
/// (cgroup v2 first, v1 as a fallback) before exiting with its status.
const WRAPPER_SCRIPT: &str = r#"timeout "$0" "$@"; code=$?
cat /sys/fs/cgroup/memory.peak > .memory_peak 2>/dev/null \
  || cat /sys/fs/cgroup/memory/memory.max_usage_in_bytes > .memory_peak 2>/dev/null
exit $code"#;

static CONTAINER_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A runner that starts one throwaway container per execution
///
/// The workspace is bind-mounted into the adapter's image; network, memory,
/// CPU share and process count are capped by the container runtime. The
/// container is force-removed when the execution ends or is abandoned.
pub struct DockerRunner {
    binary: String,
}

impl DockerRunner {
    pub fn build(binary: &str) -> Result<Self> {
        let available = std::process::Command::new(binary)
            .arg("version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false);
        if !available {
            bail!("`{binary}` is not available or cannot reach its daemon");
        }

        log::info!("DockerRunner initialized");
        Ok(Self {
            binary: binary.to_string(),
        })
    }
}

/// Force-removes the named container on drop
struct ContainerGuard {
    binary: String,
    name: String,
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let binary = std::mem::take(&mut self.binary);
        let name = std::mem::take(&mut self.name);
        spawn_cleanup(move || {
            let removed = std::process::Command::new(&binary)
                .args(["rm", "-f", &name])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            if let Err(e) = removed {
                log::error!("Failed to remove container {name}: {e}");
            }
        });
    }
}

#[async_trait]
impl Sandbox for DockerRunner {
    fn name(&self) -> &'static str {
        "DockerRunner"
    }

    fn startup_grace(&self) -> Duration {
        CONTAINER_STARTUP
    }

    async fn execute(&self, request: ExecutionRequest<'_>) -> Result<RunOutcome> {
        if request.command.is_empty() {
            bail!("Empty command");
        }

        let name = format!(
            "oj-judge-{}-{}",
            std::process::id(),
            CONTAINER_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let args = docker_run_args(&name, &request);
        let _container = ContainerGuard {
            binary: self.binary.clone(),
            name,
        };

        let start = Instant::now();
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn {} run: {}", self.binary, e))?;
        let mut pipes = Pipes::attach(&mut child, request.stdin);
        let status = child.wait().await?;
        let wall_time = start.elapsed();
        let (stdout, stderr) = pipes.collect().await;

        let exit_code = exit_code_of(status);
        if exit_code == DOCKER_RUN_FAILURE {
            bail!("{} run failed: {}", self.binary, stderr.trim());
        }

        let memory_kb = read_memory_peak(request.workdir);

        Ok(RunOutcome {
            exit_code,
            stdout,
            stderr,
            wall_time,
            memory_kb,
            timed_out: exit_code == 124,
        })
    }
}

fn docker_run_args(name: &str, request: &ExecutionRequest<'_>) -> Vec<String> {
    let mount = format!("{}:{MOUNT_POINT}", request.workdir.display());
    let memory = format!("{}m", request.memory_limit_mb);

    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        "-i".to_string(),
        "--name".to_string(),
        name.to_string(),
        format!("--cpus={:.2}", request.cpu_limit),
        format!("--memory={memory}"),
        format!("--memory-swap={memory}"),
        format!("--pids-limit={RUNTIME_PROCESSES}"),
        format!("--ulimit=cpu={}", request.cpu_seconds()),
        "-v".to_string(),
        mount,
        "-w".to_string(),
        MOUNT_POINT.to_string(),
    ];
    if request.no_network {
        args.extend(["--network".to_string(), "none".to_string()]);
    }
    args.extend([
        request.image.to_string(),
        "sh".to_string(),
        "-c".to_string(),
        WRAPPER_SCRIPT.to_string(),
        format!("{:.3}", request.timeout.as_secs_f64()),
    ]);
    args.extend(request.command.iter().cloned());
    args
}

/// Peak memory recorded by the wrapper script, in KB
fn read_memory_peak(workdir: &Path) -> u64 {
    let path = workdir.join(MEMORY_PEAK_FILE);
    let bytes = fs::read_to_string(&path)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok());
    let _ = fs::remove_file(&path);

    match bytes {
        Some(bytes) => bytes / 1024,
        None => {
            log::debug!("Container reported no memory peak");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_isolated_run_arguments() {
        let command = vec!["python3".to_string(), "solution.py".to_string()];
        let request = ExecutionRequest {
            image: "python:3.12-slim",
            command: &command,
            workdir: Path::new("/tmp/oj-judge-x"),
            stdin: b"",
            cpu_limit: 0.5,
            memory_limit_mb: 128,
            timeout: Duration::from_secs(1),
            no_network: true,
        };
        let args = docker_run_args("oj-judge-1-0", &request);

        for expected in [
            "--rm",
            "--cpus=0.50",
            "--memory=128m",
            "--memory-swap=128m",
            "--ulimit=cpu=2",
            "/tmp/oj-judge-x:/workspace",
            "none",
        ] {
            assert!(args.iter().any(|a| a == expected), "missing {expected}");
        }
        let tail: Vec<&str> = args[args.len() - 7..].iter().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec!["python:3.12-slim", "sh", "-c", WRAPPER_SCRIPT, "1.000", "python3", "solution.py"]
        );
    }

    #[test]
    fn memory_peak_is_read_in_kb_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MEMORY_PEAK_FILE), "10485760\n").unwrap();
        assert_eq!(read_memory_peak(dir.path()), 10240);
        assert!(!dir.path().join(MEMORY_PEAK_FILE).exists());
        assert_eq!(read_memory_peak(dir.path()), 0);
    }
}
