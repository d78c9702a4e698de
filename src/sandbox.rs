mod docker_runner;
mod io;
mod isolate_runner;
mod process_runner;
mod runner;
mod workspace;

// Re-export the trait and common types
pub use docker_runner::DockerRunner;
pub use isolate_runner::IsolateRunner;
pub use process_runner::ProcessRunner;
pub use runner::Sandbox;
pub use workspace::Workspace;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::config::SandboxConfig;
use crate::models::Verdict;
use crate::verdict::output_matches;

/// Memory available to a compiler, in MB
pub const COMPILE_MEMORY_LIMIT_MB: u32 = 1024;
/// CPU share granted to a compiler
pub const COMPILE_CPUS: f64 = 2.0;
/// The supervisory timeout is this multiple of the declared time limit
pub const SUPERVISOR_FACTOR: u32 = 2;
/// Captured stdout/stderr is cut off beyond this many bytes
pub const OUTPUT_LIMIT: u64 = 64 * 1024 * 1024;

/// Exit codes meaning "killed for running too long":
/// `timeout(1)`, SIGKILL and SIGXCPU as reported by a shell
const TIMEOUT_EXIT_CODES: [i32; 3] = [124, 128 + libc::SIGKILL, 128 + libc::SIGXCPU];

/// One isolated execution, as handed to a sandbox backend
#[derive(Debug, Clone)]
pub struct ExecutionRequest<'a> {
    /// Container image (or toolchain reference) to execute in
    pub image: &'a str,
    pub command: &'a [String],
    /// Host directory the command runs in; its contents are visible to the program
    pub workdir: &'a Path,
    pub stdin: &'a [u8],
    /// Share of CPUs granted to the program
    pub cpu_limit: f64,
    pub memory_limit_mb: u32,
    /// Inner time limit, enforced by the backend itself
    pub timeout: Duration,
    pub no_network: bool,
}

impl ExecutionRequest<'_> {
    /// CPU-seconds allowed before the kernel steps in
    pub fn cpu_seconds(&self) -> u64 {
        self.timeout.as_secs_f64().ceil() as u64 + 1
    }
}

/// Raw outcome of one execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutcome {
    /// Exit code, or 128 + signal number when killed by a signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub wall_time: Duration,
    /// Peak memory in KB, 0 when the backend cannot measure it
    pub memory_kb: u64,
    /// Set when the backend's own time limit fired
    pub timed_out: bool,
}

impl RunOutcome {
    /// Outcome reported when the supervisory timeout had to step in
    pub fn supervisor_timeout(elapsed: Duration) -> Self {
        Self {
            exit_code: 128 + libc::SIGKILL,
            stderr: "Execution timed out".to_string(),
            wall_time: elapsed,
            timed_out: true,
            ..Default::default()
        }
    }

    pub fn killed_by_timeout(&self) -> bool {
        self.timed_out || TIMEOUT_EXIT_CODES.contains(&self.exit_code)
    }

    /// Classifies this run against the expected answer of a test case
    pub fn verdict(&self, expected_output: &str) -> Verdict {
        if self.killed_by_timeout() {
            Verdict::TimeLimitExceeded
        } else if self.exit_code != 0 {
            Verdict::RuntimeError
        } else if output_matches(&self.stdout, expected_output) {
            Verdict::Accepted
        } else {
            Verdict::WrongAnswer
        }
    }
}

/// Result of the compilation step
#[derive(Debug, Clone, PartialEq)]
pub struct CompileOutcome {
    pub ok: bool,
    pub stderr: String,
    pub time: Duration,
}

impl CompileOutcome {
    pub fn skipped() -> Self {
        Self {
            ok: true,
            stderr: String::new(),
            time: Duration::ZERO,
        }
    }

    pub fn failed(stderr: impl Into<String>, time: Duration) -> Self {
        Self {
            ok: false,
            stderr: stderr.into(),
            time,
        }
    }
}

/// Limits a problem puts on each run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunLimits {
    pub time_limit: Duration,
    pub memory_limit_mb: u32,
}

impl RunLimits {
    /// Containers get half a CPU per second of time limit, but at least a tenth
    pub fn cpu_share(&self) -> f64 {
        (self.time_limit.as_secs_f64() / 2.0).max(0.1)
    }
}

/// Creates the sandbox backend selected by configuration
pub fn create_sandbox(config: &SandboxConfig) -> Result<Arc<dyn Sandbox>> {
    match config {
        SandboxConfig::Process { isolate_network } => {
            log::info!("Creating ProcessRunner (network isolation: {isolate_network})");
            if !isolate_network {
                log::warn!("ProcessRunner without network isolation - use only in trusted environments");
            }
            Ok(Arc::new(ProcessRunner::new(*isolate_network)))
        }
        SandboxConfig::Isolate { boxes } => {
            log::info!("Creating IsolateRunner with {boxes} boxes");
            Ok(Arc::new(IsolateRunner::build(*boxes)?))
        }
        SandboxConfig::Docker { binary } => {
            log::info!("Creating DockerRunner using `{binary}`");
            Ok(Arc::new(DockerRunner::build(binary)?))
        }
    }
}

/// Exit code of a finished process, folding signals into 128 + signal
pub(crate) fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

/// Runs blocking teardown of a sandbox instance on the blocking pool
///
/// Falls back to running it inline when called outside a tokio runtime.
pub(crate) fn spawn_cleanup(cleanup: impl FnOnce() + Send + 'static) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(cleanup);
        }
        Err(_) => cleanup(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    fn exited(code: i32, stdout: &str) -> RunOutcome {
        RunOutcome {
            exit_code: code,
            stdout: stdout.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn timeout_exit_codes_map_to_tle() {
        assert_eq!(exited(124, "").verdict("1"), Verdict::TimeLimitExceeded);
        assert_eq!(exited(137, "").verdict("1"), Verdict::TimeLimitExceeded);
        assert_eq!(exited(152, "").verdict("1"), Verdict::TimeLimitExceeded);
        assert_eq!(
            RunOutcome::supervisor_timeout(Duration::from_secs(2)).verdict("1"),
            Verdict::TimeLimitExceeded
        );
    }

    #[test]
    fn other_failures_map_to_runtime_error() {
        assert_eq!(exited(1, "1").verdict("1"), Verdict::RuntimeError);
        assert_eq!(exited(139, "1").verdict("1"), Verdict::RuntimeError);
    }

    #[test]
    fn clean_exit_compares_output() {
        assert_eq!(exited(0, "42\n").verdict("42"), Verdict::Accepted);
        assert_eq!(exited(0, "41\n").verdict("42"), Verdict::WrongAnswer);
    }

    #[test]
    fn cpu_share_has_a_floor() {
        let limits = |secs: f64| RunLimits {
            time_limit: Duration::from_secs_f64(secs),
            memory_limit_mb: 256,
        };
        assert_eq!(limits(0.1).cpu_share(), 0.1);
        assert_eq!(limits(3.0).cpu_share(), 1.5);
    }

    #[tokio::test]
    async fn cleanup_leaves_the_runtime_thread() {
        let caller = std::thread::current().id();
        let (tx, rx) = tokio::sync::oneshot::channel();
        spawn_cleanup(move || {
            let _ = tx.send(std::thread::current().id());
        });
        assert_ne!(rx.await.unwrap(), caller);
    }

    #[test]
    fn cleanup_runs_inline_without_a_runtime() {
        let ran = Arc::new(AtomicBool::new(false));
        spawn_cleanup({
            let ran = Arc::clone(&ran);
            move || ran.store(true, Ordering::SeqCst)
        });
        assert!(ran.load(Ordering::SeqCst));
    }
}
