use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;

use crate::language::{Adapter, SourceFile};

use super::{
    COMPILE_CPUS, COMPILE_MEMORY_LIMIT_MB, CompileOutcome, ExecutionRequest, RunLimits,
    RunOutcome, SUPERVISOR_FACTOR, Workspace,
};

/// Trait for different sandbox execution implementations
///
/// Backends only know how to execute one isolated command
/// ([`Sandbox::execute`]). Compilation and test-case runs are built on top of
/// it, adding the supervisory timeout and the per-run scratch workspace. An
/// `Err` from any method is an infrastructure fault, never a verdict.
///
/// Dropping a returned future tears the sandbox instance down, which is how
/// timeouts and cancellation reach a running program.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Executes one command under the constraints of `request`
    ///
    /// The backend enforces `request.timeout` itself and reports it through
    /// [`RunOutcome::timed_out`] or a timeout exit code.
    async fn execute(&self, request: ExecutionRequest<'_>) -> Result<RunOutcome>;

    /// Extra wall time the backend needs before the program starts
    fn startup_grace(&self) -> Duration {
        Duration::ZERO
    }

    /// Compiles the source in `build_dir`, leaving artifacts there
    async fn compile(
        &self,
        adapter: &Adapter,
        source: &SourceFile,
        build_dir: &Path,
        timeout: Duration,
    ) -> Result<CompileOutcome> {
        let Some(command) = adapter.compile_command(source) else {
            return Ok(CompileOutcome::skipped());
        };

        let request = ExecutionRequest {
            image: &adapter.image,
            command: &command,
            workdir: build_dir,
            stdin: &[],
            cpu_limit: COMPILE_CPUS,
            memory_limit_mb: COMPILE_MEMORY_LIMIT_MB,
            timeout,
            no_network: true,
        };

        let start = Instant::now();
        let supervisor = timeout * SUPERVISOR_FACTOR + self.startup_grace();
        let outcome = match tokio::time::timeout(supervisor, self.execute(request)).await {
            Ok(outcome) => outcome?,
            Err(_) => {
                log::warn!("{} compile exceeded the supervisory timeout", self.name());
                RunOutcome::supervisor_timeout(start.elapsed())
            }
        };

        if outcome.killed_by_timeout() {
            return Ok(CompileOutcome::failed("Compilation timed out", outcome.wall_time));
        }
        if outcome.exit_code != 0 {
            // Some compilers report on stdout
            let message = if outcome.stderr.trim().is_empty() {
                outcome.stdout
            } else {
                outcome.stderr
            };
            return Ok(CompileOutcome::failed(message, outcome.wall_time));
        }

        Ok(CompileOutcome {
            ok: true,
            stderr: outcome.stderr,
            time: outcome.wall_time,
        })
    }

    /// Runs the compiled program once against `stdin`
    ///
    /// The run gets a private copy of `build_dir` that is removed afterwards.
    async fn run(
        &self,
        adapter: &Adapter,
        source: &SourceFile,
        build_dir: &Path,
        stdin: &str,
        limits: RunLimits,
    ) -> Result<RunOutcome> {
        let workspace = Workspace::copy_of(build_dir)?;
        let command = adapter.run_command(source);

        let request = ExecutionRequest {
            image: &adapter.image,
            command: &command,
            workdir: workspace.path(),
            stdin: stdin.as_bytes(),
            cpu_limit: limits.cpu_share(),
            memory_limit_mb: limits.memory_limit_mb,
            timeout: limits.time_limit,
            no_network: true,
        };

        let start = Instant::now();
        let supervisor = limits.time_limit * SUPERVISOR_FACTOR + self.startup_grace();
        match tokio::time::timeout(supervisor, self.execute(request)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                log::warn!(
                    "{} run exceeded the supervisory timeout of {supervisor:?}",
                    self.name()
                );
                Ok(RunOutcome::supervisor_timeout(start.elapsed()))
            }
        }
    }
}
