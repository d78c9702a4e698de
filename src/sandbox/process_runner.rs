use std::fs;
use std::io;
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::process::Command;

use super::io::Pipes;
use super::{ExecutionRequest, RunOutcome, Sandbox, exit_code_of};

const RUNTIME_FILE_SIZE: u64 = 64 * 1024 * 1024; // bytes
const MEMORY_SAMPLE_INTERVAL: Duration = Duration::from_millis(10);
const SANDBOX_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// A runner that executes code as plain child processes
///
/// Each execution gets its own process group, resource limits applied
/// between fork and exec (data segment, CPU time, file size, no core dumps)
/// and, when enabled, a fresh network namespace with no interfaces. There is
/// no file system isolation beyond the scratch workspace it runs in.
pub struct ProcessRunner {
    isolate_network: bool,
}

impl ProcessRunner {
    pub fn new(isolate_network: bool) -> Self {
        Self { isolate_network }
    }

    fn build_command(&self, request: &ExecutionRequest<'_>) -> Result<Command> {
        let Some((program, args)) = request.command.split_first() else {
            bail!("Empty command");
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(request.workdir)
            .env_clear()
            .env("PATH", SANDBOX_PATH)
            .env("HOME", request.workdir)
            .env("TMPDIR", request.workdir)
            .env("LANG", "C.UTF-8")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let limits = ChildLimits {
            memory_bytes: u64::from(request.memory_limit_mb) * 1024 * 1024,
            cpu_seconds: request.cpu_seconds(),
            unshare_network: self.isolate_network && request.no_network,
        };
        // SAFETY: the closure only calls async-signal-safe libc functions
        unsafe {
            cmd.pre_exec(move || limits.apply());
        }

        Ok(cmd)
    }
}

#[async_trait]
impl Sandbox for ProcessRunner {
    fn name(&self) -> &'static str {
        "ProcessRunner"
    }

    async fn execute(&self, request: ExecutionRequest<'_>) -> Result<RunOutcome> {
        let mut cmd = self.build_command(&request)?;

        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {:?}", request.command))?;
        let group = ProcessGroup(child.id().context("Child exited before its pid was read")?);
        let mut pipes = Pipes::attach(&mut child, request.stdin);

        let deadline = tokio::time::sleep(request.timeout);
        tokio::pin!(deadline);
        let mut sampler = tokio::time::interval(MEMORY_SAMPLE_INTERVAL);
        let mut memory_kb = 0;

        let (status, timed_out) = loop {
            tokio::select! {
                status = child.wait() => break (status?, false),
                _ = &mut deadline => {
                    log::debug!("Process group {} hit its time limit", group.0);
                    group.kill();
                    break (child.wait().await?, true);
                }
                _ = sampler.tick() => {
                    if let Some(kb) = peak_memory_kb(group.0) {
                        memory_kb = memory_kb.max(kb);
                    }
                }
            }
        };
        let wall_time = start.elapsed();

        // Leftover background processes would keep the pipes open
        group.kill();
        let (stdout, stderr) = pipes.collect().await;

        Ok(RunOutcome {
            exit_code: exit_code_of(status),
            stdout,
            stderr,
            wall_time,
            memory_kb,
            timed_out,
        })
    }
}

/// Kills the whole process group on drop
struct ProcessGroup(u32);

impl ProcessGroup {
    fn kill(&self) {
        // SAFETY: plain syscall; ESRCH for an already-gone group is fine
        unsafe {
            libc::killpg(self.0 as libc::pid_t, libc::SIGKILL);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[derive(Clone, Copy)]
struct ChildLimits {
    memory_bytes: u64,
    cpu_seconds: u64,
    unshare_network: bool,
}

impl ChildLimits {
    /// Runs in the forked child right before exec
    fn apply(&self) -> io::Result<()> {
        set_limit(libc::RLIMIT_DATA, self.memory_bytes)?;
        set_limit(libc::RLIMIT_CPU, self.cpu_seconds)?;
        set_limit(libc::RLIMIT_FSIZE, RUNTIME_FILE_SIZE)?;
        set_limit(libc::RLIMIT_CORE, 0)?;

        if self.unshare_network {
            // SAFETY: the child is single-threaded at this point
            let rc = unsafe { libc::unshare(libc::CLONE_NEWUSER | libc::CLONE_NEWNET) };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }
}

fn set_limit(resource: libc::__rlimit_resource_t, value: u64) -> io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    };
    // SAFETY: `limit` outlives the call
    if unsafe { libc::setrlimit(resource, &limit) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Peak resident set size of a live process, from procfs
fn peak_memory_kb(pid: u32) -> Option<u64> {
    let status = fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    parse_vm_hwm(&status)
}

fn parse_vm_hwm(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmHWM:"))
        .and_then(|value| value.trim().trim_end_matches("kB").trim().parse().ok())
}
