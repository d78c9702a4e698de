use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Command;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::io::Pipes;
use super::workspace::copy_dir_contents;
use super::{ExecutionRequest, RunOutcome, Sandbox, exit_code_of, spawn_cleanup};

// Sandbox configuration constants
const RUNTIME_PROCESSES: u32 = 16;
const RUNTIME_OPEN_FILES: u32 = 64;
const RUNTIME_FILE_SIZE: u32 = 65536; // KB
const EXTRA_TIME: f64 = 0.5; // seconds

const SANDBOX_PATH: &str = "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
const META_FILE: &str = ".isolate.meta";

/// A sandbox environment for compiling and executing code safely using isolate
///
/// Boxes are leased from a fixed pool, so at most `boxes` executions run at
/// once. A box is re-initialised for every execution and cleaned up when its
/// lease is dropped, whatever the outcome.
pub struct IsolateRunner {
    pool: Arc<BoxPool>,
}

struct BoxPool {
    free: Mutex<Vec<u32>>,
    permits: Arc<Semaphore>,
}

/// Exclusive use of one isolate box
struct BoxLease {
    id: u32,
    pool: Arc<BoxPool>,
    permit: Option<OwnedSemaphorePermit>,
}

impl IsolateRunner {
    pub fn build(boxes: u32) -> Result<Self> {
        if boxes == 0 {
            bail!("The isolate box pool must not be empty");
        }

        let available = std::process::Command::new("isolate")
            .arg("--version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false);
        if !available {
            bail!("`isolate` is not installed or not runnable");
        }

        let pool = BoxPool {
            free: Mutex::new((0..boxes).rev().collect()),
            permits: Arc::new(Semaphore::new(boxes as usize)),
        };
        log::info!("IsolateRunner initialized with boxes 0..{boxes}");
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    async fn lease(&self) -> Result<BoxLease> {
        let permit = Arc::clone(&self.pool.permits).acquire_owned().await?;
        let id = self
            .pool
            .free
            .lock()
            .pop()
            .ok_or_else(|| anyhow!("Isolate box pool is inconsistent"))?;
        Ok(BoxLease {
            id,
            pool: Arc::clone(&self.pool),
            permit: Some(permit),
        })
    }
}

impl BoxLease {
    /// Initializes the box and returns its working directory
    async fn init(&self) -> Result<PathBuf> {
        let output = Command::new("isolate")
            .args(["-b", &self.id.to_string(), "--cg", "--init"])
            .output()
            .await
            .map_err(|e| anyhow!("Failed to spawn isolate --init: {}", e))?;

        if !output.status.success() {
            bail!(
                "isolate --init exited with non-zero status; stderr={}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let root_dir_absolute = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if root_dir_absolute.is_empty() {
            bail!("isolate --init produced empty stdout");
        }

        Ok(PathBuf::from(root_dir_absolute).join("box"))
    }
}

impl Drop for BoxLease {
    fn drop(&mut self) {
        let id = self.id;
        let pool = Arc::clone(&self.pool);
        // The box goes back to the pool only once it is clean
        let permit = self.permit.take();
        spawn_cleanup(move || {
            let out = std::process::Command::new("isolate")
                .arg("-b")
                .arg(id.to_string())
                .arg("--cg")
                .arg("--cleanup")
                .output();

            if out.is_ok_and(|c| c.status.success()) {
                log::debug!("Isolate box {id} cleaned up");
            } else {
                log::error!("Isolate box {id} failed to clean up");
            }
            pool.free.lock().push(id);
            drop(permit);
        });
    }
}

#[async_trait]
impl Sandbox for IsolateRunner {
    fn name(&self) -> &'static str {
        "IsolateRunner"
    }

    async fn execute(&self, request: ExecutionRequest<'_>) -> Result<RunOutcome> {
        if request.command.is_empty() {
            bail!("Empty command");
        }

        let lease = self.lease().await?;
        let box_dir = lease.init().await?;
        copy_dir_contents(request.workdir, &box_dir).context("Failed to fill isolate box")?;

        let meta_path = request.workdir.join(META_FILE);
        let args = isolate_run_args(lease.id, &request, &meta_path);

        let start = Instant::now();
        let mut child = Command::new("isolate")
            .args(&args)
            .args(request.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn isolate --run: {}", e))?;
        let mut pipes = Pipes::attach(&mut child, request.stdin);
        let status = child.wait().await?;
        let elapsed = start.elapsed();
        let (stdout, stderr) = pipes.collect().await;

        let meta_content = fs::read_to_string(&meta_path)
            .with_context(|| format!("Failed to read meta file of box {}", lease.id))?;
        let _ = fs::remove_file(&meta_path);
        let meta = Meta::parse(&meta_content);
        if meta.status.as_deref() == Some("XX") {
            bail!("isolate internal error: {}", meta.message);
        }

        // Artifacts of a compile step live in the box
        copy_dir_contents(&box_dir, request.workdir).context("Failed to copy box contents back")?;

        log::debug!(
            "Box {} finished: status={:?} exit={:?} isolate exit={}",
            lease.id,
            meta.status,
            meta.exit_code,
            exit_code_of(status)
        );

        Ok(RunOutcome {
            exit_code: meta.exit_code.unwrap_or_else(|| exit_code_of(status)),
            stdout,
            stderr,
            wall_time: meta.wall_time.unwrap_or(elapsed),
            memory_kb: meta.memory_kb,
            timed_out: meta.status.as_deref() == Some("TO"),
        })
    }
}

fn isolate_run_args(id: u32, request: &ExecutionRequest<'_>, meta_path: &Path) -> Vec<String> {
    let time_limit = request.timeout.as_secs_f64();
    let mut args = vec![
        "-b".to_string(),
        id.to_string(),
        "--cg".to_string(),
        "--run".to_string(),
        format!("--time={time_limit:.3}"),
        format!("--extra-time={EXTRA_TIME}"),
        format!("--wall-time={:.3}", time_limit + EXTRA_TIME),
        format!("--cg-mem={}", u64::from(request.memory_limit_mb) * 1024),
        format!("--processes={RUNTIME_PROCESSES}"),
        format!("--open-files={RUNTIME_OPEN_FILES}"),
        format!("--fsize={RUNTIME_FILE_SIZE}"),
        "-E".to_string(),
        SANDBOX_PATH.to_string(),
        "-E".to_string(),
        "HOME=/box".to_string(),
        "-M".to_string(),
        meta_path.to_string_lossy().into_owned(),
        "--silent".to_string(),
    ];
    if Path::new("/etc/alternatives").exists() {
        args.push("--dir=/etc/alternatives".to_string());
    }
    if !request.no_network {
        args.push("--share-net".to_string());
    }
    args.push("--".to_string());
    args
}

/// Fields of an isolate meta file this runner cares about
#[derive(Debug, Default, PartialEq)]
struct Meta {
    status: Option<String>,
    exit_code: Option<i32>,
    memory_kb: u64,
    wall_time: Option<Duration>,
    message: String,
}

impl Meta {
    fn parse(meta_content: &str) -> Self {
        let mut meta = Self::default();
        for line in meta_content.lines() {
            if let Some((key, value)) = line.split_once(':') {
                match key {
                    "status" => meta.status = Some(value.to_string()),
                    "exitcode" => meta.exit_code = value.parse().ok(),
                    "exitsig" => {
                        if let Ok(sig) = value.parse::<i32>() {
                            meta.exit_code = Some(128 + sig);
                        }
                    }
                    "cg-mem" => meta.memory_kb = value.parse().unwrap_or(0),
                    "time-wall" => {
                        meta.wall_time = value.parse::<f64>().ok().map(Duration::from_secs_f64)
                    }
                    "message" => meta.message = value.to_string(),
                    _ => {}
                }
            }
        }
        // Killed on the time limit without an exit status of its own
        if meta.status.as_deref() == Some("TO") && meta.exit_code.is_none() {
            meta.exit_code = Some(128 + libc::SIGKILL);
        }
        meta
    }
}
