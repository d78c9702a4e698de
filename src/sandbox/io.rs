use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::task::JoinHandle;

use super::OUTPUT_LIMIT;

/// Background tasks feeding stdin and draining stdout/stderr of a child
///
/// Reading happens concurrently with waiting so a chatty program cannot
/// deadlock on a full pipe. The tasks are aborted on drop.
pub(super) struct Pipes {
    stdin: JoinHandle<()>,
    stdout: JoinHandle<String>,
    stderr: JoinHandle<String>,
}

impl Pipes {
    pub(super) fn attach(child: &mut Child, input: &[u8]) -> Self {
        let input = input.to_vec();
        let stdin_pipe = child.stdin.take();
        let stdin = tokio::spawn(async move {
            if let Some(mut pipe) = stdin_pipe {
                // The program may exit without reading its input
                let _ = pipe.write_all(&input).await;
                let _ = pipe.shutdown().await;
            }
        });

        Self {
            stdin,
            stdout: tokio::spawn(read_capped(child.stdout.take())),
            stderr: tokio::spawn(read_capped(child.stderr.take())),
        }
    }

    /// Waits for both output streams to reach EOF
    pub(super) async fn collect(&mut self) -> (String, String) {
        self.stdin.abort();
        let stdout = (&mut self.stdout).await.unwrap_or_default();
        let stderr = (&mut self.stderr).await.unwrap_or_default();
        (stdout, stderr)
    }
}

impl Drop for Pipes {
    fn drop(&mut self) {
        self.stdin.abort();
        self.stdout.abort();
        self.stderr.abort();
    }
}

async fn read_capped<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(pipe) = pipe else {
        return String::new();
    };

    let mut buf = Vec::new();
    if let Err(e) = pipe.take(OUTPUT_LIMIT).read_to_end(&mut buf).await {
        log::debug!("Reading child output failed: {e}");
    }
    String::from_utf8_lossy(&buf).into_owned()
}
