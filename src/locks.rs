use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time;

const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_secs(10);
/// taskkill exit status when no process matched the image name.
const TASKKILL_NOT_FOUND: i32 = 128;

/// Frees OS-level locks that a desktop spreadsheet application may hold on batch inputs.
/// Invoked at most once per batch; callers treat failure as a warning.
#[async_trait]
pub trait LockReleaser: Send + Sync {
    async fn release(&self) -> Result<()>;
    fn name(&self) -> &'static str;
}

pub struct NoopReleaser;

#[async_trait]
impl LockReleaser for NoopReleaser {
    async fn release(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Force-terminates every running `excel.exe` through `taskkill`.
pub struct TaskkillReleaser {
    program: String,
    image: String,
    timeout: Duration,
}

impl Default for TaskkillReleaser {
    fn default() -> Self {
        Self {
            program: "taskkill".to_string(),
            image: "excel.exe".to_string(),
            timeout: DEFAULT_RELEASE_TIMEOUT,
        }
    }
}

impl TaskkillReleaser {
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl LockReleaser for TaskkillReleaser {
    async fn release(&self) -> Result<()> {
        let output = time::timeout(
            self.timeout,
            Command::new(&self.program)
                .args(["/IM", &self.image, "/F"])
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output(),
        )
        .await
        .map_err(|_| anyhow!("{} timed out after {:?}", self.program, self.timeout))
        .and_then(|res| res.map_err(|e| anyhow!("failed to spawn {}: {}", self.program, e)))?;

        match output.status.code() {
            Some(0) => {
                tracing::info!(image = %self.image, "terminated spreadsheet application");
                Ok(())
            }
            Some(TASKKILL_NOT_FOUND) => {
                tracing::debug!(image = %self.image, "no spreadsheet application running");
                Ok(())
            }
            code => Err(anyhow!(
                "{} failed (exit {}): {}",
                self.program,
                code.unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )),
        }
    }

    fn name(&self) -> &'static str {
        "taskkill"
    }
}

pub fn platform_lock_releaser() -> Arc<dyn LockReleaser> {
    if cfg!(windows) {
        Arc::new(TaskkillReleaser::default())
    } else {
        Arc::new(NoopReleaser)
    }
}
