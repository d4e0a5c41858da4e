//! OS signal handling
//!
//! These tests deliver real signals to the test process, so they live in
//! their own binary where no other test can observe them.

#![cfg(unix)]

use anyhow::Result;
use async_trait::async_trait;
use checkpoint::LocalFileCheckpointManager;
use harness_core::{ExitCause, SaveMetric, ScopedResource};
use run_context::{
    ConfigLoader, LocalFileModelLoader, MemoryProgressSaver, MetricSaver, RunContext, RunOutcome,
};
use serde_json::{json, Value};
use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Set in the environment of the re-executed test binary
const CHILD_ENV: &str = "HARNESS_SIGNAL_CHILD";

type Log = Arc<Mutex<Vec<String>>>;

struct Recorder {
    name: &'static str,
    log: Log,
}

impl Recorder {
    fn new(name: &'static str, log: &Log) -> Arc<Self> {
        Arc::new(Self {
            name,
            log: Arc::clone(log),
        })
    }
}

#[async_trait]
impl ScopedResource for Recorder {
    async fn enter(&self) -> harness_core::Result<()> {
        self.log.lock().unwrap().push(format!("enter:{}", self.name));
        Ok(())
    }

    async fn exit(&self, cause: ExitCause) -> harness_core::Result<()> {
        self.log.lock().unwrap().push(format!("exit:{}:{}", self.name, cause));
        Ok(())
    }
}

#[async_trait]
impl ConfigLoader for Recorder {
    async fn load_config(&self) -> harness_core::Result<Value> {
        Ok(json!({"epochs": 1}))
    }

    fn as_scoped(self: Arc<Self>) -> Option<Arc<dyn ScopedResource>> {
        Some(self)
    }
}

#[async_trait]
impl MetricSaver for Recorder {
    async fn save_metrics(&self, _metrics: Vec<SaveMetric>) -> harness_core::Result<()> {
        Ok(())
    }

    fn as_scoped(self: Arc<Self>) -> Option<Arc<dyn ScopedResource>> {
        Some(self)
    }
}

fn signal_context(base_dir: &Path, log: &Log) -> Result<RunContext> {
    Ok(RunContext::builder()
        .run_id("signal-run")
        .config_loader(Recorder::new("config", log))
        .model_loader(Arc::new(LocalFileModelLoader::new(base_dir)))
        .progress_saver(Arc::new(MemoryProgressSaver::new()))
        .metric_saver(Recorder::new("metric", log))
        .checkpoint_manager(Arc::new(LocalFileCheckpointManager::new("signal-run", base_dir)))
        .install_signal_handlers(true)
        .build()?)
}

fn send_signal(name: &str) -> harness_core::Result<()> {
    let status = Command::new("kill")
        .arg(format!("-{name}"))
        .arg(std::process::id().to_string())
        .status()?;
    assert!(status.success(), "kill -{name} failed: {status}");
    Ok(())
}

#[tokio::test]
async fn test_sigint_interrupts_run_and_releases_in_reverse() -> Result<()> {
    let base = TempDir::new()?;
    let log = Log::default();
    let ctx = signal_context(base.path(), &log)?;

    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        ctx.run(|_ctx| async move {
            send_signal("INT")?;
            std::future::pending::<harness_core::Result<()>>().await
        }),
    )
    .await
    .expect("SIGINT should stop the run")?;

    assert_eq!(outcome, RunOutcome::Interrupted);
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "enter:config",
            "enter:metric",
            "exit:metric:interrupted",
            "exit:config:interrupted",
        ]
    );
    Ok(())
}

/// Runs only inside the child spawned by
/// `test_sigterm_after_run_exits_terminates_process`
#[tokio::test]
async fn sigterm_after_run_child() -> Result<()> {
    if std::env::var_os(CHILD_ENV).is_none() {
        return Ok(());
    }

    let base = TempDir::new()?;
    let log = Log::default();
    let outcome = signal_context(base.path(), &log)?
        .run(|_ctx| async move { Ok(()) })
        .await?;
    assert_eq!(outcome, RunOutcome::Completed(()));

    send_signal("TERM")?;
    tokio::time::sleep(Duration::from_secs(5)).await;
    panic!("process survived SIGTERM after the run exited");
}

#[test]
fn test_sigterm_after_run_exits_terminates_process() -> Result<()> {
    let output = Command::new(std::env::current_exe()?)
        .args(["--exact", "sigterm_after_run_child", "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, "1")
        .output()?;

    assert_eq!(
        output.status.code(),
        Some(128 + 15),
        "child exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(())
}
