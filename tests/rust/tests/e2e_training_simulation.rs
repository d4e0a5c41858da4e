//! End-to-end training simulation test
//!
//! Simulates a training script across process restarts:
//! - Training with periodic checkpoints, progress and metrics
//! - Interruption mid-run and clean shutdown
//! - Resuming from the most recent checkpoint
//! - Warm-starting a new run from another run's checkpoint by id

use anyhow::Result;
use harness_core::{HarnessConfig, SaveMetric, SaveProgress};
use run_context::{MemoryMetricSaver, MemoryProgressSaver, RunContext, RunContextBuilder, RunOutcome};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Debug, Deserialize)]
struct TrainingConfig {
    total_steps: u64,
    checkpoint_every: u64,
}

/// Build a context for `run_id` that exposes its metric and progress sinks
fn training_context(
    base_dir: &Path,
    run_id: &str,
) -> Result<(RunContext, Arc<MemoryMetricSaver>, Arc<MemoryProgressSaver>)> {
    let config_path = base_dir.join(format!("{run_id}.json"));
    std::fs::write(
        &config_path,
        json!({"total_steps": 6, "checkpoint_every": 2}).to_string(),
    )?;

    let mut config = HarnessConfig::new(run_id, base_dir);
    config.run_config_path = Some(config_path);
    config.interrupt.install_signal_handlers = false;
    config.logging.filter = "warn".to_string();
    config.init_logging();

    let metrics = Arc::new(MemoryMetricSaver::new());
    let progress = Arc::new(MemoryProgressSaver::new());
    let ctx = RunContextBuilder::local(&config)?
        .metric_saver(metrics.clone())
        .progress_saver(progress.clone())
        .build()?;
    Ok((ctx, metrics, progress))
}

/// One training step; returns the loss
fn train_step(weights: &mut u64, step: u64) -> f64 {
    *weights += step;
    if step == 3 {
        f64::NAN
    } else {
        1.0 / step as f64
    }
}

/// Train from `start_step`, stopping after `stop_after` steps
async fn train(ctx: Arc<RunContext>, mut weights: u64, start_step: u64, stop_after: Option<u64>) -> harness_core::Result<u64> {
    let config: TrainingConfig = ctx.load_config_as().await?;

    for step in start_step..=config.total_steps {
        ctx.check_interrupted()?;

        let loss = train_step(&mut weights, step);
        ctx.save_metrics(vec![SaveMetric::new(step, "train/loss", loss)]).await?;
        ctx.save_progress(vec![SaveProgress {
            operation: "Training".to_string(),
            value: step as f64,
            final_value: config.total_steps as f64,
            units: "steps".to_string(),
        }])
        .await?;

        if step % config.checkpoint_every == 0 {
            ctx.save_checkpoint(step, |ckpt| async move {
                tokio::fs::write(ckpt.dir.join("weights"), weights.to_string()).await?;
                Ok::<_, harness_core::Error>(())
            })
            .await?;
        }

        if stop_after == Some(step) {
            ctx.interrupt_handle().trigger();
        }
    }

    Ok(weights)
}

#[tokio::test]
async fn test_interrupted_run_resumes_from_most_recent_checkpoint() -> Result<()> {
    let dir = TempDir::new()?;

    // First attempt is interrupted after step 5
    let (ctx, metrics, progress) = training_context(dir.path(), "run-a")?;
    let outcome = ctx.run(|ctx| train(ctx, 0, 1, Some(5))).await?;
    assert_eq!(outcome, RunOutcome::Interrupted);

    let recorded = metrics.metrics();
    assert_eq!(recorded.len(), 5);
    assert!(recorded[2].value.is_null(), "NaN loss must be stored as null");
    assert_eq!(progress.current_progress()[0].value, 5.0);

    // Restart resumes from step 4
    let (ctx, _, _) = training_context(dir.path(), "run-a")?;
    let outcome = ctx
        .run(|ctx| async move {
            let (weights, step) = ctx
                .load_checkpoint(None, |ckpt| async move {
                    let raw = tokio::fs::read_to_string(ckpt.dir.join("weights")).await?;
                    let weights: u64 = raw.parse().map_err(|_| harness_core::Error::Internal {
                        message: format!("corrupt weights: {raw}"),
                    })?;
                    Ok::<_, harness_core::Error>((weights, ckpt.global_step))
                })
                .await?;
            assert_eq!(step, 4);
            train(ctx, weights, step + 1, None).await
        })
        .await?;

    // 1 + 2 + ... + 6
    assert_eq!(outcome, RunOutcome::Completed(21));
    Ok(())
}

#[tokio::test]
async fn test_new_run_warm_starts_from_checkpoint_id() -> Result<()> {
    let dir = TempDir::new()?;

    let (ctx, _, _) = training_context(dir.path(), "pretrain")?;
    let outcome = ctx
        .run(|ctx| async move {
            train(Arc::clone(&ctx), 0, 1, None).await?;
            Ok(ctx.most_recent_checkpoint_id())
        })
        .await?;
    let checkpoint_id = outcome.completed().flatten().expect("a checkpoint was saved");
    assert!(checkpoint_id.starts_with("6-pretrain__"));

    let (ctx, _, _) = training_context(dir.path(), "finetune")?;
    let outcome = ctx
        .run(|ctx| {
            let checkpoint_id = checkpoint_id.clone();
            async move {
                ctx.load_checkpoint(Some(&checkpoint_id), |ckpt| async move {
                    assert_eq!(ckpt.run_id, "pretrain");
                    assert_eq!(ckpt.global_step, 6);
                    Ok::<_, harness_core::Error>(tokio::fs::read_to_string(ckpt.dir.join("weights")).await?)
                })
                .await
            }
        })
        .await?;
    assert_eq!(outcome, RunOutcome::Completed("21".to_string()));

    // The new run has no checkpoints of its own yet
    let (ctx, _, _) = training_context(dir.path(), "finetune")?;
    let err = ctx
        .run(|ctx| async move { ctx.load_checkpoint(None, |_| async { Ok(()) }).await })
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

#[tokio::test]
async fn test_failed_checkpoint_write_leaves_no_trace() -> Result<()> {
    let dir = TempDir::new()?;
    let (ctx, _, _) = training_context(dir.path(), "run-b")?;

    let outcome = ctx
        .run(|ctx| async move {
            let result: std::result::Result<(), anyhow::Error> = ctx
                .save_checkpoint(1, |ckpt| async move {
                    tokio::fs::write(ckpt.dir.join("partial"), b"half").await?;
                    Err::<(), _>(anyhow::anyhow!("disk full"))
                })
                .await;
            let err = result.expect_err("body failed");
            assert_eq!(err.to_string(), "disk full");
            Ok(())
        })
        .await?;
    assert_eq!(outcome, RunOutcome::Completed(()));

    let checkpoints = dir.path().join("runs/run-b/checkpoints");
    assert_eq!(std::fs::read_dir(checkpoints)?.count(), 0);
    Ok(())
}
