//! Cross-crate integration tests
//!
//! Tests interaction between:
//! - Checkpoint manager and the object-store mirror
//! - Dataset fetcher and the run context
//! - Local run context wiring

use anyhow::Result;
use checkpoint::{save_checkpoint, CheckpointManager, LocalFileCheckpointManager};
use harness_core::config::StorageBackend;
use harness_core::Error;
use run_context::{local_run_context, DatasetFetcher, LocalFileDatasetFetcher, RunOutcome};
use serde_json::json;
use std::sync::Arc;
use storage::{download_directory, upload_directory, LocalObjectStore, ObjectStore};
use tempfile::TempDir;

#[tokio::test]
async fn test_checkpoint_mirrors_through_object_store() -> Result<()> {
    let workdir = TempDir::new()?;
    let buckets = TempDir::new()?;
    let store = LocalObjectStore::from_backend(&StorageBackend::Local {
        root: buckets.path().to_path_buf(),
    })?;

    let manager = LocalFileCheckpointManager::new("run-1", workdir.path());
    save_checkpoint(&manager, 10, |ckpt| async move {
        tokio::fs::write(ckpt.dir.join("model.pth"), b"weights").await?;
        tokio::fs::create_dir_all(ckpt.dir.join("optim")).await?;
        tokio::fs::write(ckpt.dir.join("optim/state.bin"), b"adam").await?;
        Ok::<_, Error>(())
    })
    .await?;

    let checkpoint = manager.resolve(None).await?;
    let prefix = format!("checkpoints/{}/", checkpoint.id);
    let uploaded = upload_directory(&store, &checkpoint.dir, "training", &prefix).await?;
    assert_eq!(uploaded, 2);

    let keys = store.list_objects("training", &prefix).await?;
    assert_eq!(
        keys,
        vec![format!("{prefix}model.pth"), format!("{prefix}optim/state.bin")]
    );

    let restore = TempDir::new()?;
    let downloaded = download_directory(&store, "training", &prefix, restore.path()).await?;
    assert_eq!(downloaded, 2);
    assert_eq!(std::fs::read(restore.path().join("optim/state.bin"))?, b"adam");
    assert_eq!(std::fs::read(restore.path().join("model.pth"))?, b"weights");
    Ok(())
}

#[tokio::test]
async fn test_mirror_rejects_prefix_without_separator() -> Result<()> {
    let buckets = TempDir::new()?;
    let store = LocalObjectStore::new(buckets.path());
    let src = TempDir::new()?;
    std::fs::write(src.path().join("a"), b"x")?;

    let err = upload_directory(&store, src.path(), "training", "no-slash")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidKeyPrefix { .. }));
    assert!(!store.exists("training", "no-slasha").await?);
    Ok(())
}

#[tokio::test]
async fn test_run_context_exposes_dataset_fetcher() -> Result<()> {
    let base = TempDir::new()?;
    let split = base.path().join("datasets/mnist/train");
    std::fs::create_dir_all(&split)?;
    for (id, payload) in [("0001", b"zero"), ("0002", b"one!")] {
        std::fs::write(split.join(id), payload)?;
        std::fs::write(
            split.join(format!("{id}.json")),
            json!({"id": id, "created_at": "2024-01-01T00:00:00Z"}).to_string(),
        )?;
    }

    let fetcher: Arc<dyn DatasetFetcher> = Arc::new(LocalFileDatasetFetcher::new(base.path()).await?);
    let ctx = local_run_context("run-1", json!({}), base.path(), Some(fetcher))?;

    let outcome = ctx
        .run(|ctx| async move {
            let fetcher = ctx.dataset_fetcher().ok_or(Error::DatasetNotPrepared)?;
            fetcher.prepare_snapshot_split("mnist", Some("train")).await?;

            let mut ids = Vec::new();
            for index in 0..fetcher.num_datums() {
                let (payload, meta) = fetcher.get_datum_at_index(index).await?;
                assert_eq!(payload.len(), 4);
                ids.push(meta.id);
            }
            Ok(ids)
        })
        .await?;

    assert_eq!(
        outcome,
        RunOutcome::Completed(vec!["0001".to_string(), "0002".to_string()])
    );
    Ok(())
}

#[tokio::test]
async fn test_duplicate_checkpoint_ids_across_runs_are_reported() -> Result<()> {
    let base = TempDir::new()?;
    let id = "5-run-a__dup";
    for run in ["run-a", "run-b"] {
        std::fs::create_dir_all(base.path().join("runs").join(run).join("checkpoints").join(id))?;
    }

    let manager = LocalFileCheckpointManager::new("run-c", base.path());
    let err = manager.resolve(Some(id)).await.unwrap_err();
    assert!(err.is_data_integrity());
    assert!(matches!(err, Error::DuplicateCheckpoint { matches: 2, .. }));
    Ok(())
}
