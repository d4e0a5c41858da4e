//! Run context orchestration
//!
//! A [`RunContext`] owns one implementation per collaborator role. Entering it
//! enters every collaborator that advertises the [`ScopedResource`] capability,
//! in a fixed order, and records a release action for each. Exiting runs those
//! release actions in reverse, whatever the outcome of the run body.

use harness_core::{
    CheckpointId, Error, ExitCause, HarnessConfig, LoadCheckpointData, LoadModelData, Result,
    RunId, SaveCheckpointData, SaveMetric, SaveProgress, ScopedResource, Step,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use checkpoint::{CheckpointManager, LocalFileCheckpointManager};

use crate::config_loader::{ConfigLoader, FileConfigLoader, MemoryConfigLoader};
use crate::dataset::DatasetFetcher;
use crate::interrupt::{InterruptFlag, SignalListener};
use crate::metrics::{MemoryMetricSaver, MetricSaver};
use crate::model_loader::{LocalFileModelLoader, ModelLoader};
use crate::progress::{MemoryProgressSaver, ProgressSaver};

/// How a run scope ended when it did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome<T> {
    /// The body returned normally
    Completed(T),

    /// The run was interrupted and shut down cleanly
    Interrupted,
}

impl<T> RunOutcome<T> {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, RunOutcome::Interrupted)
    }

    /// The body's value, if it completed
    pub fn completed(self) -> Option<T> {
        match self {
            RunOutcome::Completed(value) => Some(value),
            RunOutcome::Interrupted => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Created,
    Active,
    Exited,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Created => "created",
            LifecycleState::Active => "active",
            LifecycleState::Exited => "exited",
        };
        f.write_str(s)
    }
}

/// Collaborator roles, in entry order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollaboratorRole {
    Config,
    Model,
    Progress,
    Metric,
    Checkpoint,
}

impl CollaboratorRole {
    pub const ENTRY_ORDER: [CollaboratorRole; 5] = [
        CollaboratorRole::Config,
        CollaboratorRole::Model,
        CollaboratorRole::Progress,
        CollaboratorRole::Metric,
        CollaboratorRole::Checkpoint,
    ];
}

impl fmt::Display for CollaboratorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CollaboratorRole::Config => "config",
            CollaboratorRole::Model => "model",
            CollaboratorRole::Progress => "progress",
            CollaboratorRole::Metric => "metric",
            CollaboratorRole::Checkpoint => "checkpoint",
        };
        f.write_str(s)
    }
}

struct ReleaseAction {
    role: CollaboratorRole,
    resource: Arc<dyn ScopedResource>,
}

/// Composes the collaborators of one training run behind a single scope
pub struct RunContext {
    run_id: RunId,
    config_loader: Arc<dyn ConfigLoader>,
    model_loader: Arc<dyn ModelLoader>,
    progress_saver: Arc<dyn ProgressSaver>,
    metric_saver: Arc<dyn MetricSaver>,
    checkpoint_manager: Arc<dyn CheckpointManager>,
    dataset_fetcher: Option<Arc<dyn DatasetFetcher>>,
    install_signal_handlers: bool,
    state: Mutex<LifecycleState>,
    unwind_stack: Mutex<Vec<ReleaseAction>>,
    interrupt: InterruptFlag,
    signal_listener: Mutex<Option<SignalListener>>,
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("state", &*self.state.lock())
            .field("interrupted", &self.interrupt.is_set())
            .finish_non_exhaustive()
    }
}

impl RunContext {
    pub fn builder() -> RunContextBuilder {
        RunContextBuilder::new()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn scoped_collaborator(&self, role: CollaboratorRole) -> Option<Arc<dyn ScopedResource>> {
        match role {
            CollaboratorRole::Config => Arc::clone(&self.config_loader).as_scoped(),
            CollaboratorRole::Model => Arc::clone(&self.model_loader).as_scoped(),
            CollaboratorRole::Progress => Arc::clone(&self.progress_saver).as_scoped(),
            CollaboratorRole::Metric => Arc::clone(&self.metric_saver).as_scoped(),
            CollaboratorRole::Checkpoint => Arc::clone(&self.checkpoint_manager).as_scoped(),
        }
    }

    fn ensure_state(&self, expected: LifecycleState) -> Result<()> {
        let actual = *self.state.lock();
        if actual == expected {
            Ok(())
        } else {
            Err(Error::InvalidLifecycle {
                expected: expected.to_string(),
                actual: actual.to_string(),
            })
        }
    }

    fn ensure_active(&self) -> Result<()> {
        self.ensure_state(LifecycleState::Active)
    }

    /// Enter the scope
    ///
    /// Installs interruption handling, then enters each scoped collaborator in
    /// entry order. If a collaborator fails to enter, the ones already entered
    /// are released before the failure is returned and the context cannot be
    /// used again.
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn enter(&self) -> Result<()> {
        self.ensure_state(LifecycleState::Created)?;

        if self.install_signal_handlers {
            let listener = SignalListener::install(self.interrupt.clone())?;
            *self.signal_listener.lock() = Some(listener);
        }

        for role in CollaboratorRole::ENTRY_ORDER {
            let Some(resource) = self.scoped_collaborator(role) else {
                continue;
            };

            if let Err(e) = resource.enter().await {
                warn!(role = %role, error = %e, "Failed to enter collaborator");
                *self.state.lock() = LifecycleState::Exited;
                let failures = self.unwind(ExitCause::Failed).await;
                self.signal_listener.lock().take();
                return Err(aggregate(e, failures));
            }

            debug!(role = %role, "Entered collaborator");
            self.unwind_stack.lock().push(ReleaseAction { role, resource });
        }

        *self.state.lock() = LifecycleState::Active;
        info!("Run context entered");
        Ok(())
    }

    /// Exit the scope with the outcome of the work done inside it
    ///
    /// Every release action runs, in reverse entry order. The interruption
    /// condition is reported as [`RunOutcome::Interrupted`]. Any other body
    /// error is returned unchanged, or as the primary error of an
    /// [`Error::Unwind`] when releases also failed.
    #[instrument(skip(self, outcome), fields(run_id = %self.run_id))]
    pub async fn exit<T>(&self, outcome: Result<T>) -> Result<RunOutcome<T>> {
        self.ensure_active()?;
        *self.state.lock() = LifecycleState::Exited;

        let cause = match &outcome {
            Ok(_) => ExitCause::Completed,
            Err(e) if e.is_interrupted() => ExitCause::Interrupted,
            Err(_) => ExitCause::Failed,
        };

        let failures = self.unwind(cause).await;
        self.signal_listener.lock().take();
        info!(cause = %cause, release_failures = failures.len(), "Run context exited");

        settle(outcome, failures)
    }

    async fn unwind(&self, cause: ExitCause) -> Vec<Error> {
        let actions = std::mem::take(&mut *self.unwind_stack.lock());
        let mut failures = Vec::new();

        for ReleaseAction { role, resource } in actions.into_iter().rev() {
            match resource.exit(cause).await {
                Ok(()) => debug!(role = %role, cause = %cause, "Released collaborator"),
                Err(e) => {
                    warn!(role = %role, cause = %cause, error = %e, "Failed to release collaborator");
                    failures.push(Error::ReleaseFailed {
                        resource: role.to_string(),
                        source: Box::new(e),
                    });
                }
            }
        }

        failures
    }

    /// Enter, run `body`, and exit
    ///
    /// `body` is raced against the interruption flag, so a body that never
    /// polls [`check_interrupted`](Self::check_interrupted) is still dropped
    /// at its next await point once the flag is raised.
    pub async fn run<F, Fut, T>(self, body: F) -> Result<RunOutcome<T>>
    where
        F: FnOnce(Arc<RunContext>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let ctx = Arc::new(self);
        ctx.enter().await?;

        let interrupt = ctx.interrupt.clone();
        let outcome = if interrupt.is_set() {
            Err(Error::Interrupted)
        } else {
            tokio::select! {
                biased;
                _ = interrupt.wait() => Err(Error::Interrupted),
                result = body(Arc::clone(&ctx)) => result,
            }
        };

        ctx.exit(outcome).await
    }

    /// Handle to the interruption flag, for triggering or observing it
    pub fn interrupt_handle(&self) -> InterruptFlag {
        self.interrupt.clone()
    }

    /// Fail with `Interrupted` once an interruption has been requested
    pub fn check_interrupted(&self) -> Result<()> {
        self.interrupt.check()
    }

    pub async fn load_config(&self) -> Result<Value> {
        self.ensure_active()?;
        self.config_loader.load_config().await
    }

    /// Load the run configuration into a caller-defined type
    pub async fn load_config_as<T: DeserializeOwned>(&self) -> Result<T> {
        let config = self.load_config().await?;
        Ok(serde_json::from_value(config)?)
    }

    pub async fn load_model(&self, id: &str) -> Result<LoadModelData> {
        self.ensure_active()?;
        self.model_loader.load_model(id).await
    }

    pub async fn save_metrics(&self, metrics: Vec<SaveMetric>) -> Result<()> {
        self.ensure_active()?;
        self.metric_saver.save_metrics(metrics).await
    }

    pub async fn save_progress(&self, progress: Vec<SaveProgress>) -> Result<()> {
        self.ensure_active()?;
        self.progress_saver.save_progress(progress).await
    }

    /// Write a checkpoint for `global_step`; see [`checkpoint::save_checkpoint`]
    pub async fn save_checkpoint<F, Fut, T, E>(&self, global_step: Step, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(SaveCheckpointData) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error>,
    {
        self.ensure_active()?;
        checkpoint::save_checkpoint(self.checkpoint_manager.as_ref(), global_step, body).await
    }

    /// Read a checkpoint; see [`checkpoint::load_checkpoint`]
    pub async fn load_checkpoint<F, Fut, T, E>(&self, id: Option<&str>, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(LoadCheckpointData) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error>,
    {
        self.ensure_active()?;
        checkpoint::load_checkpoint(self.checkpoint_manager.as_ref(), id, body).await
    }

    pub fn most_recent_checkpoint_id(&self) -> Option<CheckpointId> {
        self.checkpoint_manager.most_recent_checkpoint_id()
    }

    pub fn dataset_fetcher(&self) -> Option<Arc<dyn DatasetFetcher>> {
        self.dataset_fetcher.clone()
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        if *self.state.get_mut() == LifecycleState::Active {
            warn!(run_id = %self.run_id, "Run context dropped without exiting; collaborators were not released");
        }
    }
}

fn aggregate(primary: Error, suppressed: Vec<Error>) -> Error {
    if suppressed.is_empty() {
        primary
    } else {
        Error::Unwind {
            primary: Box::new(primary),
            suppressed,
        }
    }
}

fn settle<T>(outcome: Result<T>, failures: Vec<Error>) -> Result<RunOutcome<T>> {
    let outcome = match outcome {
        Ok(value) => RunOutcome::Completed(value),
        Err(e) if e.is_interrupted() => {
            info!("Run interrupted, shut down cleanly");
            RunOutcome::Interrupted
        }
        Err(e) => return Err(aggregate(e, failures)),
    };

    let mut failures = failures.into_iter();
    match failures.next() {
        None => Ok(outcome),
        Some(first) => Err(aggregate(first, failures.collect())),
    }
}

/// Builder for [`RunContext`]
pub struct RunContextBuilder {
    run_id: Option<RunId>,
    config_loader: Option<Arc<dyn ConfigLoader>>,
    model_loader: Option<Arc<dyn ModelLoader>>,
    progress_saver: Option<Arc<dyn ProgressSaver>>,
    metric_saver: Option<Arc<dyn MetricSaver>>,
    checkpoint_manager: Option<Arc<dyn CheckpointManager>>,
    dataset_fetcher: Option<Arc<dyn DatasetFetcher>>,
    install_signal_handlers: bool,
}

impl Default for RunContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContextBuilder {
    pub fn new() -> Self {
        Self {
            run_id: None,
            config_loader: None,
            model_loader: None,
            progress_saver: None,
            metric_saver: None,
            checkpoint_manager: None,
            dataset_fetcher: None,
            install_signal_handlers: true,
        }
    }

    /// Wire the local file-backed and in-memory implementations
    ///
    /// Uses the JSON file at `run_config_path` as the run configuration when
    /// set, and an empty object otherwise.
    pub fn local(config: &HarnessConfig) -> Result<Self> {
        config.validate()?;

        let config_loader: Arc<dyn ConfigLoader> = match &config.run_config_path {
            Some(path) => Arc::new(FileConfigLoader::new(path)),
            None => Arc::new(MemoryConfigLoader::new(Value::Object(Default::default()))),
        };

        Ok(Self::new()
            .run_id(config.run_id.clone())
            .config_loader(config_loader)
            .model_loader(Arc::new(LocalFileModelLoader::new(&config.base_dir)))
            .progress_saver(Arc::new(MemoryProgressSaver::new()))
            .metric_saver(Arc::new(MemoryMetricSaver::new()))
            .checkpoint_manager(Arc::new(LocalFileCheckpointManager::new(
                config.run_id.clone(),
                &config.base_dir,
            )))
            .install_signal_handlers(config.interrupt.install_signal_handlers))
    }

    pub fn run_id(mut self, run_id: impl Into<RunId>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn config_loader(mut self, loader: Arc<dyn ConfigLoader>) -> Self {
        self.config_loader = Some(loader);
        self
    }

    pub fn model_loader(mut self, loader: Arc<dyn ModelLoader>) -> Self {
        self.model_loader = Some(loader);
        self
    }

    pub fn progress_saver(mut self, saver: Arc<dyn ProgressSaver>) -> Self {
        self.progress_saver = Some(saver);
        self
    }

    pub fn metric_saver(mut self, saver: Arc<dyn MetricSaver>) -> Self {
        self.metric_saver = Some(saver);
        self
    }

    pub fn checkpoint_manager(mut self, manager: Arc<dyn CheckpointManager>) -> Self {
        self.checkpoint_manager = Some(manager);
        self
    }

    pub fn dataset_fetcher(mut self, fetcher: Arc<dyn DatasetFetcher>) -> Self {
        self.dataset_fetcher = Some(fetcher);
        self
    }

    pub fn install_signal_handlers(mut self, install: bool) -> Self {
        self.install_signal_handlers = install;
        self
    }

    pub fn build(self) -> Result<RunContext> {
        fn required<T>(value: Option<T>, name: &str) -> Result<T> {
            value.ok_or_else(|| Error::InvalidConfig {
                message: format!("run context is missing a {name}"),
            })
        }

        Ok(RunContext {
            run_id: required(self.run_id, "run id")?,
            config_loader: required(self.config_loader, "config loader")?,
            model_loader: required(self.model_loader, "model loader")?,
            progress_saver: required(self.progress_saver, "progress saver")?,
            metric_saver: required(self.metric_saver, "metric saver")?,
            checkpoint_manager: required(self.checkpoint_manager, "checkpoint manager")?,
            dataset_fetcher: self.dataset_fetcher,
            install_signal_handlers: self.install_signal_handlers,
            state: Mutex::new(LifecycleState::Created),
            unwind_stack: Mutex::new(Vec::new()),
            interrupt: InterruptFlag::new(),
            signal_listener: Mutex::new(None),
        })
    }
}

/// Build a run context from the local implementations
///
/// `config` is served as the run configuration. Checkpoints and models live
/// under `base_dir`.
pub fn local_run_context(
    run_id: impl Into<RunId>,
    config: Value,
    base_dir: impl Into<std::path::PathBuf>,
    dataset_fetcher: Option<Arc<dyn DatasetFetcher>>,
) -> Result<RunContext> {
    let harness_config = HarnessConfig::new(run_id, base_dir);
    let mut builder = RunContextBuilder::local(&harness_config)?
        .config_loader(Arc::new(MemoryConfigLoader::new(config)));
    if let Some(fetcher) = dataset_fetcher {
        builder = builder.dataset_fetcher(fetcher);
    }
    builder.build()
}
