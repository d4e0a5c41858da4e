//! Interruption handling
//!
//! OS termination requests are turned into an [`InterruptFlag`] that running
//! code observes cooperatively, either by polling [`InterruptFlag::check`] or
//! by selecting on [`InterruptFlag::wait`]. A single dispatcher thread owns
//! the OS handlers for the life of the process and fans each request out to
//! the runs that are listening.

use harness_core::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, OnceLock};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct FlagInner {
    set: AtomicBool,
    notify: Notify,
}

/// One-shot cancellation flag shared between a signal listener and the run
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    inner: Arc<FlagInner>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the interruption condition. Idempotent.
    pub fn trigger(&self) {
        if !self.inner.set.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_set(&self) -> bool {
        self.inner.set.load(Ordering::SeqCst)
    }

    /// Fail with `Interrupted` once the flag is raised
    pub fn check(&self) -> Result<()> {
        if self.is_set() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Resolve once the flag is raised
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before re-checking so a concurrent trigger is not missed
            notified.as_mut().enable();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(unix)]
const SIGINT: i32 = 2;
#[cfg(unix)]
const SIGTERM: i32 = 15;

/// Flags of the runs currently listening for termination requests
static LISTENERS: Mutex<Vec<(u64, InterruptFlag)>> = parking_lot::const_mutex(Vec::new());
static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(0);
static DISPATCHER: OnceLock<std::result::Result<(), String>> = OnceLock::new();

/// Registration of an [`InterruptFlag`] with the process-wide signal dispatcher
///
/// While at least one listener is registered, Ctrl+C and SIGTERM raise every
/// registered flag. With none registered, the dispatcher exits the process
/// with status `128 + signo`, as the default disposition would. Dropping the
/// listener deregisters its flag.
#[derive(Debug)]
pub struct SignalListener {
    id: u64,
}

impl SignalListener {
    /// Register `flag`, starting the dispatcher on first use
    ///
    /// The OS handlers are installed before this returns.
    pub fn install(flag: InterruptFlag) -> Result<Self> {
        DISPATCHER
            .get_or_init(start_dispatcher)
            .clone()
            .map_err(|message| Error::Internal { message })?;

        let id = NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed);
        LISTENERS.lock().push((id, flag));
        debug!(listener = id, "Registered interruption listener");
        Ok(Self { id })
    }
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        LISTENERS.lock().retain(|(id, _)| *id != self.id);
        debug!(listener = self.id, "Deregistered interruption listener");
    }
}

/// Raise every registered flag, or exit if no run is listening
fn deliver(signal: &str, signo: i32) {
    if !raise_all(signal, &LISTENERS.lock()) {
        warn!(signal, "Received termination request outside a run, exiting");
        std::process::exit(128 + signo);
    }
}

/// Returns false when there was no flag to raise
fn raise_all(signal: &str, listeners: &[(u64, InterruptFlag)]) -> bool {
    if listeners.is_empty() {
        return false;
    }

    info!(signal, active_runs = listeners.len(), "Interrupting active runs");
    for (_, flag) in listeners {
        flag.trigger();
    }
    true
}

/// Run the dispatcher on its own thread and runtime so it outlives any
/// runtime the caller drops
fn start_dispatcher() -> std::result::Result<(), String> {
    let (ready_tx, ready_rx) = mpsc::channel();

    std::thread::Builder::new()
        .name("signal-dispatcher".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("failed to build dispatcher runtime: {e}")));
                    return;
                }
            };

            runtime.block_on(async move {
                match OsSignals::register() {
                    Ok(signals) => {
                        let _ = ready_tx.send(Ok(()));
                        signals.dispatch().await;
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("failed to install signal handlers: {e}")));
                    }
                }
            });
        })
        .map_err(|e| format!("failed to start signal dispatcher: {e}"))?;

    ready_rx
        .recv()
        .map_err(|_| "signal dispatcher stopped before installing handlers".to_string())?
}

#[cfg(unix)]
struct OsSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl OsSignals {
    fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn dispatch(mut self) {
        loop {
            tokio::select! {
                Some(()) = self.interrupt.recv() => deliver("SIGINT", SIGINT),
                Some(()) = self.terminate.recv() => deliver("SIGTERM", SIGTERM),
                else => break,
            }
        }
    }
}

#[cfg(not(unix))]
struct OsSignals;

#[cfg(not(unix))]
impl OsSignals {
    fn register() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn dispatch(self) {
        while tokio::signal::ctrl_c().await.is_ok() {
            deliver("Ctrl+C", 2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_trigger_is_sticky() {
        let flag = InterruptFlag::new();
        assert!(flag.check().is_ok());

        flag.trigger();
        flag.trigger();
        assert!(flag.is_set());
        assert!(matches!(flag.check(), Err(Error::Interrupted)));
    }

    #[tokio::test]
    async fn test_wait_wakes_on_trigger() {
        let flag = InterruptFlag::new();
        let waiter = {
            let flag = flag.clone();
            tokio::spawn(async move { flag.wait().await })
        };

        tokio::task::yield_now().await;
        flag.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_already_set() {
        let flag = InterruptFlag::new();
        flag.trigger();
        tokio::time::timeout(Duration::from_millis(100), flag.wait())
            .await
            .expect("flag already set");
    }

    fn is_registered(listener: &SignalListener) -> bool {
        LISTENERS.lock().iter().any(|(id, _)| *id == listener.id)
    }

    #[test]
    fn test_listener_registers_until_dropped() {
        let flag = InterruptFlag::new();
        let listener = SignalListener::install(flag.clone()).unwrap();
        assert!(is_registered(&listener));

        let second = SignalListener::install(InterruptFlag::new()).unwrap();
        assert_ne!(listener.id, second.id);

        drop(listener);
        assert!(!LISTENERS.lock().iter().any(|(_, f)| Arc::ptr_eq(&f.inner, &flag.inner)));
        assert!(is_registered(&second));
    }

    #[test]
    fn test_delivery_raises_every_registered_flag() {
        let first = InterruptFlag::new();
        let second = InterruptFlag::new();
        let listeners = vec![(0, first.clone()), (1, second.clone())];

        assert!(raise_all("SIGINT", &listeners));
        assert!(first.is_set());
        assert!(second.is_set());
    }

    #[test]
    fn test_delivery_without_listeners_requests_exit() {
        assert!(!raise_all("SIGTERM", &[]));
    }
}
