// ============================================================================
// Worker Supervisor
// ============================================================================
//
// Ties the worker set to the leadership term:
// - acquire: start one distributor, one acknowledger and one republisher
// - loss: abort all of them, no draining
// - any worker exits: abort the rest and raise the give-up signal so the
//   coordinator steps down on its next renewal tick
//
// ============================================================================

use crate::error::WorkerError;
use crate::leadership::{GiveUpSignal, LeadershipListener};
use asynchroza_metrics::WORKER_FAULTS;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    Distributor,
    Acknowledger,
    Republisher,
}

impl WorkerKind {
    pub const ALL: [WorkerKind; 3] = [
        WorkerKind::Distributor,
        WorkerKind::Acknowledger,
        WorkerKind::Republisher,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkerKind::Distributor => "distributor",
            WorkerKind::Acknowledger => "acknowledger",
            WorkerKind::Republisher => "republisher",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs one worker to completion.
///
/// A worker is expected to run until aborted; returning at all, with or without an
/// error, counts as a fault.
#[async_trait::async_trait]
pub trait WorkerLauncher: Send + Sync + 'static {
    async fn run(&self, kind: WorkerKind) -> Result<(), WorkerError>;
}

/// Worker set of one leadership term
struct Term {
    cancel: oneshot::Sender<()>,
    monitor: JoinHandle<()>,
}

pub struct WorkerSupervisor<W> {
    launcher: Arc<W>,
    term: Option<Term>,
}

impl<W: WorkerLauncher> WorkerSupervisor<W> {
    pub fn new(launcher: Arc<W>) -> Self {
        Self {
            launcher,
            term: None,
        }
    }

    /// Whether a worker set from the current term is still running
    pub fn is_running(&self) -> bool {
        self.term
            .as_ref()
            .map(|term| !term.monitor.is_finished())
            .unwrap_or(false)
    }

    /// Start a fresh worker set, replacing any left over from an earlier term
    pub async fn start(&mut self, give_up: GiveUpSignal) {
        self.terminate().await;

        let mut workers = JoinSet::new();
        for kind in WorkerKind::ALL {
            let launcher = self.launcher.clone();
            workers.spawn(async move { (kind, launcher.run(kind).await) });
            info!(worker = %kind, "Started worker");
        }

        let (cancel, cancelled) = oneshot::channel();
        self.term = Some(Term {
            cancel,
            monitor: tokio::spawn(monitor(workers, give_up, cancelled)),
        });
    }

    /// Abort every worker of the current term and wait until they are gone
    pub async fn terminate(&mut self) {
        let Some(term) = self.term.take() else {
            return;
        };

        // Already gone if the monitor finished after a fault
        let _ = term.cancel.send(());
        if let Err(e) = term.monitor.await {
            error!(error = %e, "Worker monitor panicked");
        }
        info!("Workers terminated");
    }
}

type WorkerExit = (WorkerKind, Result<(), WorkerError>);

/// Wait for the first worker exit or a cancel, then shut the whole set down.
///
/// `shutdown` returns only after every worker future has been dropped, so listeners
/// and connections of this term are closed by the time the monitor finishes.
async fn monitor(
    mut workers: JoinSet<WorkerExit>,
    give_up: GiveUpSignal,
    cancelled: oneshot::Receiver<()>,
) {
    let first = tokio::select! {
        first = workers.join_next() => first,
        // A dropped sender means the supervisor itself is gone
        _ = cancelled => {
            workers.shutdown().await;
            return;
        }
    };
    let Some(first) = first else {
        return;
    };

    report_exit(first);
    WORKER_FAULTS.inc();

    workers.shutdown().await;
    warn!("Worker set torn down, giving up leadership");
    give_up.raise();
}

fn report_exit(exit: Result<WorkerExit, JoinError>) {
    match exit {
        Ok((kind, Ok(()))) => {
            error!(worker = %kind, error = %WorkerError::Exited, "Worker stopped");
        }
        Ok((kind, Err(e))) => {
            error!(worker = %kind, error = %e, "Worker failed");
        }
        Err(e) => {
            error!(error = %e, "Worker panicked");
        }
    }
}

#[async_trait::async_trait]
impl<W: WorkerLauncher> LeadershipListener for WorkerSupervisor<W> {
    async fn on_leadership_acquire(&mut self, give_up: GiveUpSignal) {
        self.start(give_up).await;
    }

    async fn on_leadership_loss(&mut self) {
        self.terminate().await;
    }
}
