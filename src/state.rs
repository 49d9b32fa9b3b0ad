// State management for the recording store

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::StoreConfig;
use crate::database::DatabaseManager;
use crate::library::RecordingLibrary;
use crate::reconcile::{ReconcileProgress, Reconciler, ReconciliationReport};

/// Wrapper around DatabaseManager for shared access
pub struct DbWrapper {
    inner: Arc<DatabaseManager>,
}

impl DbWrapper {
    pub fn new(db: DatabaseManager) -> Self {
        Self {
            inner: Arc::new(db),
        }
    }

    pub fn from_arc(inner: Arc<DatabaseManager>) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &DatabaseManager {
        &self.inner
    }

    pub fn arc(&self) -> Arc<DatabaseManager> {
        self.inner.clone()
    }
}

impl std::ops::Deref for DbWrapper {
    type Target = DatabaseManager;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// A reconciliation pass running on a blocking worker
pub struct ReconcileTask {
    pub progress: UnboundedReceiver<ReconcileProgress>,
    cancel: CancellationToken,
    handle: JoinHandle<ReconciliationReport>,
}

impl ReconcileTask {
    /// Ask the pass to stop at the next phase boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the pass to finish and return its report
    pub async fn finish(self) -> Result<ReconciliationReport> {
        self.handle.await.context("Reconciliation task failed to complete")
    }
}

/// Clears the running flag when the worker exits, including on panic
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct AppState {
    /// Database manager for SQLite persistence
    database: Arc<RwLock<Option<DbWrapper>>>,
    config: Arc<RwLock<Option<StoreConfig>>>,
    /// Set while a reconciliation pass is running
    reconciling: Arc<AtomicBool>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            database: Arc::new(RwLock::new(None)),
            config: Arc::new(RwLock::new(None)),
            reconciling: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Initialize the database manager and store config
    pub async fn init_database(&self, db: DatabaseManager, config: StoreConfig) {
        {
            let mut guard = self.config.write().await;
            *guard = Some(config);
        }
        let mut guard = self.database.write().await;
        *guard = Some(DbWrapper::new(db));
    }

    /// Initialize from an already opened library
    pub async fn init_library(&self, library: &RecordingLibrary) {
        {
            let mut guard = self.config.write().await;
            *guard = Some(library.config().clone());
        }
        let mut guard = self.database.write().await;
        *guard = Some(DbWrapper::from_arc(library.database()));
    }

    /// Get the database Arc for background tasks
    pub async fn db(&self) -> Result<Arc<DatabaseManager>> {
        let guard = self.database.read().await;
        guard
            .as_ref()
            .map(DbWrapper::arc)
            .ok_or_else(|| anyhow!("Database not initialized"))
    }

    pub async fn config(&self) -> Result<StoreConfig> {
        let guard = self.config.read().await;
        guard.clone().ok_or_else(|| anyhow!("Store config not initialized"))
    }

    /// A library handle sharing this state's database
    pub async fn library(&self) -> Result<RecordingLibrary> {
        Ok(RecordingLibrary::new(self.db().await?, self.config().await?))
    }

    pub fn is_reconciling(&self) -> bool {
        self.reconciling.load(Ordering::SeqCst)
    }

    /// Start a reconciliation pass on a blocking worker thread.
    /// Fails if another pass is still running.
    pub async fn start_reconciliation(&self, apply: bool) -> Result<ReconcileTask> {
        let db = self.db().await?;
        let config = self.config().await?;

        if self
            .reconciling
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::warn!("Reconciliation requested while another pass is running");
            return Err(anyhow!("A reconciliation pass is already running"));
        }
        let running = RunningGuard(self.reconciling.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let _running = running;
            Reconciler::new(&db, &config)
                .with_progress(tx)
                .with_cancellation(worker_cancel)
                .run(apply)
        });

        log::info!("Reconciliation task started (apply={})", apply);
        Ok(ReconcileTask {
            progress: rx,
            cancel,
            handle,
        })
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
