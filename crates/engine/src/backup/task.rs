//! Background backup tasks and their observable states.
//!
//! Creation moves through `Pending -> Running -> {Succeeded, Failed}`,
//! removal through `Pending -> Running -> {Removed, NotFound, Failed}`.
//! States are published on a `tokio::sync::watch` channel so any number of
//! observers can follow a task without polling it.

use std::fmt;

use coffer_storage::StorageError;
use tokio::{sync::watch, task::JoinHandle};

use super::Backup;
use crate::error::BackupError;

/// State of a backup creation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting for a worker permit.
    Pending,
    /// Exporting owners and writing the archive.
    Running,
    /// The archive is written and registered.
    Succeeded,
    /// Nothing was registered.
    Failed,
}

impl TaskState {
    /// Returns `true` once the task can no longer change state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// State of a backup removal task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalState {
    /// Waiting for a worker permit.
    Pending,
    /// Deleting the archive.
    Running,
    /// The archive was deleted and unregistered.
    Removed,
    /// The archive was already absent.
    NotFound,
    /// The backend failed; the registry is unchanged.
    Failed,
}

impl RemovalState {
    /// Returns `true` once the task can no longer change state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Removed | Self::NotFound | Self::Failed)
    }
}

/// Final result of a removal.
#[derive(Debug, Clone)]
pub enum RemovalOutcome {
    /// The archive was deleted.
    Removed,
    /// The archive did not exist.
    NotFound,
    /// The backend failed.
    Failed(StorageError),
}

impl RemovalOutcome {
    /// The value handed to the result callback.
    #[must_use]
    pub fn removed(&self) -> bool {
        matches!(self, Self::Removed)
    }

    pub(crate) fn state(&self) -> RemovalState {
        match self {
            Self::Removed => RemovalState::Removed,
            Self::NotFound => RemovalState::NotFound,
            Self::Failed(_) => RemovalState::Failed,
        }
    }
}

/// Handle to a spawned backup creation.
#[derive(Debug)]
pub struct BackupTask {
    state: watch::Receiver<TaskState>,
    handle: JoinHandle<Result<Backup, BackupError>>,
}

impl BackupTask {
    pub(crate) fn new(
        state: watch::Receiver<TaskState>,
        handle: JoinHandle<Result<Backup, BackupError>>,
    ) -> Self {
        Self { state, handle }
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// A receiver that observes every later state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.state.clone()
    }

    /// Waits for the task to finish.
    ///
    /// # Errors
    ///
    /// Returns the creation error, or [`BackupError::Task`] if the task
    /// panicked.
    pub async fn wait(self) -> Result<Backup, BackupError> {
        self.handle.await.map_err(|e| BackupError::Task(e.to_string()))?
    }
}

/// Handle to a spawned backup removal.
///
/// Dropping the handle does not cancel the removal; the callback still runs.
#[derive(Debug)]
pub struct RemovalTask {
    state: watch::Receiver<RemovalState>,
    handle: JoinHandle<RemovalOutcome>,
}

impl RemovalTask {
    pub(crate) fn new(
        state: watch::Receiver<RemovalState>,
        handle: JoinHandle<RemovalOutcome>,
    ) -> Self {
        Self { state, handle }
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> RemovalState {
        *self.state.borrow()
    }

    /// A receiver that observes every later state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RemovalState> {
        self.state.clone()
    }

    /// Waits for the removal to finish.
    pub async fn outcome(self) -> RemovalOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                RemovalOutcome::Failed(StorageError::internal(format!("removal task died: {e}")))
            },
        }
    }
}

/// A result callback that runs exactly once.
///
/// If the owning task ends without delivering, for example because it
/// panicked, dropping the callback delivers `false`.
pub(crate) struct ResultCallback {
    callback: Option<Box<dyn FnOnce(bool) + Send + 'static>>,
}

impl ResultCallback {
    pub(crate) fn new(callback: impl FnOnce(bool) + Send + 'static) -> Self {
        Self { callback: Some(Box::new(callback)) }
    }

    pub(crate) fn deliver(mut self, removed: bool) {
        if let Some(callback) = self.callback.take() {
            callback(removed);
        }
    }
}

impl Drop for ResultCallback {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(false);
        }
    }
}

impl fmt::Debug for ResultCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCallback").field("delivered", &self.callback.is_none()).finish()
    }
}
