//! Structured task group for one session.
//!
//! Every background task is bound to a single cancellation token. A task that
//! fails with a [`SessionError`] records the first such error and cancels the
//! token; every other task stops at its next suspension point. Only the owner
//! waits for all of them with [`TaskGroup::shutdown`].

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::error::SessionError;

#[derive(Debug, Clone)]
pub struct TaskGroup {
    token: CancellationToken,
    tracker: TaskTracker,
    cause: Arc<Mutex<Option<SessionError>>>,
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// A group that is also cancelled when `parent` is.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self::with_token(parent.child_token())
    }

    fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            tracker: TaskTracker::new(),
            cause: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawn a task whose failure kills the session.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), SessionError>> + Send + 'static,
    {
        let group = self.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = group.token.cancelled() => debug!(task = name, "task cancelled"),
                result = task => match result {
                    Ok(()) => debug!(task = name, "task finished"),
                    Err(error) => {
                        warn!(task = name, error = %error, "task failed, killing session");
                        group.kill(error);
                    }
                },
            }
        });
    }

    /// Spawn a task whose failure is logged and otherwise ignored.
    pub fn spawn_scoped<F, E>(&self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let token = self.token.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => debug!(task = name, "task cancelled"),
                result = task => match result {
                    Ok(()) => debug!(task = name, "task finished"),
                    Err(error) => warn!(task = name, error = %error, "task failed"),
                },
            }
        });
    }

    /// Raise the kill signal. The first error raised is kept as the cause.
    pub fn kill(&self, error: SessionError) {
        self.cause
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert(error);
        self.token.cancel();
    }

    pub fn is_killed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn killed(&self) {
        self.token.cancelled().await;
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Take the error that killed the group, if it was not a plain cancellation.
    pub fn take_cause(&self) -> Option<SessionError> {
        self.cause
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Cancel every task and wait until all of them have stopped.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
