//! Supervised task groups.
//!
//! A [`TaskGroup`] spawns futures onto the runtime and collects every
//! outcome on one channel. A task that panics does not take the caller down
//! with it: the panic is caught and delivered as `Error::TaskFailed` in
//! place of that task's result.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use meridian_core::{Error, Result};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A set of spawned tasks whose outcomes are joined together.
#[derive(Debug)]
pub struct TaskGroup<T> {
    /// Label used in logs and `TaskFailed` errors.
    task: &'static str,
    /// Completion channel, sized to the expected task count.
    tx: mpsc::Sender<Result<T>>,
    rx: mpsc::Receiver<Result<T>>,
    /// Number of tasks spawned so far.
    spawned: usize,
}

impl<T: Send + 'static> TaskGroup<T> {
    /// Creates a group expecting `capacity` tasks.
    ///
    /// Each task can deliver its outcome without waiting as long as no more
    /// than `capacity` tasks are spawned.
    #[must_use]
    pub fn with_capacity(task: &'static str, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            task,
            tx,
            rx,
            spawned: 0,
        }
    }

    /// Spawns `future` as a member of the group.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let tx = self.tx.clone();
        let task = self.task;
        tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(task, message = %message, "task panicked");
                    Err(Error::TaskFailed { task, message })
                }
            };
            if tx.send(outcome).await.is_err() {
                debug!(task, "task group dropped before outcome was delivered");
            }
        });
        self.spawned += 1;
    }

    /// Returns the number of spawned tasks.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.spawned
    }

    /// Returns true if nothing was spawned.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.spawned == 0
    }

    /// Waits for every spawned task and returns the outcomes in completion
    /// order.
    pub async fn join(self) -> Vec<Result<T>> {
        let Self {
            task,
            tx,
            mut rx,
            spawned,
        } = self;
        drop(tx);

        let mut outcomes = Vec::with_capacity(spawned);
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }

        // A runtime shutting down can drop a task without running it.
        if outcomes.len() < spawned {
            warn!(task, missing = spawned - outcomes.len(), "tasks lost before completion");
            for _ in outcomes.len()..spawned {
                outcomes.push(Err(Error::TaskFailed {
                    task,
                    message: "task dropped before completion".to_string(),
                }));
            }
        }
        outcomes
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
