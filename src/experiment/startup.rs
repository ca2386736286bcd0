//! Asynchronous fault injection with a pollable, interruptible handle.
//!
//! `PendingStartup::spawn` runs the injection on its own thread and returns
//! immediately. The status tick calls `poll()`, which never blocks: it either
//! yields the finished result or reports that the work is still running.
//! Interruption is cooperative through a shared `CancellationToken`; the
//! injection closure receives the token and is expected to stop at its next
//! check. Once interrupted, the handle is detached and its late result is
//! discarded.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, TryRecvError, bounded};

use crate::core::errors::{ChaosError, Result};

/// Shared interrupt flag between the manager and a running injection.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Outcome of a non-blocking poll.
#[derive(Debug)]
pub enum StartupPoll<T> {
    Pending,
    Ready(Result<T>),
}

/// Handle to an injection running on a background thread.
#[derive(Debug)]
pub struct PendingStartup<T> {
    rx: Receiver<Result<T>>,
    cancel: CancellationToken,
    submitted_at: DateTime<Utc>,
}

impl<T: Send + 'static> PendingStartup<T> {
    /// Start `work` on a named thread.
    pub fn spawn<F>(name: String, submitted_at: DateTime<Utc>, work: F) -> Result<Self>
    where
        F: FnOnce(&CancellationToken) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = bounded::<Result<T>>(1);
        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();

        thread::Builder::new()
            .name(name)
            .spawn(move || {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    work(&worker_cancel)
                }))
                .unwrap_or_else(|_| {
                    Err(ChaosError::Runtime {
                        details: "experiment startup panicked".to_string(),
                    })
                });
                // Receiver is gone after an interrupt.
                let _ = tx.send(outcome);
            })
            .map_err(|source| ChaosError::Runtime {
                details: format!("failed to spawn experiment startup thread: {source}"),
            })?;

        Ok(Self {
            rx,
            cancel,
            submitted_at,
        })
    }

    /// Handle whose result is already known. Used when injection is rejected
    /// before any work is submitted.
    #[must_use]
    pub fn ready(submitted_at: DateTime<Utc>, outcome: Result<T>) -> Self {
        let (tx, rx) = bounded::<Result<T>>(1);
        let _ = tx.send(outcome);
        Self {
            rx,
            cancel: CancellationToken::new(),
            submitted_at,
        }
    }
}

impl<T> PendingStartup<T> {
    /// Check for a result without blocking.
    pub fn poll(&self) -> StartupPoll<T> {
        match self.rx.try_recv() {
            Ok(outcome) => StartupPoll::Ready(outcome),
            Err(TryRecvError::Empty) => StartupPoll::Pending,
            Err(TryRecvError::Disconnected) => StartupPoll::Ready(Err(ChaosError::ChannelClosed {
                component: "experiment-startup",
            })),
        }
    }

    /// Signal the running injection to stop.
    pub fn interrupt(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub const fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }
}
