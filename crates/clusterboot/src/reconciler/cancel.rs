//! Run cancellation
//!
//! A run stops issuing new steps once its cancel flag is raised or its
//! deadline passes. Calls already in flight are allowed to finish.

use std::fmt;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a run stopped early.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelReason {
    Requested,
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Requested => f.write_str("cancellation requested"),
            CancelReason::DeadlineExceeded => f.write_str("run deadline exceeded"),
        }
    }
}

/// Sending half, held by whoever may stop the run (e.g. a ctrl-c handler).
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half, observed by the reconciler between steps and while sleeping.
#[derive(Clone, Debug)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl CancelSignal {
    pub fn new() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (
            CancelHandle { tx },
            Self {
                rx: Some(rx),
                deadline: None,
            },
        )
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        Self {
            rx: None,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn check(&self) -> Option<CancelReason> {
        if self.rx.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Some(CancelReason::Requested);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the run is cancelled. Pending forever for [`CancelSignal::never`].
    pub async fn cancelled(&self) -> CancelReason {
        let requested = async {
            match self.rx.clone() {
                Some(mut rx) => {
                    // A dropped handle can no longer cancel.
                    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = requested => CancelReason::Requested,
            _ = expired => CancelReason::DeadlineExceeded,
        }
    }

    /// Sleep for `duration`, returning early with the reason if cancelled.
    pub async fn sleep(&self, duration: std::time::Duration) -> Result<(), CancelReason> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            reason = self.cancelled() => Err(reason),
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::never()
    }
}
