use std::future::{pending, Future};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

use crate::errors::AdapterError;

/// Cancellation and deadline carried into transactional operations.
///
/// A context resolves at most once, either because its `CancelHandle` fired
/// or because its deadline passed. Clones observe the same outcome.
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Cancels every clone of the context it was created with.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Context {
    /// Never cancelled, no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: None,
        }
    }

    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                deadline: None,
                cancel: Some(rx),
            },
            CancelHandle { tx },
        )
    }

    /// This context with a deadline no later than `timeout` from now.
    pub fn and_timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// `Ok` while the context is live, otherwise the reason it ended.
    pub fn err(&self) -> Result<(), AdapterError> {
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Err(AdapterError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(AdapterError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Resolves once the context ends. Pending forever for `background()`.
    pub async fn done(&self) -> AdapterError {
        let cancelled = async {
            let Some(mut rx) = self.cancel.clone() else {
                return pending::<()>().await;
            };
            loop {
                let fired = *rx.borrow_and_update();
                if fired {
                    return;
                }
                if rx.changed().await.is_err() {
                    // Handle dropped without cancelling.
                    return pending::<()>().await;
                }
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => AdapterError::Cancelled,
            _ = expired => AdapterError::DeadlineExceeded,
        }
    }

    /// Drive `fut` unless the context ends first. If both are ready on the
    /// same poll the context wins, so a result that arrives too late is
    /// reported as cancelled. `fut` is dropped when the context wins.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, AdapterError>
    where
        F: Future<Output = Result<T, AdapterError>>,
    {
        self.err()?;
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            out = fut => out,
        }
    }
}
