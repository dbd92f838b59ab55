//! Per-operation deadlines and cancellation.
//!
//! A [`Context`] accompanies every storage call. It carries an optional
//! deadline and an optional cancellation signal (a `watch` channel that
//! flips to `true`). [`Context::run`] races an operation against both, so a
//! slow network round-trip surfaces as `Timeout` or `Cancelled` instead of
//! hanging. Dropping the losing future aborts the in-flight request.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::CertStoreError;
use crate::Result;

/// Deadline and cancellation for one or more storage operations.
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

impl Context {
    /// A context with no deadline and no cancellation.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().timeout(timeout)
    }

    /// Return a copy of this context whose deadline is at most `timeout`
    /// from now.
    pub fn timeout(self, timeout: Duration) -> Self {
        self.deadline_at(Instant::now() + timeout)
    }

    /// Return a copy of this context whose deadline is at most `deadline`.
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Return a copy of this context that is cancelled when `cancel`
    /// becomes `true` or its sender is dropped.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if any. Zero once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|rx| *rx.borrow() || rx.has_changed().is_err())
            .unwrap_or(false)
    }

    /// Fill in `timeout` as the deadline when the context has none.
    pub fn or_timeout(&self, timeout: Duration) -> Self {
        match self.deadline {
            Some(_) => self.clone(),
            None => self.clone().timeout(timeout),
        }
    }

    /// Run `fut` under this context.
    ///
    /// Returns `Timeout` when the deadline passes first and `Cancelled` when
    /// the cancellation signal fires first. `op` names the operation in the
    /// error message.
    pub async fn run<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(CertStoreError::Cancelled {
                message: op.to_string(),
            });
        }

        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        let cancelled = async {
            match &self.cancel {
                Some(rx) => wait_for_cancel(rx).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = fut => result,
            _ = deadline => Err(CertStoreError::Timeout {
                message: format!("{op} exceeded its deadline"),
            }),
            _ = cancelled => Err(CertStoreError::Cancelled {
                message: op.to_string(),
            }),
        }
    }

    /// Sleep for `duration`, waking early with an error on deadline or
    /// cancellation.
    pub async fn sleep(&self, op: &str, duration: Duration) -> Result<()> {
        self.run(op, async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}

/// Resolve once the watch value is `true` or its sender is dropped.
pub async fn wait_for_cancel(rx: &watch::Receiver<bool>) {
    let mut rx = rx.clone();
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // A dropped sender counts as cancellation.
            return;
        }
    }
}
