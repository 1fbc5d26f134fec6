//! Shared completion handles
//!
//! A recovery request hands its caller a `RecoveryCompletion`. Every caller
//! that attaches to the same request holds a clone of the same handle and
//! observes the same `RecoveryGateOutcome`. Dropping the resolver without a
//! value settles every holder as `cancelled`.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::future::IntoFuture;
use tokio::sync::oneshot;
use tt_types::RecoveryGateOutcome;

/// Cloneable handle to the outcome of one recovery request
#[derive(Clone)]
pub struct RecoveryCompletion {
    inner: Shared<BoxFuture<'static, RecoveryGateOutcome>>,
}

impl RecoveryCompletion {
    /// Handle that is already settled
    pub fn ready(outcome: RecoveryGateOutcome) -> Self {
        Self {
            inner: futures::future::ready(outcome).boxed().shared(),
        }
    }

    /// Outcome, if the request has settled and the handle was polled since
    pub fn peek(&self) -> Option<RecoveryGateOutcome> {
        self.inner.peek().cloned()
    }

    /// Whether two unsettled handles refer to the same request
    pub fn same_request(&self, other: &RecoveryCompletion) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl fmt::Debug for RecoveryCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryCompletion")
            .field("settled", &self.peek())
            .finish()
    }
}

impl IntoFuture for RecoveryCompletion {
    type Output = RecoveryGateOutcome;
    type IntoFuture = Shared<BoxFuture<'static, RecoveryGateOutcome>>;

    fn into_future(self) -> Self::IntoFuture {
        self.inner
    }
}

/// Resolving side of a `RecoveryCompletion`
#[derive(Debug)]
pub(crate) struct CompletionResolver {
    tx: oneshot::Sender<RecoveryGateOutcome>,
}

impl CompletionResolver {
    pub(crate) fn resolve(self, outcome: RecoveryGateOutcome) {
        // Holders may all have gone away; nothing to notify then.
        let _ = self.tx.send(outcome);
    }
}

/// Create a linked resolver and handle
pub(crate) fn completion_pair() -> (CompletionResolver, RecoveryCompletion) {
    let (tx, rx) = oneshot::channel();
    let inner = rx
        .map(|received| received.unwrap_or(RecoveryGateOutcome::Cancelled))
        .boxed()
        .shared();
    (CompletionResolver { tx }, RecoveryCompletion { inner })
}
