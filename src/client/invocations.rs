use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// An outstanding call: its id and the channel its caller is waiting on.
pub(super) struct Invocation {
    id: i64,
    reply_tx: oneshot::Sender<Result<Value>>,
}

impl Invocation {
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Deliver the peer's result.
    pub fn complete(self, result: Value) {
        // The caller may have stopped waiting; that's fine
        let _ = self.reply_tx.send(Ok(result));
    }

    /// Deliver an error instead of a result.
    pub fn fail(self, error: Error) {
        let _ = self.reply_tx.send(Err(error));
    }
}

/// Correlation table mapping request ids to outstanding invocations.
///
/// Every invocation leaves the table exactly once: through
/// [`remove`](InvocationTable::remove) when its reply arrives, or through
/// [`take_all`](InvocationTable::take_all) when the client shuts down.
#[derive(Default)]
pub(super) struct InvocationTable {
    invocations: HashMap<i64, Invocation>,
}

impl InvocationTable {
    /// Register a new invocation.
    ///
    /// Returns a receiver that resolves when the invocation completes or fails.
    pub fn register(&mut self, id: i64) -> oneshot::Receiver<Result<Value>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let previous = self.invocations.insert(id, Invocation { id, reply_tx });
        debug_assert!(previous.is_none(), "request id {} registered twice", id);
        reply_rx
    }

    /// Remove an invocation so it can be completed or failed.
    pub fn remove(&mut self, id: i64) -> Option<Invocation> {
        self.invocations.remove(&id)
    }

    /// Swap the live table for an empty one, returning the old contents.
    ///
    /// Callers complete the returned invocations after releasing any lock on
    /// the live table, so a completion that calls back into the client sees
    /// a consistent, empty table.
    pub fn take_all(&mut self) -> InvocationTable {
        std::mem::take(self)
    }

    /// Fail every invocation with a copy of `error`, returning how many there were.
    pub fn fail_all(self, error: &Error) -> usize {
        let count = self.invocations.len();
        for (_, invocation) in self.invocations {
            invocation.fail(error.clone());
        }
        count
    }

    pub fn len(&self) -> usize {
        self.invocations.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }
}
