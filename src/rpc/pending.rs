//! Pending-request bookkeeping.
//!
//! One entry per outstanding call, keyed by [`RequestId`]. An entry leaves
//! the table exactly once: on its response, on cancellation, when the caller
//! stops waiting, or when the connection ends.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

// ============================================================================
// Types
// ============================================================================

/// Receiving half of a pending call.
type ResultReceiver = oneshot::Receiver<Result<Value>>;

/// One outstanding request.
#[derive(Debug)]
pub struct PendingRequest {
    /// When the request was registered.
    pub issued_at: Instant,
    /// Method name, for diagnostics.
    pub method: String,
    tx: oneshot::Sender<Result<Value>>,
}

// ============================================================================
// PendingTable
// ============================================================================

/// Map of request ids to result channels.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: Mutex<FxHashMap<RequestId, PendingRequest>>,
}

impl PendingTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id`, returning the channel its outcome will arrive on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if `id` is already outstanding.
    pub fn register(&self, id: RequestId, method: &str) -> Result<ResultReceiver> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return Err(Error::connection(format!("request id {id} already pending")));
        }

        let (tx, rx) = oneshot::channel();
        entries.insert(
            id,
            PendingRequest {
                issued_at: Instant::now(),
                method: method.to_string(),
                tx,
            },
        );
        Ok(rx)
    }

    /// Delivers `outcome` to the request `id`.
    ///
    /// Returns `false` if no such request is pending.
    pub fn resolve(&self, id: &RequestId, outcome: Result<Value>) -> bool {
        let Some(entry) = self.entries.lock().remove(id) else {
            return false;
        };

        trace!(
            %id,
            method = %entry.method,
            elapsed_ms = entry.issued_at.elapsed().as_millis() as u64,
            "Request resolved"
        );
        let _ = entry.tx.send(outcome);
        true
    }

    /// Resolves `id` with [`Error::Cancelled`].
    pub fn cancel(&self, id: &RequestId) -> bool {
        self.resolve(id, Err(Error::Cancelled))
    }

    /// Drops `id` without resolving it.
    pub fn remove(&self, id: &RequestId) -> Option<PendingRequest> {
        self.entries.lock().remove(id)
    }

    /// Resolves every entry with an error from `make_error`.
    ///
    /// Returns the number of requests failed.
    pub fn fail_all(&self, make_error: impl Fn() -> Error) -> usize {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        let count = drained.len();

        for (_, entry) in drained {
            let _ = entry.tx.send(Err(make_error()));
        }

        if count > 0 {
            debug!(count, "Failed pending requests");
        }
        count
    }

    /// Returns the number of outstanding requests.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing is outstanding.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns `true` if `id` is outstanding.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Returns how long the oldest outstanding request has waited.
    #[must_use]
    pub fn oldest_age(&self) -> Option<Duration> {
        self.entries
            .lock()
            .values()
            .map(|entry| entry.issued_at.elapsed())
            .max()
    }
}

// ============================================================================
// PendingCall
// ============================================================================

/// An in-flight call.
///
/// Dropping it before the outcome arrives removes the table entry, so a
/// late response is ignored.
#[derive(Debug)]
pub struct PendingCall {
    id: RequestId,
    rx: ResultReceiver,
    table: Arc<PendingTable>,
}

impl PendingCall {
    pub(crate) fn new(id: RequestId, rx: ResultReceiver, table: Arc<PendingTable>) -> Self {
        Self { id, rx, table }
    }

    /// Returns the request id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Returns a handle that can cancel this call from another task.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            id: self.id.clone(),
            table: Arc::downgrade(&self.table),
        }
    }

    /// Stops waiting; [`wait`](Self::wait) then yields [`Error::Cancelled`].
    ///
    /// The request already written to the server is not retracted.
    pub fn cancel(&self) -> bool {
        self.table.cancel(&self.id)
    }

    /// Waits for the outcome.
    ///
    /// # Errors
    ///
    /// - [`Error::Rpc`] if the server answered with an error
    /// - [`Error::Cancelled`] if the call or the connection was cancelled
    /// - [`Error::ConnectionClosed`] / [`Error::Connection`] if the connection ended
    pub async fn wait(mut self) -> Result<Value> {
        (&mut self.rx).await.map_err(|_| Error::ConnectionClosed)?
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if self.table.remove(&self.id).is_some() {
            trace!(id = %self.id, "Pending call abandoned");
        }
    }
}

/// Cancels one call without owning it.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    id: RequestId,
    table: Weak<PendingTable>,
}

impl CancelHandle {
    /// Returns the request id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Cancels the call if it is still outstanding.
    pub fn cancel(&self) -> bool {
        self.table
            .upgrade()
            .is_some_and(|table| table.cancel(&self.id))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn table() -> Arc<PendingTable> {
        Arc::new(PendingTable::new())
    }

    fn start(table: &Arc<PendingTable>, id: u64) -> PendingCall {
        let id = RequestId::from(id);
        let rx = table.register(id.clone(), "test").expect("register");
        PendingCall::new(id, rx, Arc::clone(table))
    }

    #[tokio::test]
    async fn test_resolve_delivers_result() {
        let table = table();
        let call = start(&table, 1);

        assert!(table.resolve(&RequestId::from(1), Ok(json!({"ok": true}))));
        assert_eq!(call.wait().await.expect("result"), json!({"ok": true}));
        assert!(table.is_empty());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let table = table();
        let _call = start(&table, 7);
        assert!(table.register(RequestId::from(7), "again").is_err());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_unknown_id_is_not_resolved() {
        let table = table();
        assert!(!table.resolve(&RequestId::from(99), Ok(Value::Null)));
    }

    #[tokio::test]
    async fn test_cancel_resolves_with_cancelled() {
        let table = table();
        let call = start(&table, 2);

        assert!(call.cancel());
        assert!(!table.contains(call.id()));
        assert!(call.wait().await.expect_err("cancelled").is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_handle_from_other_task() {
        let table = table();
        let call = start(&table, 3);
        let handle = call.cancel_handle();

        tokio::spawn(async move {
            assert!(handle.cancel());
        })
        .await
        .expect("join");

        assert!(call.wait().await.expect_err("cancelled").is_cancelled());
    }

    #[test]
    fn test_drop_removes_entry() {
        let table = table();
        let call = start(&table, 4);
        assert_eq!(table.len(), 1);

        drop(call);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_fail_all_resolves_everything() {
        let table = table();
        let calls: Vec<_> = (1..=5).map(|id| start(&table, id)).collect();

        assert_eq!(table.fail_all(|| Error::Cancelled), 5);
        assert!(table.is_empty());

        for call in calls {
            assert!(call.wait().await.expect_err("failed").is_cancelled());
        }
    }

    #[test]
    fn test_oldest_age() {
        let table = table();
        assert!(table.oldest_age().is_none());
        let _call = start(&table, 1);
        assert!(table.oldest_age().is_some());
    }
}
