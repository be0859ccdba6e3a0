//! Request/response correlation for commands awaiting a peer callback.
//!
//! Each submitted command gets a pending slot keyed by its [`RequestId`].
//! The slot is resolved exactly once, by whichever comes first:
//!
//! ```text
//!   callback frame ──┐
//!   zero recipients ─┼──▶ resolve(id) ──▶ remove slot ──▶ oneshot fires
//!   timer expiry ────┘
//! ```
//!
//! Removal from the map is the resolution step, so later attempts find
//! nothing and are no-ops.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use relay_protocol::RequestId;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

/// Result text of a request that nobody answered in time.
pub const TIMEOUT_RESULT: &str = "timeout";

/// Default time to wait for a callback.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_millis(5000);

/// Correlation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CorrelationError {
    /// A request with this id is already pending.
    #[error("Request already pending: {0}")]
    DuplicateRequest(RequestId),
}

struct Slot {
    sender: oneshot::Sender<String>,
    timer: Option<AbortHandle>,
}

/// Table of pending requests.
///
/// Cloning is cheap and yields a handle to the same table.
#[derive(Clone)]
pub struct PendingTable {
    slots: Arc<DashMap<RequestId, Slot>>,
    timeout: Duration,
}

impl PendingTable {
    /// Create a table whose requests expire after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            timeout,
        }
    }

    /// The expiry applied to new requests.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Allocate a pending request under a freshly generated id.
    ///
    /// Must be called within a tokio runtime; the expiry timer is a
    /// spawned task.
    pub fn create(&self) -> PendingRequest {
        loop {
            match self.register(RequestId::generate()) {
                Ok(request) => return request,
                Err(CorrelationError::DuplicateRequest(id)) => {
                    trace!(request = %id, "Request id collision, regenerating");
                }
            }
        }
    }

    /// Allocate a pending request under `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is already pending.
    pub fn register(&self, id: RequestId) -> Result<PendingRequest, CorrelationError> {
        let (sender, receiver) = oneshot::channel();

        match self.slots.entry(id.clone()) {
            Entry::Occupied(_) => return Err(CorrelationError::DuplicateRequest(id)),
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    sender,
                    timer: None,
                });
            }
        }

        // The slot exists before the timer starts, so an immediate expiry
        // still finds it.
        let table = self.clone();
        let expiring = id.clone();
        let timeout = self.timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if table.resolve(expiring.as_str(), TIMEOUT_RESULT) {
                debug!(request = %expiring, "Request timed out");
            }
        });
        if let Some(mut slot) = self.slots.get_mut(&id) {
            slot.timer = Some(timer.abort_handle());
        }

        trace!(request = %id, "Request pending");
        Ok(PendingRequest { id, receiver })
    }

    /// Resolve a pending request with `value`.
    ///
    /// Returns `true` if the request was pending. Resolving an unknown or
    /// already resolved request is a no-op.
    pub fn resolve(&self, id: &str, value: impl Into<String>) -> bool {
        let Some((id, slot)) = self.slots.remove(id) else {
            return false;
        };
        if let Some(timer) = slot.timer {
            timer.abort();
        }
        // The waiter may be gone if the caller hung up.
        let _ = slot.sender.send(value.into());
        trace!(request = %id, "Request resolved");
        true
    }

    /// Whether `id` is still pending.
    #[must_use]
    pub fn is_pending(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    /// Number of pending requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no requests are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new(DEFAULT_CALLBACK_TIMEOUT)
    }
}

/// The waiting side of a pending request.
#[derive(Debug)]
pub struct PendingRequest {
    id: RequestId,
    receiver: oneshot::Receiver<String>,
}

impl PendingRequest {
    /// The request id.
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for the resolution.
    pub async fn wait(self) -> String {
        self.receiver
            .await
            .unwrap_or_else(|_| TIMEOUT_RESULT.to_string())
    }
}
