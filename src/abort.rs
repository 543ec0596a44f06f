//! Cancellation for in-flight generations.
//!
//! An [`AbortHandle`] is stored on the submitting node; the matching
//! [`CancelSignal`] is handed to the chat-stream provider. Aborting is
//! idempotent and never rolls back text that was already written.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use uuid::Uuid;

use crate::node::NodeId;

/// Owner side of a cancellation pair.
#[derive(Clone)]
pub struct AbortHandle {
    generation: Uuid,
    target: NodeId,
    tx: Arc<watch::Sender<bool>>,
}

/// Provider side of a cancellation pair.
#[derive(Clone, Debug)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl AbortHandle {
    /// Create a handle for a generation writing into `target`.
    pub fn new(target: NodeId) -> (AbortHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        let handle = AbortHandle {
            generation: Uuid::new_v4(),
            target,
            tx: Arc::new(tx),
        };
        (handle, CancelSignal { rx })
    }

    /// Node receiving the generated text.
    pub fn target(&self) -> NodeId {
        self.target
    }

    pub fn generation(&self) -> Uuid {
        self.generation
    }

    /// Signal cancellation. Calling this more than once is a no-op.
    pub fn abort(&self) {
        self.tx.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        });
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Whether two handles belong to the same generation.
    pub fn same_generation(&self, other: &AbortHandle) -> bool {
        self.generation == other.generation
    }
}

impl fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortHandle")
            .field("generation", &self.generation)
            .field("target", &self.target)
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> CancelSignal {
        let (tx, rx) = watch::channel(false);
        // A dropped sender keeps the last value readable; `cancelled()`
        // treats a closed channel that never fired as pending forever.
        drop(tx);
        CancelSignal { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
