//! NodeContent Writer: exclusive, append-only streaming into one node.
//!
//! Opening a writer installs a [`LiveBuffer`] on the node through the tree
//! store. After that, `write` mutates the buffer in place without touching
//! the store, since it runs at token frequency. `close` folds the buffer
//! back into the node's durable `content` with a single structural change.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

use crate::error::TreeError;
use crate::node::NodeId;
use crate::store::TreeStore;

/// One published state of a live buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveChunk {
    /// Full text accumulated so far.
    pub snapshot: String,
    /// Text appended by the write that produced this chunk.
    pub delta: String,
}

/// In-progress text of a streaming node.
///
/// Holds the latest [`LiveChunk`] and notifies subscribers on every write.
/// Subscriptions end once the owning writer closes.
pub struct LiveBuffer {
    node_id: NodeId,
    tx: Mutex<Option<watch::Sender<LiveChunk>>>,
    rx: watch::Receiver<LiveChunk>,
}

impl LiveBuffer {
    fn new(node_id: NodeId, seed: String) -> Self {
        let (tx, rx) = watch::channel(LiveChunk { snapshot: seed, delta: String::new() });
        LiveBuffer { node_id, tx: Mutex::new(Some(tx)), rx }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn latest(&self) -> LiveChunk {
        self.rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveChunk> {
        self.rx.clone()
    }

    /// Stream of chunks, starting with the current one. Intermediate chunks
    /// may be skipped by slow consumers; the final one never is.
    pub fn stream(&self) -> WatchStream<LiveChunk> {
        WatchStream::new(self.rx.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    fn append(&self, delta: &str) {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = guard.as_ref() {
            tx.send_modify(|chunk| {
                chunk.snapshot.push_str(delta);
                chunk.delta.clear();
                chunk.delta.push_str(delta);
            });
        }
    }

    fn finish(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

impl fmt::Debug for LiveBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveBuffer")
            .field("node_id", &self.node_id)
            .field("len", &self.rx.borrow().snapshot.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Exclusive writer for one node's live buffer.
///
/// Dropping an unclosed writer closes it, so a cancelled task never leaves
/// a node stuck in the streaming state.
pub struct NodeWriter {
    store: Arc<TreeStore>,
    buffer: Arc<LiveBuffer>,
    closed: bool,
}

impl NodeWriter {
    /// Install a live buffer on `node_id`, seeded with its current content.
    pub fn open(store: &Arc<TreeStore>, node_id: NodeId) -> Result<NodeWriter, TreeError> {
        let buffer = store.update_node(node_id, |node| {
            if node.live.is_some() {
                return Err(TreeError::AlreadyWriting(node_id));
            }
            let buffer = Arc::new(LiveBuffer::new(node_id, node.content.clone()));
            node.live = Some(buffer.clone());
            Ok(buffer)
        })?;
        debug!(node = %node_id, "writer opened");
        Ok(NodeWriter { store: store.clone(), buffer, closed: false })
    }

    pub fn node_id(&self) -> NodeId {
        self.buffer.node_id()
    }

    pub fn buffer(&self) -> Arc<LiveBuffer> {
        self.buffer.clone()
    }

    /// Append `delta` and notify buffer subscribers.
    pub fn write(&mut self, delta: &str) {
        self.buffer.append(delta);
    }

    /// Fold the buffer into the node's `content`, remove the buffer and end
    /// its subscriptions. Returns the final text.
    pub fn close(mut self) -> String {
        self.finalize()
    }

    fn finalize(&mut self) -> String {
        self.closed = true;
        let text = self.buffer.latest().snapshot;
        let node_id = self.node_id();
        let folded = self.store.update_node(node_id, |node| {
            let ours = node
                .live
                .as_ref()
                .is_some_and(|live| Arc::ptr_eq(live, &self.buffer));
            if ours {
                node.content = text.clone();
                node.live = None;
            }
            Ok(ours)
        });
        match folded {
            Ok(true) => debug!(node = %node_id, len = text.len(), "writer closed"),
            Ok(false) => debug!(node = %node_id, "writer closed; buffer already detached"),
            Err(e) => debug!(node = %node_id, error = %e, "writer closed without folding"),
        }
        self.buffer.finish();
        text
    }
}

impl Drop for NodeWriter {
    fn drop(&mut self) {
        if !self.closed {
            self.finalize();
        }
    }
}

impl fmt::Debug for NodeWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeWriter")
            .field("node_id", &self.node_id())
            .field("closed", &self.closed)
            .finish()
    }
}
