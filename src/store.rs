//! # Tree Store
//!
//! ## Responsibility
//! Sole owner of the canonical node list. Every mutation goes through a
//! [`NodeChange`] (puts + removals); the store applies it to produce a new
//! list and publishes the whole list to observers.
//!
//! ## Guarantees
//! - Copy-on-write: published [`NodeList`]s are never mutated, so a reader
//!   holding an older list always sees a consistent snapshot
//! - Ordered: changes are applied in call order under a single lock
//! - Observable: the latest list is readable synchronously, `subscribe()`
//!   notifies on the next change, `changes()` replays each discrete change
//!
//! ## NOT Responsible For
//! - Tree invariants (single root, non-empty non-leaf); the conversation
//!   controller enforces those
//! - Per-token text accumulation (that is the writer's live buffer)

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::error::TreeError;
use crate::node::{ChatNode, NodeId};

/// Immutable, shareable node list.
pub type NodeList = Arc<Vec<ChatNode>>;

/// Change-feed capacity (number of events a slow subscriber may lag).
pub const CHANGE_CHANNEL_CAP: usize = 256;

// ---------------------------------------------------------------------------
// Change protocol
// ---------------------------------------------------------------------------

/// A structural change: removals are applied first, then puts.
#[derive(Debug, Clone, Default)]
pub struct NodeChange {
    pub put_nodes: Vec<ChatNode>,
    pub remove_nodes: Vec<NodeId>,
}

impl NodeChange {
    pub fn put(nodes: Vec<ChatNode>) -> Self {
        NodeChange { put_nodes: nodes, remove_nodes: Vec::new() }
    }

    pub fn remove(ids: Vec<NodeId>) -> Self {
        NodeChange { put_nodes: Vec::new(), remove_nodes: ids }
    }

    pub fn is_empty(&self) -> bool {
        self.put_nodes.is_empty() && self.remove_nodes.is_empty()
    }
}

/// One published change, as seen on the change feed.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub revision: u64,
    pub change: Arc<NodeChange>,
    pub nodes: NodeList,
}

/// Apply `change` to `nodes`.
///
/// - unknown removal ids are ignored
/// - a put replaces an existing node in place, otherwise appends
/// - a put for an id removed in the same change re-inserts it at the end
/// - duplicate ids within `put_nodes`: the last entry wins
/// - if any node carries an explicit `order`, the result is stably sorted
///   by it (nodes without one sort first)
pub fn apply_change_to(nodes: &[ChatNode], change: &NodeChange) -> Vec<ChatNode> {
    let removed: HashSet<NodeId> = change.remove_nodes.iter().copied().collect();
    let mut out: Vec<ChatNode> = nodes
        .iter()
        .filter(|n| !removed.contains(&n.id))
        .cloned()
        .collect();

    let mut index: HashMap<NodeId, usize> =
        out.iter().enumerate().map(|(i, n)| (n.id, i)).collect();
    for node in &change.put_nodes {
        match index.get(&node.id) {
            Some(&i) => out[i] = node.clone(),
            None => {
                index.insert(node.id, out.len());
                out.push(node.clone());
            }
        }
    }

    if out.iter().any(|n| n.order.is_some()) {
        out.sort_by_key(|n| n.order);
    }
    out
}

/// Express `current → next` as a change: remove ids missing from `next`,
/// put every node of `next`.
pub fn diff_nodes(current: &[ChatNode], next: Vec<ChatNode>) -> NodeChange {
    let keep: HashSet<NodeId> = next.iter().map(|n| n.id).collect();
    let remove_nodes = current
        .iter()
        .map(|n| n.id)
        .filter(|id| !keep.contains(id))
        .collect();
    NodeChange { put_nodes: next, remove_nodes }
}

// ---------------------------------------------------------------------------
// TreeStore
// ---------------------------------------------------------------------------

struct Publishers {
    latest: watch::Sender<NodeList>,
    changes: broadcast::Sender<ChangeEvent>,
}

struct StoreInner {
    nodes: NodeList,
    revision: u64,
    publishers: Option<Publishers>,
}

/// The node-list container. Lifecycle: `new → subscribe → apply* → close`.
pub struct TreeStore {
    inner: Mutex<StoreInner>,
}

impl TreeStore {
    pub fn new(initial: Vec<ChatNode>) -> Self {
        let nodes: NodeList = Arc::new(initial);
        let (latest, _) = watch::channel(nodes.clone());
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAP);
        TreeStore {
            inner: Mutex::new(StoreInner {
                nodes,
                revision: 0,
                publishers: Some(Publishers { latest, changes }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The current node list.
    pub fn snapshot(&self) -> NodeList {
        self.lock().nodes.clone()
    }

    /// Number of changes applied so far.
    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    pub fn get(&self, id: NodeId) -> Option<ChatNode> {
        self.lock().nodes.iter().find(|n| n.id == id).cloned()
    }

    /// Latest-value channel of the node list. Ends when the store closes.
    pub fn subscribe(&self) -> watch::Receiver<NodeList> {
        let inner = self.lock();
        match &inner.publishers {
            Some(p) => p.latest.subscribe(),
            None => watch::channel(inner.nodes.clone()).1,
        }
    }

    /// Feed of every applied change. Ends when the store closes.
    pub fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        let inner = self.lock();
        match &inner.publishers {
            Some(p) => p.changes.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().publishers.is_none()
    }

    /// Tear the store down. Subscribers observe end-of-stream; further
    /// changes fail with [`TreeError::StoreClosed`].
    pub fn close(&self) {
        if self.lock().publishers.take().is_some() {
            debug!("tree store closed");
        }
    }

    pub fn apply_change(&self, change: NodeChange) -> Result<NodeList, TreeError> {
        let mut inner = self.lock();
        Self::commit(&mut inner, change)
    }

    /// Express an edit as a list transformation; the store diffs it into a
    /// [`NodeChange`] and applies that.
    pub fn set_nodes(
        &self,
        update: impl FnOnce(&[ChatNode]) -> Vec<ChatNode>,
    ) -> Result<NodeList, TreeError> {
        let mut inner = self.lock();
        let next = update(&inner.nodes);
        let change = diff_nodes(&inner.nodes, next);
        Self::commit(&mut inner, change)
    }

    /// Compute a change from the current list and apply it atomically.
    /// Nothing is applied if `build` fails.
    pub fn transact<R, E>(
        &self,
        build: impl FnOnce(&[ChatNode]) -> Result<(NodeChange, R), E>,
    ) -> Result<R, E>
    where
        E: From<TreeError>,
    {
        let mut inner = self.lock();
        if inner.publishers.is_none() {
            return Err(TreeError::StoreClosed.into());
        }
        let (change, out) = build(&inner.nodes)?;
        if !change.is_empty() {
            Self::commit(&mut inner, change)?;
        }
        Ok(out)
    }

    /// Modify one node atomically. Fails with `UnknownNode` if absent.
    pub fn update_node<R>(
        &self,
        id: NodeId,
        edit: impl FnOnce(&mut ChatNode) -> Result<R, TreeError>,
    ) -> Result<R, TreeError> {
        self.transact(|nodes| {
            let mut node = nodes
                .iter()
                .find(|n| n.id == id)
                .cloned()
                .ok_or(TreeError::UnknownNode(id))?;
            let out = edit(&mut node)?;
            Ok((NodeChange::put(vec![node]), out))
        })
    }

    fn commit(inner: &mut StoreInner, change: NodeChange) -> Result<NodeList, TreeError> {
        if inner.publishers.is_none() {
            return Err(TreeError::StoreClosed);
        }
        let nodes: NodeList = Arc::new(apply_change_to(&inner.nodes, &change));
        inner.nodes = nodes.clone();
        inner.revision += 1;
        debug!(
            revision = inner.revision,
            put = change.put_nodes.len(),
            removed = change.remove_nodes.len(),
            total = nodes.len(),
            "published tree change"
        );
        if let Some(publishers) = &inner.publishers {
            publishers.latest.send_replace(nodes.clone());
            let _ = publishers.changes.send(ChangeEvent {
                revision: inner.revision,
                change: Arc::new(change),
                nodes: nodes.clone(),
            });
        }
        Ok(nodes)
    }
}

impl std::fmt::Debug for TreeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("TreeStore")
            .field("revision", &inner.revision)
            .field("nodes", &inner.nodes.len())
            .field("closed", &inner.publishers.is_none())
            .finish()
    }
}
