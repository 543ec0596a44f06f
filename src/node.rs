//! Conversation tree data model: node ids, roles, nodes and their
//! out-of-band metadata.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::abort::AbortHandle;
use crate::attachment::Attachment;
use crate::writer::LiveBuffer;

// ---------------------------------------------------------------------------
// Identifiers and roles
// ---------------------------------------------------------------------------

/// Opaque node identifier, stable for the node's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        NodeId(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        NodeId(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Token and timing statistics shown next to a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TokenStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_input_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_output_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_per_second: Option<f64>,
}

/// Observable holder for a node's [`TokenStats`].
///
/// Every clone of a node shares the same cell, so instrumentation can update
/// statistics without issuing a structural change.
#[derive(Clone)]
pub struct MetadataCell(Arc<watch::Sender<TokenStats>>);

impl MetadataCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(TokenStats::default());
        MetadataCell(Arc::new(tx))
    }

    /// Latest statistics.
    pub fn get(&self) -> TokenStats {
        self.0.borrow().clone()
    }

    /// Receiver notified on every update.
    pub fn subscribe(&self) -> watch::Receiver<TokenStats> {
        self.0.subscribe()
    }

    pub fn update(&self, f: impl FnOnce(&mut TokenStats)) {
        self.0.send_modify(f);
    }
}

impl Default for MetadataCell {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MetadataCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MetadataCell").field(&*self.0.borrow()).finish()
    }
}

/// Memoized preview: `value` was compiled from the content string `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewCache {
    pub key: String,
    pub value: String,
}

// ---------------------------------------------------------------------------
// ChatNode
// ---------------------------------------------------------------------------

/// One message in the conversation tree.
///
/// Nodes are values: the store replaces them wholesale through structural
/// changes. The live buffer, abort handle and metadata cell are shared
/// references, so clones held by older snapshots observe the same stream.
#[derive(Debug, Clone)]
pub struct ChatNode {
    pub id: NodeId,
    pub role: Role,
    /// Durable text. Stale while `live` is present.
    pub content: String,
    pub live: Option<Arc<LiveBuffer>>,
    pub child_ids: Vec<NodeId>,
    pub attachments: Vec<Attachment>,
    pub abort: Option<AbortHandle>,
    pub error_message: Option<String>,
    pub is_view_source: bool,
    pub is_collapsed: bool,
    pub cached_preview_html: Option<PreviewCache>,
    pub metadata: MetadataCell,
    /// Explicit sort key; the store re-sorts by it when any node has one.
    pub order: Option<i64>,
}

impl ChatNode {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self::with_id(NodeId::new(), role, content)
    }

    pub fn with_id(id: NodeId, role: Role, content: impl Into<String>) -> Self {
        ChatNode {
            id,
            role,
            content: content.into(),
            live: None,
            child_ids: Vec::new(),
            attachments: Vec::new(),
            abort: None,
            error_message: None,
            is_view_source: false,
            is_collapsed: false,
            cached_preview_html: None,
            metadata: MetadataCell::new(),
            order: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.child_ids.is_empty()
    }

    pub fn is_streaming(&self) -> bool {
        self.live.is_some()
    }

    /// Text to render: the live snapshot while streaming, else `content`.
    pub fn display_text(&self) -> String {
        match &self.live {
            Some(buffer) => buffer.latest().snapshot,
            None => self.content.clone(),
        }
    }

    pub fn attachment(&self, id: &str) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.id() == id)
    }

    /// Insert `attachment`, replacing any existing entry with the same
    /// `(kind, file name)` key or the same id.
    pub fn upsert_attachment(&mut self, attachment: Attachment) {
        let key = attachment.key();
        let id = attachment.id().to_string();
        self.attachments
            .retain(|existing| existing.key() != key && existing.id() != id);
        self.attachments.push(attachment);
    }

    pub fn remove_attachment(&mut self, id: &str) -> Option<Attachment> {
        let pos = self.attachments.iter().position(|a| a.id() == id)?;
        Some(self.attachments.remove(pos))
    }
}
