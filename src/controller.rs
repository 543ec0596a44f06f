//! # Conversation Controller
//!
//! ## Responsibility
//! Maps user intents (submit, abort, delete, trim, edit, attachment changes)
//! onto tree-store changes and writer lifecycles.
//!
//! ## Invariants maintained
//! - The tree is never empty and has exactly one root
//! - A parent that loses its last child gets a fresh empty user node
//! - A user node holds at most one abort handle; it targets the assistant
//!   node receiving the generation
//! - Aborting keeps whatever text already streamed
//!
//! ## Per-node generation states
//! `Idle → Streaming → Idle` on completion, `Streaming → Errored` on a
//! provider failure, `Streaming → Aborted` when the user cancels. Errored and
//! aborted nodes return to `Idle` on the next edit or submit.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tracing::{info, warn};

use crate::abort::{AbortHandle, CancelSignal};
use crate::attachment::Attachment;
use crate::codec::{self, SkippedAttachment};
use crate::config::Config;
use crate::error::{AttachmentError, CodecError, DraftError, TreeError};
use crate::node::{ChatNode, NodeId, Role};
use crate::persistence::DocumentStore;
use crate::providers::{ChatMessage, ChatOptions, ChatProvider};
use crate::store::{NodeChange, NodeList, TreeStore};
use crate::tokens::{TokenEstimator, WordPieceEstimator};
use crate::writer::{LiveBuffer, NodeWriter};

// ---------------------------------------------------------------------------
// Tree helpers
// ---------------------------------------------------------------------------

pub fn find(nodes: &[ChatNode], id: NodeId) -> Option<&ChatNode> {
    nodes.iter().find(|n| n.id == id)
}

pub fn parent_of(nodes: &[ChatNode], id: NodeId) -> Option<&ChatNode> {
    nodes.iter().find(|n| n.child_ids.contains(&id))
}

/// The node no other node lists as a child.
pub fn root_of(nodes: &[ChatNode]) -> Option<&ChatNode> {
    let children: HashSet<NodeId> = nodes.iter().flat_map(|n| n.child_ids.iter().copied()).collect();
    nodes.iter().find(|n| !children.contains(&n.id))
}

/// `id` and every node reachable below it, parents before children.
pub fn collect_subtree(nodes: &[ChatNode], id: NodeId) -> Vec<NodeId> {
    let index: HashMap<NodeId, &ChatNode> = nodes.iter().map(|n| (n.id, n)).collect();
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut stack = vec![id];
    while let Some(next) = stack.pop() {
        if !seen.insert(next) {
            continue;
        }
        out.push(next);
        if let Some(node) = index.get(&next) {
            stack.extend(node.child_ids.iter().rev().copied());
        }
    }
    out
}

/// Path from the root down to `id`, inclusive.
pub fn ancestor_chain(nodes: &[ChatNode], id: NodeId) -> Result<Vec<ChatNode>, TreeError> {
    let index: HashMap<NodeId, &ChatNode> = nodes.iter().map(|n| (n.id, n)).collect();
    let parents: HashMap<NodeId, NodeId> = nodes
        .iter()
        .flat_map(|p| p.child_ids.iter().map(move |c| (*c, p.id)))
        .collect();

    let mut chain = Vec::new();
    let mut cursor = Some(id);
    while let Some(current) = cursor {
        let node = index.get(&current).ok_or(TreeError::UnknownNode(current))?;
        chain.push((*node).clone());
        if chain.len() > nodes.len() {
            break;
        }
        cursor = parents.get(&current).copied();
    }
    chain.reverse();
    Ok(chain)
}

/// Root-to-leaf path following the most recent child at every step.
pub fn latest_path(nodes: &[ChatNode]) -> Vec<ChatNode> {
    let mut path = Vec::new();
    let mut cursor = root_of(nodes);
    while let Some(node) = cursor {
        if path.len() >= nodes.len() {
            break;
        }
        path.push(node.clone());
        cursor = node.child_ids.last().and_then(|c| find(nodes, *c));
    }
    path
}

/// Two-node starting state: a system node with one empty user child.
pub fn initial_nodes(system_prompt: &str) -> Vec<ChatNode> {
    let mut system = ChatNode::new(Role::System, system_prompt);
    let user = ChatNode::new(Role::User, "");
    system.child_ids.push(user.id);
    vec![system, user]
}

/// Result of detaching some children of `parent`.
struct Cut {
    parent: ChatNode,
    removed: Vec<NodeId>,
    cancelled: Vec<AbortHandle>,
}

fn cut_children(nodes: &[ChatNode], parent: &ChatNode, children: &[NodeId]) -> Cut {
    let mut removed = Vec::new();
    for child in children {
        removed.extend(collect_subtree(nodes, *child));
    }
    let removed_set: HashSet<NodeId> = removed.iter().copied().collect();
    let mut cancelled: Vec<AbortHandle> = nodes
        .iter()
        .filter(|n| removed_set.contains(&n.id))
        .filter_map(|n| n.abort.clone())
        .collect();

    let mut parent = parent.clone();
    parent.child_ids.retain(|c| !children.contains(c));
    if parent
        .abort
        .as_ref()
        .is_some_and(|h| removed_set.contains(&h.target()))
    {
        cancelled.extend(parent.abort.take());
    }
    Cut { parent, removed, cancelled }
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubmitOptions {
    /// Keep existing children of the submitting node and add the new
    /// assistant reply as a sibling branch.
    pub keep_history: bool,
}

/// How a generation ended. `text` is the assistant node's final content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Completed { text: String },
    Aborted { text: String },
    Failed { text: String, message: String },
}

impl GenerationOutcome {
    pub fn text(&self) -> &str {
        match self {
            GenerationOutcome::Completed { text }
            | GenerationOutcome::Aborted { text }
            | GenerationOutcome::Failed { text, .. } => text,
        }
    }
}

/// A prepared generation: the assistant node exists, its writer is open and
/// the abort handle is installed. Call [`Generation::run`] to stream.
pub struct Generation {
    conversation: Conversation,
    user_id: NodeId,
    handle: AbortHandle,
    signal: CancelSignal,
    messages: Vec<ChatMessage>,
    writer: NodeWriter,
}

impl Generation {
    pub fn user_id(&self) -> NodeId {
        self.user_id
    }

    pub fn assistant_id(&self) -> NodeId {
        self.writer.node_id()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.handle.clone()
    }

    /// Live buffer of the assistant node, for previews.
    pub fn live_buffer(&self) -> Arc<LiveBuffer> {
        self.writer.buffer()
    }

    /// Messages sent as the prompt.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Stream the provider's deltas into the assistant node until the
    /// stream ends, fails, or is aborted.
    pub async fn run(self) -> GenerationOutcome {
        let Generation { conversation, user_id, handle, signal, messages, mut writer } = self;
        let assistant_id = writer.node_id();
        let started = Instant::now();
        info!(user = %user_id, assistant = %assistant_id, provider = conversation.provider.name(), "generation started");

        let mut stream = conversation
            .provider
            .stream_chat(messages, &conversation.options, signal.clone());
        let mut failure: Option<String> = None;
        loop {
            let next = tokio::select! {
                biased;
                _ = signal.cancelled() => break,
                item = stream.next() => item,
            };
            match next {
                Some(Ok(delta)) => writer.write(&delta),
                Some(Err(e)) => {
                    failure = Some(e.to_string());
                    break;
                }
                None => break,
            }
        }
        drop(stream);
        let text = writer.close();

        if let Some(node) = conversation.store.get(assistant_id) {
            let output_tokens = conversation.estimator.estimate(&text);
            let secs = started.elapsed().as_secs_f64();
            node.metadata.update(|stats| {
                stats.total_output_tokens = output_tokens;
                stats.tokens_per_second = output_tokens
                    .filter(|_| secs > 0.0)
                    .map(|n| n as f64 / secs);
            });
        }

        let outcome = if signal.is_cancelled() {
            info!(assistant = %assistant_id, len = text.len(), "generation aborted");
            GenerationOutcome::Aborted { text }
        } else if let Some(message) = failure {
            warn!(assistant = %assistant_id, error = %message, "generation failed");
            GenerationOutcome::Failed { text, message }
        } else {
            info!(assistant = %assistant_id, len = text.len(), "generation completed");
            GenerationOutcome::Completed { text }
        };

        let finished = conversation.store.transact(|nodes| {
            let mut puts = Vec::new();
            if let Some(user) = find(nodes, user_id) {
                if user.abort.as_ref().is_some_and(|h| h.same_generation(&handle)) {
                    let mut user = user.clone();
                    user.abort = None;
                    puts.push(user);
                }
            }
            if let Some(assistant) = find(nodes, assistant_id) {
                match &outcome {
                    GenerationOutcome::Completed { .. } => {
                        let next_user = ChatNode::new(Role::User, "");
                        let mut assistant = assistant.clone();
                        assistant.child_ids.push(next_user.id);
                        puts.push(assistant);
                        puts.push(next_user);
                    }
                    GenerationOutcome::Failed { message, .. } => {
                        let mut assistant = assistant.clone();
                        assistant.error_message = Some(message.clone());
                        puts.push(assistant);
                    }
                    GenerationOutcome::Aborted { .. } => {}
                }
            }
            Ok::<_, TreeError>((NodeChange::put(puts), ()))
        });
        if let Err(e) = finished {
            warn!(assistant = %assistant_id, error = %e, "could not record generation result");
        }
        outcome
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A branching conversation bound to one tree store and one chat provider.
#[derive(Clone)]
pub struct Conversation {
    store: Arc<TreeStore>,
    provider: Arc<dyn ChatProvider>,
    estimator: Arc<dyn TokenEstimator>,
    options: ChatOptions,
    system_prompt: String,
    attachments_dir: PathBuf,
}

impl Conversation {
    /// Start from the two-node initial state with an empty system prompt.
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Conversation {
            store: Arc::new(TreeStore::new(initial_nodes(""))),
            provider,
            estimator: Arc::new(WordPieceEstimator::default()),
            options: ChatOptions::default(),
            system_prompt: String::new(),
            attachments_dir: Config::default().attachments_dir,
        }
    }

    pub fn from_config(provider: Arc<dyn ChatProvider>, config: &Config) -> Self {
        Conversation {
            store: Arc::new(TreeStore::new(initial_nodes(&config.system_prompt))),
            provider,
            estimator: Arc::new(WordPieceEstimator::default()),
            options: config.chat_options(),
            system_prompt: config.system_prompt.clone(),
            attachments_dir: config.attachments_dir.clone(),
        }
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_attachments_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.attachments_dir = dir.into();
        self
    }

    pub fn store(&self) -> &Arc<TreeStore> {
        &self.store
    }

    pub fn nodes(&self) -> NodeList {
        self.store.snapshot()
    }

    pub fn node(&self, id: NodeId) -> Option<ChatNode> {
        self.store.get(id)
    }

    pub fn root(&self) -> Option<ChatNode> {
        root_of(&self.store.snapshot()).cloned()
    }

    /// Messages from the root down to `id`.
    pub fn history(&self, id: NodeId) -> Result<Vec<ChatNode>, TreeError> {
        ancestor_chain(&self.store.snapshot(), id)
    }

    /// Root-to-leaf path along the most recent branch.
    pub fn transcript(&self) -> Vec<ChatNode> {
        latest_path(&self.store.snapshot())
    }

    /// Cancel every in-flight generation and close the store.
    pub fn teardown(&self) {
        for node in self.store.snapshot().iter() {
            if let Some(handle) = &node.abort {
                handle.abort();
            }
        }
        self.store.close();
    }

    // -- Editing ---------------------------------------------------------------

    /// Replace a node's text. Clears a previous error.
    pub fn set_content(&self, id: NodeId, content: impl Into<String>) -> Result<(), TreeError> {
        let content = content.into();
        self.store.update_node(id, |node| {
            if node.is_streaming() {
                return Err(TreeError::AlreadyWriting(id));
            }
            node.content = content;
            node.error_message = None;
            Ok(())
        })
    }

    pub fn set_view_source(&self, id: NodeId, on: bool) -> Result<(), TreeError> {
        self.store.update_node(id, |node| {
            node.is_view_source = on;
            Ok(())
        })
    }

    pub fn set_collapsed(&self, id: NodeId, on: bool) -> Result<(), TreeError> {
        self.store.update_node(id, |node| {
            node.is_collapsed = on;
            Ok(())
        })
    }

    /// Swap a node between user and assistant. System nodes cannot change.
    pub fn toggle_role(&self, id: NodeId) -> Result<Role, TreeError> {
        self.store.update_node(id, |node| {
            node.role = match node.role {
                Role::User => Role::Assistant,
                Role::Assistant => Role::User,
                Role::System => return Err(TreeError::InvalidRole { id, role: Role::System }),
            };
            Ok(node.role)
        })
    }

    // -- Generation --------------------------------------------------------------

    /// Create the assistant reply under `user_id`, install its abort handle
    /// and open its writer. Without `keep_history`, existing children of the
    /// user node are removed first.
    pub fn start_submit(&self, user_id: NodeId, opts: SubmitOptions) -> Result<Generation, TreeError> {
        let (assistant_id, handle, signal, messages, cancelled) = self.store.transact::<_, TreeError>(|nodes| {
            let user = find(nodes, user_id).ok_or(TreeError::UnknownNode(user_id))?;
            if user.role != Role::User {
                return Err(TreeError::InvalidRole { id: user_id, role: user.role });
            }
            if user.abort.is_some() {
                return Err(TreeError::Busy(user_id));
            }

            let messages: Vec<ChatMessage> = ancestor_chain(nodes, user_id)?
                .into_iter()
                .map(|n| ChatMessage {
                    role: n.role,
                    content: n.display_text(),
                    attachments: n.attachments,
                })
                .collect();

            let assistant = ChatNode::new(Role::Assistant, "");
            let (handle, signal) = AbortHandle::new(assistant.id);

            let (mut user, removed, cancelled) = if opts.keep_history {
                (user.clone(), Vec::new(), Vec::new())
            } else {
                let children = user.child_ids.clone();
                let cut = cut_children(nodes, user, &children);
                (cut.parent, cut.removed, cut.cancelled)
            };
            user.error_message = None;
            user.abort = Some(handle.clone());
            user.child_ids.push(assistant.id);

            let change = NodeChange { put_nodes: vec![user, assistant.clone()], remove_nodes: removed };
            Ok((change, (assistant.id, handle, signal, messages, cancelled)))
        })?;

        for h in cancelled {
            h.abort();
        }

        let writer = NodeWriter::open(&self.store, assistant_id)?;
        let prompt: String = messages.iter().map(ChatMessage::text_with_attachments).collect::<Vec<_>>().join("\n");
        let input_tokens = self.estimator.estimate(&prompt);
        if let Some(node) = self.store.get(assistant_id) {
            node.metadata.update(|stats| stats.total_input_tokens = input_tokens);
        }

        Ok(Generation {
            conversation: self.clone(),
            user_id,
            handle,
            signal,
            messages,
            writer,
        })
    }

    /// User node a new prompt should be written into.
    ///
    /// With `branch`, this is the last user node on the transcript that
    /// already has a reply, so a keep-history submit from it adds a sibling.
    /// Otherwise it is the transcript leaf. A leaf that is not a user node
    /// (an aborted or failed reply) gets a fresh empty user child first.
    pub fn prompt_target(&self, branch: bool) -> Result<NodeId, TreeError> {
        self.store.transact::<_, TreeError>(|nodes| {
            let path = latest_path(nodes);
            if branch {
                if let Some(user) = path.iter().rev().find(|n| n.role == Role::User && !n.is_leaf()) {
                    return Ok((NodeChange::default(), user.id));
                }
            }
            let leaf = path.last().ok_or(TreeError::EmptyTree)?;
            if leaf.role == Role::User {
                return Ok((NodeChange::default(), leaf.id));
            }
            let user = ChatNode::new(Role::User, "");
            let mut parent = leaf.clone();
            parent.child_ids.push(user.id);
            let id = user.id;
            Ok((NodeChange::put(vec![parent, user]), id))
        })
    }

    /// Submit from `user_id` and stream the reply to completion.
    ///
    /// Provider failures do not surface as `Err`: they are recorded on the
    /// assistant node and reported as [`GenerationOutcome::Failed`].
    pub async fn submit(&self, user_id: NodeId, opts: SubmitOptions) -> Result<GenerationOutcome, TreeError> {
        Ok(self.start_submit(user_id, opts)?.run().await)
    }

    /// Like [`submit`](Self::submit) but runs the stream on a spawned task.
    pub fn spawn_submit(
        &self,
        user_id: NodeId,
        opts: SubmitOptions,
    ) -> Result<(NodeId, tokio::task::JoinHandle<GenerationOutcome>), TreeError> {
        let generation = self.start_submit(user_id, opts)?;
        let assistant_id = generation.assistant_id();
        Ok((assistant_id, tokio::spawn(generation.run())))
    }

    /// Cancel the generation held by `id`, or targeting `id` from its
    /// parent. Returns whether anything was aborted; aborting twice is a
    /// no-op.
    pub fn abort(&self, id: NodeId) -> Result<bool, TreeError> {
        let handle = self.store.transact::<_, TreeError>(|nodes| {
            let node = find(nodes, id).ok_or(TreeError::UnknownNode(id))?;
            let holder = if node.abort.is_some() {
                Some(node)
            } else {
                parent_of(nodes, id).filter(|p| p.abort.as_ref().is_some_and(|h| h.target() == id))
            };
            let Some(holder) = holder else {
                return Ok((NodeChange::default(), None));
            };
            let mut holder = holder.clone();
            let handle = holder.abort.take();
            if let Some(h) = &handle {
                h.abort();
            }
            Ok((NodeChange::put(vec![holder]), handle))
        })?;

        match handle {
            Some(h) => {
                info!(target_node = %h.target(), "generation abort requested");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // -- Structure ---------------------------------------------------------------

    /// Remove `id` and everything below it. A parent left without children
    /// gets a fresh empty user node; deleting the root resets the tree.
    pub fn delete(&self, id: NodeId) -> Result<(), TreeError> {
        let system_prompt = self.system_prompt.clone();
        let cancelled = self.store.transact::<_, TreeError>(|nodes| {
            find(nodes, id).ok_or(TreeError::UnknownNode(id))?;
            match parent_of(nodes, id) {
                None => {
                    let cancelled: Vec<AbortHandle> = nodes.iter().filter_map(|n| n.abort.clone()).collect();
                    let change = NodeChange {
                        put_nodes: initial_nodes(&system_prompt),
                        remove_nodes: nodes.iter().map(|n| n.id).collect(),
                    };
                    Ok((change, cancelled))
                }
                Some(parent) => {
                    let cut = cut_children(nodes, parent, &[id]);
                    let mut parent = cut.parent;
                    let mut puts = Vec::new();
                    if parent.child_ids.is_empty() {
                        let fresh = ChatNode::new(Role::User, "");
                        parent.child_ids.push(fresh.id);
                        puts.push(parent);
                        puts.push(fresh);
                    } else {
                        puts.push(parent);
                    }
                    let change = NodeChange { put_nodes: puts, remove_nodes: cut.removed };
                    Ok((change, cut.cancelled))
                }
            }
        })?;
        for h in cancelled {
            h.abort();
        }
        Ok(())
    }

    /// Remove every descendant of `id`, keeping `id` itself. If it had
    /// children, a fresh empty user node takes their place.
    pub fn trim(&self, id: NodeId) -> Result<(), TreeError> {
        let cancelled = self.store.transact::<_, TreeError>(|nodes| {
            let node = find(nodes, id).ok_or(TreeError::UnknownNode(id))?;
            if node.is_leaf() {
                return Ok((NodeChange::default(), Vec::new()));
            }
            let children = node.child_ids.clone();
            let cut = cut_children(nodes, node, &children);
            let mut node = cut.parent;
            let fresh = ChatNode::new(Role::User, "");
            node.child_ids.push(fresh.id);
            let change = NodeChange { put_nodes: vec![node, fresh], remove_nodes: cut.removed };
            Ok((change, cut.cancelled))
        })?;
        for h in cancelled {
            h.abort();
        }
        Ok(())
    }

    // -- Attachments -------------------------------------------------------------

    /// Add `attachment`, replacing one with the same `(kind, file name)`.
    pub fn upsert_attachment(&self, id: NodeId, attachment: Attachment) -> Result<(), TreeError> {
        self.store.update_node(id, |node| {
            node.upsert_attachment(attachment);
            Ok(())
        })
    }

    pub fn remove_attachment(&self, id: NodeId, attachment_id: &str) -> Result<Option<Attachment>, TreeError> {
        self.store.update_node(id, |node| Ok(node.remove_attachment(attachment_id)))
    }

    /// Convert one attachment between inline and external form.
    ///
    /// File I/O happens outside the store; the node stays editable meanwhile.
    /// A failure is also recorded as the node's `error_message`.
    pub async fn toggle_attachment(&self, id: NodeId, attachment_id: &str) -> Result<Attachment, AttachmentError> {
        let node = self.store.get(id).ok_or(TreeError::UnknownNode(id))?;
        let current = node
            .attachment(attachment_id)
            .cloned()
            .ok_or_else(|| AttachmentError::NotFound(attachment_id.to_string()))?;

        let converted = match current.toggled(&self.attachments_dir).await {
            Ok(converted) => converted,
            Err(e) => {
                warn!(node = %id, attachment = attachment_id, error = %e, "attachment conversion failed");
                let message = format!("{}: {}", current.file_name(), e);
                if let Err(record) = self.store.update_node(id, |node| {
                    node.error_message = Some(message);
                    Ok(())
                }) {
                    warn!(node = %id, error = %record, "could not record attachment error");
                }
                return Err(e);
            }
        };

        let replaced = self.store.update_node(id, |node| {
            if node.remove_attachment(attachment_id).is_none() {
                return Ok(false);
            }
            node.upsert_attachment(converted.clone());
            Ok(true)
        })?;
        if replaced {
            Ok(converted)
        } else {
            Err(AttachmentError::NotFound(attachment_id.to_string()))
        }
    }

    /// Toggle several attachments; each succeeds or fails on its own.
    pub async fn toggle_attachments(
        &self,
        id: NodeId,
        attachment_ids: &[String],
    ) -> Vec<Result<Attachment, AttachmentError>> {
        let mut results = Vec::with_capacity(attachment_ids.len());
        for attachment_id in attachment_ids {
            results.push(self.toggle_attachment(id, attachment_id).await);
        }
        results
    }

    // -- Save / load -------------------------------------------------------------

    /// Encode the current transcript into a document string.
    pub async fn export(&self) -> Result<codec::Encoded, CodecError> {
        codec::encode(&self.transcript()).await
    }

    /// Replace the tree with a decoded document. The current root and first
    /// user node keep their ids. On error the tree is left untouched.
    pub fn import(&self, text: &str) -> Result<(), DraftError> {
        let scaffold: Vec<NodeId> = self.transcript().iter().take(2).map(|n| n.id).collect();
        let decoded = codec::decode(text, &scaffold).inspect_err(|e| {
            warn!(error = %e, "document rejected");
        })?;
        let previous = self.store.snapshot();
        self.store.set_nodes(|_| decoded)?;
        for node in previous.iter() {
            if let Some(handle) = &node.abort {
                handle.abort();
            }
        }
        info!(nodes = self.store.snapshot().len(), "document imported");
        Ok(())
    }

    /// Save the transcript under `key`. Returns attachments that could not
    /// be embedded.
    pub async fn save(&self, docs: &dyn DocumentStore, key: &str) -> Result<Vec<SkippedAttachment>, DraftError> {
        let encoded = self.export().await?;
        docs.set(key, &encoded.text)?;
        info!(key, skipped = encoded.skipped.len(), "draft saved");
        Ok(encoded.skipped)
    }

    pub fn load(&self, docs: &dyn DocumentStore, key: &str) -> Result<(), DraftError> {
        let text = docs.get(key)?.ok_or_else(|| DraftError::NotFound(key.to_string()))?;
        self.import(&text)
    }
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("store", &self.store)
            .field("provider", &self.provider.name())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
