//! End-to-end tests of the conversation controller against a scripted provider.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use proptest::prelude::*;

use branch_chat::abort::CancelSignal;
use branch_chat::controller::{Conversation, GenerationOutcome, SubmitOptions};
use branch_chat::error::{AttachmentError, DraftError, ProviderError, TreeError};
use branch_chat::persistence::{DocumentStore, MemoryDocumentStore};
use branch_chat::providers::{ChatMessage, ChatOptions, ChatProvider, TextStream};
use branch_chat::{Attachment, AttachmentKind, ChatNode, NodeId, Role};

// ---------------------------------------------------------------------------
// Scripted provider
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Scripted {
    deltas: Vec<&'static str>,
    fail: Option<&'static str>,
    /// Stay open after the last delta until cancelled.
    hang: bool,
    delay: Duration,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl Scripted {
    fn replying(deltas: &[&'static str]) -> Self {
        Scripted { deltas: deltas.to_vec(), ..Default::default() }
    }

    fn hanging(deltas: &[&'static str]) -> Self {
        Scripted { deltas: deltas.to_vec(), hang: true, ..Default::default() }
    }

    fn last_prompt(&self) -> Vec<ChatMessage> {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

impl ChatProvider for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn stream_chat(&self, messages: Vec<ChatMessage>, _options: &ChatOptions, _cancel: CancelSignal) -> TextStream {
        self.prompts.lock().unwrap().push(messages);
        let mut items: Vec<Result<String, ProviderError>> =
            self.deltas.iter().map(|d| Ok(d.to_string())).collect();
        if let Some(msg) = self.fail {
            items.push(Err(ProviderError::Stream(msg.to_string())));
        }
        let delay = self.delay;
        let scripted = stream::iter(items).then(move |item| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            item
        });
        if self.hang {
            Box::pin(scripted.chain(stream::pending()))
        } else {
            Box::pin(scripted)
        }
    }
}

fn conversation(provider: Scripted) -> (Conversation, Arc<Scripted>) {
    let provider = Arc::new(provider);
    (Conversation::new(provider.clone()), provider)
}

fn first_user(conv: &Conversation) -> NodeId {
    conv.transcript()[1].id
}

fn roles(nodes: &[ChatNode]) -> Vec<Role> {
    nodes.iter().map(|n| n.role).collect()
}

async fn wait_for_text(conv: &Conversation, id: NodeId, text: &str) {
    for _ in 0..200 {
        if conv.node(id).map(|n| n.display_text()).as_deref() == Some(text) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("node {id} never showed {text:?}");
}

/// Single root, every child exists, no node has two parents, all reachable.
fn assert_well_formed(nodes: &[ChatNode]) {
    assert!(!nodes.is_empty(), "tree must never be empty");
    let ids: HashSet<NodeId> = nodes.iter().map(|n| n.id).collect();
    assert_eq!(ids.len(), nodes.len(), "duplicate node ids");

    let mut parent_count: HashMap<NodeId, usize> = HashMap::new();
    for node in nodes {
        for child in &node.child_ids {
            assert!(ids.contains(child), "dangling child {child}");
            *parent_count.entry(*child).or_default() += 1;
        }
    }
    assert!(parent_count.values().all(|c| *c == 1), "node with two parents");

    let roots: Vec<&ChatNode> = nodes.iter().filter(|n| !parent_count.contains_key(&n.id)).collect();
    assert_eq!(roots.len(), 1, "expected exactly one root");
    assert_eq!(roots[0].role, Role::System);

    let index: HashMap<NodeId, &ChatNode> = nodes.iter().map(|n| (n.id, n)).collect();
    let mut seen = HashSet::new();
    let mut stack = vec![roots[0].id];
    while let Some(id) = stack.pop() {
        if seen.insert(id) {
            stack.extend(index[&id].child_ids.iter().copied());
        }
    }
    assert_eq!(seen.len(), nodes.len(), "unreachable nodes");
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_initial_state_is_system_plus_user() {
    let (conv, _) = conversation(Scripted::default());
    let nodes = conv.nodes();
    assert_eq!(roles(&nodes), vec![Role::System, Role::User]);
    assert_well_formed(&nodes);
}

#[tokio::test]
async fn test_submit_streams_reply_and_appends_fresh_user() {
    let (conv, _) = conversation(Scripted::replying(&["Hello", ", ", "world"]));
    let user = first_user(&conv);
    conv.set_content(user, "hi").unwrap();

    let outcome = conv.submit(user, SubmitOptions::default()).await.unwrap();
    assert_eq!(outcome, GenerationOutcome::Completed { text: "Hello, world".to_string() });

    let transcript = conv.transcript();
    assert_eq!(roles(&transcript), vec![Role::System, Role::User, Role::Assistant, Role::User]);
    let assistant = &transcript[2];
    assert_eq!(assistant.content, "Hello, world");
    assert!(!assistant.is_streaming());
    assert!(transcript[3].content.is_empty());
    assert!(transcript[1].abort.is_none());
    assert_well_formed(&conv.nodes());
}

#[tokio::test]
async fn test_prompt_is_the_ancestor_chain() {
    let (conv, provider) = conversation(Scripted::replying(&["ok"]));
    let user = first_user(&conv);
    let root = conv.root().unwrap().id;
    conv.set_content(root, "be brief").unwrap();
    conv.set_content(user, "first").unwrap();
    conv.submit(user, SubmitOptions::default()).await.unwrap();

    let next = conv.transcript()[3].id;
    conv.set_content(next, "second").unwrap();
    conv.submit(next, SubmitOptions::default()).await.unwrap();

    let prompt = provider.last_prompt();
    let got: Vec<(Role, &str)> = prompt.iter().map(|m| (m.role, m.content.as_str())).collect();
    assert_eq!(
        got,
        vec![
            (Role::System, "be brief"),
            (Role::User, "first"),
            (Role::Assistant, "ok"),
            (Role::User, "second"),
        ]
    );
}

#[tokio::test]
async fn test_token_stats_recorded() {
    let (conv, _) = conversation(Scripted::replying(&["some reply text"]));
    let user = first_user(&conv);
    conv.set_content(user, "count my tokens please").unwrap();
    conv.submit(user, SubmitOptions::default()).await.unwrap();

    let stats = conv.transcript()[2].metadata.get();
    assert!(stats.total_input_tokens.unwrap_or(0) > 0);
    assert!(stats.total_output_tokens.unwrap_or(0) > 0);
}

#[tokio::test]
async fn test_submit_from_assistant_is_invalid_role() {
    let (conv, _) = conversation(Scripted::replying(&["a"]));
    let user = first_user(&conv);
    conv.submit(user, SubmitOptions::default()).await.unwrap();
    let assistant = conv.transcript()[2].id;

    let err = conv.submit(assistant, SubmitOptions::default()).await.unwrap_err();
    assert_eq!(err, TreeError::InvalidRole { id: assistant, role: Role::Assistant });
}

#[tokio::test]
async fn test_second_submit_while_busy_is_rejected() {
    let (conv, _) = conversation(Scripted::hanging(&[]));
    let user = first_user(&conv);
    let generation = conv.start_submit(user, SubmitOptions::default()).unwrap();

    let err = conv.start_submit(user, SubmitOptions::default()).err();
    assert_eq!(err, Some(TreeError::Busy(user)));
    drop(generation);
}

#[tokio::test]
async fn test_resubmit_replaces_previous_reply() {
    let (conv, _) = conversation(Scripted::replying(&["answer"]));
    let user = first_user(&conv);
    conv.submit(user, SubmitOptions::default()).await.unwrap();
    let old = conv.transcript()[2].id;

    conv.submit(user, SubmitOptions::default()).await.unwrap();
    let node = conv.node(user).unwrap();
    assert_eq!(node.child_ids.len(), 1);
    assert_ne!(node.child_ids[0], old);
    assert!(conv.node(old).is_none());
    assert_well_formed(&conv.nodes());
}

#[tokio::test]
async fn test_keep_history_adds_sibling_branch() {
    let (conv, _) = conversation(Scripted::replying(&["answer"]));
    let user = first_user(&conv);
    conv.submit(user, SubmitOptions::default()).await.unwrap();
    let old = conv.transcript()[2].id;

    conv.submit(user, SubmitOptions { keep_history: true }).await.unwrap();
    let node = conv.node(user).unwrap();
    assert_eq!(node.child_ids.len(), 2);
    assert_eq!(node.child_ids[0], old);
    assert_eq!(conv.transcript()[2].id, node.child_ids[1]);
    assert_well_formed(&conv.nodes());
}

#[tokio::test]
async fn test_provider_failure_keeps_partial_text_and_records_error() {
    let (conv, _) = conversation(Scripted { deltas: vec!["half"], fail: Some("boom"), ..Default::default() });
    let user = first_user(&conv);

    let outcome = conv.submit(user, SubmitOptions::default()).await.unwrap();
    assert!(matches!(&outcome, GenerationOutcome::Failed { text, message } if text == "half" && message.contains("boom")));

    let assistant = conv.transcript()[2].clone();
    assert_eq!(assistant.content, "half");
    assert!(assistant.error_message.as_deref().is_some_and(|m| m.contains("boom")));
    assert!(assistant.is_leaf());
    assert!(conv.node(user).unwrap().abort.is_none());
}

#[tokio::test]
async fn test_editing_clears_error() {
    let (conv, _) = conversation(Scripted { fail: Some("boom"), ..Default::default() });
    let user = first_user(&conv);
    conv.submit(user, SubmitOptions::default()).await.unwrap();
    let assistant = conv.transcript()[2].id;

    conv.set_content(assistant, "fixed by hand").unwrap();
    assert!(conv.node(assistant).unwrap().error_message.is_none());
}

// ---------------------------------------------------------------------------
// Abort
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_abort_keeps_partial_content() {
    let (conv, _) = conversation(Scripted::hanging(&["partial"]));
    let user = first_user(&conv);
    let (assistant, task) = conv.spawn_submit(user, SubmitOptions::default()).unwrap();
    wait_for_text(&conv, assistant, "partial").await;

    assert!(conv.abort(user).unwrap());
    let outcome = task.await.unwrap();
    assert_eq!(outcome, GenerationOutcome::Aborted { text: "partial".to_string() });

    let node = conv.node(assistant).unwrap();
    assert_eq!(node.content, "partial");
    assert!(!node.is_streaming());
    assert!(node.is_leaf());
    assert!(conv.node(user).unwrap().abort.is_none());
}

#[tokio::test]
async fn test_abort_is_idempotent() {
    let (conv, _) = conversation(Scripted::hanging(&["x"]));
    let user = first_user(&conv);
    let (_, task) = conv.spawn_submit(user, SubmitOptions::default()).unwrap();

    assert!(conv.abort(user).unwrap());
    assert!(!conv.abort(user).unwrap());
    task.await.unwrap();
    assert!(!conv.abort(user).unwrap());
}

#[tokio::test]
async fn test_abort_by_assistant_id() {
    let (conv, _) = conversation(Scripted::hanging(&[]));
    let user = first_user(&conv);
    let (assistant, task) = conv.spawn_submit(user, SubmitOptions::default()).unwrap();

    assert!(conv.abort(assistant).unwrap());
    assert!(matches!(task.await.unwrap(), GenerationOutcome::Aborted { .. }));
}

#[tokio::test]
async fn test_abort_idle_node_is_noop() {
    let (conv, _) = conversation(Scripted::default());
    let user = first_user(&conv);
    let before = conv.store().revision();
    assert!(!conv.abort(user).unwrap());
    assert_eq!(conv.store().revision(), before);
}

#[tokio::test]
async fn test_submit_again_after_abort() {
    let (conv, _) = conversation(Scripted::hanging(&["x"]));
    let user = first_user(&conv);
    let (_, task) = conv.spawn_submit(user, SubmitOptions::default()).unwrap();
    conv.abort(user).unwrap();
    task.await.unwrap();

    let generation = conv.start_submit(user, SubmitOptions::default());
    assert!(generation.is_ok());
}

// ---------------------------------------------------------------------------
// Delete / trim
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_delete_only_child_creates_fresh_user() {
    let (conv, _) = conversation(Scripted::replying(&["reply"]));
    let user = first_user(&conv);
    conv.submit(user, SubmitOptions::default()).await.unwrap();
    let assistant = conv.transcript()[2].id;

    conv.delete(assistant).unwrap();
    let parent = conv.node(user).unwrap();
    assert_eq!(parent.child_ids.len(), 1);
    let fresh = conv.node(parent.child_ids[0]).unwrap();
    assert_eq!(fresh.role, Role::User);
    assert!(fresh.content.is_empty());
    assert_eq!(conv.nodes().len(), 4);
    assert_well_formed(&conv.nodes());
}

#[tokio::test]
async fn test_delete_one_of_two_siblings_adds_nothing() {
    let (conv, _) = conversation(Scripted::replying(&["reply"]));
    let user = first_user(&conv);
    conv.submit(user, SubmitOptions::default()).await.unwrap();
    conv.submit(user, SubmitOptions { keep_history: true }).await.unwrap();
    let children = conv.node(user).unwrap().child_ids;

    conv.delete(children[0]).unwrap();
    assert_eq!(conv.node(user).unwrap().child_ids, vec![children[1]]);
    assert_well_formed(&conv.nodes());
}

#[tokio::test]
async fn test_delete_root_resets_tree() {
    let (conv, _) = conversation(Scripted::replying(&["reply"]));
    let user = first_user(&conv);
    conv.submit(user, SubmitOptions::default()).await.unwrap();

    conv.delete(conv.root().unwrap().id).unwrap();
    assert_eq!(roles(&conv.nodes()), vec![Role::System, Role::User]);
    assert_well_formed(&conv.nodes());
}

#[tokio::test]
async fn test_delete_cancels_generation_into_removed_node() {
    let (conv, _) = conversation(Scripted::hanging(&["going"]));
    let user = first_user(&conv);
    let (assistant, task) = conv.spawn_submit(user, SubmitOptions::default()).unwrap();

    conv.delete(assistant).unwrap();
    assert!(matches!(task.await.unwrap(), GenerationOutcome::Aborted { .. }));
    assert!(conv.node(assistant).is_none());
    assert!(conv.node(user).unwrap().abort.is_none());
    assert_well_formed(&conv.nodes());
}

#[tokio::test]
async fn test_delete_unknown_node() {
    let (conv, _) = conversation(Scripted::default());
    let id = NodeId::new();
    assert_eq!(conv.delete(id).unwrap_err(), TreeError::UnknownNode(id));
}

#[tokio::test]
async fn test_trim_replaces_descendants_with_fresh_user() {
    let (conv, _) = conversation(Scripted::replying(&["r"]));
    let user = first_user(&conv);
    conv.submit(user, SubmitOptions::default()).await.unwrap();
    let next = conv.transcript()[3].id;
    conv.submit(next, SubmitOptions::default()).await.unwrap();
    assert_eq!(conv.nodes().len(), 6);

    conv.trim(user).unwrap();
    let nodes = conv.nodes();
    assert_eq!(nodes.len(), 3);
    let child = conv.node(conv.node(user).unwrap().child_ids[0]).unwrap();
    assert_eq!(child.role, Role::User);
    assert!(child.is_leaf());
    assert_well_formed(&nodes);
}

#[tokio::test]
async fn test_trim_leaf_is_noop() {
    let (conv, _) = conversation(Scripted::default());
    let user = first_user(&conv);
    let before = conv.store().revision();
    conv.trim(user).unwrap();
    assert_eq!(conv.store().revision(), before);
}

// ---------------------------------------------------------------------------
// Editing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_toggle_role_and_flags() {
    let (conv, _) = conversation(Scripted::default());
    let user = first_user(&conv);
    assert_eq!(conv.toggle_role(user).unwrap(), Role::Assistant);
    assert_eq!(conv.toggle_role(user).unwrap(), Role::User);

    let root = conv.root().unwrap().id;
    assert!(matches!(conv.toggle_role(root), Err(TreeError::InvalidRole { .. })));

    conv.set_view_source(user, true).unwrap();
    conv.set_collapsed(user, true).unwrap();
    let node = conv.node(user).unwrap();
    assert!(node.is_view_source && node.is_collapsed);
}

#[tokio::test]
async fn test_set_content_rejected_while_streaming() {
    let (conv, _) = conversation(Scripted::hanging(&[]));
    let user = first_user(&conv);
    let generation = conv.start_submit(user, SubmitOptions::default()).unwrap();
    let assistant = generation.assistant_id();

    assert_eq!(conv.set_content(assistant, "x"), Err(TreeError::AlreadyWriting(assistant)));
    drop(generation);
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_attachment_upsert_dedups_by_kind_and_name() {
    let (conv, _) = conversation(Scripted::default());
    let user = first_user(&conv);
    conv.upsert_attachment(user, Attachment::inline_from_bytes("a.txt", "text/plain", b"one")).unwrap();
    conv.upsert_attachment(user, Attachment::inline_from_bytes("a.txt", "text/plain", b"two")).unwrap();
    conv.upsert_attachment(user, Attachment::inline_from_bytes("b.txt", "text/plain", b"bee")).unwrap();

    let node = conv.node(user).unwrap();
    assert_eq!(node.attachments.len(), 2);
    let a = node.attachments.iter().find(|a| a.file_name() == "a.txt").unwrap();
    assert_eq!(a.inline_bytes().unwrap(), b"two");
}

#[tokio::test]
async fn test_attachments_reach_the_prompt() {
    let (conv, provider) = conversation(Scripted::replying(&["ok"]));
    let user = first_user(&conv);
    conv.upsert_attachment(user, Attachment::inline_from_bytes("notes.txt", "text/plain", b"remember")).unwrap();
    conv.submit(user, SubmitOptions::default()).await.unwrap();

    let prompt = provider.last_prompt();
    assert_eq!(prompt[1].attachments.len(), 1);
    assert!(prompt[1].text_with_attachments().contains("remember"));
}

#[tokio::test]
async fn test_toggle_attachment_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (conv, _) = conversation(Scripted::default());
    let conv = conv.with_attachments_dir(dir.path());
    let user = first_user(&conv);
    let inline = Attachment::inline_from_bytes("data.bin", "application/octet-stream", &[1, 2, 3]);
    let id = inline.id().to_string();
    conv.upsert_attachment(user, inline).unwrap();

    let external = conv.toggle_attachment(user, &id).await.unwrap();
    assert_eq!(external.kind(), AttachmentKind::External);
    assert_eq!(external.id(), id);
    assert_eq!(external.read_bytes().await.unwrap(), vec![1, 2, 3]);
    assert_eq!(conv.node(user).unwrap().attachments.len(), 1);

    let back = conv.toggle_attachment(user, &id).await.unwrap();
    assert_eq!(back.kind(), AttachmentKind::Inline);
    assert_eq!(back.inline_bytes().unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_toggle_missing_file_records_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gone.txt");
    std::fs::write(&path, b"soon gone").unwrap();
    let (conv, _) = conversation(Scripted::default());
    let user = first_user(&conv);
    let external = Attachment::external_from_path(&path).await.unwrap();
    let id = external.id().to_string();
    conv.upsert_attachment(user, external).unwrap();
    std::fs::remove_file(&path).unwrap();

    let err = conv.toggle_attachment(user, &id).await.unwrap_err();
    assert!(matches!(err, AttachmentError::Io { .. }));
    let node = conv.node(user).unwrap();
    assert!(node.error_message.is_some());
    assert_eq!(node.attachments.len(), 1);
}

#[tokio::test]
async fn test_toggle_failure_on_closed_store_still_reports_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gone.txt");
    std::fs::write(&path, b"soon gone").unwrap();
    let (conv, _) = conversation(Scripted::default());
    let user = first_user(&conv);
    let external = Attachment::external_from_path(&path).await.unwrap();
    let id = external.id().to_string();
    conv.upsert_attachment(user, external).unwrap();
    std::fs::remove_file(&path).unwrap();
    conv.teardown();

    let err = conv.toggle_attachment(user, &id).await.unwrap_err();
    assert!(matches!(err, AttachmentError::Io { .. }));
    assert!(conv.node(user).unwrap().error_message.is_none());
}

#[tokio::test]
async fn test_toggle_unknown_attachment() {
    let (conv, _) = conversation(Scripted::default());
    let user = first_user(&conv);
    let results = conv.toggle_attachments(user, &["nope".to_string()]).await;
    assert!(matches!(results.as_slice(), [Err(AttachmentError::NotFound(_))]));
}

// ---------------------------------------------------------------------------
// Drafts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_save_then_load_restores_transcript() {
    let docs = MemoryDocumentStore::new();
    let (conv, _) = conversation(Scripted::replying(&["line one\nline two"]));
    let user = first_user(&conv);
    conv.set_content(user, "question").unwrap();
    conv.upsert_attachment(user, Attachment::inline_from_bytes("a.txt", "text/plain", b"abc")).unwrap();
    conv.submit(user, SubmitOptions::default()).await.unwrap();
    let skipped = conv.save(&docs, "draft").await.unwrap();
    assert!(skipped.is_empty());

    let (fresh, _) = conversation(Scripted::default());
    let scaffold: Vec<NodeId> = fresh.transcript().iter().map(|n| n.id).collect();
    fresh.load(&docs, "draft").unwrap();

    let transcript = fresh.transcript();
    let got: Vec<(Role, String)> = transcript.iter().map(|n| (n.role, n.content.clone())).collect();
    assert_eq!(
        got,
        vec![
            (Role::System, String::new()),
            (Role::User, "question".to_string()),
            (Role::Assistant, "line one\nline two".to_string()),
            (Role::User, String::new()),
        ]
    );
    assert_eq!(transcript[0].id, scaffold[0]);
    assert_eq!(transcript[1].id, scaffold[1]);
    assert_eq!(transcript[1].attachments[0].inline_bytes().unwrap(), b"abc");
    assert_well_formed(&fresh.nodes());
}

#[tokio::test]
async fn test_continuing_an_aborted_draft_appends_user_node() {
    let docs = MemoryDocumentStore::new();
    let (conv, _) = conversation(Scripted::hanging(&["partial"]));
    let user = first_user(&conv);
    conv.set_content(user, "first").unwrap();
    let (assistant, task) = conv.spawn_submit(user, SubmitOptions::default()).unwrap();
    wait_for_text(&conv, assistant, "partial").await;
    conv.abort(user).unwrap();
    task.await.unwrap();
    conv.save(&docs, "draft").await.unwrap();

    let (fresh, provider) = conversation(Scripted::replying(&["ok"]));
    fresh.load(&docs, "draft").unwrap();
    assert_eq!(fresh.transcript().last().unwrap().role, Role::Assistant);

    let target = fresh.prompt_target(false).unwrap();
    let transcript = fresh.transcript();
    assert_eq!(transcript.last().unwrap().id, target);
    assert_eq!(transcript[2].content, "partial");

    fresh.set_content(target, "second").unwrap();
    let outcome = fresh.submit(target, SubmitOptions::default()).await.unwrap();
    assert_eq!(outcome.text(), "ok");
    let prompt = provider.last_prompt();
    let sent: Vec<(Role, &str)> = prompt.iter().map(|m| (m.role, m.content.as_str())).collect();
    assert_eq!(
        sent,
        vec![
            (Role::System, ""),
            (Role::User, "first"),
            (Role::Assistant, "partial"),
            (Role::User, "second"),
        ]
    );
    assert_eq!(fresh.node(transcript[2].id).unwrap().content, "partial");
    assert_well_formed(&fresh.nodes());
}

#[tokio::test]
async fn test_prompt_target_reuses_empty_user_leaf() {
    let (conv, _) = conversation(Scripted::replying(&["a"]));
    let user = first_user(&conv);
    assert_eq!(conv.prompt_target(false).unwrap(), user);
    let before = conv.store().revision();
    assert_eq!(conv.prompt_target(false).unwrap(), user);
    assert_eq!(conv.store().revision(), before);

    conv.submit(user, SubmitOptions::default()).await.unwrap();
    assert_eq!(conv.prompt_target(false).unwrap(), conv.transcript()[3].id);
}

#[tokio::test]
async fn test_branch_target_keeps_previous_reply_as_sibling() {
    let (conv, _) = conversation(Scripted::replying(&["reply"]));
    let user = first_user(&conv);
    conv.set_content(user, "question").unwrap();
    conv.submit(user, SubmitOptions::default()).await.unwrap();
    let old = conv.transcript()[2].id;

    let target = conv.prompt_target(true).unwrap();
    assert_eq!(target, user);
    conv.set_content(target, "question, reworded").unwrap();
    conv.submit(target, SubmitOptions { keep_history: true }).await.unwrap();

    let node = conv.node(user).unwrap();
    assert_eq!(node.child_ids.len(), 2);
    assert_eq!(node.child_ids[0], old);
    assert_eq!(conv.transcript()[2].id, node.child_ids[1]);
    assert_well_formed(&conv.nodes());
}

#[tokio::test]
async fn test_branch_target_without_reply_falls_back_to_leaf() {
    let (conv, _) = conversation(Scripted::default());
    assert_eq!(conv.prompt_target(true).unwrap(), first_user(&conv));
}

#[tokio::test]
async fn test_load_missing_draft() {
    let docs = MemoryDocumentStore::new();
    let (conv, _) = conversation(Scripted::default());
    assert!(matches!(conv.load(&docs, "nothing"), Err(DraftError::NotFound(_))));
}

#[tokio::test]
async fn test_bad_document_leaves_tree_untouched() {
    let docs = MemoryDocumentStore::new();
    docs.set("broken", "{\"format\":\"something-else\",\"version\":1,\"messages\":[]}").unwrap();
    let (conv, _) = conversation(Scripted::default());
    let before = conv.nodes();

    assert!(matches!(conv.load(&docs, "broken"), Err(DraftError::Codec(_))));
    let after = conv.nodes();
    assert_eq!(
        before.iter().map(|n| n.id).collect::<Vec<_>>(),
        after.iter().map(|n| n.id).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_teardown_closes_store_and_cancels() {
    let (conv, _) = conversation(Scripted::hanging(&[]));
    let user = first_user(&conv);
    let (_, task) = conv.spawn_submit(user, SubmitOptions::default()).unwrap();
    let mut rx = conv.store().subscribe();

    conv.teardown();
    assert!(matches!(task.await.unwrap(), GenerationOutcome::Aborted { .. }));
    assert!(conv.store().is_closed());
    while rx.changed().await.is_ok() {}
    assert_eq!(conv.set_content(user, "x"), Err(TreeError::StoreClosed));
}

// ---------------------------------------------------------------------------
// Structural invariants under random edits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Op {
    Submit { pick: usize, keep_history: bool },
    Delete { pick: usize },
    Trim { pick: usize },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (any::<usize>(), any::<bool>()).prop_map(|(pick, keep_history)| Op::Submit { pick, keep_history }),
        any::<usize>().prop_map(|pick| Op::Delete { pick }),
        any::<usize>().prop_map(|pick| Op::Trim { pick }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_random_edits_keep_tree_well_formed(ops in prop::collection::vec(op(), 1..25)) {
        tokio_test::block_on(async {
            let (conv, _) = conversation(Scripted::replying(&["r"]));
            for op in ops {
                let nodes = conv.nodes();
                let pick = |i: usize| nodes[i % nodes.len()].id;
                match op {
                    Op::Submit { pick: i, keep_history } => {
                        let id = pick(i);
                        if conv.node(id).is_some_and(|n| n.role == Role::User) {
                            conv.submit(id, SubmitOptions { keep_history }).await.unwrap();
                        }
                    }
                    Op::Delete { pick: i } => conv.delete(pick(i)).unwrap(),
                    Op::Trim { pick: i } => conv.trim(pick(i)).unwrap(),
                }
                assert_well_formed(&conv.nodes());
            }
        });
    }
}
