//! Rendered previews of node content.
//!
//! Static content goes through a memo on the node (`cached_preview_html`),
//! keyed by the exact content string it was compiled from. Streaming content
//! goes through [`skip_when_busy`](crate::scheduler::skip_when_busy) so the
//! compiler never falls behind the token stream.

use std::sync::Arc;

use futures_util::stream::{Stream, StreamExt};
use pulldown_cmark::{html, Event, Options, Parser};
use tracing::debug;

use crate::error::{PreviewError, TreeError};
use crate::node::{NodeId, PreviewCache};
use crate::scheduler::skip_when_busy_infallible;
use crate::store::TreeStore;
use crate::writer::LiveBuffer;

/// Turns markdown into sanitized HTML. Must be free of side effects.
pub trait MarkdownCompiler: Send + Sync {
    fn compile(&self, markdown: &str) -> String;
}

/// CommonMark renderer with tables, strikethrough and task lists.
///
/// Raw HTML in the source, block or inline, is dropped before rendering.
#[derive(Debug, Clone, Default)]
pub struct CmarkCompiler;

impl MarkdownCompiler for CmarkCompiler {
    fn compile(&self, markdown: &str) -> String {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);

        let parser = Parser::new_ext(markdown, options)
            .filter(|event| !matches!(event, Event::Html(_) | Event::InlineHtml(_)));

        let mut out = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut out, parser);
        out
    }
}

/// Preview of a node's current text.
///
/// Idle nodes reuse `cached_preview_html` when its key equals `content`;
/// otherwise the result is compiled and memoized on the node. Streaming nodes
/// are compiled from the live snapshot and never memoized.
pub fn preview_html(
    store: &TreeStore,
    node_id: NodeId,
    compiler: &dyn MarkdownCompiler,
) -> Result<String, TreeError> {
    let node = store.get(node_id).ok_or(TreeError::UnknownNode(node_id))?;
    if node.is_streaming() {
        return Ok(compiler.compile(&node.display_text()));
    }
    if let Some(cache) = &node.cached_preview_html {
        if cache.key == node.content {
            return Ok(cache.value.clone());
        }
    }

    let html = compiler.compile(&node.content);
    let key = node.content;
    let memo = PreviewCache { key: key.clone(), value: html.clone() };
    store.update_node(node_id, |n| {
        // Content may have changed while compiling.
        if n.content == key && !n.is_streaming() {
            n.cached_preview_html = Some(memo);
        }
        Ok(())
    })?;
    debug!(node = %node_id, "preview memoized");
    Ok(html)
}

/// Compiled previews of a live buffer, at most one compile in flight,
/// converging on the buffer's final text when the writer closes.
pub fn live_preview(
    buffer: &LiveBuffer,
    compiler: Arc<dyn MarkdownCompiler>,
) -> impl Stream<Item = Result<String, PreviewError>> + Send + 'static {
    let snapshots = buffer.stream().map(|chunk| chunk.snapshot);
    skip_when_busy_infallible(snapshots, move |text: String| {
        let compiler = compiler.clone();
        async move {
            tokio::task::spawn_blocking(move || compiler.compile(&text))
                .await
                .map_err(PreviewError::from)
        }
    })
}
