//! # Codec
//!
//! ## Responsibility
//! Round trip between a node list and the persisted draft document.
//!
//! ## Format
//! A versioned JSON container with one record per message:
//!
//! ```json
//! { "format": "branch-chat/document", "version": 1,
//!   "messages": [ { "id": "...", "role": "user",
//!                   "paragraphs": ["line one", "line two"],
//!                   "attachments": [ { "type": "inline", "id": "...",
//!                                      "name": "a.txt", "mime_type": "text/plain",
//!                                      "size": 3, "data": "data:text/plain;base64,..." } ] } ] }
//! ```
//!
//! ## Guarantees
//! - Every attachment is written inline; external files are read at encode time
//! - Decoding is all-or-nothing: any malformed record fails the whole document
//! - Attachments are restored by id, so every attachment a node held comes
//!   back even when two of them shared a file name before inlining
//! - Decoded nodes form a linear chain (record *i*'s child is record *i+1*).
//!   The format does not carry branches.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::attachment::{decode_data_url, Attachment, InlineAttachment};
use crate::error::{AttachmentError, CodecError};
use crate::node::{ChatNode, NodeId, Role};

pub const DOCUMENT_FORMAT: &str = "branch-chat/document";
pub const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub format: String,
    pub version: u32,
    pub messages: Vec<MessageRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRecord {
    pub id: String,
    pub role: Role,
    pub paragraphs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttachmentRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub data: String,
}

/// An attachment that could not be made portable and was left out.
#[derive(Debug)]
pub struct SkippedAttachment {
    pub node_id: NodeId,
    pub attachment_id: String,
    pub error: AttachmentError,
}

/// Result of [`encode`]: the document text plus any attachments that had
/// to be dropped because their files could not be read.
#[derive(Debug)]
pub struct Encoded {
    pub text: String,
    pub skipped: Vec<SkippedAttachment>,
}

/// Encode `nodes` (in list order) into a document string.
pub async fn encode(nodes: &[ChatNode]) -> Result<Encoded, CodecError> {
    let mut messages = Vec::with_capacity(nodes.len());
    let mut skipped = Vec::new();

    for node in nodes {
        let mut attachments = Vec::with_capacity(node.attachments.len());
        for att in &node.attachments {
            match att.to_inline().await {
                Ok(inline) => attachments.push(attachment_record(&inline)),
                Err(error) => {
                    warn!(node = %node.id, attachment = att.id(), error = %error, "attachment left out of document");
                    skipped.push(SkippedAttachment {
                        node_id: node.id,
                        attachment_id: att.id().to_string(),
                        error,
                    });
                }
            }
        }
        messages.push(MessageRecord {
            id: node.id.to_string(),
            role: node.role,
            paragraphs: node.display_text().split('\n').map(str::to_string).collect(),
            attachments,
        });
    }

    let document = Document {
        format: DOCUMENT_FORMAT.to_string(),
        version: DOCUMENT_VERSION,
        messages,
    };
    Ok(Encoded { text: serde_json::to_string_pretty(&document)?, skipped })
}

fn attachment_record(inline: &InlineAttachment) -> AttachmentRecord {
    let att = Attachment::Inline(inline.clone());
    AttachmentRecord {
        kind: "inline".to_string(),
        id: inline.id.clone(),
        name: inline.file_name.clone(),
        mime_type: inline.mime_type.clone(),
        size: att.size(),
        data: inline.data_url.clone(),
    }
}

/// Decode a document into a linear chain of nodes.
///
/// The first `preserve_ids.len()` nodes take the given ids (so scaffold
/// nodes keep their identity across reloads); the rest get fresh ids.
pub fn decode(text: &str, preserve_ids: &[NodeId]) -> Result<Vec<ChatNode>, CodecError> {
    let document: Document = serde_json::from_str(text)?;
    if document.format != DOCUMENT_FORMAT || document.version != DOCUMENT_VERSION {
        return Err(CodecError::UnsupportedVersion {
            format: document.format,
            version: document.version,
        });
    }
    let first = document.messages.first().ok_or(CodecError::Empty)?;
    if first.role != Role::System {
        return Err(CodecError::MissingRoot(first.role));
    }

    let mut nodes: Vec<ChatNode> = Vec::with_capacity(document.messages.len());
    for (index, record) in document.messages.into_iter().enumerate() {
        let id = preserve_ids.get(index).copied().unwrap_or_else(NodeId::new);
        let mut node = ChatNode::with_id(id, record.role, record.paragraphs.join("\n"));
        for att in record.attachments {
            let att = decode_attachment(index, att)?;
            if node.attachments.iter().any(|a| a.id() == att.id()) {
                return Err(CodecError::InvalidAttachment {
                    index,
                    name: att.file_name().to_string(),
                    detail: format!("duplicate attachment id {}", att.id()),
                });
            }
            node.attachments.push(att);
        }
        nodes.push(node);
    }

    for i in 1..nodes.len() {
        let child = nodes[i].id;
        nodes[i - 1].child_ids.push(child);
    }
    Ok(nodes)
}

fn decode_attachment(index: usize, record: AttachmentRecord) -> Result<Attachment, CodecError> {
    let invalid = |detail: String| CodecError::InvalidAttachment {
        index,
        name: record.name.clone(),
        detail,
    };
    if record.kind != "inline" {
        return Err(invalid(format!("unsupported attachment type {:?}", record.kind)));
    }
    let (_, bytes) = decode_data_url(&record.data).map_err(|e| invalid(e.to_string()))?;
    if bytes.len() as u64 != record.size {
        return Err(invalid(format!("size {} does not match payload of {} bytes", record.size, bytes.len())));
    }
    let id = if record.id.is_empty() { uuid::Uuid::new_v4().to_string() } else { record.id.clone() };
    Ok(Attachment::Inline(InlineAttachment {
        id,
        file_name: record.name.clone(),
        mime_type: record.mime_type.clone(),
        data_url: record.data.clone(),
    }))
}
