//! Crate-level error types.
//!
//! Each concern gets its own enum so callers can match on exactly the
//! failures an operation can produce:
//!
//! - [`TreeError`]: structural misuse of the tree (programming errors)
//! - [`AttachmentError`]: file I/O and data-URL conversion failures
//! - [`CodecError`]: malformed or unsupported persisted documents
//! - [`ProviderError`]: chat-stream collaborator failures
//! - [`PersistenceError`]: document store failures
//! - [`ConfigError`]: configuration loading failures
//! - [`PreviewError`]: markdown compiler task failures
//! - [`DraftError`]: saving or loading a draft document

use std::path::PathBuf;

use crate::node::NodeId;

/// Structural errors raised by the store, writer and controller.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("node {0} already has an open writer")]
    AlreadyWriting(NodeId),

    #[error("node {0} does not exist")]
    UnknownNode(NodeId),

    #[error("operation not allowed on a {role} node ({id})")]
    InvalidRole { id: NodeId, role: crate::node::Role },

    #[error("node {0} already has a generation in flight")]
    Busy(NodeId),

    #[error("tree store has been closed")]
    StoreClosed,

    #[error("tree has no root")]
    EmptyTree,
}

/// Failures converting or reading a single attachment.
#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error("attachment {0} not found")]
    NotFound(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed data URL: {0}")]
    DataUrl(String),

    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Failures encoding or decoding a persisted conversation document.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported document format {format:?} version {version}")]
    UnsupportedVersion { format: String, version: u32 },

    #[error("document contains no messages")]
    Empty,

    #[error("first message must be a system message, found {0}")]
    MissingRoot(crate::node::Role),

    #[error("message {index}: invalid attachment {name:?}: {detail}")]
    InvalidAttachment {
        index: usize,
        name: String,
        detail: String,
    },
}

/// Failures reported by a chat-stream provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{0} not set. Export it or pass via environment.")]
    MissingApiKey(&'static str),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} API error ({status}): {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("stream error: {0}")]
    Stream(String),
}

/// Failures from a [`crate::persistence::DocumentStore`].
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("document store lock poisoned")]
    Poisoned,
}

/// Failures loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Failures compiling a preview.
#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error("preview compiler task failed: {0}")]
    Compile(#[from] tokio::task::JoinError),
}

/// Errors from `Conversation::save` / `Conversation::load`.
#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("no draft stored under {0:?}")]
    NotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeId, Role};

    #[test]
    fn test_tree_error_messages_name_the_node() {
        let id = NodeId::new();
        let msg = TreeError::AlreadyWriting(id).to_string();
        assert!(msg.contains(&id.to_string()));
        assert!(msg.contains("open writer"));
    }

    #[test]
    fn test_invalid_role_mentions_role() {
        let err = TreeError::InvalidRole { id: NodeId::new(), role: Role::System };
        assert!(err.to_string().contains("system"));
    }

    #[test]
    fn test_codec_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: CodecError = json_err.into();
        assert!(matches!(err, CodecError::Json(_)));
    }

    #[test]
    fn test_attachment_error_wraps_tree_error() {
        let err: AttachmentError = TreeError::StoreClosed.into();
        assert_eq!(err.to_string(), "tree store has been closed");
    }

    #[test]
    fn test_missing_api_key_message() {
        let err = ProviderError::MissingApiKey("OPENAI_API_KEY");
        assert_eq!(
            err.to_string(),
            "OPENAI_API_KEY not set. Export it or pass via environment."
        );
    }
}
