pub mod abort;
pub mod attachment;
pub mod cli;
pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod node;
pub mod persistence;
pub mod preview;
pub mod providers;
pub mod scheduler;
pub mod store;
pub mod tokens;
pub mod writer;

pub use abort::{AbortHandle, CancelSignal};
pub use attachment::{Attachment, AttachmentKind, ExternalAttachment, InlineAttachment};
pub use config::Config;
pub use controller::{Conversation, Generation, GenerationOutcome, SubmitOptions};
pub use error::{
    AttachmentError, CodecError, ConfigError, DraftError, PersistenceError, PreviewError,
    ProviderError, TreeError,
};
pub use node::{ChatNode, NodeId, Role, TokenStats};
pub use persistence::{DocumentStore, MemoryDocumentStore, SqliteDocumentStore};
pub use preview::{MarkdownCompiler, CmarkCompiler};
pub use providers::{ChatMessage, ChatOptions, ChatProvider, Provider, TextStream};
pub use scheduler::skip_when_busy;
pub use store::{ChangeEvent, NodeChange, NodeList, TreeStore};
pub use writer::{LiveBuffer, LiveChunk, NodeWriter};
