//! File attachments held by user nodes.
//!
//! An attachment is either **inline** (bytes embedded as a base64 data URL,
//! portable across save/load) or **external** (a path to a file on disk,
//! cheap to hold but not portable). Converting between the two is async
//! file I/O and never touches the tree store.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose, Engine as _};
use uuid::Uuid;

use crate::error::AttachmentError;

/// Discriminant used for the `(kind, file name)` upsert key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentKind {
    Inline,
    External,
}

impl std::fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttachmentKind::Inline => write!(f, "inline"),
            AttachmentKind::External => write!(f, "external"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineAttachment {
    pub id: String,
    pub file_name: String,
    pub mime_type: String,
    pub data_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalAttachment {
    pub id: String,
    pub file_name: String,
    pub mime_type: String,
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    Inline(InlineAttachment),
    External(ExternalAttachment),
}

impl Attachment {
    pub fn inline_from_bytes(file_name: &str, mime_type: &str, bytes: &[u8]) -> Self {
        Attachment::Inline(InlineAttachment {
            id: Uuid::new_v4().to_string(),
            file_name: file_name.to_string(),
            mime_type: mime_type.to_string(),
            data_url: encode_data_url(mime_type, bytes),
        })
    }

    /// Reference an existing file without reading it.
    pub async fn external_from_path(path: impl Into<PathBuf>) -> Result<Self, AttachmentError> {
        let path = path.into();
        let meta = tokio::fs::metadata(&path).await.map_err(|source| AttachmentError::Io {
            path: path.clone(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        Ok(Attachment::External(ExternalAttachment {
            id: Uuid::new_v4().to_string(),
            mime_type: guess_mime(&file_name).to_string(),
            file_name,
            path,
            size: meta.len(),
        }))
    }

    /// Read a file and embed it as an inline attachment.
    pub async fn inline_from_path(path: impl AsRef<Path>) -> Result<Self, AttachmentError> {
        let path = path.as_ref();
        let bytes = read_file(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        Ok(Attachment::inline_from_bytes(&file_name, guess_mime(&file_name), &bytes))
    }

    pub fn id(&self) -> &str {
        match self {
            Attachment::Inline(a) => &a.id,
            Attachment::External(a) => &a.id,
        }
    }

    pub fn file_name(&self) -> &str {
        match self {
            Attachment::Inline(a) => &a.file_name,
            Attachment::External(a) => &a.file_name,
        }
    }

    pub fn mime_type(&self) -> &str {
        match self {
            Attachment::Inline(a) => &a.mime_type,
            Attachment::External(a) => &a.mime_type,
        }
    }

    pub fn kind(&self) -> AttachmentKind {
        match self {
            Attachment::Inline(_) => AttachmentKind::Inline,
            Attachment::External(_) => AttachmentKind::External,
        }
    }

    /// Upsert key: at most one attachment per `(kind, file name)` on a node.
    pub fn key(&self) -> (AttachmentKind, String) {
        (self.kind(), self.file_name().to_string())
    }

    /// Size of the payload in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Attachment::Inline(a) => decoded_len(&a.data_url),
            Attachment::External(a) => a.size,
        }
    }

    /// Decoded bytes of an inline attachment; `None` for external ones.
    pub fn inline_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Attachment::Inline(a) => decode_data_url(&a.data_url).ok().map(|(_, b)| b),
            Attachment::External(_) => None,
        }
    }

    /// Read the payload regardless of representation.
    pub async fn read_bytes(&self) -> Result<Vec<u8>, AttachmentError> {
        match self {
            Attachment::Inline(a) => decode_data_url(&a.data_url).map(|(_, bytes)| bytes),
            Attachment::External(a) => read_file(&a.path).await,
        }
    }

    /// Inline form of this attachment, reading external files as needed.
    /// The id is preserved.
    pub async fn to_inline(&self) -> Result<InlineAttachment, AttachmentError> {
        match self {
            Attachment::Inline(a) => Ok(a.clone()),
            Attachment::External(a) => {
                let bytes = read_file(&a.path).await?;
                Ok(InlineAttachment {
                    id: a.id.clone(),
                    file_name: a.file_name.clone(),
                    mime_type: a.mime_type.clone(),
                    data_url: encode_data_url(&a.mime_type, &bytes),
                })
            }
        }
    }

    /// External form of this attachment. Inline payloads are written to
    /// `dir/<id>-<file name>`. The id is preserved.
    pub async fn to_external(&self, dir: &Path) -> Result<ExternalAttachment, AttachmentError> {
        match self {
            Attachment::External(a) => Ok(a.clone()),
            Attachment::Inline(a) => {
                let (_, bytes) = decode_data_url(&a.data_url)?;
                tokio::fs::create_dir_all(dir).await.map_err(|source| AttachmentError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?;
                let path = dir.join(format!("{}-{}", a.id, sanitize_file_name(&a.file_name)));
                tokio::fs::write(&path, &bytes).await.map_err(|source| AttachmentError::Io {
                    path: path.clone(),
                    source,
                })?;
                Ok(ExternalAttachment {
                    id: a.id.clone(),
                    file_name: a.file_name.clone(),
                    mime_type: a.mime_type.clone(),
                    path,
                    size: bytes.len() as u64,
                })
            }
        }
    }

    /// Flip between inline and external representation.
    pub async fn toggled(&self, dir: &Path) -> Result<Attachment, AttachmentError> {
        match self {
            Attachment::Inline(_) => self.to_external(dir).await.map(Attachment::External),
            Attachment::External(_) => self.to_inline().await.map(Attachment::Inline),
        }
    }
}

// ---------------------------------------------------------------------------
// Data URL helpers
// ---------------------------------------------------------------------------

pub fn encode_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, general_purpose::STANDARD.encode(bytes))
}

/// Split a base64 data URL into `(mime type, bytes)`.
pub fn decode_data_url(url: &str) -> Result<(String, Vec<u8>), AttachmentError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| AttachmentError::DataUrl("missing data: prefix".to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| AttachmentError::DataUrl("missing ',' separator".to_string()))?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| AttachmentError::DataUrl("only base64 data URLs are supported".to_string()))?;
    let bytes = general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| AttachmentError::DataUrl(e.to_string()))?;
    Ok((mime.to_string(), bytes))
}

fn decoded_len(url: &str) -> u64 {
    let Some((_, payload)) = url.split_once(',') else {
        return 0;
    };
    let padding = payload.bytes().rev().take_while(|b| *b == b'=').count();
    ((payload.len() / 4) * 3).saturating_sub(padding) as u64
}

async fn read_file(path: &Path) -> Result<Vec<u8>, AttachmentError> {
    tokio::fs::read(path).await.map_err(|source| AttachmentError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if c == '/' || c == '\\' || c == '\0' { '_' } else { c })
        .collect()
}

/// Best-effort MIME type from a file extension.
pub fn guess_mime(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "rs" | "py" | "js" | "ts" | "toml" | "yaml" | "yml" => "text/plain",
        _ => "application/octet-stream",
    }
}
