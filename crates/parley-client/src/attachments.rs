//! Files attached to an outgoing message and their conversion to content
//! parts

use std::path::Path;

use base64::Engine;
use parley_core::ContentPart;

use crate::error::{StorageError, StorageResult};

/// Text file bodies are cut at this many characters
pub const MAX_FILE_TEXT: usize = 200_000;

const DEFAULT_MIME: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq)]
pub enum Attachment {
    /// Sent inline as an `image_url` part
    Image {
        name: String,
        mime: String,
        data_url: String,
    },
    /// Sent as text, fenced when the language is known
    TextFile { name: String, text: String },
    /// Announced by name, type and size only
    File {
        name: String,
        mime: String,
        size: u64,
    },
}

impl Attachment {
    pub fn name(&self) -> &str {
        match self {
            Attachment::Image { name, .. }
            | Attachment::TextFile { name, .. }
            | Attachment::File { name, .. } => name,
        }
    }

    pub fn image(name: impl Into<String>, mime: impl Into<String>, bytes: &[u8]) -> Self {
        let mime = mime.into();
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        Attachment::Image {
            name: name.into(),
            data_url: format!("data:{};base64,{}", mime, encoded),
            mime,
        }
    }

    /// Read a file from disk and classify it by extension: images are
    /// inlined, text and source files are read as text, anything else is
    /// referenced by name.
    pub async fn from_path(path: &Path) -> StorageResult<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StorageError::other(format!("Not a file: {:?}", path)))?;
        let mime = guess_mime(&name);

        if mime.starts_with("image/") {
            let bytes = tokio::fs::read(path).await?;
            return Ok(Attachment::image(name, mime, &bytes));
        }

        if is_text_mime(&mime) || is_likely_code_file(&name) {
            let bytes = tokio::fs::read(path).await?;
            let text = String::from_utf8_lossy(&bytes).into_owned();
            return Ok(Attachment::TextFile { name, text });
        }

        let size = tokio::fs::metadata(path).await?.len();
        Ok(Attachment::File { name, mime, size })
    }

    fn to_part(&self) -> ContentPart {
        match self {
            Attachment::Image { data_url, .. } => ContentPart::image_url(data_url.clone()),
            Attachment::TextFile { name, text } => ContentPart::text(text_file_part(name, text)),
            Attachment::File { name, mime, size } => {
                let name = if name.is_empty() { "(file)" } else { name };
                let mime = if mime.is_empty() { DEFAULT_MIME } else { mime };
                ContentPart::text(format!(
                    "[file attached: {} · {} · {}]",
                    name,
                    mime,
                    human_size(*size)
                ))
            }
        }
    }
}

fn text_file_part(name: &str, text: &str) -> String {
    let header = if name.is_empty() {
        "[file: (text file)]".to_string()
    } else {
        format!("[file: {}]", name)
    };

    let total = text.chars().count();
    let body = if total > MAX_FILE_TEXT {
        let kept: String = text.chars().take(MAX_FILE_TEXT).collect();
        format!("{}\n...[truncated {} chars]", kept, total - MAX_FILE_TEXT)
    } else {
        text.to_string()
    };

    match guess_language(name) {
        Some(lang) => format!("{}\n\n```{}\n{}\n```", header, lang, body),
        None => format!("{}\n\n{}", header, body),
    }
}

/// Message parts for typed text plus attachments: the text first when
/// present, then one part per attachment in order.
pub fn to_parts(text: &str, attachments: &[Attachment]) -> Vec<ContentPart> {
    let mut parts = Vec::with_capacity(attachments.len() + 1);
    if !text.is_empty() {
        parts.push(ContentPart::text(text));
    }
    parts.extend(attachments.iter().map(Attachment::to_part));
    parts
}

fn extension(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Code-fence language for a file name
pub fn guess_language(name: &str) -> Option<&'static str> {
    let lang = match extension(name)?.as_str() {
        "js" => "javascript",
        "ts" => "typescript",
        "tsx" => "tsx",
        "jsx" => "jsx",
        "json" => "json",
        "md" => "markdown",
        "py" => "python",
        "rb" => "ruby",
        "go" => "go",
        "rs" => "rust",
        "java" => "java",
        "kt" => "kotlin",
        "swift" => "swift",
        "c" | "h" => "c",
        "cpp" | "cxx" | "cc" | "hpp" => "cpp",
        "cs" => "csharp",
        "php" => "php",
        "html" => "html",
        "css" => "css",
        "scss" => "scss",
        "sql" => "sql",
        "sh" => "bash",
        "yml" | "yaml" => "yaml",
        "toml" => "toml",
        "xml" => "xml",
        _ => return None,
    };
    Some(lang)
}

pub fn is_likely_code_file(name: &str) -> bool {
    guess_language(name).is_some()
}

/// MIME type from the file extension, `application/octet-stream` when
/// unknown
pub fn guess_mime(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Types whose bodies are readable text even outside `text/*`
fn is_text_mime(mime: &str) -> bool {
    mime.starts_with("text/")
        || matches!(
            mime,
            "application/json"
                | "application/xml"
                | "application/toml"
                | "application/yaml"
                | "application/x-yaml"
                | "application/javascript"
                | "application/x-sh"
        )
        || (mime.ends_with("+xml") && !mime.starts_with("image/"))
}

/// `512 B`, `1.5 KB`, `3.2 MB`
pub fn human_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    if bytes < KB {
        format!("{} B", bytes)
    } else if bytes < MB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    }
}
