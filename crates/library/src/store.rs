use std::path::{Path, PathBuf};

use async_trait::async_trait;
use common::VideoLibrary;
use tracing::warn;

use crate::LibraryError;

/// Durable home of the serialized library.
#[async_trait]
pub trait LibraryStorage: Send + Sync {
    /// `None` when nothing has been stored yet.
    async fn load(&self) -> Result<Option<VideoLibrary>, LibraryError>;
    async fn save(&self, library: &VideoLibrary) -> Result<(), LibraryError>;
}

/// The library as one JSON document on disk, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LibraryStorage for JsonFileStorage {
    async fn load(&self) -> Result<Option<VideoLibrary>, LibraryError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(parse_with_recovery(&text)?))
    }

    async fn save(&self, library: &VideoLibrary) -> Result<(), LibraryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec(library)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Parses a library document. When the parse fails, retries once on the text
/// cut at the reported error position, which recovers files carrying trailing
/// garbage after a complete document.
pub fn parse_with_recovery(text: &str) -> Result<VideoLibrary, serde_json::Error> {
    let err = match serde_json::from_str::<VideoLibrary>(text) {
        Ok(library) => return Ok(library),
        Err(err) => err,
    };
    let offset = byte_offset(text, err.line(), err.column());
    let Some(prefix) = offset.and_then(|offset| text.get(..offset)) else {
        return Err(err);
    };
    match serde_json::from_str::<VideoLibrary>(prefix) {
        Ok(library) => {
            warn!(
                "Recovered library document by dropping {} trailing bytes",
                text.len() - prefix.len()
            );
            Ok(library)
        }
        Err(_) => Err(err),
    }
}

// serde_json reports 1-based lines and byte columns pointing at the
// offending character.
fn byte_offset(text: &str, line: usize, column: usize) -> Option<usize> {
    if line == 0 || column == 0 {
        return None;
    }
    let line_start: usize = text
        .split_inclusive('\n')
        .take(line - 1)
        .map(str::len)
        .sum();
    let offset = line_start + column - 1;
    if offset == 0 || offset >= text.len() {
        return None;
    }
    Some(offset)
}
