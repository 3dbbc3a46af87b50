use std::{
    io,
    path::{Path, PathBuf},
};
use tracing::warn;

pub const ALLOWED_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "webp", "bmp"];

/// Maximum accepted request body.
pub const MAX_CONTENT_LENGTH: usize = 10 * 1024 * 1024;

/// Files beyond this count in one batch request are ignored.
pub const MAX_BATCH_FILES: usize = 10;

/// Extension check on the client filename. Content is not sniffed.
pub fn allowed_file(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| {
            ALLOWED_EXTENSIONS
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Reduces a client filename to a safe single path component.
pub fn secure_filename(filename: &str) -> String {
    let spaced: String = filename
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '_');

    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// An upload written to the staging directory. The file is removed on drop.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
}

impl StagedFile {
    pub async fn write(dir: &Path, filename: &str, bytes: &[u8]) -> io::Result<Self> {
        let path = dir.join(filename);
        tokio::fs::write(&path, bytes).await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("failed to remove staged file {:?}: {}", self.path, e);
            }
        }
    }
}
