//! Checks run on the UI thread before a job is allowed to start.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ValidationError;

/// Accepted YouTube and YouTube Music playlist/video URL shapes
static YOUTUBE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^https?://(www\.)?youtube\.com/playlist\?list=[\w-]+",
        r"^https?://(www\.)?youtube\.com/watch\?v=[\w-]+(&list=[\w-]+)?",
        r"^https?://youtu\.be/[\w-]+",
        r"^https?://music\.youtube\.com/playlist\?list=[\w-]+",
        r"^https?://music\.youtube\.com/watch\?v=[\w-]+(&list=[\w-]+)?",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

pub fn is_youtube_url(text: &str) -> bool {
    let text = text.trim();
    !text.is_empty() && YOUTUBE_PATTERNS.iter().any(|re| re.is_match(text))
}

/// Trims the URL and checks it is a YouTube link
pub fn validate_url(raw: &str) -> Result<String, ValidationError> {
    let url = raw.trim();
    if url.is_empty() {
        return Err(ValidationError::EmptyUrl);
    }
    if !is_youtube_url(url) {
        return Err(ValidationError::NotYoutube(url.to_string()));
    }
    Ok(url.to_string())
}

/// Ensures the destination exists, is a directory and accepts new files.
///
/// Writability is probed by creating (and immediately removing) a temp file,
/// which catches read-only mounts and ACLs that permission bits miss.
pub fn validate_output_dir(raw: &Path) -> Result<PathBuf, ValidationError> {
    if raw.as_os_str().is_empty() || raw.to_string_lossy().trim().is_empty() {
        return Err(ValidationError::MissingFolder);
    }
    let dir = raw.to_path_buf();
    if !dir.is_dir() {
        return Err(ValidationError::FolderNotFound(dir));
    }
    match tempfile::Builder::new()
        .prefix(".playlist_mp3-probe")
        .tempfile_in(&dir)
    {
        Ok(_probe) => Ok(dir),
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "write probe failed");
            Err(ValidationError::FolderNotWritable(dir))
        }
    }
}
