use std::path::PathBuf;

use thiserror::Error;

/// Input rejected before any process is started
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please enter a YouTube or YouTube Music playlist or video URL.")]
    EmptyUrl,
    #[error("That doesn't look like a valid YouTube or YouTube Music URL: {0}")]
    NotYoutube(String),
    #[error("Please choose a folder to save the MP3 files.")]
    MissingFolder,
    #[error("Folder does not exist: {}", .0.display())]
    FolderNotFound(PathBuf),
    #[error("Folder is not writable: {}", .0.display())]
    FolderNotWritable(PathBuf),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(
        "could not launch {}: {source}. Install yt-dlp (e.g. `pip install yt-dlp`) and ffmpeg, and make sure both are on PATH",
        program.display()
    )]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a download is already running")]
    Busy,

    #[error("no download is running")]
    NotRunning,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config directory available on this platform")]
    NoConfigDir,
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
