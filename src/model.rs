use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// MP3 quality choices offered in the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Bitrate {
    #[serde(rename = "128 kbps")]
    Kbps128,
    #[serde(rename = "192 kbps")]
    Kbps192,
    #[serde(rename = "256 kbps")]
    Kbps256,
    #[default]
    #[serde(rename = "320 kbps")]
    Kbps320,
    /// Variable bitrate at the encoder's best setting
    #[serde(rename = "Best (VBR)")]
    BestVbr,
}

impl Bitrate {
    pub const ALL: [Bitrate; 5] = [
        Bitrate::Kbps128,
        Bitrate::Kbps192,
        Bitrate::Kbps256,
        Bitrate::Kbps320,
        Bitrate::BestVbr,
    ];

    /// Human-readable label shown in the combo box
    pub fn label(self) -> &'static str {
        match self {
            Bitrate::Kbps128 => "128 kbps",
            Bitrate::Kbps192 => "192 kbps",
            Bitrate::Kbps256 => "256 kbps",
            Bitrate::Kbps320 => "320 kbps",
            Bitrate::BestVbr => "Best (VBR)",
        }
    }

    /// Value passed to yt-dlp's `--audio-quality` (K = CBR kbps, 0 = best VBR)
    pub fn audio_quality(self) -> &'static str {
        match self {
            Bitrate::Kbps128 => "128K",
            Bitrate::Kbps192 => "192K",
            Bitrate::Kbps256 => "256K",
            Bitrate::Kbps320 => "320K",
            Bitrate::BestVbr => "0",
        }
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A validated job description handed to the downloader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Trimmed playlist or video URL
    pub url: String,
    /// Existing, writable destination folder
    pub dest_dir: PathBuf,
    /// Requested MP3 quality
    pub bitrate: Bitrate,
}

/// How a finished job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// yt-dlp exited with code 0
    Succeeded,
    /// The user pressed Stop before the process exited
    Cancelled,
    /// Launch failure or non-zero exit; `reason` is never empty
    Failed { reason: String },
}

/// Lifecycle of the single download session
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    Finished(Outcome),
}

impl SessionState {
    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Running)
    }
}
