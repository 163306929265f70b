//! YouTube playlist → MP3 downloader GUI (drives yt-dlp and ffmpeg)

// egui window and log relay
mod app;
// Persisted last-used folder and bitrate
mod config;
// yt-dlp discovery and process streaming
mod downloader;
// Error taxonomy
mod error;
// tracing subscriber setup
mod logging;
// Shared data types
mod model;
// Single-job lifecycle state machine
mod session;
// URL and folder checks
mod validate;

use std::sync::Arc;

use eframe::egui;
use once_cell::sync::OnceCell;
use tokio::runtime::Runtime;

use app::PlaylistApp;

// Global Tokio runtime; outlives the app so shutdown can still join the job
static RUNTIME: OnceCell<Arc<Runtime>> = OnceCell::new();

/// Program entry point: initializes logging and the runtime, then launches the GUI
fn main() -> Result<(), eframe::Error> {
    logging::init_tracing();

    let rt = RUNTIME.get_or_init(|| Arc::new(Runtime::new().expect("failed to start tokio runtime")));
    let handle = rt.handle().clone();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("YouTube Playlist → MP3")
            .with_inner_size([620.0, 500.0])
            .with_min_inner_size([520.0, 420.0]),
        ..Default::default()
    };

    tracing::info!("starting");
    eframe::run_native(
        "YouTube Playlist → MP3",
        options,
        Box::new(move |cc| {
            // Use dark theme visuals
            cc.egui_ctx.set_visuals(egui::Visuals::dark());
            Box::new(PlaylistApp::new(handle))
        }),
    )
}
