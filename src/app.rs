//! egui front-end: inputs, buttons and the scrolling log.

use std::path::PathBuf;
use std::sync::Arc;

use eframe::{App, Frame, egui};
use rfd::{FileDialog, MessageButtons, MessageDialog, MessageLevel};
use tokio::runtime::Handle;
use tracing::warn;

use crate::config::Config;
use crate::downloader::YtDlp;
use crate::error::SessionError;
use crate::model::{Bitrate, Outcome, SessionState};
use crate::session::{LogSink, SessionController};

/// Hint shown in the empty URL field
const PLACEHOLDER_URL: &str = "https://music.youtube.com/playlist?list=...";

/// Lines relayed from the session, rendered in the log panel
#[derive(Default)]
struct LogView {
    lines: Vec<String>,
}

impl LogView {
    fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    fn clear(&mut self) {
        self.lines.clear();
    }
}

impl LogSink for LogView {
    fn append_line(&mut self, line: &str) {
        self.push(line);
    }

    fn state_changed(&mut self, state: &SessionState) {
        match state {
            SessionState::Finished(Outcome::Succeeded) => self.push("Download complete."),
            SessionState::Finished(Outcome::Cancelled) => self.push("Download stopped."),
            SessionState::Finished(Outcome::Failed { reason }) => {
                self.push(format!("Download failed: {reason}"))
            }
            SessionState::Idle | SessionState::Running => {}
        }
    }
}

/// Application state for the GUI
pub struct PlaylistApp {
    /// Input field for the playlist or video URL
    url_input: String,
    /// Destination folder as typed or picked
    output_dir: String,
    /// Selected MP3 quality
    bitrate: Bitrate,
    log: LogView,
    session: SessionController,
    /// Settings loaded at startup; saved once a download starts
    config: Config,
}

impl PlaylistApp {
    pub fn new(runtime: Handle) -> Self {
        let session = SessionController::new(runtime, Arc::new(YtDlp::locate()));
        Self::with_session(session, Config::load())
    }

    fn with_session(session: SessionController, config: Config) -> Self {
        let mut log = LogView::default();
        log.push("Paste a YouTube or YouTube Music playlist/video URL, choose a folder, then click Download as MP3.");
        log.push("Requires: yt-dlp and ffmpeg on PATH (or next to this program).");
        log.push("");

        Self {
            url_input: String::new(),
            output_dir: config
                .last_output_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            bitrate: config.bitrate,
            log,
            session,
            config,
        }
    }

    fn browse(&mut self) {
        let start = if self.output_dir.trim().is_empty() {
            dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
        } else {
            PathBuf::from(self.output_dir.trim())
        };
        if let Some(folder) = FileDialog::new()
            .set_title("Choose folder for MP3 files")
            .set_directory(&start)
            .pick_folder()
        {
            self.output_dir = folder.display().to_string();
        }
    }

    fn start_download(&mut self) {
        let dest = PathBuf::from(self.output_dir.trim());
        match self.session.start(&self.url_input, &dest, self.bitrate) {
            Ok(request) => {
                self.log.clear();
                self.log.push("Starting download…");
                self.log.push("");
                self.config.last_output_dir = Some(request.dest_dir);
                self.config.bitrate = request.bitrate;
                if let Err(e) = self.config.save() {
                    warn!("could not save settings: {e}");
                }
            }
            Err(SessionError::Validation(e)) => {
                MessageDialog::new()
                    .set_level(MessageLevel::Warning)
                    .set_title("Cannot start download")
                    .set_description(&e.to_string())
                    .set_buttons(MessageButtons::Ok)
                    .show();
            }
            // Launch failures already carry the error as the failure reason
            Err(_) => self.log.state_changed(self.session.state()),
        }
    }

    fn stop_download(&mut self) {
        if self.session.request_cancel().is_ok() {
            self.log.push("Stopping…");
        }
    }
}

/// GUI update loop: called each frame to redraw and handle interactions
impl App for PlaylistApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut Frame) {
        self.session.poll(&mut self.log);
        let running = self.session.state().is_running();

        let mut start_clicked = false;
        let mut stop_clicked = false;
        let mut browse_clicked = false;

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("YouTube Playlist → MP3");
            ui.add_space(6.0);

            ui.label("Playlist or video URL:");
            ui.add(
                egui::TextEdit::singleline(&mut self.url_input)
                    .hint_text(PLACEHOLDER_URL)
                    .desired_width(f32::INFINITY),
            );
            ui.add_space(6.0);

            ui.horizontal(|ui| {
                ui.label("Save to:");
                ui.add(egui::TextEdit::singleline(&mut self.output_dir).desired_width(360.0));
                browse_clicked = ui.button("Browse…").clicked();
            });

            ui.horizontal(|ui| {
                ui.label("Bitrate:");
                egui::ComboBox::from_id_source("bitrate")
                    .selected_text(self.bitrate.label())
                    .show_ui(ui, |ui| {
                        for b in Bitrate::ALL {
                            ui.selectable_value(&mut self.bitrate, b, b.label());
                        }
                    });
            });
            ui.add_space(6.0);

            ui.horizontal(|ui| {
                start_clicked = ui
                    .add_enabled(!running, egui::Button::new("Download as MP3"))
                    .clicked();
                stop_clicked = ui.add_enabled(running, egui::Button::new("Stop")).clicked();
                if running {
                    ui.add(egui::Spinner::new());
                }
            });
            ui.separator();

            ui.horizontal(|ui| {
                ui.label("Log:");
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if ui.button("Clear").clicked() {
                        self.log.clear();
                    }
                });
            });
            egui::ScrollArea::vertical()
                .auto_shrink([false; 2])
                .stick_to_bottom(true)
                .show(ui, |ui| {
                    for line in &self.log.lines {
                        ui.monospace(line);
                    }
                });
        });

        if browse_clicked {
            self.browse();
        }
        if start_clicked {
            self.start_download();
        }
        if stop_clicked {
            self.stop_download();
        }

        // Pick up relayed output even when the window is idle
        ctx.request_repaint_after(std::time::Duration::from_millis(100));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_view_reports_outcomes() {
        let mut log = LogView::default();
        log.append_line("[download] Destination: 01 - A - B.mp3");
        log.state_changed(&SessionState::Finished(Outcome::Succeeded));
        log.state_changed(&SessionState::Finished(Outcome::Failed {
            reason: "ERROR: nope".into(),
        }));
        log.state_changed(&SessionState::Running);
        assert_eq!(
            log.lines,
            [
                "[download] Destination: 01 - A - B.mp3",
                "Download complete.",
                "Download failed: ERROR: nope",
            ]
        );
        log.clear();
        assert!(log.lines.is_empty());
    }

    #[test]
    fn launch_failure_is_logged_once() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let missing = YtDlp::with_launcher("/nonexistent/bin/yt-dlp", Vec::new());
        let session = SessionController::new(rt.handle().clone(), Arc::new(missing));
        let mut app = PlaylistApp::with_session(session, Config::default());
        let dir = tempfile::tempdir().unwrap();
        app.url_input = "https://youtu.be/dQw4w9WgXcQ".into();
        app.output_dir = dir.path().display().to_string();

        app.start_download();

        let mentions = app
            .log
            .lines
            .iter()
            .filter(|l| l.contains("could not launch"))
            .count();
        assert_eq!(mentions, 1);
        assert!(app.log.lines.last().unwrap().starts_with("Download failed: could not launch"));
        assert_eq!(app.config, Config::default());
    }
}
