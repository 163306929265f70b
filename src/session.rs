//! The download session: one job at a time.
//!
//! `SessionController` lives on the UI thread and is the only thing that
//! mutates session state. The process is driven by a relay task on the tokio
//! runtime which owns the `ProcessHandle` and reports back over an unbounded
//! channel: every output line in order, then exactly one exit event.

use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::{
    runtime::Handle,
    sync::mpsc::{UnboundedReceiver, UnboundedSender, error::TryRecvError, unbounded_channel},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::downloader::{CommandSource, ProcessHandle};
use crate::error::SessionError;
use crate::model::{Bitrate, DownloadRequest, Outcome, SessionState};
use crate::validate::{validate_output_dir, validate_url};

/// How long to keep reading after a cancel before abandoning the pipe
/// (a helper that left the process group may still hold it open).
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Output lines kept around to explain a failure
const REASON_LINES: usize = 3;

/// Where relayed output and state changes end up
pub trait LogSink {
    fn append_line(&mut self, line: &str);
    fn state_changed(&mut self, state: &SessionState);
}

#[derive(Debug)]
enum JobEvent {
    Line(String),
    /// `cancelled` is true when Stop was seen before the process finished
    Exited {
        exit: io::Result<Option<i32>>,
        cancelled: bool,
    },
}

struct ActiveJob {
    events: UnboundedReceiver<JobEvent>,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
    recent: VecDeque<String>,
    errors: VecDeque<String>,
}

impl ActiveJob {
    fn remember(&mut self, line: &str) {
        push_bounded(&mut self.recent, line);
        if line.starts_with("ERROR") {
            push_bounded(&mut self.errors, line);
        }
    }
}

fn push_bounded(buf: &mut VecDeque<String>, line: &str) {
    if buf.len() == REASON_LINES {
        buf.pop_front();
    }
    buf.push_back(line.to_string());
}

pub struct SessionController {
    runtime: Handle,
    source: Arc<dyn CommandSource>,
    state: SessionState,
    /// Present exactly while `state` is `Running`
    job: Option<ActiveJob>,
}

impl SessionController {
    pub fn new(runtime: Handle, source: Arc<dyn CommandSource>) -> Self {
        Self {
            runtime,
            source,
            state: SessionState::Idle,
            job: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Validates input and launches the downloader.
    ///
    /// Validation and busy errors leave the state untouched; a launch failure
    /// moves straight to `Finished(Failed)`. Returns the accepted request so
    /// the caller can persist it.
    pub fn start(
        &mut self,
        url: &str,
        dest_dir: &Path,
        bitrate: Bitrate,
    ) -> Result<DownloadRequest, SessionError> {
        if self.state.is_running() {
            return Err(SessionError::Busy);
        }
        let request = DownloadRequest {
            url: validate_url(url)?,
            dest_dir: validate_output_dir(dest_dir)?,
            bitrate,
        };

        let spec = self.source.command(&request);
        let started = {
            let _rt = self.runtime.enter();
            ProcessHandle::start(&spec)
        };
        let handle = match started {
            Ok(handle) => handle,
            Err(e) => {
                warn!("{e}");
                self.state = SessionState::Finished(Outcome::Failed {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };
        info!(pid = ?handle.id(), url = %request.url, dest = %request.dest_dir.display(), "download started");

        let (tx, events) = unbounded_channel();
        let cancel = CancellationToken::new();
        let worker = self.runtime.spawn(relay(handle, cancel.clone(), tx));

        self.job = Some(ActiveJob {
            events,
            cancel,
            worker,
            recent: VecDeque::with_capacity(REASON_LINES),
            errors: VecDeque::with_capacity(REASON_LINES),
        });
        self.state = SessionState::Running;
        Ok(request)
    }

    /// Asks the running process to stop. The state only changes once the
    /// process has actually exited; it is `Cancelled` unless the process
    /// had already finished before the request reached it.
    pub fn request_cancel(&mut self) -> Result<(), SessionError> {
        let job = self.job.as_ref().ok_or(SessionError::NotRunning)?;
        if !job.cancel.is_cancelled() {
            info!("cancellation requested");
            job.cancel.cancel();
        }
        Ok(())
    }

    /// Drains pending events without blocking. Returns true when the job
    /// reached a terminal state during this call.
    pub fn poll(&mut self, sink: &mut dyn LogSink) -> bool {
        loop {
            let Some(job) = self.job.as_mut() else {
                return false;
            };
            let event = match job.events.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => relay_lost(&job.cancel),
            };
            if self.apply(event, sink) {
                return true;
            }
        }
    }

    /// Blocks until the current job (if any) finishes.
    ///
    /// Must not be called from inside the tokio runtime.
    pub fn wait(&mut self, sink: &mut dyn LogSink) -> &SessionState {
        while let Some(job) = self.job.as_mut() {
            let event = match job.events.blocking_recv() {
                Some(event) => event,
                None => relay_lost(&job.cancel),
            };
            self.apply(event, sink);
        }
        &self.state
    }

    /// Stops any running job and waits for its process to be reaped.
    pub fn shutdown(&mut self) {
        let Some(job) = self.job.take() else {
            return;
        };
        info!("shutting down running download");
        job.cancel.cancel();
        if Handle::try_current().is_ok() {
            // Can't block here; the relay still tears the process tree down.
            debug!("shutdown inside runtime; not joining relay task");
        } else if let Err(e) = self.runtime.block_on(job.worker) {
            warn!("relay task ended abnormally: {e}");
        }
        self.state = SessionState::Finished(Outcome::Cancelled);
    }

    fn apply(&mut self, event: JobEvent, sink: &mut dyn LogSink) -> bool {
        match event {
            JobEvent::Line(line) => {
                if let Some(job) = self.job.as_mut() {
                    job.remember(&line);
                }
                sink.append_line(&line);
                false
            }
            JobEvent::Exited { exit, cancelled } => {
                let Some(job) = self.job.take() else {
                    return false;
                };
                let outcome = classify(cancelled, &exit, &job.errors, &job.recent);
                info!(?exit, cancelled, ?outcome, "download finished");
                self.state = SessionState::Finished(outcome);
                sink.state_changed(&self.state);
                true
            }
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn relay_lost(cancel: &CancellationToken) -> JobEvent {
    JobEvent::Exited {
        exit: Err(io::Error::other(
            "relay task stopped without reporting an exit status",
        )),
        cancelled: cancel.is_cancelled(),
    }
}

/// Cancellation wins over any exit code; otherwise zero means success.
fn classify(
    cancelled: bool,
    exit: &io::Result<Option<i32>>,
    errors: &VecDeque<String>,
    recent: &VecDeque<String>,
) -> Outcome {
    if cancelled {
        return Outcome::Cancelled;
    }
    let fallback = match exit {
        Ok(Some(0)) => return Outcome::Succeeded,
        Ok(Some(code)) => format!("yt-dlp exited with code {code}"),
        Ok(None) => "yt-dlp was terminated by a signal".to_string(),
        Err(e) => format!("could not collect yt-dlp exit status: {e}"),
    };
    let lines: Vec<&str> = if errors.is_empty() {
        recent.back().map(String::as_str).into_iter().collect()
    } else {
        errors.iter().map(String::as_str).collect()
    };
    let reason = if lines.is_empty() {
        fallback
    } else {
        lines.join("\n")
    };
    Outcome::Failed { reason }
}

enum Step {
    Line(Option<String>),
    Cancel,
}

/// Owns the process for its whole life: forwards lines, kills on request,
/// and always finishes with one `Exited` event after the child is reaped.
///
/// A Stop that arrives after the output has closed does not count: the
/// process had already finished on its own.
async fn relay(mut handle: ProcessHandle, cancel: CancellationToken, tx: UnboundedSender<JobEvent>) {
    let cancelled = loop {
        let step = tokio::select! {
            line = handle.read_line() => Step::Line(line),
            () = cancel.cancelled() => Step::Cancel,
        };
        match step {
            Step::Line(Some(line)) => {
                let _ = tx.send(JobEvent::Line(line));
            }
            Step::Line(None) => break cancel.is_cancelled(),
            Step::Cancel => {
                handle.cancel();
                drain(&mut handle, &tx).await;
                break true;
            }
        }
    };
    if cancelled && !handle.is_cancelled() {
        handle.cancel();
    }
    let exit = handle.exit_status().await;
    let _ = tx.send(JobEvent::Exited { exit, cancelled });
}

async fn drain(handle: &mut ProcessHandle, tx: &UnboundedSender<JobEvent>) {
    loop {
        match tokio::time::timeout(DRAIN_GRACE, handle.read_line()).await {
            Ok(Some(line)) => {
                let _ = tx.send(JobEvent::Line(line));
            }
            Ok(None) => break,
            Err(_) => {
                warn!("output pipe still open {DRAIN_GRACE:?} after kill; dropping the rest");
                break;
            }
        }
    }
}
