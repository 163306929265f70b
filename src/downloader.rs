//! yt-dlp process adapter: locating the tool, building its command line,
//! and streaming its combined output as lines.

use std::ffi::OsString;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::{
    process::{Child, Command},
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::model::DownloadRequest;

/// File name pattern: "01 - Artist - Title.mp3", playlist order preserved.
/// A single video has no playlist index, so it falls back to "01".
pub const OUTPUT_TEMPLATE: &str =
    "%(playlist_index|01)02d - %(artist,Unknown)s - %(title)s.%(ext)s";

const YTDLP_BIN: &str = if cfg!(target_os = "windows") { "yt-dlp.exe" } else { "yt-dlp" };

/// A fully resolved program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

/// Turns a job into the command that performs it
pub trait CommandSource: Send + Sync {
    fn command(&self, request: &DownloadRequest) -> CommandSpec;
}

/// How to run yt-dlp on this machine
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    /// Arguments placed before ours, e.g. `-m yt_dlp` when run through Python
    launcher_args: Vec<OsString>,
    js_runtime_args: Vec<String>,
}

impl YtDlp {
    /// Resolves yt-dlp and a JS runtime from the current environment.
    pub fn locate() -> Self {
        let (program, launcher_args) = find_ytdlp();
        let js_runtime_args = js_runtime_args();
        info!(program = %program.display(), ?launcher_args, ?js_runtime_args, "using yt-dlp");
        if which::which("ffmpeg").is_err() {
            warn!("ffmpeg not found on PATH; MP3 conversion will fail");
        }
        Self { program, launcher_args, js_runtime_args }
    }

    /// Runs `program [launcher_args..] <yt-dlp args>` with no JS runtime flags.
    pub fn with_launcher(program: impl Into<PathBuf>, launcher_args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            launcher_args,
            js_runtime_args: Vec::new(),
        }
    }
}

impl CommandSource for YtDlp {
    fn command(&self, request: &DownloadRequest) -> CommandSpec {
        let mut args = self.launcher_args.clone();
        args.extend(self.js_runtime_args.iter().map(OsString::from));
        for a in ["-x", "--audio-format", "mp3", "--audio-quality", request.bitrate.audio_quality(), "-o"] {
            args.push(a.into());
        }
        args.push(output_template(&request.dest_dir));
        for a in ["--embed-metadata", "--newline", "--progress", "--no-mtime"] {
            args.push(a.into());
        }
        args.push(request.url.as_str().into());

        CommandSpec {
            program: self.program.clone(),
            args,
        }
    }
}

/// Output path pattern inside `dest_dir`
pub fn output_template(dest_dir: &Path) -> OsString {
    dest_dir.join(OUTPUT_TEMPLATE).into_os_string()
}

/// PATH, then next to our own executable, then `python -m yt_dlp`,
/// then the bare name (which makes the spawn report the missing tool).
fn find_ytdlp() -> (PathBuf, Vec<OsString>) {
    if let Ok(path) = which::which(YTDLP_BIN) {
        return (path, Vec::new());
    }

    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(YTDLP_BIN)));
    if let Some(candidate) = beside_exe.filter(|p| p.is_file()) {
        return (candidate, Vec::new());
    }

    for python in ["python3", "python"] {
        let Ok(python) = which::which(python) else { continue };
        let has_module = std::process::Command::new(&python)
            .args(["-c", "import yt_dlp"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        if has_module {
            return (python, vec!["-m".into(), "yt_dlp".into()]);
        }
    }

    (PathBuf::from(YTDLP_BIN), Vec::new())
}

/// yt-dlp uses deno by default; otherwise point it at node or bun.
pub fn js_runtime_args() -> Vec<String> {
    js_runtime_args_with(|name| which::which(name).is_ok())
}

fn js_runtime_args_with(on_path: impl Fn(&str) -> bool) -> Vec<String> {
    if on_path("deno") {
        return Vec::new();
    }
    for runtime in ["node", "bun"] {
        if on_path(runtime) {
            return vec!["--js-runtimes".to_string(), runtime.to_string()];
        }
    }
    Vec::new()
}

/// How long a cancelled process tree gets to exit after SIGTERM before SIGKILL
const KILL_GRACE: Duration = Duration::from_secs(3);

/// A running external process with its combined output line stream.
///
/// stdout and stderr share one pipe, so lines arrive in exactly the order the
/// process wrote them. On Unix the child leads its own process group, and
/// cancelling signals the whole group so ffmpeg and other helpers die with it.
pub struct ProcessHandle {
    child: Child,
    /// Pid (and on Unix, process group id) captured at spawn time
    pid: Option<u32>,
    lines: UnboundedReceiver<String>,
    cancelled: bool,
}

impl ProcessHandle {
    /// Spawns the command. Must be called inside a tokio runtime context.
    pub fn start(spec: &CommandSpec) -> Result<Self, SessionError> {
        debug!(program = %spec.program.display(), args = ?spec.args, "spawning");
        let spawn_error = |source| SessionError::Spawn {
            program: spec.program.clone(),
            source,
        };

        let (pipe_reader, pipe_writer) = io::pipe().map_err(spawn_error)?;
        let stderr_writer = pipe_writer.try_clone().map_err(spawn_error)?;

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(pipe_writer)
            .stderr(stderr_writer)
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        let spawned = command.spawn();
        // Our copies of the write end must be closed or EOF never arrives.
        drop(command);
        let child = spawned.map_err(spawn_error)?;

        let (tx, lines) = unbounded_channel();
        let _reader = tokio::task::spawn_blocking(move || pump_lines(pipe_reader, tx));

        Ok(Self {
            pid: child.id(),
            child,
            lines,
            cancelled: false,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Next output line, or `None` once every writer of the pipe has closed it
    pub async fn read_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Asks the whole process tree to terminate; buffered lines stay readable.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.signal_tree(false);
    }

    /// Waits for exit. After a cancel, escalates to SIGKILL if the tree
    /// ignores SIGTERM, then sweeps the group so no helper outlives it.
    /// `None` means the process was terminated by a signal.
    pub async fn exit_status(mut self) -> io::Result<Option<i32>> {
        if !self.cancelled {
            return Ok(self.child.wait().await?.code());
        }
        let status = match tokio::time::timeout(KILL_GRACE, self.child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(pid = ?self.pid, "process ignored termination for {KILL_GRACE:?}; killing");
                self.signal_tree(true);
                self.child.wait().await?
            }
        };
        self.signal_tree(true);
        Ok(status.code())
    }

    #[cfg(unix)]
    fn signal_tree(&mut self, force: bool) {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        let Some(pgid) = self.pid else { return };
        let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        match killpg(Pid::from_raw(pgid as i32), signal) {
            Ok(()) => debug!(pgid, ?signal, "signalled process group"),
            // ESRCH: the group is already gone
            Err(e) => debug!(pgid, ?signal, "could not signal process group: {e}"),
        }
    }

    #[cfg(not(unix))]
    fn signal_tree(&mut self, force: bool) {
        if let Some(pid) = self.pid {
            let pid = pid.to_string();
            let mut taskkill = std::process::Command::new("taskkill");
            taskkill.args(["/T", "/PID", pid.as_str()]);
            if force {
                taskkill.arg("/F");
            }
            let status = taskkill.stdout(Stdio::null()).stderr(Stdio::null()).status();
            debug!(%pid, force, ?status, "taskkill");
        }
        if force {
            if let Err(e) = self.child.start_kill() {
                debug!("kill failed (process likely exited): {e}");
            }
        }
    }
}

/// Blocking reader for the shared output pipe
fn pump_lines(pipe: io::PipeReader, tx: UnboundedSender<String>) {
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end();
                if line.is_empty() {
                    continue;
                }
                if tx.send(line.to_string()).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("pipe read failed: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Bitrate;

    fn request(dest: &Path) -> DownloadRequest {
        DownloadRequest {
            url: "https://www.youtube.com/playlist?list=PL123".into(),
            dest_dir: dest.to_path_buf(),
            bitrate: Bitrate::Kbps256,
        }
    }

    fn sh(script: &str) -> CommandSpec {
        CommandSpec {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
        }
    }

    async fn collect(handle: &mut ProcessHandle) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(line) = handle.read_line().await {
            out.push(line);
        }
        out
    }

    #[test]
    fn template_embeds_index_artist_title() {
        let t = output_template(Path::new("/tmp/out"));
        assert_eq!(
            t,
            OsString::from("/tmp/out/%(playlist_index|01)02d - %(artist,Unknown)s - %(title)s.%(ext)s")
        );
    }

    #[test]
    fn ytdlp_command_line() {
        let spec = YtDlp::with_launcher("yt-dlp", Vec::new()).command(&request(Path::new("/tmp/out")));
        let args: Vec<String> = spec.args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(spec.program, PathBuf::from("yt-dlp"));
        assert_eq!(
            args,
            vec![
                "-x",
                "--audio-format",
                "mp3",
                "--audio-quality",
                "256K",
                "-o",
                "/tmp/out/%(playlist_index|01)02d - %(artist,Unknown)s - %(title)s.%(ext)s",
                "--embed-metadata",
                "--newline",
                "--progress",
                "--no-mtime",
                "https://www.youtube.com/playlist?list=PL123",
            ]
        );
    }

    #[test]
    fn launcher_and_js_args_come_first() {
        let mut ytdlp = YtDlp::with_launcher("python3", vec!["-m".into(), "yt_dlp".into()]);
        ytdlp.js_runtime_args = vec!["--js-runtimes".into(), "node".into()];
        let spec = ytdlp.command(&request(Path::new("/x")));
        let head: Vec<_> = spec.args.iter().take(5).cloned().collect();
        assert_eq!(
            head,
            ["-m", "yt_dlp", "--js-runtimes", "node", "-x"].map(OsString::from)
        );
        assert_eq!(spec.args.last().unwrap(), "https://www.youtube.com/playlist?list=PL123");
    }

    #[test]
    fn js_runtime_preference() {
        assert!(js_runtime_args_with(|n| n == "deno" || n == "node").is_empty());
        assert_eq!(js_runtime_args_with(|n| n == "node" || n == "bun"), ["--js-runtimes", "node"]);
        assert_eq!(js_runtime_args_with(|n| n == "bun"), ["--js-runtimes", "bun"]);
        assert!(js_runtime_args_with(|_| false).is_empty());
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let spec = CommandSpec {
            program: "/definitely/not/installed/yt-dlp".into(),
            args: Vec::new(),
        };
        match ProcessHandle::start(&spec) {
            Err(SessionError::Spawn { program, .. }) => {
                assert_eq!(program, PathBuf::from("/definitely/not/installed/yt-dlp"));
            }
            other => panic!("expected spawn error, got {:?}", other.err()),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn lines_arrive_in_order_and_trimmed() {
        let mut handle = ProcessHandle::start(&sh("printf 'one\\ntwo  \\n\\nthree\\r\\nfour'")).unwrap();
        assert_eq!(collect(&mut handle).await, ["one", "two", "three", "four"]);
        assert_eq!(handle.exit_status().await.unwrap(), Some(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stderr_is_merged_and_exit_code_reported() {
        let mut handle = ProcessHandle::start(&sh(
            "echo out1; echo 'ERROR: boom' >&2; echo out2; echo 'WARNING: w' >&2; exit 3",
        ))
        .unwrap();
        assert_eq!(
            collect(&mut handle).await,
            ["out1", "ERROR: boom", "out2", "WARNING: w"]
        );
        assert_eq!(handle.exit_status().await.unwrap(), Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_kills_and_ends_stream() {
        let mut handle = ProcessHandle::start(&sh("echo started; exec sleep 30")).unwrap();
        assert_eq!(handle.read_line().await.as_deref(), Some("started"));
        handle.cancel();
        let rest = tokio::time::timeout(std::time::Duration::from_secs(10), collect(&mut handle))
            .await
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(handle.exit_status().await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_takes_down_background_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let late = dir.path().join("02 - A - B.mp3");
        let script = format!(
            "(sleep 2; touch '{}') >/dev/null 2>&1 & echo started; exec sleep 30",
            late.display()
        );
        let mut handle = ProcessHandle::start(&sh(&script)).unwrap();
        assert_eq!(handle.read_line().await.as_deref(), Some("started"));
        handle.cancel();
        let rest = tokio::time::timeout(std::time::Duration::from_secs(10), collect(&mut handle))
            .await
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(handle.exit_status().await.unwrap(), None);

        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        assert!(!late.exists(), "helper kept running after cancel");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ytdlp_arguments_reach_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-yt-dlp.sh");
        std::fs::write(&script, "for a in \"$@\"; do printf '%s\\n' \"$a\"; done\n").unwrap();

        let ytdlp = YtDlp::with_launcher("sh", vec![script.into_os_string()]);
        let spec = ytdlp.command(&request(dir.path()));
        let mut handle = ProcessHandle::start(&spec).unwrap();
        let lines = collect(&mut handle).await;

        let expected_template = output_template(dir.path()).to_string_lossy().into_owned();
        assert_eq!(lines.first().map(String::as_str), Some("-x"));
        assert!(lines.contains(&expected_template));
        assert_eq!(
            lines.last().map(String::as_str),
            Some("https://www.youtube.com/playlist?list=PL123")
        );
        assert_eq!(handle.exit_status().await.unwrap(), Some(0));
    }
}
