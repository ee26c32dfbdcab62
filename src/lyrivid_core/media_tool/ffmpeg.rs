// Supervised ffmpeg CLI implementation of the media tool capability.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{
    ExtractFramesSpec, MediaTool, MediaToolError, MuxSpec, ToolHeartbeat,
    build_extract_frames_args, build_mux_args, format_command_for_log, is_progress_end,
    parse_progress_line,
};
use crate::lyrivid_core::cancel::CancelToken;
use crate::lyrivid_core::domain::{MAX_LOG_LINES, render_log_tail};

const POLL: Duration = Duration::from_millis(50);

/// ffmpeg CLI wrapper. One instance may supervise runs for many sessions;
/// each call spawns a fresh child process.
pub struct FfmpegMediaTool {
    ffmpeg_path: PathBuf,
    kill_grace: Duration,
}

impl FfmpegMediaTool {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            kill_grace: Duration::from_secs(2),
        }
    }

    /// How long a cancelled child gets to exit after the polite `q` before
    /// it is killed outright.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    fn run_supervised(
        &self,
        args: Vec<String>,
        cancel: &CancelToken,
        on_heartbeat: &mut dyn FnMut(ToolHeartbeat),
        on_log_line: &mut dyn FnMut(&str),
    ) -> Result<(), MediaToolError> {
        let program = self.ffmpeg_path.to_string_lossy().into_owned();
        let command_line = format_command_for_log(&program, &args);
        debug!(command = %command_line, "launching media tool");
        on_log_line(&command_line);

        // stdin stays open: cancellation politely asks ffmpeg to stop by
        // writing `q`, which lets it close output files cleanly.
        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut child_stdin = child.stdin.take();
        let mut pump = StderrPump::spawn(&mut child);
        let mut recent_lines: VecDeque<String> = VecDeque::new();
        let mut quit_deadline: Option<Instant> = None;

        let mut handle_line =
            |line: String, recent: &mut VecDeque<String>| {
                if line.trim().is_empty() {
                    return;
                }
                if let Some(heartbeat) = parse_progress_line(&line) {
                    on_heartbeat(heartbeat);
                }
                if is_progress_end(&line) {
                    on_heartbeat(ToolHeartbeat {
                        end: true,
                        ..ToolHeartbeat::default()
                    });
                }
                on_log_line(&line);
                if recent.len() >= MAX_LOG_LINES {
                    recent.pop_front();
                }
                recent.push_back(line);
            };

        let status = loop {
            if cancel.is_cancelled() && quit_deadline.is_none() {
                send_quit(&mut child_stdin);
                quit_deadline = Some(Instant::now() + self.kill_grace);
            }
            if let Some(deadline) = quit_deadline
                && Instant::now() >= deadline
            {
                warn!("media tool ignored polite quit, killing");
                let _ = child.kill();
            }

            if let Some(line) = pump.recv_timeout(POLL) {
                handle_line(line, &mut recent_lines);
            }

            if let Some(status) = child.try_wait()? {
                pump.drain_available(|line| handle_line(line, &mut recent_lines));
                break status;
            }
        };
        pump.join();

        if cancel.is_cancelled() {
            return Err(MediaToolError::Cancelled);
        }

        if !status.success() {
            let status_desc = status.code().map_or_else(
                || "termination by signal".to_string(),
                |code| format!("exit code {code}"),
            );
            let lines: Vec<String> = recent_lines.into_iter().collect();
            return Err(MediaToolError::NonZeroExit {
                status: status_desc,
                command: command_line,
                log_tail: render_log_tail(&lines).unwrap_or_default(),
            });
        }
        Ok(())
    }
}

impl MediaTool for FfmpegMediaTool {
    fn extract_frames(
        &self,
        spec: &ExtractFramesSpec<'_>,
        cancel: &CancelToken,
        on_heartbeat: &mut dyn FnMut(ToolHeartbeat),
        on_log_line: &mut dyn FnMut(&str),
    ) -> Result<u64, MediaToolError> {
        let args = build_extract_frames_args(spec);
        self.run_supervised(args, cancel, on_heartbeat, on_log_line)?;
        Ok(count_extracted_frames(spec.out_dir)?)
    }

    fn mux_h264(
        &self,
        spec: &MuxSpec<'_>,
        cancel: &CancelToken,
        on_heartbeat: &mut dyn FnMut(ToolHeartbeat),
        on_log_line: &mut dyn FnMut(&str),
    ) -> Result<(), MediaToolError> {
        let args = build_mux_args(spec);
        self.run_supervised(args, cancel, on_heartbeat, on_log_line)
    }
}

fn send_quit(stdin: &mut Option<std::process::ChildStdin>) {
    if let Some(stdin) = stdin.as_mut() {
        let _ = stdin.write_all(b"q\n");
        let _ = stdin.flush();
    }
}

/// Count the `bg_*.jpg` files the extraction run actually produced. The
/// tool's own frame counter can lag its final flush, so the directory is
/// the source of truth for the completeness check.
fn count_extracted_frames(out_dir: &Path) -> std::io::Result<u64> {
    let mut count = 0u64;
    for entry in std::fs::read_dir(out_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("bg_") && name.ends_with(".jpg") {
            count += 1;
        }
    }
    Ok(count)
}

/// Forwards child stderr line-by-line onto a channel so the supervision
/// loop can interleave reads with cancellation checks without blocking.
struct StderrPump {
    rx: Option<std::sync::mpsc::Receiver<String>>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl StderrPump {
    fn spawn(child: &mut Child) -> Self {
        let Some(stderr) = child.stderr.take() else {
            return Self { rx: None, join: None };
        };

        let (tx, rx) = std::sync::mpsc::channel::<String>();
        let join = std::thread::spawn(move || {
            use std::io::BufRead as _;
            let reader = std::io::BufReader::new(stderr);
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            rx: Some(rx),
            join: Some(join),
        }
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Option<String> {
        let Some(rx) = self.rx.as_ref() else {
            std::thread::sleep(timeout);
            return None;
        };

        match rx.recv_timeout(timeout) {
            Ok(line) => Some(line),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => None,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                self.rx = None;
                None
            }
        }
    }

    fn drain_available(&mut self, mut on_line: impl FnMut(String)) {
        let Some(rx) = self.rx.as_ref() else {
            return;
        };

        loop {
            match rx.try_recv() {
                Ok(line) => on_line(line),
                Err(std::sync::mpsc::TryRecvError::Empty) => break,
                Err(std::sync::mpsc::TryRecvError::Disconnected) => {
                    self.rx = None;
                    break;
                }
            }
        }
    }

    fn join(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
