// Production encoder: ffmpeg as a child process, rawvideo RGBA frames on
// stdin, AnnexB H.264 access units on stdout.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::JoinHandle;

use tracing::debug;

use super::{
    AccessUnitSplitter, ChunkCallback, EncodedChunk, EncoderConfig, EncoderError, VideoEncoder,
    access_unit_is_idr,
};
use crate::lyrivid_core::media_tool::format_command_for_log;
use crate::lyrivid_core::render::PixelBuffer;

const STDERR_CAPTURE_LIMIT: usize = 16 * 1024;

/// Software H.264 encoder over an ffmpeg pipe.
///
/// The keyframe cadence is baked into the configuration (`-g`, scene-cut
/// detection off), so the stream's keyframe positions are a pure function
/// of the frame index; the per-submit flag is validated against that
/// cadence rather than steering the encoder. Access unit delimiters are
/// requested so the output splits exactly one chunk per submitted frame.
pub struct FfmpegPipeEncoder {
    ffmpeg_path: PathBuf,
    queue_depth: Arc<AtomicUsize>,
    error: Arc<Mutex<Option<String>>>,
    running: Option<Running>,
    config: Option<EncoderConfig>,
    submitted: u64,
}

struct Running {
    child: Child,
    frame_tx: Option<mpsc::Sender<Vec<u8>>>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<String>>,
}

impl FfmpegPipeEncoder {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            queue_depth: Arc::new(AtomicUsize::new(0)),
            error: Arc::new(Mutex::new(None)),
            running: None,
            config: None,
            submitted: 0,
        }
    }

    fn pending_error(&self) -> Option<String> {
        self.error.lock().expect("encoder error slot poisoned").clone()
    }

    fn set_error(slot: &Arc<Mutex<Option<String>>>, message: String) {
        let mut guard = slot.lock().expect("encoder error slot poisoned");
        guard.get_or_insert(message);
    }
}

pub(crate) fn build_encoder_args(config: &EncoderConfig) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    for arg in [
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgba",
    ] {
        args.push(arg.to_string());
    }
    args.push("-s".to_string());
    args.push(format!("{}x{}", config.width, config.height));
    args.push("-r".to_string());
    args.push(crate::lyrivid_core::media_tool::format_fps(config.fps));
    args.push("-i".to_string());
    args.push("pipe:0".to_string());

    args.push("-an".to_string());
    args.push("-c:v".to_string());
    args.push("libx264".to_string());
    args.push("-preset".to_string());
    args.push("medium".to_string());
    args.push("-crf".to_string());
    args.push("18".to_string());
    args.push("-profile:v".to_string());
    args.push("high".to_string());
    args.push("-level:v".to_string());
    args.push(config.level.as_str().to_string());
    args.push("-pix_fmt".to_string());
    args.push("yuv420p".to_string());

    // Fixed cadence: keyframe exactly every GOP frames, no scene cuts, and
    // an AUD in front of every access unit for downstream splitting.
    args.push("-g".to_string());
    args.push(config.gop.to_string());
    args.push("-keyint_min".to_string());
    args.push(config.gop.to_string());
    args.push("-sc_threshold".to_string());
    args.push("0".to_string());
    args.push("-x264-params".to_string());
    args.push("aud=1".to_string());

    args.push("-f".to_string());
    args.push("h264".to_string());
    args.push("pipe:1".to_string());
    args
}

impl VideoEncoder for FfmpegPipeEncoder {
    fn is_config_supported(&self, config: &EncoderConfig) -> bool {
        config.fits_level()
            && config.width % 2 == 0
            && config.height % 2 == 0
            && config.fps.is_finite()
            && config.fps > 0.0
    }

    fn configure(
        &mut self,
        config: &EncoderConfig,
        mut on_chunk: ChunkCallback,
    ) -> Result<(), EncoderError> {
        if self.running.is_some() {
            return Err(EncoderError::new("encoder already configured"));
        }
        if !self.is_config_supported(config) {
            return Err(EncoderError::new(format!(
                "unsupported configuration {}",
                config.describe()
            )));
        }

        let args = build_encoder_args(config);
        debug!(
            command = %format_command_for_log(&self.ffmpeg_path.to_string_lossy(), &args),
            "launching pipe encoder"
        );
        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| EncoderError::new(format!("failed to spawn encoder: {err}")))?;

        let mut stdin = child.stdin.take().expect("encoder stdin requested");
        let stdout = child.stdout.take().expect("encoder stdout requested");
        let stderr = child.stderr.take().expect("encoder stderr requested");

        let (frame_tx, frame_rx) = mpsc::channel::<Vec<u8>>();

        let depth = self.queue_depth.clone();
        let writer_error = self.error.clone();
        let writer = std::thread::Builder::new()
            .name("lyrivid-enc-writer".to_string())
            .spawn(move || {
                let mut failed = false;
                while let Ok(frame) = frame_rx.recv() {
                    if !failed
                        && let Err(err) = stdin.write_all(&frame)
                    {
                        FfmpegPipeEncoder::set_error(
                            &writer_error,
                            format!("encoder pipe write failed: {err}"),
                        );
                        // Keep draining so the queue accounting stays exact.
                        failed = true;
                    }
                    depth.fetch_sub(1, Ordering::AcqRel);
                }
                // Dropping stdin here closes the pipe; ffmpeg drains and exits.
            })
            .map_err(|err| EncoderError::new(format!("failed to spawn writer thread: {err}")))?;

        let reader_error = self.error.clone();
        let dt_us = config.dt_us();
        let reader = std::thread::Builder::new()
            .name("lyrivid-enc-reader".to_string())
            .spawn(move || {
                let mut splitter = AccessUnitSplitter::new();
                let mut produced: u64 = 0;
                let mut emit = |au: Vec<u8>| {
                    let chunk = EncodedChunk {
                        is_key: access_unit_is_idr(&au),
                        timestamp_us: produced * dt_us,
                        duration_us: Some(dt_us),
                        data: au,
                    };
                    produced += 1;
                    on_chunk(chunk);
                };

                let mut stdout = stdout;
                let mut buf = [0u8; 64 * 1024];
                loop {
                    match stdout.read(&mut buf) {
                        Ok(0) => break,
                        Ok(len) => splitter.push(&buf[..len], &mut emit),
                        Err(err) => {
                            FfmpegPipeEncoder::set_error(
                                &reader_error,
                                format!("encoder pipe read failed: {err}"),
                            );
                            return;
                        }
                    }
                }
                splitter.finish(&mut emit);
            })
            .map_err(|err| EncoderError::new(format!("failed to spawn reader thread: {err}")))?;

        let stderr_join = std::thread::Builder::new()
            .name("lyrivid-enc-stderr".to_string())
            .spawn(move || {
                let mut stderr = stderr;
                let mut captured: Vec<u8> = Vec::new();
                let mut buf = [0u8; 8192];
                loop {
                    let n = match stderr.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => n,
                        Err(_) => break,
                    };
                    if captured.len() < STDERR_CAPTURE_LIMIT {
                        let remaining = STDERR_CAPTURE_LIMIT - captured.len();
                        captured.extend_from_slice(&buf[..remaining.min(n)]);
                    }
                }
                String::from_utf8_lossy(&captured).into_owned()
            })
            .map_err(|err| EncoderError::new(format!("failed to spawn stderr thread: {err}")))?;

        self.running = Some(Running {
            child,
            frame_tx: Some(frame_tx),
            writer: Some(writer),
            reader: Some(reader),
            stderr: Some(stderr_join),
        });
        self.config = Some(config.clone());
        self.submitted = 0;
        Ok(())
    }

    fn submit(
        &mut self,
        frame: &PixelBuffer,
        pts_us: u64,
        key_frame: bool,
    ) -> Result<(), EncoderError> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| EncoderError::new("encoder not configured"))?;
        if let Some(message) = self.pending_error() {
            return Err(EncoderError::new(message));
        }

        let expected_pts = self.submitted * config.dt_us();
        if pts_us != expected_pts {
            return Err(EncoderError::new(format!(
                "non-monotonic submission: frame {} expected pts {expected_pts}, got {pts_us}",
                self.submitted
            )));
        }
        let expected_key = self.submitted % u64::from(config.gop) == 0;
        if key_frame != expected_key {
            return Err(EncoderError::new(format!(
                "key-frame flag for frame {} does not match the configured cadence",
                self.submitted
            )));
        }

        let expected_len = frame.width() as usize * frame.height() as usize * 4;
        if frame.data().len() != expected_len {
            return Err(EncoderError::new("pixel buffer size mismatch"));
        }

        let running = self
            .running
            .as_ref()
            .ok_or_else(|| EncoderError::new("encoder closed"))?;
        let Some(tx) = running.frame_tx.as_ref() else {
            return Err(EncoderError::new("encoder already flushed"));
        };
        self.queue_depth.fetch_add(1, Ordering::AcqRel);
        if tx.send(frame.data().to_vec()).is_err() {
            self.queue_depth.fetch_sub(1, Ordering::AcqRel);
            return Err(EncoderError::new("encoder pipeline terminated"));
        }
        self.submitted += 1;
        Ok(())
    }

    fn queued_frames(&self) -> usize {
        self.queue_depth.load(Ordering::Acquire)
    }

    fn flush(&mut self) -> Result<(), EncoderError> {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };

        // Closing the channel lets the writer drain and close stdin, which
        // is how ffmpeg learns the stream ended.
        drop(running.frame_tx.take());
        if let Some(writer) = running.writer.take() {
            let _ = writer.join();
        }
        if let Some(reader) = running.reader.take() {
            let _ = reader.join();
        }
        let status = running
            .child
            .wait()
            .map_err(|err| EncoderError::new(format!("encoder wait failed: {err}")))?;
        let stderr_tail = running
            .stderr
            .take()
            .and_then(|j| j.join().ok())
            .unwrap_or_default();

        if let Some(message) = self.pending_error() {
            return Err(EncoderError::new(format!("{message}; {stderr_tail}")));
        }
        if !status.success() {
            return Err(EncoderError::new(format!(
                "encoder exited with {status}: {stderr_tail}"
            )));
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut running) = self.running.take() {
            drop(running.frame_tx.take());
            let _ = running.child.kill();
            let _ = running.child.wait();
            if let Some(writer) = running.writer.take() {
                let _ = writer.join();
            }
            if let Some(reader) = running.reader.take() {
                let _ = reader.join();
            }
            if let Some(stderr) = running.stderr.take() {
                let _ = stderr.join();
            }
        }
    }
}

impl Drop for FfmpegPipeEncoder {
    fn drop(&mut self) {
        self.close();
    }
}
