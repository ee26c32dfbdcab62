use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

use crate::lyrivid_core::cancel::CancelToken;
use crate::lyrivid_core::config::EngineConfig;
use crate::lyrivid_core::domain::{
    ExportRequest, FitMode, ProgressEvent, TerminalEvent,
};
use crate::lyrivid_core::encode::{
    ChunkCallback, EncodedChunk, EncoderConfig, EncoderError, H264Level, VideoEncoder,
};
use crate::lyrivid_core::engine::{ExportCapabilities, ExportEngine};
use crate::lyrivid_core::media_tool::{
    ExtractFramesSpec, MediaTool, MediaToolError, MuxSpec, ToolHeartbeat,
};
use crate::lyrivid_core::render::{PixelBuffer, SceneRenderer};

pub(super) const TERMINAL_WAIT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Renderer stub
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(super) struct RendererLog {
    pub set_times: Vec<u64>,
    pub backgrounds: Vec<PathBuf>,
    pub freezes: Vec<u64>,
    pub renders: u64,
}

/// Deterministic renderer that records every driver command. Optionally
/// cancels the session after a given number of frames, waiting for the test
/// to hand over the engine so the cut point is exact.
pub(super) struct StubRenderer {
    pub log: Arc<Mutex<RendererLog>>,
    pub cancel_after_frames: Option<u64>,
    pub engine_slot: Arc<Mutex<Option<(ExportEngine, String)>>>,
}

impl StubRenderer {
    pub(super) fn new(log: Arc<Mutex<RendererLog>>) -> Self {
        Self {
            log,
            cancel_after_frames: None,
            engine_slot: Arc::new(Mutex::new(None)),
        }
    }
}

impl SceneRenderer for StubRenderer {
    fn set_time(&mut self, t_ms: u64) {
        let frames_so_far = {
            let mut log = self.log.lock().unwrap();
            log.set_times.push(t_ms);
            log.set_times.len() as u64
        };
        if let Some(cancel_after) = self.cancel_after_frames
            && frames_so_far == cancel_after + 1
        {
            // Block until the test has registered the engine, then cancel.
            loop {
                if let Some((engine, session_id)) = self.engine_slot.lock().unwrap().clone() {
                    engine.cancel(&session_id);
                    break;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    fn set_background_frame(&mut self, path: &Path) -> std::io::Result<()> {
        if !path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("missing background frame {}", path.display()),
            ));
        }
        self.log.lock().unwrap().backgrounds.push(path.to_path_buf());
        Ok(())
    }

    fn freeze_background_at(&mut self, t_ms: u64) {
        self.log.lock().unwrap().freezes.push(t_ms);
    }

    fn render_into(&mut self, buffer: &mut PixelBuffer) -> std::io::Result<()> {
        let mut log = self.log.lock().unwrap();
        log.renders += 1;
        let t = *log.set_times.last().unwrap_or(&0);
        buffer.data_mut().fill((t % 251) as u8);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Encoder stub
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(super) struct EncoderLog {
    pub configured: Option<EncoderConfig>,
    /// `(pts_us, key_frame, queued_after_submit)` per submission.
    pub submissions: Vec<(u64, bool, usize)>,
    pub flushed: bool,
    pub closed: bool,
}

/// In-process encoder: every submission immediately emits one chunk whose
/// payload is the big-endian pts, so sink content and ordering are fully
/// checkable. The simulated queue drains by one on every `queued_frames`
/// poll, which exercises the driver's backpressure wait deterministically.
pub(super) struct StubEncoder {
    pub log: Arc<Mutex<EncoderLog>>,
    pub supported_levels: Vec<H264Level>,
    pub fail_submit_at: Option<u64>,
    pub swallow_chunks: bool,
    queue: Arc<AtomicUsize>,
    on_chunk: Option<ChunkCallback>,
}

impl StubEncoder {
    pub(super) fn new(log: Arc<Mutex<EncoderLog>>) -> Self {
        Self {
            log,
            supported_levels: vec![H264Level::L4_0, H264Level::L5_0],
            fail_submit_at: None,
            swallow_chunks: false,
            queue: Arc::new(AtomicUsize::new(0)),
            on_chunk: None,
        }
    }
}

impl VideoEncoder for StubEncoder {
    fn is_config_supported(&self, config: &EncoderConfig) -> bool {
        self.supported_levels.contains(&config.level)
    }

    fn configure(
        &mut self,
        config: &EncoderConfig,
        on_chunk: ChunkCallback,
    ) -> Result<(), EncoderError> {
        self.log.lock().unwrap().configured = Some(config.clone());
        self.on_chunk = Some(on_chunk);
        Ok(())
    }

    fn submit(
        &mut self,
        _frame: &PixelBuffer,
        pts_us: u64,
        key_frame: bool,
    ) -> Result<(), EncoderError> {
        let n = self.log.lock().unwrap().submissions.len() as u64;
        if self.fail_submit_at == Some(n) {
            return Err(EncoderError::new(format!("synthetic failure at frame {n}")));
        }
        let queued = self.queue.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.lock().unwrap().submissions.push((pts_us, key_frame, queued));
        if !self.swallow_chunks
            && let Some(on_chunk) = self.on_chunk.as_mut()
        {
            on_chunk(EncodedChunk {
                data: pts_us.to_be_bytes().to_vec(),
                is_key: key_frame,
                timestamp_us: pts_us,
                duration_us: None,
            });
        }
        Ok(())
    }

    fn queued_frames(&self) -> usize {
        // One frame leaves the queue per poll.
        let _ = self
            .queue
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |q| q.checked_sub(1));
        self.queue.load(Ordering::SeqCst)
    }

    fn flush(&mut self) -> Result<(), EncoderError> {
        self.log.lock().unwrap().flushed = true;
        Ok(())
    }

    fn close(&mut self) {
        self.log.lock().unwrap().closed = true;
    }
}

// ---------------------------------------------------------------------------
// Media tool stub
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(super) struct ExtractCall {
    pub input: PathBuf,
    pub out_dir: PathBuf,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub start_ms: u64,
    pub end_ms: u64,
    pub fit: FitMode,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub(super) struct MuxCall {
    pub h264_path: PathBuf,
    pub audio_path: Option<PathBuf>,
    pub fps: f64,
    pub total_frames: u64,
    pub total_duration_ms: u64,
    pub audio_start_ms: u64,
    pub output_path: PathBuf,
}

/// In-process media tool: writes real files where the engine expects them
/// and records every call for contract assertions.
#[derive(Default)]
pub(super) struct StubMediaTool {
    pub extract_calls: Mutex<Vec<ExtractCall>>,
    pub mux_calls: Mutex<Vec<MuxCall>>,
    /// Frames to write in step 1; `None` produces exactly the expected count.
    pub frames_to_produce: Option<u64>,
    pub fail_mux: bool,
    pub block_extract_until_cancel: bool,
}

impl StubMediaTool {
    fn expected_frames(spec: &ExtractFramesSpec<'_>) -> u64 {
        (((spec.end_ms - spec.start_ms) as f64 / 1000.0 * spec.fps).ceil() as u64).max(1)
    }
}

impl MediaTool for StubMediaTool {
    fn extract_frames(
        &self,
        spec: &ExtractFramesSpec<'_>,
        cancel: &CancelToken,
        on_heartbeat: &mut dyn FnMut(ToolHeartbeat),
        on_log_line: &mut dyn FnMut(&str),
    ) -> Result<u64, MediaToolError> {
        self.extract_calls.lock().unwrap().push(ExtractCall {
            input: spec.input.to_path_buf(),
            out_dir: spec.out_dir.to_path_buf(),
            fps: spec.fps,
            width: spec.width,
            height: spec.height,
            start_ms: spec.start_ms,
            end_ms: spec.end_ms,
            fit: spec.fit,
            jpeg_quality: spec.jpeg_quality,
        });
        on_log_line("stub extract started");
        on_heartbeat(ToolHeartbeat {
            out_time_ms: Some((spec.end_ms - spec.start_ms) / 2),
            ..ToolHeartbeat::default()
        });

        if self.block_extract_until_cancel {
            while !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(1));
            }
            return Err(MediaToolError::Cancelled);
        }

        let count = self
            .frames_to_produce
            .unwrap_or_else(|| Self::expected_frames(spec));
        for n in 0..count {
            std::fs::write(
                spec.out_dir.join(format!("bg_{n:06}.jpg")),
                b"stub-jpeg",
            )?;
        }
        on_heartbeat(ToolHeartbeat {
            end: true,
            ..ToolHeartbeat::default()
        });
        Ok(count)
    }

    fn mux_h264(
        &self,
        spec: &MuxSpec<'_>,
        cancel: &CancelToken,
        on_heartbeat: &mut dyn FnMut(ToolHeartbeat),
        on_log_line: &mut dyn FnMut(&str),
    ) -> Result<(), MediaToolError> {
        self.mux_calls.lock().unwrap().push(MuxCall {
            h264_path: spec.h264_path.to_path_buf(),
            audio_path: spec.audio_path.map(Path::to_path_buf),
            fps: spec.fps,
            total_frames: spec.total_frames,
            total_duration_ms: spec.total_duration_ms,
            audio_start_ms: spec.audio_start_ms,
            output_path: spec.output_path.to_path_buf(),
        });
        on_log_line("stub mux started");
        if cancel.is_cancelled() {
            return Err(MediaToolError::Cancelled);
        }
        if self.fail_mux {
            return Err(MediaToolError::NonZeroExit {
                status: "exit code 1".to_string(),
                command: "ffmpeg -f h264 ...".to_string(),
                log_tail: "stub muxer diagnostics".to_string(),
            });
        }

        // Step 2 must have closed the elementary stream before the mux runs.
        let elementary = std::fs::read(spec.h264_path)?;
        std::fs::write(spec.output_path, elementary)?;
        on_heartbeat(ToolHeartbeat {
            out_time_ms: Some(spec.total_duration_ms),
            ..ToolHeartbeat::default()
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub(super) struct Harness {
    pub engine: ExportEngine,
    pub renderer_log: Arc<Mutex<RendererLog>>,
    pub encoder_log: Arc<Mutex<EncoderLog>>,
    pub media_tool: Arc<StubMediaTool>,
    pub engine_slot: Arc<Mutex<Option<(ExportEngine, String)>>>,
    pub progress: Arc<Mutex<Vec<ProgressEvent>>>,
    pub terminal_rx: mpsc::Receiver<TerminalEvent>,
    pub temp_base: tempfile::TempDir,
    pub out_dir: tempfile::TempDir,
}

pub(super) struct HarnessOptions {
    pub media_tool: StubMediaTool,
    pub supported_levels: Vec<H264Level>,
    pub fail_submit_at: Option<u64>,
    pub swallow_chunks: bool,
    pub cancel_after_frames: Option<u64>,
    pub retain_temp: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            media_tool: StubMediaTool::default(),
            supported_levels: vec![H264Level::L4_0, H264Level::L5_0],
            fail_submit_at: None,
            swallow_chunks: false,
            cancel_after_frames: None,
            retain_temp: false,
        }
    }
}

pub(super) fn make_harness(options: HarnessOptions) -> Harness {
    let temp_base = tempfile::tempdir().expect("temp base");
    let out_dir = tempfile::tempdir().expect("out dir");
    let renderer_log = Arc::new(Mutex::new(RendererLog::default()));
    let encoder_log = Arc::new(Mutex::new(EncoderLog::default()));
    let media_tool = Arc::new(options.media_tool);
    let engine_slot: Arc<Mutex<Option<(ExportEngine, String)>>> = Arc::new(Mutex::new(None));

    let config = EngineConfig {
        temp_base: temp_base.path().to_path_buf(),
        retain_temp: options.retain_temp,
        ..EngineConfig::default()
    };

    let renderer_log_factory = renderer_log.clone();
    let engine_slot_factory = engine_slot.clone();
    let cancel_after_frames = options.cancel_after_frames;
    let encoder_log_factory = encoder_log.clone();
    let supported_levels = options.supported_levels;
    let fail_submit_at = options.fail_submit_at;
    let swallow_chunks = options.swallow_chunks;

    let capabilities = ExportCapabilities {
        new_renderer: Box::new(move |_request| {
            let mut renderer = StubRenderer::new(renderer_log_factory.clone());
            renderer.cancel_after_frames = cancel_after_frames;
            renderer.engine_slot = engine_slot_factory.clone();
            Box::new(renderer) as Box<dyn SceneRenderer>
        }),
        new_encoder: Box::new(move |_request| {
            let mut encoder = StubEncoder::new(encoder_log_factory.clone());
            encoder.supported_levels = supported_levels.clone();
            encoder.fail_submit_at = fail_submit_at;
            encoder.swallow_chunks = swallow_chunks;
            Box::new(encoder) as Box<dyn VideoEncoder>
        }),
        media_tool: media_tool.clone() as Arc<dyn MediaTool>,
    };

    let engine = ExportEngine::new(config, capabilities);

    let progress: Arc<Mutex<Vec<ProgressEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let progress_clone = progress.clone();
    engine.register_progress_listener(move |event| {
        progress_clone.lock().unwrap().push(event.clone());
    });
    let (terminal_tx, terminal_rx) = mpsc::channel();
    engine.register_terminal_listener(move |event| {
        let _ = terminal_tx.send(event.clone());
    });

    Harness {
        engine,
        renderer_log,
        encoder_log,
        media_tool,
        engine_slot,
        progress,
        terminal_rx,
        temp_base,
        out_dir,
    }
}

impl Harness {
    pub(super) fn request(&self, session_id: &str) -> ExportRequest {
        ExportRequest {
            session_id: session_id.to_string(),
            fps: 30.0,
            width: 640,
            height: 480,
            start_ms: 0,
            end_ms: 1000,
            output_path: self.out_dir.path().join(format!("{session_id}.mp4")),
            audio_path: None,
            background_video_path: None,
            background_fit: FitMode::default(),
        }
    }

    /// Start the session and publish the engine to the renderer stub so a
    /// `cancel_after_frames` renderer can fire.
    pub(super) fn start(&self, request: ExportRequest) -> String {
        let session_id = self.engine.start(request).expect("start session");
        *self.engine_slot.lock().unwrap() = Some((self.engine.clone(), session_id.clone()));
        session_id
    }

    pub(super) fn wait_terminal(&self) -> TerminalEvent {
        self.terminal_rx
            .recv_timeout(TERMINAL_WAIT)
            .expect("terminal event within the deadline")
    }

    pub(super) fn session_temp_dir(&self, session_id: &str) -> PathBuf {
        self.temp_base.path().join(session_id)
    }
}

/// Keep polling until the path disappears; drop guards may lag the terminal
/// event by a scheduler tick on slow machines.
pub(super) fn assert_path_eventually_gone(path: &Path, message: &str) {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while path.exists() {
        if std::time::Instant::now() > deadline {
            panic!("{message}: {} still exists", path.display());
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
