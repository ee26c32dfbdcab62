// The deterministic core: one rendered frame per scheduled timestamp, one
// encoder submission per frame, backpressure without drops.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::background::BackgroundFrameIndex;
use super::progress_agg::ProgressAggregator;
use super::state::{Inner, append_session_log, emit_progress};
use super::temp_session::TempSession;
use crate::lyrivid_core::cancel::CancelToken;
use crate::lyrivid_core::domain::{ExportError, ExportRequest, ExportStep, Timeline};
use crate::lyrivid_core::encode::{
    ChunkCallback, EncoderConfig, RESOLUTION_HINT, VideoEncoder,
};
use crate::lyrivid_core::render::{PixelBuffer, SceneRenderer};

/// Cooperative yield inside the backpressure wait.
const BACKPRESSURE_POLL: Duration = Duration::from_millis(1);

/// Step 2: drive the scene renderer and encoder in lockstep over the
/// timeline.
///
/// For each `n`, the scene is advanced to `timeline[n]`, composited with
/// background frame `n` when an index exists, rendered once, and submitted
/// at `pts = n * dt_us` with a keyframe exactly every GOP frames. The only
/// suspension points are the backpressure wait and the final flush; nothing
/// yields between `set_time` and `submit`, which is what keeps frame `n` a
/// pure function of the timeline.
pub(crate) fn run_lockstep(
    inner: &Arc<Inner>,
    request: &ExportRequest,
    timeline: &Timeline,
    bg_index: Option<&BackgroundFrameIndex>,
    temp: &TempSession,
    renderer: &mut dyn SceneRenderer,
    encoder: &mut dyn VideoEncoder,
    agg: &mut ProgressAggregator,
    cancel: &CancelToken,
) -> Result<(), ExportError> {
    let session_id = &request.session_id;
    let config = negotiate_config(request, encoder)?;
    append_session_log(
        inner,
        session_id,
        &format!(
            "encoder configured: {} {}x{} @ {} fps, gop {}",
            config.describe(),
            config.width,
            config.height,
            config.fps,
            config.gop
        ),
    );

    let sink = ChunkSink::create(&temp.h264_path())?;
    encoder
        .configure(&config, sink.callback())
        .map_err(|err| ExportError::Encoder(err.to_string()))?;

    let event = agg.begin_step(ExportStep::Encoding);
    emit_progress(inner, event);

    let total_frames = timeline.total_frames();
    let dt_us = request.dt_us();
    let gop = u64::from(request.gop_frames());
    let bound = inner.config.backpressure_frames;
    let mut buffer = PixelBuffer::new(request.width, request.height);

    for n in 0..total_frames {
        if cancel.is_cancelled() {
            encoder.close();
            return Err(ExportError::Cancelled);
        }
        // Drain the queue down before submitting so it holds at most
        // `bound` frames once the submission lands. No frame is ever
        // dropped to make room.
        wait_for_encoder_capacity(encoder, cancel, bound)?;

        let t_ms = timeline.frame_time_ms(n);
        renderer.set_time(t_ms);
        if let Some(index) = bg_index {
            renderer.set_background_frame(&index.frame_path(n))?;
        } else {
            renderer.freeze_background_at(t_ms);
        }
        renderer.render_into(&mut buffer)?;
        if let Err(err) = encoder.submit(&buffer, n * dt_us, n % gop == 0) {
            encoder.close();
            return Err(ExportError::Encoder(format!(
                "submit of frame {n} failed: {err}"
            )));
        }

        let event = agg.sample((n + 1) as f64 / total_frames as f64);
        emit_progress(inner, event);
    }

    encoder
        .flush()
        .map_err(|err| ExportError::Encoder(format!("flush failed: {err}")))?;

    let chunks_written = sink.finish()?;
    if chunks_written != total_frames {
        return Err(ExportError::Encoder(format!(
            "encoder produced {chunks_written} chunks for {total_frames} submissions"
        )));
    }
    append_session_log(
        inner,
        session_id,
        &format!("elementary stream complete: {chunks_written} frames"),
    );
    Ok(())
}

/// Try the candidate configurations in order; first supported wins.
fn negotiate_config(
    request: &ExportRequest,
    encoder: &dyn VideoEncoder,
) -> Result<EncoderConfig, ExportError> {
    let mut tried = Vec::new();
    for candidate in EncoderConfig::candidates(request) {
        if encoder.is_config_supported(&candidate) {
            return Ok(candidate);
        }
        tried.push(candidate.describe());
    }
    Err(ExportError::EncoderUnsupported {
        tried,
        hint: RESOLUTION_HINT.to_string(),
    })
}

fn wait_for_encoder_capacity(
    encoder: &mut dyn VideoEncoder,
    cancel: &CancelToken,
    bound: usize,
) -> Result<(), ExportError> {
    while encoder.queued_frames() >= bound.max(1) {
        if cancel.is_cancelled() {
            encoder.close();
            return Err(ExportError::Cancelled);
        }
        std::thread::sleep(BACKPRESSURE_POLL);
    }
    Ok(())
}

struct SinkState {
    writer: BufWriter<File>,
    chunks: u64,
    error: Option<std::io::Error>,
}

/// Appends encoder chunks to the elementary stream in arrival order. The
/// callback runs on the encoder's thread; write failures are parked here
/// and surfaced when the driver finishes the file.
pub(crate) struct ChunkSink {
    state: Arc<Mutex<SinkState>>,
}

impl ChunkSink {
    pub(crate) fn create(path: &Path) -> Result<Self, ExportError> {
        let file = File::create(path)?;
        Ok(Self {
            state: Arc::new(Mutex::new(SinkState {
                writer: BufWriter::new(file),
                chunks: 0,
                error: None,
            })),
        })
    }

    pub(crate) fn callback(&self) -> ChunkCallback {
        let state = self.state.clone();
        Box::new(move |chunk| {
            let mut state = state.lock().expect("chunk sink poisoned");
            if state.error.is_some() {
                return;
            }
            match state.writer.write_all(&chunk.data) {
                Ok(()) => state.chunks += 1,
                Err(err) => state.error = Some(err),
            }
        })
    }

    /// Flush and close the stream, reporting the number of chunks appended.
    pub(crate) fn finish(self) -> Result<u64, ExportError> {
        let mut state = self.state.lock().expect("chunk sink poisoned");
        if let Some(err) = state.error.take() {
            return Err(ExportError::Io(err));
        }
        state.writer.flush()?;
        Ok(state.chunks)
    }
}
