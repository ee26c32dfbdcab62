use super::request::ExportRequest;

/// The ordered presentation timestamps an export samples the scene at.
///
/// `timeline[n] = start_ms + round(n * 1000 / fps)`; a pure function of
/// `(start_ms, fps, n)`, created once per session and read-only thereafter.
/// The scene is advanced to `timeline[n]` while the encoder receives
/// `n * dt_us`, which is what pins the output to constant frame rate
/// regardless of where the export window starts.
#[derive(Debug, Clone)]
pub struct Timeline {
    start_ms: u64,
    fps: f64,
    total_frames: u64,
}

impl Timeline {
    pub fn new(request: &ExportRequest) -> Self {
        Self {
            start_ms: request.start_ms,
            fps: request.fps,
            total_frames: request.total_frames(),
        }
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Scene time for frame `n` in milliseconds. Monotone non-decreasing in
    /// `n`; strictly increasing for every fps <= 1000.
    pub fn frame_time_ms(&self, n: u64) -> u64 {
        self.start_ms + (n as f64 * 1000.0 / self.fps).round() as u64
    }
}
