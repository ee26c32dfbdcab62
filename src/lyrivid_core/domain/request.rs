use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::error::ExportError;

/// Aspect-fit policy for scaling the background video to the output size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Scale up preserving ratio, center-crop the excess.
    #[default]
    Cover,
    /// Scale down preserving ratio, pad with black to fill.
    Contain,
    /// Anamorphic scale to the exact output size.
    Stretch,
}

/// Immutable description of one export. Validated once on `start`; every
/// derived quantity below is a pure function of these fields so all three
/// steps agree on frame counts and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub session_id: String,
    /// Output frame rate. Positive and finite; fractional rates (29.97) are
    /// allowed.
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub start_ms: u64,
    pub end_ms: u64,
    pub output_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_video_path: Option<PathBuf>,
    #[serde(default)]
    pub background_fit: FitMode,
}

impl ExportRequest {
    /// Reject requests the pipeline cannot honor. Runs before any session
    /// state or temp directory is created.
    pub fn validate(&self) -> Result<(), ExportError> {
        if self.session_id.is_empty()
            || !self
                .session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(ExportError::InvalidRequest(format!(
                "session id must be a non-empty [A-Za-z0-9._-] name, got {:?}",
                self.session_id
            )));
        }
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(ExportError::InvalidRequest(format!(
                "fps must be positive and finite, got {}",
                self.fps
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ExportError::InvalidRequest(format!(
                "output size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        // yuv420p subsampling needs even dimensions on both axes.
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(ExportError::InvalidRequest(format!(
                "output size must be even for yuv420p, got {}x{}",
                self.width, self.height
            )));
        }
        if self.end_ms <= self.start_ms {
            return Err(ExportError::InvalidRequest(format!(
                "time range must be non-empty, got [{}, {})",
                self.start_ms, self.end_ms
            )));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(ExportError::InvalidRequest(
                "output path must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }

    /// Number of frames the pipeline must produce. Always >= 1 for a valid
    /// request (positive duration times positive fps, rounded up).
    pub fn total_frames(&self) -> u64 {
        let frames = (self.total_duration_ms() as f64 / 1000.0 * self.fps).ceil();
        (frames as u64).max(1)
    }

    /// Encoder tick duration in microseconds; frame `n` is submitted at
    /// `n * dt_us`.
    pub fn dt_us(&self) -> u64 {
        (1_000_000.0 / self.fps).round() as u64
    }

    /// Keyframe cadence in frames (one keyframe every two seconds).
    pub fn gop_frames(&self) -> u32 {
        ((2.0 * self.fps).round() as u32).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_30fps_1s() -> ExportRequest {
        ExportRequest {
            session_id: "test-session".to_string(),
            fps: 30.0,
            width: 640,
            height: 480,
            start_ms: 0,
            end_ms: 1000,
            output_path: PathBuf::from("/tmp/out.mp4"),
            audio_path: None,
            background_video_path: None,
            background_fit: FitMode::default(),
        }
    }

    #[test]
    fn derived_values_for_a_plain_30fps_second() {
        let request = request_30fps_1s();
        request.validate().expect("request should be valid");
        assert_eq!(request.total_frames(), 30);
        assert_eq!(request.dt_us(), 33_333);
        assert_eq!(request.total_duration_ms(), 1000);
        assert_eq!(request.gop_frames(), 60);
    }

    #[test]
    fn sixty_fps_over_one_second_yields_exactly_sixty_frames() {
        let mut request = request_30fps_1s();
        request.fps = 60.0;
        assert_eq!(request.total_frames(), 60);
        assert_eq!(request.dt_us(), 16_667);
    }

    #[test]
    fn partial_trailing_frame_rounds_up() {
        let mut request = request_30fps_1s();
        // 1.01 s at 30 fps is 30.3 frame durations; the tail still needs a frame.
        request.end_ms = 1010;
        assert_eq!(request.total_frames(), 31);
    }

    #[test]
    fn single_frame_request_is_valid() {
        let mut request = request_30fps_1s();
        request.end_ms = 1;
        request.validate().expect("1 ms range should be valid");
        assert_eq!(request.total_frames(), 1);
    }

    #[test]
    fn odd_dimensions_are_rejected() {
        let mut request = request_30fps_1s();
        request.width = 641;
        let err = request.validate().expect_err("odd width must be rejected");
        assert_eq!(err.kind(), "invalidRequest");
    }

    #[test]
    fn empty_and_reversed_ranges_are_rejected() {
        let mut request = request_30fps_1s();
        request.end_ms = request.start_ms;
        assert!(request.validate().is_err());
        request.start_ms = 500;
        request.end_ms = 400;
        assert!(request.validate().is_err());
    }

    #[test]
    fn session_id_with_path_separators_is_rejected() {
        let mut request = request_30fps_1s();
        request.session_id = "../escape".to_string();
        assert!(request.validate().is_err());
    }

    #[test]
    fn fit_mode_serializes_lowercase() {
        let json = serde_json::to_string(&FitMode::Contain).expect("serialize");
        assert_eq!(json, "\"contain\"");
        let parsed: FitMode = serde_json::from_str("\"stretch\"").expect("deserialize");
        assert_eq!(parsed, FitMode::Stretch);
    }
}
