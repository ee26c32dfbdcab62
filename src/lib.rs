pub mod lyrivid_core;

// Expose the session surface at the crate root so shells and tooling do not
// have to reach into the core module tree.
pub use crate::lyrivid_core::cancel::CancelToken;
pub use crate::lyrivid_core::config::EngineConfig;
pub use crate::lyrivid_core::domain::{
    ExportError, ExportRequest, ExportStep, FitMode, ProgressEvent, SessionSnapshot, SessionState,
    TerminalEvent, TerminalOutcome, Timeline,
};
pub use crate::lyrivid_core::encode::{
    EncodedChunk, EncoderConfig, EncoderError, FfmpegPipeEncoder, VideoEncoder,
};
pub use crate::lyrivid_core::engine::{ExportCapabilities, ExportEngine};
pub use crate::lyrivid_core::media_tool::{FfmpegMediaTool, MediaTool, ToolHeartbeat};
pub use crate::lyrivid_core::render::{PixelBuffer, SceneRenderer, TestCardRenderer};
