use std::path::PathBuf;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

static DEFAULT_TEMP_BASE: Lazy<PathBuf> = Lazy::new(|| std::env::temp_dir().join("lyrivid-sessions"));

/// Process-wide engine configuration. Not persisted; an embedding shell
/// builds one per process and hands it to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// ffmpeg binary used for frame extraction, encoding, and muxing.
    pub ffmpeg_path: PathBuf,
    /// Directory the per-session temp trees are created under.
    pub temp_base: PathBuf,
    /// Keep temp session directories after terminal states, for debugging.
    pub retain_temp: bool,
    /// Backpressure bound B: the encoder queue never holds more than this
    /// many frames after a submission returns.
    pub backpressure_frames: usize,
    /// Grace period between the polite quit and the forceful kill of an
    /// external tool process.
    pub kill_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            temp_base: DEFAULT_TEMP_BASE.clone(),
            retain_temp: false,
            backpressure_frames: 2,
            kill_grace_ms: 2000,
        }
    }
}

impl EngineConfig {
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"retainTemp":true}"#).expect("deserialize");
        assert!(config.retain_temp);
        assert_eq!(config.backpressure_frames, 2);
        assert_eq!(config.ffmpeg_path, PathBuf::from("ffmpeg"));
    }
}
