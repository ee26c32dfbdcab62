use serde::{Deserialize, Serialize};

/// One of the three top-level export phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExportStep {
    BackgroundPrep,
    Encoding,
    Muxing,
}

impl ExportStep {
    /// 1-based step index as surfaced in progress events.
    pub fn index(self) -> u8 {
        match self {
            ExportStep::BackgroundPrep => 1,
            ExportStep::Encoding => 2,
            ExportStep::Muxing => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ExportStep::BackgroundPrep => "backgroundPrep",
            ExportStep::Encoding => "encoding",
            ExportStep::Muxing => "muxing",
        }
    }
}

pub const STEP_COUNT: u8 = 3;

/// A single progress sample fanned out to every subscriber.
///
/// For one session the `overall_progress` sequence is monotone
/// non-decreasing and reaches exactly 1.0 iff the session succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub session_id: String,
    pub step_index: u8,
    pub step_count: u8,
    pub step_name: ExportStep,
    pub step_progress: f64,
    pub overall_progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
}
