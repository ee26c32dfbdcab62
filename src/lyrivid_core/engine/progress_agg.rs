use std::time::Instant;

use crate::lyrivid_core::domain::{ExportStep, ProgressEvent, STEP_COUNT};

/// Folds per-step progress into the single monotone `overall_progress`
/// stream and computes a per-step ETA.
///
/// Step weights: background prep 10 % (0 % when skipped), encoding 80 %
/// (90 % when step 1 is skipped), muxing 10 %. Regressions (a tool
/// restarting its time counter, a recomputed estimate) are clamped to the
/// last emitted value so subscribers never see progress move backwards.
pub(crate) struct ProgressAggregator {
    session_id: String,
    bands: [(f64, f64); 3],
    step: ExportStep,
    step_started: Instant,
    last_overall: f64,
}

impl ProgressAggregator {
    pub(crate) fn new(session_id: &str, background_skipped: bool) -> Self {
        let bands = if background_skipped {
            [(0.0, 0.0), (0.0, 0.9), (0.9, 1.0)]
        } else {
            [(0.0, 0.1), (0.1, 0.9), (0.9, 1.0)]
        };
        Self {
            session_id: session_id.to_string(),
            bands,
            step: ExportStep::BackgroundPrep,
            step_started: Instant::now(),
            last_overall: 0.0,
        }
    }

    /// Enter a step; resets the ETA baseline and reports the step at zero.
    pub(crate) fn begin_step(&mut self, step: ExportStep) -> ProgressEvent {
        self.step = step;
        self.step_started = Instant::now();
        self.event(0.0)
    }

    /// One sample of the current step's progress in `[0, 1]`.
    pub(crate) fn sample(&mut self, step_progress: f64) -> ProgressEvent {
        self.event(step_progress.clamp(0.0, 1.0))
    }

    /// Terminal sample: the session succeeded, overall lands exactly at 1.0.
    pub(crate) fn complete(&mut self) -> ProgressEvent {
        self.step = ExportStep::Muxing;
        let mut event = self.event(1.0);
        event.overall_progress = 1.0;
        self.last_overall = 1.0;
        event
    }

    fn event(&mut self, step_progress: f64) -> ProgressEvent {
        let (band_start, band_end) = self.bands[(self.step.index() - 1) as usize];
        let overall = band_start + step_progress * (band_end - band_start);
        let overall = if overall > self.last_overall {
            overall
        } else {
            self.last_overall
        };
        self.last_overall = overall;

        let eta_seconds = if step_progress > 0.0 && step_progress < 1.0 {
            let elapsed = self.step_started.elapsed().as_secs_f64();
            Some(elapsed * (1.0 - step_progress) / step_progress)
        } else {
            None
        };

        ProgressEvent {
            session_id: self.session_id.clone(),
            step_index: self.step.index(),
            step_count: STEP_COUNT,
            step_name: self.step,
            step_progress,
            overall_progress: overall,
            eta_seconds,
        }
    }
}
