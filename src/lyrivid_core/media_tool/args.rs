// ffmpeg argument builders for the two supervised runs: background frame
// extraction (step 1) and the final mux (step 3).

use super::{ExtractFramesSpec, MuxSpec};
use crate::lyrivid_core::domain::FitMode;

/// Render an fps value the way ffmpeg filter args expect it: integral rates
/// without a trailing `.0`, fractional rates as-is.
pub(crate) fn format_fps(fps: f64) -> String {
    if fps.fract() == 0.0 {
        format!("{}", fps as u64)
    } else {
        format!("{fps}")
    }
}

fn format_seconds_ms(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

/// Make sure the structured progress stream is requested exactly once, in
/// front of everything else.
fn ensure_progress_args(args: &mut Vec<String>) {
    if args.iter().any(|arg| arg == "-progress") {
        return;
    }
    args.insert(0, "pipe:2".to_string());
    args.insert(0, "-progress".to_string());
}

/// Aspect-fit filter for the requested mode. The `fps` filter in front
/// resamples the (possibly variable-rate) background to exactly one decoded
/// frame per output frame before scaling.
fn fit_filter(fit: FitMode, width: u32, height: u32, fps: f64) -> String {
    let rate = format_fps(fps);
    match fit {
        FitMode::Cover => format!(
            "fps={rate},scale={width}:{height}:force_original_aspect_ratio=increase,crop={width}:{height}"
        ),
        FitMode::Contain => format!(
            "fps={rate},scale={width}:{height}:force_original_aspect_ratio=decrease,pad={width}:{height}:(ow-iw)/2:(oh-ih)/2:color=black"
        ),
        FitMode::Stretch => format!("fps={rate},scale={width}:{height}"),
    }
}

/// Arguments for the step-1 extraction run: decode the background video,
/// trim to the export window, aspect-fit to the output size, and write the
/// deterministic `bg_%06d.jpg` sequence starting at 0.
pub(crate) fn build_extract_frames_args(spec: &ExtractFramesSpec<'_>) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    ensure_progress_args(&mut args);
    args.push("-hide_banner".to_string());
    args.push("-y".to_string());

    if spec.start_ms > 0 {
        args.push("-ss".to_string());
        args.push(format_seconds_ms(spec.start_ms));
    }
    args.push("-i".to_string());
    args.push(spec.input.to_string_lossy().into_owned());
    args.push("-t".to_string());
    args.push(format_seconds_ms(spec.end_ms - spec.start_ms));

    args.push("-vf".to_string());
    args.push(fit_filter(spec.fit, spec.width, spec.height, spec.fps));

    args.push("-q:v".to_string());
    args.push(spec.jpeg_quality.to_string());
    args.push("-start_number".to_string());
    args.push("0".to_string());
    args.push("-f".to_string());
    args.push("image2".to_string());
    args.push(
        spec.out_dir
            .join("bg_%06d.jpg")
            .to_string_lossy()
            .into_owned(),
    );
    args
}

/// Arguments for the step-3 mux run.
///
/// The elementary stream is read at the export rate, re-encoded behind a
/// CFR-enforcing `fps` filter, and bounded by both the exact frame count
/// and the output duration so the container length matches the request.
/// The explicit track timescale keeps the reported average frame rate
/// stable, and `+faststart` moves the moov atom to the file head.
pub(crate) fn build_mux_args(spec: &MuxSpec<'_>) -> Vec<String> {
    let rate = format_fps(spec.fps);
    let duration = format_seconds_ms(spec.total_duration_ms);

    let mut args: Vec<String> = Vec::new();
    ensure_progress_args(&mut args);
    args.push("-hide_banner".to_string());
    args.push("-y".to_string());

    args.push("-r".to_string());
    args.push(rate.clone());
    args.push("-f".to_string());
    args.push("h264".to_string());
    args.push("-i".to_string());
    args.push(spec.h264_path.to_string_lossy().into_owned());

    if let Some(audio) = spec.audio_path {
        if spec.audio_start_ms > 0 {
            args.push("-ss".to_string());
            args.push(format_seconds_ms(spec.audio_start_ms));
        }
        args.push("-i".to_string());
        args.push(audio.to_string_lossy().into_owned());
        args.push("-map".to_string());
        args.push("0:v:0".to_string());
        args.push("-map".to_string());
        args.push("1:a:0".to_string());
        args.push("-c:a".to_string());
        args.push("aac".to_string());
        args.push("-b:a".to_string());
        args.push("192k".to_string());
    } else {
        args.push("-map".to_string());
        args.push("0:v:0".to_string());
        args.push("-an".to_string());
    }

    args.push("-vf".to_string());
    args.push(format!("fps={rate}:round=up"));
    args.push("-c:v".to_string());
    args.push("libx264".to_string());
    args.push("-preset".to_string());
    args.push("medium".to_string());
    args.push("-crf".to_string());
    args.push("18".to_string());
    args.push("-pix_fmt".to_string());
    args.push("yuv420p".to_string());

    args.push("-frames:v".to_string());
    args.push(spec.total_frames.to_string());
    args.push("-t".to_string());
    args.push(duration);

    args.push("-video_track_timescale".to_string());
    args.push(((spec.fps * 1000.0).round() as u64).to_string());
    args.push("-movflags".to_string());
    args.push("+faststart".to_string());

    args.push(spec.output_path.to_string_lossy().into_owned());
    args
}

/// Build a human-readable command line for diagnostics, quoting arguments
/// that contain spaces so the line can be copy/pasted when reproducing a
/// failing run.
pub fn format_command_for_log(program: &str, args: &[String]) -> String {
    fn quote_arg(arg: &str) -> String {
        if arg.contains(' ') {
            format!("\"{arg}\"")
        } else {
            arg.to_string()
        }
    }

    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(quote_arg(program));
    for arg in args {
        parts.push(quote_arg(arg));
    }
    parts.join(" ")
}
