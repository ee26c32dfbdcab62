use std::path::PathBuf;
use std::sync::mpsc;

use clap::Parser;
use lyrivid::{
    EngineConfig, ExportCapabilities, ExportEngine, ExportRequest, FfmpegMediaTool,
    FfmpegPipeEncoder, FitMode, SceneRenderer, TerminalOutcome, TestCardRenderer, VideoEncoder,
};

/// Deterministic lyric-video export pipeline.
///
/// Renders the built-in test-card scene over the requested time range and
/// produces a constant-frame-rate MP4. Exit codes: 0 success, 1 failed,
/// 130 cancelled.
#[derive(Parser)]
#[command(name = "lyrivid")]
#[command(version)]
struct Cli {
    /// Output MP4 path.
    #[arg(short, long)]
    output: PathBuf,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// Export window start in milliseconds.
    #[arg(long, default_value_t = 0)]
    start_ms: u64,

    /// Export window end in milliseconds (exclusive).
    #[arg(long, default_value_t = 5000)]
    end_ms: u64,

    /// Audio file passed through to the output, trimmed to the window.
    #[arg(long)]
    audio: Option<PathBuf>,

    /// Background video pre-rasterized to one JPEG per frame.
    #[arg(long)]
    background: Option<PathBuf>,

    /// Aspect-fit mode for the background: cover, contain, or stretch.
    #[arg(long, value_enum, default_value_t = FitArg::Cover)]
    fit: FitArg,

    /// ffmpeg binary to use for extraction, encoding, and muxing.
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// Base directory for per-session temp trees.
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Keep the temp session directory after the export, for debugging.
    #[arg(long)]
    keep_temp: bool,

    /// Session id; generated from the process id when omitted.
    #[arg(long)]
    session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum FitArg {
    Cover,
    Contain,
    Stretch,
}

impl From<FitArg> for FitMode {
    fn from(fit: FitArg) -> Self {
        match fit {
            FitArg::Cover => FitMode::Cover,
            FitArg::Contain => FitMode::Contain,
            FitArg::Stretch => FitMode::Stretch,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lyrivid=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = EngineConfig {
        ffmpeg_path: cli.ffmpeg.clone(),
        retain_temp: cli.keep_temp,
        ..EngineConfig::default()
    };
    if let Some(temp_dir) = cli.temp_dir.clone() {
        config.temp_base = temp_dir;
    }

    let ffmpeg_path = cli.ffmpeg.clone();
    let capabilities = ExportCapabilities {
        new_renderer: Box::new(|_request| {
            Box::new(TestCardRenderer::new()) as Box<dyn SceneRenderer>
        }),
        new_encoder: Box::new(move |_request| {
            Box::new(FfmpegPipeEncoder::new(&ffmpeg_path)) as Box<dyn VideoEncoder>
        }),
        media_tool: std::sync::Arc::new(
            FfmpegMediaTool::new(&cli.ffmpeg).with_kill_grace(config.kill_grace()),
        ),
    };
    let engine = ExportEngine::new(config, capabilities);

    engine.register_progress_listener(|event| {
        let eta = event
            .eta_seconds
            .map(|s| format!(", eta {s:.0}s"))
            .unwrap_or_default();
        eprintln!(
            "step {}/{} {:5.1}% (overall {:5.1}%{eta})",
            event.step_index,
            event.step_count,
            event.step_progress * 100.0,
            event.overall_progress * 100.0,
        );
    });

    let (terminal_tx, terminal_rx) = mpsc::channel();
    engine.register_terminal_listener(move |event| {
        let _ = terminal_tx.send(event.clone());
    });

    let request = ExportRequest {
        session_id: cli
            .session_id
            .unwrap_or_else(|| format!("export-{}", std::process::id())),
        fps: cli.fps,
        width: cli.width,
        height: cli.height,
        start_ms: cli.start_ms,
        end_ms: cli.end_ms,
        output_path: cli.output,
        audio_path: cli.audio,
        background_video_path: cli.background,
        background_fit: cli.fit.into(),
    };

    let session_id = match engine.start(request) {
        Ok(session_id) => session_id,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    };

    let event = terminal_rx.recv().expect("engine dropped without a terminal event");
    debug_assert_eq!(event.session_id, session_id);
    match event.outcome {
        TerminalOutcome::Completed { output_path } => {
            println!("{output_path}");
        }
        TerminalOutcome::Failed {
            error_kind,
            message,
            step,
        } => {
            match step {
                Some(step) => eprintln!("error in step {step} [{error_kind}]: {message}"),
                None => eprintln!("error [{error_kind}]: {message}"),
            }
            if let Some(detail) = engine
                .session_detail(&session_id)
                .and_then(|snapshot| snapshot.log_tail)
            {
                eprintln!("--- diagnostics tail ---\n{detail}");
            }
            std::process::exit(1);
        }
        TerminalOutcome::Cancelled => {
            eprintln!("cancelled");
            std::process::exit(130);
        }
    }
}
