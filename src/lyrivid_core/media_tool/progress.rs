// Parsing for ffmpeg's `-progress pipe:2` stream and classic stats lines.

use super::ToolHeartbeat;

/// Parse one diagnostic line into a heartbeat sample. Returns `None` when
/// the line carries no progress information.
///
/// Accepts both the structured `-progress` key=value block (`out_time_ms=`,
/// `frame=`, `fps=`, `speed=`) and the legacy stats line
/// (`frame= 899 fps=174 ... time=00:00:32.51 ... speed=6.29x`).
pub(crate) fn parse_progress_line(line: &str) -> Option<ToolHeartbeat> {
    let mut heartbeat = ToolHeartbeat::default();
    let mut any = false;

    for token in line.split_whitespace() {
        if let Some(rest) = token.strip_prefix("out_time_ms=") {
            // Despite the name, ffmpeg reports out_time_ms in microseconds.
            if let Ok(us) = rest.parse::<i64>()
                && us >= 0
            {
                heartbeat.out_time_ms = Some(us as u64 / 1000);
                any = true;
            }
        } else if let Some(rest) = token.strip_prefix("out_time=") {
            let seconds = parse_clock_to_seconds(rest);
            if seconds >= 0.0 {
                heartbeat.out_time_ms = Some((seconds * 1000.0).round() as u64);
                any = true;
            }
        } else if let Some(rest) = token.strip_prefix("time=") {
            let seconds = parse_clock_to_seconds(rest);
            if seconds >= 0.0 {
                heartbeat.out_time_ms = Some((seconds * 1000.0).round() as u64);
                any = true;
            }
        } else if let Some(rest) = token.strip_prefix("frame=") {
            if let Ok(frame) = rest.parse::<u64>() {
                heartbeat.frame = Some(frame);
                any = true;
            }
        } else if let Some(rest) = token.strip_prefix("fps=") {
            if let Ok(fps) = rest.parse::<f64>()
                && fps.is_finite()
            {
                heartbeat.fps = Some(fps);
                any = true;
            }
        } else if let Some(rest) = token.strip_prefix("speed=") {
            let value = rest.trim_end_matches('x');
            if let Ok(speed) = value.parse::<f64>()
                && speed.is_finite()
            {
                heartbeat.speed = Some(speed);
                any = true;
            }
        }
    }

    any.then_some(heartbeat)
}

/// True for the `progress=end` sentinel that closes a `-progress` stream.
pub(crate) fn is_progress_end(line: &str) -> bool {
    line.split_whitespace().any(|token| {
        token
            .strip_prefix("progress=")
            .is_some_and(|rest| rest.eq_ignore_ascii_case("end"))
    })
}

/// Parse `HH:MM:SS.frac` or a bare seconds value. Unparseable input maps
/// to 0.0, matching how a missing sample is treated upstream.
pub(crate) fn parse_clock_to_seconds(s: &str) -> f64 {
    if s.contains(':') {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() == 3 {
            let h = parts[0].parse::<f64>().unwrap_or(0.0);
            let m = parts[1].parse::<f64>().unwrap_or(0.0);
            let sec = parts[2].parse::<f64>().unwrap_or(0.0);
            return h * 3600.0 + m * 60.0 + sec;
        }
    }
    s.parse::<f64>().unwrap_or(0.0)
}
