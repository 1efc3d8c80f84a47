// SubRip rendering
//
// Pure transformation from a segment sequence to an .srt document. The same
// segments always produce byte-identical output.

use std::fmt::Write;

use crate::models::Segment;

/// Format seconds as `HH:MM:SS,mmm`
fn format_timestamp(seconds: f64) -> String {
    let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
    let total_ms = (seconds * 1000.0).round() as u64;

    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let secs = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Render segments as an SRT document with 1-based cue numbers
pub fn render_srt(segments: &[Segment]) -> String {
    let mut srt = String::new();

    for (index, segment) in segments.iter().enumerate() {
        if index > 0 {
            srt.push('\n');
        }
        // Writing into a String cannot fail
        let _ = write!(
            srt,
            "{}\n{} --> {}\n{}\n",
            index + 1,
            format_timestamp(segment.start),
            format_timestamp(segment.end),
            segment.text.trim()
        );
    }

    srt
}
