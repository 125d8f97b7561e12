use chrono::Local;

use crate::{models::ScoreRecord, session::EngineSnapshot};

/// Formats a second count as `HH:MM:SS`, the stopwatch and scoreboard format.
pub fn format_clock(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{hours:02}:{minutes:02}:{secs:02}")
}

/// One line per record, best first: rank, duration and local end time.
pub fn render_scoreboard(records: &[ScoreRecord]) -> String {
    if records.is_empty() {
        return "No focus sessions recorded yet.".to_string();
    }

    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            format!(
                "{:>3}. {}  ended {}",
                index + 1,
                format_clock(record.duration_seconds),
                record
                    .ended_at
                    .with_timezone(&Local)
                    .format("%Y-%m-%d %H:%M:%S")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Single status line for a live session.
pub fn render_status(snapshot: &EngineSnapshot) -> String {
    if !snapshot.active {
        return "idle".to_string();
    }

    let mut line = format!("{} elapsed", format_clock(snapshot.elapsed_seconds));
    if snapshot.unfocused_seconds > 0 {
        line.push_str(&format!(", unfocused {}s", snapshot.unfocused_seconds));
    }
    if snapshot.warning {
        line.push_str(" [WARNING]");
    }
    if snapshot.feed_error {
        line.push_str(" [camera not working]");
    }
    line
}
