//! Conversions between the automation server's time strings and seconds.
//!
//! The server speaks `H:MM:SS`, `M:SS` or bare `SS`. Schedule times are kept
//! as seconds since Sunday 00:00:00 and wrap every [`WEEK_SECONDS`].

pub const DAY_SECONDS: u32 = 86_400;
pub const WEEK_SECONDS: u32 = 7 * DAY_SECONDS;

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Parses `H:MM:SS`, `MM:SS` or `SS` into seconds.
///
/// Returns `None` for an empty string, more than three parts, or any
/// non-numeric part. Parts are not range-checked (`"0:75"` is 75 seconds).
///
/// ```
/// use plssync::time_utils::time_string_to_seconds;
/// assert_eq!(time_string_to_seconds("1:02:03"), Some(3723));
/// assert_eq!(time_string_to_seconds("4:05"), Some(245));
/// assert_eq!(time_string_to_seconds("1:2:3:4"), None);
/// ```
pub fn time_string_to_seconds(input: &str) -> Option<u32> {
    let parts: Vec<&str> = input.trim().split(':').collect();
    if parts.len() > 3 {
        return None;
    }

    let mut total = 0u32;
    for part in parts {
        let value = part.trim().parse::<u32>().ok()?;
        total = total.checked_mul(60)?.checked_add(value)?;
    }
    Some(total)
}

/// Formats seconds as `H:MM:SS`, the server's own format.
pub fn seconds_to_time_string(seconds: u32) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{}:{:02}:{:02}", hours, minutes, secs)
}

/// Formats a time of day as `HH:MM:SS`.
pub fn format_hhmmss(seconds: u32) -> String {
    let seconds = seconds % DAY_SECONDS;
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

/// Formats a seconds-into-week value as `Tue 08:15:00`.
pub fn format_play_time(play_time: u32) -> String {
    let play_time = play_time % WEEK_SECONDS;
    let day = (play_time / DAY_SECONDS) as usize;
    format!("{} {}", DAY_NAMES[day], format_hhmmss(play_time))
}
