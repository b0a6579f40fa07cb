//! Play-time projection across a playlist.
//!
//! One track, the anchor, has a known start time. Every other track's start
//! is derived from cumulative durations, walking backward and forward from
//! the anchor with weekly wraparound.

use chrono::{Datelike, Timelike};
use tracing::debug;

use crate::errors::{Result, SyncError};
use crate::model::Track;
use crate::time_utils::{DAY_SECONDS, WEEK_SECONDS};

/// Turns the anchor's time of day into seconds since Sunday 00:00:00.
///
/// A time of day later than `now` means the track started yesterday
/// (started 23:55, now 00:05), so the day is stepped back, Sunday wrapping
/// to Saturday.
pub fn anchor_play_time_at<T: Datelike + Timelike>(time_of_day: u32, now: &T) -> u32 {
    let mut day = now.weekday().num_days_from_sunday();
    let seconds_in_day = now.num_seconds_from_midnight();

    if time_of_day > seconds_in_day {
        day = (day + 6) % 7;
    }
    (day * DAY_SECONDS + time_of_day) % WEEK_SECONDS
}

/// Rewrites `play_time` of every track from the anchor at `anchor`.
///
/// The anchor must already hold a seconds-into-week value. Missing durations
/// count as zero.
pub fn project_play_times(tracks: &mut [Track], anchor: usize) -> Result<()> {
    let Some(anchor_track) = tracks.get(anchor) else {
        return Err(SyncError::InvalidAnchor(format!(
            "index {} out of range for {} tracks",
            anchor,
            tracks.len()
        )));
    };
    let anchor_duration = anchor_track.duration.unwrap_or(0);
    let anchor_time = match anchor_track.play_time {
        Some(t) if t < WEEK_SECONDS => t,
        Some(t) => {
            return Err(SyncError::InvalidAnchor(format!(
                "play time {} is outside the week",
                t
            )));
        }
        None => {
            return Err(SyncError::InvalidAnchor(format!(
                "track {} has no play time",
                anchor_track.path
            )));
        }
    };

    // backward
    let mut current = anchor_time;
    for track in tracks[..anchor].iter_mut().rev() {
        let duration = track.duration.unwrap_or(0) % WEEK_SECONDS;
        current = if duration > current {
            current + WEEK_SECONDS - duration
        } else {
            current - duration
        };
        track.play_time = Some(current);
    }

    // forward
    let mut current = anchor_time;
    let mut previous_duration = anchor_duration;
    for track in tracks[anchor + 1..].iter_mut() {
        current = ((current as u64 + previous_duration as u64) % WEEK_SECONDS as u64) as u32;
        track.play_time = Some(current);
        previous_duration = track.duration.unwrap_or(0);
    }

    debug!(anchor, anchor_time, tracks = tracks.len(), "projected play times");
    Ok(())
}

/// Anchors the track at `anchor` on the wall clock `now`, then projects.
///
/// `time_of_day` is the anchor's start as reported by the server, in
/// seconds since midnight.
pub fn project_from_time_of_day<T: Datelike + Timelike>(
    tracks: &mut [Track],
    anchor: usize,
    time_of_day: u32,
    now: &T,
) -> Result<()> {
    let len = tracks.len();
    let anchor_track = tracks.get_mut(anchor).ok_or_else(|| {
        SyncError::InvalidAnchor(format!("index {} out of range for {} tracks", anchor, len))
    })?;
    anchor_track.play_time = Some(anchor_play_time_at(time_of_day, now));
    project_play_times(tracks, anchor)
}
