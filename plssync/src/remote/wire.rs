//! Query-string requests and XML replies of the automation server.
//!
//! Every request is a GET on `<base>&action=<verb>[&params]` where the base
//! URL already carries the `pass` token. Replies are small XML documents:
//! a `Playlist` of `TRACK` elements, or an `Info` with a `Playback` element.

use std::borrow::Cow;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::errors::{Result, SyncError};
use crate::model::Track;
use crate::time_utils::time_string_to_seconds;

/// Characters kept verbatim in the `filename` parameter; `/` stays readable.
const FILENAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// One server verb with its parameters. Positions are 1-based, as sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action<'a> {
    GetPlaylist,
    PlaybackInfo,
    InsertTrack { pos: usize, filename: &'a str },
    Delete { pos: usize },
    Move { pos1: usize, pos2: usize },
}

impl Action<'_> {
    pub fn verb(&self) -> &'static str {
        match self {
            Action::GetPlaylist => "getplaylist2",
            Action::PlaybackInfo => "playbackinfo",
            Action::InsertTrack { .. } => "inserttrack",
            Action::Delete { .. } => "delete",
            Action::Move { .. } => "move",
        }
    }

    fn query(&self) -> String {
        match self {
            Action::GetPlaylist | Action::PlaybackInfo => format!("action={}", self.verb()),
            Action::InsertTrack { pos, filename } => format!(
                "action={}&pos={}&filename={}",
                self.verb(),
                pos,
                utf8_percent_encode(filename, FILENAME_ENCODE_SET)
            ),
            Action::Delete { pos } => format!("action={}&pos={}", self.verb(), pos),
            Action::Move { pos1, pos2 } => {
                format!("action={}&pos1={}&pos2={}", self.verb(), pos1, pos2)
            }
        }
    }
}

/// Full request URL for `action` against `base`.
///
/// ```
/// use plssync::remote::wire::{Action, request_url};
/// assert_eq!(
///     request_url("http://10.0.0.5:9000/?pass=s3cret", &Action::Delete { pos: 3 }),
///     "http://10.0.0.5:9000/?pass=s3cret&action=delete&pos=3"
/// );
/// ```
pub fn request_url(base: &str, action: &Action<'_>) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}{}", base, separator, action.query())
}

/// Masks the `pass` token so URLs can be logged.
pub fn redact_url(url: &str) -> Cow<'_, str> {
    let Some(query_start) = url.find('?') else {
        return Cow::Borrowed(url);
    };
    let (head, query) = url.split_at(query_start + 1);
    if !query.split('&').any(|kv| kv.starts_with("pass=")) {
        return Cow::Borrowed(url);
    }

    let redacted: Vec<&str> = query
        .split('&')
        .map(|kv| if kv.starts_with("pass=") { "pass=***" } else { kv })
        .collect();
    Cow::Owned(format!("{}{}", head, redacted.join("&")))
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn attribute(reader: &Reader<&[u8]>, e: &BytesStart<'_>, key: &str) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| SyncError::Parse(err.to_string()))?;
        if attr.key.as_ref() == key.as_bytes() {
            let value = attr.decode_and_unescape_value(reader.decoder())?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Walks the direct children of the root element, checking the root name.
fn for_each_child<F>(body: &str, expected_root: &str, mut on_child: F) -> Result<()>
where
    F: FnMut(&Reader<&[u8]>, &BytesStart<'_>) -> Result<bool>,
{
    let mut reader = Reader::from_reader(body.trim().as_bytes());
    reader.config_mut().trim_text(true);

    let mut depth = 0usize;
    let mut seen_root = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if depth == 0 {
                    check_root(&e, expected_root, &mut seen_root)?;
                } else if depth == 1 && !on_child(&reader, &e)? {
                    return Ok(());
                }
                depth += 1;
            }
            Event::Empty(e) => {
                if depth == 0 {
                    // `<Playlist/>`
                    check_root(&e, expected_root, &mut seen_root)?;
                } else if depth == 1 && !on_child(&reader, &e)? {
                    return Ok(());
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if seen_root {
        Ok(())
    } else {
        Err(SyncError::Parse("empty document".to_string()))
    }
}

fn check_root(e: &BytesStart<'_>, expected: &str, seen_root: &mut bool) -> Result<()> {
    if *seen_root {
        return Err(SyncError::Parse("multiple root elements".to_string()));
    }
    let name = element_name(e);
    if name != expected {
        return Err(SyncError::Parse(format!(
            "unexpected root element {}, expected {}",
            name, expected
        )));
    }
    *seen_root = true;
    Ok(())
}

/// Parses a `getplaylist2` reply.
///
/// `STARTTIME` is a time of day; it lands in `play_time` unchanged and is
/// turned into a seconds-into-week value by the schedule projection.
pub fn parse_playlist(body: &str) -> Result<Vec<Track>> {
    let mut tracks = Vec::new();
    for_each_child(body, "Playlist", |reader, e| {
        if e.name().as_ref() != b"TRACK" {
            return Ok(true);
        }
        let text = |key: &str| -> Result<String> {
            Ok(attribute(reader, e, key)?.unwrap_or_default())
        };

        let mut track = Track::with_metadata(
            text("FILENAME")?,
            text("ARTIST")?,
            text("TITLE")?,
            time_string_to_seconds(&text("DURATION")?),
        );
        track.play_time = time_string_to_seconds(&text("STARTTIME")?);
        tracks.push(track);
        Ok(true)
    })?;
    Ok(tracks)
}

/// Parses a `playbackinfo` reply into a 0-based playlist index.
///
/// `playlistpos` is 1-based; a missing `Playback` element, a missing or
/// non-numeric position, or anything below 1 means nothing is playing.
pub fn parse_playback_position(body: &str) -> Result<Option<usize>> {
    let mut position = None;
    for_each_child(body, "Info", |reader, e| {
        if e.name().as_ref() != b"Playback" {
            return Ok(true);
        }
        let raw = attribute(reader, e, "playlistpos")?.unwrap_or_else(|| "0".to_string());
        position = raw
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|pos| pos.checked_sub(1))
            .and_then(|pos| usize::try_from(pos).ok());
        Ok(false)
    })?;
    Ok(position)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYLIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Playlist>
  <TRACK FILENAME="C:\Music\One &amp; Two.mp3" ARTIST="Band" TITLE="One" DURATION="3:25" STARTTIME="14:03:00"/>
  <TRACK FILENAME="C:\Music\Jingle.wav" ARTIST="" TITLE="Jingle" DURATION="0:07" STARTTIME="14:06:25"></TRACK>
  <TRACK FILENAME="C:\Music\Live.mp3" DURATION="n/a"/>
</Playlist>"#;

    #[test]
    fn test_request_urls() {
        let base = "http://host:9000/?pass=pw";
        assert_eq!(
            request_url(base, &Action::GetPlaylist),
            "http://host:9000/?pass=pw&action=getplaylist2"
        );
        assert_eq!(
            request_url(base, &Action::Move { pos1: 2, pos2: 0 }),
            "http://host:9000/?pass=pw&action=move&pos1=2&pos2=0"
        );
        assert_eq!(
            request_url("http://host:9000/", &Action::PlaybackInfo),
            "http://host:9000/?action=playbackinfo"
        );
    }

    #[test]
    fn test_filename_is_percent_encoded() {
        let url = request_url(
            "http://h/?pass=x",
            &Action::InsertTrack {
                pos: 1,
                filename: "/music/Rock & Roll/a b.mp3",
            },
        );
        assert_eq!(
            url,
            "http://h/?pass=x&action=inserttrack&pos=1&filename=/music/Rock%20%26%20Roll/a%20b.mp3"
        );
    }

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("http://h:1/?pass=secret&action=delete&pos=1"),
            "http://h:1/?pass=***&action=delete&pos=1"
        );
        assert_eq!(redact_url("http://h:1/?action=x"), "http://h:1/?action=x");
        assert_eq!(redact_url("http://h:1/"), "http://h:1/");
    }

    #[test]
    fn test_parse_playlist() {
        let tracks = parse_playlist(PLAYLIST).unwrap();
        assert_eq!(tracks.len(), 3);
        assert_eq!(tracks[0].path, r"C:\Music\One & Two.mp3");
        assert_eq!(tracks[0].artist, "Band");
        assert_eq!(tracks[0].duration, Some(205));
        assert_eq!(tracks[0].play_time, Some(14 * 3600 + 180));
        assert_eq!(tracks[1].duration, Some(7));
        assert_eq!(tracks[2].artist, "");
        assert_eq!(tracks[2].duration, None);
        assert_eq!(tracks[2].play_time, None);
    }

    #[test]
    fn test_parse_empty_playlist() {
        assert!(parse_playlist("<Playlist/>").unwrap().is_empty());
        assert!(parse_playlist("<Playlist></Playlist>").unwrap().is_empty());
    }

    #[test]
    fn test_parse_playlist_rejects_wrong_root() {
        assert!(matches!(
            parse_playlist("<Info><Playback playlistpos=\"1\"/></Info>"),
            Err(SyncError::Parse(_))
        ));
        assert!(matches!(parse_playlist(""), Err(SyncError::Parse(_))));
    }

    #[test]
    fn test_parse_playback_position() {
        let info = |pos: &str| format!("<Info><Playback playlistpos=\"{}\" state=\"1\"/></Info>", pos);
        assert_eq!(parse_playback_position(&info("1")).unwrap(), Some(0));
        assert_eq!(parse_playback_position(&info("12")).unwrap(), Some(11));
        assert_eq!(parse_playback_position(&info("0")).unwrap(), None);
        assert_eq!(parse_playback_position(&info("-3")).unwrap(), None);
        assert_eq!(parse_playback_position(&info("abc")).unwrap(), None);
        assert_eq!(parse_playback_position("<Info><Playback/></Info>").unwrap(), None);
        assert_eq!(parse_playback_position("<Info/>").unwrap(), None);
        assert!(parse_playback_position("<Playlist/>").is_err());
    }
}
