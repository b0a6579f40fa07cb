#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use plssync::{HttpReply, HttpTransport, Result, SyncError, Timeouts};

pub const BASE_URL: &str = "http://10.0.0.5:9000/?pass=s3cret";

/// Scripted automation server.
///
/// Replies with fixed bodies per verb, records every URL and fails the next
/// requests with queued errors.
pub struct MockTransport {
    urls: Mutex<Vec<String>>,
    playlist: Mutex<String>,
    playback: Mutex<String>,
    write_status: Mutex<u16>,
    failures: Mutex<VecDeque<SyncError>>,
    verb_failures: Mutex<Vec<(String, SyncError)>>,
}

impl MockTransport {
    pub fn new(playlist: impl Into<String>) -> Arc<Self> {
        Arc::new(MockTransport {
            urls: Mutex::new(Vec::new()),
            playlist: Mutex::new(playlist.into()),
            playback: Mutex::new("<Info><Playback playlistpos=\"0\"/></Info>".to_string()),
            write_status: Mutex::new(200),
            failures: Mutex::new(VecDeque::new()),
            verb_failures: Mutex::new(Vec::new()),
        })
    }

    pub fn set_playlist(&self, body: impl Into<String>) {
        *self.playlist.lock() = body.into();
    }

    /// Makes `playbackinfo` report the 1-based `playlistpos`.
    pub fn set_playing(&self, playlistpos: usize) {
        *self.playback.lock() = format!(
            "<Info><Playback playlistpos=\"{}\" state=\"1\"/></Info>",
            playlistpos
        );
    }

    pub fn set_write_status(&self, status: u16) {
        *self.write_status.lock() = status;
    }

    pub fn fail_next(&self, err: SyncError) {
        self.failures.lock().push_back(err);
    }

    /// Fails the next request using `verb`, whatever comes before it.
    pub fn fail_next_verb(&self, verb: &str, err: SyncError) {
        self.verb_failures.lock().push((verb.to_string(), err));
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }

    /// The `action=...` part of every request, in order.
    pub fn actions(&self) -> Vec<String> {
        self.urls
            .lock()
            .iter()
            .filter_map(|url| url.split_once("action=").map(|(_, rest)| format!("action={}", rest)))
            .collect()
    }

    /// Actions other than `getplaylist2` and `playbackinfo`.
    pub fn edits(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter(|a| a != "action=getplaylist2" && a != "action=playbackinfo")
            .collect()
    }

    pub fn clear(&self) {
        self.urls.lock().clear();
    }
}

impl HttpTransport for MockTransport {
    fn get(&self, url: &str, _timeouts: &Timeouts) -> Result<HttpReply> {
        self.urls.lock().push(url.to_string());
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        {
            let mut verb_failures = self.verb_failures.lock();
            let hit = verb_failures.iter().position(|(verb, _)| {
                let needle = format!("action={}", verb);
                url.ends_with(&needle) || url.contains(&format!("{}&", needle))
            });
            if let Some(index) = hit {
                return Err(verb_failures.remove(index).1);
            }
        }

        let reply = if url.ends_with("action=getplaylist2") {
            HttpReply {
                status: 200,
                body: self.playlist.lock().clone(),
            }
        } else if url.ends_with("action=playbackinfo") {
            HttpReply {
                status: 200,
                body: self.playback.lock().clone(),
            }
        } else {
            HttpReply {
                status: *self.write_status.lock(),
                body: String::new(),
            }
        };
        Ok(reply)
    }
}

/// `getplaylist2` body from `(filename, duration, starttime)` triples.
pub fn playlist_xml(tracks: &[(&str, &str, &str)]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Playlist>\n");
    for (filename, duration, start) in tracks {
        xml.push_str(&format!(
            "  <TRACK FILENAME=\"{}\" ARTIST=\"Artist\" TITLE=\"{}\" DURATION=\"{}\" STARTTIME=\"{}\"/>\n",
            filename, filename, duration, start
        ));
    }
    xml.push_str("</Playlist>");
    xml
}

/// Five three-minute tracks starting at 14:00:00.
pub fn five_tracks() -> String {
    playlist_xml(&[
        ("a.mp3", "3:00", "14:00:00"),
        ("b.mp3", "3:00", "14:03:00"),
        ("c.mp3", "3:00", "14:06:00"),
        ("d.mp3", "3:00", "14:09:00"),
        ("e.mp3", "3:00", "14:12:00"),
    ])
}
