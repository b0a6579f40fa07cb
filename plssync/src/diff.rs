//! Membership diff between two playlist snapshots, keyed by track path.

use std::collections::HashMap;

use crate::model::Track;

/// One difference between an old and a new snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackChange {
    /// A new path appeared at this index of the new snapshot.
    Insert(usize, Track),
    /// A path of the old snapshot at this index is gone.
    Delete(usize),
    /// Same path, different metadata; index into the new snapshot.
    Update(usize, Track),
}

impl TrackChange {
    pub fn index(&self) -> usize {
        match self {
            TrackChange::Insert(i, _) | TrackChange::Delete(i) | TrackChange::Update(i, _) => *i,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaylistDiff {
    pub changes: Vec<TrackChange>,
    pub is_identical: bool,
}

impl PlaylistDiff {
    /// Computes deletes (descending old index), then inserts (ascending new
    /// index), then updates (ascending new index).
    ///
    /// Reordering alone is not a change. When a path occurs more than once in
    /// a snapshot its last occurrence is the one compared.
    pub fn compute(old_tracks: &[Track], new_tracks: &[Track]) -> PlaylistDiff {
        let old_map = index_by_path(old_tracks);
        let new_map = index_by_path(new_tracks);

        let mut deleted: Vec<usize> = old_map
            .iter()
            .filter(|(path, _)| !new_map.contains_key(*path))
            .map(|(_, (index, _))| *index)
            .collect();
        deleted.sort_unstable_by(|a, b| b.cmp(a));

        let mut inserted: Vec<(usize, &Track)> = new_map
            .iter()
            .filter(|(path, _)| !old_map.contains_key(*path))
            .map(|(_, entry)| *entry)
            .collect();
        inserted.sort_unstable_by_key(|(index, _)| *index);

        let mut updated: Vec<(usize, &Track)> = new_map
            .iter()
            .filter_map(|(path, (new_index, new_track))| {
                let (_, old_track) = old_map.get(path)?;
                (old_track.fingerprint() != new_track.fingerprint())
                    .then_some((*new_index, *new_track))
            })
            .collect();
        updated.sort_unstable_by_key(|(index, _)| *index);

        let changes: Vec<TrackChange> = deleted
            .into_iter()
            .map(TrackChange::Delete)
            .chain(
                inserted
                    .into_iter()
                    .map(|(i, t)| TrackChange::Insert(i, t.clone())),
            )
            .chain(
                updated
                    .into_iter()
                    .map(|(i, t)| TrackChange::Update(i, t.clone())),
            )
            .collect();

        PlaylistDiff {
            is_identical: changes.is_empty(),
            changes,
        }
    }

    pub fn inserts(&self) -> usize {
        self.count(|c| matches!(c, TrackChange::Insert(..)))
    }

    pub fn deletes(&self) -> usize {
        self.count(|c| matches!(c, TrackChange::Delete(_)))
    }

    pub fn updates(&self) -> usize {
        self.count(|c| matches!(c, TrackChange::Update(..)))
    }

    fn count(&self, pred: impl Fn(&TrackChange) -> bool) -> usize {
        self.changes.iter().filter(|c| pred(c)).count()
    }
}

fn index_by_path(tracks: &[Track]) -> HashMap<&str, (usize, &Track)> {
    tracks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.path.as_str(), (i, t)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(path: &str) -> Track {
        Track::with_metadata(path, "Artist", path.to_uppercase(), Some(100))
    }

    #[test]
    fn test_identical_snapshots() {
        let tracks = vec![t("a"), t("b"), t("c")];
        let diff = PlaylistDiff::compute(&tracks, &tracks.clone());
        assert!(diff.is_identical);
        assert!(diff.changes.is_empty());
    }

    #[test]
    fn test_reorder_is_not_a_change() {
        let diff = PlaylistDiff::compute(&[t("a"), t("b")], &[t("b"), t("a")]);
        assert!(diff.is_identical);
    }

    #[test]
    fn test_replace_one_track() {
        let diff = PlaylistDiff::compute(&[t("a"), t("b")], &[t("a"), t("c")]);
        assert!(!diff.is_identical);
        assert_eq!(
            diff.changes,
            vec![TrackChange::Delete(1), TrackChange::Insert(1, t("c"))]
        );
    }

    #[test]
    fn test_deletes_descend_and_inserts_ascend() {
        let old = vec![t("a"), t("b"), t("c"), t("d")];
        let new = vec![t("x"), t("b"), t("y"), t("d"), t("z")];
        let diff = PlaylistDiff::compute(&old, &new);

        let deletes: Vec<usize> = diff
            .changes
            .iter()
            .filter_map(|c| match c {
                TrackChange::Delete(i) => Some(*i),
                _ => None,
            })
            .collect();
        assert_eq!(deletes, [2, 0]);

        let inserts: Vec<usize> = diff
            .changes
            .iter()
            .filter_map(|c| match c {
                TrackChange::Insert(i, _) => Some(*i),
                _ => None,
            })
            .collect();
        assert_eq!(inserts, [0, 2, 4]);
        assert_eq!(diff.updates(), 0);
    }

    #[test]
    fn test_metadata_edit_is_update_at_new_index() {
        let old = vec![t("a"), t("b")];
        let mut edited = t("b");
        edited.title = "Renamed".to_string();
        let new = vec![t("z"), t("a"), edited.clone()];

        let diff = PlaylistDiff::compute(&old, &new);
        assert_eq!(diff.inserts(), 1);
        assert_eq!(diff.changes.last(), Some(&TrackChange::Update(2, edited)));
    }

    #[test]
    fn test_play_time_alone_is_not_an_update() {
        let old = vec![t("a")];
        let mut new = vec![t("a")];
        new[0].play_time = Some(1234);
        assert!(PlaylistDiff::compute(&old, &new).is_identical);
    }

    #[test]
    fn test_duplicate_paths_use_last_occurrence() {
        let old = vec![t("a"), t("b"), t("a")];
        let new = vec![t("a")];
        let diff = PlaylistDiff::compute(&old, &new);
        assert_eq!(diff.changes, vec![TrackChange::Delete(1)]);
    }
}
