//! Linear, branch-on-edit version history.
//!
//! Versions live in a flat `Vec` in chronological order; index 0 is the
//! original. Editing from a reverted position truncates everything after the
//! cursor before appending, so a "branch" never exists as a second path in
//! memory.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::error::EditorError;
use crate::images::ImageArtifact;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct VersionId(String);

impl VersionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VersionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One node of the edit history. `images` is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    id: VersionId,
    images: Vec<ImageArtifact>,
    prompt_used: Option<String>,
}

impl Version {
    fn new(images: Vec<ImageArtifact>) -> Self {
        Self {
            id: VersionId::new(),
            images,
            prompt_used: None,
        }
    }

    pub fn id(&self) -> &VersionId {
        &self.id
    }

    pub fn images(&self) -> &[ImageArtifact] {
        &self.images
    }

    pub fn first_image(&self) -> Option<&ImageArtifact> {
        self.images.first()
    }

    /// The prompt that was applied to this version to produce the next one.
    pub fn prompt_used(&self) -> Option<&str> {
        self.prompt_used.as_deref()
    }
}

/// Where an upload landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadRoute {
    NewVersion(usize),
    ExtendedCurrent(usize),
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Index of the freshly appended version (always the last one).
    pub index: usize,
    /// Number of versions dropped by branch truncation or replacement.
    pub discarded: usize,
    /// Prompt previously stamped on the edited version, when the new edit
    /// overwrote it.
    pub replaced_prompt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRemoval {
    ImageOnly,
    WholeVersion,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    versions: Vec<Version>,
    cursor: Option<usize>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    pub fn get(&self, index: usize) -> Option<&Version> {
        self.versions.get(index)
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Cursor as a signed index, `-1` when nothing is selected.
    pub fn cursor_index(&self) -> isize {
        self.cursor.map(|index| index as isize).unwrap_or(-1)
    }

    pub fn current(&self) -> Option<&Version> {
        self.cursor.and_then(|index| self.versions.get(index))
    }

    pub fn original(&self) -> Option<&Version> {
        self.versions.first()
    }

    pub fn position(&self, id: &VersionId) -> Option<usize> {
        self.versions.iter().position(|version| &version.id == id)
    }

    pub fn find(&self, id: &VersionId) -> Option<&Version> {
        self.versions.iter().find(|version| &version.id == id)
    }

    /// Starts a new lineage when nothing is selected, otherwise adds the
    /// images to the selected version.
    pub fn append_initial(
        &mut self,
        images: Vec<ImageArtifact>,
    ) -> Result<UploadRoute, EditorError> {
        if images.is_empty() {
            return Ok(UploadRoute::Unchanged);
        }
        if self.cursor.is_some() {
            return self.extend_current(images).map(UploadRoute::ExtendedCurrent);
        }
        self.versions.push(Version::new(images));
        let index = self.versions.len() - 1;
        self.cursor = Some(index);
        Ok(UploadRoute::NewVersion(index))
    }

    pub fn extend_current(&mut self, images: Vec<ImageArtifact>) -> Result<usize, EditorError> {
        let index = self.cursor.ok_or(EditorError::NoCurrentVersion)?;
        let version = self
            .versions
            .get_mut(index)
            .ok_or(EditorError::NoCurrentVersion)?;
        version.images.extend(images);
        Ok(index)
    }

    /// Truncates everything after the cursor, stamps `prompt` on the edited
    /// version and appends the produced image as the new current version.
    pub fn commit_edit(
        &mut self,
        produced: ImageArtifact,
        prompt: &str,
    ) -> Result<CommitReceipt, EditorError> {
        let cursor = self.cursor.ok_or(EditorError::NoCurrentVersion)?;
        if cursor >= self.versions.len() {
            return Err(EditorError::NoCurrentVersion);
        }
        let discarded = self.versions.len() - (cursor + 1);
        self.versions.truncate(cursor + 1);

        let edited = &mut self.versions[cursor];
        let replaced_prompt = edited
            .prompt_used
            .replace(prompt.to_string())
            .filter(|previous| previous != prompt);

        self.versions.push(Version::new(vec![produced]));
        let index = self.versions.len() - 1;
        self.cursor = Some(index);
        Ok(CommitReceipt {
            index,
            discarded,
            replaced_prompt,
        })
    }

    /// Replaces the whole history with a single generated version.
    pub fn commit_fresh_generation(
        &mut self,
        produced: ImageArtifact,
        prompt: &str,
    ) -> CommitReceipt {
        let discarded = self.versions.len();
        let mut version = Version::new(vec![produced]);
        version.prompt_used = Some(prompt.to_string());
        self.versions = vec![version];
        self.cursor = Some(0);
        CommitReceipt {
            index: 0,
            discarded,
            replaced_prompt: None,
        }
    }

    pub fn revert(&mut self, index: usize) -> Result<&Version, EditorError> {
        self.check_index(index)?;
        self.cursor = Some(index);
        Ok(&self.versions[index])
    }

    /// Keeps only the original. Returns how many versions were dropped.
    pub fn reset_to_original(&mut self) -> usize {
        if self.versions.is_empty() {
            return 0;
        }
        let discarded = self.versions.len() - 1;
        self.versions.truncate(1);
        self.cursor = Some(0);
        discarded
    }

    pub fn remove_version(&mut self, index: usize) -> Result<Version, EditorError> {
        self.check_index(index)?;
        let removed = self.versions.remove(index);
        if self.versions.is_empty() {
            self.cursor = None;
        } else if let Some(cursor) = self.cursor {
            if cursor >= index {
                self.cursor = Some(cursor.saturating_sub(1));
            }
        }
        Ok(removed)
    }

    /// Removing the last image of a version removes the version.
    pub fn remove_image_from_version(
        &mut self,
        version_index: usize,
        image_index: usize,
    ) -> Result<ImageRemoval, EditorError> {
        self.check_index(version_index)?;
        let image_count = self.versions[version_index].images.len();
        if image_index >= image_count {
            return Err(EditorError::IndexOutOfRange {
                index: image_index,
                len: image_count,
            });
        }
        if image_count == 1 {
            self.remove_version(version_index)?;
            return Ok(ImageRemoval::WholeVersion);
        }
        self.versions[version_index].images.remove(image_index);
        Ok(ImageRemoval::ImageOnly)
    }

    pub fn clear(&mut self) {
        self.versions.clear();
        self.cursor = None;
    }

    fn check_index(&self, index: usize) -> Result<(), EditorError> {
        if index >= self.versions.len() {
            return Err(EditorError::IndexOutOfRange {
                index,
                len: self.versions.len(),
            });
        }
        Ok(())
    }
}

/// Display label for a history slot: `Original`, `V2`, `V3`, ...
pub fn version_label(index: usize) -> String {
    if index == 0 {
        "Original".to_string()
    } else {
        format!("V{}", index + 1)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{version_label, History, ImageRemoval, UploadRoute, VersionId};
    use crate::error::EditorError;
    use crate::images::ImageArtifact;

    fn img(tag: &str) -> ImageArtifact {
        ImageArtifact::new(tag.as_bytes().to_vec(), "image/png")
    }

    fn tags(history: &History) -> Vec<Vec<String>> {
        history
            .versions()
            .iter()
            .map(|version| {
                version
                    .images()
                    .iter()
                    .map(|image| String::from_utf8_lossy(image.bytes()).to_string())
                    .collect()
            })
            .collect()
    }

    fn assert_invariants(history: &History) {
        match history.cursor() {
            None => assert!(history.is_empty()),
            Some(cursor) => assert!(cursor < history.len()),
        }
        assert!(history.versions().iter().all(|v| !v.images().is_empty()));
    }

    fn seeded(count: usize) -> History {
        let mut history = History::new();
        history.append_initial(vec![img("v0")]).unwrap();
        for idx in 1..count {
            history
                .commit_edit(img(&format!("v{idx}")), &format!("p{}", idx - 1))
                .unwrap();
        }
        history
    }

    #[test]
    fn version_id_serializes_as_bare_string() -> anyhow::Result<()> {
        let id = VersionId::new();
        assert_eq!(serde_json::to_value(&id)?, serde_json::json!(id.as_str()));
        assert_eq!(serde_json::to_value(Some(&id))?, serde_json::json!(id.to_string()));
        Ok(())
    }

    #[test]
    fn empty_history_has_negative_cursor() {
        let history = History::new();
        assert_eq!(history.cursor_index(), -1);
        assert!(history.current().is_none());
    }

    #[test]
    fn append_initial_starts_lineage_then_extends_current() {
        let mut history = History::new();
        assert_eq!(
            history.append_initial(vec![img("a")]),
            Ok(UploadRoute::NewVersion(0))
        );
        assert_eq!(history.cursor(), Some(0));
        assert_eq!(
            history.append_initial(vec![img("b"), img("c")]),
            Ok(UploadRoute::ExtendedCurrent(0))
        );
        assert_eq!(history.len(), 1);
        assert_eq!(tags(&history), vec![vec!["a", "b", "c"]]);
        assert_eq!(history.append_initial(Vec::new()), Ok(UploadRoute::Unchanged));
    }

    #[test]
    fn extend_current_requires_a_selection() {
        let mut history = History::new();
        assert_eq!(
            history.extend_current(vec![img("a")]),
            Err(EditorError::NoCurrentVersion)
        );
    }

    #[test]
    fn commit_edit_stamps_prompt_and_moves_cursor() {
        let mut history = History::new();
        history.append_initial(vec![img("a")]).unwrap();
        let receipt = history.commit_edit(img("b"), "add hat").unwrap();
        assert_eq!(receipt.index, 1);
        assert_eq!(receipt.discarded, 0);
        assert_eq!(receipt.replaced_prompt, None);
        assert_eq!(history.cursor(), Some(1));
        assert_eq!(history.get(0).and_then(|v| v.prompt_used()), Some("add hat"));
        assert_eq!(history.get(1).and_then(|v| v.prompt_used()), None);
    }

    #[test]
    fn commit_edit_from_reverted_position_discards_future() {
        let mut history = History::new();
        history.append_initial(vec![img("a")]).unwrap();
        history.commit_edit(img("b"), "add hat").unwrap();
        history.revert(0).unwrap();
        assert_eq!(history.current().and_then(|v| v.prompt_used()), Some("add hat"));

        let receipt = history.commit_edit(img("c"), "add sunglasses").unwrap();
        assert_eq!(receipt.discarded, 1);
        assert_eq!(receipt.replaced_prompt.as_deref(), Some("add hat"));
        assert_eq!(tags(&history), vec![vec!["a"], vec!["c"]]);
        assert_eq!(history.cursor(), Some(1));
        assert_eq!(
            history.get(0).and_then(|v| v.prompt_used()),
            Some("add sunglasses")
        );
    }

    #[test]
    fn commit_edit_without_selection_fails() {
        let mut history = History::new();
        assert_eq!(
            history.commit_edit(img("x"), "p"),
            Err(EditorError::NoCurrentVersion)
        );
        assert!(history.is_empty());
    }

    #[test]
    fn fresh_generation_replaces_everything() {
        let mut history = seeded(3);
        let receipt = history.commit_fresh_generation(img("g"), "a castle");
        assert_eq!(receipt.discarded, 3);
        assert_eq!(tags(&history), vec![vec!["g"]]);
        assert_eq!(history.cursor(), Some(0));
        assert_eq!(history.get(0).and_then(|v| v.prompt_used()), Some("a castle"));
    }

    #[test]
    fn revert_validates_index_and_leaves_history_alone() {
        let mut history = seeded(3);
        let before = tags(&history);
        assert_eq!(
            history.revert(3).err(),
            Some(EditorError::IndexOutOfRange { index: 3, len: 3 })
        );
        assert_eq!(history.cursor(), Some(2));
        history.revert(1).unwrap();
        assert_eq!(history.cursor(), Some(1));
        assert_eq!(tags(&history), before);
    }

    #[test]
    fn reset_keeps_only_original() {
        let mut empty = History::new();
        assert_eq!(empty.reset_to_original(), 0);
        assert_eq!(empty.cursor(), None);

        let mut history = seeded(4);
        history.revert(2).unwrap();
        assert_eq!(history.reset_to_original(), 3);
        assert_eq!(tags(&history), vec![vec!["v0"]]);
        assert_eq!(history.cursor(), Some(0));
    }

    #[test]
    fn remove_version_repairs_cursor() {
        let mut history = seeded(4);
        history.revert(2).unwrap();

        history.remove_version(3).unwrap();
        assert_eq!(history.cursor(), Some(2));

        history.remove_version(2).unwrap();
        assert_eq!(history.cursor(), Some(1));

        history.remove_version(0).unwrap();
        assert_eq!(history.cursor(), Some(0));
        assert_eq!(tags(&history), vec![vec!["v1"]]);

        history.remove_version(0).unwrap();
        assert!(history.is_empty());
        assert_eq!(history.cursor_index(), -1);

        assert_eq!(
            history.remove_version(0).err(),
            Some(EditorError::IndexOutOfRange { index: 0, len: 0 })
        );
    }

    #[test]
    fn remove_image_keeps_version_when_others_remain() {
        let mut history = History::new();
        history
            .append_initial(vec![img("a"), img("b"), img("c")])
            .unwrap();
        assert_eq!(
            history.remove_image_from_version(0, 1),
            Ok(ImageRemoval::ImageOnly)
        );
        assert_eq!(tags(&history), vec![vec!["a", "c"]]);
        assert_eq!(history.cursor(), Some(0));
        assert_eq!(
            history.remove_image_from_version(0, 2),
            Err(EditorError::IndexOutOfRange { index: 2, len: 2 })
        );
        assert_eq!(
            history.remove_image_from_version(1, 0),
            Err(EditorError::IndexOutOfRange { index: 1, len: 1 })
        );
    }

    #[test]
    fn removing_last_image_equals_removing_version() {
        let mut by_image = seeded(3);
        by_image.revert(2).unwrap();
        let mut by_version = by_image.clone();

        assert_eq!(
            by_image.remove_image_from_version(1, 0),
            Ok(ImageRemoval::WholeVersion)
        );
        by_version.remove_version(1).unwrap();

        assert_eq!(by_image, by_version);
        assert_eq!(by_image.cursor(), Some(1));
    }

    #[test]
    fn clear_empties_everything() {
        let mut history = seeded(2);
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.cursor(), None);
    }

    #[test]
    fn ids_are_stable_and_findable() {
        let mut history = seeded(3);
        let id = history.get(2).unwrap().id().clone();
        history.remove_version(0).unwrap();
        assert_eq!(history.position(&id), Some(1));
        assert!(history.find(&id).is_some());
    }

    #[test]
    fn labels_follow_display_numbering() {
        assert_eq!(version_label(0), "Original");
        assert_eq!(version_label(1), "V2");
        assert_eq!(version_label(9), "V10");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Upload(usize),
        Commit,
        Fresh,
        Revert(usize),
        Reset,
        Remove(usize),
        RemoveImage(usize, usize),
        Clear,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..3usize).prop_map(Op::Upload),
            Just(Op::Commit),
            Just(Op::Fresh),
            (0..8usize).prop_map(Op::Revert),
            Just(Op::Reset),
            (0..8usize).prop_map(Op::Remove),
            (0..8usize, 0..4usize).prop_map(|(v, i)| Op::RemoveImage(v, i)),
            Just(Op::Clear),
        ]
    }

    proptest! {
        #[test]
        fn prop_cursor_stays_valid(ops in proptest::collection::vec(op_strategy(), 0..40)) {
            let mut history = History::new();
            for (step, op) in ops.into_iter().enumerate() {
                let image = img(&format!("s{step}"));
                match op {
                    Op::Upload(count) => {
                        let images = (0..count).map(|_| image.clone()).collect();
                        let _ = history.append_initial(images);
                    }
                    Op::Commit => {
                        let before = history.cursor();
                        let result = history.commit_edit(image, "p");
                        match before {
                            Some(cursor) => {
                                prop_assert!(result.is_ok());
                                prop_assert_eq!(history.len(), cursor + 2);
                                prop_assert_eq!(history.cursor(), Some(cursor + 1));
                            }
                            None => {
                                prop_assert_eq!(result.err(), Some(EditorError::NoCurrentVersion))
                            }
                        }
                    }
                    Op::Fresh => {
                        history.commit_fresh_generation(image, "p");
                        prop_assert_eq!(history.len(), 1);
                    }
                    Op::Revert(index) => {
                        let _ = history.revert(index);
                    }
                    Op::Reset => {
                        history.reset_to_original();
                    }
                    Op::Remove(index) => {
                        let _ = history.remove_version(index);
                    }
                    Op::RemoveImage(v, i) => {
                        let _ = history.remove_image_from_version(v, i);
                    }
                    Op::Clear => history.clear(),
                }
                assert_invariants(&history);
            }
        }

        #[test]
        fn prop_revert_then_reset_keeps_original(len in 1..8usize, target in 0..8usize) {
            let mut history = seeded(len);
            let original = history.get(0).unwrap().id().clone();
            let _ = history.revert(target % len);
            history.reset_to_original();
            prop_assert_eq!(history.len(), 1);
            prop_assert_eq!(history.cursor(), Some(0));
            prop_assert_eq!(history.get(0).unwrap().id(), &original);
        }
    }
}
