//! Hard-link identity tracking.
//!
//! Two paths in the same tree that share a device and inode are the same
//! physical file. The comparator uses a prebuilt [`HardLinkMap`] per root to
//! avoid comparing the same content twice when both trees have the same
//! link topology; the copier uses a [`LinkTracker`] to recreate links
//! instead of duplicating content.
//!
//! Platforms without device/inode identity report `None` from
//! [`identity_of`], which makes every path its own identity.

use std::collections::HashMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};

use parking_lot::{Condvar, Mutex};
use walkdir::WalkDir;

use crate::exclusion::ExclusionFilter;

/// Stable identity of a physical file within one filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    pub device: u64,
    pub inode: u64,
}

/// Identity of a hard-linked item, or `None` if the item is unique.
///
/// Directories are never treated as linked. Items with a single link are
/// unique by definition, so they return `None` as well.
#[cfg(unix)]
pub fn identity_of(metadata: &Metadata) -> Option<FileIdentity> {
    use std::os::unix::fs::MetadataExt;

    if metadata.is_dir() || metadata.nlink() <= 1 {
        return None;
    }
    Some(FileIdentity {
        device: metadata.dev(),
        inode: metadata.ino(),
    })
}

#[cfg(not(unix))]
pub fn identity_of(_metadata: &Metadata) -> Option<FileIdentity> {
    None
}

/// Read-only map from identity to every tree-relative path sharing it.
///
/// Built once per root before the walk starts, then shared across workers.
#[derive(Debug, Default)]
pub struct HardLinkMap {
    groups: HashMap<FileIdentity, Vec<PathBuf>>,
}

impl HardLinkMap {
    /// Walk `root` (without following symlinks) and group linked paths.
    ///
    /// Entries whose name is excluded are not descended into. Any walk error
    /// degrades the affected entries to unique identities.
    pub fn build(root: &Path, exclusions: &ExclusionFilter) -> Self {
        let mut groups: HashMap<FileIdentity, Vec<PathBuf>> = HashMap::new();

        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !exclusions.is_excluded(entry.file_name()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(root = %root.display(), error = %err, "hard-link scan incomplete");
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let Some(identity) = identity_of(&metadata) else {
                continue;
            };
            let relative = entry
                .path()
                .strip_prefix(root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| entry.path().to_path_buf());
            groups.entry(identity).or_default().push(relative);
        }

        for paths in groups.values_mut() {
            paths.sort();
        }
        groups.retain(|_, paths| paths.len() > 1);

        tracing::debug!(root = %root.display(), groups = groups.len(), "hard-link map built");
        HardLinkMap { groups }
    }

    /// All tree-relative paths sharing `identity`, canonical member first.
    pub fn group_of(&self, identity: &FileIdentity) -> Option<&[PathBuf]> {
        self.groups.get(identity).map(Vec::as_slice)
    }

    /// Number of identities with more than one path in the tree.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Returns true if content comparison for `relative` is redundant.
///
/// That is the case when both sides link `relative` into groups of identical
/// shape and `relative` is not the group's first member, whose content
/// comparison already stands in for the whole group.
pub fn content_already_compared(
    relative: &Path,
    map1: &HardLinkMap,
    identity1: Option<FileIdentity>,
    map2: &HardLinkMap,
    identity2: Option<FileIdentity>,
) -> bool {
    let (Some(identity1), Some(identity2)) = (identity1, identity2) else {
        return false;
    };
    let (Some(group1), Some(group2)) = (map1.group_of(&identity1), map2.group_of(&identity2))
    else {
        return false;
    };
    group1 == group2 && group1.first().is_some_and(|first| first != relative)
}

#[derive(Debug)]
enum LinkState {
    /// The first member is being written
    Copying,
    /// The first member is complete at this destination
    Copied(PathBuf),
}

/// Outcome of [`LinkTracker::claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkClaim {
    /// This is the first member of the identity: copy its content, then call
    /// [`LinkTracker::complete`] or [`LinkTracker::release`].
    First,
    /// An earlier member was copied here; hard-link to it.
    LinkTo(PathBuf),
}

/// Incremental identity → first destination map used while copying.
///
/// Claims for an identity whose first member is still being written block
/// until that member completes or is released.
#[derive(Debug, Default)]
pub struct LinkTracker {
    states: Mutex<HashMap<FileIdentity, LinkState>>,
    changed: Condvar,
}

impl LinkTracker {
    pub fn new() -> Self {
        LinkTracker::default()
    }

    pub fn claim(&self, identity: FileIdentity) -> LinkClaim {
        let mut states = self.states.lock();
        loop {
            match states.get(&identity) {
                None => {
                    states.insert(identity, LinkState::Copying);
                    return LinkClaim::First;
                }
                Some(LinkState::Copied(first)) => return LinkClaim::LinkTo(first.clone()),
                Some(LinkState::Copying) => self.changed.wait(&mut states),
            }
        }
    }

    /// Record that the first member of `identity` now exists at `destination`.
    pub fn complete(&self, identity: FileIdentity, destination: &Path) {
        self.states
            .lock()
            .insert(identity, LinkState::Copied(destination.to_path_buf()));
        self.changed.notify_all();
    }

    /// Forget `identity` after its first member failed to copy, so the next
    /// member copies content instead of linking to a broken file.
    pub fn release(&self, identity: &FileIdentity) {
        self.states.lock().remove(identity);
        self.changed.notify_all();
    }
}
