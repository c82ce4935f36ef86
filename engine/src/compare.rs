//! Recursive tree comparison.
//!
//! Both roots are walked depth-first in lock-step. Every visited item pair
//! produces exactly one event: a Match, one or more Differences, a Skipped
//! notice for excluded names, or an Error when its metadata or content cannot
//! be read. Sibling subtrees are compared in parallel on a rayon pool; within
//! one directory both sides are listed and sorted by name before they are
//! partitioned, so listing order never produces spurious only-in-one-side
//! results.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::error::{describe_io, EngineError};
use crate::fs_ops::{self, DirListing};
use crate::hardlink::{content_already_compared, HardLinkMap};
use crate::metadata::{format_time, group_name, user_name, MetadataSnapshot};
use crate::model::{effective_workers, CompareOptions, CompareStatus, DifferenceKind, Event, ItemKind};
use crate::operation::{AbortFlag, Operation};
use crate::sink::EventSink;

/// Which root an unmatched item lives under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    One,
    Two,
}

/// One child name of a directory pair, after partitioning.
#[derive(Debug)]
enum ChildPair {
    Both(OsString),
    OnlyIn(Side, OsString),
}

/// Per-run counters. Scoped to one run, never shared across runs.
#[derive(Debug, Default)]
struct RunTally {
    matches: AtomicU64,
    differences: AtomicU64,
    errors: AtomicU64,
    skipped: AtomicU64,
}

impl RunTally {
    fn status(&self, aborted: bool) -> CompareStatus {
        if aborted {
            CompareStatus::Cancelled
        } else if self.errors.load(Ordering::SeqCst) > 0 {
            CompareStatus::Error
        } else if self.differences.load(Ordering::SeqCst) > 0 {
            CompareStatus::DifferencesFound
        } else {
            CompareStatus::Success
        }
    }
}

struct TreeComparator<'a> {
    root1: &'a Path,
    root2: &'a Path,
    options: &'a CompareOptions,
    links1: HardLinkMap,
    links2: HardLinkMap,
    sink: &'a dyn EventSink<Event>,
    abort: &'a AbortFlag,
    tally: RunTally,
}

/// Compare two trees, blocking until the walk completes.
///
/// # Arguments
/// * `root1` - First tree (file, directory or link)
/// * `root2` - Second tree
/// * `options` - Dates/finder-info policy, exclusions, worker count
/// * `sink` - Receives one event per visited item pair
/// * `abort` - Polled before each item; once set, no new item is started
///
/// # Returns
/// The terminal status of the run.
///
/// # Errors
/// Returns EngineError if either root cannot be found or stat'ed. Per-item
/// failures are reported as `Event::Error` and reflected in the status.
pub fn compare_trees(
    root1: &Path,
    root2: &Path,
    options: &CompareOptions,
    sink: &dyn EventSink<Event>,
    abort: &AbortFlag,
) -> Result<CompareStatus, EngineError> {
    let root_meta1 = fs::symlink_metadata(root1)
        .map_err(|e| EngineError::from_root_lookup(root1.to_path_buf(), e))?;
    let root_meta2 = fs::symlink_metadata(root2)
        .map_err(|e| EngineError::from_root_lookup(root2.to_path_buf(), e))?;

    tracing::info!(
        root1 = %root1.display(),
        root2 = %root2.display(),
        ignore_dates = options.ignore_dates,
        ignore_finder_info = options.ignore_finder_info,
        "comparison started"
    );

    let (links1, links2) = rayon::join(
        || build_link_map(root1, root_meta1.is_dir(), options),
        || build_link_map(root2, root_meta2.is_dir(), options),
    );

    let comparator = TreeComparator {
        root1,
        root2,
        options,
        links1,
        links2,
        sink,
        abort,
        tally: RunTally::default(),
    };

    let workers = effective_workers(options.workers);
    match ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool.install(|| comparator.visit_root()),
        Err(err) => {
            tracing::warn!(workers, error = %err, "worker pool unavailable; using the global pool");
            comparator.visit_root();
        }
    }

    let status = comparator.tally.status(abort.is_aborted());
    tracing::info!(
        %status,
        matches = comparator.tally.matches.load(Ordering::SeqCst),
        differences = comparator.tally.differences.load(Ordering::SeqCst),
        errors = comparator.tally.errors.load(Ordering::SeqCst),
        skipped = comparator.tally.skipped.load(Ordering::SeqCst),
        "comparison finished"
    );
    Ok(status)
}

/// Start a comparison on a background thread.
///
/// The returned handle can be aborted, polled, or waited on.
pub fn spawn_compare(
    root1: PathBuf,
    root2: PathBuf,
    options: CompareOptions,
    sink: Arc<dyn EventSink<Event>>,
) -> Operation<CompareStatus> {
    Operation::spawn("compare", move |abort| {
        compare_trees(&root1, &root2, &options, sink.as_ref(), abort)
    })
}

fn build_link_map(root: &Path, is_dir: bool, options: &CompareOptions) -> HardLinkMap {
    if is_dir {
        HardLinkMap::build(root, &options.exclusions)
    } else {
        HardLinkMap::default()
    }
}

impl TreeComparator<'_> {
    fn visit_root(&self) {
        self.visit_pair(
            self.root1.to_path_buf(),
            self.root2.to_path_buf(),
            PathBuf::new(),
        );
    }

    /// Compare one item present on both sides.
    fn visit_pair(&self, path1: PathBuf, path2: PathBuf, relative: PathBuf) {
        if self.abort.is_aborted() {
            return;
        }

        let snap1 = match MetadataSnapshot::capture(&path1) {
            Ok(snap) => snap,
            Err(e) => return self.report_error(path1, path2, describe_io("cannot read item 1", &e)),
        };
        let snap2 = match MetadataSnapshot::capture(&path2) {
            Ok(snap) => snap,
            Err(e) => return self.report_error(path1, path2, describe_io("cannot read item 2", &e)),
        };

        if snap1.kind != snap2.kind {
            let difference = DifferenceKind::FileTypesDiffer {
                kind1: snap1.kind,
                kind2: snap2.kind,
            };
            return self.report(path1, path2, vec![difference]);
        }

        match snap1.kind {
            ItemKind::Directory => self.visit_directories(path1, path2, relative, &snap1, &snap2),
            ItemKind::File => self.visit_files(path1, path2, &relative, &snap1, &snap2),
            ItemKind::SymbolicLink => {
                let mut differences = Vec::new();
                if snap1.symlink_target != snap2.symlink_target {
                    differences.push(DifferenceKind::LinkTargetDiffers {
                        target1: display_target(&snap1),
                        target2: display_target(&snap2),
                    });
                }
                // Link permission bits are not settable on every platform.
                self.compare_metadata(&snap1, &snap2, false, &mut differences);
                self.report(path1, path2, differences);
            }
            ItemKind::Other => {
                let mut differences = Vec::new();
                self.compare_metadata(&snap1, &snap2, true, &mut differences);
                self.report(path1, path2, differences);
            }
        }
    }

    fn visit_directories(
        &self,
        path1: PathBuf,
        path2: PathBuf,
        relative: PathBuf,
        snap1: &MetadataSnapshot,
        snap2: &MetadataSnapshot,
    ) {
        // Listing comes first so a failure is this directory's only event.
        let listing1 = match fs_ops::list_dir(&path1, &self.options.exclusions) {
            Ok(listing) => listing,
            Err(e) => return self.report_error(path1, path2, describe_io("cannot list directory 1", &e)),
        };
        let listing2 = match fs_ops::list_dir(&path2, &self.options.exclusions) {
            Ok(listing) => listing,
            Err(e) => return self.report_error(path1, path2, describe_io("cannot list directory 2", &e)),
        };

        let mut differences = Vec::new();
        self.compare_metadata(snap1, snap2, true, &mut differences);
        self.report(path1.clone(), path2.clone(), differences);

        self.report_skipped(&path1, &path2, &listing1, &listing2);

        partition(listing1.names, listing2.names)
            .into_par_iter()
            .for_each(|child| match child {
                ChildPair::Both(name) => {
                    self.visit_pair(path1.join(&name), path2.join(&name), relative.join(&name))
                }
                ChildPair::OnlyIn(side, name) => {
                    self.visit_unmatched(side, path1.join(&name), path2.join(&name))
                }
            });
    }

    fn visit_files(
        &self,
        path1: PathBuf,
        path2: PathBuf,
        relative: &Path,
        snap1: &MetadataSnapshot,
        snap2: &MetadataSnapshot,
    ) {
        let mut differences = Vec::new();

        if snap1.size != snap2.size {
            differences.push(DifferenceKind::SizeDiffers {
                size1: snap1.size,
                size2: snap2.size,
            });
        } else if content_already_compared(
            relative,
            &self.links1,
            snap1.link_identity,
            &self.links2,
            snap2.link_identity,
        ) {
            tracing::debug!(path = %path1.display(), "content shared with an earlier hard link");
        } else {
            match fs_ops::first_difference(&path1, &path2, self.options.chunk_size) {
                Ok(None) => {}
                Ok(Some(offset)) => differences.push(DifferenceKind::ContentDiffers { offset }),
                Err(e) => {
                    return self.report_error(path1, path2, describe_io("cannot read content", &e))
                }
            }
        }

        self.compare_metadata(snap1, snap2, true, &mut differences);
        self.report(path1, path2, differences);
    }

    /// Report an item that exists on one side only, then every descendant.
    fn visit_unmatched(&self, side: Side, path1: PathBuf, path2: PathBuf) {
        if self.abort.is_aborted() {
            return;
        }
        let present = match side {
            Side::One => &path1,
            Side::Two => &path2,
        };

        let metadata = match fs::symlink_metadata(present) {
            Ok(metadata) => metadata,
            Err(e) => return self.report_error(path1, path2, describe_io("cannot read item", &e)),
        };
        let listing = if metadata.is_dir() {
            match fs_ops::list_dir(present, &self.options.exclusions) {
                Ok(listing) => Some(listing),
                Err(e) => {
                    return self.report_error(path1, path2, describe_io("cannot list directory", &e))
                }
            }
        } else {
            None
        };

        let difference = match side {
            Side::One => DifferenceKind::ItemOnlyInSide1,
            Side::Two => DifferenceKind::ItemOnlyInSide2,
        };
        self.report(path1.clone(), path2.clone(), vec![difference]);

        let Some(listing) = listing else {
            return;
        };
        let base = match side {
            Side::One => &path1,
            Side::Two => &path2,
        };
        for name in &listing.skipped {
            self.report_skip(base.join(name));
        }
        listing.names.into_par_iter().for_each(|name| {
            self.visit_unmatched(side, path1.join(&name), path2.join(&name))
        });
    }

    /// Field-by-field metadata comparison shared by every item kind.
    fn compare_metadata(
        &self,
        snap1: &MetadataSnapshot,
        snap2: &MetadataSnapshot,
        compare_permissions: bool,
        differences: &mut Vec<DifferenceKind>,
    ) {
        if !self.options.ignore_dates {
            if let (Some(created1), Some(created2)) = (snap1.creation_time, snap2.creation_time) {
                if created1 != created2 {
                    differences.push(DifferenceKind::CreationDateDiffers {
                        date1: format_time(Some(created1)),
                        date2: format_time(Some(created2)),
                    });
                }
            }
            if snap1.modification_time != snap2.modification_time {
                differences.push(DifferenceKind::ModificationDateDiffers {
                    date1: format_time(snap1.modification_time),
                    date2: format_time(snap2.modification_time),
                });
            }
        }

        if snap1.is_package != snap2.is_package {
            differences.push(DifferenceKind::PackageStateDiffers);
        }
        if !self.options.ignore_finder_info {
            if !finder_info_equal(snap1.finder_info.as_deref(), snap2.finder_info.as_deref()) {
                differences.push(DifferenceKind::FinderInfoDiffers);
            }
            if snap1.platform_flags != snap2.platform_flags {
                differences.push(DifferenceKind::PlatformFlagsDiffer {
                    flags1: snap1.platform_flags,
                    flags2: snap2.platform_flags,
                });
            }
            compare_xattrs(snap1, snap2, differences);
        }

        if compare_permissions && snap1.permissions != snap2.permissions {
            differences.push(DifferenceKind::PermissionsDiffer {
                mode1: snap1.permissions,
                mode2: snap2.permissions,
            });
        }
        if snap1.owner_user != snap2.owner_user {
            differences.push(DifferenceKind::OwnerUserDiffers {
                user1: user_name(snap1.owner_user),
                user2: user_name(snap2.owner_user),
            });
        }
        if snap1.owner_group != snap2.owner_group {
            differences.push(DifferenceKind::OwnerGroupDiffers {
                group1: group_name(snap1.owner_group),
                group2: group_name(snap2.owner_group),
            });
        }
    }

    fn report_skipped(&self, path1: &Path, path2: &Path, listing1: &DirListing, listing2: &DirListing) {
        for name in &listing1.skipped {
            self.report_skip(path1.join(name));
        }
        for name in &listing2.skipped {
            if listing1.skipped.binary_search(name).is_err() {
                self.report_skip(path2.join(name));
            }
        }
    }

    /// Emit a Match if `differences` is empty, otherwise one event per entry.
    fn report(&self, path1: PathBuf, path2: PathBuf, differences: Vec<DifferenceKind>) {
        if differences.is_empty() {
            tracing::debug!(path = %path1.display(), "match");
            self.tally.matches.fetch_add(1, Ordering::SeqCst);
            self.sink.notify(Event::Match { path1, path2 });
            return;
        }
        for difference in differences {
            tracing::debug!(path = %path1.display(), %difference, "difference");
            self.tally.differences.fetch_add(1, Ordering::SeqCst);
            self.sink.notify(Event::Difference {
                difference,
                path1: path1.clone(),
                path2: path2.clone(),
            });
        }
    }

    fn report_skip(&self, path: PathBuf) {
        self.tally.skipped.fetch_add(1, Ordering::SeqCst);
        self.sink.notify(Event::Skipped { path });
    }

    fn report_error(&self, path1: PathBuf, path2: PathBuf, cause: String) {
        tracing::warn!(path1 = %path1.display(), path2 = %path2.display(), %cause, "item comparison failed");
        self.tally.errors.fetch_add(1, Ordering::SeqCst);
        self.sink.notify(Event::Error { path1, path2, cause });
    }
}

/// Merge two sorted name lists into shared and one-sided children.
fn partition(names1: Vec<OsString>, names2: Vec<OsString>) -> Vec<ChildPair> {
    let mut children = Vec::with_capacity(names1.len().max(names2.len()));
    let mut iter1 = names1.into_iter().peekable();
    let mut iter2 = names2.into_iter().peekable();

    loop {
        let next = match (iter1.peek(), iter2.peek()) {
            (None, None) => break,
            (Some(_), None) => Side::One,
            (None, Some(_)) => Side::Two,
            (Some(a), Some(b)) => match a.cmp(b) {
                std::cmp::Ordering::Less => Side::One,
                std::cmp::Ordering::Greater => Side::Two,
                std::cmp::Ordering::Equal => {
                    iter2.next();
                    if let Some(name) = iter1.next() {
                        children.push(ChildPair::Both(name));
                    }
                    continue;
                }
            },
        };
        let name = match next {
            Side::One => iter1.next(),
            Side::Two => iter2.next(),
        };
        if let Some(name) = name {
            children.push(ChildPair::OnlyIn(next, name));
        }
    }
    children
}

/// Absent Finder info and an all-zero record mean the same thing.
fn finder_info_equal(info1: Option<&[u8]>, info2: Option<&[u8]>) -> bool {
    fn meaningful(info: Option<&[u8]>) -> Option<&[u8]> {
        info.filter(|bytes| bytes.iter().any(|b| *b != 0))
    }
    meaningful(info1) == meaningful(info2)
}

fn compare_xattrs(
    snap1: &MetadataSnapshot,
    snap2: &MetadataSnapshot,
    differences: &mut Vec<DifferenceKind>,
) {
    let attrs1 = &snap1.extended_attributes;
    let attrs2 = &snap2.extended_attributes;

    for (name, value1) in attrs1 {
        let name_text = name.to_string_lossy().into_owned();
        match attrs2.get(name) {
            None => differences.push(DifferenceKind::ExtendedAttributePresenceMismatch { name: name_text }),
            Some(value2) if value1 != value2 => {
                differences.push(DifferenceKind::ExtendedAttributeValueDiffers { name: name_text })
            }
            Some(_) => {}
        }
    }
    for name in attrs2.keys().filter(|name| !attrs1.contains_key(*name)) {
        differences.push(DifferenceKind::ExtendedAttributePresenceMismatch {
            name: name.to_string_lossy().into_owned(),
        });
    }
}

fn display_target(snapshot: &MetadataSnapshot) -> String {
    snapshot
        .symlink_target
        .as_deref()
        .map(|target| target.to_string_lossy().into_owned())
        .unwrap_or_default()
}
