//! Recursive tree copy.
//!
//! This module provides the copy lifecycle:
//! - Resolving where a copy lands for a user-supplied destination
//! - A pre-flight kind check against whatever already exists there
//! - Copying the tree with per-item outcomes
//!
//! Fifos and device nodes are recreated in place; sockets fail per item.
//! Directories are created before their children and receive their own
//! metadata after every child is done, so a read-only directory or a
//! restored modification date is not disturbed by the writes beneath it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use walkdir::WalkDir;

use crate::error::{describe_io, EngineError};
use crate::exclusion::ExclusionFilter;
use crate::fs_ops;
use crate::hardlink::{LinkClaim, LinkTracker};
use crate::metadata::{apply_metadata, MetadataSnapshot};
use crate::model::{effective_workers, CopyEvent, CopyOptions, CopyStatus, ItemKind};
use crate::operation::{AbortFlag, Operation};
use crate::sink::EventSink;

/// Work out the final destination root for copying `source` to `destination`.
///
/// If `destination` is an existing directory the copy lands inside it under
/// the source's leaf name. Otherwise `destination` itself is the new root and
/// its parent must be an existing directory.
///
/// # Errors
/// - `DestinationNotDirectory` if `destination` (or its parent) exists but is
///   not a directory
/// - `DestinationParentNotFound` if neither `destination` nor its parent exist
/// - `InvalidPath` if the source has no leaf name to copy into a directory
pub fn resolve_destination(source: &Path, destination: &Path) -> Result<PathBuf, EngineError> {
    match fs::metadata(destination) {
        Ok(metadata) if metadata.is_dir() => {
            let leaf = source.file_name().ok_or_else(|| EngineError::InvalidPath {
                path: source.to_path_buf(),
                reason: "source has no final component".to_string(),
            })?;
            return Ok(destination.join(leaf));
        }
        Ok(_) => {
            return Err(EngineError::DestinationNotDirectory {
                path: destination.to_path_buf(),
            })
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(EngineError::Io {
                path: destination.to_path_buf(),
                source: e,
            })
        }
    }

    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    match fs::metadata(parent) {
        Ok(metadata) if metadata.is_dir() => Ok(destination.to_path_buf()),
        Ok(_) => Err(EngineError::DestinationNotDirectory {
            path: parent.to_path_buf(),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(EngineError::DestinationParentNotFound {
            path: parent.to_path_buf(),
        }),
        Err(e) => Err(EngineError::Io {
            path: parent.to_path_buf(),
            source: e,
        }),
    }
}

/// Check that nothing already at the destination has the wrong kind.
///
/// Walks the source tree (without following links, skipping excluded names)
/// and, for every path that also exists under `destination`, requires both
/// to agree on being a directory. Unreadable source entries are left for the
/// copy itself to report.
fn preflight(source: &Path, destination: &Path, exclusions: &ExclusionFilter) -> Result<(), EngineError> {
    if fs::symlink_metadata(destination).is_err() {
        return Ok(());
    }

    let walker = WalkDir::new(source)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !exclusions.is_excluded(entry.file_name()));

    for entry in walker.filter_map(Result::ok) {
        let relative = entry.path().strip_prefix(source).unwrap_or(Path::new(""));
        let target = if relative.as_os_str().is_empty() {
            destination.to_path_buf()
        } else {
            destination.join(relative)
        };
        let existing = match fs::symlink_metadata(&target) {
            Ok(existing) => existing,
            Err(_) => continue,
        };

        let source_is_dir = entry.file_type().is_dir();
        if existing.is_dir() != source_is_dir {
            return Err(EngineError::DestinationTypeMismatch {
                path: target,
                found: if existing.is_dir() { "directory" } else { "non-directory" },
                expected: if source_is_dir { "directory" } else { "non-directory" },
            });
        }
    }
    Ok(())
}

/// True if `destination` is `source` or lies beneath it once both are
/// canonicalized. A destination that does not exist yet is judged by its parent.
fn is_within(source: &Path, destination: &Path) -> bool {
    let Ok(source) = fs::canonicalize(source) else {
        return false;
    };
    let destination = match fs::canonicalize(destination) {
        Ok(path) => path,
        Err(_) => match (destination.parent(), destination.file_name()) {
            (Some(parent), Some(leaf)) => {
                let parent = if parent.as_os_str().is_empty() { Path::new(".") } else { parent };
                match fs::canonicalize(parent) {
                    Ok(parent) => parent.join(leaf),
                    Err(_) => return false,
                }
            }
            _ => return false,
        },
    };
    destination.starts_with(&source)
}

#[derive(Debug, Default)]
struct CopyTally {
    copied: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

struct TreeCopier<'a> {
    options: &'a CopyOptions,
    sink: &'a dyn EventSink<CopyEvent>,
    abort: &'a AbortFlag,
    links: LinkTracker,
    tally: CopyTally,
}

/// Copy `source` to exactly `destination`, blocking until done.
///
/// `destination` is the new root itself; use [`resolve_destination`] first
/// to get "copy into directory" behaviour.
///
/// # Errors
/// Returns EngineError if the source is missing or unreadable, if the
/// destination lies inside a source directory, or if an existing
/// destination item has the wrong kind. No item is written in any case.
/// Per-item failures are reported as `CopyEvent::Failed`.
pub fn copy_tree(
    source: &Path,
    destination: &Path,
    options: &CopyOptions,
    sink: &dyn EventSink<CopyEvent>,
    abort: &AbortFlag,
) -> Result<CopyStatus, EngineError> {
    let root = fs::symlink_metadata(source)
        .map_err(|e| EngineError::from_root_lookup(source.to_path_buf(), e))?;
    if root.is_dir() && is_within(source, destination) {
        return Err(EngineError::InvalidPath {
            path: destination.to_path_buf(),
            reason: "destination is inside the source tree".to_string(),
        });
    }
    preflight(source, destination, &options.exclusions)?;

    tracing::info!(
        source = %source.display(),
        destination = %destination.display(),
        "copy started"
    );

    let copier = TreeCopier {
        options,
        sink,
        abort,
        links: LinkTracker::new(),
        tally: CopyTally::default(),
    };

    let workers = effective_workers(options.workers);
    match ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool.install(|| copier.copy_item(source.to_path_buf(), destination.to_path_buf())),
        Err(err) => {
            tracing::warn!(workers, error = %err, "worker pool unavailable; using the global pool");
            copier.copy_item(source.to_path_buf(), destination.to_path_buf());
        }
    }

    let failed = copier.tally.failed.load(Ordering::SeqCst);
    let status = if abort.is_aborted() {
        CopyStatus::Cancelled
    } else if failed > 0 {
        CopyStatus::Error
    } else {
        CopyStatus::Success
    };
    tracing::info!(
        %status,
        copied = copier.tally.copied.load(Ordering::SeqCst),
        skipped = copier.tally.skipped.load(Ordering::SeqCst),
        failed,
        "copy finished"
    );
    Ok(status)
}

/// Start a copy on a background thread.
pub fn spawn_copy(
    source: PathBuf,
    destination: PathBuf,
    options: CopyOptions,
    sink: Arc<dyn EventSink<CopyEvent>>,
) -> Operation<CopyStatus> {
    Operation::spawn("copy", move |abort| {
        copy_tree(&source, &destination, &options, sink.as_ref(), abort)
    })
}

impl TreeCopier<'_> {
    fn copy_item(&self, source: PathBuf, destination: PathBuf) {
        if self.abort.is_aborted() {
            return;
        }

        let snapshot = match MetadataSnapshot::capture(&source) {
            Ok(snapshot) => snapshot,
            Err(e) => return self.fail(source, destination, describe_io("cannot read source item", &e)),
        };

        match snapshot.kind {
            ItemKind::Directory => self.copy_directory(source, destination, &snapshot),
            ItemKind::File => self.copy_file(source, destination, &snapshot),
            ItemKind::SymbolicLink => {
                let result = match &snapshot.symlink_target {
                    Some(target) => fs_ops::copy_symlink(target, &destination),
                    None => Err(io::Error::new(io::ErrorKind::InvalidData, "link target unavailable")),
                };
                let result = result
                    .map_err(|e| describe_io("cannot create link", &e))
                    .and_then(|()| {
                        apply_metadata(&destination, &snapshot)
                            .map_err(|e| describe_io("cannot apply metadata", &e))
                    });
                self.finish(source, destination, snapshot.kind, result);
            }
            ItemKind::Other => {
                let result = fs::symlink_metadata(&source)
                    .and_then(|metadata| fs_ops::create_special(&metadata, &destination))
                    .map_err(|e| describe_io("cannot create special file", &e))
                    .and_then(|()| {
                        apply_metadata(&destination, &snapshot)
                            .map_err(|e| describe_io("cannot apply metadata", &e))
                    });
                self.finish(source, destination, snapshot.kind, result);
            }
        }
    }

    fn copy_directory(&self, source: PathBuf, destination: PathBuf, snapshot: &MetadataSnapshot) {
        if let Err(e) = fs_ops::ensure_dir(&destination) {
            return self.fail(source, destination, describe_io("cannot create directory", &e));
        }
        let listing = match fs_ops::list_dir(&source, &self.options.exclusions) {
            Ok(listing) => listing,
            Err(e) => return self.fail(source, destination, describe_io("cannot list directory", &e)),
        };

        for name in &listing.skipped {
            tracing::debug!(path = %source.join(name).display(), "skipped");
            self.tally.skipped.fetch_add(1, Ordering::SeqCst);
            self.sink.notify(CopyEvent::Skipped {
                source: source.join(name),
            });
        }

        listing.names.par_iter().for_each(|name| {
            self.copy_item(source.join(name), destination.join(name));
        });

        let result = apply_metadata(&destination, snapshot)
            .map_err(|e| describe_io("cannot apply metadata", &e));
        self.finish(source, destination, ItemKind::Directory, result);
    }

    fn copy_file(&self, source: PathBuf, destination: PathBuf, snapshot: &MetadataSnapshot) {
        let Some(identity) = snapshot.link_identity else {
            let result = self.write_file(&source, &destination, snapshot);
            return self.finish(source, destination, ItemKind::File, result);
        };

        match self.links.claim(identity) {
            LinkClaim::LinkTo(first) => {
                tracing::debug!(path = %destination.display(), first = %first.display(), "recreating hard link");
                let result = fs_ops::relink(&first, &destination)
                    .map_err(|e| describe_io("cannot create hard link", &e));
                self.finish(source, destination, ItemKind::File, result);
            }
            LinkClaim::First => {
                let result = self.write_file(&source, &destination, snapshot);
                if result.is_ok() {
                    self.links.complete(identity, &destination);
                } else {
                    self.links.release(&identity);
                }
                self.finish(source, destination, ItemKind::File, result);
            }
        }
    }

    fn write_file(&self, source: &Path, destination: &Path, snapshot: &MetadataSnapshot) -> Result<(), String> {
        let bytes = fs_ops::copy_file_content(source, destination)
            .map_err(|e| describe_io("cannot copy content", &e))?;
        tracing::trace!(path = %destination.display(), bytes, "content copied");
        apply_metadata(destination, snapshot).map_err(|e| describe_io("cannot apply metadata", &e))
    }

    fn finish(&self, source: PathBuf, destination: PathBuf, kind: ItemKind, result: Result<(), String>) {
        match result {
            Ok(()) => {
                tracing::debug!(path = %source.display(), %kind, "copied");
                self.tally.copied.fetch_add(1, Ordering::SeqCst);
                self.sink.notify(CopyEvent::Copied {
                    source,
                    destination,
                    kind,
                });
            }
            Err(cause) => self.fail(source, destination, cause),
        }
    }

    fn fail(&self, source: PathBuf, destination: PathBuf, cause: String) {
        tracing::warn!(source = %source.display(), %cause, "item copy failed");
        self.tally.failed.fetch_add(1, Ordering::SeqCst);
        self.sink.notify(CopyEvent::Failed {
            source,
            destination,
            cause,
        });
    }
}
