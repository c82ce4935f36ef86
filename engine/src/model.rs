//! Core data model for comparison and copy runs.
//!
//! This module defines the value types that flow out of the engine:
//! - ItemKind: what a filesystem item is
//! - DifferenceKind: why two items are not identical, with its payload
//! - Event / CopyEvent: one notification per visited item
//! - CompareStatus / CopyStatus: the terminal result of a run
//! - CompareOptions / CopyOptions: run configuration

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::exclusion::ExclusionFilter;

/// Default chunk size for streaming content comparison (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// The type of a filesystem item, as seen without following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ItemKind {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link (never followed)
    SymbolicLink,
    /// Fifo, socket, device node or anything else
    Other,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKind::File => write!(f, "file"),
            ItemKind::Directory => write!(f, "directory"),
            ItemKind::SymbolicLink => write!(f, "symbolic link"),
            ItemKind::Other => write!(f, "other"),
        }
    }
}

/// The reason two items at corresponding paths are not identical.
///
/// Each variant carries exactly the payload a consumer needs to render it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum DifferenceKind {
    /// The two items are of different kinds; nothing else was compared.
    FileTypesDiffer { kind1: ItemKind, kind2: ItemKind },
    /// The item exists only under the first root.
    ItemOnlyInSide1,
    /// The item exists only under the second root.
    ItemOnlyInSide2,
    CreationDateDiffers { date1: String, date2: String },
    ModificationDateDiffers { date1: String, date2: String },
    PackageStateDiffers,
    FinderInfoDiffers,
    PlatformFlagsDiffer { flags1: u32, flags2: u32 },
    /// An extended attribute is present on one side only.
    ExtendedAttributePresenceMismatch { name: String },
    ExtendedAttributeValueDiffers { name: String },
    PermissionsDiffer { mode1: u32, mode2: u32 },
    OwnerUserDiffers { user1: String, user2: String },
    OwnerGroupDiffers { group1: String, group2: String },
    SizeDiffers { size1: u64, size2: u64 },
    /// Byte offset of the first differing byte.
    ContentDiffers { offset: u64 },
    LinkTargetDiffers { target1: String, target2: String },
}

impl DifferenceKind {
    /// Short variant name, used in one-line console output.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FileTypesDiffer { .. } => "FileTypesDiffer",
            Self::ItemOnlyInSide1 => "ItemOnlyInSide1",
            Self::ItemOnlyInSide2 => "ItemOnlyInSide2",
            Self::CreationDateDiffers { .. } => "CreationDateDiffers",
            Self::ModificationDateDiffers { .. } => "ModificationDateDiffers",
            Self::PackageStateDiffers => "PackageStateDiffers",
            Self::FinderInfoDiffers => "FinderInfoDiffers",
            Self::PlatformFlagsDiffer { .. } => "PlatformFlagsDiffer",
            Self::ExtendedAttributePresenceMismatch { .. } => "ExtendedAttributePresenceMismatch",
            Self::ExtendedAttributeValueDiffers { .. } => "ExtendedAttributeValueDiffers",
            Self::PermissionsDiffer { .. } => "PermissionsDiffer",
            Self::OwnerUserDiffers { .. } => "OwnerUserDiffers",
            Self::OwnerGroupDiffers { .. } => "OwnerGroupDiffers",
            Self::SizeDiffers { .. } => "SizeDiffers",
            Self::ContentDiffers { .. } => "ContentDiffers",
            Self::LinkTargetDiffers { .. } => "LinkTargetDiffers",
        }
    }
}

impl fmt::Display for DifferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One notification produced by the tree comparator.
///
/// Exactly one event is produced per visited item pair, directories included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event")]
pub enum Event {
    /// The two items are identical in every compared respect.
    Match { path1: PathBuf, path2: PathBuf },
    /// The two items differ. A single item pair may yield several of these.
    Difference {
        difference: DifferenceKind,
        path1: PathBuf,
        path2: PathBuf,
    },
    /// The item was excluded by name before any I/O.
    Skipped { path: PathBuf },
    /// Reading metadata or content failed for this item pair.
    Error {
        path1: PathBuf,
        path2: PathBuf,
        cause: String,
    },
}

impl Event {
    pub fn is_match(&self) -> bool {
        matches!(self, Event::Match { .. })
    }

    pub fn is_difference(&self) -> bool {
        matches!(self, Event::Difference { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Event::Error { .. })
    }

    /// The difference payload, if this is a Difference event.
    pub fn difference(&self) -> Option<&DifferenceKind> {
        match self {
            Event::Difference { difference, .. } => Some(difference),
            _ => None,
        }
    }
}

/// Per-item outcome reported by the tree copier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event")]
pub enum CopyEvent {
    /// The item and its metadata were written to the destination.
    Copied {
        source: PathBuf,
        destination: PathBuf,
        kind: ItemKind,
    },
    /// The item was excluded by name; nothing was written.
    Skipped { source: PathBuf },
    /// Copying this item failed; siblings are unaffected.
    Failed {
        source: PathBuf,
        destination: PathBuf,
        cause: String,
    },
    /// The copy succeeded and the verification pass is starting.
    VerificationStarted { source: PathBuf, destination: PathBuf },
}

impl CopyEvent {
    pub fn is_failure(&self) -> bool {
        matches!(self, CopyEvent::Failed { .. })
    }
}

/// A status type with one in-flight value and several terminal values.
pub trait TerminalStatus: Copy + Send + Sync + 'static {
    /// The in-flight value.
    fn unknown() -> Self;

    /// Returns true if this status is terminal (no further changes expected).
    fn is_terminal(&self) -> bool;

    /// The terminal value assigned when a run cannot start or its worker dies.
    fn error() -> Self;
}

/// Terminal result of one comparison run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompareStatus {
    /// Still running
    Unknown,
    /// Every visited item matched
    Success,
    /// At least one Difference and no Error was reported
    DifferencesFound,
    /// At least one per-item Error was reported
    Error,
    /// Abort was signalled before the walk completed
    Cancelled,
}

impl TerminalStatus for CompareStatus {
    fn unknown() -> Self {
        CompareStatus::Unknown
    }

    fn is_terminal(&self) -> bool {
        !matches!(self, CompareStatus::Unknown)
    }

    fn error() -> Self {
        CompareStatus::Error
    }
}

impl fmt::Display for CompareStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareStatus::Unknown => write!(f, "Unknown"),
            CompareStatus::Success => write!(f, "Success"),
            CompareStatus::DifferencesFound => write!(f, "DifferencesFound"),
            CompareStatus::Error => write!(f, "Error"),
            CompareStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Terminal result of one copy run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CopyStatus {
    /// Still running
    Unknown,
    /// Every item was copied
    Success,
    /// At least one item failed
    Error,
    /// Abort was signalled before the copy completed
    Cancelled,
}

impl TerminalStatus for CopyStatus {
    fn unknown() -> Self {
        CopyStatus::Unknown
    }

    fn is_terminal(&self) -> bool {
        !matches!(self, CopyStatus::Unknown)
    }

    fn error() -> Self {
        CopyStatus::Error
    }
}

impl fmt::Display for CopyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyStatus::Unknown => write!(f, "Unknown"),
            CopyStatus::Success => write!(f, "Success"),
            CopyStatus::Error => write!(f, "Error"),
            CopyStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Configuration for a comparison run.
#[derive(Debug, Clone)]
pub struct CompareOptions {
    /// Skip creation and modification date checks
    pub ignore_dates: bool,
    /// Skip finder info, package state, platform flags and extended attributes
    pub ignore_finder_info: bool,
    /// Names skipped on both sides
    pub exclusions: ExclusionFilter,
    /// Worker threads; 0 means one per available CPU
    pub workers: usize,
    /// Read size for streaming content comparison
    pub chunk_size: usize,
}

impl Default for CompareOptions {
    fn default() -> Self {
        CompareOptions {
            ignore_dates: false,
            ignore_finder_info: false,
            exclusions: ExclusionFilter::default(),
            workers: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl CompareOptions {
    /// Options used by the verification pass: nothing is ignored.
    pub fn strict(exclusions: ExclusionFilter) -> Self {
        CompareOptions {
            exclusions,
            ..CompareOptions::default()
        }
    }

    pub fn with_ignore_dates(mut self, ignore: bool) -> Self {
        self.ignore_dates = ignore;
        self
    }

    pub fn with_ignore_finder_info(mut self, ignore: bool) -> Self {
        self.ignore_finder_info = ignore;
        self
    }

    pub fn with_exclusions(mut self, exclusions: ExclusionFilter) -> Self {
        self.exclusions = exclusions;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the content chunk size. Zero is clamped to one byte.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

/// Configuration for a copy run.
#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    /// Names skipped on the source side
    pub exclusions: ExclusionFilter,
    /// Worker threads; 0 means one per available CPU
    pub workers: usize,
    /// Run the verification pass after a successful copy
    pub verify: bool,
}

impl CopyOptions {
    pub fn with_exclusions(mut self, exclusions: ExclusionFilter) -> Self {
        self.exclusions = exclusions;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }
}

/// Resolve a configured worker count, where 0 means "one per CPU".
pub fn effective_workers(workers: usize) -> usize {
    if workers > 0 {
        return workers;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
