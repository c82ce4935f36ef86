//! # treemirror Engine - Tree Comparison and Verified Copy
//!
//! A headless engine that compares two filesystem trees item by item and
//! copies trees with their full metadata, optionally proving the copy by
//! comparing it back against the source.
//!
//! ## Overview
//!
//! The engine provides:
//! - Lock-step recursive comparison with one typed event per item pair
//! - Byte-level content comparison reporting the first differing offset
//! - Metadata comparison: dates, permissions, owners, platform flags,
//!   extended attributes, Finder info and package state
//! - Hard-link aware comparison and copying
//! - Name-based exclusion of OS housekeeping files
//! - Parallel subtree work with cooperative cancellation
//!
//! ## Basic Usage
//!
//! ```no_run
//! use std::path::Path;
//! use treemirror_engine::{compare_trees, AbortFlag, CompareOptions, Collector, Event};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let events = Collector::<Event>::new();
//! let status = compare_trees(
//!     Path::new("/data/photos"),
//!     Path::new("/backup/photos"),
//!     &CompareOptions::default().with_ignore_dates(true),
//!     &events,
//!     &AbortFlag::new(),
//! )?;
//!
//! for event in events.events().iter().filter(|e| !e.is_match()) {
//!     println!("{:?}", event);
//! }
//! println!("{}", status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Events, difference kinds, statuses and run options
//! - **error**: Run-level error type
//! - **exclusion**: Name-based exclusion filter
//! - **hardlink**: Hard-link identity maps and the copier's link tracker
//! - **metadata**: Metadata snapshots and platform metadata I/O
//! - **fs_ops**: Low-level listing, content and link operations
//! - **compare**: The tree comparator
//! - **copy**: The tree copier
//! - **verify**: Post-copy verification
//! - **sink**: Event sink trait and collectors
//! - **operation**: Abort flags and background run handles

pub mod model;
pub mod error;
pub mod exclusion;
pub mod hardlink;
pub mod metadata;
pub mod fs_ops;
pub mod compare;
pub mod copy;
pub mod verify;
pub mod sink;
pub mod operation;

// Re-export main types and functions
pub use model::{
    CompareOptions, CompareStatus, CopyEvent, CopyOptions, CopyStatus, DifferenceKind, Event,
    ItemKind, TerminalStatus, DEFAULT_CHUNK_SIZE,
};
pub use error::EngineError;
pub use exclusion::{ExclusionFilter, Preprocess, DEFAULT_EXCLUSIONS};
pub use compare::{compare_trees, spawn_compare};
pub use copy::{copy_tree, resolve_destination, spawn_copy};
pub use verify::{copy_and_verify, verify_copy, CopyOutcome};
pub use sink::{Collector, EventSink, NullSink};
pub use operation::{AbortFlag, Operation, StatusCell};
