//! Post-copy verification.
//!
//! A copy that reports Success has only written bytes. Verification re-runs
//! the comparator between source and destination with nothing ignored, so
//! any Difference or Error turns the combined run into a failure.

use std::path::Path;

use crate::compare::compare_trees;
use crate::copy::copy_tree;
use crate::error::EngineError;
use crate::exclusion::ExclusionFilter;
use crate::model::{CompareOptions, CompareStatus, CopyEvent, CopyOptions, CopyStatus, Event};
use crate::operation::AbortFlag;
use crate::sink::EventSink;

/// Result of a copy optionally followed by verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOutcome {
    pub copy: CopyStatus,
    /// `None` when verification was not requested or the copy did not succeed
    pub verify: Option<CompareStatus>,
}

impl CopyOutcome {
    /// True only if the copy succeeded and, when it ran, verification found
    /// no difference and no error.
    pub fn is_success(&self) -> bool {
        self.copy == CopyStatus::Success
            && self.verify.map_or(true, |status| status == CompareStatus::Success)
    }
}

/// Compare `source` against its copy at `destination` with strict settings.
///
/// Dates and finder info are never ignored here.
pub fn verify_copy(
    source: &Path,
    destination: &Path,
    exclusions: &ExclusionFilter,
    workers: usize,
    sink: &dyn EventSink<Event>,
    abort: &AbortFlag,
) -> Result<CompareStatus, EngineError> {
    let options = CompareOptions::strict(exclusions.clone()).with_workers(workers);
    compare_trees(source, destination, &options, sink, abort)
}

/// Copy `source` to `destination`, then verify it if `options.verify` is set.
///
/// Verification only runs after a Success copy; its events go to
/// `compare_sink`, the copy's own events to `copy_sink`. The copy sink
/// receives `CopyEvent::VerificationStarted` just before the comparison.
pub fn copy_and_verify(
    source: &Path,
    destination: &Path,
    options: &CopyOptions,
    copy_sink: &dyn EventSink<CopyEvent>,
    compare_sink: &dyn EventSink<Event>,
    abort: &AbortFlag,
) -> Result<CopyOutcome, EngineError> {
    let copy = copy_tree(source, destination, options, copy_sink, abort)?;
    if !options.verify || copy != CopyStatus::Success {
        return Ok(CopyOutcome { copy, verify: None });
    }

    tracing::info!(destination = %destination.display(), "verifying copy");
    copy_sink.notify(CopyEvent::VerificationStarted {
        source: source.to_path_buf(),
        destination: destination.to_path_buf(),
    });
    let verify = verify_copy(
        source,
        destination,
        &options.exclusions,
        options.workers,
        compare_sink,
        abort,
    )?;
    Ok(CopyOutcome {
        copy,
        verify: Some(verify),
    })
}
