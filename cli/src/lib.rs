//! treemirror - shared pieces of the `compare` and `copy` command-line tools.
//!
//! This holds everything the two binaries have in common: input path
//! resolution, console rendering of engine events, the end-of-run error
//! summary and the elapsed-time line.

use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;
use treemirror_engine::{CopyEvent, DifferenceKind, Event, EventSink};

/// Install the stderr log subscriber. `RUST_LOG` overrides the default
/// `warn` level.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// The process working directory, or `None` (with a printed warning) if it
/// has been removed from under us.
pub fn working_directory() -> Option<PathBuf> {
    match std::env::current_dir() {
        Ok(dir) => Some(dir),
        Err(_) => {
            println!("WARNING: Current working directory appears invalid. (Was this directory deleted?)");
            None
        }
    }
}

/// Turn a user-supplied path into an absolute, lexically simplified one.
///
/// Relative input is joined onto `working_dir`; `.` components are dropped
/// and `..` removes the preceding component (never climbing above the
/// root). Symlinks are not resolved.
///
/// # Returns
/// `None` if `input` is empty, or relative with no working directory.
pub fn resolve_input_path(input: &Path, working_dir: Option<&Path>) -> Option<PathBuf> {
    if input.as_os_str().is_empty() {
        return None;
    }
    let joined = if input.is_absolute() {
        input.to_path_buf()
    } else {
        working_dir?.join(input)
    };

    let mut simplified = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => simplified.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(simplified.components().next_back(), Some(Component::Normal(_))) {
                    simplified.pop();
                }
            }
            Component::Normal(name) => simplified.push(name),
        }
    }
    Some(simplified)
}

/// Replace control characters with a visible `{0xNN}` escape.
pub fn sanitize_for_output(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for ch in text.chars() {
        if (ch as u32) < 32 {
            result.push_str(&format!("{{0x{:02x}}}", ch as u32));
        } else {
            result.push(ch);
        }
    }
    result
}

fn shown(path: &Path) -> String {
    sanitize_for_output(&path.to_string_lossy())
}

/// Render a run duration as `<tag>: ...`.
///
/// Under a minute this is `<tag>: N seconds.`; otherwise the duration is
/// broken into years, days, hours, minutes and seconds, followed by the raw
/// second count.
pub fn format_elapsed(tag: &str, seconds: u64) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;
    const YEAR: u64 = 365 * DAY;

    if seconds < MINUTE {
        return format!("{}: {} seconds.", tag, seconds);
    }

    let mut remaining = seconds;
    let mut formatted = String::new();
    for (unit, name) in [(YEAR, "year"), (DAY, "day"), (HOUR, "hour"), (MINUTE, "minute"), (1, "second")] {
        if remaining >= unit {
            let count = remaining / unit;
            formatted.push_str(&format!("{} {}{} ", count, name, if count > 1 { "s" } else { "" }));
            remaining %= unit;
        }
    }
    format!("{}: {}({} seconds).", tag, formatted, seconds)
}

/// Text lines for one comparison event.
///
/// With `summarize` set, payload detail lines (dates, owners, sizes,
/// offsets) are left out; the headline is always printed.
pub fn render_compare_event(event: &Event, summarize: bool) -> Vec<String> {
    match event {
        Event::Match { path1, .. } => vec![format!("Match: {}", shown(path1))],
        Event::Skipped { path } => vec![format!("Skipped: <{}>.", shown(path))],
        Event::Error { path1, path2, cause } => vec![format!(
            "* Error: compare failed for <{}> and <{}> ({}).",
            shown(path1),
            shown(path2),
            sanitize_for_output(cause)
        )],
        Event::Difference {
            difference,
            path1,
            path2,
        } => render_difference(difference, &shown(path1), &shown(path2), summarize),
    }
}

fn render_difference(difference: &DifferenceKind, p1: &str, p2: &str, summarize: bool) -> Vec<String> {
    let headline = |what: &str| format!("* Files <{}> and <{}> {}.", p1, p2, what);
    let (first, detail): (String, Vec<String>) = match difference {
        DifferenceKind::ItemOnlyInSide1 => (format!("* File only in 1: <{}>", p1), Vec::new()),
        DifferenceKind::ItemOnlyInSide2 => (format!("* File only in 2: <{}>", p2), Vec::new()),
        DifferenceKind::FileTypesDiffer { kind1, kind2 } => (
            headline("are different types"),
            vec![format!("* -- type 1: {}", kind1), format!("* -- type 2: {}", kind2)],
        ),
        DifferenceKind::CreationDateDiffers { date1, date2 } => (
            headline("have different creation dates"),
            vec![
                format!("* -- creation date 1: {}", date1),
                format!("* -- creation date 2: {}", date2),
            ],
        ),
        DifferenceKind::ModificationDateDiffers { date1, date2 } => (
            headline("have different modification dates"),
            vec![format!("* -- mod date 1: {}", date1), format!("* -- mod date 2: {}", date2)],
        ),
        DifferenceKind::PackageStateDiffers => (headline("have different package states"), Vec::new()),
        DifferenceKind::FinderInfoDiffers => (headline("have different finder info flags"), Vec::new()),
        DifferenceKind::PlatformFlagsDiffer { flags1, flags2 } => (
            headline("have different platform flags"),
            vec![format!("* -- flags 1: 0x{:08x}", flags1), format!("* -- flags 2: 0x{:08x}", flags2)],
        ),
        DifferenceKind::ExtendedAttributePresenceMismatch { name } => (
            headline("have different xattrs"),
            vec![format!("* -- xattr: {}", sanitize_for_output(name))],
        ),
        DifferenceKind::ExtendedAttributeValueDiffers { name } => (
            headline("have xattrs with different values"),
            vec![format!("* -- xattr: {}", sanitize_for_output(name))],
        ),
        DifferenceKind::PermissionsDiffer { mode1, mode2 } => (
            headline("have different unix permissions flags"),
            vec![format!("* -- mode 1: {:04o}", mode1), format!("* -- mode 2: {:04o}", mode2)],
        ),
        DifferenceKind::OwnerUserDiffers { user1, user2 } => (
            headline("have different user owners"),
            vec![format!("* -- user 1: {}", user1), format!("* -- user 2: {}", user2)],
        ),
        DifferenceKind::OwnerGroupDiffers { group1, group2 } => (
            headline("have different group owners"),
            vec![format!("* -- group 1: {}", group1), format!("* -- group 2: {}", group2)],
        ),
        DifferenceKind::SizeDiffers { size1, size2 } => (
            headline("have different sizes"),
            vec![format!("* -- size 1: {}", size1), format!("* -- size 2: {}", size2)],
        ),
        DifferenceKind::ContentDiffers { offset } => (
            headline("differ"),
            vec![format!("--(offset to first difference: {})", offset)],
        ),
        DifferenceKind::LinkTargetDiffers { target1, target2 } => (
            headline("have different link targets"),
            vec![
                format!("* -- target 1: {}", sanitize_for_output(target1)),
                format!("* -- target 2: {}", sanitize_for_output(target2)),
            ],
        ),
    };

    let mut lines = vec![first];
    if !summarize {
        lines.extend(detail);
    }
    lines
}

/// Text lines for one copy event.
pub fn render_copy_event(event: &CopyEvent) -> Vec<String> {
    match event {
        CopyEvent::Copied { source, .. } => vec![format!("Copied {}", shown(source))],
        CopyEvent::Skipped { source } => vec![format!("Skipped: <{}>.", shown(source))],
        CopyEvent::Failed { source, .. } => vec![format!("ERROR copying {}", shown(source))],
        CopyEvent::VerificationStarted { .. } => vec!["Copy complete. Verifying...".to_string()],
    }
}

/// Format the collected errors of a run, framed by `rule` lines.
///
/// # Returns
/// An empty string when there were no errors.
pub fn error_summary(errors: &[String], rule: &str) -> String {
    if errors.is_empty() {
        return String::new();
    }
    let mut summary = format!("\n{}\nThere were errors:\n", rule);
    for error in errors {
        summary.push_str(error);
        summary.push('\n');
    }
    summary.push_str(rule);
    summary.push_str("\n\n");
    summary
}

/// Console event sink shared by both tools.
///
/// Prints each event as it arrives (text or one JSON object per line) and
/// keeps the per-item errors for the end-of-run summary.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    summarize: bool,
    json: bool,
    hide_matches: bool,
    errors: Mutex<Vec<String>>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        ConsoleSink::default()
    }

    /// Leave out payload detail lines.
    pub fn with_summarize(mut self, summarize: bool) -> Self {
        self.summarize = summarize;
        self
    }

    /// Print events as JSON lines instead of text.
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Suppress Match lines; differences, skips and errors are still shown.
    pub fn with_hide_matches(mut self, hide: bool) -> Self {
        self.hide_matches = hide;
        self
    }

    /// Errors seen so far, in arrival order.
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.lock().is_empty()
    }

    fn record_error(&self, error: String) {
        self.errors.lock().push(error);
    }

    fn emit<T: Serialize>(&self, event: &T, lines: Vec<String>) {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        if self.json {
            match serde_json::to_string(event) {
                Ok(line) => {
                    let _ = writeln!(out, "{}", line);
                }
                Err(err) => tracing::warn!(error = %err, "event not serializable"),
            }
            return;
        }
        for line in lines {
            let _ = writeln!(out, "{}", line);
        }
    }
}

impl EventSink<Event> for ConsoleSink {
    fn notify(&self, event: Event) {
        if let Event::Error { path1, path2, cause } = &event {
            self.record_error(format!("{} and {}: {}", shown(path1), shown(path2), cause));
        }
        if self.hide_matches && event.is_match() {
            return;
        }
        let lines = render_compare_event(&event, self.summarize);
        self.emit(&event, lines);
    }
}

impl EventSink<CopyEvent> for ConsoleSink {
    fn notify(&self, event: CopyEvent) {
        if let CopyEvent::Failed { source, cause, .. } = &event {
            self.record_error(format!("{}: {}", shown(source), cause));
        }
        let lines = render_copy_event(&event);
        self.emit(&event, lines);
    }
}
