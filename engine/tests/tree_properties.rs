use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use filetime::FileTime;
use treemirror_engine::{
    compare_trees, copy_and_verify, copy_tree, spawn_compare, AbortFlag, Collector, CompareOptions,
    CompareStatus, CopyEvent, CopyOptions, CopyStatus, DifferenceKind, Event, NullSink,
};
use walkdir::WalkDir;

const FIXED_TIME: i64 = 1_600_000_000;

/// Write `files` (relative path, content) under `root`, creating parents.
fn build_tree(root: &Path, files: &[(&str, &[u8])]) {
    fs::create_dir_all(root).expect("Failed to create root");
    for (relative, content) in files {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent");
        }
        fs::write(&path, content).expect("Failed to write fixture file");
    }
}

/// Give every item under `root` the same access and modification time.
fn stamp(root: &Path) {
    let time = FileTime::from_unix_time(FIXED_TIME, 0);
    let entries: Vec<_> = WalkDir::new(root)
        .contents_first(true)
        .into_iter()
        .map(|entry| entry.expect("Failed to walk fixture").into_path())
        .collect();
    for path in entries {
        filetime::set_symlink_file_times(&path, time, time).expect("Failed to stamp fixture");
    }
}

fn compare(root1: &Path, root2: &Path, options: &CompareOptions) -> (CompareStatus, Vec<Event>) {
    let collector = Collector::<Event>::new();
    let status = compare_trees(root1, root2, options, &collector, &AbortFlag::new())
        .expect("Comparison failed to start");
    (status, collector.into_events())
}

fn differences(events: &[Event]) -> Vec<DifferenceKind> {
    events.iter().filter_map(Event::difference).cloned().collect()
}

/// Differences reported for the item whose path ends with `leaf`.
fn differences_at(events: &[Event], leaf: &str) -> Vec<DifferenceKind> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Difference { path1, difference, .. } if path1.ends_with(leaf) => Some(difference.clone()),
            _ => None,
        })
        .collect()
}

/// Set an extended attribute, or report that the filesystem refuses them.
#[cfg(unix)]
fn set_xattr(path: &Path, name: &str, value: &[u8]) -> bool {
    match xattr::set(path, name, value) {
        Ok(()) => true,
        Err(err) => {
            eprintln!("extended attributes unavailable at {}: {}", path.display(), err);
            false
        }
    }
}

#[cfg(unix)]
fn make_fifo(path: &Path, mode: u32) {
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes()).expect("Path contains NUL");
    // SAFETY: c_path is NUL-terminated and outlives the call.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), mode as libc::mode_t) };
    assert_eq!(rc, 0, "mkfifo failed: {}", std::io::Error::last_os_error());
}

const SAMPLE: &[(&str, &[u8])] = &[
    ("readme.txt", b"hello"),
    ("docs/guide.md", b"# Guide"),
    ("docs/img/logo.bin", &[1, 2, 3, 4, 5]),
    ("empty.dat", b""),
];

#[test]
fn test_identical_trees_only_match() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let left = temp_dir.path().join("left");
    let right = temp_dir.path().join("right");
    build_tree(&left, SAMPLE);
    build_tree(&right, SAMPLE);
    stamp(&left);
    stamp(&right);

    let (status, events) = compare(&left, &right, &CompareOptions::default());

    assert_eq!(status, CompareStatus::Success);
    assert!(events.iter().all(Event::is_match), "unexpected events: {:?}", events);
    // root, docs, docs/img and the four files
    assert_eq!(events.len(), 7);
}

#[test]
fn test_single_content_difference_reports_offset() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let left = temp_dir.path().join("left");
    let right = temp_dir.path().join("right");
    let original = vec![0x5au8; 5_000];
    let mut changed = original.clone();
    changed[3_210] = 0xa5;
    build_tree(&left, &[("data.bin", &original), ("same.txt", b"same")]);
    build_tree(&right, &[("data.bin", &changed), ("same.txt", b"same")]);
    stamp(&left);
    stamp(&right);

    let options = CompareOptions::default().with_chunk_size(1_024);
    let (status, events) = compare(&left, &right, &options);

    assert_eq!(status, CompareStatus::DifferencesFound);
    assert_eq!(differences(&events), vec![DifferenceKind::ContentDiffers { offset: 3_210 }]);
}

#[test]
fn test_size_difference_is_reported() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let left = temp_dir.path().join("left");
    let right = temp_dir.path().join("right");
    build_tree(&left, &[("notes.txt", b"short")]);
    build_tree(&right, &[("notes.txt", b"a little longer")]);
    stamp(&left);
    stamp(&right);

    let (status, events) = compare(&left, &right, &CompareOptions::default());

    assert_eq!(status, CompareStatus::DifferencesFound);
    assert_eq!(
        differences(&events),
        vec![DifferenceKind::SizeDiffers { size1: 5, size2: 15 }]
    );
}

#[test]
fn test_excluded_names_are_only_skipped() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let left = temp_dir.path().join("left");
    let right = temp_dir.path().join("right");
    build_tree(&left, &[("a.txt", b"a"), (".DS_Store", b"view"), ("Thumbs.db", b"one")]);
    build_tree(&right, &[("a.txt", b"a"), ("Thumbs.db", b"two, different")]);
    stamp(&left);
    stamp(&right);

    let (status, events) = compare(&left, &right, &CompareOptions::default());

    assert_eq!(status, CompareStatus::Success);
    let skipped: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            Event::Skipped { path } => path.file_name().map(|n| n.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    assert_eq!(skipped.len(), 2);
    assert!(skipped.contains(&".DS_Store".to_string()));
    assert!(skipped.contains(&"Thumbs.db".to_string()));

    for event in events.iter().filter(|e| !matches!(e, Event::Skipped { .. })) {
        if let Event::Match { path1, .. } = event {
            let name = path1.file_name().map(|n| n.to_string_lossy().into_owned());
            assert_ne!(name.as_deref(), Some(".DS_Store"));
            assert_ne!(name.as_deref(), Some("Thumbs.db"));
        }
    }
}

#[test]
fn test_ignore_dates_controls_date_differences() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let left = temp_dir.path().join("left");
    let right = temp_dir.path().join("right");
    build_tree(&left, SAMPLE);
    build_tree(&right, SAMPLE);
    stamp(&left);
    stamp(&right);
    let later = FileTime::from_unix_time(FIXED_TIME + 3_600, 0);
    filetime::set_file_times(right.join("readme.txt"), later, later).expect("Failed to set time");

    let (status, events) = compare(&left, &right, &CompareOptions::default().with_ignore_dates(true));
    assert_eq!(status, CompareStatus::Success);
    assert!(events.iter().all(Event::is_match));

    let (status, events) = compare(&left, &right, &CompareOptions::default());
    assert_eq!(status, CompareStatus::DifferencesFound);
    let found = differences(&events);
    assert_eq!(found.len(), 1);
    assert!(matches!(found[0], DifferenceKind::ModificationDateDiffers { .. }));
}

#[test]
fn test_item_only_in_side1() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let left = temp_dir.path().join("left");
    let right = temp_dir.path().join("right");
    build_tree(&left, &[("shared.txt", b"x"), ("onlyhere.txt", b"y")]);
    build_tree(&right, &[("shared.txt", b"x")]);
    stamp(&left);
    stamp(&right);

    let (status, events) = compare(&left, &right, &CompareOptions::default().with_ignore_dates(true));

    assert_eq!(status, CompareStatus::DifferencesFound);
    assert!(!events.iter().any(Event::is_error));
    let only: Vec<_> = events
        .iter()
        .filter(|e| e.difference() == Some(&DifferenceKind::ItemOnlyInSide1))
        .collect();
    assert_eq!(only.len(), 1);
    match only[0] {
        Event::Difference { path1, path2, .. } => {
            assert_eq!(path1, &left.join("onlyhere.txt"));
            assert_eq!(path2, &right.join("onlyhere.txt"));
        }
        other => panic!("Unexpected event {:?}", other),
    }
}

#[test]
fn test_unmatched_subtree_reported_per_item() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let left = temp_dir.path().join("left");
    let right = temp_dir.path().join("right");
    build_tree(&left, &[("keep.txt", b"k")]);
    build_tree(
        &right,
        &[("keep.txt", b"k"), ("extra/one.txt", b"1"), ("extra/deeper/two.txt", b"2"), ("extra/Thumbs.db", b"t")],
    );

    let (status, events) = compare(&left, &right, &CompareOptions::default().with_ignore_dates(true));

    assert_eq!(status, CompareStatus::DifferencesFound);
    let only2 = events
        .iter()
        .filter(|e| e.difference() == Some(&DifferenceKind::ItemOnlyInSide2))
        .count();
    // extra, extra/deeper, extra/one.txt, extra/deeper/two.txt
    assert_eq!(only2, 4);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::Skipped { path } if path.ends_with("extra/Thumbs.db"))));
}

#[test]
fn test_kind_mismatch_stops_at_item() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let left = temp_dir.path().join("left");
    let right = temp_dir.path().join("right");
    build_tree(&left, &[("thing", b"file")]);
    build_tree(&right, &[("thing/inside.txt", b"dir")]);

    let (status, events) = compare(&left, &right, &CompareOptions::default().with_ignore_dates(true));

    assert_eq!(status, CompareStatus::DifferencesFound);
    assert!(events.iter().any(|e| matches!(
        e.difference(),
        Some(DifferenceKind::FileTypesDiffer { .. })
    )));
    assert!(!events.iter().any(|e| match e {
        Event::Match { path2, .. } | Event::Difference { path2, .. } => path2.ends_with("inside.txt"),
        _ => false,
    }));
}

#[test]
fn test_missing_root_is_precondition_error() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let result = compare_trees(
        temp_dir.path(),
        &temp_dir.path().join("absent"),
        &CompareOptions::default(),
        &NullSink,
        &AbortFlag::new(),
    );
    assert!(matches!(
        result,
        Err(treemirror_engine::EngineError::SourceNotFound { .. })
    ));
}

#[test]
fn test_cancel_after_first_event() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let left = temp_dir.path().join("left");
    let right = temp_dir.path().join("right");
    build_tree(&left, SAMPLE);
    build_tree(&right, SAMPLE);

    let abort = AbortFlag::new();
    let seen = AtomicUsize::new(0);
    let sink_abort = abort.clone();
    let sink = |_event: Event| {
        seen.fetch_add(1, Ordering::SeqCst);
        sink_abort.abort();
    };
    let options = CompareOptions::default().with_ignore_dates(true).with_workers(1);
    let status = compare_trees(&left, &right, &options, &sink, &abort).expect("Comparison failed");

    assert_eq!(status, CompareStatus::Cancelled);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn test_spawned_compare_completes() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let left = temp_dir.path().join("left");
    let right = temp_dir.path().join("right");
    build_tree(&left, SAMPLE);
    build_tree(&right, SAMPLE);

    let collector = Arc::new(Collector::<Event>::new());
    let operation = spawn_compare(
        left,
        right,
        CompareOptions::default().with_ignore_dates(true),
        collector.clone(),
    );
    let status = operation.wait().expect("Comparison failed");

    assert_eq!(status, CompareStatus::Success);
    assert_eq!(collector.len(), 7);
}

#[cfg(unix)]
#[test]
fn test_copy_round_trip_preserves_everything() {
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let source = temp_dir.path().join("source");
    let dest = temp_dir.path().join("dest");
    build_tree(&source, SAMPLE);
    fs::write(source.join("run.sh"), b"#!/bin/sh\n").expect("Failed to write script");
    fs::set_permissions(source.join("run.sh"), fs::Permissions::from_mode(0o750))
        .expect("Failed to chmod script");
    fs::set_permissions(source.join("readme.txt"), fs::Permissions::from_mode(0o600))
        .expect("Failed to chmod readme");
    std::os::unix::fs::symlink("docs/guide.md", source.join("guide-link")).expect("Failed to symlink");
    std::os::unix::fs::symlink("../missing", source.join("dangling")).expect("Failed to symlink");
    fs::hard_link(source.join("docs/guide.md"), source.join("docs/guide-copy.md"))
        .expect("Failed to hard link");
    stamp(&source);

    let compare_events = Collector::<Event>::new();
    let outcome = copy_and_verify(
        &source,
        &dest,
        &CopyOptions::default().with_verify(true),
        &NullSink,
        &compare_events,
        &AbortFlag::new(),
    )
    .expect("Copy failed to start");

    let unexpected: Vec<_> = compare_events
        .events()
        .into_iter()
        .filter(|e| !e.is_match())
        .collect();
    assert!(unexpected.is_empty(), "verification reported {:?}", unexpected);
    assert_eq!(outcome.copy, CopyStatus::Success);
    assert_eq!(outcome.verify, Some(CompareStatus::Success));

    assert_eq!(
        fs::read_link(dest.join("guide-link")).expect("read_link"),
        Path::new("docs/guide.md")
    );
    let first = fs::metadata(dest.join("docs/guide.md")).expect("stat guide");
    let second = fs::metadata(dest.join("docs/guide-copy.md")).expect("stat guide copy");
    assert_eq!(first.ino(), second.ino());
    let script = fs::metadata(dest.join("run.sh")).expect("stat script");
    assert_eq!(script.permissions().mode() & 0o7777, 0o750);
}

#[test]
fn test_copy_then_compare_detects_later_change() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let source = temp_dir.path().join("source");
    let dest = temp_dir.path().join("dest");
    build_tree(&source, SAMPLE);

    let status = copy_tree(&source, &dest, &CopyOptions::default(), &NullSink, &AbortFlag::new())
        .expect("Copy failed to start");
    assert_eq!(status, CopyStatus::Success);

    fs::remove_file(dest.join("docs/guide.md")).expect("Failed to remove copy");
    let (status, events) = compare(&source, &dest, &CompareOptions::default().with_ignore_dates(true));
    assert_eq!(status, CompareStatus::DifferencesFound);
    assert!(events
        .iter()
        .any(|e| e.difference() == Some(&DifferenceKind::ItemOnlyInSide1)));
}

#[cfg(unix)]
#[test]
fn test_unreadable_file_is_an_error_event() {
    use std::os::unix::fs::PermissionsExt;

    // Permission bits do not restrict root.
    if unsafe { libc::geteuid() } == 0 {
        return;
    }

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let left = temp_dir.path().join("left");
    let right = temp_dir.path().join("right");
    build_tree(&left, &[("locked.txt", b"secret"), ("open.txt", b"fine")]);
    build_tree(&right, &[("locked.txt", b"secret"), ("open.txt", b"fine")]);
    fs::set_permissions(left.join("locked.txt"), fs::Permissions::from_mode(0o000))
        .expect("Failed to lock file");
    fs::set_permissions(right.join("locked.txt"), fs::Permissions::from_mode(0o000))
        .expect("Failed to lock file");

    let (status, events) = compare(&left, &right, &CompareOptions::default().with_ignore_dates(true));

    assert_eq!(status, CompareStatus::Error);
    assert_eq!(events.iter().filter(|e| e.is_error()).count(), 1);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::Match { path1, .. } if path1.ends_with("open.txt"))));
}

#[cfg(unix)]
#[test]
fn test_permissions_and_link_targets_differ() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let left = temp_dir.path().join("left");
    let right = temp_dir.path().join("right");
    build_tree(&left, &[("mode.txt", b"same")]);
    build_tree(&right, &[("mode.txt", b"same")]);
    fs::set_permissions(left.join("mode.txt"), fs::Permissions::from_mode(0o600)).expect("Failed to chmod");
    fs::set_permissions(right.join("mode.txt"), fs::Permissions::from_mode(0o644)).expect("Failed to chmod");
    std::os::unix::fs::symlink("one", left.join("link")).expect("Failed to symlink");
    std::os::unix::fs::symlink("two", right.join("link")).expect("Failed to symlink");
    stamp(&left);
    stamp(&right);

    let (status, events) = compare(&left, &right, &CompareOptions::default());

    assert_eq!(status, CompareStatus::DifferencesFound);
    assert_eq!(
        differences_at(&events, "mode.txt"),
        vec![DifferenceKind::PermissionsDiffer { mode1: 0o600, mode2: 0o644 }]
    );
    assert_eq!(
        differences_at(&events, "link"),
        vec![DifferenceKind::LinkTargetDiffers {
            target1: "one".to_string(),
            target2: "two".to_string(),
        }]
    );
    assert_eq!(differences(&events).len(), 2);
}

#[cfg(unix)]
#[test]
fn test_one_directory_with_several_differences() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let left = temp_dir.path().join("left");
    let right = temp_dir.path().join("right");
    build_tree(&left, &[("box/item.txt", b"i")]);
    build_tree(&right, &[("box/item.txt", b"i")]);
    fs::set_permissions(left.join("box"), fs::Permissions::from_mode(0o700)).expect("Failed to chmod");
    fs::set_permissions(right.join("box"), fs::Permissions::from_mode(0o755)).expect("Failed to chmod");
    stamp(&left);
    stamp(&right);
    let later = FileTime::from_unix_time(FIXED_TIME + 60, 0);
    filetime::set_file_times(right.join("box"), later, later).expect("Failed to set time");

    let (status, events) = compare(&left, &right, &CompareOptions::default());

    assert_eq!(status, CompareStatus::DifferencesFound);
    let found = differences_at(&events, "box");
    assert_eq!(found.len(), 2, "unexpected differences: {:?}", found);
    assert!(found.contains(&DifferenceKind::PermissionsDiffer { mode1: 0o700, mode2: 0o755 }));
    assert!(found
        .iter()
        .any(|d| matches!(d, DifferenceKind::ModificationDateDiffers { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::Match { path1, .. } if path1.ends_with("box/item.txt"))));
}

#[cfg(unix)]
#[test]
fn test_extended_attribute_differences() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let left = temp_dir.path().join("left");
    let right = temp_dir.path().join("right");
    build_tree(&left, &[("a.txt", b"a"), ("b.txt", b"b")]);
    build_tree(&right, &[("a.txt", b"a"), ("b.txt", b"b")]);
    if !set_xattr(&left.join("a.txt"), "user.origin", b"v1")
        || !set_xattr(&right.join("a.txt"), "user.origin", b"v2")
        || !set_xattr(&left.join("b.txt"), "user.note", b"left only")
    {
        return;
    }
    stamp(&left);
    stamp(&right);

    let (status, events) = compare(&left, &right, &CompareOptions::default());
    assert_eq!(status, CompareStatus::DifferencesFound);
    assert_eq!(
        differences_at(&events, "a.txt"),
        vec![DifferenceKind::ExtendedAttributeValueDiffers { name: "user.origin".to_string() }]
    );
    assert_eq!(
        differences_at(&events, "b.txt"),
        vec![DifferenceKind::ExtendedAttributePresenceMismatch { name: "user.note".to_string() }]
    );

    let (status, events) = compare(&left, &right, &CompareOptions::default().with_ignore_finder_info(true));
    assert_eq!(status, CompareStatus::Success);
    assert!(events.iter().all(Event::is_match), "unexpected events: {:?}", events);
}

#[cfg(unix)]
#[test]
fn test_hard_linked_content_read_once_per_group() {
    use std::os::unix::fs::PermissionsExt;

    // Permission bits do not restrict root.
    if unsafe { libc::geteuid() } == 0 {
        return;
    }

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let left = temp_dir.path().join("left");
    let right = temp_dir.path().join("right");
    for root in [&left, &right] {
        build_tree(root, &[("a.bin", b"shared bytes")]);
        fs::hard_link(root.join("a.bin"), root.join("b.bin")).expect("Failed to hard link");
        // Both names share the inode, so neither can be read.
        fs::set_permissions(root.join("a.bin"), fs::Permissions::from_mode(0o000))
            .expect("Failed to lock file");
    }

    let (status, events) = compare(&left, &right, &CompareOptions::default().with_ignore_dates(true));

    // Only the group's first member has its content read.
    assert_eq!(status, CompareStatus::Error);
    let errors: Vec<_> = events.iter().filter(|e| e.is_error()).collect();
    assert_eq!(errors.len(), 1, "unexpected errors: {:?}", errors);
    assert!(matches!(errors[0], Event::Error { path1, .. } if path1.ends_with("a.bin")));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::Match { path1, .. } if path1.ends_with("b.bin"))));
}

#[cfg(unix)]
#[test]
fn test_copy_round_trip_keeps_extended_attributes() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let source = temp_dir.path().join("source");
    let dest = temp_dir.path().join("dest");
    build_tree(&source, &[("tagged.txt", b"payload"), ("plain.txt", b"plain")]);
    if !set_xattr(&source.join("tagged.txt"), "user.tag", b"blue") {
        return;
    }

    let outcome = copy_and_verify(
        &source,
        &dest,
        &CopyOptions::default().with_verify(true),
        &NullSink,
        &NullSink,
        &AbortFlag::new(),
    )
    .expect("Copy failed to start");

    assert!(outcome.is_success(), "outcome: {:?}", outcome);
    assert_eq!(
        xattr::get(dest.join("tagged.txt"), "user.tag").expect("Failed to read xattr"),
        Some(b"blue".to_vec())
    );
    assert_eq!(xattr::get(dest.join("plain.txt"), "user.tag").expect("Failed to read xattr"), None);
}

#[cfg(unix)]
#[test]
fn test_copy_round_trip_recreates_fifo() {
    use std::os::unix::fs::{FileTypeExt, PermissionsExt};

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let source = temp_dir.path().join("source");
    let dest = temp_dir.path().join("dest");
    build_tree(&source, &[("data.txt", b"data")]);
    make_fifo(&source.join("pipe"), 0o640);
    fs::set_permissions(source.join("pipe"), fs::Permissions::from_mode(0o640)).expect("Failed to chmod fifo");
    stamp(&source);

    let compare_events = Collector::<Event>::new();
    let outcome = copy_and_verify(
        &source,
        &dest,
        &CopyOptions::default().with_verify(true),
        &NullSink,
        &compare_events,
        &AbortFlag::new(),
    )
    .expect("Copy failed to start");

    let unexpected: Vec<_> = compare_events
        .events()
        .into_iter()
        .filter(|e| !e.is_match())
        .collect();
    assert!(unexpected.is_empty(), "verification reported {:?}", unexpected);
    assert_eq!(outcome.copy, CopyStatus::Success);
    assert_eq!(outcome.verify, Some(CompareStatus::Success));

    let copied = fs::symlink_metadata(dest.join("pipe")).expect("stat copied fifo");
    assert!(copied.file_type().is_fifo());
    assert_eq!(copied.permissions().mode() & 0o7777, 0o640);
}

#[cfg(unix)]
#[test]
fn test_copy_fails_only_the_socket() {
    use std::os::unix::net::UnixListener;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let source = temp_dir.path().join("source");
    let dest = temp_dir.path().join("dest");
    build_tree(&source, &[("data.txt", b"data")]);
    let _listener = UnixListener::bind(source.join("sock")).expect("Failed to bind socket");

    let collector = Collector::<CopyEvent>::new();
    let status = copy_tree(&source, &dest, &CopyOptions::default(), &collector, &AbortFlag::new())
        .expect("Copy failed to start");

    assert_eq!(status, CopyStatus::Error);
    let events = collector.into_events();
    let failed: Vec<_> = events.iter().filter(|e| e.is_failure()).collect();
    assert_eq!(failed.len(), 1);
    assert!(matches!(failed[0], CopyEvent::Failed { source, .. } if source.ends_with("sock")));
    assert_eq!(fs::read(dest.join("data.txt")).expect("read copy"), b"data");
}
