//! Metadata snapshots and platform metadata I/O.
//!
//! A [`MetadataSnapshot`] captures every comparable attribute of one item
//! without following symlinks. The comparator diffs two snapshots field by
//! field; the copier replays a source snapshot onto the destination with
//! [`apply_metadata`].

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use filetime::FileTime;

use crate::hardlink::{identity_of, FileIdentity};
use crate::model::ItemKind;

/// Extended attribute holding the classic Finder info record.
pub const FINDER_INFO_XATTR: &str = "com.apple.FinderInfo";

/// Finder flag marking a folder as a bundle.
const FINDER_HAS_BUNDLE: u16 = 0x2000;

/// Directory extensions that are presented as a single package.
const PACKAGE_EXTENSIONS: &[&str] = &[
    "app", "bundle", "framework", "plugin", "kext", "pkg", "mpkg", "xpc", "appex", "photoslibrary",
    "rtfd",
];

/// Everything comparable about one filesystem item, captured once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataSnapshot {
    pub kind: ItemKind,
    /// Byte length; zero for anything but files
    pub size: u64,
    /// Birth time, only where the copier can restore it
    pub creation_time: Option<SystemTime>,
    pub modification_time: Option<SystemTime>,
    pub access_time: Option<SystemTime>,
    /// Permission bits including setuid/setgid/sticky
    pub permissions: u32,
    pub owner_user: Option<u32>,
    pub owner_group: Option<u32>,
    /// BSD file flags; zero where the platform has none
    pub platform_flags: u32,
    /// Extended attributes other than Finder info, sorted by name
    pub extended_attributes: BTreeMap<OsString, Vec<u8>>,
    pub finder_info: Option<Vec<u8>>,
    pub is_package: bool,
    pub symlink_target: Option<PathBuf>,
    pub link_identity: Option<FileIdentity>,
}

impl MetadataSnapshot {
    /// Capture the snapshot of `path` without following a final symlink.
    ///
    /// # Errors
    /// Returns the first I/O error hit while reading the item's metadata,
    /// link target or extended attributes. A filesystem without extended
    /// attribute support yields an empty attribute set, not an error.
    pub fn capture(path: &Path) -> io::Result<Self> {
        let metadata = fs::symlink_metadata(path)?;
        let kind = kind_of(&metadata.file_type());

        let symlink_target = match kind {
            ItemKind::SymbolicLink => Some(fs::read_link(path)?),
            _ => None,
        };

        let mut extended_attributes = read_xattrs(path)?;
        let finder_info = extended_attributes.remove(OsStr::new(FINDER_INFO_XATTR));
        let is_package = kind == ItemKind::Directory && is_package(path, finder_info.as_deref());

        Ok(MetadataSnapshot {
            kind,
            size: if kind == ItemKind::File { metadata.len() } else { 0 },
            creation_time: creation_time(&metadata),
            modification_time: metadata.modified().ok(),
            access_time: metadata.accessed().ok(),
            permissions: permission_bits(&metadata),
            owner_user: owner_user(&metadata),
            owner_group: owner_group(&metadata),
            platform_flags: platform_flags(&metadata),
            extended_attributes,
            finder_info,
            is_package,
            symlink_target,
            link_identity: identity_of(&metadata),
        })
    }
}

/// Classify a file type without following symlinks.
pub fn kind_of(file_type: &fs::FileType) -> ItemKind {
    if file_type.is_symlink() {
        ItemKind::SymbolicLink
    } else if file_type.is_dir() {
        ItemKind::Directory
    } else if file_type.is_file() {
        ItemKind::File
    } else {
        ItemKind::Other
    }
}

/// Render a timestamp the way difference payloads carry it.
pub fn format_time(time: Option<SystemTime>) -> String {
    match time {
        Some(time) => DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Nanos, true),
        None => "(unavailable)".to_string(),
    }
}

/// Owner name for `uid`, or the number itself if it has no account.
#[cfg(unix)]
pub fn user_name(uid: Option<u32>) -> String {
    match uid {
        Some(uid) => uzers::get_user_by_uid(uid)
            .map(|user| user.name().to_string_lossy().into_owned())
            .unwrap_or_else(|| uid.to_string()),
        None => "(none)".to_string(),
    }
}

/// Group name for `gid`, or the number itself if it has no entry.
#[cfg(unix)]
pub fn group_name(gid: Option<u32>) -> String {
    match gid {
        Some(gid) => uzers::get_group_by_gid(gid)
            .map(|group| group.name().to_string_lossy().into_owned())
            .unwrap_or_else(|| gid.to_string()),
        None => "(none)".to_string(),
    }
}

#[cfg(not(unix))]
pub fn user_name(uid: Option<u32>) -> String {
    uid.map_or_else(|| "(none)".to_string(), |uid| uid.to_string())
}

#[cfg(not(unix))]
pub fn group_name(gid: Option<u32>) -> String {
    gid.map_or_else(|| "(none)".to_string(), |gid| gid.to_string())
}

fn is_package(path: &Path, finder_info: Option<&[u8]>) -> bool {
    let has_bundle_bit = finder_info
        .filter(|info| info.len() >= 10)
        .map(|info| u16::from_be_bytes([info[8], info[9]]) & FINDER_HAS_BUNDLE != 0)
        .unwrap_or(false);
    let has_package_extension = path
        .extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| {
            PACKAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        });
    has_bundle_bit || has_package_extension
}

#[cfg(target_os = "macos")]
fn creation_time(metadata: &fs::Metadata) -> Option<SystemTime> {
    metadata.created().ok()
}

// Birth time cannot be restored here, so it is not part of the comparable set.
#[cfg(not(target_os = "macos"))]
fn creation_time(_metadata: &fs::Metadata) -> Option<SystemTime> {
    None
}

#[cfg(unix)]
fn permission_bits(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(metadata: &fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o666
    }
}

#[cfg(unix)]
fn owner_user(metadata: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.uid())
}

#[cfg(unix)]
fn owner_group(metadata: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.gid())
}

#[cfg(not(unix))]
fn owner_user(_metadata: &fs::Metadata) -> Option<u32> {
    None
}

#[cfg(not(unix))]
fn owner_group(_metadata: &fs::Metadata) -> Option<u32> {
    None
}

#[cfg(target_os = "macos")]
fn platform_flags(metadata: &fs::Metadata) -> u32 {
    use std::os::macos::fs::MetadataExt;
    metadata.st_flags()
}

#[cfg(target_os = "freebsd")]
fn platform_flags(metadata: &fs::Metadata) -> u32 {
    use std::os::freebsd::fs::MetadataExt;
    metadata.st_flags()
}

#[cfg(not(any(target_os = "macos", target_os = "freebsd")))]
fn platform_flags(_metadata: &fs::Metadata) -> u32 {
    0
}

#[cfg(unix)]
fn is_unsupported(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(code) if code == libc::ENOTSUP || code == libc::EOPNOTSUPP)
        || err.kind() == io::ErrorKind::Unsupported
}

#[cfg(unix)]
fn read_xattrs(path: &Path) -> io::Result<BTreeMap<OsString, Vec<u8>>> {
    let mut attributes = BTreeMap::new();
    if !xattr::SUPPORTED_PLATFORM {
        return Ok(attributes);
    }
    let names = match xattr::list(path) {
        Ok(names) => names,
        Err(err) if is_unsupported(&err) => return Ok(attributes),
        Err(err) => return Err(err),
    };
    for name in names {
        // An attribute removed between list and get is simply absent.
        if let Some(value) = xattr::get(path, &name)? {
            attributes.insert(name, value);
        }
    }
    Ok(attributes)
}

#[cfg(not(unix))]
fn read_xattrs(_path: &Path) -> io::Result<BTreeMap<OsString, Vec<u8>>> {
    Ok(BTreeMap::new())
}

/// Replay `snapshot` onto the item at `path`.
///
/// Order matters: attributes and ownership first (a chown may clear setuid
/// bits), then permissions, then dates, and platform flags last because an
/// immutable flag would block every later change.
///
/// # Errors
/// Returns the first I/O error. A refused ownership change is logged and
/// tolerated; the verification pass reports it as an owner difference.
pub fn apply_metadata(path: &Path, snapshot: &MetadataSnapshot) -> io::Result<()> {
    write_xattrs(path, snapshot)?;
    apply_ownership(path, snapshot)?;
    if snapshot.kind != ItemKind::SymbolicLink {
        apply_permissions(path, snapshot.permissions)?;
    }
    apply_times(path, snapshot)?;
    apply_platform_flags(path, snapshot.platform_flags)?;
    Ok(())
}

#[cfg(unix)]
fn write_xattrs(path: &Path, snapshot: &MetadataSnapshot) -> io::Result<()> {
    if !xattr::SUPPORTED_PLATFORM {
        return Ok(());
    }
    let mut wanted: Vec<(&OsStr, &[u8])> = snapshot
        .extended_attributes
        .iter()
        .map(|(name, value)| (name.as_os_str(), value.as_slice()))
        .collect();
    if let Some(info) = &snapshot.finder_info {
        wanted.push((OsStr::new(FINDER_INFO_XATTR), info.as_slice()));
    }

    let existing = match xattr::list(path) {
        Ok(names) => names.collect::<Vec<_>>(),
        Err(err) if is_unsupported(&err) && wanted.is_empty() => return Ok(()),
        Err(err) => return Err(err),
    };
    for name in existing {
        if !wanted.iter().any(|(wanted_name, _)| *wanted_name == name.as_os_str()) {
            xattr::remove(path, &name)?;
        }
    }
    for (name, value) in wanted {
        // Rewriting an identical value can still be refused for system namespaces.
        if xattr::get(path, name)?.as_deref() == Some(value) {
            continue;
        }
        xattr::set(path, name, value)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn write_xattrs(_path: &Path, _snapshot: &MetadataSnapshot) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn apply_ownership(path: &Path, snapshot: &MetadataSnapshot) -> io::Result<()> {
    if snapshot.owner_user.is_none() && snapshot.owner_group.is_none() {
        return Ok(());
    }
    match std::os::unix::fs::lchown(path, snapshot.owner_user, snapshot.owner_group) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            tracing::warn!(path = %path.display(), error = %err, "ownership not preserved");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

#[cfg(not(unix))]
fn apply_ownership(_path: &Path, _snapshot: &MetadataSnapshot) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn apply_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn apply_permissions(path: &Path, mode: u32) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(mode & 0o222 == 0);
    fs::set_permissions(path, permissions)
}

fn apply_times(path: &Path, snapshot: &MetadataSnapshot) -> io::Result<()> {
    if let Some(created) = snapshot.creation_time {
        set_creation_time(path, created)?;
    }
    let Some(modified) = snapshot.modification_time else {
        return Ok(());
    };
    let modified = FileTime::from_system_time(modified);
    let accessed = snapshot
        .access_time
        .map(FileTime::from_system_time)
        .unwrap_or(modified);
    filetime::set_symlink_file_times(path, accessed, modified)
}

#[cfg(target_os = "macos")]
fn set_creation_time(path: &Path, created: SystemTime) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    use std::time::UNIX_EPOCH;

    let Ok(since_epoch) = created.duration_since(UNIX_EPOCH) else {
        return Ok(());
    };
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL byte"))?;
    let mut spec = libc::timespec {
        tv_sec: since_epoch.as_secs() as _,
        tv_nsec: since_epoch.subsec_nanos() as _,
    };
    // SAFETY: attrlist is a plain C struct for which all-zero is valid.
    let mut attributes: libc::attrlist = unsafe { std::mem::zeroed() };
    attributes.bitmapcount = libc::ATTR_BIT_MAP_COUNT as _;
    attributes.commonattr = libc::ATTR_CMN_CRTIME as _;
    // SAFETY: both buffers live for the duration of the call and the size
    // passed matches the timespec buffer requested by ATTR_CMN_CRTIME.
    let rc = unsafe {
        libc::setattrlist(
            c_path.as_ptr(),
            &mut attributes as *mut libc::attrlist as *mut libc::c_void,
            &mut spec as *mut libc::timespec as *mut libc::c_void,
            std::mem::size_of::<libc::timespec>(),
            libc::FSOPT_NOFOLLOW as _,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "macos"))]
fn set_creation_time(_path: &Path, _created: SystemTime) -> io::Result<()> {
    Ok(())
}

#[cfg(any(target_os = "macos", target_os = "freebsd"))]
fn apply_platform_flags(path: &Path, flags: u32) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL byte"))?;
    // SAFETY: c_path is a valid NUL-terminated string for the whole call.
    let rc = unsafe { libc::lchflags(c_path.as_ptr(), flags as _) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(any(target_os = "macos", target_os = "freebsd")))]
fn apply_platform_flags(_path: &Path, _flags: u32) -> io::Result<()> {
    Ok(())
}
