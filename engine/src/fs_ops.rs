//! Filesystem operations module.
//!
//! This module provides the low-level operations the comparator and the
//! copier share:
//! - Listing one directory level, filtered and in a stable order
//! - Streaming two files side by side to find the first differing byte
//! - Copying file content and recreating symbolic links
//! - Recreating fifos and device nodes

use std::ffi::OsString;
use std::fs;
use std::io::{self, Read};
use std::path::Path;

use crate::exclusion::{ExclusionFilter, Preprocess};

/// The entries of one directory level after exclusion.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DirListing {
    /// Names to process, sorted
    pub names: Vec<OsString>,
    /// Names the exclusion filter rejected, sorted
    pub skipped: Vec<OsString>,
}

/// List the immediate entries of `dir`.
///
/// Names are sorted so that both sides of a comparison are traversed in
/// the same order whatever order the filesystem returns them in.
///
/// # Errors
/// Returns the I/O error if the directory or any entry cannot be read.
pub fn list_dir(dir: &Path, exclusions: &ExclusionFilter) -> io::Result<DirListing> {
    let mut listing = DirListing::default();
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        match exclusions.preprocess(dir, &name) {
            Preprocess::Skip => listing.skipped.push(name),
            Preprocess::Continue => listing.names.push(name),
        }
    }
    listing.names.sort();
    listing.skipped.sort();
    Ok(listing)
}

/// Compare the content of two files in `chunk_size` reads.
///
/// # Returns
/// `None` if the contents are identical, otherwise the byte offset of the
/// first difference. If one file ends before the other, the shorter length
/// is the offset.
///
/// # Errors
/// Returns the first I/O error from either file.
pub fn first_difference(path1: &Path, path2: &Path, chunk_size: usize) -> io::Result<Option<u64>> {
    let chunk_size = chunk_size.max(1);
    let mut file1 = fs::File::open(path1)?;
    let mut file2 = fs::File::open(path2)?;
    let mut buf1 = vec![0u8; chunk_size];
    let mut buf2 = vec![0u8; chunk_size];
    let mut offset: u64 = 0;

    loop {
        let read1 = read_full(&mut file1, &mut buf1)?;
        let read2 = read_full(&mut file2, &mut buf2)?;
        let common = read1.min(read2);

        if let Some(index) = buf1[..common]
            .iter()
            .zip(&buf2[..common])
            .position(|(a, b)| a != b)
        {
            return Ok(Some(offset + index as u64));
        }
        if read1 != read2 {
            return Ok(Some(offset + common as u64));
        }
        if read1 == 0 {
            return Ok(None);
        }
        offset += read1 as u64;
    }
}

/// Fill `buf` as far as the reader allows; a short count means end of file.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Copy the content of `src` to `dst`, replacing whatever non-directory is
/// at `dst`. An existing item is unlinked first, so a symlink is never
/// written through and a read-only file does not block the copy.
///
/// # Returns
/// Number of bytes copied
pub fn copy_file_content(src: &Path, dst: &Path) -> io::Result<u64> {
    let mut src_file = fs::File::open(src)?;
    remove_non_directory(dst)?;
    let mut dst_file = fs::File::create(dst)?;
    io::copy(&mut src_file, &mut dst_file)
}

/// Recreate a symbolic link at `dst` pointing at `target` verbatim.
pub fn copy_symlink(target: &Path, dst: &Path) -> io::Result<()> {
    remove_non_directory(dst)?;
    create_symlink(target, dst)
}

/// Create `dst` as a hard link to `existing`, replacing any non-directory.
pub fn relink(existing: &Path, dst: &Path) -> io::Result<()> {
    remove_non_directory(dst)?;
    fs::hard_link(existing, dst)
}

/// Make sure `dst` is a directory, creating it if absent.
pub fn ensure_dir(dst: &Path) -> io::Result<()> {
    match fs::symlink_metadata(dst) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "destination exists and is not a directory",
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir(dst),
        Err(e) => Err(e),
    }
}

/// Recreate the fifo or device node described by `metadata` at `dst`.
///
/// Device nodes need privileges; the OS refusal is returned as is. Sockets
/// cannot be recreated and fail with `Unsupported`.
#[cfg(unix)]
pub fn create_special(metadata: &fs::Metadata, dst: &Path) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::{FileTypeExt, MetadataExt};

    let file_type = metadata.file_type();
    let node_type = if file_type.is_fifo() {
        libc::S_IFIFO
    } else if file_type.is_char_device() {
        libc::S_IFCHR
    } else if file_type.is_block_device() {
        libc::S_IFBLK
    } else {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "sockets cannot be recreated",
        ));
    };

    remove_non_directory(dst)?;
    let c_path = CString::new(dst.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL byte"))?;
    let mode = (metadata.mode() & 0o7777) as libc::mode_t;
    // SAFETY: c_path is a valid NUL-terminated string for the whole call.
    let rc = unsafe {
        if node_type == libc::S_IFIFO {
            libc::mkfifo(c_path.as_ptr(), mode)
        } else {
            libc::mknod(c_path.as_ptr(), node_type | mode, metadata.rdev() as libc::dev_t)
        }
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn create_special(_metadata: &fs::Metadata, _dst: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "special files are not supported on this platform",
    ))
}

fn remove_non_directory(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "destination exists and is a directory",
        )),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn create_symlink(target: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, dst)
}

#[cfg(windows)]
fn create_symlink(target: &Path, dst: &Path) -> io::Result<()> {
    let resolved = dst.parent().map(|parent| parent.join(target));
    if resolved.is_some_and(|p| p.is_dir()) {
        std::os::windows::fs::symlink_dir(target, dst)
    } else {
        std::os::windows::fs::symlink_file(target, dst)
    }
}

#[cfg(not(any(unix, windows)))]
fn create_symlink(_target: &Path, _dst: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symbolic links are not supported on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_list_dir_sorts_and_filters() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dir = temp_dir.path();
        for name in ["b.txt", "a.txt", "Thumbs.db", "c"] {
            fs::write(dir.join(name), b"x").expect("Failed to write entry");
        }

        let listing = list_dir(dir, &ExclusionFilter::default()).expect("Failed to list");
        assert_eq!(
            listing.names,
            vec![OsString::from("a.txt"), OsString::from("b.txt"), OsString::from("c")]
        );
        assert_eq!(listing.skipped, vec![OsString::from("Thumbs.db")]);
    }

    #[test]
    fn test_list_nonexistent_dir() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = list_dir(&temp_dir.path().join("missing"), &ExclusionFilter::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_first_difference_identical() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let a = temp_dir.path().join("a");
        let b = temp_dir.path().join("b");
        fs::write(&a, b"same bytes").expect("Failed to write a");
        fs::write(&b, b"same bytes").expect("Failed to write b");

        assert_eq!(first_difference(&a, &b, 3).expect("Compare failed"), None);
    }

    #[test]
    fn test_first_difference_offset_across_chunks() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let a = temp_dir.path().join("a");
        let b = temp_dir.path().join("b");
        let mut content = vec![7u8; 10_000];
        fs::write(&a, &content).expect("Failed to write a");
        content[6_543] = 8;
        fs::write(&b, &content).expect("Failed to write b");

        for chunk in [1, 7, 4096, 1 << 20] {
            assert_eq!(
                first_difference(&a, &b, chunk).expect("Compare failed"),
                Some(6_543),
                "chunk size {}",
                chunk
            );
        }
    }

    #[test]
    fn test_first_difference_prefix() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let a = temp_dir.path().join("a");
        let b = temp_dir.path().join("b");
        fs::write(&a, b"abc").expect("Failed to write a");
        fs::write(&b, b"abcdef").expect("Failed to write b");

        assert_eq!(first_difference(&a, &b, 2).expect("Compare failed"), Some(3));
    }

    #[test]
    fn test_copy_file_content() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src_file = temp_dir.path().join("source.txt");
        let dst_file = temp_dir.path().join("dest.txt");

        let mut file = fs::File::create(&src_file).expect("Failed to create source");
        file.write_all(b"test content").expect("Failed to write source");
        drop(file);
        fs::write(&dst_file, b"older and longer content").expect("Failed to write dest");

        let bytes = copy_file_content(&src_file, &dst_file).expect("Failed to copy");
        assert_eq!(bytes, 12);

        let content = fs::read_to_string(&dst_file).expect("Failed to read dest");
        assert_eq!(content, "test content");
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_file_content_replaces_symlink() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src_file = temp_dir.path().join("source.txt");
        let victim = temp_dir.path().join("victim.txt");
        let dst_file = temp_dir.path().join("dest.txt");
        fs::write(&src_file, b"new").expect("Failed to write source");
        fs::write(&victim, b"keep me").expect("Failed to write victim");
        std::os::unix::fs::symlink(&victim, &dst_file).expect("Failed to symlink");

        copy_file_content(&src_file, &dst_file).expect("Failed to copy");

        assert_eq!(fs::read(&victim).expect("read victim"), b"keep me");
        let metadata = fs::symlink_metadata(&dst_file).expect("stat dest");
        assert!(metadata.is_file());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_symlink_keeps_relative_target() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dst = temp_dir.path().join("link");
        copy_symlink(Path::new("../elsewhere/file"), &dst).expect("Failed to copy link");
        assert_eq!(
            fs::read_link(&dst).expect("read_link"),
            Path::new("../elsewhere/file")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_create_special_fifo_replaces_file() {
        use std::os::unix::fs::FileTypeExt;
        use std::os::unix::net::UnixListener;

        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let fifo = temp_dir.path().join("pipe");
        let c_path = std::ffi::CString::new(fifo.to_str().expect("utf-8 path")).expect("CString");
        // SAFETY: c_path is NUL-terminated and outlives the call.
        assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o640) }, 0);
        let metadata = fs::symlink_metadata(&fifo).expect("stat fifo");

        let dst = temp_dir.path().join("copy");
        fs::write(&dst, b"stale").expect("Failed to write stale file");
        create_special(&metadata, &dst).expect("Failed to create fifo");
        assert!(fs::symlink_metadata(&dst).expect("stat copy").file_type().is_fifo());

        let socket = temp_dir.path().join("sock");
        let _listener = UnixListener::bind(&socket).expect("Failed to bind socket");
        let metadata = fs::symlink_metadata(&socket).expect("stat socket");
        let err = create_special(&metadata, &temp_dir.path().join("sock-copy"))
            .expect_err("Sockets should be refused");
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[test]
    fn test_ensure_dir() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dir = temp_dir.path().join("subdir");

        ensure_dir(&dir).expect("Failed to create dir");
        assert!(dir.is_dir());
        ensure_dir(&dir).expect("Existing dir should be accepted");

        let file = temp_dir.path().join("file");
        fs::write(&file, b"x").expect("Failed to write file");
        assert!(ensure_dir(&file).is_err());
    }
}
