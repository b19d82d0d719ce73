//! Filesystem operations module.
//!
//! This module provides the low-level operations behind a run:
//! - Enumerating source entries into files, keeping each file's provenance
//! - Resolving destination paths (flat or structure-preserving)
//! - Creating parent directories
//! - Opening destinations with rename-on-collision
//! - Chunked copying with progress and cancellation
//!
//! Symbolic links are followed: a link to a file is copied as a regular file
//! and a link to a directory is descended. A directory whose canonical path
//! is already an ancestor in the current walk is reported as a loop and not
//! descended.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::error::FileError;
use crate::model::{EntryFailure, SourceEntry, SourceKind};

/// A regular file found while enumerating a source entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumeratedFile {
    /// Index of the SourceEntry that produced this file
    pub origin: usize,
    /// Full source path
    pub path: PathBuf,
    /// Path relative to the originating directory (the file name for file sources)
    pub relative_path: PathBuf,
    /// Size at enumeration time
    pub size_bytes: u64,
}

/// Output of `enumerate`: the files found plus the entries that failed.
#[derive(Debug, Default)]
pub struct Enumeration {
    pub files: Vec<EnumeratedFile>,
    pub failures: Vec<EntryFailure>,
}

/// Expand source entries into a flat list of files.
///
/// Files of one entry appear before files of the next; within a directory
/// the order is whatever the platform listing returns. Failures never abort
/// the enumeration: an inaccessible entry yields no files and one
/// `EntryFailure`, and an unreadable sub-directory is skipped the same way.
pub fn enumerate(sources: &[SourceEntry]) -> Enumeration {
    let mut out = Enumeration::default();

    for (origin, source) in sources.iter().enumerate() {
        let before = out.files.len();
        match source.kind {
            SourceKind::File => enumerate_file(origin, &source.path, &mut out),
            SourceKind::Directory => enumerate_directory(origin, &source.path, &mut out),
        }
        debug!(
            source = %source.path.display(),
            files = out.files.len() - before,
            "enumerated source entry"
        );
    }

    out
}

fn entry_failure(origin: usize, path: &Path, source: io::Error) -> EntryFailure {
    debug!(path = %path.display(), error = %source, "skipping inaccessible entry");
    EntryFailure {
        origin,
        path: path.to_path_buf(),
        error: FileError::EntryAccess {
            path: path.to_path_buf(),
            source,
        },
    }
}

fn enumerate_file(origin: usize, path: &Path, out: &mut Enumeration) {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => {
            let name = path
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| path.to_path_buf());
            out.files.push(EnumeratedFile {
                origin,
                path: path.to_path_buf(),
                relative_path: name,
                size_bytes: metadata.len(),
            });
        }
        Ok(_) => out.failures.push(entry_failure(
            origin,
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "source entry is not a regular file"),
        )),
        Err(e) => out.failures.push(entry_failure(origin, path, e)),
    }
}

fn enumerate_directory(origin: usize, path: &Path, out: &mut Enumeration) {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => {
            let mut ancestors = Vec::new();
            walk(origin, path, Path::new(""), &mut ancestors, out);
        }
        Ok(_) => out.failures.push(entry_failure(
            origin,
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "source entry is not a directory"),
        )),
        Err(e) => out.failures.push(entry_failure(origin, path, e)),
    }
}

fn walk(
    origin: usize,
    dir: &Path,
    rel_path: &Path,
    ancestors: &mut Vec<PathBuf>,
    out: &mut Enumeration,
) {
    let canonical = match fs::canonicalize(dir) {
        Ok(canonical) => canonical,
        Err(e) => {
            out.failures.push(entry_failure(origin, dir, e));
            return;
        }
    };
    if ancestors.contains(&canonical) {
        out.failures.push(entry_failure(
            origin,
            dir,
            io::Error::new(io::ErrorKind::Other, "symbolic link loop detected"),
        ));
        return;
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            out.failures.push(entry_failure(origin, dir, e));
            return;
        }
    };

    ancestors.push(canonical);
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                out.failures.push(entry_failure(origin, dir, e));
                continue;
            }
        };

        let entry_path = entry.path();
        let rel_full_path = rel_path.join(entry.file_name());

        // fs::metadata follows symlinks; a dangling link fails here.
        let metadata = match fs::metadata(&entry_path) {
            Ok(metadata) => metadata,
            Err(e) => {
                out.failures.push(entry_failure(origin, &entry_path, e));
                continue;
            }
        };

        if metadata.is_dir() {
            walk(origin, &entry_path, &rel_full_path, ancestors, out);
        } else if metadata.is_file() {
            out.files.push(EnumeratedFile {
                origin,
                path: entry_path,
                relative_path: rel_full_path,
                size_bytes: metadata.len(),
            });
        } else {
            debug!(path = %entry_path.display(), "skipping special file");
        }
    }
    ancestors.pop();
}

/// Compute where a file lands under `destination_root`.
///
/// - flat, or a file source: `root/<file name>`
/// - structure-preserving directory source: `root/<dir name>/<relative path>`
pub fn resolve_destination(
    destination_root: &Path,
    source: &SourceEntry,
    file: &EnumeratedFile,
    preserve_structure: bool,
) -> PathBuf {
    if !preserve_structure || source.kind == SourceKind::File {
        let name = file
            .path
            .file_name()
            .unwrap_or_else(|| file.relative_path.as_os_str());
        return destination_root.join(name);
    }

    match source_dir_name(&source.path) {
        Some(dir_name) => destination_root.join(dir_name).join(&file.relative_path),
        None => destination_root.join(&file.relative_path),
    }
}

/// Folder name a directory source is recreated under.
///
/// Paths ending in `..` carry no name of their own and are resolved through
/// the filesystem. `None` only for a filesystem root.
fn source_dir_name(path: &Path) -> Option<OsString> {
    if let Some(name) = path.file_name() {
        return Some(name.to_os_string());
    }
    fs::canonicalize(path)
        .ok()
        .and_then(|resolved| resolved.file_name().map(|name| name.to_os_string()))
}

/// Ensure the parent directory of a path exists, creating it if necessary.
pub fn ensure_parent_dir_exists(path: &Path) -> Result<(), FileError> {
    if let Some(parent) = path.parent() {
        if parent.as_os_str().is_empty() {
            return Ok(());
        }

        match fs::metadata(parent) {
            Ok(metadata) if metadata.is_dir() => Ok(()),
            Ok(_) => Err(FileError::DirectoryCreation {
                path: parent.to_path_buf(),
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "Parent path exists but is not a directory",
                ),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(parent).map_err(|e| FileError::DirectoryCreation {
                    path: parent.to_path_buf(),
                    source: e,
                })
            }
            Err(e) => Err(FileError::DirectoryCreation {
                path: parent.to_path_buf(),
                source: e,
            }),
        }
    } else {
        Ok(())
    }
}

/// Name to try after `n` collisions: `name_<n>.ext`, or `name_<n>` without an extension.
pub fn collision_candidate(path: &Path, n: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_default();

    let mut name: OsString = stem;
    name.push(format!("_{}", n));
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }

    path.with_file_name(name)
}

/// Open the destination for writing.
///
/// With `overwrite` the file is truncated. Otherwise the file is created with
/// create-new semantics, advancing through `collision_candidate` names until
/// one is free. Returns the handle and the path actually opened.
pub fn open_destination(dst: &Path, overwrite: bool) -> Result<(File, PathBuf), FileError> {
    let write_error = |path: &Path, e: io::Error| FileError::Write {
        path: path.to_path_buf(),
        source: e,
    };

    if overwrite {
        let file = File::create(dst).map_err(|e| write_error(dst, e))?;
        return Ok((file, dst.to_path_buf()));
    }

    let mut candidate = dst.to_path_buf();
    let mut attempt: u32 = 0;
    loop {
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => {
                if attempt > 0 {
                    debug!(
                        requested = %dst.display(),
                        renamed = %candidate.display(),
                        "destination exists, writing under a new name"
                    );
                }
                return Ok((file, candidate));
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                attempt = attempt.checked_add(1).ok_or_else(|| {
                    write_error(
                        dst,
                        io::Error::new(io::ErrorKind::AlreadyExists, "no free destination name"),
                    )
                })?;
                candidate = collision_candidate(dst, attempt);
            }
            Err(e) => return Err(write_error(&candidate, e)),
        }
    }
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Result of one chunked copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOutcome {
    /// Path actually written (differs from the requested one after a rename)
    pub destination: PathBuf,
    pub bytes_copied: u64,
    /// Copy stopped at a chunk boundary because cancellation was requested
    pub cancelled: bool,
    /// Source modification time, for `preserve_mtime`
    pub source_mtime: Option<SystemTime>,
}

/// Copy `src` to `dst` in `chunk_size` pieces.
///
/// Creates missing parent directories, applies the collision policy, and
/// after every chunk calls `on_chunk` with the bytes written so far for this
/// file, then polls `cancel`. A cancelled copy leaves the partial
/// destination in place. Both handles are closed before returning.
pub fn copy_file_chunked<F>(
    src: &Path,
    dst: &Path,
    overwrite: bool,
    chunk_size: usize,
    cancel: &CancellationToken,
    mut on_chunk: F,
) -> Result<CopyOutcome, FileError>
where
    F: FnMut(u64),
{
    ensure_parent_dir_exists(dst)?;

    let read_error = |e: io::Error| FileError::Read {
        path: src.to_path_buf(),
        source: e,
    };

    let mut src_file = File::open(src).map_err(read_error)?;
    let source_mtime = src_file.metadata().ok().and_then(|m| m.modified().ok());

    if overwrite && dst.exists() && is_same_file(src, dst) {
        return Err(FileError::SameFile {
            path: dst.to_path_buf(),
        });
    }

    let (mut dst_file, destination) = open_destination(dst, overwrite)?;

    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut bytes_copied: u64 = 0;
    let mut cancelled = false;

    loop {
        let n = match src_file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(read_error(e)),
        };

        dst_file
            .write_all(&buffer[..n])
            .map_err(|e| FileError::Write {
                path: destination.clone(),
                source: e,
            })?;
        bytes_copied += n as u64;

        on_chunk(bytes_copied);

        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
    }

    if !cancelled {
        dst_file.flush().map_err(|e| FileError::Write {
            path: destination.clone(),
            source: e,
        })?;
    }

    Ok(CopyOutcome {
        destination,
        bytes_copied,
        cancelled,
        source_mtime,
    })
}

/// Copy a source modification time onto a written destination.
///
/// Failures are logged and otherwise ignored; timestamps are best effort.
pub fn apply_mtime(dst: &Path, mtime: SystemTime) {
    if let Err(e) = filetime::set_file_mtime(dst, filetime::FileTime::from_system_time(mtime)) {
        warn!(path = %dst.display(), error = %e, "failed to preserve modification time");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn write(path: &Path, data: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent");
        }
        fs::write(path, data).expect("Failed to write file");
    }

    fn relative_set(enumeration: &Enumeration) -> BTreeSet<PathBuf> {
        enumeration
            .files
            .iter()
            .map(|f| f.relative_path.clone())
            .collect()
    }

    #[test]
    fn test_enumerate_nested_directory() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let docs = temp_dir.path().join("docs");
        write(&docs.join("a.txt"), b"0123456789");
        write(&docs.join("sub").join("b.txt"), b"01234567890123456789");
        fs::create_dir_all(docs.join("empty")).expect("Failed to create dir");

        let enumeration = enumerate(&[SourceEntry::directory(&docs)]);

        assert!(enumeration.failures.is_empty());
        let expected: BTreeSet<PathBuf> = [PathBuf::from("a.txt"), Path::new("sub").join("b.txt")]
            .into_iter()
            .collect();
        assert_eq!(relative_set(&enumeration), expected);
        let total: u64 = enumeration.files.iter().map(|f| f.size_bytes).sum();
        assert_eq!(total, 30);
        assert!(enumeration.files.iter().all(|f| f.origin == 0));
    }

    #[test]
    fn test_enumerate_file_entry_yields_one_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let file = temp_dir.path().join("report.pdf");
        write(&file, b"pdf");

        let enumeration = enumerate(&[SourceEntry::file(&file)]);

        assert_eq!(enumeration.files.len(), 1);
        assert_eq!(enumeration.files[0].relative_path, PathBuf::from("report.pdf"));
        assert_eq!(enumeration.files[0].size_bytes, 3);
    }

    #[test]
    fn test_enumerate_missing_entry_is_recoverable() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let present = temp_dir.path().join("present");
        write(&present.join("x.txt"), b"x");

        let sources = vec![
            SourceEntry::directory(temp_dir.path().join("missing")),
            SourceEntry::directory(&present),
            SourceEntry::file(temp_dir.path().join("gone.txt")),
        ];
        let enumeration = enumerate(&sources);

        assert_eq!(enumeration.files.len(), 1);
        assert_eq!(enumeration.files[0].origin, 1);
        assert_eq!(enumeration.failures.len(), 2);
        assert_eq!(enumeration.failures[0].origin, 0);
        assert_eq!(enumeration.failures[1].origin, 2);
        assert!(matches!(
            enumeration.failures[0].error,
            FileError::EntryAccess { .. }
        ));
    }

    #[test]
    fn test_enumerate_kind_mismatch_is_failure() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let file = temp_dir.path().join("a.txt");
        write(&file, b"a");

        let enumeration = enumerate(&[
            SourceEntry::directory(&file),
            SourceEntry::file(temp_dir.path()),
        ]);

        assert!(enumeration.files.is_empty());
        assert_eq!(enumeration.failures.len(), 2);
    }

    #[test]
    fn test_enumerate_tracks_provenance_for_prefix_siblings() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let data = temp_dir.path().join("data");
        let data2 = temp_dir.path().join("data2");
        write(&data.join("one.txt"), b"1");
        write(&data2.join("two.txt"), b"2");

        let enumeration = enumerate(&[SourceEntry::directory(&data), SourceEntry::directory(&data2)]);

        for file in &enumeration.files {
            let expected_origin = if file.path.starts_with(&data2) { 1 } else { 0 };
            assert_eq!(file.origin, expected_origin, "{}", file.path.display());
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_enumerate_follows_symlinks_and_stops_loops() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp_dir.path().join("root");
        let outside = temp_dir.path().join("outside");
        write(&root.join("a.txt"), b"a");
        write(&outside.join("b.txt"), b"b");
        std::os::unix::fs::symlink(&outside, root.join("linked")).expect("symlink");
        std::os::unix::fs::symlink(&root, root.join("loop")).expect("symlink");

        let enumeration = enumerate(&[SourceEntry::directory(&root)]);

        let expected: BTreeSet<PathBuf> = [PathBuf::from("a.txt"), Path::new("linked").join("b.txt")]
            .into_iter()
            .collect();
        assert_eq!(relative_set(&enumeration), expected);
        assert_eq!(enumeration.failures.len(), 1, "loop should be reported once");
    }

    #[test]
    fn test_resolve_destination_modes() {
        let root = Path::new("/out");
        let dir_source = SourceEntry::directory("/home/u/docs");
        let nested = EnumeratedFile {
            origin: 0,
            path: PathBuf::from("/home/u/docs/sub/b.txt"),
            relative_path: Path::new("sub").join("b.txt"),
            size_bytes: 20,
        };

        assert_eq!(
            resolve_destination(root, &dir_source, &nested, true),
            Path::new("/out/docs/sub/b.txt")
        );
        assert_eq!(
            resolve_destination(root, &dir_source, &nested, false),
            Path::new("/out/b.txt")
        );

        let file_source = SourceEntry::file("/home/u/notes.txt");
        let single = EnumeratedFile {
            origin: 0,
            path: PathBuf::from("/home/u/notes.txt"),
            relative_path: PathBuf::from("notes.txt"),
            size_bytes: 1,
        };
        assert_eq!(
            resolve_destination(root, &file_source, &single, true),
            Path::new("/out/notes.txt")
        );
    }

    #[test]
    fn test_collision_candidate_names() {
        assert_eq!(
            collision_candidate(Path::new("/out/name.ext"), 1),
            Path::new("/out/name_1.ext")
        );
        assert_eq!(
            collision_candidate(Path::new("/out/archive.tar.gz"), 2),
            Path::new("/out/archive.tar_2.gz")
        );
        assert_eq!(
            collision_candidate(Path::new("/out/README"), 3),
            Path::new("/out/README_3")
        );
        assert_eq!(
            collision_candidate(Path::new("/out/.bashrc"), 1),
            Path::new("/out/.bashrc_1")
        );
    }

    #[test]
    fn test_open_destination_probes_sequentially() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dst = temp_dir.path().join("photo.jpg");
        write(&dst, b"original");
        write(&temp_dir.path().join("photo_1.jpg"), b"first copy");

        let (_file, path) = open_destination(&dst, false).expect("Open should succeed");

        assert_eq!(path, temp_dir.path().join("photo_2.jpg"));
        assert_eq!(fs::read(&dst).expect("read"), b"original");
    }

    #[test]
    fn test_ensure_parent_dir_exists() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("a").join("b").join("file.txt");

        ensure_parent_dir_exists(&path).expect("Failed to create parent");
        ensure_parent_dir_exists(&path).expect("Second call should be a no-op");

        assert!(temp_dir.path().join("a").join("b").is_dir());
    }

    #[test]
    fn test_ensure_parent_dir_rejects_file_parent() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let blocker = temp_dir.path().join("blocker");
        write(&blocker, b"x");

        let result = ensure_parent_dir_exists(&blocker.join("file.txt"));
        assert!(matches!(result, Err(FileError::DirectoryCreation { .. })));
    }

    #[test]
    fn test_copy_file_chunked_reports_every_chunk() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("source.bin");
        let dst = temp_dir.path().join("out").join("source.bin");
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
        write(&src, &data);

        let mut reports = Vec::new();
        let outcome = copy_file_chunked(&src, &dst, false, 4096, &CancellationToken::new(), |n| {
            reports.push(n)
        })
        .expect("Copy should succeed");

        assert!(!outcome.cancelled);
        assert_eq!(outcome.bytes_copied, 10_000);
        assert_eq!(outcome.destination, dst);
        assert_eq!(reports.last(), Some(&10_000));
        assert!(reports.len() >= 3);
        assert!(reports.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(fs::read(&dst).expect("read"), data);
    }

    #[test]
    fn test_copy_file_chunked_stops_after_cancel() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("source.bin");
        let dst = temp_dir.path().join("dest.bin");
        write(&src, &vec![7u8; 8192]);

        let cancel = CancellationToken::new();
        let outcome = copy_file_chunked(&src, &dst, false, 1024, &cancel, |_| cancel.cancel())
            .expect("Copy should return an outcome");

        assert!(outcome.cancelled);
        assert_eq!(outcome.bytes_copied, 1024);
        assert_eq!(fs::metadata(&dst).expect("partial file").len(), 1024);
    }

    #[test]
    fn test_copy_file_chunked_refuses_to_overwrite_source() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("same.txt");
        write(&src, b"precious");

        let result = copy_file_chunked(&src, &src, true, 1024, &CancellationToken::new(), |_| {});

        assert!(matches!(result, Err(FileError::SameFile { .. })));
        assert_eq!(fs::read(&src).expect("read"), b"precious");
    }

    #[test]
    fn test_copy_missing_source_creates_nothing() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dst = temp_dir.path().join("dest.txt");

        let result = copy_file_chunked(
            &temp_dir.path().join("missing.txt"),
            &dst,
            false,
            1024,
            &CancellationToken::new(),
            |_| {},
        );

        assert!(matches!(result, Err(FileError::Read { .. })));
        assert!(!dst.exists());
    }

    #[test]
    fn test_apply_mtime() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dst = temp_dir.path().join("dest.txt");
        write(&dst, b"x");
        let mtime = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000_000);

        apply_mtime(&dst, mtime);

        let modified = fs::metadata(&dst).expect("metadata").modified().expect("mtime");
        assert_eq!(modified, mtime);
    }
}
