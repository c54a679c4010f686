//! Log directory capacity guard.
//!
//! The rolling file appender grows the log directory without bound; this
//! guard measures the directory before each request and, when the configured
//! ceiling is exceeded, deletes the oldest half of its files. Eviction order
//! is the file modification time, not directory listing order, so rotation
//! age decides what goes regardless of filesystem enumeration quirks.

use std::io;
use std::path::Path;
use std::time::SystemTime;

use tokio::fs;

/// Outcome of one capacity check, logged by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReclaimReport {
    pub total_bytes: u64,
    pub deleted_files: usize,
    pub reclaimed_bytes: u64,
}

/// Measure `directory` (non-recursive) and delete the oldest half of its
/// files when the total size exceeds `ceiling_bytes`.
///
/// Deletion is idempotent: files that vanish between listing and unlink are
/// skipped. Errors reading the directory surface to the caller, which treats
/// them as non-fatal.
pub async fn check_and_reclaim(
    directory: &Path,
    ceiling_bytes: u64,
) -> io::Result<ReclaimReport> {
    let mut entries = Vec::new();
    let mut total_bytes: u64 = 0;

    let mut reader = fs::read_dir(directory).await?;
    while let Some(entry) = reader.next_entry().await? {
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        total_bytes += metadata.len();
        entries.push((entry.path(), metadata.len(), modified));
    }

    if total_bytes <= ceiling_bytes {
        return Ok(ReclaimReport {
            total_bytes,
            ..ReclaimReport::default()
        });
    }

    entries.sort_by_key(|(_, _, modified)| *modified);

    let victims = entries.len() / 2;
    let mut deleted_files = 0;
    let mut reclaimed_bytes: u64 = 0;
    for (path, size, _) in entries.into_iter().take(victims) {
        match fs::remove_file(&path).await {
            Ok(()) => {
                deleted_files += 1;
                reclaimed_bytes += size;
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
    }

    Ok(ReclaimReport {
        total_bytes,
        deleted_files,
        reclaimed_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn write_files(dir: &Path, count: usize, size: usize) {
        for index in 0..count {
            let path = dir.join(format!("stampa.log.2026-01-{:02}", index + 1));
            std::fs::write(&path, vec![b'x'; size]).expect("write fixture");
            // Stagger mtimes so eviction order is deterministic.
            let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000 + index as u64);
            let file = std::fs::File::open(&path).expect("open");
            file.set_modified(mtime).expect("set mtime");
        }
    }

    #[tokio::test]
    async fn under_ceiling_directory_is_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_files(dir.path(), 4, 100);

        let report = check_and_reclaim(dir.path(), 1024).await.expect("check");
        assert_eq!(report.total_bytes, 400);
        assert_eq!(report.deleted_files, 0);
        assert_eq!(std::fs::read_dir(dir.path()).expect("read").count(), 4);
    }

    #[tokio::test]
    async fn over_ceiling_deletes_oldest_half() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_files(dir.path(), 10, 1024);

        let report = check_and_reclaim(dir.path(), 5 * 1024).await.expect("check");
        assert_eq!(report.deleted_files, 5);
        assert_eq!(report.reclaimed_bytes, 5 * 1024);

        let remaining: Vec<String> = std::fs::read_dir(dir.path())
            .expect("read")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(remaining.len(), 5);
        // The oldest five (days 01-05) are gone; the newest five remain.
        for day in 6..=10 {
            assert!(
                remaining.iter().any(|name| name.ends_with(&format!("-{day:02}"))),
                "expected day {day:02} to survive, remaining: {remaining:?}"
            );
        }
    }

    #[tokio::test]
    async fn odd_file_count_rounds_down() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_files(dir.path(), 5, 1024);

        let report = check_and_reclaim(dir.path(), 1024).await.expect("check");
        assert_eq!(report.deleted_files, 2);
        assert_eq!(std::fs::read_dir(dir.path()).expect("read").count(), 3);
    }

    #[tokio::test]
    async fn size_strictly_decreases_when_trimmed() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_files(dir.path(), 6, 2048);

        let before = check_and_reclaim(dir.path(), u64::MAX).await.expect("measure");
        let trimmed = check_and_reclaim(dir.path(), 1024).await.expect("trim");
        let after = check_and_reclaim(dir.path(), u64::MAX).await.expect("measure");

        assert!(trimmed.deleted_files > 0);
        assert!(after.total_bytes < before.total_bytes);
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("gone");
        assert!(check_and_reclaim(&missing, 1024).await.is_err());
    }

    #[tokio::test]
    async fn subdirectories_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_files(dir.path(), 2, 1024);
        std::fs::create_dir(dir.path().join("nested")).expect("mkdir");
        std::fs::write(dir.path().join("nested/inner.log"), vec![b'x'; 4096])
            .expect("write nested");

        let report = check_and_reclaim(dir.path(), 10 * 1024).await.expect("check");
        assert_eq!(report.total_bytes, 2048);
        assert_eq!(report.deleted_files, 0);
    }
}
