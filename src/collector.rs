use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Local};
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::policy::CleanupPolicy;

/// A file that may be deleted, as seen when it was collected.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub last_write: DateTime<Local>,
    /// Not every filesystem records it.
    pub created: Option<DateTime<Local>>,
}

/// Whether `dir` lies on the policy's volume: every component of the
/// volume must match the leading components of `dir`, ignoring case.
/// Paths containing `..` are never on a volume.
pub fn is_on_volume(volume_id: &str, dir: &str) -> bool {
    let dir = Path::new(dir);
    if dir.components().any(|c| c == Component::ParentDir) {
        return false;
    }

    let volume = Path::new(volume_id);
    if volume.components().next().is_none() {
        return false;
    }

    let mut dir_components = dir.components();
    volume
        .components()
        .all(|v| dir_components.next().is_some_and(|d| same_component(v, d)))
}

fn same_component(a: Component<'_>, b: Component<'_>) -> bool {
    a.as_os_str().to_string_lossy().to_lowercase() == b.as_os_str().to_string_lossy().to_lowercase()
}

/// Enumerate every regular file under the policy's watched directories.
///
/// Directories off the policy's volume, missing directories and unreadable
/// entries are skipped with a warning. The result is unordered.
pub fn collect(policy: &CleanupPolicy) -> Vec<CandidateFile> {
    policy
        .watched_directories
        .par_iter()
        .flat_map_iter(|dir| collect_directory(policy, dir))
        .collect()
}

fn collect_directory(policy: &CleanupPolicy, dir: &str) -> Vec<CandidateFile> {
    if !is_on_volume(&policy.volume_id, dir) {
        tracing::warn!(
            volume = %policy.volume_id,
            directory = %dir,
            "Directory is not on the policy's volume, skipping"
        );
        return Vec::new();
    }

    let root = Path::new(dir);
    if !root.is_dir() {
        tracing::warn!(
            volume = %policy.volume_id,
            directory = %dir,
            "Watched directory does not exist, skipping"
        );
        return Vec::new();
    }

    let started = std::time::Instant::now();
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(directory = %dir, error = %e, "Cannot read entry, skipping");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        // Single metadata call for size and both timestamps.
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "Cannot stat file, skipping");
                continue;
            }
        };
        let Ok(modified) = meta.modified() else {
            continue;
        };

        files.push(CandidateFile {
            path: entry.into_path(),
            size_bytes: meta.len(),
            last_write: modified.into(),
            created: meta.created().ok().map(DateTime::from),
        });
    }

    tracing::debug!(
        directory = %dir,
        files = files.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Enumerated watched directory"
    );
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn policy_for(volume: &Path, dirs: &[&Path]) -> CleanupPolicy {
        let mut policy = CleanupPolicy::new(volume.to_str().unwrap());
        policy.watched_directories = dirs
            .iter()
            .map(|d| d.to_str().unwrap().to_string())
            .collect();
        policy
    }

    #[test]
    fn test_collects_recursively() {
        let tmp = TempDir::new().unwrap();
        let logs = tmp.path().join("logs");
        std::fs::create_dir_all(logs.join("nested/deeper")).unwrap();
        std::fs::write(logs.join("a.log"), b"aaaa").unwrap();
        std::fs::write(logs.join("nested/b.tmp"), b"bb").unwrap();
        std::fs::write(logs.join("nested/deeper/c"), b"c").unwrap();

        let files = collect(&policy_for(tmp.path(), &[&logs]));
        assert_eq!(files.len(), 3);
        assert_eq!(files.iter().map(|f| f.size_bytes).sum::<u64>(), 7);
    }

    #[test]
    fn test_directory_off_volume_is_never_enumerated() {
        let volume = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        std::fs::write(elsewhere.path().join("keep.txt"), b"keep").unwrap();

        let policy = policy_for(volume.path(), &[elsewhere.path()]);
        assert!(collect(&policy).is_empty());
    }

    #[test]
    fn test_parent_dir_escape_is_never_enumerated() {
        let tmp = TempDir::new().unwrap();
        let volume = tmp.path().join("vol");
        let other = tmp.path().join("other");
        std::fs::create_dir_all(&volume).unwrap();
        std::fs::create_dir_all(&other).unwrap();
        std::fs::write(other.join("precious.db"), b"data").unwrap();

        let escape = volume.join("..").join("other");
        assert!(escape.is_dir());
        assert!(collect(&policy_for(&volume, &[&escape])).is_empty());
    }

    #[test]
    fn test_sibling_with_shared_name_prefix_is_never_enumerated() {
        let tmp = TempDir::new().unwrap();
        let volume = tmp.path().join("vol");
        let sibling = tmp.path().join("vol2");
        std::fs::create_dir_all(&volume).unwrap();
        std::fs::create_dir_all(&sibling).unwrap();
        std::fs::write(sibling.join("also.db"), b"data").unwrap();

        assert!(collect(&policy_for(&volume, &[&sibling])).is_empty());
    }

    #[test]
    fn test_missing_directory_does_not_fail_others() {
        let tmp = TempDir::new().unwrap();
        let present = tmp.path().join("present");
        std::fs::create_dir(&present).unwrap();
        std::fs::write(present.join("x"), b"x").unwrap();

        let policy = policy_for(tmp.path(), &[&tmp.path().join("absent"), &present]);
        let files = collect(&policy);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, present.join("x"));
    }

    #[test]
    fn test_volume_match_is_by_component_and_ignores_case() {
        assert!(is_on_volume("/Data", "/data/logs"));
        assert!(is_on_volume("/data/", "/DATA/logs/old"));
        assert!(is_on_volume("/", "/var/tmp"));
        assert!(is_on_volume("/data", "/data"));
        assert!(!is_on_volume("/data", "/data2/logs"));
        assert!(!is_on_volume("/data", "/data/../etc"));
        assert!(!is_on_volume("/data/logs", "/data"));
        assert!(!is_on_volume("", "/data"));
    }

    #[cfg(windows)]
    #[test]
    fn test_drive_letter_volume_ignores_case() {
        assert!(is_on_volume("d:", "D:\\Temp"));
        assert!(is_on_volume("D:", "d:\\temp"));
        assert!(!is_on_volume("C:", "D:\\Temp"));
    }
}
