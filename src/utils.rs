use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Compute total size of a directory recursively.
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Existence and recursive size of one directory.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryCheck {
    pub path: PathBuf,
    pub exists: bool,
    /// Zero when the directory is missing.
    pub size_bytes: u64,
}

/// Check each directory for existence and size, preserving input order.
pub fn check_directories<S: AsRef<str>>(dirs: &[S]) -> Vec<DirectoryCheck> {
    dirs.iter()
        .map(|d| {
            let path = PathBuf::from(d.as_ref());
            let exists = path.is_dir();
            let size_bytes = if exists { dir_size(&path) } else { 0 };
            DirectoryCheck {
                path,
                exists,
                size_bytes,
            }
        })
        .collect()
}

/// Format byte count as human-readable string.
pub fn format_size(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.2} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.2} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1_024 {
        format!("{:.2} KB", bytes as f64 / 1_024.0)
    } else {
        format!("{} B", bytes)
    }
}
