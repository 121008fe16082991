use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::evaluator::DeleteReason;

/// Append-only record of deletions, one file per day under
/// `<root>/<yyyy>/<MM>/<yyyyMMdd>.txt`.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    root: PathBuf,
}

impl AuditLogger {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<data dir>/spacekeeper/record/auto_delete`.
    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("spacekeeper"))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("record")
            .join("auto_delete")
    }

    /// Day file for `at`.
    pub fn file_for(&self, at: DateTime<Local>) -> PathBuf {
        self.root
            .join(at.format("%Y").to_string())
            .join(at.format("%m").to_string())
            .join(format!("{}.txt", at.format("%Y%m%d")))
    }

    /// Append one deletion line to the day file for `at`, creating the
    /// partition directories on first use.
    pub fn record(
        &self,
        at: DateTime<Local>,
        path: &Path,
        reason: DeleteReason,
        size_bytes: u64,
        age_days: i64,
    ) -> std::io::Result<()> {
        let file_path = self.file_for(at);
        if let Some(dir) = file_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;
        writeln!(file, "{}", format_line(path, reason, size_bytes, age_days))
    }
}

fn format_line(path: &Path, reason: DeleteReason, size_bytes: u64, age_days: i64) -> String {
    format!(
        "Deleted file: {}, reason: {}, size: {:.2} MB, file age: {} days",
        path.display(),
        reason,
        size_bytes as f64 / 1_048_576.0,
        age_days
    )
}
