//! Per-file deletion decision.
//!
//! Pure: nothing here touches the filesystem.

use std::fmt;

use chrono::{DateTime, Duration, Local};

use crate::collector::CandidateFile;
use crate::policy::{CleanupPolicy, LogicMode};

/// Why a file may (or may not) be deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteReason {
    CapacityAndAge,
    CapacityOnly,
    AgeOnly,
    None,
}

impl fmt::Display for DeleteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DeleteReason::CapacityAndAge => "low free space and file expired",
            DeleteReason::CapacityOnly => "low free space",
            DeleteReason::AgeOnly => "file expired",
            DeleteReason::None => "conditions not met",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone)]
pub struct DeletionVerdict<'a> {
    pub file: &'a CandidateFile,
    pub can_delete: bool,
    pub reason: DeleteReason,
}

/// Free space is below the start threshold.
pub fn capacity_condition(policy: &CleanupPolicy, free_space_bytes: u64) -> bool {
    free_space_bytes < policy.start_threshold_bytes
}

/// The file was last written at least `min_age_days` ago. Always true when
/// no minimum age is configured.
pub fn age_condition(policy: &CleanupPolicy, file: &CandidateFile, now: DateTime<Local>) -> bool {
    policy.min_age_days == 0
        || now - file.last_write >= Duration::days(i64::from(policy.min_age_days))
}

/// Decide whether `file` may be deleted given the current free space.
///
/// Under OR the capacity condition wins ties. An unconfigured age criterion
/// (`min_age_days == 0`) never triggers a deletion by itself.
pub fn evaluate<'a>(
    policy: &CleanupPolicy,
    free_space_bytes: u64,
    file: &'a CandidateFile,
    now: DateTime<Local>,
) -> DeletionVerdict<'a> {
    let capacity = capacity_condition(policy, free_space_bytes);
    let age = age_condition(policy, file, now);

    let reason = match policy.logic_mode {
        LogicMode::And if capacity && age => DeleteReason::CapacityAndAge,
        LogicMode::And => DeleteReason::None,
        LogicMode::Or if capacity => DeleteReason::CapacityOnly,
        LogicMode::Or if age && policy.min_age_days > 0 => DeleteReason::AgeOnly,
        LogicMode::Or => DeleteReason::None,
    };

    DeletionVerdict {
        file,
        can_delete: reason != DeleteReason::None,
        reason,
    }
}
