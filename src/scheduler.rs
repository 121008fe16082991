//! The cleanup loop.
//!
//! Every tick re-reads the policy store and processes each policy in turn:
//! sample free space, collect candidates, evaluate them against that
//! sample, then delete oldest-first while re-sampling free space before
//! each deletion. Capacity-only policies stop once the stop threshold is
//! reached; other policies work through every eligible file.
//!
//! Nothing that goes wrong inside a tick ends the loop. Only cancellation
//! does.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::audit::AuditLogger;
use crate::collector::{self, CandidateFile};
use crate::config::ConfigStore;
use crate::error::{ConfigError, VolumeError};
use crate::evaluator::{self, DeleteReason};
use crate::policy::{CleanupPolicy, LogicMode};
use crate::volume::VolumeInspector;

/// Runtime settings for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Seconds between the start of consecutive ticks.
    pub interval_secs: u64,
    /// Log what would be deleted without deleting or auditing.
    pub dry_run: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            dry_run: false,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// What the scheduler is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Scanning,
    Evaluating,
    Deleting,
}

/// Outcome of processing one policy.
#[derive(Debug, Default, Clone)]
pub struct PolicyReport {
    pub volume_id: String,
    pub candidates: usize,
    pub eligible: usize,
    pub deleted: u64,
    pub bytes_freed: u64,
    pub failures: u64,
    /// The stop threshold was reached before the batch was exhausted.
    pub stopped_early: bool,
}

/// Outcome of one tick across all policies.
#[derive(Debug, Default, Clone)]
pub struct TickReport {
    pub policies: Vec<PolicyReport>,
    /// Policies whose volume could not be inspected.
    pub skipped: usize,
}

impl TickReport {
    pub fn deleted(&self) -> u64 {
        self.policies.iter().map(|p| p.deleted).sum()
    }

    pub fn bytes_freed(&self) -> u64 {
        self.policies.iter().map(|p| p.bytes_freed).sum()
    }

    pub fn has_deletions(&self) -> bool {
        self.deleted() > 0
    }
}

/// Sort eligible files oldest first. Stable, so files with equal
/// timestamps keep their collection order.
pub fn order_candidates(eligible: &mut [(CandidateFile, DeleteReason)]) {
    eligible.sort_by_key(|(file, _)| file.last_write);
}

/// Whole days since the file was last touched. A creation time later than
/// the last write (copied files) counts as the touch.
pub fn display_age_days(file: &CandidateFile, now: DateTime<Local>) -> i64 {
    let touched = file
        .created
        .filter(|created| *created > file.last_write)
        .unwrap_or(file.last_write);
    (now - touched).num_days()
}

pub struct CleanupScheduler {
    store: ConfigStore,
    volumes: Arc<dyn VolumeInspector>,
    audit: AuditLogger,
    config: SchedulerConfig,
    phase: Mutex<Phase>,
}

impl CleanupScheduler {
    pub fn new(
        store: ConfigStore,
        volumes: Arc<dyn VolumeInspector>,
        audit: AuditLogger,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            volumes,
            audit,
            config,
            phase: Mutex::new(Phase::Idle),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    /// Run ticks until `cancel` fires. A tick running past the interval
    /// delays the next one; ticks never overlap.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let dry_run_msg = if self.config.dry_run { " (DRY RUN)" } else { "" };
        tracing::info!(
            interval_secs = self.config.interval().as_secs(),
            store = %self.store.path().display(),
            dry_run = self.config.dry_run,
            "Starting cleanup scheduler{}",
            dry_run_msg
        );

        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let scheduler = Arc::clone(&self);
            match tokio::task::spawn_blocking(move || scheduler.run_tick()).await {
                Ok(report) if report.has_deletions() => tracing::info!(
                    deleted = report.deleted(),
                    bytes_freed = report.bytes_freed(),
                    skipped = report.skipped,
                    dry_run = self.config.dry_run,
                    "Cleanup tick complete{}",
                    dry_run_msg
                ),
                Ok(report) => tracing::debug!(
                    skipped = report.skipped,
                    "Cleanup tick complete, nothing deleted"
                ),
                Err(e) => {
                    self.set_phase(Phase::Idle);
                    tracing::error!(error = %e, "Cleanup tick aborted");
                }
            }
        }

        tracing::info!("Cleanup scheduler stopped");
    }

    pub fn run_tick(&self) -> TickReport {
        self.run_tick_at(Local::now())
    }

    /// One pass over every policy currently in the store. A store that
    /// cannot be read is logged and yields an empty report.
    pub fn run_tick_at(&self, now: DateTime<Local>) -> TickReport {
        match self.try_run_tick_at(now) {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "Cannot load cleanup policies, skipping tick");
                TickReport::default()
            }
        }
    }

    pub fn try_run_tick(&self) -> Result<TickReport, ConfigError> {
        self.try_run_tick_at(Local::now())
    }

    /// Like [`run_tick_at`](Self::run_tick_at) but reports an unreadable
    /// store to the caller.
    pub fn try_run_tick_at(&self, now: DateTime<Local>) -> Result<TickReport, ConfigError> {
        let policies = self.store.load_policies()?;
        let mut report = TickReport::default();

        for policy in &policies {
            match self.process_policy(policy, now) {
                Ok(policy_report) => report.policies.push(policy_report),
                Err(e) => {
                    tracing::warn!(volume = %policy.volume_id, error = %e, "Skipping policy this tick");
                    report.skipped += 1;
                }
            }
        }

        self.set_phase(Phase::Idle);
        Ok(report)
    }

    /// Process one policy. Only a volume that cannot be inspected up front
    /// is an error; everything after that is logged and absorbed.
    pub fn process_policy(
        &self,
        policy: &CleanupPolicy,
        now: DateTime<Local>,
    ) -> Result<PolicyReport, VolumeError> {
        let mut report = PolicyReport {
            volume_id: policy.volume_id.clone(),
            ..Default::default()
        };

        self.set_phase(Phase::Scanning);
        let free = self.volumes.free_space_bytes(&policy.volume_id)?;

        tracing::info!(
            volume = %policy.volume_id,
            free_bytes = free,
            start_bytes = policy.start_threshold_bytes,
            stop_bytes = policy.stop_threshold_bytes,
            min_age_days = policy.min_age_days,
            logic_mode = %policy.logic_mode,
            "Checking volume"
        );

        if policy.logic_mode == LogicMode::And && !evaluator::capacity_condition(policy, free) {
            tracing::debug!(volume = %policy.volume_id, "AND policy above start threshold, nothing to do");
            return Ok(report);
        }

        let candidates = collector::collect(policy);
        report.candidates = candidates.len();

        self.set_phase(Phase::Evaluating);
        let mut eligible: Vec<(CandidateFile, DeleteReason)> = candidates
            .into_iter()
            .filter_map(|file| {
                let verdict = evaluator::evaluate(policy, free, &file, now);
                let reason = verdict.can_delete.then_some(verdict.reason)?;
                Some((file, reason))
            })
            .collect();
        order_candidates(&mut eligible);
        report.eligible = eligible.len();

        if !eligible.is_empty() {
            self.set_phase(Phase::Deleting);
            self.delete_candidates(policy, eligible, now, &mut report);
        }

        tracing::info!(
            volume = %policy.volume_id,
            candidates = report.candidates,
            deleted = report.deleted,
            bytes_freed = report.bytes_freed,
            failures = report.failures,
            "Volume cleanup finished"
        );
        Ok(report)
    }

    fn delete_candidates(
        &self,
        policy: &CleanupPolicy,
        eligible: Vec<(CandidateFile, DeleteReason)>,
        now: DateTime<Local>,
        report: &mut PolicyReport,
    ) {
        let total = eligible.len();
        for (file, reason) in eligible {
            match self.volumes.free_space_bytes(&policy.volume_id) {
                Ok(free) if policy.is_capacity_only() && free >= policy.stop_threshold_bytes => {
                    tracing::info!(
                        volume = %policy.volume_id,
                        free_bytes = free,
                        remaining = total - report.deleted as usize - report.failures as usize,
                        "Stop threshold reached"
                    );
                    report.stopped_early = true;
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(volume = %policy.volume_id, error = %e, "Volume lost during cleanup");
                    break;
                }
            }

            let age_days = display_age_days(&file, now);
            if self.config.dry_run {
                tracing::info!(
                    path = %file.path.display(),
                    reason = %reason,
                    size_bytes = file.size_bytes,
                    age_days,
                    "DRY RUN: would delete file"
                );
                report.deleted += 1;
                report.bytes_freed += file.size_bytes;
                continue;
            }

            if let Err(e) = std::fs::remove_file(&file.path) {
                tracing::error!(path = %file.path.display(), error = %e, "Failed to delete file");
                report.failures += 1;
                continue;
            }

            report.deleted += 1;
            report.bytes_freed += file.size_bytes;
            tracing::debug!(path = %file.path.display(), reason = %reason, "Deleted file");

            if let Err(e) = self
                .audit
                .record(now, &file.path, reason, file.size_bytes, age_days)
            {
                tracing::error!(path = %file.path.display(), error = %e, "Failed to write audit record");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::gb_to_bytes;
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};
    use std::time::SystemTime;
    use tempfile::TempDir;

    const GB: u64 = 1_073_741_824;

    /// Returns queued readings in order, then repeats the last one.
    struct ScriptedVolume {
        readings: Mutex<VecDeque<u64>>,
        last: Mutex<u64>,
    }

    impl ScriptedVolume {
        fn new(readings: &[u64]) -> Arc<Self> {
            Arc::new(Self {
                readings: Mutex::new(readings.iter().copied().collect()),
                last: Mutex::new(readings.last().copied().unwrap_or(0)),
            })
        }

        fn set(&self, free: u64) {
            self.readings.lock().unwrap().clear();
            *self.last.lock().unwrap() = free;
        }
    }

    impl VolumeInspector for ScriptedVolume {
        fn free_space_bytes(&self, volume_id: &str) -> Result<u64, VolumeError> {
            if !Path::new(volume_id).exists() {
                return Err(VolumeError::NotFound(volume_id.to_string()));
            }
            let next = self.readings.lock().unwrap().pop_front();
            Ok(next.unwrap_or(*self.last.lock().unwrap()))
        }
    }

    struct Fixture {
        tmp: TempDir,
        data: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let data = tmp.path().join("volume").join("data");
            std::fs::create_dir_all(&data).unwrap();
            Self { tmp, data }
        }

        fn volume(&self) -> String {
            self.tmp.path().join("volume").to_str().unwrap().to_string()
        }

        fn file_aged(&self, name: &str, days: u64) -> PathBuf {
            let path = self.data.join(name);
            std::fs::write(&path, vec![0u8; 1024]).unwrap();
            let when = SystemTime::now() - Duration::from_secs(days * 86_400 + 60);
            filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(when)).unwrap();
            path
        }

        fn policy(&self, mode: LogicMode, min_age_days: u32) -> CleanupPolicy {
            CleanupPolicy {
                volume_id: self.volume(),
                watched_directories: vec![self.data.to_str().unwrap().to_string()],
                start_threshold_bytes: gb_to_bytes(10.0),
                stop_threshold_bytes: gb_to_bytes(20.0),
                min_age_days,
                logic_mode: mode,
            }
        }

        fn scheduler(
            &self,
            policies: &[CleanupPolicy],
            volumes: Arc<dyn VolumeInspector>,
            dry_run: bool,
        ) -> CleanupScheduler {
            let store = ConfigStore::new(self.tmp.path().join("cleanup.ini"));
            store.save_policies(policies).unwrap();
            CleanupScheduler::new(
                store,
                volumes,
                AuditLogger::new(self.tmp.path().join("audit")),
                SchedulerConfig {
                    interval_secs: 1,
                    dry_run,
                },
            )
        }

        fn audit_lines(&self, now: DateTime<Local>) -> Vec<String> {
            let audit = AuditLogger::new(self.tmp.path().join("audit"));
            std::fs::read_to_string(audit.file_for(now))
                .map(|t| t.lines().map(str::to_string).collect())
                .unwrap_or_default()
        }
    }

    #[test]
    fn test_capacity_policy_deletes_everything_oldest_first() {
        let fx = Fixture::new();
        let young = fx.file_aged("young.log", 1);
        let middle = fx.file_aged("middle.log", 10);
        let old = fx.file_aged("old.log", 100);

        let scheduler = fx.scheduler(
            &[fx.policy(LogicMode::Or, 0)],
            ScriptedVolume::new(&[5 * GB]),
            false,
        );
        let now = Local::now();
        let report = scheduler.run_tick_at(now);

        assert_eq!(report.deleted(), 3);
        assert_eq!(report.bytes_freed(), 3 * 1024);
        assert!(!young.exists() && !middle.exists() && !old.exists());

        let lines = fx.audit_lines(now);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("old.log"), "{lines:?}");
        assert!(lines[1].contains("middle.log"));
        assert!(lines[2].contains("young.log"));
        assert!(lines[0].contains("reason: low free space"));
        // Where the filesystem records birth time it is newer than the
        // forged mtime and the age shown is measured from it.
        assert!(
            lines[0].ends_with("file age: 100 days") || lines[0].ends_with("file age: 0 days"),
            "{}",
            lines[0]
        );
        assert_eq!(scheduler.phase(), Phase::Idle);
    }

    #[test]
    fn test_and_policy_only_deletes_old_files() {
        let fx = Fixture::new();
        let young = fx.file_aged("young.log", 1);
        let middle = fx.file_aged("middle.log", 10);
        let old = fx.file_aged("old.log", 100);

        let scheduler = fx.scheduler(
            &[fx.policy(LogicMode::And, 30)],
            ScriptedVolume::new(&[5 * GB]),
            false,
        );
        let report = scheduler.run_tick();

        assert_eq!(report.deleted(), 1);
        assert!(!old.exists());
        assert!(young.exists() && middle.exists());
        assert_eq!(report.policies[0].candidates, 3);
        assert_eq!(report.policies[0].eligible, 1);
    }

    #[test]
    fn test_ample_space_with_no_age_criterion_deletes_nothing() {
        let fx = Fixture::new();
        let files = [
            fx.file_aged("a", 1),
            fx.file_aged("b", 10),
            fx.file_aged("c", 100),
        ];

        let scheduler = fx.scheduler(
            &[fx.policy(LogicMode::Or, 0)],
            ScriptedVolume::new(&[25 * GB]),
            false,
        );
        let report = scheduler.run_tick();

        assert_eq!(report.deleted(), 0);
        assert!(files.iter().all(|f| f.exists()));
    }

    #[test]
    fn test_ample_space_with_age_criterion_deletes_expired() {
        let fx = Fixture::new();
        let young = fx.file_aged("young", 1);
        let old = fx.file_aged("old", 100);

        let scheduler = fx.scheduler(
            &[fx.policy(LogicMode::Or, 30)],
            ScriptedVolume::new(&[25 * GB]),
            false,
        );
        let now = Local::now();
        let report = scheduler.run_tick_at(now);

        assert_eq!(report.deleted(), 1);
        assert!(young.exists() && !old.exists());
        assert!(fx.audit_lines(now)[0].contains("reason: file expired"));
    }

    #[test]
    fn test_second_tick_after_recovery_is_a_no_op() {
        let fx = Fixture::new();
        fx.file_aged("a", 3);
        fx.file_aged("b", 4);

        let volume = ScriptedVolume::new(&[5 * GB]);
        let scheduler = fx.scheduler(&[fx.policy(LogicMode::Or, 0)], volume.clone(), false);
        assert_eq!(scheduler.run_tick().deleted(), 2);

        fx.file_aged("c", 5);
        volume.set(25 * GB);
        assert_eq!(scheduler.run_tick().deleted(), 0);
        assert!(fx.data.join("c").exists());
    }

    #[test]
    fn test_capacity_only_policy_stops_at_stop_threshold() {
        let fx = Fixture::new();
        let young = fx.file_aged("young", 1);
        let middle = fx.file_aged("middle", 10);
        let old = fx.file_aged("old", 100);

        // Initial sample, check before first delete, check before second.
        let volume = ScriptedVolume::new(&[5 * GB, 5 * GB, 21 * GB]);
        let scheduler = fx.scheduler(&[fx.policy(LogicMode::Or, 0)], volume, false);
        let report = scheduler.run_tick();

        assert_eq!(report.deleted(), 1);
        assert!(report.policies[0].stopped_early);
        assert!(!old.exists());
        assert!(young.exists() && middle.exists());
    }

    #[test]
    fn test_and_policy_never_stops_early() {
        let fx = Fixture::new();
        let a = fx.file_aged("a", 40);
        let b = fx.file_aged("b", 100);

        let volume = ScriptedVolume::new(&[5 * GB, 25 * GB]);
        let scheduler = fx.scheduler(&[fx.policy(LogicMode::And, 30)], volume, false);
        let report = scheduler.run_tick();

        assert_eq!(report.deleted(), 2);
        assert!(!report.policies[0].stopped_early);
        assert!(!a.exists() && !b.exists());
    }

    #[test]
    fn test_missing_volume_is_skipped_and_others_still_run() {
        let fx = Fixture::new();
        let victim = fx.file_aged("victim", 2);

        let mut gone = fx.policy(LogicMode::Or, 0);
        gone.volume_id = fx.tmp.path().join("unmounted").to_str().unwrap().to_string();

        let scheduler = fx.scheduler(
            &[gone, fx.policy(LogicMode::Or, 0)],
            ScriptedVolume::new(&[5 * GB]),
            false,
        );
        let report = scheduler.run_tick();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.deleted(), 1);
        assert!(!victim.exists());
    }

    #[test]
    fn test_unreadable_store_is_reported_not_silently_empty() {
        let fx = Fixture::new();
        let victim = fx.file_aged("victim", 2);
        let store_path = fx.tmp.path().join("store-is-a-dir");
        std::fs::create_dir(&store_path).unwrap();

        let scheduler = CleanupScheduler::new(
            ConfigStore::new(store_path.clone()),
            ScriptedVolume::new(&[5 * GB]),
            AuditLogger::new(fx.tmp.path().join("audit")),
            SchedulerConfig::default(),
        );

        let err = scheduler.try_run_tick().unwrap_err();
        assert!(matches!(err, ConfigError::Read(_, ref p) if *p == store_path));

        let report = scheduler.run_tick();
        assert!(report.policies.is_empty());
        assert_eq!(report.skipped, 0);
        assert!(victim.exists());
        assert!(store_path.is_dir());
    }

    #[test]
    fn test_failed_deletion_does_not_abort_batch() {
        let fx = Fixture::new();
        let real = fx.file_aged("real", 5);
        let policy = fx.policy(LogicMode::Or, 0);
        let scheduler = fx.scheduler(&[policy.clone()], ScriptedVolume::new(&[5 * GB]), false);

        let now = Local::now();
        let phantom = CandidateFile {
            path: fx.data.join("already-gone"),
            size_bytes: 10,
            last_write: now - chrono::Duration::days(50),
            created: None,
        };
        let present = CandidateFile {
            path: real.clone(),
            size_bytes: 1024,
            last_write: now - chrono::Duration::days(5),
            created: None,
        };

        let mut report = PolicyReport::default();
        scheduler.delete_candidates(
            &policy,
            vec![
                (phantom, DeleteReason::CapacityOnly),
                (present, DeleteReason::CapacityOnly),
            ],
            now,
            &mut report,
        );

        assert_eq!(report.failures, 1);
        assert_eq!(report.deleted, 1);
        assert!(!real.exists());
    }

    #[test]
    fn test_dry_run_leaves_files_and_audit_untouched() {
        let fx = Fixture::new();
        let file = fx.file_aged("keep", 100);

        let scheduler = fx.scheduler(
            &[fx.policy(LogicMode::Or, 0)],
            ScriptedVolume::new(&[5 * GB]),
            true,
        );
        let now = Local::now();
        let report = scheduler.run_tick_at(now);

        assert_eq!(report.deleted(), 1);
        assert!(file.exists());
        assert!(fx.audit_lines(now).is_empty());
    }

    #[test]
    fn test_order_is_oldest_first() {
        let now = Local::now();
        let mut eligible: Vec<(CandidateFile, DeleteReason)> = [7, 300, 0, 45, 45, 2]
            .iter()
            .enumerate()
            .map(|(i, days)| {
                let reason = if i % 2 == 0 {
                    DeleteReason::AgeOnly
                } else {
                    DeleteReason::CapacityOnly
                };
                (
                    CandidateFile {
                        path: PathBuf::from(format!("f{i}")),
                        size_bytes: 1,
                        last_write: now - chrono::Duration::days(*days),
                        created: None,
                    },
                    reason,
                )
            })
            .collect();

        order_candidates(&mut eligible);
        assert!(eligible
            .windows(2)
            .all(|w| w[0].0.last_write <= w[1].0.last_write));
        assert_eq!(eligible[0].0.path, PathBuf::from("f1"));
    }

    #[test]
    fn test_display_age_prefers_later_creation() {
        let now = Local::now();
        let mut file = CandidateFile {
            path: PathBuf::from("copied"),
            size_bytes: 1,
            last_write: now - chrono::Duration::days(90),
            created: Some(now - chrono::Duration::days(3)),
        };
        assert_eq!(display_age_days(&file, now), 3);

        file.created = Some(now - chrono::Duration::days(200));
        assert_eq!(display_age_days(&file, now), 90);
    }

    #[tokio::test]
    async fn test_run_ticks_until_cancelled() {
        let fx = Fixture::new();
        let file = fx.file_aged("old", 100);

        let scheduler = Arc::new(fx.scheduler(
            &[fx.policy(LogicMode::Or, 30)],
            ScriptedVolume::new(&[25 * GB]),
            false,
        ));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&scheduler).run(cancel.clone()));

        for _ in 0..100 {
            if !file.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!file.exists());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_no_tick() {
        let fx = Fixture::new();
        let file = fx.file_aged("old", 100);

        let scheduler = Arc::new(fx.scheduler(
            &[fx.policy(LogicMode::Or, 30)],
            ScriptedVolume::new(&[25 * GB]),
            false,
        ));
        let cancel = CancellationToken::new();
        cancel.cancel();
        scheduler.run(cancel).await;

        assert!(file.exists());
    }
}
