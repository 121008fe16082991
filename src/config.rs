//! Policy store backed by a human-editable INI-style file.
//!
//! ```ini
//! # lines starting with '#' or ';' are comments
//! [D:]
//! directories = D:\Temp, D:\Logs
//! start_free_gb = 10
//! stop_free_gb = 20
//! min_age_days = 30
//! logic_mode = AND
//! ```
//!
//! Parsing never fails: unknown keys are ignored and malformed values keep
//! the previous value of the field. Every save rewrites the whole file
//! through a temp file and rename, so a concurrent reader never sees a
//! partial write.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::ConfigError;
use crate::policy::{
    bytes_to_gb, gb_to_bytes, parse_days_or, parse_gb_or, CleanupPolicy, LogicMode,
};

const FILE_NAME: &str = "cleanup.ini";

/// Result of parsing a policy file.
#[derive(Debug, Default)]
pub struct ParsedPolicies {
    pub policies: Vec<CleanupPolicy>,
    /// One entry per line that needed a fallback or was ignored.
    pub diagnostics: Vec<String>,
}

/// Parse policy text. Sections repeating a volume (case-insensitive) are
/// merged into the first one.
pub fn parse_policies(text: &str) -> ParsedPolicies {
    let mut out = ParsedPolicies::default();
    let mut current: Option<usize> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim();
            if name.is_empty() {
                out.diagnostics
                    .push(format!("line {line_no}: empty section name, skipping section"));
                current = None;
                continue;
            }
            current = match out.policies.iter().position(|p| p.is_for_volume(name)) {
                Some(existing) => Some(existing),
                None => {
                    out.policies.push(CleanupPolicy::new(name));
                    Some(out.policies.len() - 1)
                }
            };
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            out.diagnostics
                .push(format!("line {line_no}: expected 'key = value', ignoring"));
            continue;
        };
        let Some(section) = current else {
            out.diagnostics
                .push(format!("line {line_no}: key outside of a volume section, ignoring"));
            continue;
        };
        let policy = &mut out.policies[section];

        let diagnostic = apply_key(policy, &key.trim().to_ascii_lowercase(), value.trim());
        if let Some(msg) = diagnostic {
            out.diagnostics
                .push(format!("line {line_no} [{}]: {msg}", policy.volume_id));
        }
    }

    out
}

fn apply_key(policy: &mut CleanupPolicy, key: &str, value: &str) -> Option<String> {
    match key {
        "directories" => {
            policy.watched_directories.clear();
            for dir in value.split(',').map(str::trim).filter(|d| !d.is_empty()) {
                if !policy.watched_directories.iter().any(|d| d == dir) {
                    policy.watched_directories.push(dir.to_string());
                }
            }
            None
        }
        "start_free_gb" => {
            let parsed = parse_gb_or(value, policy.start_threshold_bytes);
            policy.start_threshold_bytes = parsed.value;
            parsed.diagnostic
        }
        "stop_free_gb" => {
            let parsed = parse_gb_or(value, policy.stop_threshold_bytes);
            policy.stop_threshold_bytes = parsed.value;
            parsed.diagnostic
        }
        "min_age_days" => {
            let parsed = parse_days_or(value, policy.min_age_days);
            policy.min_age_days = parsed.value;
            parsed.diagnostic
        }
        "logic_mode" => {
            let parsed = LogicMode::parse_or_default(value);
            policy.logic_mode = parsed.value;
            parsed.diagnostic
        }
        // Unknown keys are tolerated silently.
        _ => None,
    }
}

/// Render policies back into the file format.
pub fn render_policies(policies: &[CleanupPolicy]) -> String {
    let mut out = String::from(
        "# spacekeeper cleanup policies\n\
         # One section per volume. Sizes are free space in GB.\n\
         # logic_mode is AND or OR; min_age_days = 0 disables the age criterion.\n",
    );
    for policy in policies {
        out.push('\n');
        out.push_str(&format!("[{}]\n", policy.volume_id));
        out.push_str(&format!(
            "directories = {}\n",
            policy.watched_directories.join(", ")
        ));
        out.push_str(&format!(
            "start_free_gb = {}\n",
            bytes_to_gb(policy.start_threshold_bytes)
        ));
        out.push_str(&format!(
            "stop_free_gb = {}\n",
            bytes_to_gb(policy.stop_threshold_bytes)
        ));
        out.push_str(&format!("min_age_days = {}\n", policy.min_age_days));
        out.push_str(&format!("logic_mode = {}\n", policy.logic_mode));
    }
    out
}

/// Example policies written when no store exists yet.
pub fn default_policies() -> Vec<CleanupPolicy> {
    #[cfg(windows)]
    let specs: [(&str, &[&str], f64, f64, u32, LogicMode); 2] = [
        (
            "C:",
            &["C:\\Temp", "C:\\Logs", "C:\\Cache"],
            5.0,
            10.0,
            30,
            LogicMode::Or,
        ),
        ("D:", &["D:\\Temp", "D:\\Logs"], 10.0, 20.0, 7, LogicMode::And),
    ];
    #[cfg(not(windows))]
    let specs: [(&str, &[&str], f64, f64, u32, LogicMode); 2] = [
        (
            "/",
            &["/var/tmp/spacekeeper/logs", "/var/tmp/spacekeeper/cache"],
            5.0,
            10.0,
            30,
            LogicMode::Or,
        ),
        ("/srv", &["/srv/tmp", "/srv/logs"], 10.0, 20.0, 7, LogicMode::And),
    ];

    specs
        .iter()
        .map(|(volume, dirs, start, stop, days, mode)| CleanupPolicy {
            volume_id: volume.to_string(),
            watched_directories: dirs.iter().map(|d| d.to_string()).collect(),
            start_threshold_bytes: gb_to_bytes(*start),
            stop_threshold_bytes: gb_to_bytes(*stop),
            min_age_days: *days,
            logic_mode: *mode,
        })
        .collect()
}

/// Loads and persists the policy list.
pub struct ConfigStore {
    path: PathBuf,
    // Serialises read-modify-write cycles from this process.
    write_lock: Mutex<()>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// `<config dir>/spacekeeper/cleanup.ini`, or `./config/cleanup.ini`
    /// when the platform has no config directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("spacekeeper"))
            .unwrap_or_else(|| PathBuf::from("config"))
            .join(FILE_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current policies. A missing file is replaced by the
    /// built-in defaults, which are persisted on a best-effort basis.
    pub fn load_policies(&self) -> Result<Vec<CleanupPolicy>, ConfigError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let defaults = default_policies();
                match self.save_policies(&defaults) {
                    Ok(()) => tracing::info!(
                        path = %self.path.display(),
                        "Created default policy file"
                    ),
                    Err(e) => tracing::warn!(error = %e, "Could not persist default policies"),
                }
                return Ok(defaults);
            }
            Err(e) => return Err(ConfigError::Read(e, self.path.clone())),
        };

        let parsed = parse_policies(&text);
        for diagnostic in &parsed.diagnostics {
            tracing::warn!(path = %self.path.display(), "{diagnostic}");
        }
        tracing::debug!(count = parsed.policies.len(), "Loaded cleanup policies");
        Ok(parsed.policies)
    }

    /// Overwrite the whole store.
    pub fn save_policies(&self, policies: &[CleanupPolicy]) -> Result<(), ConfigError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let write_err = |e| ConfigError::Write(e, self.path.clone());

        std::fs::create_dir_all(dir).map_err(write_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(render_policies(policies).as_bytes())
            .map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;
        Ok(())
    }

    /// Replace the policy for the same volume (case-insensitive), or append.
    pub fn upsert(&self, policy: CleanupPolicy) -> Result<(), ConfigError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut policies = self.load_policies()?;
        match policies
            .iter_mut()
            .find(|p| p.is_for_volume(&policy.volume_id))
        {
            Some(existing) => {
                existing.watched_directories = policy.watched_directories;
                existing.start_threshold_bytes = policy.start_threshold_bytes;
                existing.stop_threshold_bytes = policy.stop_threshold_bytes;
                existing.min_age_days = policy.min_age_days;
                existing.logic_mode = policy.logic_mode;
            }
            None => policies.push(policy),
        }
        self.save_policies(&policies)
    }

    /// Remove every policy for `volume_id`. Returns whether any was removed.
    pub fn remove_by_volume(&self, volume_id: &str) -> Result<bool, ConfigError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut policies = self.load_policies()?;
        let before = policies.len();
        policies.retain(|p| !p.is_for_volume(volume_id));
        self.save_policies(&policies)?;
        Ok(policies.len() != before)
    }
}
