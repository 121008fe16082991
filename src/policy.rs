//! Per-volume cleanup policies.
//!
//! A policy names a volume, the directories on it that may be cleaned, a
//! free-space threshold pair and a minimum file age. The capacity and age
//! conditions are combined with a [`LogicMode`].

use std::fmt;
use std::str::FromStr;

pub const BYTES_PER_GB: f64 = 1_073_741_824.0;

/// How the capacity and age conditions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogicMode {
    /// Both conditions must hold.
    And,
    /// Either condition is enough.
    #[default]
    Or,
}

impl LogicMode {
    /// Parse a mode token, falling back to [`LogicMode::Or`] on anything
    /// unrecognised. The diagnostic is set when the fallback was taken.
    pub fn parse_or_default(token: &str) -> Parsed<LogicMode> {
        match token.parse() {
            Ok(mode) => Parsed::ok(mode),
            Err(_) => Parsed::fallback(
                LogicMode::default(),
                format!("unrecognised logic mode '{}', using OR", token.trim()),
            ),
        }
    }
}

impl FromStr for LogicMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AND" => Ok(LogicMode::And),
            "OR" => Ok(LogicMode::Or),
            _ => Err(()),
        }
    }
}

impl fmt::Display for LogicMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicMode::And => f.write_str("AND"),
            LogicMode::Or => f.write_str("OR"),
        }
    }
}

/// A parsed value plus an optional note saying a fallback was used.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub value: T,
    pub diagnostic: Option<String>,
}

impl<T> Parsed<T> {
    fn ok(value: T) -> Self {
        Self {
            value,
            diagnostic: None,
        }
    }

    fn fallback(value: T, diagnostic: String) -> Self {
        Self {
            value,
            diagnostic: Some(diagnostic),
        }
    }
}

/// Parse a free-space amount in GB into bytes. Negative, non-finite and
/// non-numeric input keep `fallback`.
pub fn parse_gb_or(raw: &str, fallback: u64) -> Parsed<u64> {
    match raw.trim().parse::<f64>() {
        Ok(gb) if gb.is_finite() && gb >= 0.0 => Parsed::ok(gb_to_bytes(gb)),
        _ => Parsed::fallback(
            fallback,
            format!("invalid size '{}' (GB), keeping {}", raw.trim(), bytes_to_gb(fallback)),
        ),
    }
}

/// Parse a day count. Negative and non-numeric input keep `fallback`.
pub fn parse_days_or(raw: &str, fallback: u32) -> Parsed<u32> {
    match raw.trim().parse::<u32>() {
        Ok(days) => Parsed::ok(days),
        Err(_) => Parsed::fallback(
            fallback,
            format!("invalid day count '{}', keeping {fallback}", raw.trim()),
        ),
    }
}

pub fn gb_to_bytes(gb: f64) -> u64 {
    (gb * BYTES_PER_GB).round() as u64
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}

/// Cleanup configuration for one volume.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupPolicy {
    /// Volume root, e.g. `D:` or `/srv`.
    pub volume_id: String,
    /// Directories that may be cleaned. Entries outside the volume are
    /// skipped when collecting.
    pub watched_directories: Vec<String>,
    /// Cleaning starts when free space drops below this.
    pub start_threshold_bytes: u64,
    /// Capacity-only cleaning stops once free space reaches this.
    pub stop_threshold_bytes: u64,
    /// 0 leaves the age criterion unconfigured.
    pub min_age_days: u32,
    pub logic_mode: LogicMode,
}

impl CleanupPolicy {
    pub fn new(volume_id: impl Into<String>) -> Self {
        Self {
            volume_id: volume_id.into(),
            watched_directories: Vec::new(),
            start_threshold_bytes: 0,
            stop_threshold_bytes: 0,
            min_age_days: 0,
            logic_mode: LogicMode::Or,
        }
    }

    /// Case-insensitive match on the volume key.
    pub fn is_for_volume(&self, volume_id: &str) -> bool {
        self.volume_id.eq_ignore_ascii_case(volume_id)
    }

    /// OR mode with no age criterion: deletions are driven by free space
    /// alone, so the batch may stop once the stop threshold is reached.
    pub fn is_capacity_only(&self) -> bool {
        self.logic_mode == LogicMode::Or && self.min_age_days == 0
    }
}
