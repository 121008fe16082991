use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::policy::LogicMode;

#[derive(Parser)]
#[command(
    name = "spacekeeper",
    about = "Free disk space by cleaning watched directories, oldest files first",
    version
)]
pub struct Cli {
    /// Policy file (INI format). Created with example policies if missing.
    #[arg(long, global = true, env = "SPACEKEEPER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Root directory of the deletion audit trail
    #[arg(long, global = true, env = "SPACEKEEPER_RECORD_DIR")]
    pub record_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the cleanup loop until interrupted
    Run {
        /// Seconds between ticks
        #[arg(long, default_value_t = 60, env = "SPACEKEEPER_INTERVAL_SECS")]
        interval_secs: u64,

        /// Log what would be deleted without deleting anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Run a single cleanup tick and print a summary
    Once {
        /// Log what would be deleted without deleting anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect or edit cleanup policies
    Policies {
        #[command(subcommand)]
        action: PolicyAction,
    },

    /// List fixed volumes with their free and total space
    Volumes,

    /// Report whether directories exist and how large they are
    CheckDirs {
        #[arg(required = true)]
        dirs: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum PolicyAction {
    /// Print every configured policy
    List,

    /// Add a policy, or replace the one for the same volume
    Set {
        /// Volume root, e.g. "D:" or "/srv"
        #[arg(long)]
        volume: String,

        /// Directory to clean (repeatable)
        #[arg(long = "dir", required = true)]
        dirs: Vec<String>,

        /// Start cleaning below this much free space (GB)
        #[arg(long)]
        start_gb: f64,

        /// Capacity-only cleaning stops at this much free space (GB)
        #[arg(long)]
        stop_gb: f64,

        /// Minimum file age in days; 0 disables the age criterion
        #[arg(long, default_value_t = 0)]
        min_age_days: u32,

        /// How the capacity and age conditions combine
        #[arg(long, value_enum, default_value_t = LogicArg::Or)]
        logic: LogicArg,
    },

    /// Remove the policy for a volume
    Remove {
        #[arg(long)]
        volume: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LogicArg {
    And,
    Or,
}

impl From<LogicArg> for LogicMode {
    fn from(arg: LogicArg) -> Self {
        match arg {
            LogicArg::And => LogicMode::And,
            LogicArg::Or => LogicMode::Or,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_policy_set() {
        let cli = Cli::try_parse_from([
            "spacekeeper",
            "--config",
            "/etc/sk.ini",
            "policies",
            "set",
            "--volume",
            "D:",
            "--dir",
            "D:\\Temp",
            "--dir",
            "D:\\Logs",
            "--start-gb",
            "10",
            "--stop-gb",
            "20",
            "--logic",
            "and",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/etc/sk.ini")));
        match cli.command {
            Command::Policies {
                action:
                    PolicyAction::Set {
                        volume,
                        dirs,
                        min_age_days,
                        logic,
                        ..
                    },
            } => {
                assert_eq!(volume, "D:");
                assert_eq!(dirs.len(), 2);
                assert_eq!(min_age_days, 0);
                assert_eq!(LogicMode::from(logic), LogicMode::And);
            }
            _ => panic!("expected policies set"),
        }
    }
}
