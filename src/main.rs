use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use spacekeeper::audit::AuditLogger;
use spacekeeper::cli::{Cli, Command, PolicyAction};
use spacekeeper::config::ConfigStore;
use spacekeeper::policy::{gb_to_bytes, CleanupPolicy};
use spacekeeper::scheduler::{CleanupScheduler, SchedulerConfig};
use spacekeeper::volume::{self, SystemVolumes};
use spacekeeper::{output, utils};

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = ConfigStore::new(cli.config.clone().unwrap_or_else(ConfigStore::default_path));
    let audit = AuditLogger::new(cli.record_dir.clone().unwrap_or_else(AuditLogger::default_root));

    match cli.command {
        Command::Run {
            interval_secs,
            dry_run,
        } => {
            let config = SchedulerConfig {
                interval_secs,
                dry_run,
            };
            let scheduler = Arc::new(CleanupScheduler::new(
                store,
                Arc::new(SystemVolumes),
                audit,
                config,
            ));
            let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
            runtime.block_on(async move {
                let cancel = CancellationToken::new();
                let worker = tokio::spawn(scheduler.run(cancel.clone()));
                if let Err(e) = tokio::signal::ctrl_c().await {
                    // Keep cleaning until the process is killed.
                    tracing::error!(error = %e, "Cannot listen for shutdown signal");
                    std::future::pending::<()>().await;
                }
                tracing::info!("Shutdown requested");
                cancel.cancel();
                worker.await.context("scheduler task failed")
            })?;
        }

        Command::Once { dry_run } => {
            let scheduler = CleanupScheduler::new(
                store,
                Arc::new(SystemVolumes),
                audit,
                SchedulerConfig {
                    dry_run,
                    ..Default::default()
                },
            );
            let report = scheduler
                .try_run_tick()
                .context("cannot load cleanup policies")?;
            output::print_tick_report(&report, dry_run);
        }

        Command::Policies { action } => match action {
            PolicyAction::List => {
                let policies = store.load_policies()?;
                output::print_header(&format!("Policies in {}", store.path().display()));
                if policies.is_empty() {
                    output::print_info("No policies configured.");
                }
                for policy in &policies {
                    output::print_policy(policy);
                }
            }
            PolicyAction::Set {
                volume,
                dirs,
                start_gb,
                stop_gb,
                min_age_days,
                logic,
            } => {
                if stop_gb < start_gb {
                    output::print_warning(
                        "stop threshold is below start threshold; capacity cleanup may stop before deleting anything",
                    );
                }
                let policy = CleanupPolicy {
                    volume_id: volume,
                    watched_directories: dirs,
                    start_threshold_bytes: gb_to_bytes(start_gb.max(0.0)),
                    stop_threshold_bytes: gb_to_bytes(stop_gb.max(0.0)),
                    min_age_days,
                    logic_mode: logic.into(),
                };
                output::print_policy(&policy);
                store.upsert(policy)?;
                output::print_info("Policy saved.");
            }
            PolicyAction::Remove { volume } => {
                if store.remove_by_volume(&volume)? {
                    output::print_info(&format!("Removed policy for {volume}."));
                } else {
                    output::print_warning(&format!("No policy for {volume}."));
                }
            }
        },

        Command::Volumes => {
            output::print_header("Volumes");
            for summary in volume::list_volumes() {
                output::print_volume(&summary);
            }
        }

        Command::CheckDirs { dirs } => {
            output::print_header("Directories");
            for check in utils::check_directories(&dirs) {
                output::print_directory_check(&check);
            }
        }
    }

    Ok(())
}
