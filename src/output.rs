use colored::Colorize;

use crate::policy::{bytes_to_gb, CleanupPolicy};
use crate::scheduler::TickReport;
use crate::utils::{format_size, DirectoryCheck};
use crate::volume::VolumeSummary;

pub fn print_header(label: &str) {
    println!("{}", format!("=== {label} ===").bold().white());
}

pub fn print_policy(policy: &CleanupPolicy) {
    println!("{}", format!("[{}]", policy.volume_id).bold().cyan());
    for dir in &policy.watched_directories {
        println!("  {}", dir.dimmed());
    }
    println!(
        "  start below {} GB, stop at {} GB, min age {} days, logic {}",
        bytes_to_gb(policy.start_threshold_bytes).to_string().yellow(),
        bytes_to_gb(policy.stop_threshold_bytes).to_string().yellow(),
        policy.min_age_days.to_string().yellow(),
        policy.logic_mode.to_string().yellow(),
    );
    println!();
}

pub fn print_volume(volume: &VolumeSummary) {
    let pct = (volume.space.usage_percent() * 100.0) as u32;
    println!(
        "  {:<24} {} free / {} total  ({}% used)",
        volume.mount_point.display(),
        format_size(volume.space.available).green(),
        format_size(volume.space.total),
        pct,
    );
}

pub fn print_directory_check(check: &DirectoryCheck) {
    if check.exists {
        println!(
            "  {}  {}",
            check.path.display().to_string().dimmed(),
            format_size(check.size_bytes).yellow()
        );
    } else {
        println!(
            "  {}  {}",
            check.path.display().to_string().dimmed(),
            "missing".red().bold()
        );
    }
}

pub fn print_tick_report(report: &TickReport, dry_run: bool) {
    print_header("Summary");
    for policy in &report.policies {
        let note = if policy.stopped_early {
            "  [stop threshold reached]".dimmed().to_string()
        } else {
            String::new()
        };
        println!(
            "  {:<24} {} of {} files, {}{}",
            policy.volume_id,
            policy.deleted.to_string().green(),
            policy.candidates,
            format_size(policy.bytes_freed).green(),
            note,
        );
        if policy.failures > 0 {
            print_warning(&format!("{} deletions failed on {}", policy.failures, policy.volume_id));
        }
    }
    if report.skipped > 0 {
        print_warning(&format!("{} volume(s) skipped, see log", report.skipped));
    }
    println!();

    let freed = format_size(report.bytes_freed());
    if dry_run {
        println!(
            "{}",
            format!("Dry run: {freed} would be freed. Nothing was deleted.")
                .yellow()
                .bold()
        );
    } else {
        println!(
            "{} {}",
            "Cleaned!".green().bold(),
            format!("{freed} freed.").green()
        );
    }
}

pub fn print_warning(msg: &str) {
    println!("{} {}", "Warning:".red().bold(), msg.red());
}

pub fn print_info(msg: &str) {
    println!("{} {}", "Info:".cyan().bold(), msg);
}
