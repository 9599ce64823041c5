//! Install progress bar and summary reporting for the CLI.

use console::style;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};

use crate::manager::{ActivateReport, InstallReport, PrecacheProgress};

const SEPARATOR: &str = "────────────────────────────────────────────────────────────";

/// Progress bar over manifest entries.
pub struct InstallBar {
    bar: ProgressBar,
}

impl InstallBar {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("━━╌"),
        );
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PrecacheProgress for InstallBar {
    fn on_install_start(&self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn on_entry_cached(&self, url: &str, bytes: u64) {
        self.bar.set_message(format!("{url} ({})", HumanBytes(bytes)));
        self.bar.inc(1);
    }

    fn on_entry_failed(&self, url: &str, error: &str) {
        self.bar
            .println(format!("  {} {url}: {error}", style("✗").red()));
        self.bar.inc(1);
    }
}

/// Prints the outcome of install and activate.
pub fn print_install_summary(install: &InstallReport, activate: &ActivateReport) {
    println!("{SEPARATOR}");
    println!("Cache {}", style(&install.version).bold());
    println!("{SEPARATOR}");
    println!(
        "  {} entr{} cached, {}",
        install.cached.len(),
        if install.cached.len() == 1 { "y" } else { "ies" },
        HumanBytes(install.bytes)
    );
    if !install.failed.is_empty() {
        println!(
            "  {} entr{} failed:",
            install.failed.len(),
            if install.failed.len() == 1 { "y" } else { "ies" }
        );
        for failure in &install.failed {
            println!("    {} ({})", failure.url, failure.error);
        }
    }
    print_stale_removals(activate);
    println!("{SEPARATOR}");
}

/// Prints the outcome of a standalone activate.
pub fn print_activate_summary(version: &str, activate: &ActivateReport) {
    println!("Cache {} active", style(version).bold());
    if activate.deleted.is_empty() && activate.failed.is_empty() {
        println!("  no stale caches");
    }
    print_stale_removals(activate);
}

fn print_stale_removals(activate: &ActivateReport) {
    for name in &activate.deleted {
        println!("  removed stale cache {name}");
    }
    for name in &activate.failed {
        println!("  {} could not remove stale cache {name}", style("!").yellow());
    }
}
