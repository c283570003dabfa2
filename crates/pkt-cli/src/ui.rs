//! Console output.

use crossterm::style::Stylize;
use pkt_core::Reporter;
use pkt_schema::PackageName;

/// Line-oriented terminal reporter. Safe to share across install tasks:
/// each event is a single `println!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter {
    quiet: bool,
}

impl ConsoleReporter {
    /// Reporter that stays silent apart from warnings and errors when `quiet`.
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    fn row(&self, marker: &str, name: &PackageName, version: &str, detail: &str) {
        if self.quiet {
            return;
        }
        println!(
            "  {marker} {:<24} {:<12} {}",
            name.as_str(),
            version.dark_grey(),
            detail.dark_grey()
        );
    }
}

impl Reporter for ConsoleReporter {
    fn section(&self, title: &str) {
        if !self.quiet {
            println!();
            println!("{}", title.bold());
        }
    }

    fn fetching(&self, name: &PackageName, version: &str) {
        self.row(&"↓".cyan().to_string(), name, version, "fetching");
    }

    fn installing(&self, name: &PackageName, version: &str) {
        self.row(&"•".cyan().to_string(), name, version, "installing");
    }

    fn removing(&self, name: &PackageName, version: &str) {
        self.row(&"•".yellow().to_string(), name, version, "removing");
    }

    fn done(&self, name: &PackageName, version: &str, detail: &str) {
        self.row(&"✓".green().to_string(), name, version, detail);
    }

    fn failed(&self, name: &PackageName, version: &str, reason: &str) {
        eprintln!(
            "  {} {:<24} {:<12} {}",
            "✗".red(),
            name.as_str(),
            version,
            reason.red()
        );
    }

    fn info(&self, msg: &str) {
        if !self.quiet {
            println!("  {msg}");
        }
    }

    fn warning(&self, msg: &str) {
        eprintln!("  {} {msg}", "warning:".yellow().bold());
    }

    fn error(&self, msg: &str) {
        eprintln!("  {} {msg}", "error:".red().bold());
    }

    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        if !self.quiet {
            println!();
            println!(
                "  {} {count} package{} in {elapsed_secs:.1}s",
                action.green().bold(),
                if count == 1 { "" } else { "s" }
            );
        }
    }
}
