//! Colored console output helpers, grounded on `cli/src/ui.rs`'s print
//! helpers (same glyph-plus-color convention, just without the TUI/installer
//! concerns that crate also carries).

use colored::Colorize;

pub fn success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

pub fn warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

pub fn info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

pub fn error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

pub fn field(label: &str, value: &str) {
    println!("  {} {}", format!("{label}:").bright_black(), value);
}

pub fn header(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
    println!("{}", "─".repeat(title.len().max(20)).bright_black());
}
