//! Pretty terminal output with colors and badges.

use colored::Colorize;

use crate::audit::IpSummary;
use crate::abuse::ScanConfig;

// === Startup ===

pub fn print_banner() {
    println!();
    println!("{}", "╔═══════════════════════════════════════════════════════════╗".cyan());
    println!("║     {}                                      ║", "viewguard v0.1.0".bold().white());
    println!("║     {}                           ║", "view-count integrity engine".dimmed());
    println!("{}", "╚═══════════════════════════════════════════════════════════╝".cyan());
    println!();
}

pub fn print_startup(addr: &str) {
    println!("{} {}", "✓".green().bold(), "Server ready".white().bold());
    println!("  {} {}", "→".dimmed(), format!("http://{}", addr).cyan().underline());
    println!();
    println!("{}", "Endpoints:".white().bold());
    println!("  {} {}  {}", "POST".yellow(), "/api/content/:id/view".white(), "Count a view".dimmed());
    println!("  {} {}  {}", "GET ".green(), "/api/session".white(), "Start session, issue CSRF token".dimmed());
    println!("  {} {}  {}", "GET ".green(), "/api/attempts".white(), "Recent attempt records".dimmed());
    println!("  {} {} {}", "GET ".green(), "/metrics".white(), "Telemetry".dimmed());
    println!("  {} {} {}", "GET ".green(), "/health".white(), "Health check".dimmed());
    println!();
}

// === Badges ===

fn badge(text: &str, fg: colored::Color, bg: colored::Color) -> colored::ColoredString {
    format!(" {} ", text).color(fg).on_color(bg).bold()
}

// === Abuse scan ===

pub fn print_scan_report(config: &ScanConfig, flagged: &[IpSummary]) {
    println!(
        "{} {} {}",
        badge("SCAN", colored::Color::Black, colored::Color::Cyan),
        format!("last {}h", config.lookback_hours).white(),
        format!(
            "(> {} attempts and > {} failures)",
            config.min_attempts, config.min_failures
        )
        .dimmed()
    );
    if flagged.is_empty() {
        println!("  {} {}", "✓".green().bold(), "no suspicious clients".green());
        return;
    }
    for s in flagged {
        println!(
            "{} {} {} {}",
            badge("ABUSE", colored::Color::White, colored::Color::Red),
            format!("ip:{}", s.ip).yellow(),
            format!("attempts={}", s.total_attempts).white(),
            format!("failed={}", s.failed_attempts).red()
        );
    }
}

pub fn print_registered(content_id: &str, path: &str) {
    println!(
        "{} {} {}",
        badge("CONTENT", colored::Color::Black, colored::Color::Green),
        format!("id:{}", content_id).white(),
        path.cyan()
    );
}
