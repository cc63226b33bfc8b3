//! Output formatters for run reports

use anyhow::Result;
use colored::*;
use std::path::Path;
use xlsum_core::RunReport;

/// Print the run report in human-readable format with colors
pub fn print_human(output_path: &Path, report: &RunReport) {
    println!(
        "{}",
        format!("Aggregating into: {}", output_path.display()).bold()
    );
    println!();

    if !report.results.is_empty() {
        println!("{}", "Results:".bold().underline());
        for (destination, sum) in &report.results {
            println!("  {} = {}", destination.cyan(), sum);
        }
        println!();
    }

    println!("{}", "Summary:".bold().underline());
    println!("  {} {}", "Files read:".bold(), report.files_read);
    println!("  {} {}", "Destinations:".bold(), report.destinations);
    if report.malformed_addresses > 0 {
        println!(
            "  {} {}",
            "Malformed addresses skipped:".yellow().bold(),
            report.malformed_addresses
        );
    }
    println!();

    if report.succeeded {
        println!("{}", "✓ Run completed".green().bold());
    } else {
        for error in &report.errors {
            println!(
                "{} [{}] {}",
                "ERROR".red().bold(),
                error.phase.to_string().bright_black(),
                error.message
            );
        }
        println!("{}", "✗ Run completed with errors".red().bold());
    }
}

/// Print the run report in JSON format
pub fn print_json(output_path: &Path, report: &RunReport) -> Result<()> {
    let output = serde_json::json!({
        "output": output_path.display().to_string(),
        "report": report,
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
