//! Output formatting utilities

use collector_lib::validations::Outcome;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Print a table, or pretty JSON when `json` is set
pub fn print_table<T: Tabled + Serialize>(items: &[T], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }
    if items.is_empty() {
        println!("{}", "No items found".yellow());
        return Ok(());
    }
    let table = Table::new(items).with(Style::rounded()).to_string();
    println!("{}", table);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Color a check outcome
pub fn color_outcome(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Success => "passed".green().to_string(),
        Outcome::EnvironmentFailure(_) => "failed".red().to_string(),
        Outcome::Unknown(_) => "unknown".yellow().to_string(),
    }
}

/// Reason text of a check outcome, empty on success
pub fn outcome_reason(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Success => String::new(),
        Outcome::EnvironmentFailure(reason) | Outcome::Unknown(reason) => {
            reason.lines().next().unwrap_or_default().to_string()
        }
    }
}

/// Yes/no with color
pub fn color_bool(value: bool) -> String {
    if value {
        "yes".green().to_string()
    } else {
        "no".dimmed().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_reason_first_line() {
        colored::control::set_override(false);
        let failed = Outcome::EnvironmentFailure("too old\nsecond".into());
        assert_eq!(outcome_reason(&failed), "too old");
        assert_eq!(outcome_reason(&Outcome::Success), "");
        assert_eq!(color_outcome(&Outcome::Unknown("x".into())), "unknown");
        assert_eq!(color_bool(true), "yes");
    }
}
