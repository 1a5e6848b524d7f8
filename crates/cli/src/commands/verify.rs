//! `env verify`: check the node against the supported baseline

use anyhow::Result;
use collector_lib::error::ExitCode;
use collector_lib::verify::{gather_checks, CheckResult, Report};
use collector_lib::{Callback, FileCallback, OutputFormat};
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;

use super::connect;
use crate::config::CollectorSettings;
use crate::output::{color_outcome, outcome_reason, print_error, print_success, print_table, print_warning};

#[derive(Tabled, Serialize)]
struct CheckRow {
    #[tabled(rename = "#")]
    order: u32,
    #[tabled(rename = "Check")]
    description: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl From<&CheckResult> for CheckRow {
    fn from(result: &CheckResult) -> Self {
        Self {
            order: result.order,
            description: result.description.clone(),
            result: color_outcome(&result.outcome),
            reason: outcome_reason(&result.outcome),
        }
    }
}

fn print_report(report: &Report) -> Result<()> {
    println!("{}", "Environment Checks".bold());
    let rows: Vec<CheckRow> = report.results.iter().map(CheckRow::from).collect();
    print_table(&rows, false)?;
    println!();

    if let Err(e) = report.check() {
        print_error(&e.to_string());
    }
    if let Some(unknowns) = report.unknowns_message() {
        print_warning(&unknowns);
    }
    if report.failures().is_empty() {
        print_success(report.summary());
    }
    Ok(())
}

pub async fn run(settings: &CollectorSettings) -> Result<ExitCode> {
    let interface = settings.require_interface()?.to_string();
    let clientset = connect(settings).await?;

    let checks = gather_checks(clientset, &interface, settings.node_name()).await;
    let report = Report::new(&checks);

    if settings.use_analyser_format {
        let callback = FileCallback::setup(&settings.output, OutputFormat::AnalyserJson)?;
        report.emit(&callback)?;
        callback.cleanup()?;
    } else {
        print_report(&report)?;
    }
    Ok(report.exit_code())
}
