//! Recover command implementation.

use super::{CommandResult, Format};
use shadowtx_core::TransactionCoordinator;
use tracing::info;

/// Runs recovery and prints the report.
pub fn run(coordinator: &TransactionCoordinator, format: Format) -> CommandResult {
    info!("Recovering interrupted transactions");
    let report = coordinator.recover()?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => {
            println!("Redone:      {}", report.redone);
            println!("Rolled back: {}", report.rolled_back);
            println!("Orphans:     {}", report.orphans);
            if !report.faults.is_empty() {
                println!();
                println!("Faults:");
                for fault in &report.faults {
                    println!("  {}  {}", fault.tx_id, fault.message);
                }
            }
        }
    }

    if report.faults.is_empty() {
        Ok(())
    } else {
        Err(format!("{} transaction(s) could not be committed", report.faults.len()).into())
    }
}
