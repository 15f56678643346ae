//! Formatted output helpers for CLI commands.

use shipyard_sdk::CleanupReport;

/// Length of an abbreviated engine id, as shown by `docker ps`.
const SHORT_ID_LEN: usize = 12;

/// Abbreviates an engine id for tabular output.
#[must_use]
pub fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

/// Renders a cleanup report, one line per phase.
#[must_use]
pub fn format_report(report: &CleanupReport) -> String {
    [report.stop, report.remove, report.networks]
        .iter()
        .map(|phase| {
            if phase.aborted {
                format!("  {:<18} skipped (listing failed)", phase.phase.to_string())
            } else if phase.failed == 0 {
                format!("  {:<18} {} done", phase.phase.to_string(), phase.matched)
            } else {
                format!(
                    "  {:<18} {} done, {} failed",
                    phase.phase.to_string(),
                    phase.succeeded(),
                    phase.failed
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
