//! Table-formatted output for CLI.

use colored::*;
use comfy_table::{Cell, Color, ContentArrangement, Table};

use super::{credential_arguments, OutputFormatter};
use keyble_core::registration::{RegistrationEvent, RunReport};

pub struct TableOutput;

impl TableOutput {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TableOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputFormatter for TableOutput {
    fn format_event(&self, event: &RegistrationEvent) -> Option<String> {
        let line = match event {
            RegistrationEvent::PairingModeInstruction(text) => text.white().on_red().to_string(),
            RegistrationEvent::AwaitingOperator { grace } => format!(
                "Waiting {}s for you to press unlock...",
                grace.as_secs_f32()
            ),
            RegistrationEvent::Registering { address, serial } => format!(
                "Registering user on Smart Lock with address \"{}\" and serial \"{}\"...",
                address.cyan(),
                serial.cyan()
            ),
            RegistrationEvent::Paired {
                address,
                credentials,
            } => format!(
                "User registered! Use arguments: \"{}\"",
                credential_arguments(address, credentials).cyan()
            ),
            RegistrationEvent::UserNameSet { user_name, .. } => {
                format!("User name changed to \"{}\"", user_name.cyan())
            }
            RegistrationEvent::Finished(outcome) => match &outcome.error {
                None => "Finished registering user.".green().to_string(),
                Some(error) => format!("{} {}", "Failed:".red(), error.message),
            },
        };
        Some(line)
    }

    fn format_summary(&self, report: &RunReport) -> String {
        if report.outcomes.is_empty() {
            return "No key cards processed.".to_string();
        }

        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Address", "Serial", "User ID", "User Key", "Status", "Finished"]);

        for outcome in &report.outcomes {
            let status_cell = match &outcome.error {
                None => Cell::new("OK").fg(Color::Green),
                Some(error) => Cell::new(error.kind.as_str()).fg(Color::Red),
            };

            table.add_row(vec![
                Cell::new(outcome.address.as_deref().unwrap_or("-")),
                Cell::new(outcome.serial.as_deref().unwrap_or("-")),
                Cell::new(
                    outcome
                        .user_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ),
                Cell::new(outcome.user_key.as_deref().unwrap_or("-")),
                status_cell,
                Cell::new(outcome.finished_at.format("%H:%M:%S").to_string()),
            ]);
        }

        let summary = format!(
            "\nSummary: {} succeeded, {} failed",
            report.succeeded().to_string().green(),
            report.failed().to_string().red()
        );

        format!("{}{}", table, summary)
    }

    fn format_error(&self, error: &str) -> String {
        format!("{} {}", "Error:".red().bold(), error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use keyble_core::device::PairingCredentials;
    use keyble_core::error::ErrorKind;
    use keyble_core::registration::{OutcomeError, RegistrationOutcome, RunState};

    #[test]
    fn test_paired_line_carries_arguments() {
        colored::control::set_override(false);
        let event = RegistrationEvent::Paired {
            address: "AA:BB:CC:DD:EE:FF".to_string(),
            credentials: PairingCredentials {
                user_id: 3,
                user_key: [0x11; 16],
            },
        };

        let line = TableOutput::new().format_event(&event).unwrap();
        assert!(line.contains(
            "--address AA:BB:CC:DD:EE:FF --user_id 3 --user_key 11111111111111111111111111111111"
        ));
    }

    #[test]
    fn test_summary_lists_failures() {
        colored::control::set_override(false);
        let report = RunReport {
            outcomes: vec![RegistrationOutcome {
                success: false,
                address: None,
                serial: None,
                user_id: None,
                user_key: None,
                error: Some(OutcomeError {
                    kind: ErrorKind::MalformedCredential,
                    message: "bad card".to_string(),
                }),
                finished_at: Utc::now(),
            }],
            final_state: RunState::Terminated,
        };

        let output = TableOutput::new().format_summary(&report);
        assert!(output.contains("malformed credential"));
        assert!(output.contains("0 succeeded, 1 failed"));
    }

    #[test]
    fn test_empty_summary() {
        let report = RunReport {
            outcomes: Vec::new(),
            final_state: RunState::Idle,
        };
        assert_eq!(
            TableOutput::new().format_summary(&report),
            "No key cards processed."
        );
    }
}
