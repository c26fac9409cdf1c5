//! JSON-formatted output for CLI.
//!
//! Progress stays on the log stream; stdout carries one summary document.

use serde::Serialize;
use serde_json::json;

use super::OutputFormatter;
use keyble_core::registration::{RegistrationEvent, RunReport};

pub struct JsonOutput;

impl JsonOutput {
    pub fn new() -> Self {
        Self
    }

    fn to_json<T: Serialize>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for JsonOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputFormatter for JsonOutput {
    fn format_event(&self, _event: &RegistrationEvent) -> Option<String> {
        None
    }

    fn format_summary(&self, report: &RunReport) -> String {
        Self::to_json(&json!({
            "success": report.is_success(),
            "state": report.final_state,
            "succeeded": report.succeeded(),
            "failed": report.failed(),
            "outcomes": report.outcomes,
        }))
    }

    fn format_error(&self, error: &str) -> String {
        Self::to_json(&json!({
            "success": false,
            "error": error
        }))
    }
}
