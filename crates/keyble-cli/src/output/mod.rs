//! Output formatting for CLI results.

pub mod json;
pub mod table;

pub use json::JsonOutput;
pub use table::TableOutput;

use keyble_core::device::PairingCredentials;
use keyble_core::registration::{RegistrationEvent, RunReport};

/// Output formatter trait
pub trait OutputFormatter {
    /// Format a progress event, or `None` if this format does not show it
    fn format_event(&self, event: &RegistrationEvent) -> Option<String>;

    /// Format the result of a whole run
    fn format_summary(&self, report: &RunReport) -> String;

    /// Format an error
    fn format_error(&self, error: &str) -> String;
}

/// Arguments that address the newly registered user in later commands
pub fn credential_arguments(address: &str, credentials: &PairingCredentials) -> String {
    format!(
        "--address {} --user_id {} --user_key {}",
        address,
        credentials.user_id,
        credentials.user_key_hex()
    )
}

/// Get the appropriate formatter based on JSON flag
pub fn get_formatter(json: bool) -> Box<dyn OutputFormatter> {
    if json {
        Box::new(JsonOutput::new())
    } else {
        Box::new(TableOutput::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_arguments() {
        let credentials = PairingCredentials {
            user_id: 3,
            user_key: [0xab; 16],
        };
        assert_eq!(
            credential_arguments("AA:BB:CC:DD:EE:FF", &credentials),
            "--address AA:BB:CC:DD:EE:FF --user_id 3 --user_key ABABABABABABABABABABABABABABABAB"
        );
    }
}
