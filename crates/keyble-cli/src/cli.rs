//! CLI argument definitions using clap.

use clap::Parser;
use keyble_core::registration::DEFAULT_USER_NAME;

/// Register users on eQ-3 eqiva Bluetooth smart locks
#[derive(Parser, Debug)]
#[command(name = "keyble-registeruser")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The name of the user to register
    #[arg(
        short = 'n',
        long = "user-name",
        visible_alias = "user_name",
        default_value = DEFAULT_USER_NAME,
        env = "KEYBLE_USER_NAME"
    )]
    pub user_name: String,

    /// The information encoded in the QR-Code of the key card. If not
    /// provided, key card data is read as input lines from STDIN instead
    #[arg(short = 'q', long = "qr-code-data", visible_alias = "qr_code_data")]
    pub qr_code_data: Option<String>,

    /// Answer timeout for lock messages in milliseconds
    #[arg(long, default_value = "10000", env = "KEYBLE_TIMEOUT")]
    pub timeout: u64,

    /// How long to scan for the lock in seconds
    #[arg(long, default_value = "10", env = "KEYBLE_SCAN_TIMEOUT")]
    pub scan_timeout: u64,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["keyble-registeruser"]).unwrap();
        assert_eq!(cli.user_name, "keyble");
        assert!(cli.qr_code_data.is_none());
        assert_eq!(cli.timeout, 10000);
        assert_eq!(cli.scan_timeout, 10);
        assert!(!cli.json);
    }

    #[test]
    fn test_short_flags() {
        let cli = Cli::try_parse_from(["keyble-registeruser", "-n", "front door", "-q", "M00", "-v"])
            .unwrap();
        assert_eq!(cli.user_name, "front door");
        assert_eq!(cli.qr_code_data.as_deref(), Some("M00"));
        assert!(cli.verbose);
    }

    #[test]
    fn test_underscore_aliases() {
        let cli = Cli::try_parse_from([
            "keyble-registeruser",
            "--user_name",
            "alice",
            "--qr_code_data",
            "M00",
        ])
        .unwrap();
        assert_eq!(cli.user_name, "alice");
        assert_eq!(cli.qr_code_data.as_deref(), Some("M00"));
    }
}
