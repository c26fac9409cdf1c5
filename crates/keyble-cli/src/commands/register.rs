//! User registration command.

use std::io::Write;
use std::time::Duration;

use tokio::io::BufReader;
use tracing::{debug, info};

use crate::cli::Cli;
use crate::error::{CliError, Result};
use crate::output::get_formatter;

use keyble_core::device::ble::{BleConnector, BleOptions};
use keyble_core::registration::{RegistrationOptions, RunReport};
use keyble_core::{InputFeed, Registrar};

/// Register one user per key card, from `--qr-code-data` or stdin lines
pub async fn run_register(cli: &Cli) -> Result<()> {
    let options = RegistrationOptions::new(cli.user_name.clone())?;
    let ble_options = ble_options(cli.timeout, cli.scan_timeout)?;
    debug!(?ble_options, user_name = options.user_name(), "Starting registration");

    let connector = BleConnector::new(ble_options).await?;
    let registrar = Registrar::new(connector, options);
    let formatter = get_formatter(cli.json);

    let mut feed = match supplied_card(cli.qr_code_data.as_deref()) {
        Some(data) => InputFeed::single(data),
        None => {
            info!("Reading key card data from stdin");
            InputFeed::from_reader(BufReader::new(tokio::io::stdin()))
        }
    };

    let report = registrar
        .run(&mut feed, |event| {
            if let Some(line) = formatter.format_event(&event) {
                println!("{}", line);
            }
        })
        .await;

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", formatter.format_summary(&report))?;
    stdout.flush()?;

    check_report(&report)
}

/// Key card data given on the command line; blank counts as absent.
fn supplied_card(qr_code_data: Option<&str>) -> Option<&str> {
    qr_code_data.map(str::trim).filter(|data| !data.is_empty())
}

fn ble_options(timeout_ms: u64, scan_timeout_s: u64) -> Result<BleOptions> {
    if timeout_ms == 0 {
        return Err(CliError::InvalidArgument(
            "--timeout must be greater than 0".to_string(),
        ));
    }
    if scan_timeout_s == 0 {
        return Err(CliError::InvalidArgument(
            "--scan-timeout must be greater than 0".to_string(),
        ));
    }

    Ok(BleOptions {
        scan_timeout: Duration::from_secs(scan_timeout_s),
        command_timeout: Duration::from_millis(timeout_ms),
    })
}

fn check_report(report: &RunReport) -> Result<()> {
    if report.is_success() {
        Ok(())
    } else {
        Err(CliError::RegistrationFailed {
            succeeded: report.succeeded(),
            failed: report.failed(),
        })
    }
}
