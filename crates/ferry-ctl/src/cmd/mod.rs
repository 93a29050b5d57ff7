//! CLI command modules.

pub mod demo;
pub mod send;

use anyhow::{Context, Result};

use ferry_core::config::FerryConfig;
use ferry_transfer::transport::Connector;
use ferry_transfer::{FileSender, TransferReport};

/// Sender dialing the server named by the config, in its security mode.
pub fn connect(config: &FerryConfig) -> Result<FileSender<Connector>> {
    let connector = Connector::from_config(config).context("failed to set up secure channel")?;
    tracing::debug!(addr = connector.addr(), mode = ?connector.mode(), "sender ready");
    Ok(FileSender::new(config.client.my_id.clone(), connector))
}

pub fn print_report(report: &TransferReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(report).context("failed to encode report")?);
        return Ok(());
    }
    println!("  ┌─ {}", report.name);
    println!("  │  bytes    : {}", report.bytes);
    println!("  │  chunks   : {}", report.chunks);
    println!("  │  checksum : {}", report.checksum);
    println!(
        "  └─ elapsed  : {:.3}s ({:.1} MB/sec)",
        report.elapsed.as_secs_f64(),
        report.megabytes_per_sec()
    );
    Ok(())
}
