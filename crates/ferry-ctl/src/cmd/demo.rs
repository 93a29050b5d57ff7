//! The reference run: two small transfers at a tiny chunk size, then a
//! large sequential payload at 1 MiB chunks with throughput.

use anyhow::{Context, Result};

use ferry_core::config::FerryConfig;
use ferry_transfer::sequential_payload;

use super::{connect, print_report};

const DEMO_CHUNK_SIZE: usize = 3;
const BENCH_CHUNK_SIZE: usize = 1 << 20;

const FILES: [(&str, &[u8]); 2] = [
    ("file1", b"hello peer, it is nice to meet you!!"),
    ("file2", b"second set of data should be kept separate!"),
];

pub async fn cmd_demo(config: &FerryConfig, json: bool) -> Result<()> {
    let mut sender = connect(config)?;

    for (name, data) in FILES {
        let report = sender
            .send_file(name, data, DEMO_CHUNK_SIZE, false)
            .await
            .with_context(|| format!("failed to send {name}"))?;
        print_report(&report, json)?;
    }

    let megabytes = config.client.payload_megabytes;
    let len = usize::try_from(megabytes << 20).context("payload_megabytes too large")?;
    let payload = sequential_payload(len).context("payload size must be a multiple of 8")?;
    let name = format!("sequential-{megabytes}MB");

    let report = sender
        .send_file(&name, &payload, BENCH_CHUNK_SIZE, false)
        .await
        .with_context(|| format!("failed to send {name}"))?;
    print_report(&report, json)?;
    if !json {
        println!("{:.1} MB/sec", report.megabytes_per_sec());
    }
    Ok(())
}
