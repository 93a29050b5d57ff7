//! Send one file.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use memmap2::Mmap;

use ferry_core::config::FerryConfig;

use super::{connect, print_report};

pub struct SendOptions<'a> {
    pub path: &'a str,
    pub name: Option<&'a str>,
    pub chunk_size: Option<usize>,
    pub broadcast: bool,
    pub json: bool,
}

pub async fn cmd_send(config: &FerryConfig, opts: SendOptions<'_>) -> Result<()> {
    let file = File::open(opts.path).with_context(|| format!("failed to open {}", opts.path))?;
    let len = file
        .metadata()
        .with_context(|| format!("failed to stat {}", opts.path))?
        .len();

    // Safety: read-only mapping, never mutated; the file is not expected
    // to change underneath us for the duration of the send.
    let mmap = if len == 0 {
        None
    } else {
        Some(unsafe { Mmap::map(&file) }.with_context(|| format!("failed to mmap {}", opts.path))?)
    };
    let payload: &[u8] = mmap.as_deref().unwrap_or(&[]);

    let name = match opts.name {
        Some(name) => name.to_string(),
        None => Path::new(opts.path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string(),
    };
    let chunk_size = opts.chunk_size.unwrap_or(config.client.chunk_size);

    let mut sender = connect(config)?;
    let report = sender
        .send_file(&name, payload, chunk_size, opts.broadcast)
        .await
        .with_context(|| format!("failed to send {}", opts.path))?;
    print_report(&report, opts.json)
}
