//! ferry-ctl: send files to a running ferryd.

use std::path::PathBuf;

use anyhow::{Context, Result};

use ferry_core::config::FerryConfig;

mod cmd;

use cmd::send::SendOptions;

fn print_usage() {
    println!("Usage: ferry-ctl [--config <path>] [--json] <command>");
    println!();
    println!("Commands:");
    println!("  send <path>   Send one file");
    println!("      --name <name>         Transfer name (default: file name)");
    println!("      --chunk-size <bytes>  Maximum chunk size (default: client.chunk_size)");
    println!("      --broadcast           Set the broadcast flag on every chunk");
    println!("  demo          Send the two demo files, then the sequential benchmark payload");
    println!();
    println!("Options:");
    println!("  --config <path>   Config file (default: $FERRY_CONFIG or ~/.config/ferry/config.toml)");
    println!("  --json            Print transfer reports as JSON");
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut config_path: Option<PathBuf> = None;
    let mut json = false;
    let mut name: Option<&str> = None;
    let mut chunk_size: Option<usize> = None;
    let mut broadcast = false;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config_path = Some(args.get(i).context("--config requires a value")?.into());
            }
            "--name" => {
                i += 1;
                name = Some(args.get(i).map(String::as_str).context("--name requires a value")?);
            }
            "--chunk-size" => {
                i += 1;
                chunk_size = Some(
                    args.get(i)
                        .context("--chunk-size requires a value")?
                        .parse()
                        .context("--chunk-size must be a number")?,
                );
            }
            "--json" => json = true,
            "--broadcast" => broadcast = true,
            other => remaining.push(other),
        }
        i += 1;
    }

    let config = match &config_path {
        Some(path) => FerryConfig::load_file(path),
        None => FerryConfig::load(),
    }
    .context("failed to load config")?;

    match remaining.as_slice() {
        ["send", path] => {
            config.validate_client().context("invalid client configuration")?;
            let opts = SendOptions { path: *path, name, chunk_size, broadcast, json };
            cmd::send::cmd_send(&config, opts).await
        }
        ["demo"] => {
            config.validate_client().context("invalid client configuration")?;
            cmd::demo::cmd_demo(&config, json).await
        }
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
