//! # CLI - EddyKV Interactive Shell
//!
//! A REPL-style command-line interface for the EddyKV storage engine.
//! Reads commands from stdin, executes them against the store, and prints
//! results to stdout. Designed for both interactive use and scripted testing
//! (pipe commands via stdin). Logs go to stderr.
//!
//! ## Commands
//!
//! ```text
//! PUT key value      Insert or update a key (SET is an alias)
//! GET key            Look up a key (prints value or "(nil)")
//! DEL key            Delete a key (writes a tombstone)
//! ROTATE             Seal the active data file and start a new one
//! COMPACT            Compact every sealed data file holding stale records
//! STATS              Print store statistics
//! EXIT / QUIT        Shut down gracefully
//! ```
//!
//! ## Configuration
//!
//! ```text
//! EDDY_DIR           Store directory          (default: "data")
//! EDDY_HASH          xx | murmur3 | crc32     (default: xx)
//! EDDY_MAX_FILE_SIZE Data file size in bytes  (default: 64 MiB)
//! EDDY_SYNC_WRITES   fsync every append       (default: false)
//! RUST_LOG           Log filter               (default: warn)
//! ```
//!
//! The remaining `EDDY_*` variables are documented on
//! [`StoreConfig::from_env`](config::StoreConfig::from_env).
//!
//! ## Example
//!
//! ```text
//! $ cargo run -p cli
//! EddyKV started (dir=data, hash=xx, keys=0, seq=0)
//! > PUT name Alice
//! OK
//! > GET name
//! Alice
//! > EXIT
//! bye
//! ```

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use config::StoreConfig;
use engine::Store;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Reads a configuration value from the environment, falling back to `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// What the loop should do after a command.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// Executes one input line, writing the reply to `out`.
fn execute<W: Write>(store: &Store, line: &str, out: &mut W) -> io::Result<Flow> {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return Ok(Flow::Continue);
    };

    match cmd.to_uppercase().as_str() {
        "PUT" | "SET" => {
            let Some(k) = parts.next() else {
                writeln!(out, "ERR usage: PUT key value")?;
                return Ok(Flow::Continue);
            };
            let v = parts.collect::<Vec<&str>>().join(" ");
            if v.is_empty() {
                writeln!(out, "ERR usage: PUT key value")?;
            } else {
                match store.put(k.as_bytes(), v.as_bytes()) {
                    Ok(()) => writeln!(out, "OK")?,
                    Err(e) => writeln!(out, "ERR put failed: {e}")?,
                }
            }
        }
        "GET" => match parts.next() {
            Some(k) => match store.get(k.as_bytes()) {
                Ok(Some(v)) => writeln!(out, "{}", String::from_utf8_lossy(&v))?,
                Ok(None) => writeln!(out, "(nil)")?,
                Err(e) => writeln!(out, "ERR read failed: {e}")?,
            },
            None => writeln!(out, "ERR usage: GET key")?,
        },
        "DEL" => match parts.next() {
            Some(k) => match store.delete(k.as_bytes()) {
                Ok(()) => writeln!(out, "OK")?,
                Err(e) => writeln!(out, "ERR del failed: {e}")?,
            },
            None => writeln!(out, "ERR usage: DEL key")?,
        },
        "ROTATE" => match store.rotate() {
            Ok(()) => writeln!(out, "OK (active file {})", store.stats().active_file_id)?,
            Err(e) => writeln!(out, "ERR rotate failed: {e}")?,
        },
        "COMPACT" => match store.compact_all() {
            Ok(reports) => {
                let done = reports.iter().filter(|r| r.is_done()).count();
                let copied: u64 = reports.iter().map(|r| r.records_copied).sum();
                let reclaimed: u64 = reports.iter().map(|r| r.bytes_reclaimed).sum();
                writeln!(
                    out,
                    "OK (files={done}, records_copied={copied}, bytes_reclaimed={reclaimed})"
                )?;
            }
            Err(e) => writeln!(out, "ERR compact failed: {e}")?,
        },
        "STATS" => {
            let s = store.stats();
            writeln!(
                out,
                "keys={} seq={} hash={} active_file={} data_files={} tombstone_files={}",
                s.keys,
                s.sequence_number,
                s.hash_algorithm,
                s.active_file_id,
                s.files.len(),
                s.tombstone_files
            )?;
            writeln!(
                out,
                "bytes={} stale={} puts={} gets={} deletes={}",
                s.total_bytes(),
                s.stale_bytes(),
                s.puts,
                s.gets,
                s.deletes
            )?;
            writeln!(
                out,
                "files_compacted={} records_copied={} races_lost={} index_arena={}",
                s.files_compacted,
                s.records_copied,
                s.compaction_races_lost,
                s.index.arena_capacity()
            )?;
        }
        "EXIT" | "QUIT" => {
            writeln!(out, "bye")?;
            return Ok(Flow::Exit);
        }
        other => writeln!(out, "unknown command: {other}")?,
    }
    Ok(Flow::Continue)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let dir = env_or("EDDY_DIR", "data");
    let config = StoreConfig::from_env().context("invalid EDDY_* configuration")?;
    info!(dir = %dir, hash = %config.hash_algorithm, "starting shell");
    let store = Store::open(&dir, config).with_context(|| format!("failed to open store in {dir}"))?;

    let stats = store.stats();
    println!(
        "EddyKV started (dir={}, hash={}, keys={}, seq={})",
        dir, stats.hash_algorithm, stats.keys, stats.sequence_number
    );
    println!("Commands: PUT key value | GET key | DEL key");
    println!("          ROTATE | COMPACT | STATS | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        if execute(&store, &line, &mut stdout)? == Flow::Exit {
            break;
        }
        print!("> ");
        stdout.flush().ok();
    }

    store.close().context("failed to close store")?;
    info!("shell stopped");
    Ok(())
}
