use anyhow::{bail, Context, Result};
use chainlog_core::{AuditEntry, AuditLogger, VerifyReport};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::path::PathBuf;

use crate::config::ChainlogConfig;

#[derive(Parser, Debug)]
#[command(name = "chainlog")]
#[command(version)]
#[command(about = "Tamper-evident, hash-chained audit log")]
#[command(long_about = "Append events to an NDJSON audit log whose entries are linked by an \
HMAC-SHA256 hash chain, and verify that no entry was edited, removed or reordered")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Audit log path (overrides the configuration file)
    #[arg(long, global = true)]
    pub log_path: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON output format
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Append one event
    Record {
        /// Event as a JSON object; "-" or nothing reads it from stdin
        event: Option<String>,
    },

    /// Verify the hash chain of the current log
    Verify,

    /// Print the entries of the current log
    Show {
        /// Only the last N entries
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

impl Cli {
    /// Load the configuration this invocation runs with
    pub fn load_config(&self) -> Result<ChainlogConfig> {
        let mut config = ChainlogConfig::load(self.config.as_deref())?;
        if let Some(path) = &self.log_path {
            config.audit.log_path = Some(path.clone());
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
        Ok(config)
    }
}

/// Execute `cli` against an already built logger
pub async fn run(
    cli: &Cli,
    logger: &AuditLogger,
    input: &mut dyn Read,
    out: &mut dyn Write,
) -> Result<()> {
    match &cli.command {
        Commands::Record { event } => {
            let raw = match event.as_deref() {
                Some("-") | None => {
                    let mut buf = String::new();
                    input.read_to_string(&mut buf).context("Failed to read event from stdin")?;
                    buf
                }
                Some(inline) => inline.to_string(),
            };
            if raw.trim().is_empty() {
                bail!("No event given");
            }

            let value: Value = serde_json::from_str(raw.trim()).context("Event is not valid JSON")?;
            let entry = logger.record_value(value).await?;
            print_entry(out, &entry, cli.json)?;
        }
        Commands::Verify => {
            let report = logger.verify().await?;
            print_report(out, &report, cli.json)?;
        }
        Commands::Show { limit } => {
            let entries = logger.entries().await?;
            let skip = limit.map_or(0, |n| entries.len().saturating_sub(n));
            for entry in entries.iter().skip(skip) {
                print_entry(out, entry, cli.json)?;
            }
        }
    }

    Ok(())
}

fn print_entry(out: &mut dyn Write, entry: &AuditEntry, json: bool) -> Result<()> {
    if json {
        writeln!(out, "{}", entry.to_line())?;
        return Ok(());
    }

    let timestamp = entry.timestamp().unwrap_or("-");
    let mut fields: Vec<String> = entry
        .as_map()
        .iter()
        .filter(|(k, _)| !matches!(k.as_str(), "timestamp" | "prevHash" | "hash"))
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    fields.sort();

    match entry.hash() {
        Some(hash) => {
            let short: String = hash.chars().take(12).collect();
            writeln!(out, "{} [{}] {}", timestamp, short, fields.join(" "))?
        }
        None => writeln!(out, "{} {}", timestamp, fields.join(" "))?,
    }
    Ok(())
}

fn print_report(out: &mut dyn Write, report: &VerifyReport, json: bool) -> Result<()> {
    if json {
        let value = json!({
            "lastHash": report.last_hash,
            "lines": report.lines,
            "mtimeMs": report.mtime_ms(),
        });
        writeln!(out, "{}", value)?;
        return Ok(());
    }

    writeln!(out, "Chain OK: {} entries", report.lines)?;
    writeln!(out, "Last hash: {}", report.last_hash.as_deref().unwrap_or("(empty)"))?;
    if let Some(mtime) = report.mtime_ms() {
        writeln!(out, "Modified: {} ms", mtime)?;
    }
    Ok(())
}
