use std::io::IsTerminal;

use adbwire_sync::{Entry, Stats, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFMT, S_IFREG, S_IFSOCK};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct StatOutput<'a> {
    path: &'a str,
    kind: &'static str,
    mode: String,
    permissions: String,
    size: u32,
    mtime: u32,
}

#[derive(Serialize)]
struct EntryOutput<'a> {
    name: &'a str,
    kind: &'static str,
    permissions: String,
    size: u32,
    mtime: u32,
}

#[derive(Serialize)]
pub struct TransferOutput<'a> {
    pub direction: &'static str,
    pub local: &'a str,
    pub remote: &'a str,
    pub bytes: u64,
}

#[derive(Serialize)]
struct ListeningOutput<'a> {
    event: &'static str,
    addr: &'a str,
    serial: Option<&'a str>,
}

pub fn print_stats(path: &str, stats: &Stats, format: OutputFormat) {
    let out = StatOutput {
        path,
        kind: file_kind(stats.mode),
        mode: format!("{:o}", stats.mode),
        permissions: format!("{:04o}", stats.permissions()),
        size: stats.size,
        mtime: stats.mtime,
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = new_table(vec!["PATH", "TYPE", "MODE", "SIZE", "MTIME"]);
            table.add_row(vec![
                out.path.to_string(),
                out.kind.to_string(),
                out.permissions.clone(),
                out.size.to_string(),
                out.mtime.to_string(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!(
            "{} type={} mode={} size={} mtime={}",
            out.path, out.kind, out.permissions, out.size, out.mtime
        ),
    }
}

pub fn print_entries(entries: &[Entry], format: OutputFormat) {
    let rows: Vec<EntryOutput<'_>> = entries
        .iter()
        .map(|entry| EntryOutput {
            name: &entry.name,
            kind: file_kind(entry.stats.mode),
            permissions: format!("{:04o}", entry.stats.permissions()),
            size: entry.stats.size,
            mtime: entry.stats.mtime,
        })
        .collect();
    match format {
        OutputFormat::Json => print_json(&rows),
        OutputFormat::Table => {
            let mut table = new_table(vec!["NAME", "TYPE", "MODE", "SIZE", "MTIME"]);
            for row in &rows {
                table.add_row(vec![
                    row.name.to_string(),
                    row.kind.to_string(),
                    row.permissions.clone(),
                    row.size.to_string(),
                    row.mtime.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in &rows {
                println!(
                    "{} {:>10} {} {}",
                    row.permissions, row.size, row.kind, row.name
                );
            }
        }
    }
}

pub fn print_transfer(out: &TransferOutput<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut table = new_table(vec!["DIRECTION", "LOCAL", "REMOTE", "BYTES"]);
            table.add_row(vec![
                out.direction.to_string(),
                out.local.to_string(),
                out.remote.to_string(),
                out.bytes.to_string(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("{} {} -> {}: {} bytes", out.direction, out.local, out.remote, out.bytes)
        }
    }
}

/// Announced once the bridge is bound. Always a single line, so scripts
/// can read the address from the first line of stdout.
pub fn print_listening(addr: &str, serial: Option<&str>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ListeningOutput {
            event: "listening",
            addr,
            serial,
        }),
        OutputFormat::Table | OutputFormat::Pretty => match serial {
            Some(serial) => println!("bridging {serial} on {addr}"),
            None => println!("bridging on {addr}"),
        },
    }
}

pub fn file_kind(mode: u32) -> &'static str {
    match mode & S_IFMT {
        S_IFREG => "file",
        S_IFDIR => "directory",
        S_IFLNK => "symlink",
        S_IFCHR => "char-device",
        S_IFBLK => "block-device",
        S_IFIFO => "fifo",
        S_IFSOCK => "socket",
        _ => "unknown",
    }
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}
