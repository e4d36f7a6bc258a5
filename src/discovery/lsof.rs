//! lsof-backed listener enumeration and working-directory lookup

use async_trait::async_trait;
use futures::future::join_all;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

use crate::error::ScanError;
use crate::listener::ListenerRecord;

/// Arguments that list every listening TCP socket without name resolution
pub const LISTEN_ARGS: &[&str] = &["-iTCP", "-sTCP:LISTEN", "-P", "-n", "-l"];

const MIN_COLUMNS: usize = 9;
const ADDRESS_COLUMN: usize = 8;
const CWD_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Source of the raw listener table
#[async_trait]
pub trait ListenerSource: Send + Sync {
    /// Raw table bytes; empty when nothing is listening
    async fn read_table(&self) -> Result<Vec<u8>, ScanError>;
}

/// Best-effort working directory lookup
#[async_trait]
pub trait CwdResolver: Send + Sync {
    /// Working directory of `pid`, or an empty string
    async fn resolve(&self, pid: &str) -> String;
}

pub struct LsofSource {
    program: String,
}

impl LsofSource {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

#[async_trait]
impl ListenerSource for LsofSource {
    async fn read_table(&self) -> Result<Vec<u8>, ScanError> {
        let output = Command::new(&self.program)
            .args(LISTEN_ARGS)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ScanError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        table_from_output(&self.program, output)
    }
}

/// lsof exits 1 with no output when no socket matches; that is an empty table,
/// not a failure.
fn table_from_output(program: &str, output: Output) -> Result<Vec<u8>, ScanError> {
    if output.status.success() {
        return Ok(output.stdout);
    }
    if output.status.code() == Some(1) && output.stdout.is_empty() {
        return Ok(Vec::new());
    }
    Err(ScanError::Enumeration {
        program: program.to_string(),
        status: output.status,
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

pub struct LsofCwdResolver {
    program: String,
}

impl LsofCwdResolver {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

#[async_trait]
impl CwdResolver for LsofCwdResolver {
    async fn resolve(&self, pid: &str) -> String {
        let lookup = Command::new(&self.program)
            .args(["-p", pid, "-a", "-d", "cwd", "-F", "n"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(CWD_LOOKUP_TIMEOUT, lookup).await {
            Ok(Ok(output)) if output.status.success() => {
                parse_cwd_output(&String::from_utf8_lossy(&output.stdout))
            }
            _ => String::new(),
        }
    }
}

/// Pull the path out of `-F n` field output (`p<pid>`, `fcwd`, `n<path>`)
pub fn parse_cwd_output(output: &str) -> String {
    output
        .lines()
        .find_map(|line| line.strip_prefix('n'))
        .unwrap_or_default()
        .to_string()
}

/// Parse the table rows, one record per usable line, in table order.
///
/// The first line is always treated as the header. Rows that are not valid
/// UTF-8, are too short, lack a colon in the address column or carry a
/// non-numeric port are skipped.
pub fn parse_rows(table: &[u8]) -> Vec<ListenerRecord> {
    table
        .split(|byte| *byte == b'\n')
        .skip(1)
        .filter_map(|line| std::str::from_utf8(line).ok())
        .filter_map(parse_row)
        .collect()
}

fn parse_row(line: &str) -> Option<ListenerRecord> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < MIN_COLUMNS {
        return None;
    }

    // *:8080, 127.0.0.1:8080 or [::1]:8080
    let (_, port) = fields[ADDRESS_COLUMN].rsplit_once(':')?;
    let port = port.parse().ok()?;

    Some(ListenerRecord::new(fields[1], fields[0], port))
}

/// Parse the table, resolve each row's working directory and sort by port
pub async fn parse_listeners(table: &[u8], resolver: &dyn CwdResolver) -> Vec<ListenerRecord> {
    let rows = parse_rows(table);

    let cwds = join_all(rows.iter().map(|row| resolver.resolve(&row.pid))).await;
    let mut listeners: Vec<ListenerRecord> = rows
        .into_iter()
        .zip(cwds)
        .map(|(row, cwd)| row.with_cwd(cwd))
        .collect();

    listeners.sort_by_key(|listener| listener.port);
    listeners
}
