//! Append-only ledger of created instances.
//!
//! One CSV row per instance: id, name, transport kind, address and the
//! credential pair used to reach it. Rows are only ever appended. Readers
//! skip malformed rows instead of failing.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

const HEADER: &str = "instance_id,name,transport,address,username,password";
const COLUMNS: usize = 6;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub instance_id: String,
    pub name: String,
    pub transport: String,
    pub address: String,
    pub username: String,
    pub password: Option<String>,
}

impl LedgerEntry {
    fn to_row(&self) -> String {
        [
            self.instance_id.as_str(),
            self.name.as_str(),
            self.transport.as_str(),
            self.address.as_str(),
            self.username.as_str(),
            self.password.as_deref().unwrap_or(""),
        ]
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",")
    }

    fn from_row(line: &str) -> Option<Self> {
        let fields = split_row(line)?;
        if fields.len() != COLUMNS {
            return None;
        }
        let mut it = fields.into_iter();
        let instance_id = it.next()?;
        if instance_id.is_empty() {
            return None;
        }
        Some(Self {
            instance_id,
            name: it.next()?,
            transport: it.next()?,
            address: it.next()?,
            username: it.next()?,
            password: it.next().filter(|p| !p.is_empty()),
        })
    }
}

/// File-backed ledger.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    /// Append one entry, writing the header first if the file is new.
    pub fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;
        let is_new = file.metadata().map(|m| m.len() == 0).unwrap_or(false);

        let mut buf = String::new();
        if is_new {
            buf.push_str(HEADER);
            buf.push('\n');
        }
        buf.push_str(&entry.to_row());
        buf.push('\n');
        file.write_all(buf.as_bytes()).map_err(|e| self.io_err(e))?;
        debug!(instance = %entry.instance_id, path = %self.path.display(), "ledger entry appended");
        Ok(())
    }

    /// All well-formed entries in file order. A missing file is empty.
    pub fn entries(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_err(e)),
        };

        let mut entries = Vec::new();
        for (lineno, raw) in BufReader::new(file).split(b'\n').enumerate() {
            let raw = raw.map_err(|e| self.io_err(e))?;
            let Ok(line) = std::str::from_utf8(&raw) else {
                warn!(
                    path = %self.path.display(),
                    line = lineno + 1,
                    "skipping ledger row that is not valid UTF-8"
                );
                continue;
            };
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.trim().is_empty() || line == HEADER {
                continue;
            }
            match LedgerEntry::from_row(line) {
                Some(entry) => entries.push(entry),
                None => warn!(
                    path = %self.path.display(),
                    line = lineno + 1,
                    "skipping malformed ledger row"
                ),
            }
        }
        Ok(entries)
    }

    /// Latest entry for `instance_id`.
    pub fn find(&self, instance_id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        Ok(self
            .entries()?
            .into_iter()
            .rev()
            .find(|e| e.instance_id == instance_id))
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Split one CSV row. `None` on an unterminated quote.
fn split_row(line: &str) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut quoted = false;

    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            ('"', true) => quoted = false,
            ('"', false) if field.is_empty() => quoted = true,
            (',', false) => fields.push(std::mem::take(&mut field)),
            (c, _) => field.push(c),
        }
    }
    if quoted {
        return None;
    }
    fields.push(field);
    Some(fields)
}
