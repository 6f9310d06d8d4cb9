//! Roster persistence
//!
//! The roster is a delimited text file with a header row that must contain every
//! field in [`REQUIRED_FIELDS`]. Extra columns, column order and row order survive a
//! load/save cycle untouched, as do the delimiter and line terminator.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::Path;

use log::debug;

use crate::errors::{FleetError, Result};

/// Header fields every roster must carry
pub const REQUIRED_FIELDS: [&str; 7] = [
    "name", "surname", "username", "email", "sys-pass", "nb-pass", "port",
];

/// Delimiters tried, in order, when sniffing the header
const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b':'];

/// On-disk record format detected at load time and reproduced at save time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterFormat {
    pub delimiter: u8,
    pub crlf: bool,
}

impl Default for RosterFormat {
    fn default() -> Self {
        Self {
            delimiter: b',',
            crlf: true,
        }
    }
}

impl RosterFormat {
    /// Pick the first candidate delimiter whose header split covers the required fields
    pub fn sniff(header_line: &str) -> Result<Self> {
        let crlf = header_line.ends_with("\r\n");
        let line = header_line.trim_end_matches(['\r', '\n']);

        for delimiter in CANDIDATE_DELIMITERS {
            let columns: HashSet<&str> = line
                .split(delimiter as char)
                .map(|c| c.trim().trim_matches('"'))
                .collect();
            if REQUIRED_FIELDS.iter().all(|f| columns.contains(f)) {
                return Ok(Self { delimiter, crlf });
            }
        }

        Err(FleetError::Format(format!(
            "roster lacks required field names; header should contain '{}'",
            REQUIRED_FIELDS.join(",")
        )))
    }
}

/// One roster entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRecord {
    pub name: String,
    pub surname: String,
    pub username: String,
    pub email: String,
    /// System account secret
    pub sys_pass: String,
    /// Sandbox application secret
    pub nb_pass: String,
    /// Assigned while the sandbox runs
    pub port: Option<u16>,
    /// Columns beyond the required set, keyed by header name
    pub extra: BTreeMap<String, String>,
}

impl UserRecord {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    /// Login derived from an email address: local part without dots
    pub fn login_from_email(email: &str) -> Option<String> {
        let local = email.split('@').next()?.replace('.', "");
        let local = local.trim();
        if local.is_empty() {
            None
        } else {
            Some(local.to_string())
        }
    }

    fn get(&self, column: &str) -> String {
        match column {
            "name" => self.name.clone(),
            "surname" => self.surname.clone(),
            "username" => self.username.clone(),
            "email" => self.email.clone(),
            "sys-pass" => self.sys_pass.clone(),
            "nb-pass" => self.nb_pass.clone(),
            "port" => self.port.map(|p| p.to_string()).unwrap_or_default(),
            other => self.extra.get(other).cloned().unwrap_or_default(),
        }
    }

    fn set(&mut self, column: &str, value: String, row: usize) -> Result<()> {
        match column {
            "name" => self.name = value,
            "surname" => self.surname = value,
            "username" => self.username = value.trim().to_string(),
            "email" => self.email = value.trim().to_string(),
            "sys-pass" => self.sys_pass = value,
            "nb-pass" => self.nb_pass = value,
            "port" => {
                let value = value.trim();
                self.port = if value.is_empty() {
                    None
                } else {
                    Some(value.parse().map_err(|_| {
                        FleetError::Format(format!("row {}: invalid port '{}'", row, value))
                    })?)
                };
            }
            other => {
                self.extra.insert(other.to_string(), value);
            }
        }
        Ok(())
    }
}

/// Ordered user records plus the column set they were read with
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    pub columns: Vec<String>,
    pub users: Vec<UserRecord>,
}

impl Roster {
    /// Empty roster with exactly the required columns
    pub fn new() -> Self {
        Self {
            columns: REQUIRED_FIELDS.iter().map(|f| f.to_string()).collect(),
            users: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn find(&self, username: &str) -> Option<&UserRecord> {
        self.users.iter().find(|u| u.username == username)
    }

    /// Parse roster text; the format is sniffed from the header line
    pub fn parse(text: &str) -> Result<(Self, RosterFormat)> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let header_end = text.find('\n').map(|i| i + 1).unwrap_or(text.len());
        let format = RosterFormat::sniff(&text[..header_end])?;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(format.delimiter)
            .flexible(true)
            .from_reader(text.as_bytes());

        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| FleetError::Format(e.to_string()))?
            .iter()
            .map(|c| c.trim().to_string())
            .collect();

        let mut users = Vec::new();
        let mut seen = HashSet::new();
        for (index, record) in reader.records().enumerate() {
            let row = index + 1;
            let record = record.map_err(|e| FleetError::Format(format!("row {}: {}", row, e)))?;
            if record.iter().all(|field| field.trim().is_empty()) {
                continue;
            }

            let mut user = UserRecord::default();
            for (i, column) in columns.iter().enumerate() {
                let value = record.get(i).unwrap_or_default().to_string();
                user.set(column, value, row)?;
            }

            if user.username.is_empty() {
                user.username = UserRecord::login_from_email(&user.email).ok_or_else(|| {
                    FleetError::Format(format!("row {}: no username and no usable email", row))
                })?;
                debug!("Derived login '{}' from '{}'", user.username, user.email);
            }
            if !seen.insert(user.username.clone()) {
                return Err(FleetError::Format(format!(
                    "row {}: duplicate username '{}'",
                    row, user.username
                )));
            }
            users.push(user);
        }

        Ok((Self { columns, users }, format))
    }

    /// Render the roster, header first, in the given format
    pub fn render(&self, format: RosterFormat) -> Result<String> {
        let terminator = if format.crlf {
            csv::Terminator::CRLF
        } else {
            csv::Terminator::Any(b'\n')
        };
        let mut writer = csv::WriterBuilder::new()
            .delimiter(format.delimiter)
            .terminator(terminator)
            .from_writer(Vec::new());

        let to_io = |e: csv::Error| FleetError::Io(io::Error::other(e.to_string()));
        writer.write_record(&self.columns).map_err(to_io)?;
        for user in &self.users {
            writer
                .write_record(self.columns.iter().map(|c| user.get(c)))
                .map_err(to_io)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| FleetError::Io(io::Error::other(e.to_string())))?;
        String::from_utf8(bytes).map_err(|e| FleetError::Io(io::Error::other(e.to_string())))
    }
}

/// Load a roster file
pub fn load(path: impl AsRef<Path>) -> Result<(Roster, RosterFormat)> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => FleetError::not_found(path),
        _ => FleetError::Io(e),
    })?;
    let (roster, format) = Roster::parse(&text)?;
    debug!(
        "Loaded {} users from {} (delimiter {:?})",
        roster.len(),
        path.display(),
        format.delimiter as char
    );
    Ok((roster, format))
}

/// Rewrite a roster file in full
pub fn save(path: impl AsRef<Path>, roster: &Roster, format: RosterFormat) -> Result<()> {
    let path = path.as_ref();
    let text = roster.render(format)?;

    // Write beside the target and rename so a crash never leaves half a roster.
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, text)?;
    fs::rename(&tmp, path)?;
    debug!("Saved {} users to {}", roster.len(), path.display());
    Ok(())
}
