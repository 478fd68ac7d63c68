//! Line-oriented persistence log for [`InMemoryRepository`](crate::InMemoryRepository).
//!
//! One record per line, comma separated, no escaping:
//!
//! ```text
//! url,<code>,<url>
//! user,<owner>,<code>
//! ```
//!
//! A tombstoned link is written as `url,<code>,deleted`. Lines are split into
//! at most three fields, so commas inside a url survive; owners and codes
//! must not contain commas.

use snip_core::{LinkRecord, ShortCode};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

pub const URL_TAG: &str = "url";
pub const USER_TAG: &str = "user";
pub const DELETED_MARKER: &str = "deleted";

/// A single line of the persistence log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Url { code: ShortCode, url: String },
    User { owner: String, code: ShortCode },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown record tag '{0}'")]
    UnknownTag(String),
    #[error("malformed record '{0}'")]
    Malformed(String),
}

impl LogEntry {
    /// The `url` line for a stored record, substituting the deletion marker
    /// for tombstoned records.
    pub fn url(code: &ShortCode, record: &LinkRecord) -> Self {
        let url = if record.deleted {
            DELETED_MARKER.to_owned()
        } else {
            record.url.clone()
        };
        Self::Url {
            code: code.clone(),
            url,
        }
    }

    pub fn user(owner: &str, code: &ShortCode) -> Self {
        Self::User {
            owner: owner.to_owned(),
            code: code.clone(),
        }
    }

    /// Parses one line, with or without its trailing newline.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut fields = line.splitn(3, ',');
        let tag = fields.next().unwrap_or_default();
        let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
            return Err(ParseError::Malformed(line.to_owned()));
        };

        match tag {
            URL_TAG if !key.is_empty() => Ok(Self::Url {
                code: ShortCode::new_unchecked(key),
                url: value.to_owned(),
            }),
            USER_TAG if !value.is_empty() => Ok(Self::User {
                owner: key.to_owned(),
                code: ShortCode::new_unchecked(value),
            }),
            URL_TAG | USER_TAG => Err(ParseError::Malformed(line.to_owned())),
            other => Err(ParseError::UnknownTag(other.to_owned())),
        }
    }

    /// The entry as a newline-terminated line.
    pub fn line(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogEntry::Url { code, url } => write!(f, "{URL_TAG},{code},{url}"),
            LogEntry::User { owner, code } => write!(f, "{USER_TAG},{owner},{code}"),
        }
    }
}

/// Links and owner index, as rebuilt from a log or held in memory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub links: HashMap<ShortCode, LinkRecord>,
    pub owners: HashMap<String, Vec<ShortCode>>,
}

impl Snapshot {
    pub fn apply(&mut self, entry: LogEntry) {
        match entry {
            LogEntry::Url { code, url } => {
                let record = if url == DELETED_MARKER {
                    LinkRecord {
                        url: String::new(),
                        deleted: true,
                    }
                } else {
                    LinkRecord::active(url)
                };
                self.links.insert(code, record);
            }
            LogEntry::User { owner, code } => {
                self.owners.entry(owner).or_default().push(code);
            }
        }
    }

    /// Renders the whole snapshot as log lines: every `url` line first, then
    /// every `user` line. Output is sorted so rewrites are deterministic.
    pub fn render(&self) -> String {
        let mut out = String::new();

        let mut codes: Vec<_> = self.links.iter().collect();
        codes.sort_unstable_by(|a, b| a.0.cmp(b.0));
        for (code, record) in codes {
            out.push_str(&LogEntry::url(code, record).line());
        }

        let mut owners: Vec<_> = self.owners.iter().collect();
        owners.sort_unstable_by(|a, b| a.0.cmp(b.0));
        for (owner, codes) in owners {
            for code in codes {
                out.push_str(&LogEntry::user(owner, code).line());
            }
        }

        out
    }
}

/// Result of replaying a log.
#[derive(Debug, Default)]
pub struct Replay {
    pub snapshot: Snapshot,
    pub applied: usize,
    pub skipped: usize,
}

/// Folds every line of `reader` into a [`Snapshot`].
///
/// Unknown tags and malformed lines are skipped, as are repeated `user`
/// lines. Only I/O failures of the reader itself are returned as errors.
pub async fn replay<R: AsyncBufRead + Unpin>(mut reader: R) -> std::io::Result<Replay> {
    let mut replay = Replay::default();
    let mut indexed = HashSet::new();
    let mut buf = Vec::new();
    let mut line_no = 0_usize;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        line_no += 1;

        let line = String::from_utf8_lossy(&buf);
        if line.trim().is_empty() {
            continue;
        }

        match LogEntry::parse(&line) {
            Ok(LogEntry::User { owner, code })
                if !indexed.insert((owner.clone(), code.clone())) =>
            {
                debug!(line = line_no, owner = %owner, code = %code, "skipping repeated owner entry");
            }
            Ok(entry) => {
                replay.snapshot.apply(entry);
                replay.applied += 1;
            }
            Err(e) => {
                replay.skipped += 1;
                warn!(line = line_no, error = %e, "skipping persistence log line");
            }
        }
    }

    debug!(
        applied = replay.applied,
        skipped = replay.skipped,
        links = replay.snapshot.links.len(),
        "replayed persistence log"
    );
    Ok(replay)
}
