use crate::types::{EnricherError, Entity, Outcome, OutcomeStatus, Result};
use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const HEADER: [&str; 6] = ["Name", "Role", "Company", "Is Key Position", "Reason", "LinkedIn"];

const ERROR_MARKER: &str = "Error";

/// Entities that already have a durable row, rebuilt from the output file on
/// every start.
#[derive(Debug, Default, Clone)]
pub struct Ledger {
    entities: HashSet<Entity>,
    status_counts: BTreeMap<OutcomeStatus, usize>,
    skipped_rows: usize,
}

impl Ledger {
    pub fn contains(&self, entity: &Entity) -> bool {
        self.entities.contains(entity)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Rows per status as read back from the file (duplicates included).
    pub fn status_counts(&self) -> &BTreeMap<OutcomeStatus, usize> {
        &self.status_counts
    }

    /// Rows ignored while loading: truncated tail, undecodable or nameless rows.
    pub fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }

    pub(crate) fn record(&mut self, entity: Entity, status: OutcomeStatus) {
        self.entities.insert(entity);
        *self.status_counts.entry(status).or_insert(0) += 1;
    }
}

/// Append-only CSV ledger of outcomes. Every call opens, writes and closes the
/// file; no handle outlives a single operation.
pub struct ResultStore {
    path: PathBuf,
}

impl ResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every complete row. A missing file is an empty ledger (and gets
    /// created with a header); a trailing row without a line terminator is
    /// ignored as truncated.
    pub fn load_ledger(&self) -> Result<Ledger> {
        match self.read_file()? {
            Some(bytes) => Ok(self.parse_ledger(&bytes)),
            None => {
                info!("No result file at {}, starting fresh", self.path.display());
                self.create_with_header()?;
                Ok(Ledger::default())
            }
        }
    }

    /// Same as [`load_ledger`](Self::load_ledger) but never touches the file
    /// system; a missing file is simply an empty ledger.
    pub fn read_ledger(&self) -> Result<Ledger> {
        Ok(self
            .read_file()?
            .map(|bytes| self.parse_ledger(&bytes))
            .unwrap_or_default())
    }

    fn read_file(&self) -> Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.store_error(e)),
        }
    }

    fn parse_ledger(&self, bytes: &[u8]) -> Ledger {
        let mut ledger = Ledger::default();
        let complete_len = complete_prefix_len(bytes);
        if complete_len < bytes.len() {
            warn!(
                path = %self.path.display(),
                bytes = bytes.len() - complete_len,
                "Ignoring truncated final row"
            );
            ledger.skipped_rows += 1;
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(&bytes[..complete_len]);

        for (index, record) in reader.byte_records().enumerate() {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    warn!(row = index + 1, error = %e, "Skipping unreadable ledger row");
                    ledger.skipped_rows += 1;
                    continue;
                }
            };

            let entity = record
                .get(0)
                .and_then(|field| std::str::from_utf8(field).ok())
                .and_then(Entity::parse);

            match entity {
                Some(entity) => {
                    if record.len() != HEADER.len() {
                        debug!(entity = %entity, fields = record.len(), "Ledger row has unexpected field count");
                    }
                    let status = status_of(&record);
                    ledger.record(entity, status);
                }
                None => {
                    warn!(row = index + 1, "Skipping ledger row without a usable name");
                    ledger.skipped_rows += 1;
                }
            }
        }

        info!(
            path = %self.path.display(),
            entities = ledger.len(),
            skipped = ledger.skipped_rows,
            "Loaded ledger"
        );
        ledger
    }

    /// Appends exactly one row and flushes it to disk before returning.
    pub fn append(&self, outcome: &Outcome) -> Result<()> {
        let line = encode_row(outcome)?;

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| self.store_error(e))?;

        let len = file.metadata().map_err(|e| self.store_error(e))?.len();
        // A header cut as truncated leaves the file empty again.
        if self.drop_truncated_tail(&mut file, len)? == 0 {
            file.write_all(&encode_header()?).map_err(|e| self.store_error(e))?;
        }

        file.write_all(&line).map_err(|e| self.store_error(e))?;
        file.sync_data().map_err(|e| self.store_error(e))?;

        debug!(entity = %outcome.entity, status = %outcome.status, "Appended result row");
        Ok(())
    }

    fn create_with_header(&self) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .map_err(|e| self.store_error(e))?;
        file.write_all(&encode_header()?).map_err(|e| self.store_error(e))?;
        file.sync_data().map_err(|e| self.store_error(e))?;
        Ok(())
    }

    /// A partial last row would otherwise fuse with the next one. Only the last
    /// byte is read unless it is not a line terminator. Returns the length left.
    fn drop_truncated_tail(&self, file: &mut File, len: u64) -> Result<u64> {
        if len == 0 {
            return Ok(0);
        }

        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1)).map_err(|e| self.store_error(e))?;
        file.read_exact(&mut last).map_err(|e| self.store_error(e))?;
        if last[0] == b'\n' {
            return Ok(len);
        }

        let mut bytes = Vec::with_capacity(len as usize);
        file.seek(SeekFrom::Start(0)).map_err(|e| self.store_error(e))?;
        file.read_to_end(&mut bytes).map_err(|e| self.store_error(e))?;
        let complete_len = complete_prefix_len(&bytes);
        warn!(
            path = %self.path.display(),
            bytes = bytes.len() - complete_len,
            "Cutting truncated final row before appending"
        );
        file.set_len(complete_len as u64).map_err(|e| self.store_error(e))?;
        Ok(complete_len as u64)
    }

    fn store_error(&self, err: impl ToString) -> EnricherError {
        EnricherError::Store {
            path: self.path.clone(),
            reason: err.to_string(),
        }
    }
}

/// Length of the prefix that ends with a line terminator.
fn complete_prefix_len(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|pos| pos + 1)
        .unwrap_or(0)
}

fn status_of(record: &csv::ByteRecord) -> OutcomeStatus {
    let role = record.get(1).unwrap_or_default();
    let is_key = record.get(3).unwrap_or_default();
    if is_key == ERROR_MARKER.as_bytes() {
        OutcomeStatus::OperationError
    } else if role == Outcome::PARSE_ERROR_ROLE.as_bytes() {
        OutcomeStatus::ParseFailure
    } else {
        OutcomeStatus::Success
    }
}

/// Collapses line breaks so every row is exactly one physical line.
fn single_line(value: &str) -> String {
    if !value.contains(['\n', '\r']) {
        return value.to_string();
    }
    value
        .split(['\n', '\r'])
        .filter(|part| !part.trim().is_empty())
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(" ")
}

fn encode_header() -> Result<Vec<u8>> {
    write_record(&HEADER.map(str::to_string))
}

/// The name column is written as the entity holds it; it is the ledger key
/// and is already a single line.
fn encode_row(outcome: &Outcome) -> Result<Vec<u8>> {
    let details = match outcome.status {
        OutcomeStatus::OperationError => [
            outcome.role.as_str(),
            outcome.organization.as_str(),
            ERROR_MARKER,
            "",
            "",
        ],
        OutcomeStatus::Success | OutcomeStatus::ParseFailure => [
            outcome.role.as_str(),
            outcome.organization.as_str(),
            outcome.key_position.as_str(),
            outcome.reason.as_str(),
            outcome.reference_link.as_str(),
        ],
    };
    let [role, organization, key_position, reason, reference_link] = details.map(single_line);
    write_record(&[
        outcome.entity.name().to_string(),
        role,
        organization,
        key_position,
        reason,
        reference_link,
    ])
}

fn write_record(fields: &[String; 6]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    writer
        .into_inner()
        .map_err(|e| EnricherError::Io(e.into_error()))
}
