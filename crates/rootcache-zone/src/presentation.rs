//! Snapshot files in presentation format.
//!
//! A snapshot holds one record per line as `owner TTL CLASS TYPE RDATA`,
//! with no header or trailer. Reading is lenient: blank lines and `;`
//! comments are ignored, and a line that does not parse is skipped and
//! counted instead of failing the whole load.
//!
//! Records whose presentation text hickory cannot parse back (RRSIG and
//! NSEC among them) are written in the RFC 3597 generic form,
//! `TYPEnn \# <len> <hex>`, so everything the writer emits reloads.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use hickory_proto::serialize::binary::{BinDecoder, BinEncodable, Restrict};
use hickory_proto::serialize::txt::RDataParser;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::{Result, ZoneError, ZoneStore};

/// Records read from a snapshot, plus the number of lines that were skipped.
#[derive(Debug, Default)]
pub struct LoadedRecords {
    /// Successfully parsed records, in file order.
    pub records: Vec<Record>,
    /// Number of non-blank, non-comment lines that failed to parse.
    pub skipped: usize,
}

/// Parses one snapshot line.
///
/// Returns `Ok(None)` for blank lines and comments. The TTL is required;
/// the class defaults to `IN` and may appear before or after the TTL.
pub fn parse_record_line(line: usize, text: &str) -> Result<Option<Record>> {
    let text = text.trim();
    if text.is_empty() || text.starts_with(';') {
        return Ok(None);
    }
    parse_fields(text)
        .map(Some)
        .map_err(|message| ZoneError::parse(line, message))
}

fn parse_fields(text: &str) -> std::result::Result<Record, String> {
    let (owner, mut rest) = next_field(text).ok_or("missing owner")?;
    let owner = if owner == "." {
        Name::root()
    } else {
        Name::from_ascii(owner).map_err(|e| format!("invalid owner {owner:?}: {e}"))?
    };

    let mut ttl = None;
    let mut class = None;
    let rtype = loop {
        let (token, tail) = next_field(rest).ok_or("missing record type")?;
        rest = tail;
        if ttl.is_none() {
            if let Ok(value) = token.parse::<u32>() {
                ttl = Some(value);
                continue;
            }
        }
        if class.is_none() {
            if let Ok(value) = DNSClass::from_str(&token.to_ascii_uppercase()) {
                class = Some(value);
                continue;
            }
        }
        break parse_type(token)?;
    };

    let ttl = ttl.ok_or("missing TTL")?;
    let rdata_text = rest.trim();
    if rdata_text.is_empty() {
        return Err("missing rdata".to_string());
    }
    let rdata = match rdata_text.strip_prefix(GENERIC_MARKER) {
        Some(generic) => parse_generic_rdata(rtype, generic)?,
        None => RData::try_from_str(rtype, rdata_text)
            .map_err(|e| format!("invalid {rtype} rdata: {e}"))?,
    };

    let mut record = Record::from_rdata(owner, ttl, rdata);
    record.set_dns_class(class.unwrap_or(DNSClass::IN));
    Ok(record)
}

const GENERIC_MARKER: &str = "\\#";

fn parse_type(token: &str) -> std::result::Result<RecordType, String> {
    let upper = token.to_ascii_uppercase();
    if let Some(code) = upper.strip_prefix("TYPE") {
        if let Ok(code) = code.parse::<u16>() {
            return Ok(RecordType::from(code));
        }
    }
    RecordType::from_str(&upper).map_err(|e| format!("invalid record type {token:?}: {e}"))
}

/// Decodes `<len> <hex>...` following the `\#` marker.
fn parse_generic_rdata(rtype: RecordType, text: &str) -> std::result::Result<RData, String> {
    let (len, hex_text) = next_field(text).ok_or("missing generic rdata length")?;
    let len: u16 = len
        .parse()
        .map_err(|_| format!("invalid generic rdata length {len:?}"))?;
    let digits: String = hex_text.split_whitespace().collect();
    let wire = hex::decode(&digits).map_err(|e| format!("invalid generic rdata hex: {e}"))?;
    if wire.len() != usize::from(len) {
        return Err(format!(
            "generic rdata length {len} does not match {} bytes of data",
            wire.len()
        ));
    }

    let mut decoder = BinDecoder::new(&wire);
    let rdata = RData::read(&mut decoder, rtype, Restrict::new(len))
        .map_err(|e| format!("invalid {rtype} wire rdata: {e}"))?;
    if !decoder.is_empty() {
        return Err(format!("{} trailing bytes in {rtype} rdata", decoder.len()));
    }
    Ok(rdata)
}

/// Formats one snapshot line.
///
/// The presentation form is used when it parses back to the same record,
/// otherwise the generic form built from the wire encoding.
fn format_record(record: &Record) -> io::Result<String> {
    let text = record.to_string();
    if parse_fields(&text).is_ok_and(|parsed| parsed == *record) {
        return Ok(text);
    }

    let wire = record
        .data()
        .to_bytes()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(format!(
        "{} {} {} TYPE{} {GENERIC_MARKER} {} {}",
        record.name(),
        record.ttl(),
        record.dns_class(),
        u16::from(record.record_type()),
        wire.len(),
        hex::encode(&wire)
    ))
}

fn next_field(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    let end = input.find(char::is_whitespace).unwrap_or(input.len());
    Some(input.split_at(end))
}

/// Parses a whole snapshot held in memory.
pub fn parse_records(text: &str) -> LoadedRecords {
    let mut loaded = LoadedRecords::default();
    for (idx, line) in text.lines().enumerate() {
        accept_line(&mut loaded, idx + 1, line);
    }
    loaded
}

/// Reads a snapshot from `reader`.
///
/// Lines that are not valid UTF-8 are counted as skipped. Only failures of
/// the reader itself are returned as errors.
pub fn read_records<R: BufRead>(reader: R) -> Result<LoadedRecords> {
    let mut loaded = LoadedRecords::default();
    for (idx, line) in reader.split(b'\n').enumerate() {
        let line = line?;
        match std::str::from_utf8(&line) {
            Ok(text) => accept_line(&mut loaded, idx + 1, text),
            Err(_) => {
                debug!(line = idx + 1, "skipping non UTF-8 snapshot line");
                loaded.skipped += 1;
            }
        }
    }
    Ok(loaded)
}

fn accept_line(loaded: &mut LoadedRecords, line: usize, text: &str) {
    match parse_record_line(line, text) {
        Ok(Some(record)) => loaded.records.push(record),
        Ok(None) => {}
        Err(e) => {
            debug!(error = %e, "skipping snapshot line");
            loaded.skipped += 1;
        }
    }
}

/// Writes every record of `store` to `writer`, one per line.
///
/// Names are written in DNS order and types by code, so the same store
/// always produces the same file. Returns the number of records written.
pub fn write_records<W: Write>(store: &ZoneStore, mut writer: W) -> io::Result<usize> {
    let mut sets: Vec<_> = store.rrsets().collect();
    sets.sort_by(|a, b| {
        a.name()
            .cmp(b.name())
            .then_with(|| u16::from(a.rtype()).cmp(&u16::from(b.rtype())))
    });

    let mut written = 0;
    for record in sets.into_iter().flat_map(|set| set.iter()) {
        writeln!(writer, "{}", format_record(record)?)?;
        written += 1;
    }
    Ok(written)
}

impl ZoneStore {
    /// Loads a snapshot file and builds a store from it.
    ///
    /// Fails when the file is missing, unreadable, or yields no usable store.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ZoneError::NotFound(path.to_path_buf()));
        }
        if path.is_dir() {
            return Err(ZoneError::NotAFile(path.to_path_buf()));
        }

        let file = File::open(path)?;
        let loaded = read_records(BufReader::new(file))?;
        if loaded.skipped > 0 {
            warn!(
                path = %path.display(),
                skipped = loaded.skipped,
                "ignored unparsable snapshot lines"
            );
        }

        let store = Self::build(loaded.records)?;
        info!(
            path = %path.display(),
            records = store.record_count(),
            "loaded zone snapshot"
        );
        Ok(store)
    }

    /// Writes the store to `path`, replacing any previous snapshot atomically.
    ///
    /// The data goes to a uniquely named temporary file in the same
    /// directory, which is renamed over `path` once it is complete and
    /// synced. Missing parent directories are created.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        if path.is_dir() {
            return Err(ZoneError::NotAFile(path.to_path_buf()));
        }
        let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                parent
            }
            None => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(dir)?;
        let written = {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            let written = write_records(self, &mut writer)?;
            writer.flush()?;
            written
        };
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;

        debug!(path = %path.display(), records = written, "wrote zone snapshot");
        Ok(written)
    }
}
