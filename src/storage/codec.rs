//! Binary ledger file format
//!
//! A ledger file bundles one month's columns with the taxonomy that gives its
//! category ids meaning. All integers are big-endian.
//!
//! ```text
//! magic      u32   0x4D4C4432 ("MLD2")
//! version    u32   2
//! year       i32
//! month      i32   1..=12
//! rows       i32
//! timestamps i64 * rows
//! amounts    i64 * rows
//! cat ids    i32 * rows
//! sub ids    i32 * rows
//! note offs  i32 * rows
//! note lens  i32 * rows
//! arena len  i32, then that many bytes of UTF-8
//! categories i32 (>= 1), each:
//!     name     u16 byte length + UTF-8
//!     subs     i32 (>= 1), each a u16-prefixed UTF-8 name
//! ```

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, info};

use super::file_io::write_atomic;
use crate::error::{CashflowError, CashflowResult};
use crate::models::{CategoryId, MonthlyLedger, RawColumns, SubCategoryId, Taxonomy};

/// Magic bytes: "MLD2"
pub const MAGIC: u32 = 0x4D4C_4432;

/// The only format version this build reads and writes
pub const VERSION: u32 = 2;

/// A ledger together with the taxonomy its ids refer to
#[derive(Debug, Clone)]
pub struct LedgerBundle {
    pub ledger: MonthlyLedger,
    pub taxonomy: Taxonomy,
}

/// Check that a bundle can be written and read back
///
/// Runs before any byte is produced so that a failed save never leaves a
/// half-written file behind.
pub fn validate_bundle(ledger: &MonthlyLedger, taxonomy: &Taxonomy) -> CashflowResult<()> {
    taxonomy.validate_for_save()?;
    for (name, subs) in taxonomy.iter() {
        for text in std::iter::once(name).chain(subs.iter().map(String::as_str)) {
            if text.len() > u16::MAX as usize {
                return Err(CashflowError::Taxonomy(format!(
                    "name longer than {} bytes: '{}...'",
                    u16::MAX,
                    text.chars().take(16).collect::<String>()
                )));
            }
        }
    }
    check_ids(ledger, taxonomy)?;
    i32::try_from(ledger.len())
        .map_err(|_| CashflowError::Validation("too many rows for one file".into()))?;
    Ok(())
}

fn check_ids(ledger: &MonthlyLedger, taxonomy: &Taxonomy) -> CashflowResult<()> {
    let columns = ledger.columns();
    for (row, (&cat, &sub)) in columns
        .category_ids
        .iter()
        .zip(columns.sub_ids)
        .enumerate()
    {
        let known = taxonomy
            .sub_count(cat)
            .map(|count| sub.index() < count)
            .unwrap_or(false);
        if !known {
            return Err(CashflowError::Taxonomy(format!(
                "row {} refers to {}/{} which the taxonomy does not define",
                row, cat, sub
            )));
        }
    }
    Ok(())
}

/// Write a bundle to `w`
pub fn encode<W: Write>(ledger: &MonthlyLedger, taxonomy: &Taxonomy, w: &mut W) -> CashflowResult<()> {
    validate_bundle(ledger, taxonomy)?;
    write_bundle(ledger, taxonomy, w)?;
    Ok(())
}

/// Encode a bundle into a fresh buffer
pub fn encode_to_vec(ledger: &MonthlyLedger, taxonomy: &Taxonomy) -> CashflowResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(64 + ledger.len() * 40 + ledger.note_arena_len());
    encode(ledger, taxonomy, &mut buf)?;
    Ok(buf)
}

fn write_bundle<W: Write>(ledger: &MonthlyLedger, taxonomy: &Taxonomy, w: &mut W) -> io::Result<()> {
    let columns = ledger.columns();

    w.write_u32::<BigEndian>(MAGIC)?;
    w.write_u32::<BigEndian>(VERSION)?;
    w.write_i32::<BigEndian>(ledger.year())?;
    w.write_i32::<BigEndian>(ledger.month() as i32)?;
    w.write_i32::<BigEndian>(ledger.len() as i32)?;

    for &ts in columns.timestamps {
        w.write_i64::<BigEndian>(ts)?;
    }
    for &amount in columns.amounts {
        w.write_i64::<BigEndian>(amount)?;
    }
    for cat in columns.category_ids {
        w.write_u32::<BigEndian>(cat.get())?;
    }
    for sub in columns.sub_ids {
        w.write_u32::<BigEndian>(sub.get())?;
    }
    for &off in columns.note_offsets {
        w.write_u32::<BigEndian>(off)?;
    }
    for &len in columns.note_lens {
        w.write_u32::<BigEndian>(len)?;
    }

    w.write_u32::<BigEndian>(columns.notes.len() as u32)?;
    w.write_all(columns.notes)?;

    w.write_i32::<BigEndian>(taxonomy.category_count() as i32)?;
    for (name, subs) in taxonomy.iter() {
        write_string(w, name)?;
        w.write_i32::<BigEndian>(subs.len() as i32)?;
        for sub in subs {
            write_string(w, sub)?;
        }
    }
    Ok(())
}

/// Read a bundle from `r`
///
/// Nothing is returned unless the whole file is valid.
pub fn decode<R: Read>(r: &mut R) -> CashflowResult<LedgerBundle> {
    let magic = read_u32(r)?;
    if magic != MAGIC {
        return Err(CashflowError::InvalidFormat(format!(
            "bad magic {:#010x}",
            magic
        )));
    }
    let version = read_u32(r)?;
    if version != VERSION {
        return Err(CashflowError::UnsupportedVersion {
            found: version,
            expected: VERSION,
        });
    }

    let year = read_i32(r)?;
    let month = read_i32(r)?;
    let month = u32::try_from(month)
        .ok()
        .filter(|m| (1..=12).contains(m))
        .ok_or_else(|| CashflowError::InvalidFormat(format!("month {} out of range", month)))?;
    let rows = read_count(r, "row count")?;

    let mut columns = RawColumns {
        timestamps: read_column(r, rows, |r| r.read_i64::<BigEndian>())?,
        amounts: read_column(r, rows, |r| r.read_i64::<BigEndian>())?,
        category_ids: read_column(r, rows, |r| r.read_u32::<BigEndian>().map(CategoryId::new))?,
        sub_ids: read_column(r, rows, |r| r.read_u32::<BigEndian>().map(SubCategoryId::new))?,
        note_offsets: read_column(r, rows, |r| r.read_u32::<BigEndian>())?,
        note_lens: read_column(r, rows, |r| r.read_u32::<BigEndian>())?,
        notes: Vec::new(),
    };

    let arena = read_count(r, "note arena size")?;
    columns.notes = read_bytes(r, arena)?;

    let category_count = read_i32(r)?;
    if category_count <= 0 {
        return Err(CashflowError::InvalidFormat(
            "file contains no categories".into(),
        ));
    }
    let mut categories = Vec::with_capacity((category_count as usize).min(1024));
    let mut subs = Vec::with_capacity(categories.capacity());
    for _ in 0..category_count {
        let name = read_string(r)?;
        let sub_count = read_i32(r)?;
        if sub_count <= 0 {
            return Err(CashflowError::InvalidFormat(format!(
                "category '{}' has no subcategories",
                name
            )));
        }
        let mut names = Vec::with_capacity((sub_count as usize).min(1024));
        for _ in 0..sub_count {
            names.push(read_string(r)?);
        }
        categories.push(name);
        subs.push(names);
    }

    let taxonomy = Taxonomy::from_parts(categories, subs)
        .map_err(|e| CashflowError::InvalidFormat(e.to_string()))?;
    let ledger = MonthlyLedger::from_columns(year, month, columns)?;
    check_ids(&ledger, &taxonomy).map_err(|e| CashflowError::InvalidFormat(e.to_string()))?;

    debug!(
        year,
        month,
        rows = ledger.len(),
        categories = taxonomy.category_count(),
        "decoded ledger"
    );
    Ok(LedgerBundle { ledger, taxonomy })
}

/// Decode a bundle from a byte slice; trailing bytes are rejected
pub fn decode_from_slice(bytes: &[u8]) -> CashflowResult<LedgerBundle> {
    let mut cursor = io::Cursor::new(bytes);
    let bundle = decode(&mut cursor)?;
    if (cursor.position() as usize) != bytes.len() {
        return Err(CashflowError::InvalidFormat(format!(
            "{} trailing bytes",
            bytes.len() - cursor.position() as usize
        )));
    }
    Ok(bundle)
}

/// Save a bundle to `path` atomically
///
/// Validation runs first; on any failure the existing file is left as it was.
pub fn save_to_path<P: AsRef<Path>>(
    path: P,
    ledger: &MonthlyLedger,
    taxonomy: &Taxonomy,
) -> CashflowResult<()> {
    let path = path.as_ref();
    validate_bundle(ledger, taxonomy)?;
    write_atomic(path, |w| Ok(write_bundle(ledger, taxonomy, w)?))?;
    info!(
        path = %path.display(),
        rows = ledger.len(),
        categories = taxonomy.category_count(),
        "saved ledger"
    );
    Ok(())
}

/// Load a bundle from `path`
pub fn load_from_path<P: AsRef<Path>>(path: P) -> CashflowResult<LedgerBundle> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| CashflowError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);
    let bundle = decode(&mut reader)?;
    let mut rest = [0u8; 1];
    if reader.read(&mut rest)? != 0 {
        return Err(CashflowError::InvalidFormat(format!(
            "trailing bytes in {}",
            path.display()
        )));
    }
    Ok(bundle)
}

// ============================================================================
// Primitive helpers
// ============================================================================

fn truncated(err: io::Error) -> CashflowError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        CashflowError::InvalidFormat("file is truncated".into())
    } else {
        CashflowError::from(err)
    }
}

fn read_u32<R: Read>(r: &mut R) -> CashflowResult<u32> {
    r.read_u32::<BigEndian>().map_err(truncated)
}

fn read_i32<R: Read>(r: &mut R) -> CashflowResult<i32> {
    r.read_i32::<BigEndian>().map_err(truncated)
}

fn read_count<R: Read>(r: &mut R, what: &str) -> CashflowResult<usize> {
    let value = read_i32(r)?;
    usize::try_from(value)
        .map_err(|_| CashflowError::InvalidFormat(format!("negative {}: {}", what, value)))
}

fn read_column<R, T, F>(r: &mut R, rows: usize, mut read: F) -> CashflowResult<Vec<T>>
where
    R: Read,
    F: FnMut(&mut R) -> io::Result<T>,
{
    // Cap the up-front allocation; a corrupt count must not reserve gigabytes
    let mut column = Vec::with_capacity(rows.min(1 << 16));
    for _ in 0..rows {
        column.push(read(r).map_err(truncated)?);
    }
    Ok(column)
}

fn read_bytes<R: Read>(r: &mut R, len: usize) -> CashflowResult<Vec<u8>> {
    let mut bytes = Vec::with_capacity(len.min(1 << 20));
    r.take(len as u64).read_to_end(&mut bytes)?;
    if bytes.len() != len {
        return Err(CashflowError::InvalidFormat("file is truncated".into()));
    }
    Ok(bytes)
}

fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    w.write_u16::<BigEndian>(bytes.len() as u16)?;
    w.write_all(bytes)
}

fn read_string<R: Read>(r: &mut R) -> CashflowResult<String> {
    let len = r.read_u16::<BigEndian>().map_err(truncated)? as usize;
    let bytes = read_bytes(r, len)?;
    String::from_utf8(bytes)
        .map_err(|_| CashflowError::InvalidFormat("name is not valid UTF-8".into()))
}
